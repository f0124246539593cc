//! # agora-server
//!
//! HTTP surface for Agora:
//!
//! - REST API for creating and managing debates
//! - SSE endpoint streaming live debate events
//! - Usage summary and personality listing endpoints
//! - Bearer-token auth middleware

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{sse::Event as SseEvent, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Extension, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use agora_config::{AuthConfig, ServerConfig};
use agora_core::{AgoraError, CreateDebateRequest, DebateStatus};
use agora_debates::DebateService;

/// Interval between SSE heartbeat frames.
const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Shared server state.
pub struct AppState {
    pub service: Arc<DebateService>,
    pub auth: AuthConfig,
}

/// The user a request runs as, resolved by the auth middleware.
#[derive(Clone, Debug)]
pub struct UserId(pub String);

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
    status: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

/// Build the Axum router.
pub fn build_router(service: Arc<DebateService>, auth: AuthConfig, cors: bool) -> Router {
    let state = Arc::new(AppState { service, auth });

    let api_routes = Router::new()
        .route("/debates", post(create_debate_handler).get(list_debates_handler))
        .route(
            "/debates/{id}",
            get(get_debate_handler).delete(delete_debate_handler),
        )
        .route("/debates/{id}/cancel", post(cancel_debate_handler))
        .route("/debates/{id}/stream", get(stream_debate_handler))
        .route("/usage/summary", get(usage_summary_handler))
        .route("/personalities", get(personalities_handler))
        .route("/personalities/debate", get(debate_personalities_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .merge(api_routes)
        .with_state(state);

    if cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

/// Start the HTTP server.
pub async fn start_server(
    config: ServerConfig,
    auth: AuthConfig,
    service: Arc<DebateService>,
) -> agora_core::Result<()> {
    let listen = config.listen_addr();
    let router = build_router(service, auth, config.cors);

    info!(listen = %listen, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| AgoraError::Config(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| AgoraError::Config(format!("server error: {e}")))?;

    Ok(())
}

// ── Auth ───────────────────────────────────────────────────────

/// Resolve the requesting user from the bearer token. An empty token
/// registry disables auth and runs everything as `local`.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let user = if state.auth.api_tokens.is_empty() {
        "local".to_string()
    } else {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match token.and_then(|t| state.auth.api_tokens.get(t)) {
            Some(user) => user.clone(),
            None => {
                warn!("unauthorized request — invalid or missing bearer token");
                return Err(StatusCode::UNAUTHORIZED);
            }
        }
    };

    request.extensions_mut().insert(UserId(user));
    Ok(next.run(request).await)
}

// ── Error mapping ──────────────────────────────────────────────

fn status_for(err: &AgoraError) -> StatusCode {
    match err {
        AgoraError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AgoraError::NotFound(_) => StatusCode::NOT_FOUND,
        AgoraError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
        AgoraError::Config(_) | AgoraError::UnknownProvider(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(err: &AgoraError) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": { "code": err.code(), "message": err.to_string() }
    }))
}

fn error_response(err: AgoraError) -> Response {
    (status_for(&err), error_body(&err)).into_response()
}

/// State-transition violations surface as 409 on lifecycle endpoints.
fn conflict_response(err: AgoraError) -> Response {
    let status = match &err {
        AgoraError::Validation { .. } => StatusCode::CONFLICT,
        _ => status_for(&err),
    };
    (status, error_body(&err)).into_response()
}

// ── Handlers ───────────────────────────────────────────────────

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn create_debate_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Json(request): Json<CreateDebateRequest>,
) -> Response {
    match state.service.create(&user.0, request).await {
        Ok(debate) => (StatusCode::CREATED, Json(debate)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_debates_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Query(params): Query<ListParams>,
) -> Response {
    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => match DebateStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return error_response(AgoraError::validation(
                    "status",
                    format!("unknown status '{raw}'"),
                ));
            }
        },
    };

    match state
        .service
        .list(&user.0, params.page, params.page_size, status)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_debate_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.service.get(id, &user.0).await {
        Ok(debate) => Json(debate).into_response(),
        Err(e) => error_response(e),
    }
}

async fn cancel_debate_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.service.cancel(id, &user.0).await {
        Ok(debate) => Json(debate).into_response(),
        Err(e) => conflict_response(e),
    }
}

async fn delete_debate_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.service.delete(id, &user.0).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => conflict_response(e),
    }
}

/// SSE endpoint: `event: <type>` frames with the envelope JSON as data,
/// plus `event: ping` heartbeats every 15 seconds.
async fn stream_debate_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, Response> {
    let mut rx = state
        .service
        .start_stream(id, &user.0)
        .await
        .map_err(conflict_response)?;

    let stream = async_stream::stream! {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await; // Skip the immediate first tick.
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        let terminal = event.is_terminal();
                        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".into());
                        yield Ok(SseEvent::default().event(event.event_type()).data(data));
                        if terminal {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    yield Ok(SseEvent::default().event("ping").data(""));
                }
            }
        }
    };

    Ok(Sse::new(stream))
}

async fn usage_summary_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserId>,
) -> Response {
    match state.service.usage().summary(&user.0, None).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

async fn personalities_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "personalities": state.service.personality_names(),
    }))
}

async fn debate_personalities_handler(
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "personalities": state.service.debate_personality_names(),
    }))
}
