//! HTTP API integration tests — exercise the server endpoints with a
//! scripted mock provider.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use agora_config::AuthConfig;
use agora_debates::{DebateService, MemoryBilling, ProviderFactory};
use agora_engine::PersonalityRegistry;
use agora_llm::{ChatProvider, MockProvider, MockReply};
use agora_store::{DebateRepository, SqliteStore, UsageStore};
use agora_usage::{PricingResolver, UsageService};

fn setup(auth: AuthConfig) -> axum::Router {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let usage = Arc::new(UsageService::new(
        Arc::new(PricingResolver::new(None)),
        Arc::clone(&store) as Arc<dyn UsageStore>,
    ));
    let factory: ProviderFactory = Arc::new(|_tag: &str| {
        Ok(Arc::new(MockProvider::new("mock").with_handler(|system, _user| {
            if system.contains("analyzing a multi-perspective debate") {
                MockReply::text(r#"{"consensus": false, "reasoning": "still debating"}"#)
            } else if system.contains("dispassionate synthesizer") {
                MockReply::text("Synthesis: four.")
            } else {
                MockReply::text("four")
            }
        })) as Arc<dyn ChatProvider>)
    });

    let service = Arc::new(DebateService::new(
        store as Arc<dyn DebateRepository>,
        usage,
        Arc::new(MemoryBilling::unlimited()),
        Arc::new(PersonalityRegistry::builtin()),
        factory,
    ));

    agora_server::build_router(service, auth, false)
}

fn open_router() -> axum::Router {
    setup(AuthConfig::default())
}

fn authed_router() -> axum::Router {
    let mut auth = AuthConfig::default();
    auth.api_tokens.insert("token-u1".into(), "u1".into());
    auth.api_tokens.insert("token-u2".into(), "u2".into());
    setup(auth)
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_body() -> String {
    serde_json::json!({
        "question": "What is 2+2?",
        "provider": "mock",
        "model": "echo",
        "settings": {
            "max_rounds": 2,
            "temperature": 0.7,
            "personalities": ["optimist", "pessimist"],
            "include_synthesis": true,
        }
    })
    .to_string()
}

async fn create_debate(app: &axum::Router, token: Option<&str>) -> serde_json::Value {
    let mut req = Request::post("/debates").header("content-type", "application/json");
    if let Some(token) = token {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let resp = app
        .clone()
        .oneshot(req.body(Body::from(create_body())).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    body_json(resp).await
}

// ── Health ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_endpoint() {
    let app = open_router();
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

// ── Create / get / list ────────────────────────────────────────

#[tokio::test]
async fn test_create_returns_201_with_pending_debate() {
    let app = open_router();
    let debate = create_debate(&app, None).await;

    assert_eq!(debate["status"], "pending");
    assert_eq!(debate["question"], "What is 2+2?");
    assert_eq!(debate["current_round"], 0);
    assert!(debate["id"].is_string());
}

#[tokio::test]
async fn test_create_validation_is_422() {
    let app = open_router();
    let body = serde_json::json!({
        "question": "",
        "provider": "mock",
        "model": "echo",
    })
    .to_string();

    let resp = app
        .oneshot(
            Request::post("/debates")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(resp).await;
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_get_debate_and_missing_404() {
    let app = open_router();
    let debate = create_debate(&app, None).await;
    let id = debate["id"].as_str().unwrap();

    let resp = app
        .clone()
        .oneshot(Request::get(format!("/debates/{id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(
            Request::get(format!("/debates/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_debates_paged() {
    let app = open_router();
    for _ in 0..3 {
        create_debate(&app, None).await;
    }

    let resp = app
        .oneshot(
            Request::get("/debates?page=1&page_size=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["total"], 3);
    assert_eq!(json["debates"].as_array().unwrap().len(), 2);
    assert_eq!(json["has_more"], true);
}

#[tokio::test]
async fn test_list_rejects_unknown_status() {
    let app = open_router();
    let resp = app
        .oneshot(
            Request::get("/debates?status=bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// ── Cancel / delete ────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_then_conflict_on_second_cancel() {
    let app = open_router();
    let debate = create_debate(&app, None).await;
    let id = debate["id"].as_str().unwrap();

    let resp = app
        .clone()
        .oneshot(
            Request::post(format!("/debates/{id}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "cancelled");

    // Cancelling a terminal debate is a conflict.
    let resp = app
        .oneshot(
            Request::post(format!("/debates/{id}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_delete_terminal_debate_204() {
    let app = open_router();
    let debate = create_debate(&app, None).await;
    let id = debate["id"].as_str().unwrap();

    // Pending deletes conflict; cancel first.
    let resp = app
        .clone()
        .oneshot(
            Request::delete(format!("/debates/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    app.clone()
        .oneshot(
            Request::post(format!("/debates/{id}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let resp = app
        .clone()
        .oneshot(
            Request::delete(format!("/debates/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app
        .oneshot(Request::get(format!("/debates/{id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── Streaming ──────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_emits_sse_frames_until_terminal() {
    let app = open_router();
    let debate = create_debate(&app, None).await;
    let id = debate["id"].as_str().unwrap();

    let resp = app
        .oneshot(
            Request::get(format!("/debates/{id}/stream"))
                .header("accept", "text/event-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(body.contains("event: debate_started\n"));
    assert!(body.contains("event: round_started\n"));
    assert!(body.contains("event: answer_chunk\n"));
    assert!(body.contains("event: personality_completed\n"));
    assert!(body.contains("event: cost_update\n"));
    assert!(body.contains("event: synthesis_completed\n"));
    assert!(body.trim_end().ends_with("}"));
    assert!(body.contains("event: debate_completed\n"));

    // Envelope JSON rides in the data field with the type discriminator.
    let started_line = body
        .lines()
        .skip_while(|l| *l != "event: debate_started")
        .nth(1)
        .unwrap();
    let data: serde_json::Value =
        serde_json::from_str(started_line.strip_prefix("data: ").unwrap()).unwrap();
    assert_eq!(data["type"], "debate_started");
    assert_eq!(data["debate_id"].as_str().unwrap(), id);
}

#[tokio::test]
async fn test_stream_on_completed_debate_conflicts() {
    let app = open_router();
    let debate = create_debate(&app, None).await;
    let id = debate["id"].as_str().unwrap();

    // Run to completion.
    let resp = app
        .clone()
        .oneshot(
            Request::get(format!("/debates/{id}/stream"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let _ = resp.into_body().collect().await.unwrap();

    let resp = app
        .oneshot(
            Request::get(format!("/debates/{id}/stream"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

// ── Usage & personalities ──────────────────────────────────────

#[tokio::test]
async fn test_usage_summary_after_debate() {
    let app = open_router();
    let debate = create_debate(&app, None).await;
    let id = debate["id"].as_str().unwrap();
    let resp = app
        .clone()
        .oneshot(
            Request::get(format!("/debates/{id}/stream"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let _ = resp.into_body().collect().await.unwrap();

    let resp = app
        .oneshot(Request::get("/usage/summary").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert!(json["total_requests"].as_u64().unwrap() >= 4);
    assert!(json["by_operation"]["debate_response"]["requests"].as_u64().unwrap() >= 4);
    assert!(json["by_operation"]["synthesis"]["requests"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_personality_endpoints() {
    let app = open_router();

    let resp = app
        .clone()
        .oneshot(Request::get("/personalities").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let all = body_json(resp).await;
    let all_names: Vec<&str> = all["personalities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(all_names.contains(&"consensus_check"));
    assert!(all_names.contains(&"synthesizer"));

    let resp = app
        .oneshot(
            Request::get("/personalities/debate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let debaters = body_json(resp).await;
    let debater_names: Vec<&str> = debaters["personalities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert!(!debater_names.contains(&"consensus_check"));
    assert!(!debater_names.contains(&"synthesizer"));
    assert!(debater_names.contains(&"optimist"));
}

// ── Auth & cross-user isolation ────────────────────────────────

#[tokio::test]
async fn test_missing_token_is_401_when_auth_enabled() {
    let app = authed_router();
    let resp = app
        .oneshot(Request::get("/debates").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_other_users_debate_is_404() {
    let app = authed_router();
    let debate = create_debate(&app, Some("token-u1")).await;
    let id = debate["id"].as_str().unwrap();

    for request in [
        Request::get(format!("/debates/{id}")).body(Body::empty()).unwrap(),
        Request::post(format!("/debates/{id}/cancel"))
            .body(Body::empty())
            .unwrap(),
        Request::delete(format!("/debates/{id}"))
            .body(Body::empty())
            .unwrap(),
    ] {
        let (mut parts, body) = request.into_parts();
        parts
            .headers
            .insert("authorization", "Bearer token-u2".parse().unwrap());
        let resp = app
            .clone()
            .oneshot(Request::from_parts(parts, body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    // The owner still sees it.
    let resp = app
        .oneshot(
            Request::get(format!("/debates/{id}"))
                .header("authorization", "Bearer token-u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
