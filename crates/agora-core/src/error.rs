use rust_decimal::Decimal;
use thiserror::Error;

/// Unified error type for the entire Agora runtime.
#[derive(Error, Debug)]
pub enum AgoraError {
    // ── Configuration errors ───────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    // ── Request validation ─────────────────────────────────────
    #[error("validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    // ── Lookup failures ────────────────────────────────────────
    /// Also returned when the requester does not own the resource,
    /// so that existence is never disclosed across users.
    #[error("not found: {0}")]
    NotFound(String),

    // ── Billing ────────────────────────────────────────────────
    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits {
        required: Decimal,
        available: Decimal,
        shortfall: Decimal,
    },

    // ── Upstream LLM failures ──────────────────────────────────
    #[error("provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    // ── Consensus judge (never escapes the judge) ──────────────
    #[error("parse error: {0}")]
    Parse(String),

    // ── Cooperative cancellation ───────────────────────────────
    #[error("cancelled")]
    Cancelled,

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AgoraError {
    /// Wrap an upstream failure with the provider name it came from.
    pub fn provider(provider: impl Into<String>, message: impl ToString) -> Self {
        AgoraError::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Repository failures surface as provider-class errors tagged
    /// with `repository` as the source.
    pub fn repository(message: impl ToString) -> Self {
        AgoraError::Provider {
            provider: "repository".into(),
            message: message.to_string(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AgoraError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AgoraError::Config(_) | AgoraError::UnknownProvider(_) => "config_error",
            AgoraError::Validation { .. } => "validation_error",
            AgoraError::NotFound(_) => "not_found",
            AgoraError::InsufficientCredits { .. } => "insufficient_credits",
            AgoraError::Provider { .. } => "provider_error",
            AgoraError::Parse(_) => "parse_error",
            AgoraError::Cancelled => "cancelled",
            AgoraError::Io(_) => "io_error",
            AgoraError::Serialization(_) => "serialization_error",
            AgoraError::Other(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgoraError>;
