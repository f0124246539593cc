use std::path::{Path, PathBuf};
use tracing::{info, warn};

use agora_core::{AgoraError, Result};

use crate::schema::AgoraConfig;

/// Resolve the config path: explicit path > AGORA_CONFIG env > ~/.agora/agora.yaml
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(p) = std::env::var("AGORA_CONFIG") {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agora")
        .join("agora.yaml")
}

/// Load the config from disk, falling back to defaults when the file is
/// absent, then apply environment overrides and validate.
pub fn load(path: Option<&Path>) -> Result<AgoraConfig> {
    let config_path = resolve_path(path);
    let config = if config_path.exists() {
        info!(?config_path, "loading configuration");
        let raw = std::fs::read_to_string(&config_path)?;
        serde_yaml::from_str::<AgoraConfig>(&raw).map_err(|e| {
            AgoraError::Config(format!("failed to parse {}: {}", config_path.display(), e))
        })?
    } else {
        warn!(?config_path, "config file not found, using defaults");
        AgoraConfig::default()
    };

    let config = apply_env_overrides(config);

    config.validate().map_err(AgoraError::Config)?;

    Ok(config)
}

/// Apply env var overrides. API keys from the environment fill in when the
/// config file doesn't set them — the file takes priority.
pub fn apply_env_overrides(mut config: AgoraConfig) -> AgoraConfig {
    if let Ok(v) = std::env::var("AGORA_SERVER_HOST") {
        config.server.host = v;
    }
    if let Ok(v) = std::env::var("AGORA_SERVER_PORT") {
        if let Ok(port) = v.parse::<u16>() {
            config.server.port = port;
        }
    }
    if let Ok(v) = std::env::var("AGORA_DB_PATH") {
        config.database.path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("AGORA_LOG_LEVEL") {
        config.logging.level = v;
    }

    let keys = &mut config.providers;
    if keys.anthropic_api_key.is_none() {
        keys.anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").ok();
    }
    if keys.openai_api_key.is_none() {
        keys.openai_api_key = std::env::var("OPENAI_API_KEY").ok();
    }
    if keys.google_api_key.is_none() {
        keys.google_api_key = std::env::var("GOOGLE_API_KEY").ok();
    }
    if keys.xai_api_key.is_none() {
        keys.xai_api_key = std::env::var("XAI_API_KEY").ok();
    }
    if keys.openrouter_api_key.is_none() {
        keys.openrouter_api_key = std::env::var("OPENROUTER_API_KEY").ok();
    }

    config
}
