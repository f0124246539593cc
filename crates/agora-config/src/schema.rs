use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Provider tags the runtime knows how to build.
pub const KNOWN_PROVIDERS: &[&str] = &[
    "anthropic",
    "openai",
    "gemini",
    "grok",
    "openrouter",
    "ollama",
    "vllm",
    "lm_studio",
    "mock",
];

/// Root configuration — maps to `agora.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgoraConfig {
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub debate: DebateDefaultsConfig,
    pub logging: LoggingConfig,
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Enable a permissive CORS layer.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8420,
            cors: true,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── Providers ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub xai_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    /// Base URL overrides per provider tag (mostly for local servers).
    pub base_urls: HashMap<String, String>,
}

impl ProvidersConfig {
    /// API key for a provider tag. Local providers return None and
    /// don't need one.
    pub fn api_key_for(&self, provider: &str) -> Option<&str> {
        match provider {
            "anthropic" => self.anthropic_api_key.as_deref(),
            "openai" => self.openai_api_key.as_deref(),
            "gemini" => self.google_api_key.as_deref(),
            "grok" => self.xai_api_key.as_deref(),
            "openrouter" => self.openrouter_api_key.as_deref(),
            _ => None,
        }
    }

    pub fn base_url_for(&self, provider: &str) -> Option<&str> {
        self.base_urls.get(provider).map(String::as_str)
    }
}

// ── Database ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file path. `:memory:` gives an ephemeral store.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("agora")
                .join("agora.db"),
        }
    }
}

// ── Auth ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Static bearer-token registry: token -> user id. Empty disables auth
    /// (every request runs as `local`).
    pub api_tokens: HashMap<String, String>,
}

// ── Debate defaults ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateDefaultsConfig {
    /// Provider tag used when a request doesn't name one (CLI variant).
    pub provider: String,
    pub model: String,
    /// Directory of extra personality prompt files (`<name>.txt`),
    /// merged over the built-ins.
    pub prompts_dir: Option<PathBuf>,
}

impl Default for DebateDefaultsConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            model: "claude-sonnet-4-20250514".into(),
            prompts_dir: None,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Tracing filter directive, e.g. "info" or "agora=debug".
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl AgoraConfig {
    /// Validate the configuration. Unknown provider tags fail fast.
    pub fn validate(&self) -> Result<(), String> {
        if !KNOWN_PROVIDERS.contains(&self.debate.provider.as_str()) {
            return Err(format!(
                "unknown provider '{}' in debate defaults (known: {})",
                self.debate.provider,
                KNOWN_PROVIDERS.join(", ")
            ));
        }
        for tag in self.providers.base_urls.keys() {
            if !KNOWN_PROVIDERS.contains(&tag.as_str()) {
                return Err(format!("base_urls references unknown provider '{tag}'"));
            }
        }
        if self.server.port == 0 {
            return Err("server.port must be non-zero".into());
        }
        Ok(())
    }
}
