//! # agora-config
//!
//! Configuration for Agora: a YAML file (`agora.yaml`) plus environment
//! variable overrides. Unknown provider tags fail fast at load time.

pub mod loader;
pub mod schema;

pub use loader::{load, resolve_path};
pub use schema::{
    AgoraConfig, AuthConfig, DatabaseConfig, DebateDefaultsConfig, LoggingConfig, ProvidersConfig,
    ServerConfig, KNOWN_PROVIDERS,
};
