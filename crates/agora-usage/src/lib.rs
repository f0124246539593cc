//! # agora-usage
//!
//! Usage accounting: pricing resolution with a TTL'd dynamic catalog,
//! token estimation, and the per-call usage recorder that turns raw token
//! counts into costed, queryable records.

pub mod pricing;
pub mod service;
pub mod tokens;

pub use pricing::{builtin_static_table, default_fallback_pricing, OpenRouterCatalog, PricingResolver};
pub use service::{current_month_utc, UsageService};
pub use tokens::{count_chat_tokens, count_tokens, family_for_model, EncoderFamily};
