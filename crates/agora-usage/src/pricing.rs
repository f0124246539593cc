//! Pricing resolution: per-lookup order is the in-process cache, the
//! dynamic OpenRouter catalog, the injected static table, and finally a
//! conservative fallback with a warning.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use agora_core::{AgoraError, ProviderPricing, Result};

/// Conservative pricing for unknown models.
pub fn default_fallback_pricing() -> ProviderPricing {
    ProviderPricing {
        provider: "unknown".into(),
        model: "unknown".into(),
        input_price_per_1m: dec!(5.00),
        output_price_per_1m: dec!(15.00),
        cached_input_price_per_1m: None,
    }
}

/// Built-in static table covering the first-party providers.
pub fn builtin_static_table() -> HashMap<String, HashMap<String, ProviderPricing>> {
    let mut table: HashMap<String, HashMap<String, ProviderPricing>> = HashMap::new();
    let mut add = |provider: &str, model: &str, input: Decimal, output: Decimal| {
        table.entry(provider.to_string()).or_default().insert(
            model.to_string(),
            ProviderPricing {
                provider: provider.into(),
                model: model.into(),
                input_price_per_1m: input,
                output_price_per_1m: output,
                cached_input_price_per_1m: None,
            },
        );
    };

    add("anthropic", "claude-opus-4", dec!(15.00), dec!(75.00));
    add("anthropic", "claude-sonnet-4", dec!(3.00), dec!(15.00));
    add("anthropic", "claude-haiku-3-5", dec!(0.80), dec!(4.00));
    add("openai", "gpt-4o", dec!(2.50), dec!(10.00));
    add("openai", "gpt-4o-mini", dec!(0.15), dec!(0.60));
    add("openai", "o3", dec!(2.00), dec!(8.00));
    add("gemini", "gemini-2.0-flash", dec!(0.10), dec!(0.40));
    add("gemini", "gemini-2.5-pro", dec!(1.25), dec!(10.00));
    add("grok", "grok-3", dec!(3.00), dec!(15.00));

    table
}

/// Exact match, then prefix match in either direction
/// ("claude-sonnet-4-5" matches "claude-sonnet-4-5-20250115").
fn table_lookup<'a>(
    table: &'a HashMap<String, HashMap<String, ProviderPricing>>,
    provider: &str,
    model: &str,
) -> Option<&'a ProviderPricing> {
    let models = table.get(provider)?;
    if let Some(pricing) = models.get(model) {
        return Some(pricing);
    }
    models
        .iter()
        .find(|(key, _)| key.starts_with(model) || model.starts_with(key.as_str()))
        .map(|(_, pricing)| pricing)
}

/// Dynamic pricing from the OpenRouter model catalog, cached whole with a
/// single timestamp. Refreshes are single-flight and failures degrade to
/// the next resolution step instead of propagating.
pub struct OpenRouterCatalog {
    api_key: Option<String>,
    api_url: String,
    http: reqwest::Client,
    cache: RwLock<HashMap<String, ProviderPricing>>,
    fetched_at: RwLock<Option<Instant>>,
    refresh_gate: AsyncMutex<()>,
    ttl: Duration,
}

impl OpenRouterCatalog {
    pub const DEFAULT_API_URL: &'static str = "https://openrouter.ai/api/v1/models";
    pub const CACHE_TTL: Duration = Duration::from_secs(3600);

    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            api_url: Self::DEFAULT_API_URL.into(),
            http: reqwest::Client::new(),
            cache: RwLock::new(HashMap::new()),
            fetched_at: RwLock::new(None),
            refresh_gate: AsyncMutex::new(()),
            ttl: Self::CACHE_TTL,
        }
    }

    pub fn with_api_url(mut self, url: String) -> Self {
        self.api_url = url;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    fn is_cache_valid(&self) -> bool {
        self.fetched_at
            .read()
            .is_some_and(|at| at.elapsed() < self.ttl)
    }

    /// Fetch the full model list and replace the cache. Safe to call
    /// concurrently: overlapping refreshes collapse onto one network call.
    pub async fn refresh(&self) -> Result<()> {
        if !self.is_configured() {
            debug!("openrouter key not configured, skipping pricing refresh");
            return Ok(());
        }

        let _gate = self.refresh_gate.lock().await;
        if self.is_cache_valid() {
            // Another task refreshed while we waited for the gate.
            return Ok(());
        }

        let key = self.api_key.clone().unwrap_or_default();
        let response = self
            .http
            .get(&self.api_url)
            .header("authorization", format!("Bearer {key}"))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| AgoraError::provider("openrouter", e))?
            .error_for_status()
            .map_err(|e| AgoraError::provider("openrouter", e))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgoraError::provider("openrouter", e))?;

        let mut fresh = HashMap::new();
        for model in body["data"].as_array().unwrap_or(&vec![]) {
            let Some(id) = model["id"].as_str() else {
                continue;
            };
            if let Some(pricing) = parse_catalog_entry(id, &model["pricing"]) {
                fresh.insert(id.to_string(), pricing);
            }
        }

        info!(models = fresh.len(), "refreshed openrouter pricing cache");
        *self.cache.write() = fresh;
        *self.fetched_at.write() = Some(Instant::now());
        Ok(())
    }

    /// Cache lookup, refreshing first when the cache is cold or expired.
    pub async fn get(&self, provider: &str, model: &str) -> Option<ProviderPricing> {
        if !self.is_configured() {
            return None;
        }
        if !self.is_cache_valid() {
            if let Err(e) = self.refresh().await {
                warn!(error = %e, "openrouter pricing refresh failed");
            }
        }
        self.lookup_cached(provider, model)
    }

    fn lookup_cached(&self, provider: &str, model: &str) -> Option<ProviderPricing> {
        let cache = self.cache.read();

        // Composite "provider/model" key first for direct-provider calls.
        if provider != "openrouter" {
            if let Some(pricing) = cache.get(&format!("{provider}/{model}")) {
                return Some(pricing.clone());
            }
        }
        if let Some(pricing) = cache.get(model) {
            return Some(pricing.clone());
        }
        cache
            .iter()
            .find(|(key, _)| key.contains(model) || key.ends_with(model))
            .map(|(_, pricing)| pricing.clone())
    }
}

/// OpenRouter prices are per token; convert to per-1M.
fn parse_catalog_entry(id: &str, pricing: &serde_json::Value) -> Option<ProviderPricing> {
    let million = Decimal::from(1_000_000u64);
    let per_token = |field: &str| -> Option<Decimal> {
        pricing[field]
            .as_str()
            .and_then(|s| s.parse::<Decimal>().ok())
    };

    let input = per_token("prompt")? * million;
    let output = per_token("completion")? * million;
    let cached = per_token("input_cache_read").map(|p| p * million);

    let provider = id.split('/').next().unwrap_or("openrouter").to_string();
    Some(ProviderPricing {
        provider,
        model: id.to_string(),
        input_price_per_1m: input,
        output_price_per_1m: output,
        cached_input_price_per_1m: cached,
    })
}

/// Hybrid resolver combining the dynamic catalog with a static table and a
/// conservative fallback. The fallback path warns once per (provider, model).
pub struct PricingResolver {
    catalog: OpenRouterCatalog,
    static_table: HashMap<String, HashMap<String, ProviderPricing>>,
    fallback: ProviderPricing,
    warned: parking_lot::Mutex<HashSet<(String, String)>>,
}

impl PricingResolver {
    pub fn new(openrouter_api_key: Option<String>) -> Self {
        Self::with_table(openrouter_api_key, builtin_static_table())
    }

    pub fn with_table(
        openrouter_api_key: Option<String>,
        static_table: HashMap<String, HashMap<String, ProviderPricing>>,
    ) -> Self {
        Self {
            catalog: OpenRouterCatalog::new(openrouter_api_key),
            static_table,
            fallback: default_fallback_pricing(),
            warned: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    pub fn with_catalog(mut self, catalog: OpenRouterCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_fallback(mut self, fallback: ProviderPricing) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback_pricing(&self) -> &ProviderPricing {
        &self.fallback
    }

    /// Resolve pricing for a (provider, model) pair. Never fails: unknown
    /// models get the conservative fallback.
    pub async fn price(&self, provider: &str, model: &str) -> ProviderPricing {
        if let Some(pricing) = self.catalog.get(provider, model).await {
            return pricing;
        }
        if let Some(pricing) = table_lookup(&self.static_table, provider, model) {
            return pricing.clone();
        }

        let key = (provider.to_string(), model.to_string());
        if self.warned.lock().insert(key) {
            warn!(provider, model, "no pricing found, using fallback");
        }
        self.fallback.clone()
    }

    /// Static-data-only lookup for synchronous contexts.
    pub fn price_sync(&self, provider: &str, model: &str) -> ProviderPricing {
        if let Some(pricing) = self.catalog.lookup_cached(provider, model) {
            return pricing;
        }
        table_lookup(&self.static_table, provider, model)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
