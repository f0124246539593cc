//! Static provider registry.
//!
//! Every supported back-end is described by a fixed record; the
//! OpenAI-compatible family differs only in these fields.

/// Fixed configuration record for a provider tag.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSpec {
    pub tag: &'static str,
    /// Default API endpoint. None means the caller must supply one.
    pub default_base_url: Option<&'static str>,
    pub api_key_required: bool,
    /// Environment variable named in missing-key error messages.
    pub api_key_env: &'static str,
    /// Attribution headers sent with every request.
    pub default_headers: &'static [(&'static str, &'static str)],
    /// Whether parallel calls need per-instance model suffixes.
    pub supports_instance_suffix: bool,
    /// Uses the OpenAI chat-completions wire shape.
    pub openai_compatible: bool,
}

pub const PROVIDER_SPECS: &[ProviderSpec] = &[
    ProviderSpec {
        tag: "openai",
        default_base_url: Some("https://api.openai.com/v1"),
        api_key_required: true,
        api_key_env: "OPENAI_API_KEY",
        default_headers: &[],
        supports_instance_suffix: false,
        openai_compatible: true,
    },
    ProviderSpec {
        tag: "grok",
        default_base_url: Some("https://api.x.ai/v1"),
        api_key_required: true,
        api_key_env: "XAI_API_KEY",
        default_headers: &[],
        supports_instance_suffix: false,
        openai_compatible: true,
    },
    ProviderSpec {
        tag: "openrouter",
        default_base_url: Some("https://openrouter.ai/api/v1"),
        api_key_required: true,
        api_key_env: "OPENROUTER_API_KEY",
        default_headers: &[
            ("HTTP-Referer", "https://agora.dev"),
            ("X-Title", "Agora"),
        ],
        supports_instance_suffix: false,
        openai_compatible: true,
    },
    ProviderSpec {
        tag: "ollama",
        default_base_url: Some("http://localhost:11434/v1"),
        api_key_required: false,
        api_key_env: "",
        default_headers: &[],
        supports_instance_suffix: false,
        openai_compatible: true,
    },
    ProviderSpec {
        tag: "vllm",
        default_base_url: Some("http://localhost:8000/v1"),
        api_key_required: false,
        api_key_env: "",
        default_headers: &[],
        supports_instance_suffix: false,
        openai_compatible: true,
    },
    ProviderSpec {
        tag: "lm_studio",
        default_base_url: Some("http://localhost:1234/v1"),
        api_key_required: false,
        api_key_env: "",
        default_headers: &[],
        supports_instance_suffix: true,
        openai_compatible: true,
    },
    ProviderSpec {
        tag: "anthropic",
        default_base_url: Some("https://api.anthropic.com/v1"),
        api_key_required: true,
        api_key_env: "ANTHROPIC_API_KEY",
        default_headers: &[],
        supports_instance_suffix: false,
        openai_compatible: false,
    },
    ProviderSpec {
        tag: "gemini",
        default_base_url: Some("https://generativelanguage.googleapis.com/v1beta"),
        api_key_required: true,
        api_key_env: "GOOGLE_API_KEY",
        default_headers: &[],
        supports_instance_suffix: false,
        openai_compatible: false,
    },
];

/// Look up the spec for a provider tag.
pub fn provider_spec(tag: &str) -> Option<&'static ProviderSpec> {
    PROVIDER_SPECS.iter().find(|s| s.tag == tag)
}

/// Apply the per-instance suffix convention: `model:N` with N = instance + 1,
/// only for providers that need it and only for instance > 0.
pub fn instance_model_name(spec: &ProviderSpec, model: &str, instance: Option<u32>) -> String {
    match instance {
        Some(n) if spec.supports_instance_suffix && n > 0 => format!("{model}:{}", n + 1),
        _ => model.to_string(),
    }
}
