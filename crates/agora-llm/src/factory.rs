use std::sync::Arc;

use agora_core::{AgoraError, Result};

use crate::anthropic::AnthropicProvider;
use crate::gemini::GeminiProvider;
use crate::mock::MockProvider;
use crate::openai_compatible::OpenAiCompatibleProvider;
use crate::provider::ChatProvider;
use crate::spec::provider_spec;

/// Build a provider instance for a tag.
///
/// `api_key` and `base_url` come from configuration; either may be None,
/// in which case the spec defaults apply. Unknown tags fail fast.
pub fn build_provider(
    tag: &str,
    api_key: Option<String>,
    base_url: Option<String>,
) -> Result<Arc<dyn ChatProvider>> {
    match tag {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(api_key, base_url))),
        "gemini" => Ok(Arc::new(GeminiProvider::new(api_key, base_url))),
        "mock" => Ok(Arc::new(MockProvider::new("mock").with_handler(|_, _| {
            crate::mock::MockReply::text("(mock provider: no script installed)")
        }))),
        other => {
            let spec = provider_spec(other)
                .filter(|s| s.openai_compatible)
                .ok_or_else(|| AgoraError::UnknownProvider(other.to_string()))?;
            Ok(Arc::new(OpenAiCompatibleProvider::new(
                spec, api_key, base_url,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags_build() {
        for tag in [
            "anthropic",
            "gemini",
            "openai",
            "grok",
            "openrouter",
            "ollama",
            "vllm",
            "lm_studio",
            "mock",
        ] {
            let provider = build_provider(tag, Some("key".into()), None).unwrap();
            assert_eq!(provider.name(), if tag == "mock" { "mock" } else { tag });
        }
    }

    #[test]
    fn test_unknown_tag_fails_fast() {
        match build_provider("skynet", None, None) {
            Ok(_) => panic!("expected unknown tag to fail"),
            Err(err) => assert_eq!(err.code(), "config_error"),
        }
    }
}
