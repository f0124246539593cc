use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use agora_core::{AgoraError, Result};

use crate::provider::*;
use crate::spec::{provider_spec, ProviderSpec};

/// Google Gemini provider via the `streamGenerateContent` SSE endpoint.
pub struct GeminiProvider {
    client: Client,
    spec: &'static ProviderSpec,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        let spec = provider_spec("gemini").expect("gemini spec registered");
        Self {
            client: Client::new(),
            spec,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| spec.default_base_url.unwrap_or_default().to_string()),
        }
    }

    fn require_key(&self) -> Result<String> {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key.to_string()),
            _ => Err(AgoraError::Config(format!(
                "gemini API key is required; set it in agora.yaml or via {}",
                self.spec.api_key_env
            ))),
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream_chat(
        &self,
        config: &ModelConfig,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamChunk>> {
        let api_key = self.require_key()?;

        let body = serde_json::json!({
            "system_instruction": { "parts": [{ "text": system_prompt }] },
            "contents": [
                { "role": "user", "parts": [{ "text": user_message }] },
            ],
            "generationConfig": {
                "temperature": config.temperature,
                "maxOutputTokens": config.max_tokens,
            },
        });
        debug!(model = %config.model, "starting Gemini chat stream");

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, config.model, api_key
        );

        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let client = self.client.clone();

        tokio::spawn(async move {
            let resp = client
                .post(url)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(resp) if resp.status().is_success() => {
                    use futures::StreamExt;
                    let mut stream = resp.bytes_stream();
                    let mut buffer = String::new();
                    let mut usage: Option<ChatUsage> = None;

                    while let Some(chunk_result) = stream.next().await {
                        match chunk_result {
                            Ok(bytes) => {
                                buffer.push_str(&String::from_utf8_lossy(&bytes));
                                while let Some(newline_pos) = buffer.find('\n') {
                                    let line = buffer[..newline_pos].trim().to_string();
                                    buffer = buffer[newline_pos + 1..].to_string();

                                    if line.is_empty() || line.starts_with(':') {
                                        continue;
                                    }
                                    let Some(data) = line.strip_prefix("data: ") else {
                                        continue;
                                    };
                                    let Ok(event) =
                                        serde_json::from_str::<serde_json::Value>(data)
                                    else {
                                        continue;
                                    };

                                    if let Some(parts) =
                                        event["candidates"][0]["content"]["parts"].as_array()
                                    {
                                        for part in parts {
                                            if let Some(text) = part["text"].as_str() {
                                                if !text.is_empty() {
                                                    let _ = tx
                                                        .send(StreamChunk::Delta(
                                                            text.to_string(),
                                                        ))
                                                        .await;
                                                }
                                            }
                                        }
                                    }

                                    if let Some(meta) = event["usageMetadata"].as_object() {
                                        usage = Some(ChatUsage {
                                            input_tokens: meta
                                                .get("promptTokenCount")
                                                .and_then(|v| v.as_u64())
                                                .unwrap_or(0),
                                            output_tokens: meta
                                                .get("candidatesTokenCount")
                                                .and_then(|v| v.as_u64())
                                                .unwrap_or(0),
                                            cached_tokens: meta
                                                .get("cachedContentTokenCount")
                                                .and_then(|v| v.as_u64())
                                                .unwrap_or(0),
                                            estimated: false,
                                        });
                                    }

                                    if let Some(err) = event["error"]["message"].as_str() {
                                        let _ =
                                            tx.send(StreamChunk::Error(err.to_string())).await;
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(StreamChunk::Error(e.to_string())).await;
                                return;
                            }
                        }
                    }
                    if let Some(u) = usage.take() {
                        let _ = tx.send(StreamChunk::Usage(u)).await;
                    }
                    let _ = tx.send(StreamChunk::Done).await;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    let _ = tx
                        .send(StreamChunk::Error(format!("HTTP {status}: {text}")))
                        .await;
                }
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(e.to_string())).await;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let provider = GeminiProvider::new(None, None);
        let config = ModelConfig::new("gemini-2.0-flash");
        let err = provider
            .stream_chat(&config, "system", "user")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "config_error");
    }
}
