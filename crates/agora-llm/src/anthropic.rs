use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use agora_core::{AgoraError, Result};

use crate::provider::*;
use crate::spec::{provider_spec, ProviderSpec};

/// Anthropic Messages API provider. Distinct wire shape from the
/// OpenAI-compatible family; identical abstraction surface.
pub struct AnthropicProvider {
    client: Client,
    spec: &'static ProviderSpec,
    api_key: Option<String>,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        let spec = provider_spec("anthropic").expect("anthropic spec registered");
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
                "anthropic API key is required; set it in agora.yaml or via {}",
                self.spec.api_key_env
            ))),
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream_chat(
        &self,
        config: &ModelConfig,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamChunk>> {
        let api_key = self.require_key()?;

        let body = serde_json::json!({
            "model": &config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "system": system_prompt,
            "stream": true,
            "messages": [
                { "role": "user", "content": user_message },
            ],
        });
        debug!(model = %config.model, "starting Anthropic chat stream");

        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let client = self.client.clone();
        let base_url = self.base_url.clone();

        tokio::spawn(async move {
            let resp = client
                .post(format!("{base_url}/messages"))
                .header("x-api-key", &api_key)
                .header("anthropic-version", "2024-10-22")
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(resp) if resp.status().is_success() => {
                    use futures::StreamExt;
                    let mut stream = resp.bytes_stream();
                    let mut buffer = String::new();
                    let mut input_tokens = 0u64;
                    let mut output_tokens = 0u64;
                    let mut cached_tokens = 0u64;

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

                                    match event["type"].as_str() {
                                        Some("message_start") => {
                                            let usage = &event["message"]["usage"];
                                            if let Some(it) = usage["input_tokens"].as_u64() {
                                                input_tokens = it;
                                            }
                                            if let Some(ct) =
                                                usage["cache_read_input_tokens"].as_u64()
                                            {
                                                cached_tokens = ct;
                                            }
                                        }
                                        Some("content_block_delta") => {
                                            let delta = &event["delta"];
                                            match delta["type"].as_str() {
                                                Some("text_delta") => {
                                                    if let Some(text) = delta["text"].as_str() {
                                                        let _ = tx
                                                            .send(StreamChunk::Delta(
                                                                text.to_string(),
                                                            ))
                                                            .await;
                                                    }
                                                }
                                                Some("thinking_delta") => {
                                                    // Surface raw thinking in-band; the
                                                    // caller splits it out at turn end.
                                                    if let Some(text) =
                                                        delta["thinking"].as_str()
                                                    {
                                                        let _ = tx
                                                            .send(StreamChunk::Delta(
                                                                text.to_string(),
                                                            ))
                                                            .await;
                                                    }
                                                }
                                                _ => {}
                                            }
                                        }
                                        Some("message_delta") => {
                                            if let Some(ot) =
                                                event["usage"]["output_tokens"].as_u64()
                                            {
                                                output_tokens = ot;
                                            }
                                        }
                                        Some("message_stop") => {
                                            let _ = tx
                                                .send(StreamChunk::Usage(ChatUsage {
                                                    input_tokens,
                                                    output_tokens,
                                                    cached_tokens,
                                                    estimated: false,
                                                }))
                                                .await;
                                            let _ = tx.send(StreamChunk::Done).await;
                                            return;
                                        }
                                        Some("error") => {
                                            let msg = event["error"]["message"]
                                                .as_str()
                                                .unwrap_or("unknown error");
                                            let _ = tx
                                                .send(StreamChunk::Error(msg.to_string()))
                                                .await;
                                            return;
                                        }
                                        _ => {}
                                    }
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(StreamChunk::Error(e.to_string())).await;
                                return;
                            }
                        }
                    }
                    // Stream ended without message_stop
                    let _ = tx
                        .send(StreamChunk::Usage(ChatUsage {
                            input_tokens,
                            output_tokens,
                            cached_tokens,
                            estimated: false,
                        }))
                        .await;
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
