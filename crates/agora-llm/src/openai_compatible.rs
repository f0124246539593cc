use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use agora_core::{AgoraError, Result};

use crate::provider::*;
use crate::spec::{instance_model_name, ProviderSpec};

/// Provider for every back-end speaking the OpenAI chat-completions wire
/// shape: OpenAI, Grok, OpenRouter, Ollama, vLLM, LM Studio. The
/// differences live entirely in the [`ProviderSpec`].
pub struct OpenAiCompatibleProvider {
    client: Client,
    spec: &'static ProviderSpec,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        spec: &'static ProviderSpec,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let base_url = base_url
            .or_else(|| spec.default_base_url.map(str::to_string))
            .ok_or_else(|| {
                AgoraError::Config(format!("provider {} requires a base URL", spec.tag))
            })?;
        Ok(Self {
            client: Client::new(),
            spec,
            api_key,
            base_url,
        })
    }

    fn require_key(&self) -> Result<()> {
        if self.spec.api_key_required && self.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(AgoraError::Config(format!(
                "{} API key is required; set it in agora.yaml or via {}",
                self.spec.tag, self.spec.api_key_env
            )));
        }
        Ok(())
    }

    fn build_body(&self, config: &ModelConfig, system: &str, user: &str) -> serde_json::Value {
        let model = instance_model_name(self.spec, &config.model, config.instance);
        serde_json::json!({
            "model": model,
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        self.spec.tag
    }

    async fn stream_chat(
        &self,
        config: &ModelConfig,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamChunk>> {
        self.require_key()?;

        let body = self.build_body(config, system_prompt, user_message);
        debug!(provider = %self.spec.tag, model = %config.model, "starting chat stream");

        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json");
        // Local providers accept any bearer token; send a placeholder so
        // proxies that insist on the header stay happy.
        let key = self.api_key.clone().unwrap_or_else(|| "not-needed".into());
        request = request.header("authorization", format!("Bearer {key}"));
        for (name, value) in self.spec.default_headers {
            request = request.header(*name, *value);
        }
        let request = request.json(&body);

        tokio::spawn(async move {
            let resp = request.send().await;

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
                                    if data == "[DONE]" {
                                        if let Some(u) = usage.take() {
                                            let _ = tx.send(StreamChunk::Usage(u)).await;
                                        }
                                        let _ = tx.send(StreamChunk::Done).await;
                                        return;
                                    }
                                    let Ok(event) =
                                        serde_json::from_str::<serde_json::Value>(data)
                                    else {
                                        continue;
                                    };

                                    if let Some(text) =
                                        event["choices"][0]["delta"]["content"].as_str()
                                    {
                                        if !text.is_empty() {
                                            let _ = tx
                                                .send(StreamChunk::Delta(text.to_string()))
                                                .await;
                                        }
                                    }

                                    // The usage object rides on the final chunk when
                                    // stream_options.include_usage is set.
                                    if let Some(u) = event["usage"].as_object() {
                                        usage = Some(ChatUsage {
                                            input_tokens: u
                                                .get("prompt_tokens")
                                                .and_then(|v| v.as_u64())
                                                .unwrap_or(0),
                                            output_tokens: u
                                                .get("completion_tokens")
                                                .and_then(|v| v.as_u64())
                                                .unwrap_or(0),
                                            cached_tokens: u
                                                .get("prompt_tokens_details")
                                                .and_then(|d| d.get("cached_tokens"))
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
                    // Stream ended without [DONE]
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
