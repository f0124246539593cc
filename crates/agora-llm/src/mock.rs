//! Mock chat provider for deterministic testing.
//!
//! Returns scripted responses without any HTTP calls. Responses come from
//! a FIFO queue, or from a handler closure when tests need answers keyed
//! to the prompt (parallel fan-out makes queue order nondeterministic).

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use agora_core::Result;

use crate::provider::*;

type ReplyHandler = dyn Fn(&str, &str) -> MockReply + Send + Sync;

/// A scripted reply from the mock provider.
#[derive(Clone)]
pub struct MockReply {
    pub text: String,
    pub usage: Option<ChatUsage>,
    /// If set, the stream fails with this error instead of finishing.
    pub error: Option<String>,
    /// Emit this many characters of `text`, then fail with `error`.
    pub fail_after_chars: Option<usize>,
    /// Pause this long between chunks, for tests that need a window to
    /// cancel mid-stream.
    pub chunk_delay: Option<std::time::Duration>,
}

impl Default for MockReply {
    fn default() -> Self {
        Self {
            text: String::new(),
            usage: Some(ChatUsage {
                input_tokens: 100,
                output_tokens: 50,
                cached_tokens: 0,
                estimated: false,
            }),
            error: None,
            fail_after_chars: None,
            chunk_delay: None,
        }
    }
}

impl MockReply {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Emit a prefix of `text`, then fail.
    pub fn partial_then_error(text: &str, emit_chars: usize, message: &str) -> Self {
        Self {
            text: text.to_string(),
            error: Some(message.to_string()),
            fail_after_chars: Some(emit_chars),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Some(ChatUsage {
            input_tokens,
            output_tokens,
            cached_tokens: 0,
            estimated: false,
        });
        self
    }

    /// Report no usage at all, forcing callers onto the estimator path.
    pub fn without_usage(mut self) -> Self {
        self.usage = None;
        self
    }

    pub fn with_chunk_delay(mut self, delay: std::time::Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

/// A recorded `stream_chat` call, for assertions.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub instance: Option<u32>,
}

pub struct MockProvider {
    name: String,
    replies: Arc<Mutex<Vec<MockReply>>>,
    handler: Option<Arc<ReplyHandler>>,
    /// All requests received, for assertions in tests.
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replies: Arc::new(Mutex::new(vec![])),
            handler: None,
            requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Queue a simple text reply.
    pub fn with_reply(self, text: &str) -> Self {
        self.replies.lock().unwrap().push(MockReply::text(text));
        self
    }

    /// Queue a fully custom reply.
    pub fn with_mock_reply(self, reply: MockReply) -> Self {
        self.replies.lock().unwrap().push(reply);
        self
    }

    /// Answer every request through a closure of (system, user) instead of
    /// the queue.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &str) -> MockReply + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn recorded_requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, system: &str, user: &str) -> MockReply {
        if let Some(handler) = &self.handler {
            return handler(system, user);
        }
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            MockReply::text("(mock: no more queued replies)")
        } else {
            replies.remove(0)
        }
    }
}

/// Split text into chunks that concatenate back to the original exactly.
fn chunk_text(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_chat(
        &self,
        config: &ModelConfig,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        self.requests.lock().unwrap().push(RecordedRequest {
            model: config.model.clone(),
            system: system_prompt.to_string(),
            user: user_message.to_string(),
            instance: config.instance,
        });
        let reply = self.next_reply(system_prompt, user_message);

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            if let Some(limit) = reply.fail_after_chars {
                let prefix: String = reply.text.chars().take(limit).collect();
                if !prefix.is_empty() {
                    let _ = tx.send(StreamChunk::Delta(prefix)).await;
                }
                let message = reply.error.unwrap_or_else(|| "mock stream error".into());
                let _ = tx.send(StreamChunk::Error(message)).await;
                return;
            }

            if let Some(message) = reply.error {
                let _ = tx.send(StreamChunk::Error(message)).await;
                return;
            }

            for chunk in chunk_text(&reply.text) {
                if let Some(delay) = reply.chunk_delay {
                    tokio::time::sleep(delay).await;
                }
                let _ = tx.send(StreamChunk::Delta(chunk)).await;
            }
            if let Some(usage) = reply.usage {
                let _ = tx.send(StreamChunk::Usage(usage)).await;
            }
            let _ = tx.send(StreamChunk::Done).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::collect_stream;

    #[tokio::test]
    async fn test_mock_streams_exact_text() {
        let provider = MockProvider::new("mock").with_reply("Hello streaming world");
        let rx = provider
            .stream_chat(&ModelConfig::new("echo"), "sys", "hi")
            .await
            .unwrap();
        let (text, usage) = collect_stream(rx, "mock").await.unwrap();
        assert_eq!(text, "Hello streaming world");
        assert_eq!(usage.unwrap().input_tokens, 100);
    }

    #[tokio::test]
    async fn test_mock_error_reply() {
        let provider =
            MockProvider::new("mock").with_mock_reply(MockReply::error("HTTP 429: rate limited"));
        let rx = provider
            .stream_chat(&ModelConfig::new("echo"), "sys", "hi")
            .await
            .unwrap();
        let err = collect_stream(rx, "mock").await.unwrap_err();
        assert_eq!(err.code(), "provider_error");
    }

    #[tokio::test]
    async fn test_mock_partial_then_error() {
        let provider = MockProvider::new("mock")
            .with_mock_reply(MockReply::partial_then_error("four", 2, "connection reset"));
        let mut rx = provider
            .stream_chat(&ModelConfig::new("echo"), "sys", "hi")
            .await
            .unwrap();

        let mut text = String::new();
        let mut saw_error = false;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::Delta(d) => text.push_str(&d),
                StreamChunk::Error(_) => saw_error = true,
                _ => {}
            }
        }
        assert_eq!(text, "fo");
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_mock_handler_keys_on_prompt() {
        let provider = MockProvider::new("mock").with_handler(|system, _user| {
            if system.contains("Optimist") {
                MockReply::text("sunny")
            } else {
                MockReply::text("cloudy")
            }
        });

        let rx = provider
            .stream_chat(&ModelConfig::new("echo"), "You are the Optimist.", "q")
            .await
            .unwrap();
        let (text, _) = collect_stream(rx, "mock").await.unwrap();
        assert_eq!(text, "sunny");
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let provider = MockProvider::new("mock").with_reply("ok");
        let _ = provider
            .stream_chat(
                &ModelConfig::new("echo").with_instance(2),
                "be nice",
                "hello",
            )
            .await
            .unwrap();
        let recorded = provider.recorded_requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].system, "be nice");
        assert_eq!(recorded[0].instance, Some(2));
    }

    #[test]
    fn test_chunking_reconstructs_exactly() {
        for text in ["four", "a b  c", " leading", "trailing ", ""] {
            assert_eq!(chunk_text(text).concat(), text);
        }
    }
}
