//! Bounded per-debate event sink.
//!
//! Multi-producer (personality tasks, the driver) / single-consumer (the
//! event mapper). Token enqueue never blocks: when the consumer falls
//! behind, the oldest chunks are coalesced with the next chunk from the
//! same personality. Markers and state deltas must not be dropped, so
//! they use a blocking send bounded by the stall deadline; a consumer
//! that stalls past it gets the debate cancelled.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use agora_core::{AgoraError, Result};

use crate::event::{EngineEvent, Marker, StateDelta};

pub const DEFAULT_SINK_CAPACITY: usize = 1024;
pub const DEFAULT_STALL_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<EngineEvent>,
    /// Coalesced token text awaiting a free slot, per personality.
    pending: Arc<Mutex<HashMap<String, String>>>,
    stall_deadline: Duration,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn channel(
        capacity: usize,
        stall_deadline: Duration,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                pending: Arc::new(Mutex::new(HashMap::new())),
                stall_deadline,
                cancel,
            },
            rx,
        )
    }

    pub fn with_defaults(cancel: CancellationToken) -> (Self, mpsc::Receiver<EngineEvent>) {
        Self::channel(DEFAULT_SINK_CAPACITY, DEFAULT_STALL_DEADLINE, cancel)
    }

    /// Enqueue a token without blocking. A full queue coalesces the chunk
    /// into the pending buffer for its personality; the combined text goes
    /// out with the next successful send.
    pub fn token(&self, personality: &str, delta: &str) {
        let payload = {
            let mut pending = self.pending.lock();
            match pending.remove(personality) {
                Some(mut held) => {
                    held.push_str(delta);
                    held
                }
                None => delta.to_string(),
            }
        };

        let event = EngineEvent::Token {
            personality: personality.to_string(),
            delta: payload,
        };
        if let Err(mpsc::error::TrySendError::Full(EngineEvent::Token { delta, .. })) =
            self.tx.try_send(event)
        {
            self.pending
                .lock()
                .entry(personality.to_string())
                .or_default()
                .push_str(&delta);
        }
    }

    /// Send a lifecycle marker. Any coalesced tokens flush first so the
    /// marker cannot overtake content. Stalling past the deadline cancels
    /// the debate.
    pub async fn marker(&self, marker: Marker) -> Result<()> {
        self.flush_pending().await?;
        self.send_blocking(EngineEvent::Marker(marker)).await
    }

    /// Send a state delta; same delivery guarantees as markers.
    pub async fn state(&self, delta: StateDelta) -> Result<()> {
        self.flush_pending().await?;
        self.send_blocking(EngineEvent::State(delta)).await
    }

    async fn flush_pending(&self) -> Result<()> {
        loop {
            let entry = {
                let mut pending = self.pending.lock();
                let key = pending.keys().next().cloned();
                key.map(|k| (k.clone(), pending.remove(&k).unwrap_or_default()))
            };
            let Some((personality, delta)) = entry else {
                return Ok(());
            };
            self.send_blocking(EngineEvent::Token { personality, delta })
                .await?;
        }
    }

    async fn send_blocking(&self, event: EngineEvent) -> Result<()> {
        match tokio::time::timeout(self.stall_deadline, self.tx.send(event)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                // Consumer hung up (client disconnect); treat as cancellation.
                self.cancel.cancel();
                Err(AgoraError::Cancelled)
            }
            Err(_) => {
                warn!("event consumer stalled past deadline, cancelling debate");
                self.cancel.cancel();
                Err(AgoraError::Cancelled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(capacity: usize) -> (EventSink, mpsc::Receiver<EngineEvent>) {
        EventSink::channel(
            capacity,
            Duration::from_millis(200),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_tokens_flow_through() {
        let (sink, mut rx) = sink(8);
        sink.token("a", "hel");
        sink.token("a", "lo");

        let mut text = String::new();
        for _ in 0..2 {
            if let Some(EngineEvent::Token { delta, .. }) = rx.recv().await {
                text.push_str(&delta);
            }
        }
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_full_queue_coalesces_per_personality() {
        let (sink, mut rx) = sink(1);
        sink.token("a", "1");
        // Queue full: these coalesce into pending.
        sink.token("a", "2");
        sink.token("a", "3");
        sink.token("b", "x");

        // Drain the first token, then flush via a marker.
        let first = rx.recv().await.unwrap();
        match first {
            EngineEvent::Token { delta, .. } => assert_eq!(delta, "1"),
            other => panic!("unexpected event {other:?}"),
        }

        let flusher = tokio::spawn({
            let sink = sink.clone();
            async move {
                sink.marker(Marker::SynthesisStarted).await.unwrap();
            }
        });

        let mut seen: HashMap<String, String> = HashMap::new();
        let mut got_marker = false;
        while !got_marker {
            match rx.recv().await.unwrap() {
                EngineEvent::Token { personality, delta } => {
                    seen.entry(personality).or_default().push_str(&delta);
                }
                EngineEvent::Marker(_) => got_marker = true,
                other => panic!("unexpected event {other:?}"),
            }
        }
        flusher.await.unwrap();

        // Coalesced chunks concatenate in emission order.
        assert_eq!(seen.get("a").map(String::as_str), Some("23"));
        assert_eq!(seen.get("b").map(String::as_str), Some("x"));
    }

    #[tokio::test]
    async fn test_stalled_consumer_cancels_debate() {
        let cancel = CancellationToken::new();
        let (sink, _rx) =
            EventSink::channel(1, Duration::from_millis(50), cancel.clone());

        // Fill the queue, then a marker send must time out.
        sink.token("a", "fill");
        let err = sink.marker(Marker::SynthesisStarted).await.unwrap_err();
        assert_eq!(err.code(), "cancelled");
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_consumer_cancels_debate() {
        let cancel = CancellationToken::new();
        let (sink, rx) = EventSink::channel(4, Duration::from_millis(50), cancel.clone());
        drop(rx);

        let err = sink.marker(Marker::SynthesisStarted).await.unwrap_err();
        assert_eq!(err.code(), "cancelled");
        assert!(cancel.is_cancelled());
    }
}
