//! Ordered playback of synthesized speech.
//!
//! A single drain task owns the queue: pop the head, normalize the payload
//! to bytes, hand it to the audio capability, and wait for playback to end
//! before touching the next item. Enqueue is the only externally safe
//! mutation. A payload that fails to normalize or decode is logged and
//! skipped; one bad item never stalls the queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::record::AudioPayload;

/// Speaker capability: decode the encoded payload and play it to completion.
/// Implementations must not return before the audio has finished.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, audio: Vec<u8>) -> Result<()>;
}

/// FIFO queue with a single active player. Singleton per client: enqueue
/// from anywhere, playback is strictly sequential.
pub struct PlaybackQueue {
    queue_tx: mpsc::UnboundedSender<AudioPayload>,
    idle_tx: Arc<watch::Sender<bool>>,
    idle_rx: watch::Receiver<bool>,
    /// Items enqueued but not yet played or skipped. Idle is published
    /// only when this reaches zero, so a wait racing with an enqueue can
    /// never observe a false idle.
    pending: Arc<AtomicUsize>,
    drain: JoinHandle<()>,
}

impl PlaybackQueue {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<AudioPayload>();
        let (idle_tx, idle_rx) = watch::channel(true);
        let idle_tx = Arc::new(idle_tx);
        let pending = Arc::new(AtomicUsize::new(0));

        let drain_idle_tx = idle_tx.clone();
        let drain_pending = pending.clone();
        let drain = tokio::spawn(async move {
            while let Some(payload) = queue_rx.recv().await {
                match payload.into_bytes() {
                    Ok(bytes) => {
                        if let Err(err) = sink.play(bytes).await {
                            tracing::warn!("skipping unplayable item: {}", err);
                        }
                    }
                    Err(err) => {
                        tracing::warn!("skipping undecodable item: {}", err);
                    }
                }
                if drain_pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let _ = drain_idle_tx.send(true);
                }
            }
        });

        PlaybackQueue {
            queue_tx,
            idle_tx,
            idle_rx,
            pending,
            drain,
        }
    }

    /// Append a payload; if nothing is playing, draining starts immediately.
    pub fn enqueue(&self, payload: AudioPayload) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let _ = self.idle_tx.send(false);
        let _ = self.queue_tx.send(payload);
    }

    pub fn is_idle(&self) -> bool {
        *self.idle_rx.borrow()
    }

    /// Observe idle transitions; `true` means the queue has fully drained
    /// ("playback complete").
    pub fn subscribe_idle(&self) -> watch::Receiver<bool> {
        self.idle_rx.clone()
    }

    /// Wait until every enqueued item has been played (or skipped).
    pub async fn wait_idle(&self) {
        let mut rx = self.idle_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.drain.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Sink that records playback order and tracks concurrent plays.
    struct RecordingSink {
        played: Mutex<Vec<Vec<u8>>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(RecordingSink {
                played: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn play(&self, audio: Vec<u8>) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let result = if audio == b"bad" {
                Err(ClientError::Decode("unplayable".to_string()))
            } else {
                self.played.lock().unwrap().push(audio);
                Ok(())
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test]
    async fn playback_order_equals_enqueue_order_with_single_concurrency() {
        let sink = RecordingSink::new();
        let queue = PlaybackQueue::new(sink.clone());

        for i in 0u8..8 {
            queue.enqueue(AudioPayload::Bytes(vec![i]));
        }
        queue.wait_idle().await;

        let played = sink.played.lock().unwrap().clone();
        assert_eq!(played, (0u8..8).map(|i| vec![i]).collect::<Vec<_>>());
        assert_eq!(sink.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn decode_failure_skips_to_the_next_item() {
        let sink = RecordingSink::new();
        let queue = PlaybackQueue::new(sink.clone());

        queue.enqueue(AudioPayload::Bytes(b"one".to_vec()));
        queue.enqueue(AudioPayload::Base64("***".to_string())); // normalization fails
        queue.enqueue(AudioPayload::Bytes(b"bad".to_vec())); // sink decode fails
        queue.enqueue(AudioPayload::Bytes(b"two".to_vec()));
        queue.wait_idle().await;

        let played = sink.played.lock().unwrap().clone();
        assert_eq!(played, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn empty_queue_reports_idle() {
        let sink = RecordingSink::new();
        let queue = PlaybackQueue::new(sink);
        assert!(queue.is_idle());
        queue.wait_idle().await;
    }

    #[tokio::test]
    async fn base64_payloads_are_normalized_before_the_sink() {
        use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

        let sink = RecordingSink::new();
        let queue = PlaybackQueue::new(sink.clone());
        queue.enqueue(AudioPayload::Base64(BASE64.encode(b"pcm")));
        queue.wait_idle().await;

        let played = sink.played.lock().unwrap().clone();
        assert_eq!(played, vec![b"pcm".to_vec()]);
    }
}
