//! Capture-to-broadcast pipeline.
//!
//! ```text
//! producer ──offer──► [depth 1] ──► consumer thread
//!                                     1. skip while no viewer is connected
//!                                     2. limiter.allow()
//!                                     3. encoder.encode()
//!                                     4. channel.publish()
//! ```
//!
//! The hand-off never blocks the producer: a frame offered while the
//! consumer is still busy with the previous one is dropped. Rejections by
//! the limiter and encoder failures drop the frame as well; none of these
//! are errors.

pub mod encoder;
pub mod frame;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broadcast::BroadcastChannel;
use crate::error::{GatewayError, Result};
use crate::limiter::Limiter;

pub use encoder::{DEFAULT_QUALITY, DEFAULT_SCALE, FrameEncoder, JpegFrameEncoder};
pub use frame::{PixelFormat, RawFrame};

/// Counters reported by the consumer when the pipeline stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames taken off the hand-off.
    pub received: u64,
    /// Dropped because no viewer was connected.
    pub skipped_idle: u64,
    /// Rejected by the limiter.
    pub rate_limited: u64,
    /// Dropped after an encoder error.
    pub encode_failed: u64,
    /// Encoded and handed to the broadcast channel.
    pub published: u64,
}

// ── FrameProducer ────────────────────────────────────────────────

/// Producer side of the pipeline. Dropping every producer stops it.
#[derive(Clone)]
pub struct FrameProducer {
    tx: mpsc::Sender<RawFrame>,
    dropped_busy: Arc<AtomicU64>,
}

impl FrameProducer {
    /// Hand a frame to the consumer without waiting. Returns false if the
    /// frame was dropped (consumer busy or stopped).
    pub fn offer(&self, frame: RawFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped_busy.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Hand a frame to the consumer, waiting for the slot to free up.
    pub async fn submit(&self, frame: RawFrame) -> Result<()> {
        self.tx.send(frame).await?;
        Ok(())
    }

    /// Frames dropped by [`offer`](Self::offer) because the consumer was busy.
    pub fn dropped_busy(&self) -> u64 {
        self.dropped_busy.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ── CapturePipeline ──────────────────────────────────────────────

/// Handle to the running consumer.
pub struct CapturePipeline {
    handle: JoinHandle<PipelineStats>,
}

impl CapturePipeline {
    /// Start the consumer on a blocking worker thread.
    pub fn spawn(
        limiter: Arc<dyn Limiter>,
        mut encoder: Box<dyn FrameEncoder>,
        channel: BroadcastChannel,
        shutdown: CancellationToken,
    ) -> (FrameProducer, CapturePipeline) {
        let (tx, mut rx) = mpsc::channel::<RawFrame>(1);

        let handle = tokio::task::spawn_blocking(move || {
            let mut stats = PipelineStats::default();
            while let Some(frame) = rx.blocking_recv() {
                if shutdown.is_cancelled() {
                    break;
                }
                stats.received += 1;
                process(&frame, &*limiter, encoder.as_mut(), &channel, &mut stats);
            }
            debug!(?stats, "capture pipeline stopped");
            stats
        });

        let producer = FrameProducer {
            tx,
            dropped_busy: Arc::new(AtomicU64::new(0)),
        };
        (producer, CapturePipeline { handle })
    }

    /// Wait for the consumer to exit and collect its counters.
    pub async fn join(self) -> Result<PipelineStats> {
        self.handle
            .await
            .map_err(|e| GatewayError::Other(format!("capture consumer failed: {e}")))
    }
}

fn process(
    frame: &RawFrame,
    limiter: &dyn Limiter,
    encoder: &mut dyn FrameEncoder,
    channel: &BroadcastChannel,
    stats: &mut PipelineStats,
) {
    if !channel.is_connected() {
        stats.skipped_idle += 1;
        return;
    }
    if !limiter.allow() {
        stats.rate_limited += 1;
        return;
    }
    match encoder.encode(frame) {
        Ok(bytes) => {
            channel.publish(bytes);
            stats.published += 1;
        }
        Err(e) => {
            warn!("frame dropped: {e}");
            stats.encode_failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::PushMessage;
    use crate::limiter::TokenBucket;
    use bytes::Bytes;

    struct Tagging;

    impl FrameEncoder for Tagging {
        fn encode(&mut self, frame: &RawFrame) -> Result<Bytes> {
            if frame.width == 0 {
                return Err(GatewayError::Encoding("zero width".into()));
            }
            Ok(Bytes::from(vec![frame.width as u8]))
        }
    }

    fn frame(width: u32) -> RawFrame {
        RawFrame::packed(width, 1, PixelFormat::Rgb8, vec![0; width as usize * 3])
    }

    #[tokio::test]
    async fn idle_frames_are_skipped_before_the_limiter() {
        let limiter = Arc::new(TokenBucket::new(1, 0));
        let channel = BroadcastChannel::new();
        let (producer, pipeline) = CapturePipeline::spawn(
            limiter.clone(),
            Box::new(Tagging),
            channel,
            CancellationToken::new(),
        );
        for w in 1..=3 {
            producer.submit(frame(w)).await.unwrap();
        }
        drop(producer);

        let stats = pipeline.join().await.unwrap();
        assert_eq!(stats.skipped_idle, 3);
        assert_eq!(stats.published, 0);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn limiter_caps_published_frames() {
        let channel = BroadcastChannel::with_queue_depth(8);
        let mut viewer = channel.on_client_connect();
        let (producer, pipeline) = CapturePipeline::spawn(
            Arc::new(TokenBucket::new(2, 0)),
            Box::new(Tagging),
            channel.clone(),
            CancellationToken::new(),
        );
        for w in 1..=5 {
            producer.submit(frame(w)).await.unwrap();
        }
        drop(producer);

        let stats = pipeline.join().await.unwrap();
        assert_eq!(stats.received, 5);
        assert_eq!(stats.published, 2);
        assert_eq!(stats.rate_limited, 3);

        assert_eq!(viewer.recv().await, Some(PushMessage::Ack));
        assert_eq!(viewer.recv().await, Some(PushMessage::Frame(Bytes::from(vec![1]))));
        assert_eq!(viewer.recv().await, Some(PushMessage::Frame(Bytes::from(vec![2]))));
    }

    #[tokio::test]
    async fn encoder_errors_drop_the_frame() {
        let channel = BroadcastChannel::new();
        let _viewer = channel.on_client_connect();
        let (producer, pipeline) = CapturePipeline::spawn(
            Arc::new(TokenBucket::new(10, 0)),
            Box::new(Tagging),
            channel,
            CancellationToken::new(),
        );
        producer.submit(frame(0)).await.unwrap();
        producer.submit(frame(4)).await.unwrap();
        drop(producer);

        let stats = pipeline.join().await.unwrap();
        assert_eq!(stats.encode_failed, 1);
        assert_eq!(stats.published, 1);
    }

    #[test]
    fn offer_drops_when_slot_is_taken() {
        let (tx, rx) = mpsc::channel(1);
        let producer = FrameProducer {
            tx,
            dropped_busy: Arc::default(),
        };
        assert!(producer.offer(frame(1)));
        assert!(!producer.offer(frame(2)));
        assert_eq!(producer.dropped_busy(), 1);

        drop(rx);
        assert!(!producer.offer(frame(3)));
        assert!(producer.is_closed());
        assert_eq!(producer.dropped_busy(), 1);
    }
}
