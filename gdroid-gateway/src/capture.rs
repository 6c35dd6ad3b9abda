//! Frame producers feeding the capture pipeline.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gdroid_core::pipeline::PixelFormat;
use gdroid_core::{BroadcastChannel, FrameProducer, GatewayError, RawFrame, Result};

use crate::config::ScreenConfig;

/// Something that can be asked for the current screen contents.
/// `next_frame` may block; it is called on a blocking worker thread.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<RawFrame>;
}

/// Build the source named by `screen.source`. `"none"` yields no source.
pub fn source_from_config(screen: &ScreenConfig) -> Result<Option<Box<dyn FrameSource>>> {
    match screen.source.as_str() {
        "test-pattern" => Ok(Some(Box::new(TestPattern::new(screen.width, screen.height)))),
        "none" => Ok(None),
        other => Err(GatewayError::Configuration(format!(
            "unknown capture source {other:?}"
        ))),
    }
}

// ── TestPattern ──────────────────────────────────────────────────

/// Synthetic RGB frames: colour bars with a bar sweeping down the screen.
pub struct TestPattern {
    width: u32,
    height: u32,
    tick: u32,
}

impl TestPattern {
    const BARS: [[u8; 3]; 7] = [
        [192, 192, 192],
        [192, 192, 0],
        [0, 192, 192],
        [0, 192, 0],
        [192, 0, 192],
        [192, 0, 0],
        [0, 0, 192],
    ];

    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            tick: 0,
        }
    }
}

impl FrameSource for TestPattern {
    fn next_frame(&mut self) -> Result<RawFrame> {
        let (w, h) = (self.width as usize, self.height as usize);
        let sweep = (self.tick as usize * 8) % h;
        self.tick = self.tick.wrapping_add(1);

        let bars: Vec<u8> = (0..w)
            .flat_map(|x| Self::BARS[x * Self::BARS.len() / w])
            .collect();
        let white = vec![255u8; w * 3];

        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            let on_sweep = y >= sweep && y < sweep + 8;
            data.extend_from_slice(if on_sweep { &white[..] } else { &bars[..] });
        }
        Ok(RawFrame::packed(self.width, self.height, PixelFormat::Rgb8, data))
    }
}

// ── Capture loop ─────────────────────────────────────────────────

/// Offer a frame from `source` every `interval` while at least one viewer
/// is connected, until `token` is cancelled or the pipeline goes away.
/// Returns the number of frames offered.
pub async fn run_capture(
    mut source: Box<dyn FrameSource>,
    producer: FrameProducer,
    interval: Duration,
    viewers: BroadcastChannel,
    token: CancellationToken,
) -> u64 {
    info!("capture started ({:?} per frame)", interval);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut offered = 0u64;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if producer.is_closed() {
            debug!("pipeline closed; stopping capture");
            break;
        }
        if !viewers.is_connected() {
            continue;
        }

        let captured = tokio::task::spawn_blocking(move || {
            let frame = source.next_frame();
            (source, frame)
        })
        .await;
        let frame = match captured {
            Ok((returned, frame)) => {
                source = returned;
                frame
            }
            Err(e) => {
                warn!("capture source panicked: {e}");
                break;
            }
        };
        match frame {
            Ok(frame) => {
                producer.offer(frame);
                offered += 1;
            }
            Err(e) => warn!("capture failed: {e}"),
        }
    }

    info!(
        offered,
        dropped_busy = producer.dropped_busy(),
        "capture stopped"
    );
    offered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use gdroid_core::{CapturePipeline, JpegFrameEncoder, TokenBucket};

    struct Counting(Arc<AtomicU64>);

    impl FrameSource for Counting {
        fn next_frame(&mut self) -> Result<RawFrame> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(RawFrame::packed(2, 2, PixelFormat::Rgb8, vec![0; 12]))
        }
    }

    /// Run capture for a short while and report (frames offered, source calls).
    async fn capture_for(viewers: &BroadcastChannel, run: Duration) -> (u64, u64) {
        let token = CancellationToken::new();
        let (producer, pipeline) = CapturePipeline::spawn(
            Arc::new(TokenBucket::new(30, 15)),
            Box::new(JpegFrameEncoder::default()),
            viewers.clone(),
            token.clone(),
        );
        let calls = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(run_capture(
            Box::new(Counting(Arc::clone(&calls))),
            producer,
            Duration::from_millis(5),
            viewers.clone(),
            token.clone(),
        ));

        tokio::time::sleep(run).await;
        token.cancel();
        let offered = task.await.unwrap();
        pipeline.join().await.unwrap();
        (offered, calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn idle_capture_produces_nothing() {
        let viewers = BroadcastChannel::new();
        let (offered, calls) = capture_for(&viewers, Duration::from_millis(80)).await;
        assert_eq!(offered, 0);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn capture_runs_while_a_viewer_is_connected() {
        let viewers = BroadcastChannel::new();
        let _viewer = viewers.on_client_connect();
        let (offered, calls) = capture_for(&viewers, Duration::from_millis(80)).await;
        assert!(offered > 0);
        assert_eq!(offered, calls);
    }

    #[test]
    fn test_pattern_fills_the_frame() {
        let mut source = TestPattern::new(70, 20);
        let frame = source.next_frame().unwrap();
        assert_eq!(frame.data.len(), 70 * 20 * 3);
        // The sweep starts on row 0, the bars show below it.
        assert_eq!(&frame.data[..3], &[255, 255, 255]);
        let row = 10 * 70 * 3;
        assert_eq!(&frame.data[row..row + 3], &TestPattern::BARS[0]);
        assert!(frame.to_rgb_image().is_ok());
    }

    #[test]
    fn unknown_source_is_a_configuration_error() {
        let mut screen = ScreenConfig::default();
        screen.source = "camera".into();
        assert!(matches!(
            source_from_config(&screen),
            Err(GatewayError::Configuration(_))
        ));
        screen.source = "none".into();
        assert!(source_from_config(&screen).unwrap().is_none());
    }
}
