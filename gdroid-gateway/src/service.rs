//! Gateway lifecycle.
//!
//! Binds the RPC and push listeners, wires the capture pipeline into the
//! broadcast channel and runs until the shutdown token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gdroid_core::{
    CapturePipeline, FixedWindowLimiter, GatewayError, JpegFrameEncoder, Limiter, Result,
    RpcServer, TokenBucket,
};

use crate::capture::{run_capture, source_from_config};
use crate::config::{GatewayConfig, LimiterConfig};
use crate::context::GatewayContext;
use crate::push::PushServer;
use crate::services::build_registry;

// ── Gateway ──────────────────────────────────────────────────────

/// The top-level gateway service.
pub struct Gateway {
    context: Arc<GatewayContext>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self::from_context(GatewayContext::new(config, CancellationToken::new()))
    }

    /// Run with a prepared context (custom provider or installer).
    pub fn from_context(context: GatewayContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.context
    }

    /// Token that stops the gateway when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.context.shutdown_token().clone()
    }

    /// Bind the configured listeners and serve until shut down.
    pub async fn run(&self) -> Result<()> {
        let config = self.context.config();
        let rpc = TcpListener::bind(config.rpc_addr()).await?;
        let push = if config.screen.enabled {
            Some(TcpListener::bind(config.push_addr()).await?)
        } else {
            None
        };
        self.serve(rpc, push).await
    }

    /// Serve on already-bound listeners. Without a push listener the
    /// capture pipeline is not started.
    pub async fn serve(&self, rpc: TcpListener, push: Option<TcpListener>) -> Result<()> {
        let token = self.shutdown_token();
        let registry = Arc::new(build_registry(Arc::clone(&self.context))?);

        let server = RpcServer::new(registry);
        let rpc_token = token.clone();
        let rpc_task = tokio::spawn(async move { server.serve(rpc, rpc_token).await });

        let screen = match push {
            Some(listener) => match self.start_screen(listener, &token) {
                Ok(screen) => Some(screen),
                Err(e) => {
                    error!("screen push failed to start: {e}");
                    token.cancel();
                    log_task("rpc server", rpc_task).await;
                    return Err(e);
                }
            },
            None => {
                info!("screen push disabled");
                None
            }
        };

        token.cancelled().await;
        info!("gateway shutting down");

        log_task("rpc server", rpc_task).await;
        if let Some(screen) = screen {
            screen.stop().await;
        }
        info!("gateway stopped");
        Ok(())
    }

    fn start_screen(&self, listener: TcpListener, token: &CancellationToken) -> Result<Screen> {
        let config = self.context.config();
        let broadcast = self.context.broadcast().clone();
        let limiter = build_limiter(&config.limiter)?;
        let source = source_from_config(&config.screen)?;

        let push = PushServer::new(broadcast.clone());
        let push_token = token.clone();
        let push_task = tokio::spawn(async move { push.serve(listener, push_token).await });

        let encoder = JpegFrameEncoder::new(config.screen.scale, config.screen.quality);
        let (producer, pipeline) =
            CapturePipeline::spawn(limiter, Box::new(encoder), broadcast.clone(), token.clone());

        let capture_task = match source {
            Some(source) => {
                let interval = config.frame_interval();
                Some(tokio::spawn(run_capture(
                    source,
                    producer,
                    interval,
                    broadcast,
                    token.clone(),
                )))
            }
            None => {
                warn!("no capture source configured; viewers will only see the handshake");
                None
            }
        };

        Ok(Screen {
            push_task,
            capture_task,
            pipeline,
        })
    }
}

/// Tasks backing the screen push.
struct Screen {
    push_task: JoinHandle<Result<()>>,
    capture_task: Option<JoinHandle<u64>>,
    pipeline: CapturePipeline,
}

impl Screen {
    async fn stop(self) {
        log_task("push server", self.push_task).await;
        if let Some(capture) = self.capture_task {
            if let Err(e) = capture.await {
                error!("capture task failed: {e}");
            }
        }
        match self.pipeline.join().await {
            Ok(stats) => info!(
                received = stats.received,
                published = stats.published,
                rate_limited = stats.rate_limited,
                "capture pipeline stopped"
            ),
            Err(e) => error!("{e}"),
        }
    }
}

async fn log_task(name: &str, task: JoinHandle<Result<()>>) {
    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("{name} failed: {e}"),
        Err(e) => error!("{name} task panicked: {e}"),
    }
}

/// Limiter selected by `limiter.kind`.
pub fn build_limiter(config: &LimiterConfig) -> Result<Arc<dyn Limiter>> {
    match config.kind.as_str() {
        "token-bucket" => Ok(Arc::new(TokenBucket::new(
            config.capacity,
            config.refill_per_sec,
        ))),
        "fixed-window" => Ok(Arc::new(FixedWindowLimiter::new(
            config.capacity,
            Duration::from_millis(config.window_ms.max(1)),
        ))),
        other => Err(GatewayError::Configuration(format!(
            "unknown limiter kind {other:?}"
        ))),
    }
}
