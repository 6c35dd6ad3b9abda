use async_trait::async_trait;

use gdroid_core::{CallContext, MethodDescriptor, Result, Service};

pub const PONG: &[u8] = b"pong";

/// Liveness check.
#[derive(Debug, Default)]
pub struct PingService;

#[async_trait]
impl Service for PingService {
    fn methods(&self) -> &'static [MethodDescriptor] {
        const METHODS: &[MethodDescriptor] = &[MethodDescriptor::unary("ping")];
        METHODS
    }

    async fn call(&self, ctx: &mut CallContext) -> Result<()> {
        match ctx.method() {
            "ping" => ctx.reply(PONG).await,
            _ => Err(ctx.unknown_method()),
        }
    }
}
