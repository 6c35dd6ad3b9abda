//! `package-manager` service. Installs stream into the install backend;
//! every query goes to the capability provider.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use gdroid_core::protocol::UploadReceipt;
use gdroid_core::{CallContext, MethodDescriptor, Result, Service, UploadSession};

use super::delegated::forward;
use crate::context::GatewayContext;

const METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::client_streaming("install"),
    MethodDescriptor::unary("all-packages"),
    MethodDescriptor::unary("user-packages"),
    MethodDescriptor::unary("system-packages"),
    MethodDescriptor::unary("package"),
    MethodDescriptor::unary("application"),
    MethodDescriptor::unary("app-size"),
    MethodDescriptor::unary("permissions"),
    MethodDescriptor::unary("activities"),
    MethodDescriptor::unary("services"),
    MethodDescriptor::unary("receivers"),
    MethodDescriptor::unary("providers"),
    MethodDescriptor::unary("shared-libs"),
    MethodDescriptor::unary("get-icon"),
    MethodDescriptor::unary("uninstall"),
];

pub struct PackageManagerService {
    context: Arc<GatewayContext>,
}

impl PackageManagerService {
    pub fn new(context: Arc<GatewayContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Service for PackageManagerService {
    fn methods(&self) -> &'static [MethodDescriptor] {
        METHODS
    }

    async fn call(&self, ctx: &mut CallContext) -> Result<()> {
        if ctx.method() != "install" {
            return forward(&self.context, "package-manager", ctx).await;
        }

        let session = UploadSession::install(self.context.installer());
        let outcome = session.consume(ctx.inbound()).await?;
        info!(
            bytes = outcome.bytes_written,
            chunks = outcome.chunks,
            "package install committed"
        );
        let receipt = UploadReceipt {
            path: outcome.destination.map(|p| p.display().to_string()),
            bytes_written: outcome.bytes_written,
        };
        ctx.reply(receipt.to_bytes()?).await
    }
}
