//! `media-store` service: files under the configured media root.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use gdroid_core::protocol::{ListDirRequest, OperationStatus, PathRequest};
use gdroid_core::{CallContext, MethodDescriptor, Result, Service};

use super::filesystem::{list_dir, missing, send_file};
use crate::context::{GatewayContext, resolve_under};

const METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::unary("list"),
    MethodDescriptor::server_streaming("download"),
    MethodDescriptor::unary("delete"),
];

pub struct MediaStoreService {
    root: PathBuf,
}

impl MediaStoreService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_context(ctx: &Arc<GatewayContext>) -> Arc<dyn Service> {
        Arc::new(Self::new(ctx.media_root()))
    }
}

#[async_trait]
impl Service for MediaStoreService {
    fn methods(&self) -> &'static [MethodDescriptor] {
        METHODS
    }

    async fn call(&self, ctx: &mut CallContext) -> Result<()> {
        match ctx.method() {
            "list" => {
                let req = ListDirRequest::from_bytes(ctx.request())?;
                let dir = resolve_under(&self.root, &req.path)?;
                let listing = list_dir(&dir, req.include_hidden).await?;
                ctx.reply(listing.to_bytes()?).await
            }
            "download" => {
                let req = PathRequest::from_bytes(ctx.request())?;
                let path = resolve_under(&self.root, &req.path)?;
                send_file(ctx, &path).await
            }
            "delete" => {
                let req = PathRequest::from_bytes(ctx.request())?;
                let path = resolve_under(&self.root, &req.path)?;
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| missing(e, &path))?;
                info!("media deleted: {}", path.display());
                let status = OperationStatus::ok(format!("deleted {}", req.path));
                ctx.reply(status.to_bytes()?).await
            }
            _ => Err(ctx.unknown_method()),
        }
    }
}
