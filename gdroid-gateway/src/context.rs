//! Shared state handed to every service factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use gdroid_core::{BroadcastChannel, InstallBackend, Result, task::with_deadline};

use crate::config::GatewayConfig;
use crate::install::StagingInstaller;
use crate::provider::{CapabilityProvider, HostProvider};

pub struct GatewayContext {
    config: GatewayConfig,
    installer: Arc<dyn InstallBackend>,
    provider: Arc<dyn CapabilityProvider>,
    broadcast: BroadcastChannel,
    shutdown: CancellationToken,
}

impl GatewayContext {
    /// Context with the host provider and a staging-directory installer.
    pub fn new(config: GatewayConfig, shutdown: CancellationToken) -> Self {
        let installer = Arc::new(StagingInstaller::new(
            config.storage.staging_dir.clone(),
            config.storage.install_dir.clone(),
        ));
        let broadcast = BroadcastChannel::with_queue_depth(config.screen.client_queue_depth);
        Self {
            config,
            installer,
            provider: Arc::new(HostProvider),
            broadcast,
            shutdown,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn InstallBackend>) -> Self {
        self.installer = installer;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn installer(&self) -> Arc<dyn InstallBackend> {
        Arc::clone(&self.installer)
    }

    pub fn provider(&self) -> Arc<dyn CapabilityProvider> {
        Arc::clone(&self.provider)
    }

    pub fn media_root(&self) -> &Path {
        &self.config.storage.media_root
    }

    pub fn broadcast(&self) -> &BroadcastChannel {
        &self.broadcast
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn provider_timeout(&self) -> Duration {
        self.config.provider_timeout()
    }

    /// Invoke the provider, bounded by the configured timeout and the
    /// gateway shutdown.
    pub async fn invoke_provider(&self, group: &str, method: &str, params: Value) -> Result<Value> {
        let provider = self.provider();
        with_deadline(
            self.provider_timeout(),
            &self.shutdown,
            provider.invoke(group, method, params),
        )
        .await
    }
}

/// Resolve a client path against `root`, refusing anything that would
/// escape it.
pub fn resolve_under(root: &Path, requested: &str) -> Result<PathBuf> {
    use std::path::Component;

    let mut resolved = root.to_path_buf();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(gdroid_core::GatewayError::protocol(format!(
                    "path {requested:?} leaves the media root"
                )));
            }
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gdroid_core::GatewayError;

    struct Slow;

    #[async_trait]
    impl CapabilityProvider for Slow {
        async fn invoke(&self, _: &str, _: &str, _: Value) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn provider_calls_are_bounded() {
        let mut config = GatewayConfig::default();
        config.providers.timeout_ms = 20;
        let ctx = GatewayContext::new(config, CancellationToken::new()).with_provider(Arc::new(Slow));
        let err = ctx.invoke_provider("sms", "all", Value::Null).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));
    }

    #[test]
    fn resolve_under_rejects_parent_components() {
        let root = Path::new("/srv/media");
        assert_eq!(
            resolve_under(root, "/DCIM/a.jpg").unwrap(),
            PathBuf::from("/srv/media/DCIM/a.jpg")
        );
        assert_eq!(resolve_under(root, "").unwrap(), PathBuf::from("/srv/media"));
        assert!(resolve_under(root, "../etc/passwd").is_err());
    }
}
