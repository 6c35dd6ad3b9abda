//! Capability providers: the collaborators that actually answer device,
//! network, messaging and control queries.
//!
//! A provider takes JSON parameters and returns a JSON result. The gateway
//! bounds every invocation with the configured timeout.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use gdroid_core::{GatewayError, Result};

#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Answer `group.method` with `params`.
    async fn invoke(&self, group: &str, method: &str, params: Value) -> Result<Value>;
}

/// Error returned for methods no provider implements.
pub fn no_provider(group: &str, method: &str) -> GatewayError {
    GatewayError::not_found(format!("no provider for {group}.{method}"))
}

// ── HostProvider ─────────────────────────────────────────────────

/// Answers the few queries the host machine itself can serve.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProvider;

#[async_trait]
impl CapabilityProvider for HostProvider {
    async fn invoke(&self, group: &str, method: &str, _params: Value) -> Result<Value> {
        debug!("host provider: {group}.{method}");
        match (group, method) {
            ("device", "info") => Ok(json!({
                "os": std::env::consts::OS,
                "family": std::env::consts::FAMILY,
                "arch": std::env::consts::ARCH,
                "cpus": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            })),
            ("device", "system") => Ok(json!({
                "gateway": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "pid": std::process::id(),
            })),
            ("network", "hostname") => Ok(json!({ "hostname": hostname().await })),
            _ => Err(no_provider(group, method)),
        }
    }
}

async fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    match tokio::fs::read_to_string("/etc/hostname").await {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => "localhost".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn host_answers_device_info() {
        let info = HostProvider.invoke("device", "info", Value::Null).await.unwrap();
        assert_eq!(info["os"], std::env::consts::OS);
        assert!(info["cpus"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn host_answers_hostname() {
        let v = HostProvider.invoke("network", "hostname", Value::Null).await.unwrap();
        assert!(!v["hostname"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn everything_else_is_not_found() {
        let err = HostProvider.invoke("sms", "send", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "not found: no provider for sms.send");
    }
}
