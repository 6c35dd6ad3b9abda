//! The gateway's RPC surface: one service per capability group.
//!
//! Groups are bound from [`SERVICE_TABLE`] at startup. Adding a group means
//! adding a factory to the table; nothing is discovered at run time.

pub mod delegated;
pub mod filesystem;
pub mod media;
pub mod package;
pub mod ping;

use std::sync::Arc;

use tracing::info;

use gdroid_core::{RegistryBuilder, Result, Service, ServiceFactory, ServiceRegistry};

use crate::context::GatewayContext;

pub use delegated::ProviderService;
pub use filesystem::FilesystemService;
pub use media::MediaStoreService;
pub use package::PackageManagerService;
pub use ping::PingService;

/// Every service group the gateway registers, in registration order.
pub const SERVICE_TABLE: &[(&str, ServiceFactory<GatewayContext>)] = &[
    ("ping", ping),
    ("package-manager", package_manager),
    ("filesystem", filesystem),
    ("network", network),
    ("device", device),
    ("control", control),
    ("media-store", MediaStoreService::from_context),
    ("sms", sms),
    ("contact", contact),
    ("call-log", call_log),
    ("phone", phone),
];

/// Bind every entry of [`SERVICE_TABLE`] against `context`.
pub fn build_registry(context: Arc<GatewayContext>) -> Result<ServiceRegistry> {
    let mut builder = RegistryBuilder::new(context);
    builder.register_all(SERVICE_TABLE)?;
    let registry = builder.build();
    info!("registered {} services", registry.bindings().len());
    Ok(registry)
}

// ── Factories ────────────────────────────────────────────────────

fn ping(_: &Arc<GatewayContext>) -> Arc<dyn Service> {
    Arc::new(PingService)
}

fn filesystem(_: &Arc<GatewayContext>) -> Arc<dyn Service> {
    Arc::new(FilesystemService)
}

fn package_manager(ctx: &Arc<GatewayContext>) -> Arc<dyn Service> {
    Arc::new(PackageManagerService::new(Arc::clone(ctx)))
}

macro_rules! provider_factory {
    ($($name:ident => $group:literal, $methods:path;)+) => {
        $(
            fn $name(ctx: &Arc<GatewayContext>) -> Arc<dyn Service> {
                Arc::new(ProviderService::new($group, $methods, Arc::clone(ctx)))
            }
        )+
    };
}

provider_factory! {
    network => "network", delegated::NETWORK_METHODS;
    device => "device", delegated::DEVICE_METHODS;
    control => "control", delegated::CONTROL_METHODS;
    sms => "sms", delegated::SMS_METHODS;
    contact => "contact", delegated::CONTACT_METHODS;
    call_log => "call-log", delegated::CALL_LOG_METHODS;
    phone => "phone", delegated::PHONE_METHODS;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use gdroid_core::MethodKind;
    use tokio_util::sync::CancellationToken;

    fn registry() -> ServiceRegistry {
        let ctx = GatewayContext::new(GatewayConfig::default(), CancellationToken::new());
        build_registry(Arc::new(ctx)).unwrap()
    }

    #[test]
    fn every_group_is_bound_once() {
        let registry = registry();
        let names: Vec<_> = registry.bindings().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "ping",
                "package-manager",
                "filesystem",
                "network",
                "device",
                "control",
                "media-store",
                "sms",
                "contact",
                "call-log",
                "phone"
            ]
        );
    }

    #[test]
    fn streaming_methods_are_declared() {
        let registry = registry();
        let pm = registry.lookup("package-manager").unwrap();
        assert_eq!(pm.method("install").unwrap().kind, MethodKind::ClientStreaming);
        assert_eq!(pm.method("uninstall").unwrap().kind, MethodKind::Unary);

        let fs = registry.lookup("filesystem").unwrap();
        assert_eq!(fs.method("download").unwrap().kind, MethodKind::ServerStreaming);
        assert!(registry.lookup("camera").is_err());
    }

    #[test]
    fn registering_the_table_twice_fails() {
        let ctx = GatewayContext::new(GatewayConfig::default(), CancellationToken::new());
        let mut builder = RegistryBuilder::new(Arc::new(ctx));
        builder.register_all(SERVICE_TABLE).unwrap();
        assert!(builder.register_all(SERVICE_TABLE).is_err());
        assert_eq!(builder.len(), SERVICE_TABLE.len());
    }
}
