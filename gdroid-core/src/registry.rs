//! Name → service bindings, built once at startup.
//!
//! [`RegistryBuilder`] constructs each handler from a factory function and
//! the shared context. [`RegistryBuilder::build`] freezes the set into a
//! [`ServiceRegistry`], which has no way to register further services and
//! can be shared across connections without locking.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{GatewayError, Result};
use crate::rpc::Service;

/// Builds a handler from the shared context. Handlers that need the
/// context at call time keep a clone of the `Arc`.
pub type ServiceFactory<C> = fn(&Arc<C>) -> Arc<dyn Service>;

/// One registered name and its handler.
#[derive(Clone)]
pub struct ServiceBinding {
    pub name: String,
    pub service: Arc<dyn Service>,
}

impl std::fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let methods: Vec<&str> = self.service.methods().iter().map(|m| m.name).collect();
        f.debug_struct("ServiceBinding")
            .field("name", &self.name)
            .field("methods", &methods)
            .finish()
    }
}

// ── RegistryBuilder ──────────────────────────────────────────────

#[derive(Debug)]
pub struct RegistryBuilder<C> {
    context: Arc<C>,
    bindings: Vec<ServiceBinding>,
    index: HashMap<String, usize>,
}

impl<C> RegistryBuilder<C> {
    pub fn new(context: Arc<C>) -> Self {
        Self {
            context,
            bindings: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Bind `name` to the handler built by `factory`.
    ///
    /// A name that is already bound keeps its first handler; the duplicate
    /// is reported as a configuration error and its factory is not run.
    pub fn register(&mut self, name: &str, factory: ServiceFactory<C>) -> Result<&mut Self> {
        if self.index.contains_key(name) {
            error!("service {name:?} registered twice");
            return Err(GatewayError::Configuration(format!(
                "duplicate service name {name:?}"
            )));
        }
        let service = factory(&self.context);
        debug!("registered service {name:?}");
        self.index.insert(name.to_string(), self.bindings.len());
        self.bindings.push(ServiceBinding {
            name: name.to_string(),
            service,
        });
        Ok(self)
    }

    /// Register every entry of a static factory table, stopping at the
    /// first duplicate.
    pub fn register_all(&mut self, table: &[(&str, ServiceFactory<C>)]) -> Result<&mut Self> {
        for (name, factory) in table {
            self.register(name, *factory)?;
        }
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Freeze the bindings.
    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry {
            bindings: self.bindings,
            index: self.index,
        }
    }
}

// ── ServiceRegistry ──────────────────────────────────────────────

/// Frozen set of service bindings.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    bindings: Vec<ServiceBinding>,
    index: HashMap<String, usize>,
}

impl ServiceRegistry {
    /// Bindings in registration order.
    pub fn bindings(&self) -> &[ServiceBinding] {
        &self.bindings
    }

    pub fn lookup(&self, name: &str) -> Result<&Arc<dyn Service>> {
        self.index
            .get(name)
            .map(|&i| &self.bindings[i].service)
            .ok_or_else(|| GatewayError::not_found(format!("service {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{CallContext, MethodDescriptor};
    use async_trait::async_trait;

    struct Echo(&'static [MethodDescriptor]);

    #[async_trait]
    impl Service for Echo {
        fn methods(&self) -> &'static [MethodDescriptor] {
            self.0
        }

        async fn call(&self, ctx: &mut CallContext) -> Result<()> {
            ctx.reply(b"echo".to_vec()).await
        }
    }

    #[derive(Debug)]
    struct Ctx;

    fn first(_: &Arc<Ctx>) -> Arc<dyn Service> {
        const METHODS: &[MethodDescriptor] = &[MethodDescriptor::unary("first")];
        Arc::new(Echo(METHODS))
    }

    fn second(_: &Arc<Ctx>) -> Arc<dyn Service> {
        const METHODS: &[MethodDescriptor] = &[MethodDescriptor::unary("second")];
        Arc::new(Echo(METHODS))
    }

    #[test]
    fn duplicate_keeps_first_binding() {
        let mut builder = RegistryBuilder::new(Arc::new(Ctx));
        builder.register("ping", first).unwrap();
        builder.register("fs", first).unwrap();
        let err = builder.register("fs", second).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));

        let registry = builder.build();
        assert_eq!(registry.bindings().len(), 2);
        let fs = registry.lookup("fs").unwrap();
        assert!(fs.method("first").is_some());
        assert!(fs.method("second").is_none());
    }

    #[test]
    fn lookup_unknown_is_not_found() {
        let registry = RegistryBuilder::new(Arc::new(Ctx)).build();
        assert!(matches!(
            registry.lookup("nope"),
            Err(GatewayError::NotFound(_))
        ));
    }

    #[test]
    fn register_all_preserves_order() {
        let mut builder = RegistryBuilder::new(Arc::new(Ctx));
        builder
            .register_all(&[("ping", first), ("fs", second), ("device", first)])
            .unwrap();
        let registry = builder.build();
        let names: Vec<&str> = registry.bindings().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["ping", "fs", "device"]);
    }
}
