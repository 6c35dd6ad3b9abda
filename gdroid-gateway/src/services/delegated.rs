//! Capability groups answered entirely by the provider: JSON parameters in,
//! JSON result out.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use gdroid_core::protocol::JsonPayload;
use gdroid_core::{CallContext, MethodDescriptor, Result, Service};

use crate::context::GatewayContext;

pub const NETWORK_METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::unary("info"),
    MethodDescriptor::unary("wifi"),
    MethodDescriptor::unary("connectivity"),
    MethodDescriptor::unary("active"),
    MethodDescriptor::unary("public"),
    MethodDescriptor::unary("scan-wifi"),
    MethodDescriptor::unary("hostname"),
];

pub const DEVICE_METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::unary("info"),
    MethodDescriptor::unary("system"),
    MethodDescriptor::unary("battery"),
    MethodDescriptor::unary("location"),
    MethodDescriptor::unary("display"),
    MethodDescriptor::unary("memory"),
    MethodDescriptor::unary("storage"),
    MethodDescriptor::unary("gpu"),
    MethodDescriptor::unary("cpu"),
];

pub const CONTROL_METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::unary("get-brightness"),
    MethodDescriptor::unary("set-brightness"),
    MethodDescriptor::unary("get-brightness-mode"),
    MethodDescriptor::unary("set-brightness-mode"),
    MethodDescriptor::unary("get-clipboard"),
    MethodDescriptor::unary("set-clipboard"),
    MethodDescriptor::unary("get-volume"),
    MethodDescriptor::unary("set-volume"),
    MethodDescriptor::unary("increase-volume"),
    MethodDescriptor::unary("decrease-volume"),
    MethodDescriptor::unary("start-screen-capture"),
    MethodDescriptor::unary("stop-screen-capture"),
];

pub const SMS_METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::unary("all"),
    MethodDescriptor::unary("get"),
    MethodDescriptor::unary("send"),
    MethodDescriptor::unary("delete"),
];

pub const CONTACT_METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::unary("all"),
    MethodDescriptor::unary("get"),
    MethodDescriptor::unary("add"),
    MethodDescriptor::unary("delete"),
];

pub const CALL_LOG_METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::unary("all"),
    MethodDescriptor::unary("get"),
    MethodDescriptor::unary("delete"),
];

pub const PHONE_METHODS: &[MethodDescriptor] = &[
    MethodDescriptor::unary("dial"),
    MethodDescriptor::unary("call"),
];

/// A capability group whose every method is forwarded to the provider.
pub struct ProviderService {
    group: &'static str,
    methods: &'static [MethodDescriptor],
    context: Arc<GatewayContext>,
}

impl ProviderService {
    pub fn new(
        group: &'static str,
        methods: &'static [MethodDescriptor],
        context: Arc<GatewayContext>,
    ) -> Self {
        Self {
            group,
            methods,
            context,
        }
    }

    pub fn group(&self) -> &'static str {
        self.group
    }
}

#[async_trait]
impl Service for ProviderService {
    fn methods(&self) -> &'static [MethodDescriptor] {
        self.methods
    }

    async fn call(&self, ctx: &mut CallContext) -> Result<()> {
        forward(&self.context, self.group, ctx).await
    }
}

/// Answer `ctx` from the provider as `group.<method>`.
///
/// An empty request body means "no parameters" and reaches the provider as
/// `null`.
pub(crate) async fn forward(context: &GatewayContext, group: &str, ctx: &mut CallContext) -> Result<()> {
    let params = if ctx.request().is_empty() {
        Value::Null
    } else {
        JsonPayload::from_bytes(ctx.request())?.to_value()?
    };
    debug!("provider call {group}.{}", ctx.method());
    let result = context.invoke_provider(group, ctx.method(), params).await?;
    ctx.reply(JsonPayload::from_value(&result)?.to_bytes()?).await
}
