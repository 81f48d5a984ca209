// Symmetric name exchange over a single endpoint.
// Each side publishes values under names and looks up the names the other
// side published; a lookup waits until the name appears.

use super::exposer::Exposure;
use super::proxy::Proxy;
use crate::config::Config;
use crate::endpoint::Port;
use crate::{RpcError, RpcTarget, Value};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// How a published value is presented to the peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Methods the peer calls fire-and-forget, without waiting for a reply.
    pub void: Vec<String>,
}

impl PublishOptions {
    pub fn void<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.void.extend(methods.into_iter().map(Into::into));
        self
    }
}

#[derive(Clone)]
struct Published {
    value: Value,
    options: PublishOptions,
}

#[derive(Default)]
struct Names {
    entries: DashMap<String, Published>,
    changed: Notify,
}

impl Names {
    async fn wait_for(&self, name: &str) -> Published {
        loop {
            let notified = self.changed.notified();
            if let Some(published) = self.entries.get(name).map(|entry| entry.value().clone()) {
                return published;
            }
            notified.await;
        }
    }
}

fn name_arg<'a>(method: &str, args: &'a [Value]) -> Result<&'a str, RpcError> {
    args.first()
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::bad_request(format!("{} expects a name", method)))
}

impl fmt::Debug for Names {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Names({})", self.entries.len())
    }
}

#[async_trait]
impl RpcTarget for Names {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        match method {
            "lookup" => Ok(self.wait_for(name_arg(method, &args)?).await.value),
            "voidMethods" => {
                let published = self.wait_for(name_arg(method, &args)?).await;
                let methods: Vec<Value> =
                    published.options.void.into_iter().map(Value::from).collect();
                Ok(Value::from(methods))
            }
            _ => Err(RpcError::not_found(format!("portal has no method `{}`", method))),
        }
    }
}

/// Publishes local values by name and resolves names published by the peer.
///
/// Both sides of an endpoint create a portal on their half. Live objects are
/// published by reference; data is copied to whoever looks it up.
pub struct Portal {
    names: Arc<Names>,
    exposure: Exposure,
    peer: Proxy,
}

impl Portal {
    pub fn new(endpoint: Port) -> Self {
        Self::with_config(endpoint, Config::default())
    }

    pub fn with_config(endpoint: Port, config: Config) -> Self {
        let names = Arc::new(Names::default());
        let root: Arc<dyn RpcTarget> = names.clone();
        // Listen before the proxy activates the endpoint; queued peer lookups
        // are delivered as soon as it does.
        let exposure =
            Exposure::with_config(Value::from_target(root), endpoint.clone(), config.clone());
        let peer = Proxy::with_config(endpoint, config);
        Portal {
            names,
            exposure,
            peer,
        }
    }

    /// Publish `value` under `name`, waking any peer lookups waiting for it.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.set_with(name, value, PublishOptions::default());
    }

    /// Publish `value` under `name` with per-method options for the peer's proxy.
    pub fn set_with(
        &self,
        name: impl Into<String>,
        value: impl Into<Value>,
        options: PublishOptions,
    ) {
        let name = name.into();
        let value = match value.into() {
            live @ Value::Target(_) => live.mark(),
            other => other,
        };
        debug!(void = ?options.void, "Portal publishing `{}`", name);
        self.names.entries.insert(name, Published { value, options });
        self.changed();
    }

    fn changed(&self) {
        self.names.changed.notify_waiters();
    }

    /// Resolve a name the peer has published, waiting until it does.
    ///
    /// Objects arrive as proxies with the publisher's void methods applied.
    pub async fn get(&self, name: &str) -> Result<Value, RpcError> {
        let value = self.peer.child("lookup").call(vec![Value::from(name)]).await?;
        if let Some(proxy) = value.as_proxy() {
            let methods = self.peer.child("voidMethods").call(vec![Value::from(name)]).await?;
            let methods = methods.as_array().into_iter().flatten().filter_map(Value::as_str);
            proxy.set_void_methods(methods);
        }
        Ok(value)
    }

    /// Lookups sent to the peer that have not been answered yet.
    pub fn in_flight(&self) -> usize {
        self.peer.in_flight()
    }

    /// Names published on this side.
    pub fn names(&self) -> Vec<String> {
        self.names.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn close(&self) {
        self.peer.release();
        self.exposure.close();
    }
}

impl fmt::Debug for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Portal")
            .field("names", &self.names())
            .field("exposure", &self.exposure)
            .finish()
    }
}
