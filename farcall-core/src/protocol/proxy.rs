// Client side of a link: a proxy accumulates a call path from property
// accesses and sends one request when a terminal operation is awaited.

use super::correlation::Correlator;
use super::marshal::{self, Outbound};
use super::registry::SubEndpoints;
use crate::config::Config;
use crate::endpoint::Port;
use crate::msg::Request;
use crate::{RpcError, RpcTarget, TargetKind, Value};
use async_trait::async_trait;
use dashmap::DashSet;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Path segment that turns a call into a local bound-method handle.
pub const BIND_MARKER: &str = "bind";

/// Future returned by terminal proxy operations.
pub type RemoteFuture<T = Value> = BoxFuture<'static, Result<T, RpcError>>;

enum Operation {
    Get,
    Apply(Vec<Value>),
    Construct(Vec<Value>),
    Set(String, Value),
}

/// One endpoint as seen from the calling side.
pub(crate) struct Link {
    correlator: Correlator,
    config: Config,
    exposures: Arc<SubEndpoints>,
    void_methods: DashSet<String>,
}

impl Link {
    fn outbound(&self) -> Outbound<'_> {
        Outbound {
            registry: &self.exposures,
            endpoint: self.correlator.endpoint(),
            config: &self.config,
        }
    }

    fn is_void_call(&self, call_path: &[String]) -> bool {
        match call_path {
            [method] => self.void_methods.contains(method),
            _ => false,
        }
    }

    async fn dispatch(
        self: Arc<Self>,
        call_path: Vec<String>,
        operation: Operation,
    ) -> Result<Value, RpcError> {
        let request = match operation {
            Operation::Get => Request::get(call_path),
            Operation::Apply(args) if self.is_void_call(&call_path) => {
                let request = Request::apply(call_path, self.outbound().encode_all(args)?);
                self.correlator.notify(request)?;
                return Ok(Value::Null);
            }
            Operation::Apply(args) => Request::apply(call_path, self.outbound().encode_all(args)?),
            Operation::Construct(args) => {
                Request::construct(call_path, self.outbound().encode_all(args)?)
            }
            Operation::Set(property, value) => {
                let value = self.outbound().encode(value, false)?;
                Request::set(call_path, property, value)
            }
        };
        let result = self.correlator.request(request).await?;
        marshal::decode(result, &self.config)
    }

    fn release(&self) {
        self.correlator.close("proxy released");
        self.exposures.release_all();
        debug!("Proxy link released");
    }
}

/// A handle to an object on the other side of an endpoint.
///
/// Property access with [`Proxy::get`] records a path without sending
/// anything; the path is consumed by the next terminal operation:
///
/// ```no_run
/// # use farcall_core::{Proxy, Value, RpcError};
/// # async fn demo(api: Proxy) -> Result<(), RpcError> {
/// let sum = api.get("math").get("add").call(vec![Value::from(1), Value::from(2)]).await?;
/// let size = api.get("config").get("size").resolve().await?;
/// # Ok(()) }
/// ```
///
/// Cloning a proxy shares the link but starts from an empty path.
pub struct Proxy {
    link: Arc<Link>,
    call_path: Mutex<Vec<String>>,
}

impl Proxy {
    pub fn new(endpoint: Port) -> Self {
        Self::with_config(endpoint, Config::default())
    }

    pub fn with_config(endpoint: Port, config: Config) -> Self {
        let exposures = Arc::new(SubEndpoints::new());
        let owned = exposures.clone();
        let correlator = Correlator::with_close_hook(endpoint, config.request_timeout, move || {
            owned.release_all()
        });
        Proxy {
            link: Arc::new(Link {
                correlator,
                config,
                exposures,
                void_methods: DashSet::new(),
            }),
            call_path: Mutex::new(Vec::new()),
        }
    }

    fn on_link(link: Arc<Link>, call_path: Vec<String>) -> Self {
        Proxy {
            link,
            call_path: Mutex::new(call_path),
        }
    }

    fn path(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.call_path.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_path(&self) -> Vec<String> {
        std::mem::take(&mut *self.path())
    }

    /// Extend the pending path by one member.
    pub fn get(&self, name: impl Into<String>) -> &Self {
        self.path().push(name.into());
        self
    }

    /// A new proxy for the pending path plus `name`, leaving this one untouched.
    pub fn child(&self, name: impl Into<String>) -> Proxy {
        let mut path = self.pending_path();
        path.push(name.into());
        Self::on_link(self.link.clone(), path)
    }

    /// A new proxy for exactly the pending path.
    fn here(&self) -> Proxy {
        Self::on_link(self.link.clone(), self.pending_path())
    }

    pub fn pending_path(&self) -> Vec<String> {
        self.path().clone()
    }

    /// Read the value at the pending path.
    ///
    /// With an empty path nothing is sent and the proxy itself is returned.
    pub fn resolve(&self) -> RemoteFuture {
        let path = self.take_path();
        if path.is_empty() {
            let this = self.clone();
            return async move { Ok(Value::Remote(this)) }.boxed();
        }
        self.link.clone().dispatch(path, Operation::Get).boxed()
    }

    /// Invoke the member at the pending path, with its parent as receiver.
    ///
    /// A path ending in [`BIND_MARKER`] sends nothing and yields a
    /// [`BoundMethod`] for the path before it.
    pub fn call(&self, args: Vec<Value>) -> RemoteFuture {
        let mut path = self.take_path();
        if path.last().map(String::as_str) == Some(BIND_MARKER) {
            path.pop();
            let bound = BoundMethod::new(self.link.clone(), path);
            return async move { Ok(Value::target(bound)) }.boxed();
        }
        self.link.clone().dispatch(path, Operation::Apply(args)).boxed()
    }

    pub fn construct(&self, args: Vec<Value>) -> RemoteFuture {
        let path = self.take_path();
        self.link.clone().dispatch(path, Operation::Construct(args)).boxed()
    }

    /// Assign `name` on the object at the pending path.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> RemoteFuture<bool> {
        let path = self.take_path();
        let pending = self
            .link
            .clone()
            .dispatch(path, Operation::Set(name.into(), value.into()));
        async move { Ok(pending.await?.as_bool().unwrap_or(true)) }.boxed()
    }

    /// Capture the pending path as a reusable callable.
    pub fn bind(&self) -> BoundMethod {
        BoundMethod::new(self.link.clone(), self.take_path())
    }

    /// Drive a remote async iterator: `next` is called until it reports done.
    pub fn into_stream(self) -> BoxStream<'static, Result<Value, RpcError>> {
        let base = self.take_path();
        stream::unfold(Some((self.link.clone(), base)), |state| async move {
            let (link, base) = state?;
            let mut path = base.clone();
            path.push("next".to_string());
            match link.clone().dispatch(path, Operation::Apply(Vec::new())).await {
                Ok(step) => {
                    if step.get("done").and_then(Value::as_bool).unwrap_or(false) {
                        return None;
                    }
                    let value = step.get("value").cloned().unwrap_or_default();
                    Some((Ok(value), Some((link, base))))
                }
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }

    /// Tear down the link: in-flight calls fail, sub-exposures close, the endpoint closes.
    pub fn release(&self) {
        self.link.release();
    }

    pub fn in_flight(&self) -> usize {
        self.link.correlator.in_flight()
    }

    pub fn endpoint(&self) -> &Port {
        self.link.correlator.endpoint()
    }

    pub fn config(&self) -> &Config {
        &self.link.config
    }

    /// Values this side has passed by reference over the link.
    pub fn sub_endpoints(&self) -> &Arc<SubEndpoints> {
        &self.link.exposures
    }

    /// Make calls to these members of the root fire-and-forget: they resolve
    /// with `Null` as soon as the request is sent and their replies are dropped.
    ///
    /// Applies to every proxy sharing this link.
    pub fn set_void_methods<I, S>(&self, methods: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for method in methods {
            self.link.void_methods.insert(method.into());
        }
    }

    pub fn void_methods(&self) -> Vec<String> {
        self.link.void_methods.iter().map(|method| method.key().clone()).collect()
    }

    pub fn same_link(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.link, &other.link)
    }
}

impl Clone for Proxy {
    fn clone(&self) -> Self {
        Self::on_link(self.link.clone(), Vec::new())
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("call_path", &self.pending_path())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[async_trait]
impl RpcTarget for Proxy {
    async fn get(&self, property: &str) -> Result<Value, RpcError> {
        self.child(property).resolve().await
    }

    async fn set(&self, property: &str, value: Value) -> Result<(), RpcError> {
        self.here().set(property, value).await.map(|_| ())
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.child(method).call(args).await
    }

    async fn apply(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.here().call(args).await
    }

    async fn construct(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.here().construct(args).await
    }
}

/// A remote method captured with its receiver path; can be invoked repeatedly.
pub struct BoundMethod {
    link: Arc<Link>,
    path: Vec<String>,
}

impl BoundMethod {
    fn new(link: Arc<Link>, path: Vec<String>) -> Self {
        BoundMethod { link, path }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn invoke(&self, args: Vec<Value>) -> RemoteFuture {
        self.link
            .clone()
            .dispatch(self.path.clone(), Operation::Apply(args))
            .boxed()
    }
}

impl fmt::Debug for BoundMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundMethod({})", self.path.join("."))
    }
}

#[async_trait]
impl RpcTarget for BoundMethod {
    async fn apply(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        self.invoke(args).await
    }

    fn kind(&self) -> TargetKind {
        TargetKind::Function
    }
}
