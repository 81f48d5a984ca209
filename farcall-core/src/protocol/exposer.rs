// Serves requests arriving on an endpoint against a local root value.
// Every request with an id gets exactly one response, success or failure.

use super::marshal::{self, Outbound};
use super::registry::SubEndpoints;
use crate::config::Config;
use crate::endpoint::{Endpoint, EndpointEvent, Port};
use crate::ids::{ExposureId, ListenerId};
use crate::msg::{Message, Request, RequestKind, Response, WireValue};
use crate::transfer::message_transferables;
use crate::{RpcError, RpcTarget, Value};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Link from a sub-exposure back to the registry that owns it.
pub(crate) struct Parent {
    registry: Weak<SubEndpoints>,
    id: ExposureId,
}

impl Parent {
    pub fn new(registry: Weak<SubEndpoints>, id: ExposureId) -> Self {
        Parent { registry, id }
    }
}

/// Serve `root` on `endpoint` with default settings.
///
/// The exposure stays alive until the endpoint closes or [`Exposure::close`]
/// is called; dropping the handle does not stop it.
pub fn expose(root: impl Into<Value>, endpoint: Port) -> Exposure {
    Exposure::with_config(root, endpoint, Config::default())
}

#[derive(Clone)]
pub struct Exposure {
    inner: Arc<ExposureInner>,
}

struct ExposureInner {
    root: Value,
    endpoint: Port,
    config: Config,
    children: Arc<SubEndpoints>,
    listener: Mutex<Option<ListenerId>>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    served: AtomicU64,
    parent: Option<Parent>,
}

impl Exposure {
    pub fn with_config(root: impl Into<Value>, endpoint: Port, config: Config) -> Self {
        Self::spawn(root.into(), endpoint, config, None)
    }

    pub(crate) fn spawn(
        root: Value,
        endpoint: Port,
        config: Config,
        parent: Option<Parent>,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);
        let inner = Arc::new(ExposureInner {
            root,
            endpoint: endpoint.clone(),
            config,
            children: Arc::new(SubEndpoints::new()),
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
            closed_tx,
            served: AtomicU64::new(0),
            parent,
        });

        // The listener keeps the exposure alive until close removes it.
        let handle = inner.clone();
        let listener = endpoint.add_listener(Arc::new(move |event: &EndpointEvent| match event {
            EndpointEvent::Message(Message::Request(request)) => handle.dispatch(request.clone()),
            EndpointEvent::Message(Message::Response(_)) => {}
            EndpointEvent::Closed => handle.close(),
        }));
        *inner.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
        endpoint.activate();

        debug!(root = inner.root.type_name(), "Exposure started");
        Exposure { inner }
    }

    /// Stop serving, release every sub-exposure and close the endpoint.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolves once the exposure has closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn requests_served(&self) -> u64 {
        self.inner.served.load(Ordering::Relaxed)
    }

    pub fn sub_endpoints(&self) -> &Arc<SubEndpoints> {
        &self.inner.children
    }

    pub fn endpoint(&self) -> &Port {
        &self.inner.endpoint
    }
}

impl fmt::Debug for Exposure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exposure")
            .field("root", &self.inner.root.type_name())
            .field("closed", &self.is_closed())
            .field("served", &self.requests_served())
            .field("sub_endpoints", &self.inner.children.len())
            .finish()
    }
}

impl ExposureInner {
    fn dispatch(self: &Arc<Self>, request: Request) {
        if request.id.is_empty() {
            trace!("Ignoring request without id");
            return;
        }
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(id = %request.id, "No tokio runtime to serve request");
            return;
        };
        let inner = self.clone();
        runtime.spawn(async move { inner.serve(request).await });
    }

    async fn serve(&self, request: Request) {
        let id = request.id.clone();
        debug!(id = %id, kind = %request.kind, path = ?request.call_path, "Serving request");

        let outcome = AssertUnwindSafe(self.perform(request)).catch_unwind().await;
        let (result, force_proxy) = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(id = %id, "Handler panicked: {}", message);
                (Err(RpcError::internal(message)), false)
            }
        };
        if let Err(err) = &result {
            debug!(id = %id, "Request failed: {}", err);
        }

        let outbound = Outbound {
            registry: &self.children,
            endpoint: &self.endpoint,
            config: &self.config,
        };
        let result = outbound.encode_result(result, force_proxy);
        let message = Message::Response(Response::new(id.clone(), result));
        let transfer = message_transferables(&message);
        self.served.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.endpoint.send(message, transfer) {
            if self.endpoint.is_closed() {
                debug!(id = %id, "Response not delivered: {}", err);
            } else {
                warn!(id = %id, "Failed to send response: {}", err);
            }
        }
    }

    /// Run one request. The flag reports whether the result must go by reference.
    async fn perform(&self, request: Request) -> (Result<Value, RpcError>, bool) {
        if request.call_path.len() > self.config.max_call_path {
            return (
                Err(RpcError::bad_request(format!(
                    "call path of {} segments exceeds the limit of {}",
                    request.call_path.len(),
                    self.config.max_call_path
                ))),
                false,
            );
        }

        match request.kind {
            RequestKind::Get => (self.resolve(&request.call_path).await, false),
            RequestKind::Set => (self.assign(request).await, false),
            RequestKind::Apply => {
                let result = self.invoke(request).await;
                let force = matches!(&result, Ok(value) if marshal::always_by_reference(value));
                (result, force)
            }
            RequestKind::Construct => (self.instantiate(request).await, true),
        }
    }

    /// Walk `path` from the root, one member at a time.
    async fn resolve(&self, path: &[String]) -> Result<Value, RpcError> {
        let mut current = self.root.clone();
        for (depth, segment) in path.iter().enumerate() {
            if let Value::Remote(proxy) = &current {
                // Forward the rest of the walk in a single request.
                let rest = proxy.clone();
                for segment in &path[depth..] {
                    rest.get(segment.as_str());
                }
                return rest.resolve().await;
            }
            current = current.member(segment).await?;
        }
        Ok(current)
    }

    fn arguments(&self, wires: Option<Vec<WireValue>>) -> Result<Vec<Value>, RpcError> {
        marshal::decode_all(wires.unwrap_or_default(), &self.config)
    }

    async fn invoke(&self, request: Request) -> Result<Value, RpcError> {
        let args = self.arguments(request.arguments_list)?;
        let Some((member, receiver_path)) = request.call_path.split_last() else {
            return self.root.clone().apply(args).await;
        };

        match self.resolve(receiver_path).await? {
            Value::Target(live) => live.target().call(member, args).await,
            Value::Remote(proxy) => {
                let method = proxy.clone();
                method.get(member.as_str());
                method.call(args).await
            }
            other => other.member(member).await?.apply(args).await,
        }
    }

    async fn instantiate(&self, request: Request) -> Result<Value, RpcError> {
        let args = self.arguments(request.arguments_list)?;
        let constructor = self.resolve(&request.call_path).await?;
        constructor.construct(args).await
    }

    async fn assign(&self, request: Request) -> Result<Value, RpcError> {
        let property = request
            .property
            .ok_or_else(|| RpcError::bad_request("SET request without a property"))?;
        let value = match request.value {
            Some(wire) => marshal::decode(wire, &self.config)?,
            None => Value::Null,
        };

        match self.resolve(&request.call_path).await? {
            Value::Target(live) => live.target().set(&property, value).await?,
            Value::Remote(proxy) => {
                proxy.clone().set(property, value).await?;
            }
            other => {
                return Err(RpcError::permission_denied(format!(
                    "cannot set property `{}` on {}",
                    property,
                    other.type_name()
                )))
            }
        }
        Ok(Value::Bool(true))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(listener) = listener {
            self.endpoint.remove_listener(listener);
        }
        self.children.release_all();
        self.endpoint.close();
        if let Some(parent) = &self.parent {
            if let Some(registry) = parent.registry.upgrade() {
                registry.forget(parent.id);
            }
        }
        self.closed_tx.send_replace(true);
        info!(
            "Exposure closed after serving {} requests",
            self.served.load(Ordering::Relaxed)
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}
