pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod ids;
pub mod msg;
pub mod target;
pub mod transfer;
pub mod value;

// Proxy, exposer and everything that correlates traffic between them
pub mod protocol;

pub use channel::{MessageChannel, MessagePort};
pub use config::Config;
pub use endpoint::{Endpoint, EndpointEvent, Listener, Port, TransportError};
pub use error::{ErrorCode, RpcError};
pub use ids::{ExposureId, ListenerId, RequestId, RequestIdAllocator};
pub use msg::{Message, Request, RequestKind, Response, WireValue};
pub use target::{AsyncIter, Constructor, Function, Record};
pub use transfer::Transferable;
pub use value::{Buffer, Live, Value};

pub use protocol::{
    expose, BoundMethod, Exposure, Portal, Proxy, PublishOptions, RemoteFuture, SubEndpoints,
    BIND_MARKER,
};

use async_trait::async_trait;

/// What kind of object a target is. Async iterators are always served by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Object,
    Function,
    Constructor,
    AsyncIterator,
}

/// An object that can be exposed to, and driven from, the other side of a channel.
///
/// Every method has a default so implementors only provide the operations
/// they support. `call` is a receiver-bound member invocation; its default
/// reads the member with `get` and applies it.
#[async_trait]
pub trait RpcTarget: Send + Sync + std::fmt::Debug {
    /// Read a property
    async fn get(&self, property: &str) -> Result<Value, RpcError> {
        Err(RpcError::not_found(format!(
            "property `{}` not found",
            property
        )))
    }

    /// Assign a property
    async fn set(&self, property: &str, _value: Value) -> Result<(), RpcError> {
        Err(RpcError::permission_denied(format!(
            "property `{}` is read-only",
            property
        )))
    }

    /// Invoke the member `method` with this object as the receiver
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        let member = self.get(method).await?;
        member.apply(args).await
    }

    /// Invoke this object itself as a function
    async fn apply(&self, _args: Vec<Value>) -> Result<Value, RpcError> {
        Err(RpcError::bad_request("target is not a function"))
    }

    /// Instantiate this object as a constructor
    async fn construct(&self, _args: Vec<Value>) -> Result<Value, RpcError> {
        Err(RpcError::bad_request("target is not a constructor"))
    }

    fn kind(&self) -> TargetKind {
        TargetKind::Object
    }
}

/// Tag a value as proxy-worthy: it will be exposed by reference, never copied.
pub fn proxy_value(value: impl Into<Value>) -> Value {
    value.into().mark()
}

// Mock RPC target for testing
#[cfg(test)]
#[derive(Debug)]
pub struct MockRpcTarget {}

#[cfg(test)]
impl MockRpcTarget {
    pub fn new() -> Self {
        Self {}
    }
}

#[cfg(test)]
#[async_trait]
impl RpcTarget for MockRpcTarget {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        Ok(Value::from(format!(
            "Mock call to {} with {} args",
            method,
            args.len()
        )))
    }

    async fn get(&self, property: &str) -> Result<Value, RpcError> {
        Ok(Value::from(format!("Mock property {}", property)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Bare;

    #[async_trait]
    impl RpcTarget for Bare {}

    #[tokio::test]
    async fn test_default_target_operations() {
        let bare = Bare;

        assert_eq!(bare.get("x").await.unwrap_err().code, ErrorCode::NotFound);
        assert_eq!(
            bare.set("x", Value::Null).await.unwrap_err().code,
            ErrorCode::PermissionDenied
        );
        assert_eq!(
            bare.call("x", vec![]).await.unwrap_err().code,
            ErrorCode::NotFound
        );
        assert_eq!(
            bare.apply(vec![]).await.unwrap_err().code,
            ErrorCode::BadRequest
        );
        assert_eq!(
            bare.construct(vec![]).await.unwrap_err().code,
            ErrorCode::BadRequest
        );
        assert_eq!(bare.kind(), TargetKind::Object);
    }

    #[tokio::test]
    async fn test_mock_target() {
        let mock = MockRpcTarget::new();
        let result = mock.call("ping", vec![Value::from(1)]).await.unwrap();
        assert_eq!(result.as_str(), Some("Mock call to ping with 1 args"));
    }

    #[test]
    fn test_proxy_value_marks() {
        let marked = proxy_value(Value::target(MockRpcTarget::new()));
        assert!(marked.is_proxy_worthy());
    }
}
