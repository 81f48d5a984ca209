use crate::ids::ListenerId;
use crate::msg::Message;
use crate::transfer::Transferable;
use crate::{ErrorCode, RpcError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Data clone error: {0}")]
    DataClone(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        let code = match err {
            TransportError::ConnectionClosed => ErrorCode::Disconnected,
            TransportError::DataClone(_) => ErrorCode::DataClone,
            TransportError::Protocol(_) => ErrorCode::BadRequest,
        };
        RpcError::new(code, err.to_string())
    }
}

/// What a listener observes on an endpoint.
#[derive(Debug, Clone)]
pub enum EndpointEvent {
    Message(Message),
    Closed,
}

pub type Listener = Arc<dyn Fn(&EndpointEvent) + Send + Sync>;

/// A shared handle to one half of a channel.
pub type Port = Arc<dyn Endpoint>;

/// The capabilities the proxy core needs from a channel half.
///
/// Any transport that can deliver discrete messages in both directions can
/// implement this: an in-process port, a framed socket, or an inter-process pipe.
pub trait Endpoint: Send + Sync + fmt::Debug {
    /// Post a message to the other half. `transfer` lists the handles inside
    /// `message` whose ownership moves with it.
    fn send(&self, message: Message, transfer: Vec<Transferable>) -> Result<(), TransportError>;

    fn add_listener(&self, listener: Listener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Start delivering messages. Endpoints that deliver immediately need not override this.
    fn activate(&self) {}

    /// Create a fresh pair of connected endpoints on the same transport, for sub-objects.
    fn channel(&self) -> (Port, Port);

    /// Tear the channel down. Both halves' listeners observe [`EndpointEvent::Closed`].
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Identity comparison for ports.
pub fn same_port(a: &Port, b: &Port) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageChannel;

    #[test]
    fn test_transport_error_conversion() {
        let err: RpcError = TransportError::ConnectionClosed.into();
        assert_eq!(err.code, ErrorCode::Disconnected);
        assert_eq!(err.message, "Connection closed");

        let err: RpcError = TransportError::DataClone("port not transferred".into()).into();
        assert_eq!(err.code, ErrorCode::DataClone);

        let err: RpcError = TransportError::Protocol("bad frame".into()).into();
        assert_eq!(err.code, ErrorCode::BadRequest);
    }

    #[test]
    fn test_same_port() {
        let (a, b) = MessageChannel::new().into_ports();
        assert!(same_port(&a, &a.clone()));
        assert!(!same_port(&a, &b));
    }
}
