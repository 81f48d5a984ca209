//! In-process message channel: two connected ports, each with its own
//! delivery queue and listener set.
//!
//! Messages posted before a port is activated are queued and delivered, in
//! order, once [`Endpoint::activate`] starts the port's delivery task.

use crate::endpoint::{Endpoint, EndpointEvent, Listener, Port, TransportError};
use crate::ids::{ListenerId, ListenerIdAllocator};
use crate::msg::Message;
use crate::transfer::{self, Transferable};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

type Inbox = mpsc::UnboundedReceiver<EndpointEvent>;

/// A pair of entangled ports.
pub struct MessageChannel {
    port1: Arc<MessagePort>,
    port2: Arc<MessagePort>,
}

impl MessageChannel {
    pub fn new() -> Self {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let port1 = Arc::new(MessagePort::new(tx1.clone(), rx1, tx2.clone(), closed.clone()));
        let port2 = Arc::new(MessagePort::new(tx2, rx2, tx1, closed));

        MessageChannel { port1, port2 }
    }

    pub fn port1(&self) -> Port {
        self.port1.clone()
    }

    pub fn port2(&self) -> Port {
        self.port2.clone()
    }

    pub fn into_ports(self) -> (Port, Port) {
        (self.port1, self.port2)
    }
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MessagePort {
    listeners: Arc<DashMap<ListenerId, Listener>>,
    listener_ids: ListenerIdAllocator,
    inbox: Mutex<Option<Inbox>>,
    self_tx: mpsc::UnboundedSender<EndpointEvent>,
    peer_tx: mpsc::UnboundedSender<EndpointEvent>,
    closed: Arc<AtomicBool>,
}

impl MessagePort {
    fn new(
        self_tx: mpsc::UnboundedSender<EndpointEvent>,
        inbox: Inbox,
        peer_tx: mpsc::UnboundedSender<EndpointEvent>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        MessagePort {
            listeners: Arc::new(DashMap::new()),
            listener_ids: ListenerIdAllocator::new(),
            inbox: Mutex::new(Some(inbox)),
            self_tx,
            peer_tx,
            closed,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn take_inbox(&self) -> Option<Inbox> {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn restore_inbox(&self, inbox: Inbox) {
        *self.inbox.lock().unwrap_or_else(PoisonError::into_inner) = Some(inbox);
    }
}

async fn deliver(mut inbox: Inbox, listeners: Arc<DashMap<ListenerId, Listener>>) {
    while let Some(event) = inbox.recv().await {
        // Listeners may add or remove listeners, so call a snapshot.
        let snapshot: Vec<Listener> = listeners.iter().map(|entry| entry.value().clone()).collect();
        for listener in &snapshot {
            listener(&event);
        }
        if matches!(event, EndpointEvent::Closed) {
            break;
        }
    }
    trace!("Port delivery loop finished");
}

impl Endpoint for MessagePort {
    fn send(&self, message: Message, transfer: Vec<Transferable>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        transfer::ensure_transferred(&message, &transfer)?;
        self.peer_tx
            .send(EndpointEvent::Message(message))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = self.listener_ids.allocate();
        self.listeners.insert(id, listener);
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    fn activate(&self) {
        let Some(inbox) = self.take_inbox() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(deliver(inbox, self.listeners.clone()));
            }
            Err(_) => {
                warn!("Port activated outside a tokio runtime; delivery not started");
                self.restore_inbox(inbox);
            }
        }
    }

    fn channel(&self) -> (Port, Port) {
        MessageChannel::new().into_ports()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing message channel");
        let _ = self.self_tx.send(EndpointEvent::Closed);
        let _ = self.peer_tx.send(EndpointEvent::Closed);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MessagePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePort")
            .field("listeners", &self.listeners.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{Request, Response, WireValue};
    use crate::{RequestId, Value};
    use std::time::Duration;
    use tokio::time::timeout;

    fn collecting(port: &Port) -> (ListenerId, mpsc::UnboundedReceiver<EndpointEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = port.add_listener(Arc::new(move |event: &EndpointEvent| {
            let _ = tx.send(event.clone());
        }));
        (id, rx)
    }

    fn ping(id: &str) -> Message {
        Request::get(vec!["ping".to_string()])
            .with_id(RequestId::new(id))
            .into()
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<EndpointEvent>) -> EndpointEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event not delivered in time")
            .expect("listener dropped")
    }

    #[tokio::test]
    async fn test_messages_queue_until_activated() {
        let (a, b) = MessageChannel::new().into_ports();

        a.send(ping("1-0"), vec![]).unwrap();
        a.send(ping("1-1"), vec![]).unwrap();

        let (_, mut rx) = collecting(&b);
        b.activate();

        match next(&mut rx).await {
            EndpointEvent::Message(msg) => assert_eq!(msg.id().as_str(), "1-0"),
            other => panic!("unexpected {:?}", other),
        }
        match next(&mut rx).await {
            EndpointEvent::Message(msg) => assert_eq!(msg.id().as_str(), "1-1"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_reaches_both_halves() {
        let (a, b) = MessageChannel::new().into_ports();
        let (_, mut rx_a) = collecting(&a);
        let (_, mut rx_b) = collecting(&b);
        a.activate();
        b.activate();

        b.close();

        assert!(matches!(next(&mut rx_a).await, EndpointEvent::Closed));
        assert!(matches!(next(&mut rx_b).await, EndpointEvent::Closed));
        assert!(a.is_closed());
        assert!(matches!(
            a.send(ping("1-0"), vec![]),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_removed_listener_stops_receiving() {
        let (a, b) = MessageChannel::new().into_ports();
        let (first, mut rx_first) = collecting(&b);
        let (_, mut rx_second) = collecting(&b);
        b.activate();

        assert!(b.remove_listener(first));
        assert!(!b.remove_listener(first));

        a.send(ping("1-0"), vec![]).unwrap();
        assert!(matches!(next(&mut rx_second).await, EndpointEvent::Message(_)));
        assert!(rx_first.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_port_must_be_transferred() {
        let (a, b) = MessageChannel::new().into_ports();
        let (sub, _sub_other) = a.channel();
        let message: Message =
            Response::new(RequestId::new("1-0"), WireValue::Proxy(sub.clone())).into();

        assert!(matches!(
            a.send(message.clone(), vec![]),
            Err(TransportError::DataClone(_))
        ));

        let (_, mut rx) = collecting(&b);
        b.activate();
        a.send(message, vec![Transferable::Port(sub.clone())]).unwrap();
        match next(&mut rx).await {
            EndpointEvent::Message(Message::Response(response)) => {
                assert_eq!(response.result, WireValue::Proxy(sub));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_payload_values_arrive_intact() {
        let (a, b) = MessageChannel::new().into_ports();
        let (_, mut rx) = collecting(&b);
        b.activate();

        let payload = Value::from(serde_json::json!({"a": [1, 2, {"b": "c"}]}));
        let message: Message = Response::new(RequestId::new("1-0"), payload.clone().into()).into();
        a.send(message, vec![]).unwrap();

        match next(&mut rx).await {
            EndpointEvent::Message(Message::Response(response)) => {
                assert_eq!(response.result, WireValue::Object(payload));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_activate_without_runtime_keeps_queue() {
        let (a, b) = MessageChannel::new().into_ports();
        a.send(ping("1-0"), vec![]).unwrap();
        b.activate();
        assert!(!b.is_closed());
    }
}
