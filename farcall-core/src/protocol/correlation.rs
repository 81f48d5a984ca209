// Request/response correlation for one endpoint.
// Each outgoing request gets a fresh id and a pending slot; a single listener
// on the endpoint completes slots as responses arrive, in any order.

use crate::endpoint::{Endpoint, EndpointEvent, Port};
use crate::ids::{ListenerId, RequestId, RequestIdAllocator};
use crate::msg::{Message, Request, WireValue};
use crate::transfer::message_transferables;
use crate::RpcError;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

type Slot = oneshot::Sender<Result<WireValue, RpcError>>;
type Pending = Arc<DashMap<RequestId, Slot>>;

fn fail_all(pending: &DashMap<RequestId, Slot>, reason: &str) {
    let ids: Vec<RequestId> = pending.iter().map(|entry| entry.key().clone()).collect();
    for id in ids {
        if let Some((_, slot)) = pending.remove(&id) {
            let _ = slot.send(Err(RpcError::disconnected(reason)));
        }
    }
}

/// Removes the pending slot when the awaiting future finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a DashMap<RequestId, Slot>,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

pub(crate) struct Correlator {
    endpoint: Port,
    pending: Pending,
    detached: Arc<DashSet<RequestId>>,
    ids: RequestIdAllocator,
    listener: ListenerId,
    timeout: Option<Duration>,
}

impl Correlator {
    pub fn new(endpoint: Port, timeout: Option<Duration>) -> Self {
        Self::with_close_hook(endpoint, timeout, || {})
    }

    /// Like [`Correlator::new`], running `on_closed` once the endpoint reports `Closed`.
    pub fn with_close_hook(
        endpoint: Port,
        timeout: Option<Duration>,
        on_closed: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let pending: Pending = Arc::new(DashMap::new());
        let detached = Arc::new(DashSet::new());
        let table = pending.clone();
        let fire_and_forget = detached.clone();

        let listener = endpoint.add_listener(Arc::new(move |event: &EndpointEvent| match event {
            EndpointEvent::Message(Message::Response(response)) => {
                if response.id.is_empty() {
                    trace!("Ignoring response without id");
                    return;
                }
                if fire_and_forget.remove(&response.id).is_some() {
                    if let WireValue::Error(err) = &response.result {
                        debug!(id = %response.id, "Void call failed remotely: {}", err);
                    }
                    return;
                }
                match table.remove(&response.id) {
                    Some((_, slot)) => {
                        let _ = slot.send(Ok(response.result.clone()));
                    }
                    None => warn!("Dropping response for unknown request {}", response.id),
                }
            }
            EndpointEvent::Message(Message::Request(_)) => {}
            EndpointEvent::Closed => {
                fail_all(&table, "endpoint closed");
                fire_and_forget.clear();
                on_closed();
            }
        }));
        endpoint.activate();

        let ids = RequestIdAllocator::new();
        debug!(instance = ids.instance(), "Correlator attached");

        Correlator {
            endpoint,
            pending,
            detached,
            ids,
            listener,
            timeout,
        }
    }

    pub fn endpoint(&self) -> &Port {
        &self.endpoint
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Send `request` with a fresh id and wait for the matching response.
    pub async fn request(&self, request: Request) -> Result<WireValue, RpcError> {
        let id = self.ids.allocate();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        trace!(id = %id, kind = %request.kind, path = ?request.call_path, "Sending request");
        let message = Message::Request(request.with_id(id.clone()));
        let transfer = message_transferables(&message);
        self.endpoint.send(message, transfer)?;

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(id = %id, "Request timed out after {:?}", limit);
                    return Err(RpcError::timeout(format!(
                        "no response to request {} within {:?}",
                        id, limit
                    )));
                }
            },
            None => rx.await,
        };

        outcome.unwrap_or_else(|_| Err(RpcError::disconnected("response slot dropped")))
    }

    /// Send `request` without waiting for, or keeping, its response.
    ///
    /// The request still carries an id so the peer serves it; the reply is
    /// discarded when it arrives.
    pub fn notify(&self, request: Request) -> Result<(), RpcError> {
        let id = self.ids.allocate();
        self.detached.insert(id.clone());

        trace!(id = %id, kind = %request.kind, path = ?request.call_path, "Sending void request");
        let message = Message::Request(request.with_id(id.clone()));
        let transfer = message_transferables(&message);
        if let Err(err) = self.endpoint.send(message, transfer) {
            self.detached.remove(&id);
            return Err(err.into());
        }
        Ok(())
    }

    /// Fail everything in flight, stop listening and close the endpoint.
    pub fn close(&self, reason: &str) {
        self.endpoint.remove_listener(self.listener);
        fail_all(&self.pending, reason);
        self.detached.clear();
        self.endpoint.close();
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.endpoint.remove_listener(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::Response;
    use crate::{ErrorCode, MessageChannel, RequestId, Value};

    /// Answers every request on `port` with its id echoed as a string.
    fn echo_server(port: &Port) {
        let reply = port.clone();
        port.add_listener(Arc::new(move |event: &EndpointEvent| {
            if let EndpointEvent::Message(Message::Request(request)) = event {
                let response = Response::new(
                    request.id.clone(),
                    Value::from(request.id.as_str()).into(),
                );
                let _ = reply.send(response.into(), vec![]);
            }
        }));
        port.activate();
    }

    #[tokio::test]
    async fn test_response_completes_matching_request() {
        let (client, server) = MessageChannel::new().into_ports();
        echo_server(&server);
        let correlator = Correlator::new(client, None);

        let a = correlator.request(Request::get(vec!["a".into()]));
        let b = correlator.request(Request::get(vec!["b".into()]));
        let (a, b) = tokio::join!(a, b);

        let a = a.unwrap();
        let b = b.unwrap();
        assert_ne!(a, b);
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_pending() {
        let (client, _server) = MessageChannel::new().into_ports();
        let correlator = Arc::new(Correlator::new(client, None));

        let waiting = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.request(Request::get(vec![])).await })
        };
        while correlator.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        correlator.close("released");
        let err = waiting.await.unwrap().unwrap_err();
        assert_eq!(err.code, ErrorCode::Disconnected);
        assert_eq!(err.message, "released");
    }

    #[tokio::test]
    async fn test_send_after_close_is_rejected() {
        let (client, server) = MessageChannel::new().into_ports();
        let correlator = Correlator::new(client, None);
        server.close();

        let err = correlator.request(Request::get(vec![])).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Disconnected);
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_clears_slot() {
        let (client, _server) = MessageChannel::new().into_ports();
        let correlator = Correlator::new(client, Some(Duration::from_millis(50)));

        let err = correlator.request(Request::get(vec![])).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert_eq!(correlator.in_flight(), 0);
    }

    /// Forwards every request arriving on `port` to the returned receiver.
    fn capture_requests(port: &Port) -> tokio::sync::mpsc::UnboundedReceiver<Request> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        port.add_listener(Arc::new(move |event: &EndpointEvent| {
            if let EndpointEvent::Message(Message::Request(request)) = event {
                let _ = tx.send(request.clone());
            }
        }));
        port.activate();
        rx
    }

    #[tokio::test]
    async fn test_response_without_id_is_ignored() {
        let (client, server) = MessageChannel::new().into_ports();
        let mut requests = capture_requests(&server);
        let correlator = Arc::new(Correlator::new(client, None));

        let waiting = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.request(Request::get(vec!["x".into()])).await })
        };
        let request = requests.recv().await.unwrap();

        let stray = Response::new(RequestId::default(), Value::from("stray").into());
        server.send(stray.into(), vec![]).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(correlator.in_flight(), 1);
        assert!(!waiting.is_finished());

        let reply = Response::new(request.id, Value::from("real").into());
        server.send(reply.into(), vec![]).unwrap();
        let result = waiting.await.unwrap().unwrap();
        assert_eq!(result, WireValue::Object(Value::from("real")));
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_notify_keeps_no_slot() {
        let (client, server) = MessageChannel::new().into_ports();
        let mut requests = capture_requests(&server);
        let correlator = Correlator::new(client, None);

        correlator.notify(Request::apply(vec!["emit".into()], vec![])).unwrap();
        assert_eq!(correlator.in_flight(), 0);

        let request = requests.recv().await.unwrap();
        assert!(!request.id.is_empty());
        assert_eq!(correlator.detached.len(), 1);

        let reply = Response::new(request.id, Value::Null.into());
        server.send(reply.into(), vec![]).unwrap();
        while !correlator.detached.is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_close_hook_runs_on_peer_close() {
        let (client, server) = MessageChannel::new().into_ports();
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let _correlator = Correlator::with_close_hook(client, None, move || {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        });

        server.close();
        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("close hook never ran")
            .unwrap();
    }
}
