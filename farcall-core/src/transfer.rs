//! Finds the handles inside a value tree that a transport must move instead of copy.
//!
//! The walk descends into arrays and maps only. Strings, numbers and live
//! objects are leaves. Value trees own their children, so the walk always
//! terminates; live objects that could refer back to each other are never
//! descended into.

use crate::endpoint::{same_port, Port, TransportError};
use crate::msg::{Message, WireValue};
use crate::value::{Buffer, Value};
use std::fmt;

#[derive(Clone)]
pub enum Transferable {
    Buffer(Buffer),
    Port(Port),
}

impl Transferable {
    pub fn same_handle(&self, other: &Transferable) -> bool {
        match (self, other) {
            (Transferable::Buffer(a), Transferable::Buffer(b)) => a.same_allocation(b),
            (Transferable::Port(a), Transferable::Port(b)) => same_port(a, b),
            _ => false,
        }
    }

    pub fn as_port(&self) -> Option<&Port> {
        match self {
            Transferable::Port(port) => Some(port),
            Transferable::Buffer(_) => None,
        }
    }
}

impl fmt::Debug for Transferable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transferable::Buffer(buffer) => write!(f, "Transferable::{:?}", buffer),
            Transferable::Port(port) => write!(f, "Transferable::Port({:?})", port),
        }
    }
}

#[derive(Default)]
struct Collector {
    found: Vec<Transferable>,
}

impl Collector {
    fn push(&mut self, handle: Transferable) {
        if !self.found.iter().any(|seen| seen.same_handle(&handle)) {
            self.found.push(handle);
        }
    }

    fn visit(&mut self, root: &Value) {
        let mut stack = vec![root];
        while let Some(value) = stack.pop() {
            match value {
                Value::Array(items) => stack.extend(items.iter().rev()),
                Value::Map(fields) => stack.extend(fields.values().rev()),
                Value::Buffer(buffer) => self.push(Transferable::Buffer(buffer.clone())),
                Value::Port(port) => self.push(Transferable::Port(port.clone())),
                _ => {}
            }
        }
    }

    fn visit_wire(&mut self, wire: &WireValue) {
        match wire {
            WireValue::Object(value) => self.visit(value),
            WireValue::Proxy(port) => self.push(Transferable::Port(port.clone())),
            WireValue::Error(_) => {}
        }
    }
}

/// Handles embedded in `values`, in depth-first order, each listed once.
pub fn transferables<'a>(values: impl IntoIterator<Item = &'a Value>) -> Vec<Transferable> {
    let mut collector = Collector::default();
    for value in values {
        collector.visit(value);
    }
    collector.found
}

/// Handles a message carries: copied payloads plus the ports of `PROXY` values.
pub fn message_transferables(message: &Message) -> Vec<Transferable> {
    let mut collector = Collector::default();
    match message {
        Message::Request(request) => {
            for arg in request.arguments_list.iter().flatten() {
                collector.visit_wire(arg);
            }
            if let Some(value) = &request.value {
                collector.visit_wire(value);
            }
        }
        Message::Response(response) => collector.visit_wire(&response.result),
    }
    collector.found
}

/// Every port inside `message` must be listed in `transfer`; a port cannot be copied.
pub fn ensure_transferred(
    message: &Message,
    transfer: &[Transferable],
) -> Result<(), TransportError> {
    for handle in message_transferables(message) {
        if handle.as_port().is_some() && !transfer.iter().any(|t| t.same_handle(&handle)) {
            return Err(TransportError::DataClone(
                "a port inside the message is not listed as transferable".to_string(),
            ));
        }
    }
    Ok(())
}
