// Conversion between local values and wire values.
// Proxy-worthy values leave as a PROXY port served by a fresh sub-exposure;
// everything else is copied and must therefore be pure data.

use super::proxy::Proxy;
use super::registry::SubEndpoints;
use crate::config::Config;
use crate::endpoint::{Endpoint, Port};
use crate::ids::ExposureId;
use crate::msg::WireValue;
use crate::{RpcError, TargetKind, Value};
use std::sync::Arc;
use tracing::debug;

/// Where outgoing sub-exposures are created and recorded.
pub(crate) struct Outbound<'a> {
    pub registry: &'a Arc<SubEndpoints>,
    pub endpoint: &'a Port,
    pub config: &'a Config,
}

impl Outbound<'_> {
    fn expose(&self, value: Value) -> (ExposureId, WireValue) {
        let (local, remote) = self.endpoint.channel();
        let id = self.registry.spawn(value, local, self.config);
        debug!("Passing value by reference through {}", id);
        (id, WireValue::Proxy(remote))
    }

    /// Encode one value. `force_proxy` sends live objects and records by reference
    /// even when they were not marked.
    pub fn encode(&self, value: Value, force_proxy: bool) -> Result<WireValue, RpcError> {
        self.encode_tracked(value, force_proxy).map(|(_, wire)| wire)
    }

    fn encode_tracked(
        &self,
        value: Value,
        force_proxy: bool,
    ) -> Result<(Option<ExposureId>, WireValue), RpcError> {
        let value = if force_proxy { value.mark() } else { value };
        match value {
            Value::Remote(_) => {
                let (id, wire) = self.expose(value);
                Ok((Some(id), wire))
            }
            Value::Target(live) if live.is_proxied() => {
                let (id, wire) = self.expose(Value::Target(live));
                Ok((Some(id), wire))
            }
            Value::Target(live) => Err(RpcError::data_clone(format!(
                "{:?} target cannot be copied; mark it with proxy_value to pass it by reference",
                live.kind()
            ))),
            data => {
                if let Some(kind) = nested_live(&data) {
                    return Err(RpcError::data_clone(format!(
                        "{} nested inside a copied {} cannot be copied",
                        kind,
                        data.type_name()
                    )));
                }
                Ok((None, WireValue::Object(data)))
            }
        }
    }

    /// Encode an argument list. On failure, sub-exposures already created for
    /// earlier arguments are released.
    pub fn encode_all(&self, values: Vec<Value>) -> Result<Vec<WireValue>, RpcError> {
        let mut spawned = Vec::new();
        let mut wires = Vec::with_capacity(values.len());
        for value in values {
            match self.encode_tracked(value, false) {
                Ok((id, wire)) => {
                    spawned.extend(id);
                    wires.push(wire);
                }
                Err(err) => {
                    for id in spawned {
                        self.registry.release(id);
                    }
                    return Err(err);
                }
            }
        }
        Ok(wires)
    }

    /// Encode the outcome of a served request. Failures become `ERROR` values.
    pub fn encode_result(&self, result: Result<Value, RpcError>, force_proxy: bool) -> WireValue {
        match result.and_then(|value| self.encode(value, force_proxy)) {
            Ok(wire) => wire,
            Err(err) => WireValue::Error(err),
        }
    }
}

/// Decode an incoming value. `PROXY` ports become proxies sharing `config`.
pub(crate) fn decode(wire: WireValue, config: &Config) -> Result<Value, RpcError> {
    match wire {
        WireValue::Object(value) => Ok(value),
        WireValue::Proxy(port) => Ok(Value::Remote(Proxy::with_config(port, config.clone()))),
        WireValue::Error(err) => Err(err),
    }
}

pub(crate) fn decode_all(wires: Vec<WireValue>, config: &Config) -> Result<Vec<Value>, RpcError> {
    wires.into_iter().map(|wire| decode(wire, config)).collect()
}

/// Whether a result must be served by reference regardless of marking.
pub(crate) fn always_by_reference(value: &Value) -> bool {
    matches!(value, Value::Target(live) if live.kind() == TargetKind::AsyncIterator)
}

/// The first live object found inside a data value, if any.
fn nested_live(value: &Value) -> Option<&'static str> {
    let mut stack = vec![value];
    while let Some(current) = stack.pop() {
        match current {
            Value::Array(items) => stack.extend(items.iter()),
            Value::Map(fields) => stack.extend(fields.values()),
            Value::Target(_) => return Some("a local object"),
            Value::Remote(_) => return Some("a remote proxy"),
            _ => {}
        }
    }
    None
}
