use crate::endpoint::{same_port, Port};
use crate::protocol::Proxy;
use crate::target::Record;
use crate::{RpcError, RpcTarget, TargetKind};
use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::Number;
use std::fmt;
use std::sync::Arc;

/// A byte buffer that is moved rather than copied when it crosses a channel.
#[derive(Clone, PartialEq, Eq)]
pub struct Buffer(Bytes);

impl Buffer {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Buffer(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Whether both buffers view the same underlying allocation.
    pub fn same_allocation(&self, other: &Buffer) -> bool {
        self.0.as_ptr() == other.0.as_ptr() && self.0.len() == other.0.len()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer({} bytes)", self.0.len())
    }
}

/// A live local object together with its proxy-worthy marker.
#[derive(Clone)]
pub struct Live {
    target: Arc<dyn RpcTarget>,
    proxied: bool,
}

impl Live {
    pub fn new(target: Arc<dyn RpcTarget>) -> Self {
        Live {
            target,
            proxied: false,
        }
    }

    pub fn target(&self) -> &Arc<dyn RpcTarget> {
        &self.target
    }

    pub fn is_proxied(&self) -> bool {
        self.proxied
    }

    pub fn kind(&self) -> TargetKind {
        self.target.kind()
    }
}

impl fmt::Debug for Live {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Live")
            .field("target", &self.target)
            .field("proxied", &self.proxied)
            .finish()
    }
}

/// Anything that can be handed to, returned from, or stored on a remote object.
///
/// The data variants are copied structurally. `Buffer` and `Port` are
/// transferable handles. `Target` is a local object that can only cross the
/// boundary by reference once marked proxy-worthy, and `Remote` is a
/// reference to an object living on the other side.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
    Buffer(Buffer),
    Port(Port),
    Target(Live),
    Remote(Proxy),
}

impl Value {
    pub fn target(target: impl RpcTarget + 'static) -> Self {
        Value::Target(Live::new(Arc::new(target)))
    }

    pub fn from_target(target: Arc<dyn RpcTarget>) -> Self {
        Value::Target(Live::new(target))
    }

    /// A target that is exposed by reference instead of being copied.
    pub fn proxied(target: impl RpcTarget + 'static) -> Self {
        Value::target(target).mark()
    }

    /// Tag this value as proxy-worthy.
    ///
    /// Maps are wrapped in a [`Record`] so they can be served by reference.
    /// Scalars, arrays and handles are returned unchanged.
    pub fn mark(self) -> Self {
        match self {
            Value::Target(mut live) => {
                live.proxied = true;
                Value::Target(live)
            }
            Value::Map(fields) => Value::Target(Live {
                target: Arc::new(Record::from_map(fields)),
                proxied: true,
            }),
            other => other,
        }
    }

    /// Strip the proxy-worthy tag.
    pub fn unmark(self) -> Self {
        match self {
            Value::Target(mut live) => {
                live.proxied = false;
                Value::Target(live)
            }
            other => other,
        }
    }

    pub fn is_proxy_worthy(&self) -> bool {
        matches!(self, Value::Target(live) if live.proxied)
    }

    /// Whether this value is a live object rather than data.
    pub fn is_live(&self) -> bool {
        matches!(self, Value::Target(_) | Value::Remote(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Buffer(_) => "buffer",
            Value::Port(_) => "port",
            Value::Target(_) => "target",
            Value::Remote(_) => "remote",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            Value::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn as_port(&self) -> Option<&Port> {
        match self {
            Value::Port(port) => Some(port),
            _ => None,
        }
    }

    pub fn as_target(&self) -> Option<&Arc<dyn RpcTarget>> {
        match self {
            Value::Target(live) => Some(live.target()),
            _ => None,
        }
    }

    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Value::Remote(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn into_proxy(self) -> Option<Proxy> {
        match self {
            Value::Remote(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Field lookup on a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|fields| fields.get(key))
    }

    /// Read one member of this value, the way a call path segment is resolved.
    pub async fn member(&self, name: &str) -> Result<Value, RpcError> {
        match self {
            Value::Map(fields) => fields
                .get(name)
                .cloned()
                .ok_or_else(|| RpcError::not_found(format!("property `{}` not found", name))),
            Value::Array(items) => {
                if name == "length" {
                    return Ok(Value::from(items.len() as u64));
                }
                name.parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index).cloned())
                    .ok_or_else(|| RpcError::not_found(format!("index `{}` out of range", name)))
            }
            Value::Target(live) => live.target().get(name).await,
            Value::Remote(proxy) => {
                let pending = {
                    let member = proxy.clone();
                    member.get(name);
                    member.resolve()
                };
                pending.await
            }
            other => Err(RpcError::not_found(format!(
                "cannot read property `{}` of {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Invoke this value as a function.
    pub async fn apply(self, args: Vec<Value>) -> Result<Value, RpcError> {
        match self {
            Value::Target(live) => live.target().apply(args).await,
            Value::Remote(proxy) => proxy.call(args).await,
            other => Err(RpcError::bad_request(format!(
                "{} is not a function",
                other.type_name()
            ))),
        }
    }

    /// Invoke this value as a constructor.
    pub async fn construct(self, args: Vec<Value>) -> Result<Value, RpcError> {
        match self {
            Value::Target(live) => live.target().construct(args).await,
            Value::Remote(proxy) => proxy.construct(args).await,
            other => Err(RpcError::bad_request(format!(
                "{} is not a constructor",
                other.type_name()
            ))),
        }
    }

    /// JSON view of a pure-data value. Handles and live objects have none.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Option<Vec<_>>>()?,
            ),
            Value::Map(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                    .collect::<Option<serde_json::Map<_, _>>>()?,
            ),
            Value::Buffer(_) | Value::Port(_) | Value::Target(_) | Value::Remote(_) => return None,
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => a == b,
            (Value::Port(a), Value::Port(b)) => same_port(a, b),
            (Value::Target(a), Value::Target(b)) => {
                Arc::as_ptr(a.target()) as *const () == Arc::as_ptr(b.target()) as *const ()
            }
            (Value::Remote(a), Value::Remote(b)) => a.same_link(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Map(fields) => f.debug_map().entries(fields).finish(),
            Value::Buffer(buffer) => buffer.fmt(f),
            Value::Port(port) => write!(f, "Port({:?})", port),
            Value::Target(live) => write!(
                f,
                "Target({:?}, proxied: {})",
                live.kind(),
                live.is_proxied()
            ),
            Value::Remote(proxy) => write!(f, "Remote({:?})", proxy),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(Number::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(Number::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(Number::from(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Number(Number::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(fields: IndexMap<String, Value>) -> Self {
        Value::Map(fields)
    }
}

impl From<Buffer> for Value {
    fn from(buffer: Buffer) -> Self {
        Value::Buffer(buffer)
    }
}

impl From<Port> for Value {
    fn from(port: Port) -> Self {
        Value::Port(port)
    }
}

impl From<Proxy> for Value {
    fn from(proxy: Proxy) -> Self {
        Value::Remote(proxy)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Value::Map(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Function;
    use serde_json::json;

    #[test]
    fn test_json_conversion_round_trip() {
        let json = json!({"name": "widget", "sizes": [1, 2.5, null], "ok": true});
        let value = Value::from(json.clone());

        assert_eq!(value.get("name").and_then(Value::as_str), Some("widget"));
        assert_eq!(value.to_json(), Some(json));
    }

    #[test]
    fn test_map_keeps_insertion_order() {
        let value: Value = [("z", Value::from(1)), ("a", Value::from(2))]
            .into_iter()
            .collect();
        let keys: Vec<_> = value.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_mark_target_and_map() {
        let f = Value::target(Function::new("noop", |_| async { Ok(Value::Null) }));
        assert!(!f.is_proxy_worthy());
        assert!(f.clone().mark().is_proxy_worthy());
        assert!(!f.mark().unmark().is_proxy_worthy());

        let map = Value::from(json!({"count": 1})).mark();
        assert!(map.is_proxy_worthy());
        assert_eq!(map.as_target().map(|t| t.kind()), Some(TargetKind::Object));
    }

    #[test]
    fn test_mark_leaves_scalars_alone() {
        assert_eq!(Value::from(3).mark(), Value::from(3));
        assert!(!Value::from("x").mark().is_proxy_worthy());
    }

    #[test]
    fn test_target_equality_is_identity() {
        let f = Value::target(Function::new("f", |_| async { Ok(Value::Null) }));
        let g = Value::target(Function::new("f", |_| async { Ok(Value::Null) }));
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
    }

    #[test]
    fn test_non_finite_float_becomes_null() {
        assert_eq!(Value::from(f64::NAN), Value::Null);
        assert_eq!(Value::from(1.5).as_f64(), Some(1.5));
    }

    #[test]
    fn test_buffer_has_no_json_view() {
        let value = Value::from(vec![Value::from(1), Value::from(Buffer::new(vec![1u8, 2]))]);
        assert_eq!(value.to_json(), None);
    }

    #[tokio::test]
    async fn test_member_resolution() {
        let value = Value::from(json!({"items": ["a", "b"], "nested": {"x": 1}}));

        let items = value.member("items").await.unwrap();
        assert_eq!(items.member("1").await.unwrap(), Value::from("b"));
        assert_eq!(items.member("length").await.unwrap(), Value::from(2u64));

        let err = value.member("missing").await.unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::NotFound);

        let err = Value::from(5).member("x").await.unwrap_err();
        assert!(err.message.contains("of number"));
    }

    #[tokio::test]
    async fn test_apply_non_function() {
        let err = Value::from("text").apply(vec![]).await.unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::BadRequest);
        assert!(err.message.contains("not a function"));
    }
}
