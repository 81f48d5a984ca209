use crate::endpoint::{same_port, Port};
use crate::ids::RequestId;
use crate::{RpcError, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    Apply,
    Construct,
    Get,
    Set,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestKind::Apply => "APPLY",
            RequestKind::Construct => "CONSTRUCT",
            RequestKind::Get => "GET",
            RequestKind::Set => "SET",
        };
        write!(f, "{}", s)
    }
}

/// A value as it travels: copied, by reference over a dedicated port, or a failure.
#[derive(Debug, Clone)]
pub enum WireValue {
    Object(Value),
    Proxy(Port),
    Error(RpcError),
}

impl WireValue {
    pub fn kind(&self) -> &'static str {
        match self {
            WireValue::Object(_) => "OBJECT",
            WireValue::Proxy(_) => "PROXY",
            WireValue::Error(_) => "ERROR",
        }
    }
}

impl PartialEq for WireValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (WireValue::Object(a), WireValue::Object(b)) => a == b,
            (WireValue::Proxy(a), WireValue::Proxy(b)) => same_port(a, b),
            (WireValue::Error(a), WireValue::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for WireValue {
    fn from(value: Value) -> Self {
        WireValue::Object(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub kind: RequestKind,
    pub call_path: Vec<String>,
    pub arguments_list: Option<Vec<WireValue>>,
    pub property: Option<String>,
    pub value: Option<WireValue>,
}

impl Request {
    fn new(kind: RequestKind, call_path: Vec<String>) -> Self {
        Request {
            id: RequestId::default(),
            kind,
            call_path,
            arguments_list: None,
            property: None,
            value: None,
        }
    }

    pub fn apply(call_path: Vec<String>, arguments_list: Vec<WireValue>) -> Self {
        Request {
            arguments_list: Some(arguments_list),
            ..Self::new(RequestKind::Apply, call_path)
        }
    }

    pub fn construct(call_path: Vec<String>, arguments_list: Vec<WireValue>) -> Self {
        Request {
            arguments_list: Some(arguments_list),
            ..Self::new(RequestKind::Construct, call_path)
        }
    }

    pub fn get(call_path: Vec<String>) -> Self {
        Self::new(RequestKind::Get, call_path)
    }

    pub fn set(call_path: Vec<String>, property: impl Into<String>, value: WireValue) -> Self {
        Request {
            property: Some(property.into()),
            value: Some(value),
            ..Self::new(RequestKind::Set, call_path)
        }
    }

    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = id;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub result: WireValue,
}

impl Response {
    pub fn new(id: RequestId, result: WireValue) -> Self {
        Response { id, result }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn id(&self) -> &RequestId {
        match self {
            Message::Request(request) => &request.id,
            Message::Response(response) => &response.id,
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_request_builders() {
        let request = Request::apply(
            path(&["a", "b", "c"]),
            vec![Value::from(1).into(), Value::from(2).into()],
        );
        assert_eq!(request.kind, RequestKind::Apply);
        assert_eq!(request.call_path, path(&["a", "b", "c"]));
        assert_eq!(request.arguments_list.as_ref().map(Vec::len), Some(2));
        assert!(request.id.is_empty());

        let request = Request::get(vec![]);
        assert_eq!(request.kind, RequestKind::Get);
        assert!(request.arguments_list.is_none());

        let request = Request::set(path(&["config"]), "level", Value::from(3).into());
        assert_eq!(request.property.as_deref(), Some("level"));
        assert_eq!(request.value, Some(WireValue::Object(Value::from(3))));
    }

    #[test]
    fn test_message_id() {
        let id = RequestId::new("9-1");
        let msg: Message = Request::get(vec![]).with_id(id.clone()).into();
        assert_eq!(msg.id(), &id);

        let msg: Message = Response::new(id.clone(), Value::Null.into()).into();
        assert_eq!(msg.id(), &id);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(RequestKind::Construct.to_string(), "CONSTRUCT");
        assert_eq!(
            serde_json::to_string(&RequestKind::Apply).unwrap(),
            "\"APPLY\""
        );
        assert_eq!(WireValue::Object(Value::Null).kind(), "OBJECT");
        assert_eq!(
            WireValue::Error(RpcError::internal("x")).kind(),
            "ERROR"
        );
    }
}
