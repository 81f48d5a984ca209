//! Ready-made targets: plain functions, constructors, mutable records and async iterators.

use crate::{RpcError, RpcTarget, TargetKind, Value};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, Stream, StreamExt};
use indexmap::IndexMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

type Handler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

/// A named async function.
pub struct Function {
    name: String,
    handler: Handler,
}

impl Function {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        Function {
            name: name.into(),
            handler: handler(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.name)
    }
}

#[async_trait]
impl RpcTarget for Function {
    async fn get(&self, property: &str) -> Result<Value, RpcError> {
        match property {
            "name" => Ok(Value::from(self.name.as_str())),
            _ => Err(RpcError::not_found(format!(
                "function `{}` has no property `{}`",
                self.name, property
            ))),
        }
    }

    async fn apply(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        (self.handler)(args).await
    }

    fn kind(&self) -> TargetKind {
        TargetKind::Function
    }
}

/// A named constructor. Instances it builds are always handed out by reference.
pub struct Constructor {
    name: String,
    handler: Handler,
}

impl Constructor {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        Constructor {
            name: name.into(),
            handler: handler(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constructor({})", self.name)
    }
}

#[async_trait]
impl RpcTarget for Constructor {
    async fn get(&self, property: &str) -> Result<Value, RpcError> {
        match property {
            "name" => Ok(Value::from(self.name.as_str())),
            _ => Err(RpcError::not_found(format!(
                "constructor `{}` has no property `{}`",
                self.name, property
            ))),
        }
    }

    async fn construct(&self, args: Vec<Value>) -> Result<Value, RpcError> {
        (self.handler)(args).await
    }

    fn kind(&self) -> TargetKind {
        TargetKind::Constructor
    }
}

/// A mutable bag of named members, readable and writable from the other side.
///
/// Function members are invoked through `call`, so a record can act as a
/// plain service object.
#[derive(Default)]
pub struct Record {
    fields: RwLock<IndexMap<String, Value>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(fields: IndexMap<String, Value>) -> Self {
        Record {
            fields: RwLock::new(fields),
        }
    }

    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Store a member, returning the one it replaced.
    pub fn insert(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value.into())
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn snapshot(&self) -> IndexMap<String, Value> {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.fields.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.fields.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Record")
            .field("fields", &fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl RpcTarget for Record {
    async fn get(&self, property: &str) -> Result<Value, RpcError> {
        self.field(property)
            .ok_or_else(|| RpcError::not_found(format!("property `{}` not found", property)))
    }

    async fn set(&self, property: &str, value: Value) -> Result<(), RpcError> {
        self.insert(property, value);
        Ok(())
    }
}

/// One step of an async iteration: `{ value, done }`.
pub fn iter_step(value: Value, done: bool) -> Value {
    [("value", value), ("done", Value::Bool(done))]
        .into_iter()
        .collect()
}

/// A stream driven remotely through `next` and `return`.
pub struct AsyncIter {
    stream: Mutex<Option<BoxStream<'static, Value>>>,
}

impl AsyncIter {
    pub fn new(stream: impl Stream<Item = Value> + Send + 'static) -> Self {
        AsyncIter {
            stream: Mutex::new(Some(stream.boxed())),
        }
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self::new(stream::iter(values.into_iter().collect::<Vec<_>>()))
    }
}

impl fmt::Debug for AsyncIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncIter")
    }
}

#[async_trait]
impl RpcTarget for AsyncIter {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        match method {
            "next" => {
                let mut guard = self.stream.lock().await;
                let item = match guard.as_mut() {
                    Some(stream) => stream.next().await,
                    None => None,
                };
                Ok(match item {
                    Some(value) => iter_step(value, false),
                    None => {
                        *guard = None;
                        iter_step(Value::Null, true)
                    }
                })
            }
            "return" => {
                self.stream.lock().await.take();
                Ok(iter_step(args.into_iter().next().unwrap_or_default(), true))
            }
            _ => Err(RpcError::not_found(format!(
                "async iterator has no method `{}`",
                method
            ))),
        }
    }

    fn kind(&self) -> TargetKind {
        TargetKind::AsyncIterator
    }
}
