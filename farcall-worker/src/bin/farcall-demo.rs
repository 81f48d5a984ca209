//! farcall demo binary
//!
//! Starts a notes worker behind a message channel and drives it through a
//! proxy: plain calls, property reads and writes, a constructor, a callback
//! passed by reference, and a remote async iterator.

use anyhow::{Context, Result};
use async_trait::async_trait;
use farcall_core::{AsyncIter, Constructor, Function, Record};
use farcall_worker::{init_logging, proxy_value, RpcError, RpcTarget, Value, Worker, WorkerConfig};
use futures::StreamExt;
use indexmap::IndexMap;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// In-memory notes store served from the worker
#[derive(Debug, Default)]
struct NotesService {
    notes: Mutex<IndexMap<String, String>>,
    listeners: Mutex<Vec<Value>>,
}

impl NotesService {
    fn notes(&self) -> std::sync::MutexGuard<'_, IndexMap<String, String>> {
        self.notes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn notify(&self, title: &str) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            if let Err(err) = listener.apply(vec![Value::from(title)]).await {
                warn!("Listener failed: {}", err);
            }
        }
    }
}

fn text_arg(args: &[Value], index: usize, what: &str) -> Result<String, RpcError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::bad_request(format!("{} must be a string", what)))
}

#[async_trait]
impl RpcTarget for NotesService {
    async fn get(&self, property: &str) -> Result<Value, RpcError> {
        match property {
            "count" => Ok(Value::from(self.notes().len() as u64)),
            "titles" => {
                let titles: Vec<Value> =
                    self.notes().keys().map(|k| Value::from(k.as_str())).collect();
                Ok(Value::from(titles))
            }
            _ => Err(RpcError::not_found(format!("Unknown property: {}", property))),
        }
    }

    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        match method {
            "add" => {
                let title = text_arg(&args, 0, "title")?;
                let body = text_arg(&args, 1, "body")?;
                self.notes().insert(title.clone(), body);
                self.notify(&title).await;
                Ok(Value::Bool(true))
            }
            "read" => {
                let title = text_arg(&args, 0, "title")?;
                self.notes()
                    .get(&title)
                    .map(|body| Value::from(body.as_str()))
                    .ok_or_else(|| RpcError::not_found(format!("No note titled {}", title)))
            }
            "subscribe" => {
                let listener = args
                    .into_iter()
                    .next()
                    .ok_or_else(|| RpcError::bad_request("subscribe requires a callback"))?;
                self.listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(listener);
                Ok(Value::Null)
            }
            "entries" => {
                let entries: Vec<Value> = self
                    .notes()
                    .iter()
                    .map(|(title, body)| Value::from(json!({ "title": title, "body": body })))
                    .collect();
                Ok(Value::target(AsyncIter::from_values(entries)))
            }
            _ => Err(RpcError::not_found(format!("Unknown method: {}", method))),
        }
    }
}

fn root(service: Arc<NotesService>) -> Value {
    Value::target(
        Record::new()
            .with("notes", Value::from_target(service))
            .with("version", env!("CARGO_PKG_VERSION"))
            .with(
                "Tag",
                Value::target(Constructor::new("Tag", |args: Vec<Value>| async move {
                    let label = text_arg(&args, 0, "label")?;
                    Ok(Value::target(Record::new().with("label", label).with("uses", 0)))
                })),
            ),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::from_env()?;
    let _log_guard = init_logging(&config.log_dir, &config.log_prefix)
        .context("failed to initialize logging")?;

    info!("Starting farcall demo");
    info!("Worker name: {}", config.name);
    info!("Request timeout: {:?}", config.request_timeout_ms);

    let worker = Worker::spawn(config, || async {
        Ok(root(Arc::new(NotesService::default())))
    })?;
    let api = worker.proxy();

    let version = api.get("version").resolve().await?;
    info!("Worker version: {:?}", version.as_str());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let callback = proxy_value(Value::target(Function::new(
        "on_added",
        move |args: Vec<Value>| {
            let recorder = recorder.clone();
            async move {
                if let Some(title) = args.first().and_then(Value::as_str) {
                    info!("Callback: note {} added", title);
                    recorder
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(title.to_string());
                }
                Ok(Value::Null)
            }
        },
    )));
    api.get("notes").get("subscribe").call(vec![callback]).await?;

    let adds = [("groceries", "eggs, milk"), ("todo", "write docs")].map(|(title, body)| {
        api.get("notes")
            .get("add")
            .call(vec![Value::from(title), Value::from(body)])
    });
    for result in futures::future::join_all(adds).await {
        result?;
    }

    let body = api.get("notes").get("read").call(vec![Value::from("todo")]).await?;
    info!("todo: {:?}", body.as_str());

    match api.get("notes").get("read").call(vec![Value::from("missing")]).await {
        Ok(_) => warn!("Missing note unexpectedly found"),
        Err(err) => info!("Expected failure: {}", err),
    }

    let tag = api.get("Tag").construct(vec![Value::from("urgent")]).await?;
    if let Some(tag) = tag.into_proxy() {
        tag.set("uses", 3).await?;
        let uses = tag.get("uses").resolve().await?;
        info!("Tag uses: {:?}", uses.as_i64());
    }

    let entries = api.get("notes").get("entries").call(vec![]).await?;
    if let Some(entries) = entries.into_proxy() {
        let mut stream = entries.into_stream();
        while let Some(entry) = stream.next().await {
            info!("Entry: {:?}", entry?.to_json());
        }
    }

    let count = api.get("notes").get("count").resolve().await?;
    info!(
        "Stored {:?} notes, callback saw {} additions",
        count.as_i64(),
        seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    );

    worker.terminate().await?;
    info!("Demo finished");
    Ok(())
}
