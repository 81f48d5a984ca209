// Hosts a root value on a background task and hands back a proxy to it.
// The two sides share nothing but a message channel, the same way a
// separate thread or process would.

use crate::config::WorkerConfig;
use anyhow::{Context, Result};
use farcall_core::{Endpoint, Exposure, MessageChannel, Proxy, Value};
use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct Worker {
    name: String,
    proxy: Proxy,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Start a worker whose root value is built by `factory` on the worker task.
    ///
    /// Calls made through [`Worker::proxy`] before the factory finishes are
    /// queued and served once the root exists. If the factory fails, the
    /// channel closes and queued calls fail with `Disconnected`. Dropping the
    /// returned handle stops the worker as well.
    pub fn spawn<F, Fut>(config: WorkerConfig, factory: F) -> Result<Self>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .context("a worker must be spawned from within a tokio runtime")?;

        let (client, server) = MessageChannel::new().into_ports();
        let rpc_config = config.rpc_config();
        let proxy = Proxy::with_config(client, rpc_config.clone());
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let name = config.name.clone();

        let task_name = name.clone();
        let handle = runtime.spawn(async move {
            debug!(worker = %task_name, "Building worker root");
            let root = tokio::select! {
                root = factory() => root,
                _ = &mut shutdown_rx => {
                    debug!(worker = %task_name, "Worker terminated before its root was built");
                    server.close();
                    return;
                }
            };
            let root = match root {
                Ok(root) => root,
                Err(err) => {
                    error!(worker = %task_name, "Worker failed to start: {:#}", err);
                    server.close();
                    return;
                }
            };

            let exposure = Exposure::with_config(root, server, rpc_config);
            info!(worker = %task_name, "Worker serving");
            tokio::select! {
                _ = exposure.closed() => {}
                _ = shutdown_rx => exposure.close(),
            }
            info!(
                worker = %task_name,
                served = exposure.requests_served(),
                "Worker stopped"
            );
        });

        Ok(Worker {
            name,
            proxy,
            shutdown: Some(shutdown_tx),
            handle,
        })
    }

    /// A proxy for the worker's root. Clones share one link.
    pub fn proxy(&self) -> Proxy {
        self.proxy.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the worker task has ended, either by terminate or by channel close.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Whether the link to the worker is still open.
    pub fn is_connected(&self) -> bool {
        !self.proxy.endpoint().is_closed()
    }

    /// Stop the worker and wait for its task to finish.
    ///
    /// In-flight calls fail with `Disconnected`.
    pub async fn terminate(mut self) -> Result<()> {
        info!(worker = %self.name, "Terminating worker");
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.proxy.release();
        self.handle
            .await
            .with_context(|| format!("worker `{}` task failed", self.name))
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("finished", &self.is_finished())
            .finish()
    }
}
