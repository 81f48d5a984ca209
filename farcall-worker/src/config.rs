use anyhow::{Context, Result};
use farcall_core::Config;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Settings for a hosted worker, usually taken from `FARCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Name used in log lines
    pub name: String,
    /// Per-call timeout in milliseconds; `None` waits forever
    pub request_timeout_ms: Option<u64>,
    pub max_call_path: usize,
    pub log_dir: PathBuf,
    pub log_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let core = Config::default();
        Self {
            name: "worker".to_string(),
            request_timeout_ms: core.request_timeout.map(|t| t.as_millis() as u64),
            max_call_path: core.max_call_path,
            log_dir: PathBuf::from("logs"),
            log_prefix: "farcall".to_string(),
        }
    }
}

fn parsed<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value `{}` for {}", raw, key)),
        Err(_) => Ok(None),
    }
}

impl WorkerConfig {
    /// Defaults overridden by `FARCALL_WORKER_NAME`, `FARCALL_REQUEST_TIMEOUT_MS`,
    /// `FARCALL_MAX_CALL_PATH` and `FARCALL_LOG_DIR`.
    ///
    /// A timeout of `0` disables the timeout.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(name) = env::var("FARCALL_WORKER_NAME") {
            config.name = name;
        }
        if let Some(timeout) = parsed::<u64>("FARCALL_REQUEST_TIMEOUT_MS")? {
            config.request_timeout_ms = (timeout > 0).then_some(timeout);
        }
        if let Some(max) = parsed::<usize>("FARCALL_MAX_CALL_PATH")? {
            anyhow::ensure!(max > 0, "FARCALL_MAX_CALL_PATH must be at least 1");
            config.max_call_path = max;
        }
        if let Ok(dir) = env::var("FARCALL_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = Some(timeout_ms);
        self
    }

    /// The protocol settings for proxies and exposures this worker creates.
    pub fn rpc_config(&self) -> Config {
        let config = Config::default().with_max_call_path(self.max_call_path);
        match self.request_timeout_ms {
            Some(ms) => config.with_request_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}
