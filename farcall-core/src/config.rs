use std::time::Duration;

/// Settings shared by proxies and exposers on one link.
///
/// Sub-proxies and sub-exposures spawned from a link inherit its config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Fail a call with `Timeout` when no response arrives in time. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Longest call path an exposer will walk.
    pub max_call_path: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: None,
            max_call_path: 64,
        }
    }
}

impl Config {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_max_call_path(mut self, max_call_path: usize) -> Self {
        self.max_call_path = max_call_path;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.max_call_path, 64);
    }

    #[test]
    fn test_builders() {
        let config = Config::default()
            .with_request_timeout(Duration::from_millis(250))
            .with_max_call_path(4);
        assert_eq!(config.request_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.max_call_path, 4);
    }
}
