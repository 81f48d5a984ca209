pub mod config;
pub mod logging;
pub mod worker;

pub use config::WorkerConfig;
pub use logging::{init_logging, init_test_logging};
pub use worker::Worker;

// Re-export the protocol so worker users need a single dependency
pub use farcall_core::{
    expose, proxy_value, Config, ErrorCode, Exposure, Proxy, RpcError, RpcTarget, Value,
};
