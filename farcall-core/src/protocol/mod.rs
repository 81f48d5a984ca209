// Transparent remote objects over message endpoints.
// A Proxy records a call path and turns terminal operations into requests;
// an Exposure answers those requests against a local root value.

mod correlation;
mod exposer;
mod marshal;
mod portal;
mod proxy;
mod registry;

pub use exposer::{expose, Exposure};
pub use portal::{Portal, PublishOptions};
pub use proxy::{BoundMethod, Proxy, RemoteFuture, BIND_MARKER};
pub use registry::SubEndpoints;
