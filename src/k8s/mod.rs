pub mod access;
pub mod client;
pub mod controller;
pub mod http;
pub mod resource_meta;
pub mod transport;

pub use access::{PageCursor, QueryParams, ResourceAccess, ResourceListing, ResourcePage};
pub use client::KubeApi;
pub use controller::{Controller, ControllerContext, ControllerFactory};
pub use http::HttpApi;
pub use resource_meta::{ResourceMeta, UriOptions};
pub use transport::{WatchRequest, WatchResponse, WatchTransport};

/// Default user agent - automatically uses the package version
///
/// Sent by the HTTP transport and added to inferred kube configs; a
/// `User-Agent` entry in a watch's request options takes precedence.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
