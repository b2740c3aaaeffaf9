//! Resilient watch sessions against a Kubernetes-style API server.
//!
//! A [`Watchman`] keeps one streaming watch alive, a [`WatchManager`] keeps
//! many of them keyed by uri, and an [`EventHandler`] turns a watched resource
//! into controller runs with liveness reporting and periodic re-listing.
pub mod error;
pub mod k8s;
pub mod watch;

pub use error::{Error, Result};
pub use k8s::{
    Controller, ControllerContext, ControllerFactory, HttpApi, KubeApi, ResourceAccess, ResourceMeta,
    WatchTransport,
};
pub use watch::{
    EventHandler, EventHandlerConfig, EventHandlerParams, EventType, RequestOptions, WatchEvent,
    WatchManager, WatchOptions, Watchman,
};
