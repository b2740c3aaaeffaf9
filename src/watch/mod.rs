pub mod config;
pub mod event;
pub mod event_handler;
pub mod liveness;
pub mod request;
pub mod watch_manager;
pub mod watchman;

pub use config::{EventHandlerConfig, LivenessInterval};
pub use event::{EventType, JsonStreamDecoder, WatchEvent};
pub use event_handler::{EventHandler, EventHandlerParams};
pub use request::RequestOptions;
pub use watch_manager::{WatchEntry, WatchManager};
pub use watchman::{ObjectHandler, WatchOptions, WatchPhase, Watchman};
