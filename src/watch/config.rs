/**
 * Configuration constants and settings for watch sessions and event handlers
 */
use super::request::RequestOptions;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server-side watch timeout assumed when the request carries no `timeoutSeconds`
pub const DEFAULT_WATCH_TIMEOUT_SECONDS: u64 = 300;

/// Slack allowed past the watch timeout before a connection counts as stalled
pub const WATCH_TIMEOUT_GRACE_MS: u64 = 10_000;

/// Reconnect delay per consecutive connection error (linear, uncapped)
pub const BACKOFF_STEP_MS: u64 = 1_000;

/// Liveness interval used when the setting is just `true`
pub const DEFAULT_LIVENESS_INTERVAL_MS: u64 = 60_000;

/// Page size for enforcement sweeps
pub const SWEEP_PAGE_LIMIT: u32 = 500;

/// Marker file polled by the process supervisor
pub const DEFAULT_LIVENESS_PATH: &str = "/tmp/liveness";

/// Query parameter carrying the server-side watch timeout
pub const TIMEOUT_SECONDS_PARAM: &str = "timeoutSeconds";

pub const LABEL_SELECTOR_PARAM: &str = "labelSelector";
pub const FIELD_SELECTOR_PARAM: &str = "fieldSelector";

/// `livenessInterval` accepts either a boolean or a millisecond count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LivenessInterval {
    Enabled(bool),
    Millis(u64),
}

impl Default for LivenessInterval {
    fn default() -> Self {
        Self::Enabled(false)
    }
}

impl LivenessInterval {
    /// Effective period, `None` when liveness reporting is off
    #[must_use]
    pub const fn period(self) -> Option<Duration> {
        match self {
            Self::Enabled(true) => Some(Duration::from_millis(DEFAULT_LIVENESS_INTERVAL_MS)),
            Self::Enabled(false) | Self::Millis(0) => None,
            Self::Millis(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

/// Settings recognized by [`EventHandler`](super::EventHandler)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventHandlerConfig {
    pub liveness_interval: LivenessInterval,
    /// Seconds between enforcement sweeps; 0 disables polling
    pub enforcement_interval: u64,
    pub finalizer_string: Option<String>,
    /// Merged over the resource's API request options
    pub request_options: RequestOptions,
    /// Restrict the watch to one namespace (namespaced resources only)
    pub namespace: Option<String>,
    pub liveness_path: PathBuf,
}

impl Default for EventHandlerConfig {
    fn default() -> Self {
        Self {
            liveness_interval: LivenessInterval::default(),
            enforcement_interval: 0,
            finalizer_string: None,
            request_options: RequestOptions::default(),
            namespace: None,
            liveness_path: PathBuf::from(DEFAULT_LIVENESS_PATH),
        }
    }
}

impl EventHandlerConfig {
    #[must_use]
    pub const fn enforcement_period(&self) -> Option<Duration> {
        if self.enforcement_interval == 0 {
            None
        } else {
            Some(Duration::from_secs(self.enforcement_interval))
        }
    }
}

const _: () = {
    assert!(DEFAULT_WATCH_TIMEOUT_SECONDS > 0, "DEFAULT_WATCH_TIMEOUT_SECONDS must be greater than 0");
    assert!(BACKOFF_STEP_MS > 0, "BACKOFF_STEP_MS must be greater than 0");
    assert!(DEFAULT_LIVENESS_INTERVAL_MS > 0, "DEFAULT_LIVENESS_INTERVAL_MS must be greater than 0");
    assert!(SWEEP_PAGE_LIMIT > 0, "SWEEP_PAGE_LIMIT must be greater than 0");
};
