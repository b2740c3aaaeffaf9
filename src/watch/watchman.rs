/**
 * Watchman: one resilient watch connection
 *
 * Owns a single streaming GET against a watch uri, decodes the body into
 * events and hands them to the object handler in arrival order. Connection
 * errors reconnect after `errors * 1s`; a clean close reconnects at once when
 * the session's rewatch policy is on.
 */
use super::config::BACKOFF_STEP_MS;
use super::event::{JsonStreamDecoder, WatchEvent};
use super::request::{RequestOptions, resolve_url};
use crate::error::{Error, Result};
use crate::k8s::USER_AGENT;
use crate::k8s::transport::{WatchRequest, WatchTransport};
use futures::StreamExt;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Callback receiving every non-error event of a session
pub type ObjectHandler = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// Construction options for a [`Watchman`]
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// `uri` must name a watch path; `baseUrl` falls back to the transport's
    pub request_options: RequestOptions,
    /// Reconnect immediately after the server closes the stream
    pub rewatch_on_timeout: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            request_options: RequestOptions::default(),
            rewatch_on_timeout: true,
        }
    }
}

impl WatchOptions {
    #[must_use]
    pub fn new(request_options: RequestOptions) -> Self {
        Self {
            request_options,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn rewatch_on_timeout(mut self, rewatch: bool) -> Self {
        self.rewatch_on_timeout = rewatch;
        self
    }
}

/// Where a session currently is in its connect / stream / retry cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Idle,
    Connecting,
    Streaming,
    BackingOff,
    Ended,
}

#[derive(Debug, thiserror::Error)]
enum ConnectionFailure {
    #[error("returned {0}")]
    Status(u16),
    #[error("errored: {0}")]
    Transport(#[source] Error),
    #[error("errored at data.type === ERROR, aborting: {0}")]
    ErrorEvent(Value),
    #[error("errored while parsing, aborting: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("closed in the middle of a value")]
    Truncated,
}

#[derive(Debug)]
struct SessionState {
    phase: WatchPhase,
    errors: u32,
    error: bool,
    watching: bool,
    watch_start: Option<Instant>,
    rewatch_on_timeout: bool,
    /// Bumped whenever the current connection is released; stale tasks compare against it
    generation: u64,
    connection: Option<CancellationToken>,
    retry: Option<CancellationToken>,
}

impl SessionState {
    /// Drop the live connection (and optionally a pending retry).
    /// Returns whether a stream had been established.
    fn release(&mut self, cancel_retry: bool) -> bool {
        let was_streaming = self.phase == WatchPhase::Streaming;
        if let Some(connection) = self.connection.take() {
            connection.cancel();
        }
        if cancel_retry {
            if let Some(retry) = self.retry.take() {
                retry.cancel();
            }
        }
        self.generation += 1;
        self.watching = false;
        was_streaming
    }

    /// Bookkeeping for a stream that went away; true when it should be re-established
    fn close(&mut self) -> bool {
        if !self.error {
            self.errors = 0;
        }
        self.rewatch_on_timeout && self.errors == 0
    }
}

struct Inner {
    self_link: String,
    request: WatchRequest,
    transport: Arc<dyn WatchTransport>,
    handler: ObjectHandler,
    state: Mutex<SessionState>,
}

/// Handle to one watch session. Clones share the session.
#[derive(Clone)]
pub struct Watchman {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Watchman {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchman")
            .field("self_link", &self.inner.self_link)
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

impl Watchman {
    /// Create a session; nothing is opened until [`watch`](Self::watch).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidWatchUri` if the uri is missing, does not contain
    /// a watch segment, or does not resolve to an absolute http(s) url.
    pub fn new<H>(options: WatchOptions, transport: Arc<dyn WatchTransport>, handler: H) -> Result<Self>
    where
        H: Fn(WatchEvent) + Send + Sync + 'static,
    {
        Self::with_handler(options, transport, Arc::new(handler))
    }

    /// Same as [`new`](Self::new) with an already shared handler
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_handler(
        options: WatchOptions,
        transport: Arc<dyn WatchTransport>,
        handler: ObjectHandler,
    ) -> Result<Self> {
        let request_options = RequestOptions::default()
            .header("User-Agent", USER_AGENT)
            .merge(&options.request_options);
        let uri = request_options.uri.clone().unwrap_or_default();
        let base = request_options
            .base_url
            .clone()
            .or_else(|| transport.base_url())
            .unwrap_or_default();
        if !uri.contains("watch") {
            return Err(Error::InvalidWatchUri(format!("{base}{uri}")));
        }
        let url = resolve_url(&base, &uri, &request_options.qs)?;

        Ok(Self {
            inner: Arc::new(Inner {
                self_link: uri,
                request: WatchRequest {
                    url,
                    headers: request_options.headers,
                },
                transport,
                handler,
                state: Mutex::new(SessionState {
                    phase: WatchPhase::Idle,
                    errors: 0,
                    error: false,
                    watching: false,
                    watch_start: None,
                    rewatch_on_timeout: options.rewatch_on_timeout,
                    generation: 0,
                    connection: None,
                    retry: None,
                }),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The watch uri this session was built for; registry key
    #[must_use]
    pub fn self_link(&self) -> &str {
        &self.inner.self_link
    }

    #[must_use]
    pub fn request(&self) -> &WatchRequest {
        &self.inner.request
    }

    #[must_use]
    pub fn watching(&self) -> bool {
        self.state().watching
    }

    /// When the last successful (HTTP 200) connect happened
    #[must_use]
    pub fn watch_start(&self) -> Option<Instant> {
        self.state().watch_start
    }

    #[must_use]
    pub fn phase(&self) -> WatchPhase {
        self.state().phase
    }

    /// Consecutive connection errors since the last clean close
    #[must_use]
    pub fn error_count(&self) -> u32 {
        self.state().errors
    }

    #[must_use]
    pub fn rewatch_on_timeout(&self) -> bool {
        self.state().rewatch_on_timeout
    }

    /// End any current connection and open a fresh one.
    ///
    /// The connection runs on a spawned task, so this must be called from
    /// within a Tokio runtime.
    pub fn watch(&self) {
        debug!("Watchman: initializing watch {}", self.self_link());
        let (generation, token) = {
            let mut state = self.state();
            state.release(true);
            let token = CancellationToken::new();
            state.connection = Some(token.clone());
            state.phase = WatchPhase::Connecting;
            (state.generation, token)
        };

        let session = self.clone();
        tokio::spawn(async move {
            session.run_connection(generation, token).await;
        });
    }

    /// Tear down the current stream.
    ///
    /// `rewatch_on_timeout` becomes the session's policy: with `false` a pending
    /// reconnect is cancelled too, with `true` an established stream is
    /// re-opened straight away as if the server had closed it.
    pub fn end(&self, rewatch_on_timeout: bool) {
        debug!("Watchman: ending previous watch {}", self.self_link());
        let reconnect = {
            let mut state = self.state();
            state.rewatch_on_timeout = rewatch_on_timeout;
            let was_streaming = state.release(!rewatch_on_timeout);
            if state.retry.is_none() {
                state.phase = WatchPhase::Ended;
            }
            was_streaming && state.close()
        };
        if reconnect {
            self.watch();
        }
    }

    async fn run_connection(self, generation: u64, token: CancellationToken) {
        debug!("Watchman: attempting new watch {}", self.self_link());
        let opened = tokio::select! {
            () = token.cancelled() => return,
            opened = self.inner.transport.open(&self.inner.request) => opened,
        };
        let response = match opened {
            Ok(response) if response.status == 200 => response,
            Ok(response) => {
                self.fail(generation, ConnectionFailure::Status(response.status));
                return;
            }
            Err(e) => {
                self.fail(generation, ConnectionFailure::Transport(e));
                return;
            }
        };
        if !self.connected(generation) {
            return;
        }

        let mut body = response.body;
        let mut decoder = JsonStreamDecoder::new();
        loop {
            let chunk = tokio::select! {
                () = token.cancelled() => return,
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    decoder.push(&bytes);
                    if let Err(failure) = self.deliver(&mut decoder, &token) {
                        self.fail(generation, failure);
                        return;
                    }
                }
                Some(Err(e)) => {
                    self.fail(generation, ConnectionFailure::Transport(e.into()));
                    return;
                }
                None => {
                    decoder.finish();
                    if let Err(failure) = self.deliver(&mut decoder, &token) {
                        self.fail(generation, failure);
                    } else if decoder.has_partial() {
                        self.fail(generation, ConnectionFailure::Truncated);
                    } else {
                        self.closed(generation);
                    }
                    return;
                }
            }
        }
    }

    /// Hand every complete event in `decoder` to the object handler
    fn deliver(
        &self,
        decoder: &mut JsonStreamDecoder,
        token: &CancellationToken,
    ) -> core::result::Result<(), ConnectionFailure> {
        while let Some(event) = decoder.next_event().map_err(ConnectionFailure::Malformed)? {
            if event.is_error() {
                return Err(ConnectionFailure::ErrorEvent(event.object));
            }
            if token.is_cancelled() {
                break;
            }
            (self.inner.handler)(event);
        }
        Ok(())
    }

    /// Record a 200 connect; false when the connection was superseded meanwhile
    fn connected(&self, generation: u64) -> bool {
        let mut state = self.state();
        if state.generation != generation {
            return false;
        }
        state.phase = WatchPhase::Streaming;
        state.watching = true;
        state.watch_start = Some(Instant::now());
        state.error = false;
        debug!("Watchman: watch started {}", self.self_link());
        true
    }

    fn fail(&self, generation: u64, failure: ConnectionFailure) {
        let retry = {
            let mut state = self.state();
            if state.generation != generation {
                debug!("Watchman: ignoring failure of superseded connection: {failure}");
                return;
            }
            state.errors += 1;
            state.error = true;
            state.release(true);
            if state.rewatch_on_timeout {
                let delay = Duration::from_millis(u64::from(state.errors) * BACKOFF_STEP_MS);
                let token = CancellationToken::new();
                state.retry = Some(token.clone());
                state.phase = WatchPhase::BackingOff;
                Some((delay, token))
            } else {
                state.phase = WatchPhase::Ended;
                None
            }
        };

        let Some((delay, token)) = retry else {
            error!("❌ GET {} {failure}", self.self_link());
            return;
        };
        error!(
            "❌ GET {} {failure}, retrying in {}ms",
            self.self_link(),
            delay.as_millis()
        );

        let session = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = sleep(delay) => session.retry_elapsed(&token),
            }
        });
    }

    fn retry_elapsed(&self, token: &CancellationToken) {
        let rewatch = {
            let mut state = self.state();
            // cancellation happens under this lock, so this check is final
            if token.is_cancelled() {
                return;
            }
            state.retry = None;
            state.rewatch_on_timeout
        };
        if rewatch {
            self.watch();
        }
    }

    fn closed(&self, generation: u64) {
        let rewatch = {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            state.connection = None;
            state.watching = false;
            state.phase = WatchPhase::Idle;
            let rewatch = state.close();
            info!(
                "GET {} closed. rewatchOnTimeout: {}, errors: {}",
                self.self_link(),
                state.rewatch_on_timeout,
                state.errors
            );
            rewatch
        };
        if rewatch {
            self.watch();
        }
    }
}
