/**
 * Event handler: one watched resource wired to a controller factory
 *
 * Runs a Watchman against the resource's watch uri and, next to it, up to
 * three timers: liveness reporting, stalled-stream preemption and the optional
 * enforcement sweep that re-lists the whole collection as POLLED events.
 */
use super::config::{
    DEFAULT_WATCH_TIMEOUT_SECONDS, EventHandlerConfig, FIELD_SELECTOR_PARAM, LABEL_SELECTOR_PARAM,
    SWEEP_PAGE_LIMIT, TIMEOUT_SECONDS_PARAM, WATCH_TIMEOUT_GRACE_MS,
};
use super::event::WatchEvent;
use super::liveness::touch;
use super::request::RequestOptions;
use super::watchman::{WatchOptions, Watchman};
use crate::error::{Error, Result};
use crate::k8s::access::{QueryParams, ResourceAccess};
use crate::k8s::controller::{ControllerContext, ControllerFactory};
use crate::k8s::resource_meta::{ResourceMeta, UriOptions};
use crate::k8s::transport::WatchTransport;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Collaborators and settings for [`EventHandler::new`]
pub struct EventHandlerParams {
    /// Must declare the `watch` verb
    pub resource: ResourceMeta,
    pub access: Arc<dyn ResourceAccess>,
    pub factory: Arc<dyn ControllerFactory>,
    pub transport: Arc<dyn WatchTransport>,
    pub config: EventHandlerConfig,
}

/// Turns events into controller runs
struct Dispatcher {
    resource: ResourceMeta,
    access: Arc<dyn ResourceAccess>,
    factory: Arc<dyn ControllerFactory>,
    finalizer: Option<String>,
    namespace: Option<String>,
    /// Label and field selectors the watch runs with
    selectors: QueryParams,
}

impl Dispatcher {
    /// Build a controller for `event` and run it on its own task; not awaited
    fn dispatch(&self, event: WatchEvent) {
        let span = info_span!(
            "controller",
            resource = %self.resource.name(),
            event = %event.event_type,
            event_id = %Uuid::new_v4(),
        );
        debug!(parent: &span, "dispatching {}", event.object_ref());
        let mut controller = self.factory.create(ControllerContext {
            resource: self.resource.clone(),
            event,
            access: self.access.clone(),
            span: span.clone(),
            finalizer: self.finalizer.clone(),
        });
        tokio::spawn(async move { controller.execute().await }.instrument(span));
    }

    /// Page through the whole collection, dispatching every item as POLLED
    async fn sweep(&self) -> Result<usize> {
        let mut query = self.selectors.clone();
        query.insert("limit".to_string(), SWEEP_PAGE_LIMIT.to_string());
        if let Some(namespace) = self.namespace.as_deref().filter(|_| self.resource.namespaced()) {
            let scope = format!("metadata.namespace={namespace}");
            let selector = match query.get(FIELD_SELECTOR_PARAM) {
                Some(existing) => format!("{existing},{scope}"),
                None => scope,
            };
            query.insert(FIELD_SELECTOR_PARAM.to_string(), selector);
        }
        let resources = [self.resource.clone()];

        let mut cursor = None;
        let mut dispatched = 0;
        loop {
            let page = self
                .access
                .get_resources_paged(&resources, &query, cursor)
                .await?;
            for listing in &page.resources {
                if !listing.is_success() {
                    warn!(
                        "⚠️  Enforcement page for {} returned {}, skipping",
                        listing.resource.name(),
                        listing.status
                    );
                    continue;
                }
                for item in listing.items() {
                    self.dispatch(WatchEvent::polled(item.clone()));
                    dispatched += 1;
                }
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(dispatched)
    }
}

/// Watches one resource and runs a fresh controller for every event
pub struct EventHandler {
    watchman: Watchman,
    dispatcher: Arc<Dispatcher>,
    timeout_threshold: Duration,
    liveness_interval: Option<Duration>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler")
            .field("watchman", &self.watchman)
            .field("timeout_threshold", &self.timeout_threshold)
            .field("liveness_interval", &self.liveness_interval)
            .finish_non_exhaustive()
    }
}

impl EventHandler {
    /// Validate the collaborators, start watching and start the timers.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Error::VerbNotSupported` if the resource cannot be watched and
    /// the `Watchman` construction error if its watch uri is invalid.
    pub fn new(params: EventHandlerParams) -> Result<Self> {
        let EventHandlerParams {
            resource,
            access,
            factory,
            transport,
            config,
        } = params;

        if !resource.has_verb("watch") {
            return Err(Error::VerbNotSupported {
                resource: resource.name().to_string(),
                verb: "watch".to_string(),
            });
        }

        let request_options = resource.api_config().merge(&config.request_options);
        let timeout_seconds = request_options
            .qs
            .get(TIMEOUT_SECONDS_PARAM)
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|seconds| *seconds > 0)
            .unwrap_or(DEFAULT_WATCH_TIMEOUT_SECONDS);
        let timeout_threshold = Duration::from_secs(timeout_seconds);

        let mut uri_options = UriOptions::watch();
        if let Some(namespace) = &config.namespace {
            uri_options = uri_options.namespace(namespace.clone());
        }
        let selectors: QueryParams = request_options
            .qs
            .iter()
            .filter(|(key, _)| [LABEL_SELECTOR_PARAM, FIELD_SELECTOR_PARAM].contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let watch_options = WatchOptions::new(RequestOptions {
            uri: Some(resource.uri(&uri_options)),
            ..request_options
        });

        let dispatcher = Arc::new(Dispatcher {
            resource,
            access,
            factory,
            finalizer: config.finalizer_string.clone(),
            namespace: config.namespace.clone(),
            selectors,
        });
        let handler_dispatcher = dispatcher.clone();
        let watchman = Watchman::new(watch_options, transport, move |event| {
            handler_dispatcher.dispatch(event);
        })?;
        watchman.watch();

        let shutdown = CancellationToken::new();
        let started = Instant::now();
        let liveness_interval = config.liveness_interval.period();
        let mut tasks = Vec::new();

        if let Some(period) = liveness_interval {
            // healthy until proven otherwise
            touch_marker(&config.liveness_path);
            tasks.push(tokio::spawn(liveness_loop(
                watchman.clone(),
                config.liveness_path.clone(),
                period,
                timeout_threshold,
                started,
                shutdown.clone(),
            )));
        }

        tasks.push(tokio::spawn(preemption_loop(
            watchman.clone(),
            timeout_threshold,
            started,
            shutdown.clone(),
        )));

        if let Some(period) = config.enforcement_period() {
            tasks.push(tokio::spawn(enforcement_loop(
                dispatcher.clone(),
                period,
                shutdown.clone(),
            )));
        }

        info!(
            "🔍 Watching {} (timeout {}s, liveness {:?}, enforcement {:?})",
            watchman.self_link(),
            timeout_seconds,
            liveness_interval,
            config.enforcement_period()
        );

        Ok(Self {
            watchman,
            dispatcher,
            timeout_threshold,
            liveness_interval,
            shutdown,
            tasks,
        })
    }

    /// Run a new controller for `event`, exactly as the stream does
    pub fn event_handler(&self, event: WatchEvent) {
        self.dispatcher.dispatch(event);
    }

    /// Run one enforcement pass now; returns how many POLLED events went out.
    ///
    /// # Errors
    ///
    /// Returns the listing error that abandoned the pass.
    pub async fn sweep(&self) -> Result<usize> {
        self.dispatcher.sweep().await
    }

    #[must_use]
    pub const fn watchman(&self) -> &Watchman {
        &self.watchman
    }

    #[must_use]
    pub const fn timeout_threshold(&self) -> Duration {
        self.timeout_threshold
    }

    #[must_use]
    pub const fn liveness_interval(&self) -> Option<Duration> {
        self.liveness_interval
    }

    #[must_use]
    pub fn finalizer(&self) -> Option<&str> {
        self.dispatcher.finalizer.as_deref()
    }

    /// End the watch and stop every timer. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("🛑 Event handler for {} shutting down", self.watchman.self_link());
        self.shutdown.cancel();
        self.watchman.end(false);
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stall_limit(timeout_threshold: Duration) -> Duration {
    timeout_threshold + Duration::from_millis(WATCH_TIMEOUT_GRACE_MS)
}

/// Time since the last successful connect, or since startup if there was none
fn since_connect(watchman: &Watchman, started: Instant) -> Duration {
    watchman.watch_start().unwrap_or(started).elapsed()
}

fn touch_marker(path: &Path) {
    if let Err(e) = touch(path) {
        warn!("⚠️  Failed to touch liveness marker {}: {}", path.display(), e);
    }
}

async fn liveness_loop(
    watchman: Watchman,
    path: PathBuf,
    period: Duration,
    timeout_threshold: Duration,
    started: Instant,
    shutdown: CancellationToken,
) {
    let limit = stall_limit(timeout_threshold);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let elapsed = since_connect(&watchman, started);
        if watchman.watching() && elapsed < limit {
            touch_marker(&path);
        } else {
            debug!(
                "Skipping liveness touch: watching={}, {}s since connect",
                watchman.watching(),
                elapsed.as_secs()
            );
        }
    }
}

async fn preemption_loop(
    watchman: Watchman,
    timeout_threshold: Duration,
    started: Instant,
    shutdown: CancellationToken,
) {
    let limit = stall_limit(timeout_threshold);
    let mut ticker = interval(timeout_threshold);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let elapsed = since_connect(&watchman, started);
        if elapsed > limit {
            warn!(
                "⏰ {} has not reconnected for {}s, forcing a new watch",
                watchman.self_link(),
                elapsed.as_secs()
            );
            watchman.watch();
        }
    }
}

async fn enforcement_loop(dispatcher: Arc<Dispatcher>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            () = shutdown.cancelled() => break,
            result = dispatcher.sweep() => match result {
                Ok(count) => info!("🔄 Enforcement sweep of {} dispatched {} events", dispatcher.resource.name(), count),
                Err(e) => warn!("⚠️  Enforcement sweep of {} failed, retrying next cycle: {}", dispatcher.resource.name(), e),
            },
        }
    }
}
