mod common;

use common::{PagedAccess, Reply, ScriptedTransport, configmaps, recording_factory, wait_for};
use kube_watchman::Error;
use kube_watchman::watch::{
    EventHandler, EventHandlerConfig, EventHandlerParams, EventType, LivenessInterval,
    RequestOptions, WatchPhase,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until};

fn handler_with(
    transport: Arc<ScriptedTransport>,
    access: Arc<PagedAccess>,
    config: EventHandlerConfig,
) -> (EventHandler, Arc<std::sync::Mutex<Vec<kube_watchman::ControllerContext>>>) {
    let (factory, seen) = recording_factory();
    let handler = EventHandler::new(EventHandlerParams {
        resource: configmaps(&["list", "watch"]),
        access,
        factory: Arc::new(factory),
        transport,
        config,
    })
    .unwrap();
    (handler, seen)
}

#[tokio::test(start_paused = true)]
async fn test_streamed_event_runs_one_controller() {
    let transport = ScriptedTransport::new(Reply::Stream, []);
    let config = EventHandlerConfig {
        finalizer_string: Some("example.com/cleanup".to_string()),
        ..EventHandlerConfig::default()
    };
    let (handler, seen) = handler_with(transport.clone(), PagedAccess::new(0), config);
    wait_for(|| handler.watchman().watching()).await;

    let object = json!({"metadata": {"name": "settings", "namespace": "default"}, "data": {"a": "1"}});
    transport.send_event(0, "ADDED", &object);
    wait_for(|| !seen.lock().unwrap().is_empty()).await;
    sleep(Duration::from_millis(50)).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].event.event_type, EventType::Added);
    assert_eq!(seen[0].event.object, object);
    assert_eq!(seen[0].resource.name(), "configmaps");
    assert_eq!(seen[0].finalizer.as_deref(), Some("example.com/cleanup"));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_pages_through_collection() {
    let transport = ScriptedTransport::new(Reply::Stream, []);
    let access = PagedAccess::new(1200);
    let (handler, seen) = handler_with(transport, access.clone(), EventHandlerConfig::default());

    let dispatched = handler.sweep().await.unwrap();
    assert_eq!(dispatched, 1200);

    let calls = access.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|q| q["limit"] == "500"));
    assert!(!calls[0].contains_key("continue"));
    assert_eq!(calls[1]["continue"], "500");
    assert_eq!(calls[2]["continue"], "1000");

    wait_for(|| seen.lock().unwrap().len() == 1200).await;
    assert!(
        seen.lock()
            .unwrap()
            .iter()
            .all(|ctx| ctx.event.event_type == EventType::Polled)
    );
}

#[tokio::test(start_paused = true)]
async fn test_enforcement_loop_skips_immediate_sweep() {
    let transport = ScriptedTransport::new(Reply::Stream, []);
    let access = PagedAccess::new(3);
    let config = EventHandlerConfig {
        enforcement_interval: 30,
        ..EventHandlerConfig::default()
    };
    let start = Instant::now();
    let (_handler, seen) = handler_with(transport, access.clone(), config);

    sleep_until(start + Duration::from_secs(29)).await;
    assert!(access.calls().is_empty());

    sleep_until(start + Duration::from_secs(31)).await;
    assert_eq!(access.calls().len(), 1);
    wait_for(|| seen.lock().unwrap().len() == 3).await;
}

#[tokio::test(start_paused = true)]
async fn test_namespace_scopes_watch_and_sweep() {
    let transport = ScriptedTransport::new(Reply::Stream, []);
    let access = PagedAccess::new(1);
    let config = EventHandlerConfig {
        namespace: Some("team-a".to_string()),
        ..EventHandlerConfig::default()
    };
    let (handler, _seen) = handler_with(transport, access.clone(), config);

    assert_eq!(
        handler.watchman().self_link(),
        "/api/v1/watch/namespaces/team-a/configmaps"
    );
    handler.sweep().await.unwrap();
    assert_eq!(
        access.calls()[0]["fieldSelector"],
        "metadata.namespace=team-a"
    );
}

#[tokio::test(start_paused = true)]
async fn test_sweep_inherits_configured_selectors() {
    let transport = ScriptedTransport::new(Reply::Stream, []);
    let access = PagedAccess::new(1);
    let config = EventHandlerConfig {
        request_options: RequestOptions::default()
            .query("labelSelector", "app=web")
            .query("timeoutSeconds", "60"),
        ..EventHandlerConfig::default()
    };
    let (handler, _seen) = handler_with(transport, access.clone(), config);
    assert_eq!(handler.watchman().request().qs["labelSelector"], "app=web");

    handler.sweep().await.unwrap();
    let query = &access.calls()[0];
    assert_eq!(query["labelSelector"], "app=web");
    assert_eq!(query["limit"], "500");
    assert!(!query.contains_key("fieldSelector"));
    assert!(!query.contains_key("timeoutSeconds"));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_joins_field_selector_with_namespace() {
    let transport = ScriptedTransport::new(Reply::Stream, []);
    let access = PagedAccess::new(1);
    let config = EventHandlerConfig {
        namespace: Some("team-a".to_string()),
        request_options: RequestOptions::default().query("fieldSelector", "metadata.name=settings"),
        ..EventHandlerConfig::default()
    };
    let (handler, _seen) = handler_with(transport, access.clone(), config);

    handler.sweep().await.unwrap();
    assert_eq!(
        access.calls()[0]["fieldSelector"],
        "metadata.name=settings,metadata.namespace=team-a"
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_uses_default_threshold() {
    let transport = ScriptedTransport::new(Reply::Stream, []);
    let config = EventHandlerConfig {
        request_options: RequestOptions::default().query("timeoutSeconds", "0"),
        ..EventHandlerConfig::default()
    };
    let start = Instant::now();
    let (handler, _seen) = handler_with(transport.clone(), PagedAccess::new(0), config);
    assert_eq!(handler.timeout_threshold(), Duration::from_secs(300));
    wait_for(|| handler.watchman().watching()).await;

    // checks run every 300s; the one at 600s finds the stream stalled
    sleep_until(start + Duration::from_secs(599)).await;
    assert_eq!(transport.open_count(), 1);
    sleep_until(start + Duration::from_secs(601)).await;
    wait_for(|| transport.stream_count() == 2 && handler.watchman().watching()).await;
}

#[tokio::test(start_paused = true)]
async fn test_liveness_skips_touch_while_backing_off() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("liveness");
    let transport = ScriptedTransport::new(Reply::Status(500), []);
    let config = EventHandlerConfig {
        liveness_interval: LivenessInterval::Millis(5_000),
        liveness_path: marker.clone(),
        ..EventHandlerConfig::default()
    };
    let start = Instant::now();
    let (handler, _seen) = handler_with(transport.clone(), PagedAccess::new(0), config);
    assert!(marker.exists());
    wait_for(|| handler.watchman().phase() == WatchPhase::BackingOff).await;

    // well inside the stall limit, but the session never connected
    std::fs::remove_file(&marker).unwrap();
    sleep_until(start + Duration::from_secs(11)).await;
    assert!(!marker.exists());
    assert!(!handler.watchman().watching());
    assert!(handler.watchman().error_count() >= 2);
    assert!(transport.open_count() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_liveness_follows_stream_health() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("liveness");
    let transport = ScriptedTransport::new(Reply::Stream, []);
    let config = EventHandlerConfig {
        liveness_interval: LivenessInterval::Millis(5_000),
        liveness_path: marker.clone(),
        request_options: RequestOptions::default().query("timeoutSeconds", "30"),
        ..EventHandlerConfig::default()
    };
    let start = Instant::now();
    let (handler, _seen) = handler_with(transport.clone(), PagedAccess::new(0), config);
    assert_eq!(handler.timeout_threshold(), Duration::from_secs(30));
    assert!(marker.exists());
    wait_for(|| handler.watchman().watching()).await;

    // healthy stream: every tick touches
    std::fs::remove_file(&marker).unwrap();
    sleep_until(start + Duration::from_secs(6)).await;
    assert!(marker.exists());

    // no reconnect for longer than timeout + grace: ticks skip
    sleep_until(start + Duration::from_secs(41)).await;
    std::fs::remove_file(&marker).unwrap();
    sleep_until(start + Duration::from_secs(47)).await;
    assert!(!marker.exists());
    assert_eq!(transport.open_count(), 1);

    // the preemption check at 2x timeout forces a new connection
    sleep_until(start + Duration::from_secs(61)).await;
    assert_eq!(transport.stream_count(), 2);
    assert!(handler.watchman().watching());
    sleep_until(start + Duration::from_secs(66)).await;
    assert!(marker.exists());
}

#[tokio::test(start_paused = true)]
async fn test_preemption_reconnects_stalled_stream() {
    let transport = ScriptedTransport::new(Reply::Stream, [Reply::Status(403)]);
    let options = RequestOptions::default()
        .query("timeoutSeconds", "20")
        .header("X-Trace", "1");
    let config = EventHandlerConfig {
        request_options: options,
        ..EventHandlerConfig::default()
    };
    let start = Instant::now();
    let (handler, _seen) = handler_with(transport.clone(), PagedAccess::new(0), config);
    wait_for(|| handler.watchman().phase() == WatchPhase::BackingOff).await;
    assert_eq!(handler.watchman().request().headers["X-Trace"], "1");

    // the retry after 1s succeeds and keeps the stream open
    sleep_until(start + Duration::from_secs(2)).await;
    assert!(handler.watchman().watching());
    assert_eq!(transport.open_count(), 2);

    // first check at 20s sees a fresh stream, the one at 40s a stalled one
    sleep_until(start + Duration::from_secs(39)).await;
    assert_eq!(transport.open_count(), 2);
    sleep_until(start + Duration::from_secs(41)).await;
    assert_eq!(transport.open_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_watch_and_timers() {
    let transport = ScriptedTransport::new(Reply::Stream, []);
    let access = PagedAccess::new(2);
    let config = EventHandlerConfig {
        enforcement_interval: 10,
        ..EventHandlerConfig::default()
    };
    let (mut handler, _seen) = handler_with(transport.clone(), access.clone(), config);
    wait_for(|| handler.watchman().watching()).await;
    let watchman = handler.watchman().clone();

    handler.shutdown();
    handler.shutdown();
    assert!(!watchman.watching());
    assert_eq!(watchman.phase(), WatchPhase::Ended);

    sleep(Duration::from_secs(60)).await;
    assert!(access.calls().is_empty());
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test]
async fn test_resource_without_watch_verb_is_rejected() {
    let (factory, _seen) = recording_factory();
    let err = EventHandler::new(EventHandlerParams {
        resource: configmaps(&["list"]),
        access: PagedAccess::new(0),
        factory: Arc::new(factory),
        transport: ScriptedTransport::new(Reply::Stream, []),
        config: EventHandlerConfig::default(),
    })
    .unwrap_err();
    assert!(matches!(err, Error::VerbNotSupported { ref verb, .. } if verb == "watch"));
    assert_eq!(
        err.to_string(),
        "Resource 'configmaps' does not support verb \"watch\""
    );
}
