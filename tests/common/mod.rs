#![allow(dead_code)]
//! Scripted collaborators shared by the integration tests
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResource;
use kube_watchman::error::Result;
use kube_watchman::k8s::{
    Controller, ControllerContext, QueryParams, ResourceAccess, ResourceListing, ResourceMeta,
    WatchRequest, WatchResponse, WatchTransport,
};
use kube_watchman::watch::{RequestOptions, WatchEvent};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_stream::wrappers::UnboundedReceiverStream;

pub const BASE_URL: &str = "https://localhost:32263";

/// How the transport answers one `open`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Answer with this status and an empty body
    Status(u16),
    /// Fail before any response
    Refuse,
    /// Answer 200 with a body the test feeds through [`ScriptedTransport::send`]
    Stream,
}

/// Transport that replays a script of replies, then repeats `fallback`
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    opens: Mutex<Vec<Instant>>,
    streams: Mutex<Vec<Option<mpsc::UnboundedSender<io::Result<Bytes>>>>>,
}

impl ScriptedTransport {
    pub fn new(fallback: Reply, script: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            opens: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
        })
    }

    /// When each `open` happened
    pub fn opens(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    /// Number of streaming (200) responses handed out so far
    pub fn stream_count(&self) -> usize {
        self.streams.lock().unwrap().len()
    }

    /// Push raw body bytes into stream `idx`; ignored once the reader is gone
    pub fn send(&self, idx: usize, payload: &str) {
        if let Some(Some(tx)) = self.streams.lock().unwrap().get(idx) {
            let _ = tx.send(Ok(Bytes::from(payload.to_string())));
        }
    }

    pub fn send_event(&self, idx: usize, event_type: &str, object: &Value) {
        self.send(idx, &format!("{}\n", json!({"type": event_type, "object": object})));
    }

    /// End stream `idx` cleanly, as a server-side watch timeout would
    pub fn close(&self, idx: usize) {
        if let Some(slot) = self.streams.lock().unwrap().get_mut(idx) {
            slot.take();
        }
    }
}

#[async_trait]
impl WatchTransport for ScriptedTransport {
    fn base_url(&self) -> Option<String> {
        Some(BASE_URL.to_string())
    }

    async fn open(&self, _request: &WatchRequest) -> Result<WatchResponse> {
        self.opens.lock().unwrap().push(Instant::now());
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        match reply {
            Reply::Status(status) => Ok(WatchResponse {
                status,
                body: futures::stream::empty().boxed(),
            }),
            Reply::Refuse => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into()),
            Reply::Stream => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.streams.lock().unwrap().push(Some(tx));
                Ok(WatchResponse {
                    status: 200,
                    body: UnboundedReceiverStream::new(rx).boxed(),
                })
            }
        }
    }
}

/// Serves `total` configmaps, `limit` per page, with numeric continue tokens
pub struct PagedAccess {
    total: usize,
    calls: Mutex<Vec<QueryParams>>,
}

impl PagedAccess {
    pub fn new(total: usize) -> Arc<Self> {
        Arc::new(Self {
            total,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<QueryParams> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceAccess for PagedAccess {
    async fn get_resource(&self, resource: &ResourceMeta, query: &QueryParams) -> Result<ResourceListing> {
        self.calls.lock().unwrap().push(query.clone());
        let start: usize = query.get("continue").map_or(0, |c| c.parse().unwrap());
        let limit: usize = query.get("limit").map_or(self.total, |l| l.parse().unwrap());
        let end = (start + limit).min(self.total);
        let items: Vec<Value> = (start..end)
            .map(|i| json!({"metadata": {"name": format!("cm-{i}"), "namespace": "default"}}))
            .collect();
        let continue_token = if end < self.total { end.to_string() } else { String::new() };
        Ok(ResourceListing {
            resource: resource.clone(),
            status: 200,
            object: Some(json!({"metadata": {"continue": continue_token}, "items": items})),
            error: None,
        })
    }
}

/// Controller that records the event it was built for
pub struct Recorder {
    context: ControllerContext,
    seen: Arc<Mutex<Vec<ControllerContext>>>,
}

#[async_trait]
impl Controller for Recorder {
    async fn execute(&mut self) {
        self.seen.lock().unwrap().push(self.context.clone());
    }
}

/// Factory closure producing [`Recorder`]s plus the shared log they write to
pub fn recording_factory() -> (
    impl Fn(ControllerContext) -> Recorder + Send + Sync + 'static,
    Arc<Mutex<Vec<ControllerContext>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let factory = move |context: ControllerContext| Recorder {
        context,
        seen: log.clone(),
    };
    (factory, seen)
}

pub fn configmaps(verbs: &[&str]) -> ResourceMeta {
    ResourceMeta::new(
        "/api/v1",
        APIResource {
            name: "configmaps".to_string(),
            singular_name: "configmap".to_string(),
            kind: "ConfigMap".to_string(),
            namespaced: true,
            verbs: verbs.iter().map(ToString::to_string).collect(),
            ..APIResource::default()
        },
        RequestOptions::default(),
    )
}

/// Collect every event a handler receives
pub fn collector() -> (impl Fn(WatchEvent) + Send + Sync + 'static, Arc<Mutex<Vec<WatchEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    (move |event: WatchEvent| sink.lock().unwrap().push(event), events)
}

/// Yield (advancing paused time in 1ms steps) until `cond` holds
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..20_000 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
