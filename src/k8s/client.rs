// Kubernetes-backed transport and resource access on top of a kube 2.x client
use super::access::{QueryParams, ResourceAccess, ResourceListing, inject_self_link};
use super::resource_meta::{ResourceMeta, UriOptions};
use super::transport::{WatchRequest, WatchResponse, WatchTransport};
use crate::error::{Error, Result};
use crate::watch::request::{path_and_query, resolve_url};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{AsyncBufReadExt, StreamExt};
use hyper::http::{HeaderName, HeaderValue, Request};
use kube::{Client, Config};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

/// Add `custom_user_agent` to every request made with `config`.
/// Invalid header values are logged and skipped.
pub fn add_user_agent_header(config: &mut Config, custom_user_agent: Option<&str>) {
    if let Some(user_agent) = custom_user_agent {
        match HeaderValue::from_str(user_agent) {
            Ok(header_value) => config
                .headers
                .push((HeaderName::from_static("user-agent"), header_value)),
            Err(e) => warn!("Ignoring invalid user agent {user_agent:?}: {e}"),
        }
    }
}

/// Watch transport and resource access through an authenticated kube client
#[derive(Clone)]
pub struct KubeApi {
    client: Client,
    cluster_url: String,
}

impl std::fmt::Debug for KubeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeApi")
            .field("cluster_url", &self.cluster_url)
            .finish_non_exhaustive()
    }
}

impl KubeApi {
    #[must_use]
    pub fn new(client: Client, cluster_url: impl Into<String>) -> Self {
        Self {
            client,
            cluster_url: cluster_url.into(),
        }
    }

    /// Connect using the inferred kube config (kubeconfig or in-cluster)
    ///
    /// # Errors
    ///
    /// Will return `Err` if no configuration can be inferred or the client
    /// cannot be built from it
    pub async fn infer(custom_user_agent: Option<&str>) -> Result<Self> {
        let mut config = Config::infer().await?;
        add_user_agent_header(&mut config, custom_user_agent);
        let cluster_url = config.cluster_url.to_string();
        let client = Client::try_from(config)?;
        Ok(Self::new(client, cluster_url))
    }

    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

fn build_request(path: String, headers: &BTreeMap<String, String>) -> Result<Request<Vec<u8>>> {
    let mut builder = Request::get(path);
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    Ok(builder.body(Vec::new())?)
}

#[async_trait]
impl WatchTransport for KubeApi {
    fn base_url(&self) -> Option<String> {
        Some(self.cluster_url.clone())
    }

    async fn open(&self, request: &WatchRequest) -> Result<WatchResponse> {
        let http_request = build_request(path_and_query(&request.url), &request.headers)?;
        let client = self.client.clone();
        let (status_tx, status_rx) = oneshot::channel::<Result<u16>>();
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();

        // The kube reader borrows its client, so it lives in its own task and
        // forwards lines until the consumer drops the body.
        tokio::spawn(async move {
            let reader = match client.request_stream(http_request).await {
                Ok(reader) => {
                    let _ = status_tx.send(Ok(200));
                    reader
                }
                Err(kube::Error::Api(response)) => {
                    let _ = status_tx.send(Ok(response.code));
                    return;
                }
                Err(e) => {
                    let _ = status_tx.send(Err(e.into()));
                    return;
                }
            };
            let mut lines = std::pin::pin!(reader.lines());
            loop {
                tokio::select! {
                    () = chunk_tx.closed() => break,
                    line = lines.next() => match line {
                        Some(Ok(line)) => {
                            let mut bytes = line.into_bytes();
                            bytes.push(b'\n');
                            if chunk_tx.send(Ok(Bytes::from(bytes))).is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            let _ = chunk_tx.send(Err(e));
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!("kube watch reader finished");
        });

        let status = status_rx
            .await
            .map_err(|_| Error::Custom("watch reader stopped before the server answered".to_string()))??;
        Ok(WatchResponse {
            status,
            body: UnboundedReceiverStream::new(chunk_rx).boxed(),
        })
    }
}

#[async_trait]
impl ResourceAccess for KubeApi {
    async fn get_resource(&self, resource: &ResourceMeta, query: &QueryParams) -> Result<ResourceListing> {
        let mut qs = resource.api_config().qs.clone();
        qs.extend(query.iter().map(|(k, v)| (k.clone(), v.clone())));
        let url = resolve_url(&self.cluster_url, &resource.uri(&UriOptions::default()), &qs)?;
        let request = build_request(path_and_query(&url), &resource.api_config().headers)?;
        debug!("Request GET {}", url.path());

        match self.client.request::<Value>(request).await {
            Ok(mut object) => {
                inject_self_link(&mut object, resource);
                Ok(ResourceListing {
                    resource: resource.clone(),
                    status: 200,
                    object: Some(object),
                    error: None,
                })
            }
            Err(kube::Error::Api(response)) => Ok(ResourceListing {
                resource: resource.clone(),
                status: response.code,
                object: None,
                error: Some(serde_json::to_value(&response)?),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
