// Plain HTTP transport and resource access, e.g. against `kubectl proxy`
use super::USER_AGENT;
use super::access::{QueryParams, ResourceAccess, ResourceListing, inject_self_link};
use super::resource_meta::{ResourceMeta, UriOptions};
use super::transport::{WatchRequest, WatchResponse, WatchTransport};
use crate::error::Result;
use crate::watch::request::resolve_url;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::debug;

/// Watch transport and resource access over reqwest, with no auth of its own.
/// Headers in the request options (e.g. `Authorization`) are passed through.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::with_client(client, base_url))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl WatchTransport for HttpApi {
    fn base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }

    async fn open(&self, request: &WatchRequest) -> Result<WatchResponse> {
        let mut builder = self.client.get(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes_stream().map_err(std::io::Error::other).boxed();
        Ok(WatchResponse { status, body })
    }
}

#[async_trait]
impl ResourceAccess for HttpApi {
    async fn get_resource(&self, resource: &ResourceMeta, query: &QueryParams) -> Result<ResourceListing> {
        let config = resource.api_config();
        let base = config.base_url.as_deref().unwrap_or(&self.base_url);
        let mut qs = config.qs.clone();
        qs.extend(query.iter().map(|(k, v)| (k.clone(), v.clone())));
        let url = resolve_url(base, &resource.uri(&UriOptions::default()), &qs)?;
        debug!("Request GET {url}");

        let mut builder = self.client.get(url).header("Accept", "application/json");
        for (name, value) in &config.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if status == 200 {
            let mut object = body;
            inject_self_link(&mut object, resource);
            Ok(ResourceListing {
                resource: resource.clone(),
                status,
                object: Some(object),
                error: None,
            })
        } else {
            Ok(ResourceListing {
                resource: resource.clone(),
                status,
                object: None,
                error: Some(body),
            })
        }
    }
}
