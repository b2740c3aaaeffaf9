use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::Url;
use std::collections::BTreeMap;

/// A fully resolved streaming GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    pub url: Url,
    pub headers: BTreeMap<String, String>,
}

/// Response to a watch request: the initial status and the raw body chunks
pub struct WatchResponse {
    pub status: u16,
    pub body: BoxStream<'static, std::io::Result<Bytes>>,
}

impl std::fmt::Debug for WatchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Opens long-lived watch connections.
///
/// Dropping the returned body closes the underlying connection.
#[async_trait]
pub trait WatchTransport: Send + Sync + 'static {
    /// Base url used when the watch options do not name one
    fn base_url(&self) -> Option<String> {
        None
    }

    /// Issue the streaming GET.
    ///
    /// A non-200 answer is returned as a response, not as an error; errors are
    /// reserved for failures to reach the server at all.
    async fn open(&self, request: &WatchRequest) -> Result<WatchResponse>;
}
