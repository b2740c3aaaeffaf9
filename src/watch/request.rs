use crate::error::{Error, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// HTTP options for one API request: where to send it and what to attach.
///
/// Merging follows "later wins" for scalar fields while header and query maps
/// are unioned, so callers can layer overrides on top of API defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    pub base_url: Option<String>,
    pub uri: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// Query string parameters, including label/field selectors
    pub qs: BTreeMap<String, String>,
}

impl RequestOptions {
    #[must_use]
    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.qs.insert(name.into(), value.into());
        self
    }

    /// Layer `overrides` on top of `self`
    #[must_use]
    pub fn merge(&self, overrides: &Self) -> Self {
        let mut merged = self.clone();
        if overrides.base_url.is_some() {
            merged.base_url.clone_from(&overrides.base_url);
        }
        if overrides.uri.is_some() {
            merged.uri.clone_from(&overrides.uri);
        }
        merged
            .headers
            .extend(overrides.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .qs
            .extend(overrides.qs.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Stable fingerprint of the query selector, used to detect changed watches
    #[must_use]
    pub fn selector_hash(&self) -> String {
        selector_hash(&self.qs)
    }
}

/// SHA-256 over the canonical (key-sorted) rendering of a query selector
#[must_use]
pub fn selector_hash(selector: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in selector {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"&");
    }
    format!("{:x}", hasher.finalize())
}

/// Join `base` and `uri` and append the query parameters.
///
/// # Errors
///
/// Returns `Error::InvalidWatchUri` when the joined string is not an absolute
/// http(s) url.
pub fn resolve_url(base: &str, uri: &str, qs: &BTreeMap<String, String>) -> Result<Url> {
    let joined = format!("{}{uri}", base.trim_end_matches('/'));
    let mut url = Url::parse(&joined).map_err(|_| Error::InvalidWatchUri(joined.clone()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::InvalidWatchUri(joined));
    }
    if !qs.is_empty() {
        url.query_pairs_mut().extend_pairs(qs.iter());
    }
    Ok(url)
}

/// Path plus query of `url`, the form the kube client expects for requests
#[must_use]
pub fn path_and_query(url: &Url) -> String {
    url.query().map_or_else(
        || url.path().to_string(),
        |query| format!("{}?{query}", url.path()),
    )
}
