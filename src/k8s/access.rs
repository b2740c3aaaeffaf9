/**
 * Resource access: list calls against the API, one resource at a time or paged
 */
use super::resource_meta::{ResourceMeta, UriOptions};
use crate::error::Result;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use std::collections::BTreeMap;

/// Query parameters of a list call (`limit`, `continue`, selectors, ...)
pub type QueryParams = BTreeMap<String, String>;

/// Outcome of listing one resource
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceListing {
    pub resource: ResourceMeta,
    pub status: u16,
    /// The list object on success
    pub object: Option<Value>,
    /// The error body otherwise
    pub error: Option<Value>,
}

impl ResourceListing {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status == 200
    }

    /// `items` of a successful list, empty otherwise
    #[must_use]
    pub fn items(&self) -> &[Value] {
        self.object
            .as_ref()
            .and_then(|o| o["items"].as_array())
            .map_or(&[], Vec::as_slice)
    }

    /// Server continuation token, `None` when the list is complete
    #[must_use]
    pub fn continue_token(&self) -> Option<&str> {
        self.object
            .as_ref()
            .and_then(|o| o["metadata"]["continue"].as_str())
            .filter(|token| !token.is_empty())
    }
}

/// Position within a paged walk over several resources. Opaque to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    idx: usize,
    continue_token: Option<String>,
}

/// One step of [`ResourceAccess::get_resources_paged`]
#[derive(Debug, Clone, PartialEq)]
pub struct ResourcePage {
    pub resources: Vec<ResourceListing>,
    /// Where to resume, `None` once every resource is exhausted
    pub next: Option<PageCursor>,
}

#[async_trait]
pub trait ResourceAccess: Send + Sync {
    /// List `resource` with `query`; non-2xx answers come back as a listing
    /// carrying the status, only unreachable servers are errors.
    async fn get_resource(&self, resource: &ResourceMeta, query: &QueryParams) -> Result<ResourceListing>;

    /// List every resource concurrently
    async fn get_resources(&self, resources: &[ResourceMeta], query: &QueryParams) -> Result<Vec<ResourceListing>> {
        try_join_all(resources.iter().map(|r| self.get_resource(r, query))).await
    }

    /// Walk `resources` one page at a time.
    ///
    /// Without a `limit` and without a cursor everything is fetched at once.
    /// Otherwise one page of the resource under the cursor is fetched; the
    /// cursor moves to the next resource when the server reports no further
    /// continuation (or the page failed).
    async fn get_resources_paged(
        &self,
        resources: &[ResourceMeta],
        query: &QueryParams,
        cursor: Option<PageCursor>,
    ) -> Result<ResourcePage> {
        if !query.contains_key("limit") && cursor.is_none() {
            let resources = self.get_resources(resources, query).await?;
            return Ok(ResourcePage {
                resources,
                next: None,
            });
        }

        let mut cursor = cursor.unwrap_or_default();
        let Some(resource) = resources.get(cursor.idx) else {
            return Ok(ResourcePage {
                resources: Vec::new(),
                next: None,
            });
        };
        let mut page_query = query.clone();
        match &cursor.continue_token {
            Some(token) => page_query.insert("continue".to_string(), token.clone()),
            None => page_query.remove("continue"),
        };

        let listing = self.get_resource(resource, &page_query).await?;
        cursor.continue_token = listing.continue_token().map(str::to_string);
        if cursor.continue_token.is_none() {
            cursor.idx += 1;
        }
        let next = (cursor.idx < resources.len()).then_some(cursor);
        Ok(ResourcePage {
            resources: vec![listing],
            next,
        })
    }
}

/// Record each listed item's own uri under `metadata.annotations.selfLink`
pub fn inject_self_link(object: &mut Value, resource: &ResourceMeta) {
    let Some(items) = object.get_mut("items").and_then(Value::as_array_mut) else {
        return;
    };
    for item in items {
        let options = UriOptions {
            name: item["metadata"]["name"].as_str().map(str::to_string),
            namespace: item["metadata"]["namespace"].as_str().map(str::to_string),
            ..UriOptions::default()
        };
        let link = Value::String(resource.uri(&options));
        let Some(metadata) = item.get_mut("metadata").and_then(Value::as_object_mut) else {
            continue;
        };
        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(annotations) = annotations.as_object_mut() {
            annotations.insert("selfLink".to_string(), link);
        }
    }
}
