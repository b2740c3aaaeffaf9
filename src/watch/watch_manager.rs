/**
 * Watch registry
 *
 * Keeps at most one Watchman per watch uri so that callers asking for the same
 * watch share a single connection. The registry is an owned value: mutation
 * goes through `&mut self`, which serializes callers at compile time.
 */
use super::event::WatchEvent;
use super::request::RequestOptions;
use super::watchman::{WatchOptions, Watchman};
use crate::error::{Error, Result};
use crate::k8s::transport::WatchTransport;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// One registered watch
#[derive(Debug, Clone)]
pub struct WatchEntry {
    pub self_link: String,
    pub watchman: Watchman,
    pub query_selector_hash: String,
}

/// Registry of watch sessions keyed by watch uri
pub struct WatchManager {
    transport: Arc<dyn WatchTransport>,
    watches: HashMap<String, WatchEntry>,
}

impl std::fmt::Debug for WatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchManager")
            .field("watches", &self.watches.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl WatchManager {
    /// Empty registry; sessions created by [`ensure_watch`](Self::ensure_watch)
    /// connect through `transport`
    #[must_use]
    pub fn new(transport: Arc<dyn WatchTransport>) -> Self {
        Self {
            transport,
            watches: HashMap::new(),
        }
    }

    /// Register `watchman` under its self link, replacing (and ending) any
    /// previous session for that uri, and optionally start it.
    pub fn save_watch(
        &mut self,
        watchman: Watchman,
        query_selector: &RequestOptions,
        start_watch: bool,
    ) -> &WatchEntry {
        let self_link = watchman.self_link().to_string();
        self.remove_watch(&self_link);
        if start_watch {
            watchman.watch();
        }
        info!("Watch added: {} {:?}", self_link, query_selector.qs);
        let entry = WatchEntry {
            self_link: self_link.clone(),
            watchman,
            query_selector_hash: query_selector.selector_hash(),
        };
        self.watches.entry(self_link).insert_entry(entry).into_mut()
    }

    /// Return the session for `options`' uri, creating it when missing.
    ///
    /// With `global_watch` an existing session whose query selector differs is
    /// replaced by a fresh one; without it the existing session always wins.
    ///
    /// # Errors
    ///
    /// Returns the `Watchman` construction error when a new session is needed
    /// and the options do not describe a valid watch.
    pub fn ensure_watch<H>(
        &mut self,
        options: WatchOptions,
        object_handler: H,
        global_watch: bool,
        start_watch: bool,
    ) -> Result<&WatchEntry>
    where
        H: Fn(WatchEvent) + Send + Sync + 'static,
    {
        let self_link = options.request_options.uri.clone().unwrap_or_default();
        let selector_hash = options.request_options.selector_hash();
        let reuse = self
            .watches
            .get(&self_link)
            .is_some_and(|w| !global_watch || w.query_selector_hash == selector_hash);
        if reuse {
            return self
                .watches
                .get(&self_link)
                .ok_or_else(|| Error::Custom(format!("watch {self_link} vanished")));
        }

        let selector = RequestOptions {
            qs: options.request_options.qs.clone(),
            ..RequestOptions::default()
        };
        let watchman = Watchman::new(options, self.transport.clone(), object_handler)?;
        Ok(self.save_watch(watchman, &selector, start_watch))
    }

    /// Restart the session for `self_link` if one is registered
    pub fn start_watch(&self, self_link: &str) -> Option<&Watchman> {
        self.re_watch(self_link)
    }

    /// End and deregister the session for `self_link`; no-op when absent
    pub fn remove_watch(&mut self, self_link: &str) -> Option<WatchEntry> {
        let entry = self.watches.remove(self_link)?;
        entry.watchman.end(false);
        info!("Watch removed: {}", self_link);
        Some(entry)
    }

    /// End and deregister every session
    pub fn remove_all_watches(&mut self) {
        let links: Vec<String> = self.watches.keys().cloned().collect();
        for link in links {
            self.remove_watch(&link);
        }
    }

    #[must_use]
    pub fn get_watch(&self, self_link: &str) -> Option<&WatchEntry> {
        self.watches.get(self_link)
    }

    #[must_use]
    pub const fn get_all_watches(&self) -> &HashMap<String, WatchEntry> {
        &self.watches
    }

    #[must_use]
    pub fn contains(&self, self_link: &str) -> bool {
        self.watches.contains_key(self_link)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Force the session for `self_link` to reconnect; membership is untouched
    pub fn re_watch(&self, self_link: &str) -> Option<&Watchman> {
        let watchman = &self.watches.get(self_link)?.watchman;
        watchman.watch();
        Some(watchman)
    }

    pub fn re_watch_all(&self) {
        for entry in self.watches.values() {
            entry.watchman.watch();
        }
    }
}

impl Drop for WatchManager {
    fn drop(&mut self) {
        for entry in self.watches.values() {
            entry.watchman.end(false);
        }
    }
}
