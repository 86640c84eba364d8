use super::identity::StreamIdentity;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Point-in-time view of a registered connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEntry {
    pub identity: StreamIdentity,
    pub url: String,
    pub opened_at: DateTime<Utc>,
    pub frames_received: u64,
    pub close_requested: bool,
}

/// Live record shared between the registry and the connection's receive loop
#[derive(Debug)]
pub struct ConnectionHandle {
    identity: StreamIdentity,
    url: String,
    opened_at: DateTime<Utc>,
    frames: AtomicU64,
    close_requested: AtomicBool,
    wake: Notify,
}

impl ConnectionHandle {
    fn new(url: String, identity: StreamIdentity) -> Self {
        Self {
            identity,
            url,
            opened_at: Utc::now(),
            frames: AtomicU64::new(0),
            close_requested: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn frames_received(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub(crate) fn record_frame(&self) -> u64 {
        self.frames.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }

    fn request_close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        // notify_one keeps a permit if the loop is not parked yet
        self.wake.notify_one();
    }

    /// Resolves once a close has been requested
    pub async fn close_requested(&self) {
        loop {
            if self.is_close_requested() {
                return;
            }
            self.wake.notified().await;
        }
    }

    fn snapshot(&self) -> ConnectionEntry {
        ConnectionEntry {
            identity: self.identity.clone(),
            url: self.url.clone(),
            opened_at: self.opened_at,
            frames_received: self.frames_received(),
            close_requested: self.is_close_requested(),
        }
    }
}

/// Open socket connections keyed by full endpoint URL.
///
/// Every operation is a single atomic step on the underlying shard; nothing
/// holds a shard guard across an await.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: DashMap<String, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection unless the URL is already taken.
    ///
    /// Returns the shared handle for the receive loop, or `None` for a duplicate.
    pub fn try_register(
        &self,
        url: &str,
        identity: StreamIdentity,
    ) -> Option<Arc<ConnectionHandle>> {
        match self.entries.entry(url.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let handle = Arc::new(ConnectionHandle::new(url.to_string(), identity));
                slot.insert(handle.clone());
                debug!(url = %url, "Connection registered");
                Some(handle)
            }
        }
    }

    /// Remove whatever is registered under `url`
    pub fn unregister(&self, url: &str) {
        if self.entries.remove(url).is_some() {
            debug!(url = %url, "Connection unregistered");
        }
    }

    /// Remove `handle` only if it is still the one registered under its URL
    pub(crate) fn release(&self, handle: &Arc<ConnectionHandle>) {
        if self
            .entries
            .remove_if(handle.url(), |_, current| Arc::ptr_eq(current, handle))
            .is_some()
        {
            debug!(url = %handle.url(), "Connection unregistered");
        }
    }

    /// Flag the connection for closing; its receive loop does the teardown
    pub fn request_close(&self, url: &str) -> bool {
        match self.entries.get(url) {
            Some(handle) => {
                handle.request_close();
                true
            }
            None => false,
        }
    }

    /// Flag every current connection; returns how many were flagged
    pub fn request_close_all(&self) -> usize {
        let urls: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        urls.iter().filter(|url| self.request_close(url)).count()
    }

    pub fn list(&self) -> Vec<ConnectionEntry> {
        let mut entries: Vec<ConnectionEntry> =
            self.entries.iter().map(|e| e.value().snapshot()).collect();
        entries.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then(a.url.cmp(&b.url)));
        entries
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    /// URL of the first connection matching `identity`
    pub fn find(&self, identity: &StreamIdentity) -> Option<String> {
        self.entries
            .iter()
            .find(|e| e.value().identity() == identity)
            .map(|e| e.key().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const DEPTH_URL: &str = "wss://stream.binance.com:9443/ws/btcusdt@depth";

    #[test]
    fn test_duplicate_url_is_rejected() {
        let registry = ConnectionRegistry::new();
        assert!(registry
            .try_register(DEPTH_URL, StreamIdentity::depth("btcusdt"))
            .is_some());
        assert!(registry
            .try_register(DEPTH_URL, StreamIdentity::depth("btcusdt"))
            .is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_register_has_one_winner() {
        let registry = Arc::new(ConnectionRegistry::new());
        let winners: usize = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry
                        .try_register(DEPTH_URL, StreamIdentity::depth("btcusdt"))
                        .is_some()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| usize::from(t.join().unwrap()))
            .sum();
        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_request_close_sets_flag_only() {
        let registry = ConnectionRegistry::new();
        let handle = registry
            .try_register(DEPTH_URL, StreamIdentity::depth("btcusdt"))
            .unwrap();

        assert!(registry.request_close(DEPTH_URL));
        assert!(handle.is_close_requested());
        assert!(registry.contains(DEPTH_URL));
        assert!(registry.list()[0].close_requested);

        assert!(!registry.request_close("wss://nowhere/ws/x"));
    }

    #[test]
    fn test_request_close_all_and_unregister() {
        let registry = ConnectionRegistry::new();
        let a = registry
            .try_register("ws://a", StreamIdentity::depth("a"))
            .unwrap();
        let b = registry
            .try_register("ws://b", StreamIdentity::agg_trades("b"))
            .unwrap();

        assert_eq!(registry.request_close_all(), 2);
        assert!(a.is_close_requested() && b.is_close_requested());

        registry.unregister("ws://a");
        registry.unregister("ws://a");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_release_ignores_replaced_entry() {
        let registry = ConnectionRegistry::new();
        let old = registry
            .try_register("ws://u", StreamIdentity::UserData)
            .unwrap();
        registry.unregister("ws://u");
        let new = registry
            .try_register("ws://u", StreamIdentity::UserData)
            .unwrap();

        registry.release(&old);
        assert!(registry.contains("ws://u"));
        registry.release(&new);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_by_identity_and_frame_counter() {
        let registry = ConnectionRegistry::new();
        let handle = registry
            .try_register("ws://k", StreamIdentity::UserData)
            .unwrap();
        handle.record_frame();
        handle.record_frame();

        assert_eq!(registry.find(&StreamIdentity::UserData).as_deref(), Some("ws://k"));
        assert_eq!(registry.find(&StreamIdentity::depth("btcusdt")), None);
        assert_eq!(registry.list()[0].frames_received, 2);
    }

    #[tokio::test]
    async fn test_close_requested_wakes_waiter() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handle = registry
            .try_register(DEPTH_URL, StreamIdentity::depth("btcusdt"))
            .unwrap();

        let waiter = tokio::spawn(async move { handle.close_requested().await });
        tokio::task::yield_now().await;
        registry.request_close(DEPTH_URL);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
