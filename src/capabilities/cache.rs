//! Concurrent capability cache
//!
//! Snapshots keyed by router with lazy expiry: an expired entry is removed
//! on read and reported as a miss. A per-router refreshing flag lets
//! callers present "stale while refreshing" without blocking on detection.

use dashmap::DashMap;
use std::sync::Arc;

use super::snapshot::CapabilitySnapshot;
use crate::domain_types::RouterId;
use crate::time_provider::SharedTimeProvider;

/// Thread-safe snapshot cache.
#[derive(Debug)]
pub struct CapabilityCache {
    entries: DashMap<RouterId, CapabilitySnapshot>,
    refreshing: DashMap<RouterId, ()>,
    time: SharedTimeProvider,
}

impl CapabilityCache {
    /// Creates an empty cache reading the given clock
    pub fn new(time: SharedTimeProvider) -> Self {
        Self {
            entries: DashMap::new(),
            refreshing: DashMap::new(),
            time,
        }
    }

    /// Creates a shared empty cache
    pub fn shared(time: SharedTimeProvider) -> Arc<Self> {
        Arc::new(Self::new(time))
    }

    /// Returns the cached snapshot, or `None` on miss.
    ///
    /// An expired entry counts as a miss and is dropped. When a refresh is
    /// in flight for the router, the returned snapshot carries
    /// `is_refreshing = true`.
    pub fn get(&self, router_id: &RouterId) -> Option<CapabilitySnapshot> {
        let now = self.time.now();
        let snapshot = {
            let entry = self.entries.get(router_id)?;
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.clone())
            }
        };

        match snapshot {
            Some(mut snapshot) => {
                snapshot.is_refreshing = self.is_refreshing(router_id);
                Some(snapshot)
            }
            None => {
                self.entries.remove(router_id);
                None
            }
        }
    }

    /// Stores a snapshot and clears the router's refreshing flag.
    pub fn set(&self, snapshot: CapabilitySnapshot) {
        self.refreshing.remove(&snapshot.router_id);
        self.entries.insert(snapshot.router_id.clone(), snapshot);
    }

    /// Drops one router's entry.
    pub fn invalidate(&self, router_id: &RouterId) {
        self.entries.remove(router_id);
    }

    /// Drops every entry.
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    /// Sets or clears the refreshing flag for a router.
    pub fn mark_refreshing(&self, router_id: &RouterId, refreshing: bool) {
        if refreshing {
            self.refreshing.insert(router_id.clone(), ());
        } else {
            self.refreshing.remove(router_id);
        }
    }

    /// Whether a refresh is currently marked for the router.
    pub fn is_refreshing(&self, router_id: &RouterId) -> bool {
        self.refreshing.contains_key(router_id)
    }

    /// Number of live entries; expired entries may still be counted until
    /// their next read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
