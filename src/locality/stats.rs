//! `LoadStatsStore`: process-local counters for dropped and per-locality RPC activity.
//!
//! Generalizes the `DashMap`-backed client registry (`client/cluster.rs`'s
//! `ClusterClientRegistry`) from "one entry per cluster, looked up by name" to "one counter
//! per locality, added/removed by the orchestration domain while the pick path increments
//! concurrently from arbitrary caller threads".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::locality::model::LocalityId;

/// Per-locality RPC activity counters.
///
/// All fields are independently-atomic; there is no cross-field consistency requirement
/// beyond safety under concurrent increment.
#[derive(Debug, Default)]
pub struct LocalityCounter {
    in_flight: AtomicU64,
    total_issued: AtomicU64,
    total_errors: AtomicU64,
    /// Accumulated ORCA backend metrics, keyed by metric name. The transport that actually
    /// fetches these values is an external collaborator; this is just the accumulator the
    /// metrics-observing picker wrapper writes into.
    orca_metrics: DashMap<String, f64>,
}

impl LocalityCounter {
    pub fn record_call_start(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.total_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_call_end(&self, is_error: bool) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if is_error {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_orca_metric(&self, name: &str, value: f64) {
        self.orca_metrics.insert(name.to_string(), value);
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn total_issued(&self) -> u64 {
        self.total_issued.load(Ordering::Relaxed)
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }

    pub fn orca_metric(&self, name: &str) -> Option<f64> {
        self.orca_metrics.get(name).map(|v| *v)
    }
}

/// Counts drops for one drop-overload category.
#[derive(Debug, Default)]
pub struct DropCounter {
    count: AtomicU64,
}

impl DropCounter {
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Shared store of per-locality and per-drop-category counters.
///
/// Structural mutation (`add_locality` / `remove_locality`) happens only from the
/// orchestration domain; `record_dropped_request` and the `LocalityCounter` methods are
/// called concurrently from arbitrary pick-path threads.
#[derive(Debug, Default)]
pub struct LoadStatsStore {
    localities: DashMap<LocalityId, Arc<LocalityCounter>>,
    drops: DashMap<String, Arc<DropCounter>>,
}

impl LoadStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a counter exists for `id`; idempotent. Returns the (possibly pre-existing)
    /// counter. Callers must register the counter before constructing the `ChildHelper` that
    /// will hold a reference to it.
    pub fn add_locality(&self, id: LocalityId) -> Arc<LocalityCounter> {
        self.localities
            .entry(id)
            .or_insert_with(|| Arc::new(LocalityCounter::default()))
            .clone()
    }

    /// Removes the counter for `id`. Must only be called once no picker still references it,
    /// which the deferred-delete protocol enforces.
    pub fn remove_locality(&self, id: &LocalityId) {
        self.localities.remove(id);
    }

    pub fn get_locality_counter(&self, id: &LocalityId) -> Option<Arc<LocalityCounter>> {
        self.localities.get(id).map(|entry| entry.clone())
    }

    /// Increments the drop counter for `category`, creating it on first use.
    pub fn record_dropped_request(&self, category: &str) {
        self.drops
            .entry(category.to_string())
            .or_insert_with(|| Arc::new(DropCounter::default()))
            .increment();
    }

    pub fn get_drop_counter(&self, category: &str) -> Option<Arc<DropCounter>> {
        self.drops.get(category).map(|entry| entry.clone())
    }

    /// Clears every counter. Used by [`crate::locality::LocalityStore::reset`].
    pub fn clear(&self) {
        self.localities.clear();
        self.drops.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locality(name: &str) -> LocalityId {
        LocalityId::new("region", "zone", name)
    }

    #[test]
    fn add_locality_is_idempotent() {
        let store = LoadStatsStore::new();
        let a = store.add_locality(locality("a"));
        let b = store.add_locality(locality("a"));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn remove_locality_erases_counter() {
        let store = LoadStatsStore::new();
        store.add_locality(locality("a"));
        assert!(store.get_locality_counter(&locality("a")).is_some());
        store.remove_locality(&locality("a"));
        assert!(store.get_locality_counter(&locality("a")).is_none());
    }

    #[test]
    fn record_dropped_request_creates_category_on_first_use() {
        let store = LoadStatsStore::new();
        assert!(store.get_drop_counter("throttle").is_none());
        store.record_dropped_request("throttle");
        store.record_dropped_request("throttle");
        assert_eq!(store.get_drop_counter("throttle").unwrap().count(), 2);
    }

    #[test]
    fn locality_counter_tracks_in_flight_and_errors() {
        let counter = LocalityCounter::default();
        counter.record_call_start();
        counter.record_call_start();
        assert_eq!(counter.in_flight(), 2);
        counter.record_call_end(true);
        assert_eq!(counter.in_flight(), 1);
        assert_eq!(counter.total_errors(), 1);
        assert_eq!(counter.total_issued(), 2);
    }
}
