//! Round-robin child policy — the per-locality "ChildPolicy instance".
//!
//! Generalizes `ClusterBalancer` (`client/cluster.rs`), which wrapped
//! `tower::balance::p2c::Balance` over a `tower::discover::Discover` stream, into an explicit
//! connectivity-state push model: endpoints arrive as full snapshots supplied by the xDS
//! client, not as an incremental `Change` stream, so this diffs snapshots itself the same way
//! `LocalityStore` diffs locality maps — one level down, across `EndpointAddressGroup`s within
//! a single locality instead of across localities within a channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::locality::aggregate::aggregate_states;
use crate::locality::helper::{Helper, SubchannelHandle};
use crate::locality::model::{ConnectivityState, EndpointAddressGroup};
use crate::locality::picker::Picker;

struct TrackedSubchannel {
    handle: SubchannelHandle,
    state: ConnectivityState,
}

/// Cyclic selection over the subchannels currently READY. No weighting: weighting lives one
/// level up, across localities, not across endpoints within one.
struct RoundRobinPicker {
    ready: Vec<SubchannelHandle>,
    next: std::sync::atomic::AtomicUsize,
}

impl Picker for RoundRobinPicker {
    fn pick(&self, _args: &crate::locality::picker::PickArgs) -> crate::locality::picker::PickResult {
        let index = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % self.ready.len();
        crate::locality::picker::PickResult::Complete(self.ready[index].clone())
    }
}

/// A round-robin balancer for one locality's endpoints.
///
/// Owned exclusively by the locality's `LocalityLbInfo`. All mutating methods are expected to
/// run inside the channel's `SyncContext`, matching the single-writer assumption the rest of
/// the orchestration domain relies on; the `Mutex` here exists only to satisfy Rust's
/// `Send`/`Sync` bounds for cross-thread handles, not to arbitrate real contention.
pub struct RoundRobinPolicy {
    helper: Arc<dyn Helper>,
    subchannels: Mutex<HashMap<EndpointAddressGroup, TrackedSubchannel>>,
}

impl RoundRobinPolicy {
    pub fn new(helper: Arc<dyn Helper>) -> Self {
        Self {
            helper,
            subchannels: Mutex::new(HashMap::new()),
        }
    }

    /// Diffs `groups` against the currently-tracked endpoint groups: creates subchannels for
    /// newly-seen groups (initial state `Idle`, matching a freshly-created, not-yet-connecting
    /// subchannel), drops tracking for groups no longer present, keeps existing ones
    /// unchanged.
    pub fn handle_resolved_addresses(&self, groups: Vec<EndpointAddressGroup>) {
        let mut subchannels = self.subchannels.lock().expect("RoundRobinPolicy mutex poisoned");
        let new_keys: std::collections::HashSet<&EndpointAddressGroup> = groups.iter().collect();

        subchannels.retain(|key, _| new_keys.contains(key));

        for group in groups {
            subchannels.entry(group.clone()).or_insert_with(|| TrackedSubchannel {
                handle: self.helper.create_subchannel(group),
                state: ConnectivityState::Idle,
            });
        }
    }

    /// Updates the tracked state for `subchannel` if this policy owns it; ignores the event
    /// otherwise, since each policy only owns the subchannels it created.
    ///
    /// Recomputes this policy's own aggregate state via the same fold used one level up and
    /// reports `(state, picker)` to its `Helper` — the `ChildHelper`, which is what ultimately
    /// flows into `LocalityStore::update_child_state`.
    pub fn handle_subchannel_state(&self, subchannel: &SubchannelHandle, new_state: ConnectivityState) {
        let (aggregate, ready): (Option<ConnectivityState>, Vec<SubchannelHandle>) = {
            let mut subchannels = self.subchannels.lock().expect("RoundRobinPolicy mutex poisoned");
            let owned = subchannels
                .values_mut()
                .find(|tracked| &tracked.handle == subchannel);
            match owned {
                Some(tracked) => tracked.state = new_state,
                None => return,
            }

            let aggregate = aggregate_states(subchannels.values().map(|t| t.state));
            let ready = subchannels
                .values()
                .filter(|t| t.state == ConnectivityState::Ready)
                .map(|t| t.handle.clone())
                .collect();
            (aggregate, ready)
        };

        let Some(aggregate) = aggregate else {
            return;
        };

        let picker: Arc<dyn Picker> = if ready.is_empty() {
            Arc::new(crate::locality::picker::BufferPicker)
        } else {
            Arc::new(RoundRobinPicker {
                ready,
                next: std::sync::atomic::AtomicUsize::new(0),
            })
        };

        self.helper.update_balancing_state(aggregate, picker);
    }

    /// Releases all tracked subchannels.
    pub fn shutdown(&self) {
        self.subchannels.lock().expect("RoundRobinPolicy mutex poisoned").clear();
    }

    /// The subchannel handles currently tracked for this locality, in no particular order.
    /// Test/inspection seam used by `LocalityStore`'s own tests to drive
    /// `handle_subchannel_state` against the handles this policy actually minted.
    pub fn tracked_subchannels(&self) -> Vec<SubchannelHandle> {
        self.subchannels
            .lock()
            .expect("RoundRobinPolicy mutex poisoned")
            .values()
            .map(|t| t.handle.clone())
            .collect()
    }
}

/// Constructs [`RoundRobinPolicy`] instances, looked up by name from a
/// [`ChildPolicyRegistry`]. A missing provider for the requested name at construction time is
/// a fatal initialization error.
pub trait ChildPolicyProvider: Send + Sync {
    fn build(&self, helper: Arc<dyn Helper>) -> RoundRobinPolicy;
}

/// The built-in round-robin provider. Tuning the child policy is out of scope here, so this
/// implementation never registers more than this one provider.
pub struct RoundRobinProvider;

impl ChildPolicyProvider for RoundRobinProvider {
    fn build(&self, helper: Arc<dyn Helper>) -> RoundRobinPolicy {
        RoundRobinPolicy::new(helper)
    }
}

/// Small name-keyed registry of [`ChildPolicyProvider`]s, mirroring the real gRPC
/// child-policy-registry pattern even though exactly one provider (`"round_robin"`) is ever
/// registered in this implementation.
pub struct ChildPolicyRegistry {
    providers: HashMap<String, Box<dyn ChildPolicyProvider>>,
}

impl Default for ChildPolicyRegistry {
    fn default() -> Self {
        Self::with_round_robin()
    }
}

impl ChildPolicyRegistry {
    pub fn with_round_robin() -> Self {
        let mut providers: HashMap<String, Box<dyn ChildPolicyProvider>> = HashMap::new();
        providers.insert("round_robin".to_string(), Box::new(RoundRobinProvider));
        Self { providers }
    }

    pub fn get(&self, name: &str) -> Option<&dyn ChildPolicyProvider> {
        self.providers.get(name).map(|boxed| boxed.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locality::picker::PickArgs;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingHelper {
        next_id: AtomicU64,
    }
    impl Helper for CountingHelper {
        fn create_subchannel(&self, addresses: EndpointAddressGroup) -> SubchannelHandle {
            SubchannelHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed), addresses)
        }
        fn update_balancing_state(&self, _state: ConnectivityState, _picker: Arc<dyn Picker>) {}
    }

    fn group(port: u16) -> EndpointAddressGroup {
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        EndpointAddressGroup::new(vec![addr])
    }

    #[test]
    fn registry_has_round_robin_and_nothing_else() {
        let registry = ChildPolicyRegistry::with_round_robin();
        assert!(registry.get("round_robin").is_some());
        assert!(registry.get("least_request").is_none());
    }

    #[test]
    fn late_callback_for_unowned_subchannel_is_ignored() {
        let helper = Arc::new(CountingHelper { next_id: AtomicU64::new(0) });
        let policy = RoundRobinPolicy::new(helper.clone());
        policy.handle_resolved_addresses(vec![group(1)]);

        let foreign = SubchannelHandle::new(999, group(2));
        // Must not panic, and must not affect aggregate state.
        policy.handle_subchannel_state(&foreign, ConnectivityState::Ready);
    }

    #[test]
    fn round_robin_picker_cycles_through_ready_subchannels() {
        let helper = Arc::new(CountingHelper { next_id: AtomicU64::new(0) });
        let policy = RoundRobinPolicy::new(helper);
        policy.handle_resolved_addresses(vec![group(1), group(2)]);

        let handles: Vec<SubchannelHandle> = {
            let subchannels = policy.subchannels.lock().unwrap();
            subchannels.values().map(|t| t.handle.clone()).collect()
        };
        for handle in &handles {
            policy.handle_subchannel_state(handle, ConnectivityState::Ready);
        }

        let ready_handles: Vec<_> = {
            let subchannels = policy.subchannels.lock().unwrap();
            subchannels
                .values()
                .filter(|t| t.state == ConnectivityState::Ready)
                .map(|t| t.handle.clone())
                .collect()
        };
        assert_eq!(ready_handles.len(), 2);

        let picker = RoundRobinPicker {
            ready: ready_handles.clone(),
            next: std::sync::atomic::AtomicUsize::new(0),
        };
        let first = picker.pick(&PickArgs::default());
        let second = picker.pick(&PickArgs::default());
        let third = picker.pick(&PickArgs::default());
        match (first, second, third) {
            (
                crate::locality::picker::PickResult::Complete(a),
                crate::locality::picker::PickResult::Complete(b),
                crate::locality::picker::PickResult::Complete(c),
            ) => {
                assert_ne!(a, b);
                assert_eq!(a, c);
            }
            _ => panic!("expected Complete picks"),
        }
    }

    #[test]
    fn shutdown_clears_tracked_subchannels() {
        let helper = Arc::new(CountingHelper { next_id: AtomicU64::new(0) });
        let policy = RoundRobinPolicy::new(helper);
        policy.handle_resolved_addresses(vec![group(1)]);
        policy.shutdown();
        assert!(policy.subchannels.lock().unwrap().is_empty());
    }
}
