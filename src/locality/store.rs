//! `LocalityStore` — the orchestrator.
//!
//! Generalizes the `ClusterClientRegistry`/`ClusterClient` ownership shape
//! (`client/cluster.rs`): a name-keyed registry of per-key state, constructed lazily and torn
//! down structurally. Here the registry is keyed by `LocalityId` instead of cluster name, and
//! instead of a flat "insert once, never remove" registry it runs a diff-apply state machine:
//! localities are created, reused (weight-only update), or torn down on every
//! `update_locality_store` call.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use indexmap::IndexMap;

use crate::error::ConfigError;
use crate::locality::aggregate::aggregate_states;
use crate::locality::helper::{ChildHelper, ChildStateSink, Helper, SubchannelHandle};
use crate::locality::model::{ConnectivityState, DropOverload, LocalityId, LocalityInfo};
use crate::locality::picker::{BufferPicker, DroppablePicker, ErrorPicker, InterLocalityPicker, Picker, WeightedChildPicker};
use crate::locality::rng::{RandomSource, SystemRandom};
use crate::locality::round_robin::{ChildPolicyRegistry, RoundRobinPolicy};
use crate::locality::stats::LoadStatsStore;
use crate::locality::sync_context::SyncContext;

/// One live locality's balancer state.
///
/// Exclusively owned by `LocalityStore`; `policy` exclusively owns its subchannels and
/// `helper` holds only a non-owning back-reference to the store.
struct LocalityLbInfo {
    weight: i64,
    policy: Arc<RoundRobinPolicy>,
    helper: Arc<ChildHelper>,
}

struct OrchestrationState {
    localities: IndexMap<LocalityId, LocalityLbInfo>,
    drop_overloads: Vec<DropOverload>,
    oob_report_interval: Option<Duration>,
}

struct Inner {
    sync_context: Arc<SyncContext>,
    stats: Arc<LoadStatsStore>,
    rng: Arc<dyn RandomSource>,
    parent_helper: Arc<dyn Helper>,
    child_policy_registry: Arc<ChildPolicyRegistry>,
    state: Mutex<OrchestrationState>,
    /// The most recently installed top-level `(state, picker)` pair, readable lock-free from
    /// arbitrary pick-path threads: replaced atomically on every install. `update_balancing_state`
    /// on the parent `Helper` remains the actual publish point the embedding channel observes;
    /// this slot exists so the store itself can answer "what picker is live right now"
    /// without re-deriving it from the locality map.
    top_level: ArcSwapOption<(ConnectivityState, Arc<dyn Picker>)>,
}

impl ChildStateSink for Inner {
    fn update_child_state(&self, locality: &LocalityId, _state: ConnectivityState, _picker: Arc<dyn Picker>) {
        let mut state = self.state.lock().expect("LocalityStore state mutex poisoned");
        if !state.localities.contains_key(locality) {
            // Late callback after removal: silently ignored.
            return;
        }
        self.recompute_and_install(&mut state);
    }
}

impl Inner {
    /// Recomputes the aggregate state and READY picker list over every currently-tracked
    /// locality, then installs the resulting top-level picker.
    ///
    /// Each `ChildHelper` already has the freshest state for its own locality by the time
    /// this runs (it stores `current_child_state` before invoking the `ChildStateSink`
    /// callback), so there is no need to special-case "use the freshly-reported state for the
    /// reporting locality, cached values for the rest" — reading `helper.current_child_state()`
    /// uniformly already reflects that.
    fn recompute_and_install(&self, state: &mut OrchestrationState) {
        let mut child_states = Vec::with_capacity(state.localities.len());
        let mut ready = Vec::new();

        for info in state.localities.values() {
            if let Some(child_state) = info.helper.current_child_state() {
                child_states.push(child_state);
                if child_state == ConnectivityState::Ready {
                    ready.push(WeightedChildPicker::new(
                        info.weight.max(0) as u32,
                        info.helper.current_child_picker(),
                    ));
                }
            }
        }

        let aggregate = aggregate_states(child_states);
        self.install_top_level(aggregate, ready, &state.drop_overloads);
    }

    /// Chooses the placeholder/composite picker, wraps it in `DroppablePicker` iff the drop
    /// policy is non-empty, and publishes to the parent Helper iff the aggregate state is
    /// known.
    fn install_top_level(&self, aggregate: Option<ConnectivityState>, ready: Vec<WeightedChildPicker>, drop_overloads: &[DropOverload]) {
        let total_weight: u64 = ready.iter().map(|c| u64::from(c.weight)).sum();
        let base: Arc<dyn Picker> = if ready.is_empty() || total_weight == 0 {
            // An all-zero-weight READY set can't be split into cumulative-weight buckets, so
            // it is treated the same as an empty READY set.
            if aggregate == Some(ConnectivityState::TransientFailure) {
                Arc::new(ErrorPicker::unavailable("no locality is READY; aggregate state is TRANSIENT_FAILURE"))
            } else {
                Arc::new(BufferPicker)
            }
        } else {
            Arc::new(InterLocalityPicker::new(ready, self.rng.clone()))
        };

        let (picker, effective_state) = if drop_overloads.is_empty() {
            (base, aggregate)
        } else {
            let picker: Arc<dyn Picker> = Arc::new(DroppablePicker::new(
                drop_overloads.to_vec(),
                base,
                self.stats.clone(),
                self.rng.clone(),
            ));
            // Drop policy implies the stack is live even if no child has reported yet.
            (picker, Some(aggregate.unwrap_or(ConnectivityState::Idle)))
        };

        if let Some(state) = effective_state {
            tracing::debug!(%state, "installing top-level picker");
            self.top_level.store(Some(Arc::new((state, picker.clone()))));
            self.parent_helper.update_balancing_state(state, picker);
        }
    }
}

/// The orchestrator: owns the locality→child map, applies diff updates, drives
/// re-aggregation, and installs new top-level pickers.
///
/// Cloning a `LocalityStore` shares the same underlying orchestration state (it is a thin
/// `Arc` handle), matching how a single channel's `LocalityStore` is referenced from its
/// `ChildHelper`s and its embedding balancer.
#[derive(Clone)]
pub struct LocalityStore {
    inner: Arc<Inner>,
}

impl LocalityStore {
    pub fn new(parent_helper: Arc<dyn Helper>) -> Self {
        Self::with_parts(
            parent_helper,
            Arc::new(SyncContext::new()),
            Arc::new(SystemRandom),
            Arc::new(ChildPolicyRegistry::with_round_robin()),
        )
    }

    pub fn with_parts(
        parent_helper: Arc<dyn Helper>,
        sync_context: Arc<SyncContext>,
        rng: Arc<dyn RandomSource>,
        child_policy_registry: Arc<ChildPolicyRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sync_context,
                stats: Arc::new(LoadStatsStore::new()),
                rng,
                parent_helper,
                child_policy_registry,
                state: Mutex::new(OrchestrationState {
                    localities: IndexMap::new(),
                    drop_overloads: Vec::new(),
                    oob_report_interval: None,
                }),
                top_level: ArcSwapOption::from(None),
            }),
        }
    }

    /// The most recently installed `(state, picker)` pair, or `None` if nothing has been
    /// installed yet. Lock-free.
    pub fn current_top_level(&self) -> Option<(ConnectivityState, Arc<dyn Picker>)> {
        self.inner.top_level.load_full().map(|pair| (*pair).clone())
    }

    /// Shuts down every child balancer, drops every per-locality counter, and empties the
    /// locality map. Idempotent. Does not install a new top-level picker; the next update
    /// will.
    ///
    /// The drop-overload policy is untouched by `reset()`: it clears every child balancer,
    /// every per-locality counter, and the locality map only, so an xDS client re-running
    /// discovery after a transient disconnect does not need to replay `updateDropPercentage`
    /// just because it called `reset()`.
    pub fn reset(&self) {
        self.inner.sync_context.execute({
            let inner = self.inner.clone();
            move || {
                let mut state = inner.state.lock().expect("LocalityStore state mutex poisoned");
                for (_, info) in state.localities.drain(..) {
                    info.policy.shutdown();
                }
                inner.stats.clear();
                tracing::debug!("LocalityStore reset");
            }
        });
    }

    /// Atomic diff-apply over the locality map. `updates` iteration order is the
    /// deterministic ordering used for the resulting `WeightedChildPicker` entries.
    pub fn update_locality_store(&self, updates: IndexMap<LocalityId, LocalityInfo>) -> Result<(), ConfigError> {
        for info in updates.values() {
            if info.weight < 0 {
                return Err(ConfigError::NegativeWeight(info.weight));
            }
        }

        if self.inner.child_policy_registry.get("round_robin").is_none() {
            return Err(ConfigError::MissingChildPolicyProvider("round_robin".to_string()));
        }

        let inner = self.inner.clone();
        let sink: Arc<dyn ChildStateSink> = self.inner.clone();
        let sink_weak = Arc::downgrade(&sink);

        self.inner.sync_context.execute(move || {
            let mut state = inner.state.lock().expect("LocalityStore state mutex poisoned");

            let new_keys: HashSet<&LocalityId> = updates.keys().collect();
            let removed: Vec<LocalityId> = state
                .localities
                .keys()
                .filter(|id| !new_keys.contains(id))
                .cloned()
                .collect();

            // Step 1: shut down and remove localities no longer present.
            for id in &removed {
                if let Some(info) = state.localities.shift_remove(id) {
                    info.policy.shutdown();
                }
            }

            // Step 2 + 3: reuse-or-create, then deliver resolved addresses, in the caller's
            // deterministic order.
            for (id, locality_info) in updates {
                let oob_interval = state.oob_report_interval;
                let entry = state.localities.entry(id.clone());
                match entry {
                    indexmap::map::Entry::Occupied(mut occupied) => {
                        occupied.get_mut().weight = locality_info.weight;
                    }
                    indexmap::map::Entry::Vacant(vacant) => {
                        // Register the counter before constructing the ChildHelper, so the
                        // helper never observes a missing counter.
                        let counter = inner.stats.add_locality(id.clone());
                        let helper = Arc::new(ChildHelper::new(
                            id.clone(),
                            counter,
                            inner.parent_helper.clone(),
                            sink_weak.clone(),
                            oob_interval,
                        ));
                        let provider = inner
                            .child_policy_registry
                            .get("round_robin")
                            .expect("round_robin provider presence already validated");
                        let policy = Arc::new(provider.build(helper.clone()));
                        vacant.insert(LocalityLbInfo {
                            weight: locality_info.weight,
                            policy,
                            helper,
                        });
                    }
                }

                let info = state.localities.get(&id).expect("just inserted or updated above");
                info.policy.handle_resolved_addresses(locality_info.endpoints);
            }

            // Step 4: re-aggregate and install.
            inner.recompute_and_install(&mut state);

            // Step 5: deferred deletion of removed localities' counters, on a subsequent
            // synchronized task so any pick already in flight against the old picker still
            // sees its counter.
            let stats = inner.stats.clone();
            let sync_context = inner.sync_context.clone();
            sync_context.execute(move || {
                for id in removed {
                    tracing::debug!(locality = %id, "erasing load-stats counter for removed locality");
                    stats.remove_locality(&id);
                }
            });
        });

        Ok(())
    }

    /// Replaces the drop policy. Triggers re-installation so the `DroppablePicker` overlay
    /// wrapping changes to match, even though the composite picker itself is unaffected.
    pub fn update_drop_percentage(&self, drop_overloads: Vec<DropOverload>) -> Result<(), ConfigError> {
        for overload in &drop_overloads {
            if overload.drops_per_million > 1_000_000 {
                return Err(ConfigError::DropsPerMillionOutOfRange(u64::from(overload.drops_per_million)));
            }
        }

        let inner = self.inner.clone();
        self.inner.sync_context.execute(move || {
            let mut state = inner.state.lock().expect("LocalityStore state mutex poisoned");
            state.drop_overloads = drop_overloads;
            inner.recompute_and_install(&mut state);
        });
        Ok(())
    }

    /// Broadcasts a subchannel state transition to every child balancer; each ignores events
    /// for subchannels it does not own.
    ///
    /// Collects the current set of child policies and releases the state lock before
    /// invoking any of them: a `RoundRobinPolicy::handle_subchannel_state` call can report a
    /// new child state synchronously, which flows back into `Inner::update_child_state` and
    /// would otherwise try to re-lock `state` on the same thread.
    pub fn handle_subchannel_state(&self, subchannel: &SubchannelHandle, new_state: ConnectivityState) {
        let inner = self.inner.clone();
        let subchannel = subchannel.clone();
        self.inner.sync_context.execute(move || {
            let policies: Vec<Arc<RoundRobinPolicy>> = {
                let state = inner.state.lock().expect("LocalityStore state mutex poisoned");
                state.localities.values().map(|info| info.policy.clone()).collect()
            };
            for policy in policies {
                policy.handle_subchannel_state(&subchannel, new_state);
            }
        });
    }

    /// Stores the new ORCA out-of-band report interval and applies it to every live
    /// `ChildHelper`; future children pick it up at construction time.
    pub fn update_oob_metrics_report_interval(&self, interval: Duration) {
        let inner = self.inner.clone();
        self.inner.sync_context.execute(move || {
            let mut state = inner.state.lock().expect("LocalityStore state mutex poisoned");
            state.oob_report_interval = Some(interval);
            for info in state.localities.values() {
                info.helper.set_oob_report_interval(interval);
            }
        });
    }

    pub fn load_stats_store(&self) -> Arc<LoadStatsStore> {
        self.inner.stats.clone()
    }

    /// Test/inspection seam: the set of locality ids currently tracked.
    pub fn locality_ids(&self) -> Vec<LocalityId> {
        self.inner
            .state
            .lock()
            .expect("LocalityStore state mutex poisoned")
            .localities
            .keys()
            .cloned()
            .collect()
    }

    pub fn sync_context(&self) -> &Arc<SyncContext> {
        &self.inner.sync_context
    }
}
