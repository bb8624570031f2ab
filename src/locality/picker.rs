//! The pick pipeline.
//!
//! Each layer — inter-locality selection, the drop overlay, load-recording, metrics
//! observation, and (one level down) round-robin child selection — implements the same
//! `Picker` capability and is composed by wrapping. There is no inheritance hierarchy;
//! composition of boxed trait objects is sufficient, the same shape already used for injected
//! collaborators elsewhere in this codebase (`Arc<dyn XdsRouter>` in `client/route.rs`).

use std::sync::Arc;

use tonic::{Code, Status};

use crate::locality::model::DropOverload;
use crate::locality::rng::RandomSource;
use crate::locality::stats::LoadStatsStore;

/// Per-RPC argument bundle passed to a pick. Left intentionally minimal — the fields a real
/// gRPC pick needs (request metadata, deadline) live in the RPC layer this core does not own;
/// this is a seam for future fields; it stays `Default` so call sites that have nothing to
/// pass can use `&PickArgs::default()`.
#[derive(Debug, Default, Clone)]
pub struct PickArgs {
    pub authority: Option<String>,
}

/// The outcome of a pick.
#[derive(Debug, Clone)]
pub enum PickResult {
    /// The RPC should be dispatched on this subchannel.
    Complete(crate::locality::helper::SubchannelHandle),
    /// No picker is ready yet; queue the RPC until the next top-level picker install.
    Queue,
    /// The RPC should fail immediately with `status` (used by the drop overlay and by the
    /// `TRANSIENT_FAILURE` placeholder picker).
    Fail(Status),
}

/// A pure function from a per-RPC argument bundle to a [`PickResult`].
pub trait Picker: Send + Sync {
    fn pick(&self, args: &PickArgs) -> PickResult;
}

/// Placeholder installed when no locality is READY and the aggregate state is not
/// `TRANSIENT_FAILURE`: queues RPCs until the next top-level picker install.
#[derive(Debug, Default)]
pub struct BufferPicker;

impl Picker for BufferPicker {
    fn pick(&self, _args: &PickArgs) -> PickResult {
        PickResult::Queue
    }
}

/// Placeholder installed when the aggregate state is `TRANSIENT_FAILURE`: fails every pick
/// with the given status, without delegating anywhere.
#[derive(Debug, Clone)]
pub struct ErrorPicker {
    status: Status,
}

impl ErrorPicker {
    pub fn new(status: Status) -> Self {
        Self { status }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Status::new(Code::Unavailable, message.into()))
    }
}

impl Picker for ErrorPicker {
    fn pick(&self, _args: &PickArgs) -> PickResult {
        PickResult::Fail(self.status.clone())
    }
}

/// One `(weight, picker)` entry in an [`InterLocalityPicker`]'s rotation.
pub struct WeightedChildPicker {
    pub weight: u32,
    pub picker: Arc<dyn Picker>,
}

impl WeightedChildPicker {
    pub fn new(weight: u32, picker: Arc<dyn Picker>) -> Self {
        Self { weight, picker }
    }
}

/// Weighted random selection across child pickers that are in the READY state.
///
/// Constructed fresh on every top-level picker install; never mutated in place, so a pick in
/// flight against an old instance always sees a self-consistent weight table.
pub struct InterLocalityPicker {
    children: Vec<WeightedChildPicker>,
    total_weight: u64,
    rng: Arc<dyn RandomSource>,
}

impl InterLocalityPicker {
    /// `children` must be non-empty and carry a positive total weight; callers install
    /// [`BufferPicker`]/[`ErrorPicker`] instead when there are no READY children or the READY
    /// set's weights all sum to zero.
    pub fn new(children: Vec<WeightedChildPicker>, rng: Arc<dyn RandomSource>) -> Self {
        assert!(
            !children.is_empty(),
            "InterLocalityPicker requires at least one READY child"
        );
        let total_weight = children.iter().map(|c| u64::from(c.weight)).sum();
        assert!(total_weight > 0, "InterLocalityPicker requires positive total weight");
        Self {
            children,
            total_weight,
            rng,
        }
    }
}

impl Picker for InterLocalityPicker {
    fn pick(&self, args: &PickArgs) -> PickResult {
        let draw = self.rng.next_u64(self.total_weight);
        let mut cumulative = 0u64;
        for child in &self.children {
            cumulative += u64::from(child.weight);
            if draw < cumulative {
                return child.picker.pick(args);
            }
        }
        unreachable!("draw is always < total_weight by construction")
    }
}

/// Overlay picker that probabilistically drops RPCs per the server-dictated drop policy.
pub struct DroppablePicker {
    drop_overloads: Vec<DropOverload>,
    inner: Arc<dyn Picker>,
    stats: Arc<LoadStatsStore>,
    rng: Arc<dyn RandomSource>,
}

const DROPS_PER_MILLION_BOUND: u64 = 1_000_000;

impl DroppablePicker {
    pub fn new(
        drop_overloads: Vec<DropOverload>,
        inner: Arc<dyn Picker>,
        stats: Arc<LoadStatsStore>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            drop_overloads,
            inner,
            stats,
            rng,
        }
    }
}

impl Picker for DroppablePicker {
    fn pick(&self, args: &PickArgs) -> PickResult {
        for overload in &self.drop_overloads {
            let draw = self.rng.next_u64(DROPS_PER_MILLION_BOUND);
            if draw < u64::from(overload.drops_per_million) {
                self.stats.record_dropped_request(&overload.category);
                return PickResult::Fail(Status::new(
                    Code::Unavailable,
                    format!("RPC dropped by xDS drop policy, category: {}", overload.category),
                ));
            }
        }
        self.inner.pick(args)
    }
}

/// Wraps a child picker with load-recording: increments/decrements the locality's in-flight
/// counter around the pick result's lifetime. A pick itself is synchronous and instantaneous
/// from this core's point of view (the RPC's actual duration is owned by the
/// subchannel/transport layer), so this records the pick outcome rather than wrapping an
/// async call -- a `Complete` pick means the call has started and the caller is responsible
/// for reporting its end via the returned counter handle in a full RPC-layer integration,
/// which sits outside this core.
pub struct LoadRecordingPicker {
    inner: Arc<dyn Picker>,
    counter: Arc<crate::locality::stats::LocalityCounter>,
}

impl LoadRecordingPicker {
    pub fn new(inner: Arc<dyn Picker>, counter: Arc<crate::locality::stats::LocalityCounter>) -> Self {
        Self { inner, counter }
    }
}

impl Picker for LoadRecordingPicker {
    fn pick(&self, args: &PickArgs) -> PickResult {
        let result = self.inner.pick(args);
        if matches!(result, PickResult::Complete(_)) {
            self.counter.record_call_start();
        }
        result
    }
}

/// Wraps a child picker to observe per-call ORCA metrics. The actual ORCA wire transport is
/// an external collaborator; this only routes observed metrics into the shared
/// [`crate::locality::stats::LoadStatsStore`] counter so the rest of the pipeline has a single
/// place to look.
pub struct MetricsObservingPicker {
    inner: Arc<dyn Picker>,
    counter: Arc<crate::locality::stats::LocalityCounter>,
}

impl MetricsObservingPicker {
    pub fn new(inner: Arc<dyn Picker>, counter: Arc<crate::locality::stats::LocalityCounter>) -> Self {
        Self { inner, counter }
    }

    /// Recorded by the out-of-band ORCA reporting wrapper when a report arrives; exposed here
    /// so `ChildHelper` can route OOB reports into the same counter used by per-call
    /// observation, so that subchannels created for this child also emit periodic ORCA
    /// reports into the same metrics listener.
    pub fn record_oob_metric(&self, name: &str, value: f64) {
        self.counter.record_orca_metric(name, value);
    }
}

impl Picker for MetricsObservingPicker {
    fn pick(&self, args: &PickArgs) -> PickResult {
        self.inner.pick(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locality::helper::SubchannelHandle;
    use crate::locality::model::EndpointAddressGroup;
    use crate::locality::rng::ScriptedRandom;

    fn handle(id: u64) -> SubchannelHandle {
        SubchannelHandle::new(id, EndpointAddressGroup::new(vec![]))
    }

    struct FixedPicker(SubchannelHandle);
    impl Picker for FixedPicker {
        fn pick(&self, _args: &PickArgs) -> PickResult {
            PickResult::Complete(self.0.clone())
        }
    }

    #[test]
    fn buffer_picker_always_queues() {
        assert!(matches!(BufferPicker.pick(&PickArgs::default()), PickResult::Queue));
    }

    #[test]
    fn error_picker_fails_every_pick() {
        let picker = ErrorPicker::unavailable("down");
        match picker.pick(&PickArgs::default()) {
            PickResult::Fail(status) => assert_eq!(status.code(), Code::Unavailable),
            other => panic!("expected Fail, got {other:?}"),
        }
    }

    #[test]
    fn inter_locality_picker_selects_by_cumulative_weight() {
        let a = handle(1);
        let b = handle(2);
        let children = vec![
            WeightedChildPicker::new(1, Arc::new(FixedPicker(a.clone()))),
            WeightedChildPicker::new(2, Arc::new(FixedPicker(b.clone()))),
        ];
        // draw 0 -> child A (range [0,1)); draws 1,2 -> child B (range [1,3))
        let rng = Arc::new(ScriptedRandom::new(vec![0, 1, 2]));
        let picker = InterLocalityPicker::new(children, rng);

        let picks: Vec<_> = (0..3)
            .map(|_| match picker.pick(&PickArgs::default()) {
                PickResult::Complete(h) => h,
                other => panic!("expected Complete, got {other:?}"),
            })
            .collect();
        assert_eq!(picks, vec![a, b.clone(), b]);
    }

    #[test]
    fn droppable_picker_drops_below_threshold_and_delegates_above() {
        let inner = Arc::new(FixedPicker(handle(1)));
        let stats = Arc::new(LoadStatsStore::new());
        let rng = Arc::new(ScriptedRandom::new(vec![100_000, 300_000]));
        let picker = DroppablePicker::new(
            vec![DropOverload::new("throttle", 250_000)],
            inner,
            stats.clone(),
            rng,
        );

        match picker.pick(&PickArgs::default()) {
            PickResult::Fail(status) => {
                assert_eq!(status.code(), Code::Unavailable);
                assert!(status.message().contains("throttle"));
            }
            other => panic!("expected drop, got {other:?}"),
        }
        assert_eq!(stats.get_drop_counter("throttle").unwrap().count(), 1);

        assert!(matches!(
            picker.pick(&PickArgs::default()),
            PickResult::Complete(_)
        ));
    }

    #[test]
    fn load_recording_picker_increments_in_flight_on_complete() {
        let counter = Arc::new(crate::locality::stats::LocalityCounter::default());
        let inner = Arc::new(FixedPicker(handle(1)));
        let picker = LoadRecordingPicker::new(inner, counter.clone());
        picker.pick(&PickArgs::default());
        assert_eq!(counter.in_flight(), 1);
    }
}
