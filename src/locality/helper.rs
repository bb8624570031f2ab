//! `Helper` ("Parent Helper") and `ChildHelper`.
//!
//! `Helper` is the per-locality channel's view of the parent runtime: it can mint subchannel
//! handles and accepts `(state, picker)` updates. `ChildHelper` is the concrete
//! implementation LocalityStore hands to each locality's round-robin child policy; it wraps
//! every reported picker with the load-recording and metrics-observing decorators before
//! forwarding the result to the store.
//!
//! Modeled on the small `Send + Sync + 'static` trait-object collaborator style used by
//! `xds/xds_manager.rs`'s `XdsRouter`/`XdsClusterDiscovery`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::locality::model::{ConnectivityState, EndpointAddressGroup, LocalityId};
use crate::locality::picker::{BufferPicker, LoadRecordingPicker, MetricsObservingPicker, Picker};
use crate::locality::stats::LocalityCounter;

/// An opaque, cheaply-cloned identity for a subchannel, returned by [`Helper::create_subchannel`].
///
/// The core never dials a socket itself; it only asks the Helper to create the handle and
/// later receives [`crate::locality::round_robin::RoundRobinPolicy::handle_subchannel_state`]
/// callbacks tagged with the same handle.
#[derive(Debug, Clone)]
pub struct SubchannelHandle {
    id: u64,
    pub addresses: EndpointAddressGroup,
}

impl SubchannelHandle {
    pub fn new(id: u64, addresses: EndpointAddressGroup) -> Self {
        Self { id, addresses }
    }
}

impl PartialEq for SubchannelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for SubchannelHandle {}

impl std::hash::Hash for SubchannelHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Monotonic subchannel-id allocator, shared by every `Helper` in a channel so handles never
/// collide across localities.
#[derive(Debug, Default)]
pub struct SubchannelIdAllocator {
    next: AtomicU64,
}

impl SubchannelIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// The per-locality channel's view of the parent runtime.
pub trait Helper: Send + Sync {
    /// Creates a subchannel for one endpoint address group. Connection establishment itself
    /// is owned by the runtime behind this call, not by this core.
    fn create_subchannel(&self, addresses: EndpointAddressGroup) -> SubchannelHandle;

    /// Publishes a `(state, picker)` pair up the chain. For `ChildHelper` this flows into
    /// `LocalityStore::update_child_state`; for the top-level Helper installed by the
    /// embedding channel, this is the sink the channel itself installs.
    fn update_balancing_state(&self, state: ConnectivityState, picker: Arc<dyn Picker>);
}

/// Sink a `ChildHelper` reports into once it has wrapped a child's picker.
///
/// This is the non-owning back-reference described in design note "Cyclic helper
/// relationship": `ChildHelper` never owns the `LocalityStore`, it only calls through this
/// trait object, breaking the `LocalityStore -> LocalityLbInfo -> ChildHelper -> LocalityStore`
/// cycle.
pub trait ChildStateSink: Send + Sync {
    fn update_child_state(
        &self,
        locality: &LocalityId,
        state: ConnectivityState,
        picker: Arc<dyn Picker>,
    );
}

/// Adapter interposed between a locality's round-robin child balancer and the parent runtime.
pub struct ChildHelper {
    locality: LocalityId,
    counter: Arc<LocalityCounter>,
    parent: Arc<dyn Helper>,
    sink: std::sync::Weak<dyn ChildStateSink>,
    state: Mutex<ChildHelperState>,
}

struct ChildHelperState {
    current_child_state: Option<ConnectivityState>,
    current_child_picker: Arc<dyn Picker>,
    oob_report_interval: Option<Duration>,
}

impl ChildHelper {
    pub fn new(
        locality: LocalityId,
        counter: Arc<LocalityCounter>,
        parent: Arc<dyn Helper>,
        sink: std::sync::Weak<dyn ChildStateSink>,
        oob_report_interval: Option<Duration>,
    ) -> Self {
        Self {
            locality,
            counter,
            parent,
            sink,
            state: Mutex::new(ChildHelperState {
                current_child_state: None,
                current_child_picker: Arc::new(BufferPicker),
                oob_report_interval,
            }),
        }
    }

    pub fn current_child_state(&self) -> Option<ConnectivityState> {
        self.state.lock().expect("ChildHelper mutex poisoned").current_child_state
    }

    pub fn current_child_picker(&self) -> Arc<dyn Picker> {
        self.state
            .lock()
            .expect("ChildHelper mutex poisoned")
            .current_child_picker
            .clone()
    }

    /// The ORCA out-of-band report interval currently in effect for this locality's
    /// subchannels.
    pub fn oob_report_interval(&self) -> Option<Duration> {
        self.state.lock().expect("ChildHelper mutex poisoned").oob_report_interval
    }

    /// Updates the ORCA out-of-band report interval on an already-live helper. The actual
    /// ORCA wire transport that reads this value and schedules reports remains an external
    /// collaborator; this only stores the interval where that transport can find it.
    pub fn set_oob_report_interval(&self, interval: Duration) {
        self.state.lock().expect("ChildHelper mutex poisoned").oob_report_interval = Some(interval);
    }

    /// Returns the locality's sub-zone string.
    ///
    /// Provisional shim pending a dedicated `locality_name` field: upstream source comments
    /// flag this exact gap rather than inventing a final design for it.
    pub fn get_authority(&self) -> &str {
        &self.locality.sub_zone
    }
}

impl Helper for ChildHelper {
    fn create_subchannel(&self, addresses: EndpointAddressGroup) -> SubchannelHandle {
        // Subchannel creation (connecting, TLS, etc.) is owned entirely by the parent
        // Helper; this layer is purely a pass-through identity-wise so that
        // `handleSubchannelState` callbacks tagged with the returned handle compare equal.
        self.parent.create_subchannel(addresses)
    }

    fn update_balancing_state(&self, state: ConnectivityState, picker: Arc<dyn Picker>) {
        let load_recording: Arc<dyn Picker> = Arc::new(LoadRecordingPicker::new(picker, self.counter.clone()));
        let wrapped: Arc<dyn Picker> = Arc::new(MetricsObservingPicker::new(load_recording, self.counter.clone()));

        {
            let mut guard = self.state.lock().expect("ChildHelper mutex poisoned");
            guard.current_child_state = Some(state);
            guard.current_child_picker = wrapped.clone();
        }

        if let Some(sink) = self.sink.upgrade() {
            sink.update_child_state(&self.locality, state, wrapped);
        }
        // Else: the LocalityStore has been dropped or the locality already removed; a late
        // callback silently does nothing.
    }
}
