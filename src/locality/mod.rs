//! Locality-aware load balancing: the `LocalityStore` orchestrator and its collaborators.

pub mod aggregate;
pub mod helper;
pub mod model;
pub mod picker;
pub mod rng;
pub mod round_robin;
pub mod stats;
pub mod store;
pub mod sync_context;

pub use aggregate::aggregate_states;
pub use helper::{ChildHelper, ChildStateSink, Helper, SubchannelHandle};
pub use model::{ConnectivityState, DropOverload, EndpointAddressGroup, LocalityId, LocalityInfo};
pub use picker::{PickArgs, PickResult, Picker};
pub use rng::{RandomSource, ScriptedRandom, SystemRandom};
pub use round_robin::{ChildPolicyProvider, ChildPolicyRegistry, RoundRobinPolicy, RoundRobinProvider};
pub use stats::{DropCounter, LoadStatsStore, LocalityCounter};
pub use store::LocalityStore;
pub use sync_context::SyncContext;
