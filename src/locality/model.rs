//! Data model shared across the locality-balancing core.

use std::net::SocketAddr;

/// Opaque (region, zone, sub-zone) key identifying a locality.
///
/// Equality is structural and the hash is stable; no total order is required.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalityId {
    pub region: String,
    pub zone: String,
    pub sub_zone: String,
}

impl LocalityId {
    pub fn new(
        region: impl Into<String>,
        zone: impl Into<String>,
        sub_zone: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            zone: zone.into(),
            sub_zone: sub_zone.into(),
        }
    }
}

impl std::fmt::Display for LocalityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.region, self.zone, self.sub_zone)
    }
}

/// An ordered set of socket addresses treated as one addressable backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointAddressGroup {
    pub addresses: Vec<SocketAddr>,
}

impl EndpointAddressGroup {
    pub fn new(addresses: Vec<SocketAddr>) -> Self {
        Self { addresses }
    }

    /// The address used to key this group for diffing and dialing purposes.
    pub fn dialing_key(&self) -> Option<SocketAddr> {
        self.addresses.first().copied()
    }
}

/// Input describing one locality, as handed to [`crate::locality::LocalityStore`] by the xDS
/// client. Immutable once delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalityInfo {
    /// weight; negative values are rejected by `update_locality_store`.
    pub weight: i64,
    pub endpoints: Vec<EndpointAddressGroup>,
}

impl LocalityInfo {
    pub fn new(weight: i64, endpoints: Vec<EndpointAddressGroup>) -> Self {
        Self { weight, endpoints }
    }
}

/// A server-dictated drop instruction: drop `drops_per_million` out of every million RPCs
/// tagged `category`, for load shedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropOverload {
    pub category: String,
    pub drops_per_million: u32,
}

impl DropOverload {
    pub fn new(category: impl Into<String>, drops_per_million: u32) -> Self {
        Self {
            category: category.into(),
            drops_per_million,
        }
    }
}

/// The connectivity-state lattice shared by subchannels, child policies, and the top-level
/// aggregate. Folding is commutative and associative; see
/// [`crate::locality::aggregate_states`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Ready => "READY",
            Self::TransientFailure => "TRANSIENT_FAILURE",
        };
        f.write_str(s)
    }
}
