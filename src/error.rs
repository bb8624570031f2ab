//! Crate-wide configuration error type.

use thiserror::Error;
use tonic::{Code, Status};

/// Errors returned by configuration-time operations on [`crate::locality::LocalityStore`].
///
/// These always fail the enclosing call without mutating installed state: a rejected
/// `updateLocalityStore` or `updateDropPercentage` call leaves the previously-installed
/// locality map, drop policy, and top-level picker untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A `LocalityInfo.weight` was negative.
    #[error("locality weight must be non-negative, got {0}")]
    NegativeWeight(i64),
    /// A `DropOverload.drops_per_million` was outside `0..=1_000_000`.
    #[error("drops_per_million must be in 0..=1_000_000, got {0}")]
    DropsPerMillionOutOfRange(u64),
    /// The child-policy registry has no provider for the requested name.
    ///
    /// This is a fatal initialization error: the registry always carries the built-in
    /// `round_robin` provider in this implementation, so seeing this means the store was
    /// misconfigured at construction.
    #[error("no child policy provider registered for {0:?}")]
    MissingChildPolicyProvider(String),
    /// The resolver target URI had no authority component.
    #[error("resolver target is missing a required authority")]
    EmptyAuthority,
}

impl From<ConfigError> for Status {
    /// All `ConfigError` variants are caller-input problems, so they all map to
    /// `InvalidArgument` when an xDS client needs to surface a rejected call as a
    /// `tonic::Status`.
    fn from(err: ConfigError) -> Self {
        Status::new(Code::InvalidArgument, err.to_string())
    }
}
