//! Pure state-aggregation fold. Reused both for the top-level aggregate across
//! localities and, one level down, for a round-robin child's aggregate across its
//! subchannels.

use crate::locality::model::ConnectivityState;

/// Folds a set of child connectivity states into one aggregate state.
///
/// The fold is commutative and associative, so the order of `states` does not matter:
///
/// | accumulator | next | result |
/// |---|---|---|
/// | `None` | `s` | `s` |
/// | `READY` or `s == READY` | — | `READY` |
/// | `CONNECTING` or `s == CONNECTING` | — | `CONNECTING` |
/// | `IDLE` or `s == IDLE` | — | `IDLE` |
/// | otherwise | — | accumulator unchanged (`TRANSIENT_FAILURE` stays) |
pub fn aggregate_states(states: impl IntoIterator<Item = ConnectivityState>) -> Option<ConnectivityState> {
    states.into_iter().fold(None, |acc, next| Some(fold_one(acc, next)))
}

fn fold_one(acc: Option<ConnectivityState>, next: ConnectivityState) -> ConnectivityState {
    use ConnectivityState::{Connecting, Idle, Ready, TransientFailure};
    match acc {
        None => next,
        Some(Ready) => Ready,
        Some(_) if next == Ready => Ready,
        Some(Connecting) => Connecting,
        Some(_) if next == Connecting => Connecting,
        Some(Idle) => Idle,
        Some(_) if next == Idle => Idle,
        Some(TransientFailure) => TransientFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectivityState::{Connecting, Idle, Ready, TransientFailure};

    #[test]
    fn empty_is_none() {
        assert_eq!(aggregate_states([]), None);
    }

    #[test]
    fn any_ready_wins() {
        assert_eq!(
            aggregate_states([TransientFailure, Connecting, Ready, Idle]),
            Some(Ready)
        );
    }

    #[test]
    fn connecting_beats_idle_and_transient_failure() {
        assert_eq!(
            aggregate_states([TransientFailure, Idle, Connecting]),
            Some(Connecting)
        );
    }

    #[test]
    fn idle_beats_transient_failure() {
        assert_eq!(aggregate_states([TransientFailure, Idle]), Some(Idle));
    }

    #[test]
    fn all_transient_failure_stays_transient_failure() {
        assert_eq!(
            aggregate_states([TransientFailure, TransientFailure]),
            Some(TransientFailure)
        );
    }

    #[test]
    fn order_does_not_matter() {
        let a = aggregate_states([Idle, Connecting, TransientFailure]);
        let b = aggregate_states([TransientFailure, Connecting, Idle]);
        assert_eq!(a, b);
    }

    #[test]
    fn single_state_passes_through() {
        assert_eq!(aggregate_states([Idle]), Some(Idle));
    }
}
