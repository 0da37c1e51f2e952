// model = "claude-opus-4-5"
// created = 2026-02-01
// modified = 2026-10-18
// driver = "Isaac Clayton"

//! Per-user clocks and the state vector.
//!
//! A user's clock is the next sequence number we expect from them, which is
//! the same as the number of their operations we have either stored or
//! accounted for (garbage collected ids count as accounted for).
//!
//! Complexity:
//! - get: O(1)
//! - set: O(1)
//! - merge: O(n) where n is number of users

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::Serialize;

use crate::key::KeyPub;

/// The clock of a single user: we know operations `0..clock` from `user`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub user: KeyPub,
    pub clock: u64,
}

impl State {
    /// The state of a user we have heard nothing from.
    pub fn empty(user: KeyPub) -> State {
        return State { user, clock: 0 };
    }
}

/// A state vector: user -> next expected sequence number.
///
/// Entries only ever grow. Missing users read as 0. Serialized as a list of
/// [`State`] so it survives formats that only allow string map keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<State>", from = "Vec<State>")]
pub struct StateVector {
    entries: FxHashMap<KeyPub, u64>,
}

impl StateVector {
    /// Create an empty state vector.
    pub fn new() -> StateVector {
        return StateVector {
            entries: FxHashMap::default(),
        };
    }

    /// Get the clock for a specific user.
    #[inline]
    pub fn get(&self, user: &KeyPub) -> u64 {
        return *self.entries.get(user).unwrap_or(&0);
    }

    /// Get the full state entry for a user.
    pub fn state(&self, user: &KeyPub) -> State {
        return State {
            user: *user,
            clock: self.get(user),
        };
    }

    /// Record a state. Never moves a clock backwards.
    pub fn set(&mut self, state: State) {
        let entry = self.entries.entry(state.user).or_insert(0);
        *entry = (*entry).max(state.clock);
    }

    /// All non-empty entries, sorted by user.
    pub fn states(&self) -> Vec<State> {
        let mut states: Vec<State> = self
            .entries
            .iter()
            .filter(|(_, clock)| **clock > 0)
            .map(|(user, clock)| State { user: *user, clock: *clock })
            .collect();
        states.sort_by(|a, b| a.user.cmp(&b.user));
        return states;
    }

    /// Number of users with a non-zero clock.
    pub fn len(&self) -> usize {
        return self.entries.values().filter(|clock| **clock > 0).count();
    }

    /// True if no user has a non-zero clock.
    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }
}

impl From<Vec<State>> for StateVector {
    fn from(states: Vec<State>) -> Self {
        let mut vector = StateVector::new();
        for state in states {
            vector.set(state);
        }
        return vector;
    }
}

impl From<StateVector> for Vec<State> {
    fn from(vector: StateVector) -> Self {
        return vector.states();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPair;

    #[test]
    fn missing_user_reads_zero() {
        let vector = StateVector::new();
        let alice = KeyPair::generate().key_pub;
        assert_eq!(vector.get(&alice), 0);
        assert_eq!(vector.state(&alice), State::empty(alice));
        assert!(vector.is_empty());
    }

    #[test]
    fn set_never_goes_backwards() {
        let alice = KeyPair::generate().key_pub;
        let mut vector = StateVector::new();

        vector.set(State { user: alice, clock: 5 });
        vector.set(State { user: alice, clock: 3 });
        assert_eq!(vector.get(&alice), 5);
    }

    #[test]
    fn json_round_trip_uses_state_list() {
        let alice = KeyPair::generate().key_pub;
        let mut vector = StateVector::new();
        vector.set(State { user: alice, clock: 4 });

        let json = serde_json::to_value(&vector).unwrap();
        assert!(json.is_array());
        let back: StateVector = serde_json::from_value(json).unwrap();
        assert_eq!(back, vector);
    }
}
