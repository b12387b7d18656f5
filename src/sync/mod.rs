//! Replicated session state
//!
//! A last-writer-wins key/value store shared by every participant of a
//! session. Each participant reads and writes its own [`Replica`]; the
//! [`hub::SessionHub`] relays writes between replicas so every view converges.
//!
//! Writes are visible to local reads immediately and reach other replicas
//! eventually. Concurrent writes to the same key are ordered by [`Stamp`]
//! (Lamport clock, then writer id). There is no atomicity across keys.

pub mod hub;
pub mod replica;

pub use hub::SessionRegistry;
pub use replica::{LwwMap, Replica};

use std::collections::HashMap;
use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

/// Connection-scoped participant identity
pub type ParticipantId = Uuid;

/// Ordering stamp for last-writer-wins merges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    /// Lamport clock of the writing replica
    pub clock: u64,
    /// Breaks ties between concurrent writes
    pub writer: ParticipantId,
}

/// Address of a replicated value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreKey {
    /// One value shared by the whole session
    Shared { name: String },
    /// One value per participant, written only by its owner
    PerParticipant { name: String, owner: ParticipantId },
}

impl StoreKey {
    pub fn shared(name: &str) -> Self {
        Self::Shared {
            name: name.to_string(),
        }
    }

    pub fn per_participant(name: &str, owner: ParticipantId) -> Self {
        Self::PerParticipant {
            name: name.to_string(),
            owner,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Shared { name } | Self::PerParticipant { name, .. } => name,
        }
    }
}

/// A participant as tracked by the session roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
}

/// Roster entry as seen from one replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectedParticipant {
    pub id: ParticipantId,
    pub display_name: String,
    pub is_self: bool,
}

/// Replication message exchanged between replicas and the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncOp {
    /// A stamped write to one key
    Write {
        key: StoreKey,
        value: Value,
        stamp: Stamp,
    },
    /// Full list of connected participants, in join order
    Roster { participants: Vec<Participant> },
}

/// Change notification delivered to local subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Changed(StoreKey),
    RosterChanged,
}

/// Read/write/subscribe access to the replicated session state
///
/// Implementations must apply local writes before returning so that a
/// subsequent `read` observes them.
pub trait SharedStore: Send + Sync {
    /// Identity of the participant owning this view
    fn local_id(&self) -> ParticipantId;

    fn read(&self, key: &StoreKey) -> Option<Value>;

    /// Stamp of the winning write for `key`, if any
    fn stamp(&self, key: &StoreKey) -> Option<Stamp>;

    /// Every participant's value for a per-participant variable
    fn read_all(&self, name: &str) -> HashMap<ParticipantId, Value>;

    /// Fire-and-forget write; replicated eventually
    fn write(&self, key: StoreKey, value: Value);

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    fn connected_participants(&self) -> Vec<ConnectedParticipant>;
}

/// Typed handle on a session-wide variable
///
/// A stored `null` reads as unset.
pub struct SharedVar<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SharedVar<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> StoreKey {
        StoreKey::shared(self.name)
    }
}

impl<T: Serialize + DeserializeOwned> SharedVar<T> {
    pub fn get(&self, store: &dyn SharedStore) -> Option<T> {
        store.read(&self.key()).and_then(|v| decode(self.name, v))
    }

    pub fn get_or(&self, store: &dyn SharedStore, initial: T) -> T {
        self.get(store).unwrap_or(initial)
    }

    pub fn set(&self, store: &dyn SharedStore, value: &T) {
        store.write(self.key(), encode(self.name, value));
    }
}

/// Typed handle on a variable with one value per participant
pub struct PerParticipantVar<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PerParticipantVar<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn key_for(&self, owner: ParticipantId) -> StoreKey {
        StoreKey::per_participant(self.name, owner)
    }
}

impl<T: Serialize + DeserializeOwned> PerParticipantVar<T> {
    pub fn of(&self, store: &dyn SharedStore, owner: ParticipantId) -> Option<T> {
        store
            .read(&self.key_for(owner))
            .and_then(|v| decode(self.name, v))
    }

    pub fn mine(&self, store: &dyn SharedStore) -> Option<T> {
        self.of(store, store.local_id())
    }

    pub fn set_mine(&self, store: &dyn SharedStore, value: &T) {
        store.write(self.key_for(store.local_id()), encode(self.name, value));
    }

    pub fn clear_mine(&self, store: &dyn SharedStore) {
        store.write(self.key_for(store.local_id()), Value::Null);
    }

    /// Decoded values of every participant that has one set
    pub fn all(&self, store: &dyn SharedStore) -> HashMap<ParticipantId, T> {
        store
            .read_all(self.name)
            .into_iter()
            .filter_map(|(owner, v)| decode(self.name, v).map(|t| (owner, t)))
            .collect()
    }
}

fn decode<T: DeserializeOwned>(name: &str, value: Value) -> Option<T> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(t) => Some(t),
        Err(e) => {
            warn!(key = name, error = %e, "Undecodable shared value, using initial");
            None
        }
    }
}

fn encode<T: Serialize>(name: &str, value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        warn!(key = name, error = %e, "Failed to encode shared value");
        Value::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    static FLAG: SharedVar<bool> = SharedVar::new("flag");
    static COUNTS: PerParticipantVar<u32> = PerParticipantVar::new("counts");

    #[test]
    fn test_typed_vars_read_back_local_writes() {
        let me = Uuid::new_v4();
        let (replica, _outbound) = Replica::detached(me);
        let store: &dyn SharedStore = &replica;

        assert_eq!(FLAG.get(store), None);
        assert!(!FLAG.get_or(store, false));

        FLAG.set(store, &true);
        COUNTS.set_mine(store, &7);

        assert_eq!(FLAG.get(store), Some(true));
        assert_eq!(COUNTS.mine(store), Some(7));
        assert_eq!(COUNTS.all(store).get(&me), Some(&7));
    }

    #[test]
    fn test_null_and_garbage_read_as_unset() {
        let (replica, _outbound) = Replica::detached(Uuid::new_v4());
        let store: &dyn SharedStore = &replica;

        store.write(FLAG.key(), serde_json::json!("not a bool"));
        assert_eq!(FLAG.get(store), None);
        assert!(FLAG.get_or(store, true));

        COUNTS.set_mine(store, &3);
        COUNTS.clear_mine(store);
        assert_eq!(COUNTS.mine(store), None);
        assert!(COUNTS.all(store).is_empty());
    }

    #[test]
    fn test_stamp_orders_by_clock_then_writer() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);

        assert!(Stamp { clock: 2, writer: low } > Stamp { clock: 1, writer: high });
        assert!(Stamp { clock: 1, writer: high } > Stamp { clock: 1, writer: low });
    }
}
