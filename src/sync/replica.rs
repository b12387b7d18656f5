//! Per-participant view of the session state

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::{
    ConnectedParticipant, Participant, ParticipantId, SharedStore, Stamp, StoreEvent, StoreKey,
    SyncOp,
};

/// Capacity of the local change notification channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Last-writer-wins map of stamped values
#[derive(Debug, Clone, Default)]
pub struct LwwMap {
    entries: HashMap<StoreKey, (Value, Stamp)>,
}

impl LwwMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a write; returns true if it replaced the current value
    pub fn merge(&mut self, key: StoreKey, value: Value, stamp: Stamp) -> bool {
        match self.entries.get(&key) {
            Some((_, current)) if *current >= stamp => false,
            _ => {
                self.entries.insert(key, (value, stamp));
                true
            }
        }
    }

    pub fn get(&self, key: &StoreKey) -> Option<&Value> {
        self.entries.get(key).map(|(v, _)| v)
    }

    pub fn stamp(&self, key: &StoreKey) -> Option<Stamp> {
        self.entries.get(key).map(|(_, s)| *s)
    }

    /// Values of a per-participant variable, keyed by owner
    pub fn by_name(&self, name: &str) -> HashMap<ParticipantId, Value> {
        self.entries
            .iter()
            .filter_map(|(key, (value, _))| match key {
                StoreKey::PerParticipant { name: n, owner } if n == name => {
                    Some((*owner, value.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Every entry as a replayable write
    pub fn to_ops(&self) -> Vec<SyncOp> {
        self.entries
            .iter()
            .map(|(key, (value, stamp))| SyncOp::Write {
                key: key.clone(),
                value: value.clone(),
                stamp: *stamp,
            })
            .collect()
    }
}

struct ReplicaState {
    values: LwwMap,
    roster: Vec<Participant>,
    clock: u64,
}

/// One participant's replica of the session store
pub struct Replica {
    id: ParticipantId,
    state: RwLock<ReplicaState>,
    outbound: mpsc::UnboundedSender<SyncOp>,
    events: broadcast::Sender<StoreEvent>,
}

impl Replica {
    pub fn new(id: ParticipantId, outbound: mpsc::UnboundedSender<SyncOp>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id,
            state: RwLock::new(ReplicaState {
                values: LwwMap::new(),
                roster: Vec::new(),
                clock: 0,
            }),
            outbound,
            events,
        }
    }

    /// A replica whose outgoing writes are handed back to the caller
    pub fn detached(id: ParticipantId) -> (Self, mpsc::UnboundedReceiver<SyncOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }

    /// Merge an operation received from the hub or another replica
    pub fn apply_remote(&self, op: SyncOp) {
        let event = {
            let mut state = self.state.write();
            match op {
                SyncOp::Write { key, value, stamp } => {
                    state.clock = state.clock.max(stamp.clock);
                    if state.values.merge(key.clone(), value, stamp) {
                        Some(StoreEvent::Changed(key))
                    } else {
                        None
                    }
                }
                SyncOp::Roster { participants } => {
                    if state.roster == participants {
                        None
                    } else {
                        state.roster = participants;
                        Some(StoreEvent::RosterChanged)
                    }
                }
            }
        };

        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }
}

impl SharedStore for Replica {
    fn local_id(&self) -> ParticipantId {
        self.id
    }

    fn read(&self, key: &StoreKey) -> Option<Value> {
        self.state.read().values.get(key).cloned()
    }

    fn stamp(&self, key: &StoreKey) -> Option<Stamp> {
        self.state.read().values.stamp(key)
    }

    fn read_all(&self, name: &str) -> HashMap<ParticipantId, Value> {
        self.state.read().values.by_name(name)
    }

    fn write(&self, key: StoreKey, value: Value) {
        let op = {
            let mut state = self.state.write();
            state.clock += 1;
            let stamp = Stamp {
                clock: state.clock,
                writer: self.id,
            };
            state.values.merge(key.clone(), value.clone(), stamp);
            SyncOp::Write {
                key: key.clone(),
                value,
                stamp,
            }
        };

        if self.outbound.send(op).is_err() {
            debug!(participant_id = %self.id, "Replica detached from hub, write kept local");
        }
        let _ = self.events.send(StoreEvent::Changed(key));
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn connected_participants(&self) -> Vec<ConnectedParticipant> {
        self.state
            .read()
            .roster
            .iter()
            .map(|p| ConnectedParticipant {
                id: p.id,
                display_name: p.display_name.clone(),
                is_self: p.id == self.id,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SyncOp>) -> Vec<SyncOp> {
        let mut ops = Vec::new();
        while let Ok(op) = rx.try_recv() {
            ops.push(op);
        }
        ops
    }

    #[test]
    fn test_replicas_converge_regardless_of_delivery_order() {
        let (a, mut a_out) = Replica::detached(Uuid::from_u128(1));
        let (b, mut b_out) = Replica::detached(Uuid::from_u128(2));
        let key = StoreKey::shared("game-timer");

        // Concurrent writes, neither has seen the other
        a.write(key.clone(), json!(7));
        b.write(key.clone(), json!(3));

        let from_a = drain(&mut a_out);
        let from_b = drain(&mut b_out);

        for op in from_b.iter().rev() {
            a.apply_remote(op.clone());
        }
        for op in from_a {
            b.apply_remote(op);
        }

        // Same clock, higher writer id wins on both sides
        assert_eq!(a.read(&key), Some(json!(3)));
        assert_eq!(b.read(&key), Some(json!(3)));
    }

    #[test]
    fn test_later_write_wins_after_observing_remote() {
        let (a, mut a_out) = Replica::detached(Uuid::from_u128(9));
        let (b, _b_out) = Replica::detached(Uuid::from_u128(1));
        let key = StoreKey::shared("game-active");

        a.write(key.clone(), json!(true));
        for op in drain(&mut a_out) {
            b.apply_remote(op);
        }

        // b's clock advanced past a's write, so its write dominates
        b.write(key.clone(), json!(false));
        let stamp = b.stamp(&key).expect("stamped");
        assert_eq!(stamp.clock, 2);
        assert_eq!(b.read(&key), Some(json!(false)));
    }

    #[test]
    fn test_stale_remote_write_is_ignored_without_event() {
        let (a, _a_out) = Replica::detached(Uuid::from_u128(1));
        let key = StoreKey::shared("left-targets");
        a.write(key.clone(), json!([]));
        a.write(key.clone(), json!([1]));

        let mut events = a.subscribe();
        a.apply_remote(SyncOp::Write {
            key: key.clone(),
            value: json!([9]),
            stamp: Stamp {
                clock: 1,
                writer: Uuid::from_u128(5),
            },
        });

        assert_eq!(a.read(&key), Some(json!([1])));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_roster_marks_self() {
        let me = Uuid::from_u128(4);
        let (replica, _out) = Replica::detached(me);
        let mut events = replica.subscribe();

        replica.apply_remote(SyncOp::Roster {
            participants: vec![
                Participant {
                    id: Uuid::from_u128(3),
                    display_name: "ada".into(),
                },
                Participant {
                    id: me,
                    display_name: "bob".into(),
                },
            ],
        });

        let roster = replica.connected_participants();
        assert_eq!(roster.len(), 2);
        assert!(!roster[0].is_self);
        assert!(roster[1].is_self);
        assert_eq!(events.try_recv().ok(), Some(StoreEvent::RosterChanged));
    }

    #[test]
    fn test_per_participant_values_grouped_by_owner() {
        let mut map = LwwMap::new();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let stamp = Stamp { clock: 1, writer: a };

        map.merge(StoreKey::per_participant("player-scores", a), json!(4), stamp);
        map.merge(StoreKey::per_participant("player-scores", b), json!(2), stamp);
        map.merge(StoreKey::per_participant("player-sides", a), json!("left"), stamp);

        let scores = map.by_name("player-scores");
        assert_eq!(scores.len(), 2);
        assert_eq!(scores.get(&a), Some(&json!(4)));
    }
}
