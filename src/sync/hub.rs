//! Session hub - relays replicated writes between participants

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{LwwMap, Participant, ParticipantId, Replica, StoreKey, SyncOp};

/// Capacity of the per-session fan-out channel
const OPS_CHANNEL_CAPACITY: usize = 1024;

struct HubState {
    values: LwwMap,
    roster: Vec<Participant>,
}

/// Relay and authoritative copy of one session's state
pub struct SessionHub {
    name: String,
    state: Mutex<HubState>,
    ops_tx: broadcast::Sender<SyncOp>,
}

/// Background tasks wiring a replica to its hub; aborted on drop
pub struct HubLink {
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl Drop for HubLink {
    fn drop(&mut self) {
        self.inbound.abort();
        self.outbound.abort();
    }
}

impl SessionHub {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let (ops_tx, _) = broadcast::channel(OPS_CHANNEL_CAPACITY);
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(HubState {
                values: LwwMap::new(),
                roster: Vec::new(),
            }),
            ops_tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connect a participant and return its seeded replica
    pub fn join(self: &Arc<Self>, participant: Participant) -> (Arc<Replica>, HubLink) {
        let participant_id = participant.id;
        let (replica, mut outbound_rx) = Replica::detached(participant_id);
        let replica = Arc::new(replica);

        let (mut ops_rx, roster) = {
            let mut state = self.state.lock();
            // Subscribe under the lock so nothing published between the
            // snapshot and the subscription is lost
            let ops_rx = self.ops_tx.subscribe();
            for op in state.values.to_ops() {
                replica.apply_remote(op);
            }
            state.roster.retain(|p| p.id != participant_id);
            state.roster.push(participant.clone());
            let roster = state.roster.clone();
            replica.apply_remote(SyncOp::Roster {
                participants: roster.clone(),
            });
            let _ = self.ops_tx.send(SyncOp::Roster {
                participants: roster.clone(),
            });
            (ops_rx, roster)
        };

        info!(
            session = %self.name,
            participant_id = %participant_id,
            display_name = %participant.display_name,
            participant_count = roster.len(),
            "Participant joined session"
        );

        let hub = Arc::clone(self);
        let inbound = tokio::spawn(async move {
            while let Some(op) = outbound_rx.recv().await {
                hub.publish(op);
            }
        });

        let hub = Arc::clone(self);
        let target = Arc::clone(&replica);
        let outbound = tokio::spawn(async move {
            loop {
                match ops_rx.recv().await {
                    Ok(op) => target.apply_remote(op),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            session = %hub.name,
                            participant_id = %participant_id,
                            lagged = n,
                            "Replica lagged, resyncing from hub"
                        );
                        for op in hub.snapshot_ops() {
                            target.apply_remote(op);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        (
            replica,
            HubLink {
                inbound,
                outbound,
            },
        )
    }

    /// Remove a participant from the roster; its per-participant values stay
    pub fn leave(&self, participant_id: ParticipantId) {
        let mut state = self.state.lock();
        let before = state.roster.len();
        state.roster.retain(|p| p.id != participant_id);
        if state.roster.len() == before {
            return;
        }
        let _ = self.ops_tx.send(SyncOp::Roster {
            participants: state.roster.clone(),
        });

        info!(
            session = %self.name,
            participant_id = %participant_id,
            participant_count = state.roster.len(),
            "Participant left session"
        );
    }

    fn publish(&self, op: SyncOp) {
        let mut state = self.state.lock();
        if let SyncOp::Write { key, value, stamp } = &op {
            if !state.values.merge(key.clone(), value.clone(), *stamp) {
                debug!(session = %self.name, key = key.name(), "Dropped superseded write");
                return;
            }
        }
        let _ = self.ops_tx.send(op);
    }

    fn snapshot_ops(&self) -> Vec<SyncOp> {
        let state = self.state.lock();
        let mut ops = state.values.to_ops();
        ops.push(SyncOp::Roster {
            participants: state.roster.clone(),
        });
        ops
    }

    pub fn participant_count(&self) -> usize {
        self.state.lock().roster.len()
    }

    pub fn roster(&self) -> Vec<Participant> {
        self.state.lock().roster.clone()
    }

    /// Current session-wide values, by name
    pub fn shared_values(&self) -> serde_json::Map<String, Value> {
        let state = self.state.lock();
        state
            .values
            .to_ops()
            .into_iter()
            .filter_map(|op| match op {
                SyncOp::Write {
                    key: StoreKey::Shared { name },
                    value,
                    ..
                } => Some((name, value)),
                _ => None,
            })
            .collect()
    }
}

/// Registry of live sessions by name
pub struct SessionRegistry {
    hubs: DashMap<String, Arc<SessionHub>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            hubs: DashMap::new(),
        }
    }

    /// Join (creating if needed) the named session
    pub fn join(&self, session: &str, participant: Participant) -> (Arc<Replica>, HubLink) {
        // Join while holding the entry so a concurrent `leave` cannot
        // remove the hub between lookup and join
        let entry = self
            .hubs
            .entry(session.to_string())
            .or_insert_with(|| SessionHub::new(session));
        entry.value().join(participant)
    }

    /// Leave the named session, dropping it once empty
    pub fn leave(&self, session: &str, participant_id: ParticipantId) {
        if let Some(hub) = self.get(session) {
            hub.leave(participant_id);
        }
        if self
            .hubs
            .remove_if(session, |_, hub| hub.participant_count() == 0)
            .is_some()
        {
            info!(session = %session, "Session closed");
        }
    }

    pub fn get(&self, session: &str) -> Option<Arc<SessionHub>> {
        self.hubs.get(session).map(|h| h.value().clone())
    }

    pub fn active_sessions(&self) -> usize {
        self.hubs.len()
    }

    pub fn total_participants(&self) -> usize {
        self.hubs
            .iter()
            .map(|h| h.value().participant_count())
            .sum()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
