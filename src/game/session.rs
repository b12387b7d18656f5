//! Game session controller
//!
//! One controller runs per participant, on top of that participant's
//! replica of the session store. Every operation reads the local view,
//! decides, and writes back; replication carries the writes to everyone
//! else. Derived values (phase, winner, who may start) are recomputed on
//! demand and never stored.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::sync::{
    ConnectedParticipant, ParticipantId, PerParticipantVar, SharedStore, SharedVar, Stamp,
};
use crate::util::time::unix_millis;

use super::outcome::{self, MatchPhase, Winner};
use super::seat::{self, Seat, Side};
use super::target::{ContainerDimensions, Target, TargetSpawner};
use super::timers::MatchTimers;

static GAME_ACTIVE: SharedVar<bool> = SharedVar::new("game-active");
static GAME_TIMER: SharedVar<u32> = SharedVar::new("game-timer");
static LEFT_TARGETS: SharedVar<Vec<Target>> = SharedVar::new("left-targets");
static RIGHT_TARGETS: SharedVar<Vec<Target>> = SharedVar::new("right-targets");
static MATCH_HOST: SharedVar<ParticipantId> = SharedVar::new("match-host");
static PLAYER_SCORES: PerParticipantVar<u32> = PerParticipantVar::new("player-scores");
static PLAYER_SIDES: PerParticipantVar<Seat> = PerParticipantVar::new("player-sides");
/// Ids of targets this participant hit during the current match
static HIT_TARGETS: PerParticipantVar<Vec<Uuid>> = PerParticipantVar::new("hit-targets");

fn targets_var(side: Side) -> &'static SharedVar<Vec<Target>> {
    match side {
        Side::Left => &LEFT_TARGETS,
        Side::Right => &RIGHT_TARGETS,
    }
}

/// Match timing and spawn tuning
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Countdown start value in seconds
    pub duration_secs: u32,
    pub countdown_interval: Duration,
    pub spawn_interval: Duration,
    pub cleanup_interval: Duration,
    /// Targets at least this old are removed by cleanup
    pub target_lifetime_ms: u64,
    /// Per-side chance of a spawn on each spawn tick
    pub spawn_probability: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            countdown_interval: Duration::from_secs(1),
            spawn_interval: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(1),
            target_lifetime_ms: 5_000,
            spawn_probability: 0.7,
        }
    }
}

/// A refused request; the state is left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Refusal {
    #[error("Match already in progress")]
    AlreadyActive,

    #[error("No match in progress")]
    NotActive,

    #[error("Only seated players can do that")]
    NotSeated,

    #[error("Waiting for opponent")]
    WaitingForOpponent,

    #[error("Target is on the other side")]
    WrongSide,

    #[error("Target is already gone")]
    TargetGone,

    #[error("Only the winner of the last match can claim a reward")]
    NotWinner,
}

impl Refusal {
    pub fn code(&self) -> &'static str {
        match self {
            Refusal::AlreadyActive => "already_active",
            Refusal::NotActive => "not_active",
            Refusal::NotSeated => "not_seated",
            Refusal::WaitingForOpponent => "waiting_for_opponent",
            Refusal::WrongSide => "wrong_side",
            Refusal::TargetGone => "target_gone",
            Refusal::NotWinner => "not_winner",
        }
    }
}

/// Live participant holding a side
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatHolder {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub score: u32,
}

/// Everything a client needs to render the arena
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub participant_id: ParticipantId,
    pub seat: Option<Seat>,
    pub phase: MatchPhase,
    pub remaining_secs: u32,
    pub left_targets: Vec<Target>,
    pub right_targets: Vec<Target>,
    pub left: Option<SeatHolder>,
    pub right: Option<SeatHolder>,
    pub left_score: u32,
    pub right_score: u32,
    pub winner: Option<Winner>,
    pub is_self_winner: bool,
    pub can_start: bool,
    pub waiting_for_opponent: bool,
    pub connected_count: usize,
    pub container: ContainerDimensions,
}

/// Last live participant (in roster order) seated on `side`
fn holder_of<'a>(
    roster: &'a [ConnectedParticipant],
    seats: &HashMap<ParticipantId, Seat>,
    side: Side,
) -> Option<&'a ConnectedParticipant> {
    roster
        .iter()
        .filter(|p| seats.get(&p.id).and_then(|s| s.side()) == Some(side))
        .last()
}

pub struct GameSession {
    this: Weak<GameSession>,
    store: Arc<dyn SharedStore>,
    config: MatchConfig,
    spawner: Mutex<TargetSpawner>,
    container: Mutex<ContainerDimensions>,
    /// Local only; set by a refused start
    waiting_for_opponent: AtomicBool,
    timers: Mutex<Option<MatchTimers>>,
}

impl GameSession {
    pub fn new(store: Arc<dyn SharedStore>, config: MatchConfig, seed: u64) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            store,
            config,
            spawner: Mutex::new(TargetSpawner::new(seed)),
            container: Mutex::new(ContainerDimensions::default()),
            waiting_for_opponent: AtomicBool::new(false),
            timers: Mutex::new(None),
        })
    }

    fn store(&self) -> &dyn SharedStore {
        self.store.as_ref()
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.store.local_id()
    }

    pub fn is_active(&self) -> bool {
        GAME_ACTIVE.get_or(self.store(), false)
    }

    pub fn my_seat(&self) -> Option<Seat> {
        PLAYER_SIDES.mine(self.store())
    }

    fn my_side(&self) -> Option<Side> {
        self.my_seat().and_then(Seat::side)
    }

    pub fn my_score(&self) -> u32 {
        PLAYER_SCORES.mine(self.store()).unwrap_or(0)
    }

    pub fn remaining_secs(&self) -> u32 {
        GAME_TIMER.get_or(self.store(), self.config.duration_secs)
    }

    /// Targets on `side` that nobody has hit yet
    pub fn targets(&self, side: Side) -> Vec<Target> {
        self.live_targets(side, &self.hit_targets())
    }

    /// Every target id hit by any participant during this match
    fn hit_targets(&self) -> HashSet<Uuid> {
        HIT_TARGETS
            .all(self.store())
            .into_values()
            .flatten()
            .collect()
    }

    // A concurrent write of a whole list can carry back a target that was
    // already hit, so lists are always read through the hit set
    fn live_targets(&self, side: Side, hit: &HashSet<Uuid>) -> Vec<Target> {
        let mut targets = targets_var(side).get_or(self.store(), Vec::new());
        targets.retain(|t| !hit.contains(&t.id));
        targets
    }

    pub fn match_host(&self) -> Option<ParticipantId> {
        MATCH_HOST.get(self.store())
    }

    pub fn is_waiting_for_opponent(&self) -> bool {
        self.waiting_for_opponent.load(Ordering::SeqCst)
    }

    /// Both sides held by live participants
    pub fn can_start(&self) -> bool {
        let roster = self.store.connected_participants();
        let seats = PLAYER_SIDES.all(self.store());
        Side::BOTH
            .iter()
            .all(|&side| holder_of(&roster, &seats, side).is_some())
    }

    /// Re-sample the arena size after a client resize
    pub fn resize(&self, viewport_width: u32) {
        *self.container.lock() = ContainerDimensions::for_viewport(Some(viewport_width));
    }

    /// React to an observed change of the shared state
    pub fn reconcile(&self) {
        self.evaluate_seat();
        if self.is_waiting_for_opponent() && self.can_start() {
            self.waiting_for_opponent.store(false, Ordering::SeqCst);
        }
        if !self.is_active() && HIT_TARGETS.mine(self.store()).is_some_and(|h| !h.is_empty()) {
            HIT_TARGETS.set_mine(self.store(), &Vec::new());
        }
        self.supervise_host();
        self.sync_timers();
    }

    /// Assign a seat if we have none, or give ours up if we lost a race for it
    pub fn evaluate_seat(&self) -> Option<Seat> {
        let me = self.participant_id();
        let roster = self.store.connected_participants();
        if !roster.iter().any(|p| p.id == me) {
            return None;
        }

        let mut seats = PLAYER_SIDES.all(self.store());
        if seats.contains_key(&me) {
            let stamps = self.seat_stamps(&roster);
            if !seat::must_yield(me, &roster, &seats, &stamps) {
                return None;
            }
            let lost = seats.remove(&me);
            let seat = seat::choose_seat(me, &roster, &seats);
            PLAYER_SIDES.set_mine(self.store(), &seat);
            info!(
                participant_id = %me,
                lost = ?lost,
                seat = ?seat,
                "Seat conflict observed, yielding"
            );
            return Some(seat);
        }

        let seat = seat::choose_seat(me, &roster, &seats);
        PLAYER_SIDES.set_mine(self.store(), &seat);
        info!(
            participant_id = %me,
            seat = ?seat,
            live_participants = roster.len(),
            "Seat assigned"
        );
        Some(seat)
    }

    fn seat_stamps(&self, roster: &[ConnectedParticipant]) -> HashMap<ParticipantId, Stamp> {
        roster
            .iter()
            .filter_map(|p| {
                self.store
                    .stamp(&PLAYER_SIDES.key_for(p.id))
                    .map(|s| (p.id, s))
            })
            .collect()
    }

    /// Start a match if both seats are held by live participants
    pub fn start_match(&self) -> Result<(), Refusal> {
        if self.is_active() {
            return Err(Refusal::AlreadyActive);
        }
        if self.my_side().is_none() {
            return Err(Refusal::NotSeated);
        }

        let me = self.participant_id();
        if !self.can_start() {
            self.waiting_for_opponent.store(true, Ordering::SeqCst);
            debug!(participant_id = %me, "Start refused, waiting for opponent");
            return Err(Refusal::WaitingForOpponent);
        }
        self.waiting_for_opponent.store(false, Ordering::SeqCst);

        let store = self.store();
        MATCH_HOST.set(store, &me);
        GAME_TIMER.set(store, &self.config.duration_secs);
        for side in Side::BOTH {
            targets_var(side).set(store, &Vec::new());
        }
        for side in Side::BOTH {
            self.spawn_target(side);
        }
        GAME_ACTIVE.set(store, &true);

        info!(
            participant_id = %me,
            duration_secs = self.config.duration_secs,
            "Match started"
        );

        self.sync_timers();
        Ok(())
    }

    /// Resolve a click; returns the points awarded
    pub fn click_target(&self, side: Side, target_id: Uuid) -> Result<u32, Refusal> {
        if !self.is_active() {
            return Err(Refusal::NotActive);
        }
        match self.my_side() {
            None => return Err(Refusal::NotSeated),
            Some(mine) if mine != side => return Err(Refusal::WrongSide),
            Some(_) => {}
        }

        let store = self.store();
        let mut targets = self.live_targets(side, &self.hit_targets());
        let Some(pos) = targets.iter().position(|t| t.id == target_id) else {
            return Err(Refusal::TargetGone);
        };
        let target = targets.remove(pos);
        targets_var(side).set(store, &targets);

        let mut hits = HIT_TARGETS.mine(store).unwrap_or_default();
        hits.push(target_id);
        HIT_TARGETS.set_mine(store, &hits);

        let score = self.my_score().saturating_add(target.points);
        PLAYER_SCORES.set_mine(store, &score);

        debug!(
            participant_id = %self.participant_id(),
            target_id = %target_id,
            points = target.points,
            score,
            "Target hit"
        );
        Ok(target.points)
    }

    /// Zero our own score between matches
    pub fn reset_score(&self) -> Result<(), Refusal> {
        if self.is_active() {
            return Err(Refusal::AlreadyActive);
        }
        if self.my_side().is_none() {
            return Err(Refusal::NotSeated);
        }
        PLAYER_SCORES.set_mine(self.store(), &0);
        Ok(())
    }

    /// One countdown tick; returns true if this tick ended the match
    pub fn countdown_tick(&self) -> bool {
        if !self.is_active() {
            return false;
        }

        let remaining = self.remaining_secs();
        if remaining <= 1 {
            self.finish_match();
            true
        } else {
            GAME_TIMER.set(self.store(), &(remaining - 1));
            false
        }
    }

    fn finish_match(&self) {
        let store = self.store();
        GAME_TIMER.set(store, &0);
        for side in Side::BOTH {
            targets_var(side).set(store, &Vec::new());
        }
        GAME_ACTIVE.set(store, &false);

        let view = self.view();
        info!(
            participant_id = %self.participant_id(),
            left_score = view.left_score,
            right_score = view.right_score,
            winner = ?view.winner,
            "Match finished"
        );

        self.sync_timers();
    }

    /// One spawn tick: each side independently may get a new target
    pub fn spawn_tick(&self) {
        if !self.is_active() {
            return;
        }
        for side in Side::BOTH {
            let roll = self
                .spawner
                .lock()
                .should_spawn(self.config.spawn_probability);
            if roll {
                self.spawn_target(side);
            }
        }
    }

    fn spawn_target(&self, side: Side) -> Target {
        let container = *self.container.lock();
        let target = self.spawner.lock().spawn(side, container, unix_millis());

        let mut targets = self.live_targets(side, &self.hit_targets());
        targets.push(target.clone());
        targets_var(side).set(self.store(), &targets);
        target
    }

    pub fn cleanup_tick(&self) -> usize {
        self.cleanup_at(unix_millis())
    }

    /// Drop expired targets from both sides; returns how many were removed
    pub fn cleanup_at(&self, now_ms: u64) -> usize {
        if !self.is_active() {
            return 0;
        }

        let hit = self.hit_targets();
        let mut removed = 0;
        for side in Side::BOTH {
            let var = targets_var(side);
            let stored = var.get_or(self.store(), Vec::new()).len();
            let mut targets = self.live_targets(side, &hit);
            let live = targets.len();
            targets.retain(|t| !t.is_expired(now_ms, self.config.target_lifetime_ms));
            removed += live - targets.len();
            // Rewrite also when only already-hit targets were dropped
            if targets.len() != stored {
                var.set(self.store(), &targets);
            }
        }
        removed
    }

    /// Take over ticking if the host of an active match is gone
    fn supervise_host(&self) {
        if !self.is_active() {
            return;
        }

        let roster = self.store.connected_participants();
        let host = self.match_host();
        if host.is_some_and(|h| roster.iter().any(|p| p.id == h)) {
            return;
        }

        // Lowest seated id takes over; spectators only if nobody is seated
        let seats = PLAYER_SIDES.all(self.store());
        let seated = roster
            .iter()
            .filter(|p| seats.get(&p.id).and_then(|s| s.side()).is_some())
            .map(|p| p.id)
            .min();
        let successor = seated.or_else(|| roster.iter().map(|p| p.id).min());

        let me = self.participant_id();
        if successor == Some(me) {
            MATCH_HOST.set(self.store(), &me);
            info!(participant_id = %me, previous = ?host, "Taking over as match host");
        }
    }

    /// Run the tick tasks exactly when the match is active and we host it
    fn sync_timers(&self) {
        let me = self.participant_id();
        let should_run = self.is_active() && self.match_host() == Some(me);

        let mut timers = self.timers.lock();
        match (should_run, timers.is_some()) {
            (true, false) => {
                *timers = Some(MatchTimers::start(self.this.clone(), &self.config));
                debug!(participant_id = %me, "Match timers started");
            }
            (false, true) => {
                *timers = None;
                debug!(participant_id = %me, "Match timers stopped");
            }
            _ => {}
        }
    }

    #[cfg(test)]
    pub fn timers_running(&self) -> bool {
        self.timers
            .lock()
            .as_ref()
            .is_some_and(|t| t.is_running())
    }

    /// Only the outright winner of the last match may claim a reward
    pub fn check_reward_claim(&self) -> Result<(), Refusal> {
        if self.view().is_self_winner {
            Ok(())
        } else {
            Err(Refusal::NotWinner)
        }
    }

    /// Stop all periodic work; called on disconnect
    pub fn shutdown(&self) {
        if self.timers.lock().take().is_some() {
            debug!(participant_id = %self.participant_id(), "Match timers torn down");
        }
    }

    pub fn view(&self) -> SessionView {
        let store = self.store();
        let me = self.participant_id();
        let roster = store.connected_participants();
        let seats = PLAYER_SIDES.all(store);
        let scores = PLAYER_SCORES.all(store);

        let holder = |side: Side| {
            holder_of(&roster, &seats, side).map(|p| SeatHolder {
                participant_id: p.id,
                display_name: p.display_name.clone(),
                score: scores.get(&p.id).copied().unwrap_or(0),
            })
        };
        let left = holder(Side::Left);
        let right = holder(Side::Right);
        let left_score = left.as_ref().map_or(0, |h| h.score);
        let right_score = right.as_ref().map_or(0, |h| h.score);

        let active = self.is_active();
        let winner = outcome::winner(active, left_score, right_score);
        let seat = seats.get(&me).copied();
        let is_self_winner = match (winner, seat.and_then(Seat::side)) {
            (Some(w), Some(side)) => w.is_won_by(side),
            _ => false,
        };

        SessionView {
            participant_id: me,
            seat,
            phase: outcome::phase(active, left_score, right_score),
            remaining_secs: self.remaining_secs(),
            left_targets: self.targets(Side::Left),
            right_targets: self.targets(Side::Right),
            can_start: left.is_some() && right.is_some(),
            left,
            right,
            left_score,
            right_score,
            winner,
            is_self_winner,
            waiting_for_opponent: self.is_waiting_for_opponent(),
            connected_count: roster.len(),
            container: *self.container.lock(),
        }
    }
}
