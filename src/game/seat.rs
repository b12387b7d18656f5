//! Seat assignment policy

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::sync::{ConnectedParticipant, ParticipantId, Stamp};

/// Half of the arena a target or player belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Role of a participant within a session; unassigned is the absence of a seat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seat {
    Left,
    Right,
    Spectator,
}

impl Seat {
    /// The side this seat plays on, if it plays at all
    pub fn side(self) -> Option<Side> {
        match self {
            Seat::Left => Some(Side::Left),
            Seat::Right => Some(Side::Right),
            Seat::Spectator => None,
        }
    }
}

impl From<Side> for Seat {
    fn from(side: Side) -> Self {
        match side {
            Side::Left => Seat::Left,
            Side::Right => Seat::Right,
        }
    }
}

/// Pick a seat for `me`, who currently holds none
///
/// Only seats of other live participants count; values left behind by
/// disconnected participants are ignored.
pub fn choose_seat(
    me: ParticipantId,
    roster: &[ConnectedParticipant],
    seats: &HashMap<ParticipantId, Seat>,
) -> Seat {
    if roster.len() > 2 {
        return Seat::Spectator;
    }

    let taken: Vec<Side> = roster
        .iter()
        .filter(|p| p.id != me)
        .filter_map(|p| seats.get(&p.id).and_then(|s| s.side()))
        .collect();

    match taken.as_slice() {
        [] => Seat::Left,
        [side] => side.opposite().into(),
        _ => Seat::Spectator,
    }
}

/// Whether `me` lost a simultaneous claim on its side
///
/// Among live holders of the same side, the claim with the greatest stamp
/// yields. Every replica sees the same stamps once writes have propagated,
/// so all of them agree on who gives way.
pub fn must_yield(
    me: ParticipantId,
    roster: &[ConnectedParticipant],
    seats: &HashMap<ParticipantId, Seat>,
    stamps: &HashMap<ParticipantId, Stamp>,
) -> bool {
    let Some(my_side) = seats.get(&me).and_then(|s| s.side()) else {
        return false;
    };
    let Some(my_stamp) = stamps.get(&me) else {
        return false;
    };

    roster
        .iter()
        .filter(|p| p.id != me)
        .filter(|p| seats.get(&p.id).and_then(|s| s.side()) == Some(my_side))
        .any(|p| stamps.get(&p.id).is_some_and(|theirs| theirs < my_stamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn live(ids: &[u128], me: u128) -> Vec<ConnectedParticipant> {
        ids.iter()
            .map(|&n| ConnectedParticipant {
                id: Uuid::from_u128(n),
                display_name: format!("p{n}"),
                is_self: n == me,
            })
            .collect()
    }

    fn id(n: u128) -> ParticipantId {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_first_arrival_takes_left() {
        let roster = live(&[1], 1);
        assert_eq!(choose_seat(id(1), &roster, &HashMap::new()), Seat::Left);
    }

    #[test]
    fn test_second_arrival_takes_opposite_side() {
        let roster = live(&[1, 2], 2);

        let seats = HashMap::from([(id(1), Seat::Left)]);
        assert_eq!(choose_seat(id(2), &roster, &seats), Seat::Right);

        let seats = HashMap::from([(id(1), Seat::Right)]);
        assert_eq!(choose_seat(id(2), &roster, &seats), Seat::Left);
    }

    #[test]
    fn test_crowded_roster_spectates() {
        let roster = live(&[1, 2, 3], 3);
        let seats = HashMap::from([(id(1), Seat::Left)]);
        assert_eq!(choose_seat(id(3), &roster, &seats), Seat::Spectator);
    }

    #[test]
    fn test_disconnected_seat_holders_are_ignored() {
        // Participant 9 held left but is gone
        let roster = live(&[1, 2], 2);
        let seats = HashMap::from([(id(9), Seat::Left), (id(1), Seat::Right)]);
        assert_eq!(choose_seat(id(2), &roster, &seats), Seat::Left);
    }

    #[test]
    fn test_other_spectator_does_not_claim_a_side() {
        let roster = live(&[1, 2], 2);
        let seats = HashMap::from([(id(1), Seat::Spectator)]);
        assert_eq!(choose_seat(id(2), &roster, &seats), Seat::Left);
    }

    #[test]
    fn test_later_claim_yields_on_conflict() {
        let roster = live(&[1, 2], 1);
        let seats = HashMap::from([(id(1), Seat::Left), (id(2), Seat::Left)]);
        let stamps = HashMap::from([
            (id(1), Stamp { clock: 1, writer: id(1) }),
            (id(2), Stamp { clock: 1, writer: id(2) }),
        ]);

        assert!(!must_yield(id(1), &roster, &seats, &stamps));
        assert!(must_yield(id(2), &roster, &seats, &stamps));
    }

    #[test]
    fn test_distinct_sides_never_yield() {
        let roster = live(&[1, 2], 1);
        let seats = HashMap::from([(id(1), Seat::Left), (id(2), Seat::Right)]);
        let stamps = HashMap::from([
            (id(1), Stamp { clock: 5, writer: id(1) }),
            (id(2), Stamp { clock: 1, writer: id(2) }),
        ]);

        assert!(!must_yield(id(1), &roster, &seats, &stamps));
        assert!(!must_yield(id(2), &roster, &seats, &stamps));
    }
}
