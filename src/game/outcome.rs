//! Derived match state (never stored)

use serde::Serialize;

use super::seat::Side;

/// Lifecycle phase as observed from replicated fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// No match running and nothing scored
    Idle,
    /// Countdown running
    Active,
    /// Not running, scores retained from the last match
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Left,
    Right,
    Tie,
}

impl Winner {
    /// Whether a participant on `side` won outright
    pub fn is_won_by(self, side: Side) -> bool {
        matches!(
            (self, side),
            (Winner::Left, Side::Left) | (Winner::Right, Side::Right)
        )
    }
}

pub fn phase(active: bool, left_score: u32, right_score: u32) -> MatchPhase {
    if active {
        MatchPhase::Active
    } else if left_score > 0 || right_score > 0 {
        MatchPhase::Finished
    } else {
        MatchPhase::Idle
    }
}

/// Winner of a finished match; `None` while active or before anyone scored
pub fn winner(active: bool, left_score: u32, right_score: u32) -> Option<Winner> {
    if phase(active, left_score, right_score) != MatchPhase::Finished {
        return None;
    }

    Some(match left_score.cmp(&right_score) {
        std::cmp::Ordering::Greater => Winner::Left,
        std::cmp::Ordering::Less => Winner::Right,
        std::cmp::Ordering::Equal => Winner::Tie,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_score_wins_once_finished() {
        assert_eq!(winner(false, 7, 3), Some(Winner::Left));
        assert_eq!(winner(false, 2, 9), Some(Winner::Right));
    }

    #[test]
    fn test_equal_positive_scores_tie() {
        assert_eq!(winner(false, 5, 5), Some(Winner::Tie));
    }

    #[test]
    fn test_no_winner_while_active_or_unscored() {
        assert_eq!(winner(true, 7, 3), None);
        assert_eq!(winner(true, 0, 0), None);
        assert_eq!(winner(false, 0, 0), None);
    }

    #[test]
    fn test_one_sided_match_still_has_winner() {
        assert_eq!(winner(false, 0, 1), Some(Winner::Right));
    }

    #[test]
    fn test_phase_derivation() {
        assert_eq!(phase(false, 0, 0), MatchPhase::Idle);
        assert_eq!(phase(true, 0, 0), MatchPhase::Active);
        assert_eq!(phase(false, 1, 0), MatchPhase::Finished);
    }

    #[test]
    fn test_tie_is_nobody_outright() {
        assert!(Winner::Left.is_won_by(Side::Left));
        assert!(!Winner::Left.is_won_by(Side::Right));
        assert!(!Winner::Tie.is_won_by(Side::Left));
    }
}
