//! Click battle game rules on top of the replicated session store

pub mod outcome;
pub mod seat;
pub mod session;
pub mod target;
pub mod timers;

pub use seat::Side;
pub use session::{GameSession, MatchConfig, Refusal, SessionView};
