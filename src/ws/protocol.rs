//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{SessionView, Side};
use crate::rewards::{Address, ClaimPanelView};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Begin a match (both seats must be held)
    StartMatch,

    /// Click on a target in one half of the arena
    ClickTarget { side: Side, target_id: Uuid },

    /// Zero own score between matches
    ResetScore,

    /// Client viewport changed
    Resize { viewport_width: u32 },

    /// Claim the victory reward to `address`; winner only
    ClaimReward { address: Address },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave the session
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        participant_id: Uuid,
        session: String,
        server_time: u64,
    },

    /// Current view of the session, pushed on every change
    State { view: Box<SessionView> },

    /// A click scored
    ClickAccepted { target_id: Uuid, points: u32 },

    /// Reward claim submitted, or failed at submission
    ClaimStatus { panel: Box<ClaimPanelView> },

    /// A request was refused; nothing changed
    Refused { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}
