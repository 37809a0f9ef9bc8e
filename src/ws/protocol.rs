//! WebSocket protocol message definitions
//! These are the wire types for client-server communication.
//!
//! Text frames carry JSON [`ClientMsg`] / [`ServerMsg`]; binary frames from
//! the client carry one encoded [`crate::game::TickedCommand`] each.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::actions::Action;
use crate::game::combat::KillEvent;
use crate::game::entity::{EntityId, EntityState};
use crate::game::lag_comp::HitRecord;
use crate::game::r#match::MatchState;

/// Messages sent from client to server as text frames
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Ask the server to leave the lobby and start the wait timer
    StartMatch,

    /// The client finished the animation for an action
    ActionCompleted { action: Action },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave current match
    Leave,
}

/// Match state as broadcast to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchInfo {
    #[serde(flatten)]
    pub state: MatchState,
    /// Time left on whichever timer the phase is running
    pub remaining_ms: Option<u64>,
    pub players: usize,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after joining
    Welcome {
        connection_id: Uuid,
        /// Entity this connection controls
        entity: EntityId,
        tick: u64,
        tick_rate: u32,
        server_time: u64,
        info: MatchInfo,
    },

    /// Authoritative world (sent at regular intervals)
    Snapshot {
        tick: u64,
        info: MatchInfo,
        entities: Vec<EntityState>,
        /// Validated shots since the last snapshot
        hits: Vec<HitRecord>,
        kills: Vec<KillEvent>,
    },

    /// Phase transition
    MatchPhase { tick: u64, info: MatchInfo },

    PlayerJoined {
        connection_id: Uuid,
        entity: EntityId,
    },

    PlayerLeft {
        connection_id: Uuid,
        entity: EntityId,
        reason: String,
    },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },
}

impl ServerMsg {
    pub fn error(code: impl Into<String>, message: impl ToString) -> Self {
        ServerMsg::Error {
            code: code.into(),
            message: message.to_string(),
        }
    }
}
