//! Game simulation modules

pub mod actions;
pub mod client;
pub mod combat;
pub mod command;
pub mod context;
pub mod entity;
pub mod error;
pub mod lag_comp;
pub mod r#match;
pub mod physics;
pub mod prediction;
pub mod rules;
pub mod server;
pub mod snapshot;
pub mod step;
pub mod store;

pub use client::{ClientSettings, ClientSimulation};
pub use command::{Command, TickedCommand};
pub use entity::{EntityId, EntityState};
pub use error::SimError;
pub use r#match::{GameMatch, JoinAck, MatchError, MatchHandle, MatchPhase, MatchStatus};
pub use rules::Rules;
pub use server::{ServerSettings, ServerSimulation};

use tokio::sync::oneshot;
use uuid::Uuid;

use actions::Action;

/// Input received from a connection, queued for the match loop
#[derive(Debug)]
pub struct PlayerInput {
    pub connection_id: Uuid,
    pub msg: InputMsg,
    pub received_at: u64,
}

/// What a connection asks of the match loop
#[derive(Debug)]
pub enum InputMsg {
    /// Spawn a player; the loop answers on `reply`
    Join {
        reply: oneshot::Sender<Result<JoinAck, MatchError>>,
    },
    /// LobbyConnected -> WaitingForPlayers
    Start {
        reply: oneshot::Sender<Result<(), MatchError>>,
    },
    Command(TickedCommand),
    ActionCompleted(Action),
    /// Measured round trip for the connection
    Latency { rtt_ms: u64 },
    Leave,
}
