//! Simulation error taxonomy
//!
//! Every variant is handled inside the core; none of them ends a session.

use super::entity::EntityId;
use crate::util::time::Tick;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    /// Mutation attempted by a non-server role; the call was a no-op
    #[error("mutation rejected: caller is not the authoritative role")]
    NotAuthoritative,

    /// Historical lookup beyond the retained snapshot depth
    #[error("no snapshot retained for tick {requested} (oldest {oldest:?})")]
    StaleHistory {
        requested: Tick,
        oldest: Option<Tick>,
    },

    /// Action-flag transition refused by its guard
    #[error("action transition rejected")]
    InvalidTransition,

    /// No command arrived for an entity at this tick
    #[error("no command for entity {entity} at tick {tick}")]
    MissingCommand { entity: EntityId, tick: Tick },

    /// Local prediction disagrees with the authoritative snapshot
    #[error("prediction diverged at tick {tick}")]
    DesyncDetected { tick: Tick },

    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// A command for a tick at or before one already consumed
    #[error("command for tick {tick} arrived after tick {last}")]
    OutOfOrderCommand { tick: Tick, last: Tick },

    /// A second command for a tick that already has one (first one wins)
    #[error("duplicate command for tick {tick}")]
    DuplicateCommand { tick: Tick },

    #[error("command buffer full, dropped tick {tick}")]
    CommandOverflow { tick: Tick },

    #[error("operation not valid in match phase {0}")]
    InvalidPhase(&'static str),

    #[error("need {required} players to start, have {present}")]
    NotEnoughPlayers { required: usize, present: usize },
}
