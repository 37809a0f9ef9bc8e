//! Explicit simulation context threaded through every call

use super::rules::Rules;
use super::step::StepFrame;
use super::store::{Role, StateStore};
use crate::util::time::{Tick, TickClock};

/// Everything one peer's simulation owns: its role, clock, store and rules
pub struct SimulationContext {
    role: Role,
    clock: TickClock,
    store: StateStore,
    rules: Rules,
}

impl SimulationContext {
    pub fn new(role: Role, rules: Rules) -> Self {
        Self {
            role,
            clock: TickClock::new(rules.tick_rate),
            store: StateStore::new(role, rules.respawn_ticks),
            rules,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn tick(&self) -> Tick {
        self.clock.current()
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Re-seat the clock (clients syncing to the server's tick)
    pub fn set_clock(&mut self, clock: TickClock) {
        self.clock = clock;
    }

    pub fn advance(&mut self) -> Tick {
        self.clock.advance()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut StateStore {
        &mut self.store
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// Step inputs for the current tick
    pub fn frame(&self) -> StepFrame<'_> {
        StepFrame::new(self.clock.current(), &self.rules)
    }

    /// Split borrow for callers that step entities and write the store in
    /// the same scope
    pub fn parts_mut(&mut self) -> (&mut StateStore, &TickClock, &Rules) {
        (&mut self.store, &self.clock, &self.rules)
    }

    /// Clock back to zero and store emptied
    pub fn reset(&mut self) {
        self.clock.reset();
        self.store.reset();
    }
}
