//! Client-side prediction, reconciliation and remote interpolation

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::command::Command;
use super::entity::{EntityId, EntityState, Tolerance, Vec3};
use super::error::SimError;
use super::rules::Rules;
use super::snapshot::Snapshot;
use super::step::{Renderable, SimEvent, Simulatable, StepFrame};
use crate::util::time::Tick;

/// One locally predicted tick
#[derive(Debug, Clone)]
struct PredictedTick {
    tick: Tick,
    command: Command,
    /// State after applying `command`
    state: EntityState,
}

/// What an authoritative state did to the prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciliation {
    /// Prediction matched within tolerance
    Confirmed { tick: Tick },
    /// Prediction diverged; history was replaced and replayed
    Corrected {
        tick: Tick,
        replayed: usize,
        /// Old presented position minus the corrected one
        offset: Vec3,
    },
    /// Nothing was pending; the authoritative state was taken as is
    Adopted { tick: Tick },
    /// Older than anything still buffered
    Stale { tick: Tick },
}

/// Predicts the locally controlled entity ahead of the server
pub struct Predictor {
    entity: EntityId,
    current: EntityState,
    pending: VecDeque<PredictedTick>,
    capacity: usize,
    last_tick: Option<Tick>,
    tolerance: Tolerance,
    /// Visual offset left over from corrections, decays towards zero
    correction: Vec3,
    desyncs: u64,
}

impl Predictor {
    pub fn new(initial: EntityState, capacity: usize, tolerance: Tolerance) -> Self {
        Self {
            entity: initial.id,
            current: initial,
            pending: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            last_tick: None,
            tolerance,
            correction: Vec3::ZERO,
            desyncs: 0,
        }
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Latest predicted state
    pub fn state(&self) -> &EntityState {
        &self.current
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn last_tick(&self) -> Option<Tick> {
        self.last_tick
    }

    pub fn desyncs(&self) -> u64 {
        self.desyncs
    }

    /// Run the local command for `tick` immediately. Ticks must strictly
    /// increase; a full buffer drops its oldest entry.
    pub fn predict(&mut self, tick: Tick, command: Command, rules: &Rules) -> Result<Vec<SimEvent>, SimError> {
        if let Some(last) = self.last_tick {
            if tick == last {
                return Err(SimError::DuplicateCommand { tick });
            }
            if tick < last {
                return Err(SimError::OutOfOrderCommand { tick, last });
            }
        }

        let stepped = self.current.step(&command, &StepFrame::new(tick, rules));
        self.current = stepped.state.clone();
        self.last_tick = Some(tick);

        if self.pending.len() >= self.capacity {
            self.pending.pop_front();
        }
        self.pending.push_back(PredictedTick {
            tick,
            command,
            state: stepped.state,
        });
        Ok(stepped.events)
    }

    /// Compare an authoritative state for `tick` against the prediction
    /// and repair the prediction if they disagree.
    pub fn reconcile(&mut self, tick: Tick, authoritative: &EntityState, rules: &Rules) -> Reconciliation {
        while self.pending.front().is_some_and(|p| p.tick < tick) {
            self.pending.pop_front();
        }

        let Some(front) = self.pending.front() else {
            if self.last_tick.map_or(true, |last| tick >= last) {
                self.current = authoritative.clone();
                self.last_tick = Some(tick);
                return Reconciliation::Adopted { tick };
            }
            return Reconciliation::Stale { tick };
        };
        if front.tick > tick {
            trace!(tick, oldest = front.tick, "authoritative state older than prediction window");
            return Reconciliation::Stale { tick };
        }

        let diverged = front.state.diverges_from(authoritative, &self.tolerance);
        self.pending.pop_front();
        if !diverged {
            return Reconciliation::Confirmed { tick };
        }

        self.desyncs += 1;
        let err = SimError::DesyncDetected { tick };
        warn!(entity = self.entity, %err, "resimulating");

        let presented_before = self.presented_position();
        let mut state = authoritative.clone();
        for predicted in self.pending.iter_mut() {
            state = state
                .step(&predicted.command, &StepFrame::new(predicted.tick, rules))
                .state;
            predicted.state = state.clone();
        }
        let replayed = self.pending.len();
        self.current = state;

        let offset = presented_before - self.current.position;
        self.correction = offset;
        debug!(entity = self.entity, tick, replayed, "prediction corrected");

        Reconciliation::Corrected { tick, replayed, offset }
    }

    /// Predicted position plus the remaining visual correction
    pub fn presented_position(&self) -> Vec3 {
        self.current.position + self.correction
    }

    /// Shrink the visual correction; `factor` in [0, 1] is the share kept
    pub fn decay_correction(&mut self, factor: f32) {
        self.correction = self.correction * factor.clamp(0.0, 1.0);
        if self.correction.length_squared() < 1e-8 {
            self.correction = Vec3::ZERO;
        }
    }

    /// Start over from a fresh authoritative state (respawn, rejoin)
    pub fn reset(&mut self, state: EntityState) {
        self.entity = state.id;
        self.current = state;
        self.pending.clear();
        self.last_tick = None;
        self.correction = Vec3::ZERO;
    }
}

/// Smooths remote entities between received snapshots
pub struct Interpolator {
    buffer: VecDeque<Arc<Snapshot>>,
    capacity: usize,
}

impl Interpolator {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.max(2)),
            capacity: capacity.max(2),
        }
    }

    /// Buffer a snapshot. Stale or duplicate ticks are discarded.
    pub fn push(&mut self, snapshot: Arc<Snapshot>) -> bool {
        if let Some(newest) = self.buffer.back() {
            if snapshot.tick <= newest.tick {
                return false;
            }
        }
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(snapshot);
        true
    }

    pub fn newest_tick(&self) -> Option<Tick> {
        self.buffer.back().map(|s| s.tick)
    }

    /// State of `id` at a fractional tick. Before the buffered range the
    /// oldest state is held, past it the newest.
    pub fn sample(&self, id: EntityId, render_tick: f64) -> Option<EntityState> {
        if self.buffer.is_empty() {
            return None;
        }
        let upper = self
            .buffer
            .iter()
            .position(|s| s.tick as f64 >= render_tick)
            .unwrap_or(self.buffer.len() - 1);

        let to = &self.buffer[upper];
        // missing from the newer snapshot means despawned
        let to_state = to.get(id)?;
        if upper == 0 {
            return Some(to_state.clone());
        }

        let from = &self.buffer[upper - 1];
        let Some(from_state) = from.get(id) else {
            return Some(to_state.clone());
        };
        let span = (to.tick - from.tick) as f64;
        let t = ((render_tick - from.tick as f64) / span).clamp(0.0, 1.0);
        Some(from_state.interpolate(to_state, t as f32))
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::command::HeldButtons;
    use crate::game::entity::Rotation;
    use crate::game::step::advance;

    fn commands(n: usize) -> Vec<Command> {
        (0..n)
            .map(|i| {
                let mut cmd = Command {
                    move_x: ((i as f32) * 0.3).sin(),
                    move_y: 1.0,
                    look_yaw: 1.5,
                    ..Command::default()
                };
                cmd.held.set(HeldButtons::FIRE, i % 7 < 3);
                cmd
            })
            .collect()
    }

    #[test]
    fn rejects_duplicate_and_out_of_order_ticks() {
        let rules = Rules::default();
        let p0 = EntityState::player(1, Vec3::ZERO, Rotation::default(), &rules);
        let mut predictor = Predictor::new(p0, 16, Tolerance::default());
        predictor.predict(5, Command::default(), &rules).unwrap();
        assert_eq!(
            predictor.predict(5, Command::default(), &rules),
            Err(SimError::DuplicateCommand { tick: 5 })
        );
        assert_eq!(
            predictor.predict(4, Command::default(), &rules),
            Err(SimError::OutOfOrderCommand { tick: 4, last: 5 })
        );
        assert_eq!(predictor.pending_len(), 1);
    }

    #[test]
    fn matching_prediction_is_confirmed() {
        let rules = Rules::default();
        let p0 = EntityState::player(1, Vec3::ZERO, Rotation::default(), &rules);
        let cmds = commands(10);

        let mut predictor = Predictor::new(p0.clone(), 64, Tolerance::default());
        let mut server = p0;
        for (i, cmd) in cmds.iter().enumerate() {
            let tick = i as Tick + 1;
            predictor.predict(tick, *cmd, &rules).unwrap();
            server = advance(&server, cmd, &StepFrame::new(tick, &rules)).0;
        }
        assert_eq!(
            predictor.reconcile(10, &server, &rules),
            Reconciliation::Confirmed { tick: 10 }
        );
        assert_eq!(predictor.desyncs(), 0);
    }

    #[test]
    fn correction_converges_on_server_state() {
        let rules = Rules::default();
        let p0 = EntityState::player(1, Vec3::ZERO, Rotation::default(), &rules);
        let cmds = commands(40);

        let mut predictor = Predictor::new(p0.clone(), 64, Tolerance::default());
        let mut server = p0;
        let mut server_at = Vec::new();
        for (i, cmd) in cmds.iter().enumerate() {
            let tick = i as Tick + 1;
            predictor.predict(tick, *cmd, &rules).unwrap();

            server = advance(&server, cmd, &StepFrame::new(tick, &rules)).0;
            if tick == 12 {
                // something the client could not foresee
                server.position.x += 1.5;
                server.health -= 20.0;
            }
            server_at.push(server.clone());
        }

        let outcome = predictor.reconcile(15, &server_at[14], &rules);
        let Reconciliation::Corrected { replayed, offset, .. } = outcome else {
            panic!("expected a correction, got {outcome:?}");
        };
        assert_eq!(replayed, 25);
        assert!(offset.length() > 1.0);
        assert_eq!(predictor.state(), &server);
        assert_eq!(predictor.desyncs(), 1);

        // the presented position eases in instead of snapping
        assert_ne!(predictor.presented_position(), server.position);
        for _ in 0..200 {
            predictor.decay_correction(0.8);
        }
        assert_eq!(predictor.presented_position(), server.position);
    }

    #[test]
    fn overflow_drops_oldest_and_old_snapshots_are_stale() {
        let rules = Rules::default();
        let p0 = EntityState::player(1, Vec3::ZERO, Rotation::default(), &rules);
        let mut predictor = Predictor::new(p0.clone(), 4, Tolerance::default());
        for tick in 1..=10 {
            predictor.predict(tick, Command::default(), &rules).unwrap();
        }
        assert_eq!(predictor.pending_len(), 4);
        assert_eq!(predictor.reconcile(3, &p0, &rules), Reconciliation::Stale { tick: 3 });
    }

    #[test]
    fn interpolator_blends_between_bracketing_snapshots() {
        let rules = Rules::default();
        let at = |tick: Tick, x: f32| {
            Arc::new(Snapshot::new(
                tick,
                vec![EntityState::player(2, Vec3::new(x, 0.0, 0.0), Rotation::default(), &rules)],
            ))
        };
        let mut interp = Interpolator::new(4);
        assert!(interp.push(at(10, 0.0)));
        assert!(interp.push(at(13, 3.0)));
        assert!(!interp.push(at(13, 9.0)));
        assert!(!interp.push(at(11, 9.0)));

        let mid = interp.sample(2, 11.5).unwrap();
        assert!((mid.position.x - 1.5).abs() < 1e-5);
        assert_eq!(interp.sample(2, 5.0).unwrap().position.x, 0.0);
        assert_eq!(interp.sample(2, 99.0).unwrap().position.x, 3.0);
        assert!(interp.sample(7, 11.0).is_none());
    }
}
