//! Client-role simulation: replica store, local prediction, remote smoothing

use std::sync::Arc;

use tracing::{debug, trace};

use crate::util::time::{Tick, TickClock};

use super::command::{Command, InputSampler, RawInput, TickedCommand};
use super::context::SimulationContext;
use super::entity::{EntityId, EntityState, Tolerance};
use super::error::SimError;
use super::prediction::{Interpolator, Predictor, Reconciliation};
use super::r#match::{MatchMachine, MatchPhase, MatchSettings, MatchState};
use super::rules::Rules;
use super::snapshot::Snapshot;
use super::step::SimEvent;
use super::store::{Role, StateStore};

#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub sensitivity: f32,
    pub invert_pitch: bool,
    /// Ticks the local clock runs ahead of the last known server tick
    pub input_lead_ticks: u64,
    /// Remote entities render this many ticks behind the newest snapshot
    pub interp_delay_ticks: u64,
    pub prediction_capacity: usize,
    pub snapshot_buffer: usize,
    pub tolerance: Tolerance,
    /// Share of the visual correction kept each tick
    pub correction_decay: f32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            invert_pitch: false,
            input_lead_ticks: 2,
            interp_delay_ticks: 6,
            prediction_capacity: 128,
            snapshot_buffer: 32,
            tolerance: Tolerance::default(),
            correction_decay: 0.85,
        }
    }
}

pub struct ClientSimulation {
    ctx: SimulationContext,
    settings: ClientSettings,
    machine: MatchMachine,
    sampler: InputSampler,
    predictor: Option<Predictor>,
    interpolator: Interpolator,
    entity: Option<EntityId>,
}

impl ClientSimulation {
    pub fn new(rules: Rules, settings: ClientSettings) -> Self {
        Self {
            ctx: SimulationContext::new(Role::Client, rules),
            machine: MatchMachine::new(Role::Client, MatchSettings::default()),
            sampler: InputSampler::new(settings.sensitivity, settings.invert_pitch),
            predictor: None,
            interpolator: Interpolator::new(settings.snapshot_buffer),
            entity: None,
            settings,
        }
    }

    pub fn tick(&self) -> Tick {
        self.ctx.tick()
    }

    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    pub fn phase(&self) -> MatchPhase {
        self.machine.phase()
    }

    pub fn match_state(&self) -> MatchState {
        self.machine.state()
    }

    pub fn store(&self) -> &StateStore {
        self.ctx.store()
    }

    pub fn predictor(&self) -> Option<&Predictor> {
        self.predictor.as_ref()
    }

    /// Latest predicted state of the controlled entity
    pub fn predicted(&self) -> Option<&EntityState> {
        self.predictor.as_ref().map(Predictor::state)
    }

    /// The server accepted us: adopt our entity, its tick and the match state
    pub fn on_welcome(&mut self, entity: EntityId, server_tick: Tick, state: MatchState) -> Result<(), SimError> {
        let rate = self.ctx.rules().tick_rate;
        self.ctx
            .set_clock(TickClock::starting_at(rate, server_tick + self.settings.input_lead_ticks));
        self.machine.apply_replicated(state)?;
        self.entity = Some(entity);
        self.predictor = None;
        self.interpolator.clear();
        debug!(entity, tick = self.ctx.tick(), "joined");
        Ok(())
    }

    /// Feed one render frame of device input
    pub fn capture(&mut self, frame: &RawInput) {
        self.sampler.capture(frame);
    }

    /// Close the current tick: sample input, predict it locally and hand
    /// back the command to send. The command goes out even when the local
    /// prediction refuses it; the server still needs it.
    pub fn next_command(&mut self) -> TickedCommand {
        let tick = self.ctx.advance();
        let command = self.sampler.sample();
        if let Err(err) = self.on_local_command(tick, command) {
            debug!(tick, %err, "local prediction skipped");
        }
        if let Some(predictor) = self.predictor.as_mut() {
            predictor.decay_correction(self.settings.correction_decay);
        }
        TickedCommand { tick, command }
    }

    /// Predict a locally issued command. No-op until the first snapshot
    /// carrying our entity arrives, or while the match is frozen.
    pub fn on_local_command(&mut self, tick: Tick, command: Command) -> Result<Vec<SimEvent>, SimError> {
        if !self.machine.phase().simulates_movement() {
            return Ok(Vec::new());
        }
        match self.predictor.as_mut() {
            Some(predictor) => predictor.predict(tick, command, self.ctx.rules()),
            None => Ok(Vec::new()),
        }
    }

    /// Apply an authoritative snapshot. Returns how it reconciled with the
    /// local prediction, or `None` when it was stale or carried nothing of
    /// ours.
    pub fn on_snapshot(&mut self, snapshot: Snapshot, state: MatchState) -> Result<Option<Reconciliation>, SimError> {
        if !self.ctx.store_mut().apply_snapshot(&snapshot)? {
            return Ok(None);
        }
        self.machine.apply_replicated(state)?;

        let tick = snapshot.tick;
        let ours = self.entity.and_then(|id| snapshot.get(id).cloned());
        self.interpolator.push(Arc::new(snapshot));

        let Some(authoritative) = ours else {
            if self.predictor.take().is_some() {
                trace!(tick, "controlled entity gone");
            }
            return Ok(None);
        };

        let rules = self.ctx.rules();
        let outcome = match self.predictor.as_mut() {
            // Deaths and respawns teleport; start over rather than smooth
            Some(predictor) if predictor.state().alive != authoritative.alive => {
                predictor.reset(authoritative);
                Reconciliation::Adopted { tick }
            }
            Some(predictor) => predictor.reconcile(tick, &authoritative, rules),
            None => {
                self.predictor = Some(Predictor::new(
                    authoritative,
                    self.settings.prediction_capacity,
                    self.settings.tolerance,
                ));
                Reconciliation::Adopted { tick }
            }
        };
        Ok(Some(outcome))
    }

    /// Clients never drive the match; the request goes to the server
    pub fn start_match(&mut self) -> Result<(), SimError> {
        self.machine.start(self.ctx.clock(), 0)
    }

    /// Everything to draw `alpha` of the way into the current tick: the
    /// controlled entity at its predicted (and visually corrected) position,
    /// every other entity interpolated behind the newest snapshot.
    pub fn present(&self, alpha: f32) -> Vec<EntityState> {
        let delay = self.settings.input_lead_ticks + self.settings.interp_delay_ticks;
        let render_tick = self.ctx.tick() as f64 + f64::from(alpha.clamp(0.0, 1.0)) - delay as f64;

        let mut out: Vec<EntityState> = self
            .ctx
            .store()
            .ids()
            .into_iter()
            .filter(|id| Some(*id) != self.entity)
            .filter_map(|id| self.interpolator.sample(id, render_tick))
            .collect();

        if let Some(predictor) = &self.predictor {
            let mut local = predictor.state().clone();
            local.position = predictor.presented_position();
            out.push(local);
        }
        out.sort_by_key(|e| e.id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::server::{ServerSettings, ServerSimulation};

    fn server_with(players: usize) -> (ServerSimulation, Vec<EntityId>) {
        let mut server = ServerSimulation::new(ServerSettings::new(Rules::default()), 3);
        server.establish_session().unwrap();
        let ids = (0..players).map(|_| server.add_player().unwrap()).collect();
        (server, ids)
    }

    fn joined(server: &ServerSimulation, id: EntityId) -> ClientSimulation {
        let mut client = ClientSimulation::new(Rules::default(), ClientSettings::default());
        client
            .on_welcome(id, server.current_tick(), server.machine().state())
            .unwrap();
        client
    }

    fn forward() -> RawInput {
        RawInput {
            move_y: 1.0,
            look_dx: 0.5,
            ..RawInput::default()
        }
    }

    #[test]
    fn clients_cannot_start_matches() {
        let (server, ids) = server_with(1);
        let mut client = joined(&server, ids[0]);
        assert_eq!(client.start_match(), Err(SimError::NotAuthoritative));
        assert_eq!(client.phase(), MatchPhase::LobbyConnected);
    }

    #[test]
    fn prediction_converges_with_the_server() {
        let (mut server, ids) = server_with(1);
        let id = ids[0];
        let mut client = joined(&server, id);

        for _ in 0..90 {
            client.capture(&forward());
            let ticked = client.next_command();
            server.submit_command(id, ticked).unwrap();
            let report = server.tick();
            client
                .on_snapshot((*report.snapshot).clone(), server.machine().state())
                .unwrap();
        }

        // Let the server catch up with everything already predicted
        let mut last = None;
        while server.current_tick() < client.tick() {
            let report = server.tick();
            last = client
                .on_snapshot((*report.snapshot).clone(), server.machine().state())
                .unwrap();
        }

        assert!(matches!(last, Some(Reconciliation::Confirmed { .. })));
        assert_eq!(client.predicted(), server.store().view(id));
        assert_eq!(client.predictor().unwrap().pending_len(), 0);
        // Only the warm-up before the first snapshot needed repair
        assert!(client.predictor().unwrap().desyncs() <= 1);
    }

    #[test]
    fn sampled_commands_go_out_when_prediction_refuses_them() {
        let (mut server, ids) = server_with(1);
        let mut client = joined(&server, ids[0]);
        let report = server.tick();
        client
            .on_snapshot((*report.snapshot).clone(), server.machine().state())
            .unwrap();
        let ahead = client.tick() + 5;
        client.on_local_command(ahead, Command::default()).unwrap();

        client.capture(&forward());
        let ticked = client.next_command();
        assert_eq!(ticked.tick, ahead - 4);
        assert_eq!(ticked.command.move_y, 1.0);
        assert!(server.submit_command(ids[0], ticked).is_ok());
    }

    #[test]
    fn stale_snapshots_change_nothing() {
        let (mut server, ids) = server_with(1);
        let mut client = joined(&server, ids[0]);
        let first = server.tick().snapshot;
        let second = server.tick().snapshot;
        let state = server.machine().state();

        assert!(client.on_snapshot((*second).clone(), state).unwrap().is_some());
        assert_eq!(client.on_snapshot((*first).clone(), state).unwrap(), None);
        assert_eq!(client.store().applied_tick(), Some(second.tick));
    }

    #[test]
    fn present_includes_remote_and_local_entities() {
        let (mut server, ids) = server_with(2);
        let mut client = joined(&server, ids[0]);
        for _ in 0..12 {
            let report = server.tick();
            client
                .on_snapshot((*report.snapshot).clone(), server.machine().state())
                .unwrap();
            client.next_command();
        }
        let shown: Vec<EntityId> = client.present(0.5).iter().map(|e| e.id).collect();
        assert_eq!(shown, ids);
    }
}
