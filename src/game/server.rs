//! Authoritative per-tick world update

use std::collections::BTreeMap;
use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, trace, warn};

use crate::util::time::{ticks_for, Tick, TickClock};
use crate::ws::protocol::MatchInfo;

use super::actions::{Action, ActionEffect, ActionSystem};
use super::combat::{CombatSystem, KillCause, KillEvent};
use super::command::{CommandBuffer, MissingCommandPolicy, TickedCommand};
use super::context::SimulationContext;
use super::entity::{EntityId, EntityKind, EntityState, Rotation, Vec3};
use super::error::SimError;
use super::lag_comp::{HitRecord, LagCompensator, ShotKind, ShotRequest, TieBreak};
use super::r#match::{MatchMachine, MatchPhase, MatchSettings};
use super::rules::Rules;
use super::snapshot::{Snapshot, SnapshotHistory};
use super::step::{advance, SimEvent, StepFrame};
use super::store::{EntityChange, Role, StateStore};

/// Knobs for one authoritative simulation
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub rules: Rules,
    pub match_settings: MatchSettings,
    /// How far back shots may rewind, in ticks
    pub history_depth: u64,
    /// Future commands buffered per player
    pub command_capacity: usize,
    pub missing_policy: MissingCommandPolicy,
    pub tie_break: TieBreak,
}

impl ServerSettings {
    pub fn new(rules: Rules) -> Self {
        let tick_rate = rules.tick_rate;
        Self {
            history_depth: ticks_for(Duration::from_secs(1), tick_rate),
            command_capacity: (tick_rate as usize).max(8),
            missing_policy: MissingCommandPolicy::default(),
            tie_break: TieBreak::default(),
            match_settings: MatchSettings::default(),
            rules,
        }
    }

    pub fn with_history(mut self, history: Duration) -> Self {
        self.history_depth = ticks_for(history, self.rules.tick_rate);
        self
    }
}

/// What one call to [`ServerSimulation::tick`] produced
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: Tick,
    pub phase_changed: Option<MatchPhase>,
    pub hits: Vec<HitRecord>,
    pub kills: Vec<KillEvent>,
    /// World at the end of the tick
    pub snapshot: Arc<Snapshot>,
    pub changes: Vec<EntityChange>,
    /// Players whose command for this tick never arrived
    pub missing_commands: usize,
    /// Shots dropped because their rewind fell outside history
    pub rejected_shots: usize,
}

struct PlayerSlot {
    commands: CommandBuffer,
    latency_ticks: u64,
}

pub struct ServerSimulation {
    ctx: SimulationContext,
    settings: ServerSettings,
    machine: MatchMachine,
    history: SnapshotHistory,
    lag: LagCompensator,
    players: BTreeMap<EntityId, PlayerSlot>,
    completions: Vec<(EntityId, Action)>,
    seed: u64,
    rng: ChaCha8Rng,
}

impl ServerSimulation {
    pub fn new(settings: ServerSettings, seed: u64) -> Self {
        Self {
            ctx: SimulationContext::new(Role::Server, settings.rules.clone()),
            machine: MatchMachine::new(Role::Server, settings.match_settings),
            history: SnapshotHistory::new(settings.history_depth),
            lag: LagCompensator::new(settings.tie_break),
            players: BTreeMap::new(),
            completions: Vec::new(),
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            settings,
        }
    }

    pub fn current_tick(&self) -> Tick {
        self.ctx.tick()
    }

    pub fn clock(&self) -> &TickClock {
        self.ctx.clock()
    }

    pub fn rules(&self) -> &Rules {
        self.ctx.rules()
    }

    pub fn phase(&self) -> MatchPhase {
        self.machine.phase()
    }

    pub fn machine(&self) -> &MatchMachine {
        &self.machine
    }

    pub fn store(&self) -> &StateStore {
        self.ctx.store()
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn match_info(&self) -> MatchInfo {
        MatchInfo {
            state: self.machine.state(),
            remaining_ms: self
                .machine
                .remaining(self.ctx.clock())
                .map(|d| d.as_millis() as u64),
            players: self.players.len(),
        }
    }

    pub fn establish_session(&mut self) -> Result<(), SimError> {
        self.machine.establish_session(self.ctx.clock())
    }

    pub fn start_match(&mut self) -> Result<(), SimError> {
        self.machine.start(self.ctx.clock(), self.players.len())
    }

    /// End the session and forget the world. The clock restarts at zero and
    /// spawn points replay from the seed.
    pub fn teardown(&mut self) -> Result<(), SimError> {
        self.machine.teardown(self.ctx.clock())?;
        self.ctx.reset();
        self.history.clear();
        self.players.clear();
        self.completions.clear();
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
        info!("session torn down");
        Ok(())
    }

    pub fn add_player(&mut self) -> Result<EntityId, SimError> {
        if self.machine.phase() == MatchPhase::None {
            return Err(SimError::InvalidPhase(MatchPhase::None.name()));
        }
        let (position, rotation) = self.spawn_point();
        let tick = self.ctx.tick();
        let (store, _, rules) = self.ctx.parts_mut();
        let id = store.spawn(tick, |id| EntityState::player(id, position, rotation, rules))?;
        self.players.insert(
            id,
            PlayerSlot {
                commands: CommandBuffer::new(self.settings.missing_policy, self.settings.command_capacity),
                latency_ticks: 0,
            },
        );
        debug!(tick, entity = id, "player spawned");
        Ok(id)
    }

    /// Grenades the player already threw stay live and can still kill,
    /// without credit.
    pub fn remove_player(&mut self, id: EntityId) -> Result<EntityState, SimError> {
        self.players.remove(&id);
        self.completions.retain(|(entity, _)| *entity != id);
        let tick = self.ctx.tick();
        self.ctx.store_mut().despawn(id, tick)
    }

    /// Queue a command for a future tick
    pub fn submit_command(&mut self, id: EntityId, ticked: TickedCommand) -> Result<(), SimError> {
        let slot = self.players.get_mut(&id).ok_or(SimError::UnknownEntity(id))?;
        if ticked.tick <= self.ctx.tick() {
            return Err(SimError::OutOfOrderCommand {
                tick: ticked.tick,
                last: self.ctx.tick(),
            });
        }
        slot.commands.insert(ticked.tick, ticked.command)
    }

    /// A client finished an animation-driven action; applied next tick
    pub fn action_completed(&mut self, id: EntityId, action: Action) {
        if self.players.contains_key(&id) {
            self.completions.push((id, action));
        }
    }

    /// Ticks between what the player sees and the present
    pub fn set_latency_ticks(&mut self, id: EntityId, ticks: u64) {
        if let Some(slot) = self.players.get_mut(&id) {
            slot.latency_ticks = ticks;
        }
    }

    pub fn latency_ticks(&self, id: EntityId) -> Option<u64> {
        self.players.get(&id).map(|slot| slot.latency_ticks)
    }

    /// Top up a player's selected magazine from outside the action system
    /// (pickups, resupply). `amount == 0` fills to capacity. A reload left
    /// with nothing to do ends on the spot.
    pub fn fill_ammunition(&mut self, id: EntityId, amount: u32) -> Result<u32, SimError> {
        if !self.players.contains_key(&id) {
            return Err(SimError::UnknownEntity(id));
        }
        let tick = self.ctx.tick();
        let mut ammo = 0;
        self.ctx
            .store_mut()
            .mutate(id, tick, |state| ammo = CombatSystem::fill_ammunition(state, amount))?;
        debug!(tick, entity = id, ammo, "magazine filled");
        Ok(ammo)
    }

    /// Advance the world one tick
    pub fn tick(&mut self) -> TickReport {
        let tick = self.ctx.advance();
        let phase = self.machine.phase();
        let mut report = TickReport {
            tick,
            phase_changed: None,
            hits: Vec::new(),
            kills: Vec::new(),
            snapshot: Arc::new(Snapshot::new(tick, Vec::new())),
            changes: Vec::new(),
            missing_commands: 0,
            rejected_shots: 0,
        };

        if phase.simulates_movement() {
            let mut events = self.apply_completions(tick);
            events.extend(self.step_entities(tick, &mut report));
            self.resolve_events(tick, events, phase.applies_damage(), &mut report);
            self.respawn_dead(tick);
        } else {
            // Frozen: consume and discard so buffers never back up
            self.completions.clear();
            for slot in self.players.values_mut() {
                slot.commands.take(tick);
            }
        }

        match self.machine.update(self.ctx.clock()) {
            Ok(Some(next)) => {
                report.phase_changed = Some(next);
                if next == MatchPhase::InProgress {
                    self.reset_for_match(tick);
                }
            }
            Ok(None) => {}
            Err(err) => warn!(tick, %err, "match update failed"),
        }

        let snapshot = Arc::new(self.ctx.store().snapshot(tick));
        self.history.record(Arc::clone(&snapshot));
        report.snapshot = snapshot;
        report.changes = self.ctx.store_mut().drain_changes();
        report
    }

    fn apply_completions(&mut self, tick: Tick) -> Vec<SimEvent> {
        let mut events = Vec::new();
        for (id, action) in std::mem::take(&mut self.completions) {
            let mut effect = None;
            let result = self.ctx.store_mut().mutate(id, tick, |state| {
                effect = ActionSystem::complete(state, action);
            });
            match (result, effect) {
                (Ok(_), Some(ActionEffect::ReleaseGrenade)) => {
                    if let Some(event) = self.grenade_release(id) {
                        events.push(event);
                    }
                }
                (Ok(_), _) => {}
                (Err(err), _) => debug!(tick, entity = id, %err, "completion for unknown entity"),
            }
        }
        events
    }

    fn grenade_release(&self, owner: EntityId) -> Option<SimEvent> {
        let state = self.ctx.store().view(owner)?;
        let rules = self.ctx.rules();
        Some(SimEvent::GrenadeReleased {
            owner,
            origin: state.eye_position(rules),
            velocity: state.rotation.forward() * rules.grenade.speed,
        })
    }

    /// Step every entity in ascending id order
    fn step_entities(&mut self, tick: Tick, report: &mut TickReport) -> Vec<SimEvent> {
        let mut events = Vec::new();
        let (store, _, rules) = self.ctx.parts_mut();
        let frame = StepFrame::new(tick, rules);

        for id in store.ids() {
            let Some(state) = store.get(id) else { continue };
            let command = match state.kind {
                EntityKind::Player => {
                    let Some(slot) = self.players.get_mut(&id) else { continue };
                    let taken = slot.commands.take(tick);
                    if taken.missing && state.alive {
                        report.missing_commands += 1;
                        let err = SimError::MissingCommand { entity: id, tick };
                        trace!(%err, "substituting");
                    }
                    taken.command
                }
                EntityKind::Grenade => Default::default(),
            };

            let (next, stepped) = advance(&state, &command, &frame);
            if let Err(err) = store.mutate(id, tick, |s| *s = next) {
                warn!(tick, entity = id, %err, "step write failed");
                continue;
            }
            events.extend(stepped);
        }
        events
    }

    fn resolve_events(&mut self, tick: Tick, events: Vec<SimEvent>, damage: bool, report: &mut TickReport) {
        for event in events {
            match event {
                SimEvent::Shot(intent) | SimEvent::Melee(intent) => {
                    let (kind, cause) = match event {
                        SimEvent::Melee(_) => (ShotKind::Melee, KillCause::Melee),
                        _ => (ShotKind::Shot, KillCause::Shot),
                    };
                    let latency = self.latency_ticks(intent.shooter).unwrap_or(0);
                    let req = ShotRequest::from_intent(kind, &intent, tick, latency);
                    let (store, _, rules) = self.ctx.parts_mut();
                    match self.lag.resolve(store, &self.history, &req, tick, rules, damage) {
                        Ok(record) => {
                            if let (true, Some(victim)) = (record.killed, record.target) {
                                report.kills.push(KillEvent {
                                    tick,
                                    killer: Some(intent.shooter),
                                    victim,
                                    cause,
                                });
                            }
                            report.hits.push(record);
                        }
                        Err(err) => {
                            report.rejected_shots += 1;
                            warn!(tick, shooter = intent.shooter, %err, "shot rejected");
                        }
                    }
                }
                SimEvent::GrenadeReleased { owner, origin, velocity } => {
                    let fuse = self.ctx.clock().timer_in_ticks(self.ctx.rules().grenade.fuse_ticks);
                    let result = self
                        .ctx
                        .store_mut()
                        .spawn(tick, |id| EntityState::grenade(id, owner, origin, velocity, fuse));
                    if let Err(err) = result {
                        warn!(tick, owner, %err, "grenade spawn failed");
                    }
                }
                SimEvent::Detonated { grenade, owner, position } => {
                    if damage {
                        self.blast(tick, owner, position, report);
                    }
                    if let Err(err) = self.ctx.store_mut().despawn(grenade, tick) {
                        debug!(tick, grenade, %err, "grenade already gone");
                    }
                }
            }
        }
    }

    fn blast(&mut self, tick: Tick, owner: EntityId, center: Vec3, report: &mut TickReport) {
        let (store, _, rules) = self.ctx.parts_mut();
        let radius = rules.grenade.blast_radius;
        let max_damage = rules.grenade.damage;
        let victims: Vec<(EntityId, f32)> = store
            .iter()
            .filter(|e| e.is_hittable())
            .map(|e| (e.id, CombatSystem::blast_damage(center, e.position, radius, max_damage)))
            .filter(|(_, dmg)| *dmg > 0.0)
            .collect();

        for (victim, dmg) in victims {
            match CombatSystem::apply_hit(store, tick, owner, victim, dmg) {
                Ok(Some(outcome)) if outcome.killed => report.kills.push(KillEvent {
                    tick,
                    killer: outcome.killer,
                    victim,
                    cause: KillCause::Grenade,
                }),
                Ok(_) => {}
                Err(err) => warn!(tick, owner, victim, %err, "blast damage failed"),
            }
        }
    }

    fn respawn_dead(&mut self, tick: Tick) {
        let due: Vec<EntityId> = self
            .ctx
            .store()
            .iter()
            .filter(|e| {
                e.kind == EntityKind::Player && !e.alive && e.respawn.is_set() && e.respawn.is_expired(tick)
            })
            .map(|e| e.id)
            .collect();

        for id in due {
            let (position, rotation) = self.spawn_point();
            let (store, _, rules) = self.ctx.parts_mut();
            let result = store.mutate(id, tick, |s| {
                let fresh = EntityState::player(id, position, rotation, rules);
                *s = EntityState {
                    kills: s.kills,
                    deaths: s.deaths,
                    ..fresh
                };
            });
            match result {
                Ok(_) => debug!(tick, entity = id, "respawned"),
                Err(err) => warn!(tick, entity = id, %err, "respawn failed"),
            }
        }
    }

    /// Fresh bodies and a clean scoreboard when the match proper begins
    fn reset_for_match(&mut self, tick: Tick) {
        let grenades: Vec<EntityId> = self
            .ctx
            .store()
            .iter()
            .filter(|e| e.kind == EntityKind::Grenade)
            .map(|e| e.id)
            .collect();
        for id in grenades {
            if let Err(err) = self.ctx.store_mut().despawn(id, tick) {
                debug!(tick, grenade = id, %err, "grenade already gone");
            }
        }

        let ids: Vec<EntityId> = self.players.keys().copied().collect();
        for id in ids {
            let (position, rotation) = self.spawn_point();
            let (store, _, rules) = self.ctx.parts_mut();
            if let Err(err) = store.mutate(id, tick, |s| *s = EntityState::player(id, position, rotation, rules)) {
                warn!(tick, entity = id, %err, "match reset failed");
            }
        }
        self.completions.clear();
        info!(tick, players = self.players.len(), "match started");
    }

    /// Random point on a ring inside the arena, facing the center
    fn spawn_point(&mut self) -> (Vec3, Rotation) {
        let half = self.ctx.rules().movement.arena_half_extent;
        let angle = self.rng.gen_range(0.0..TAU);
        let radius = self.rng.gen_range(0.3f32..0.6) * half;
        let position = Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius);
        let yaw = (-position.x).atan2(-position.z).to_degrees();
        (position, Rotation::new(yaw, 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::command::{Command, HeldButtons};

    fn lobby(players: usize) -> (ServerSimulation, Vec<EntityId>) {
        let mut settings = ServerSettings::new(Rules::default());
        settings.match_settings = MatchSettings {
            wait_for_players: Duration::from_millis(100),
            match_duration: Duration::from_secs(60),
            min_players: 1,
        };
        let mut sim = ServerSimulation::new(settings, 42);
        sim.establish_session().unwrap();
        let ids = (0..players).map(|_| sim.add_player().unwrap()).collect();
        (sim, ids)
    }

    fn run_until(sim: &mut ServerSimulation, phase: MatchPhase) {
        for _ in 0..10_000 {
            if sim.phase() == phase {
                return;
            }
            sim.tick();
        }
        panic!("never reached {phase:?}");
    }

    /// Put `shooter` at the origin facing +Z and `target` 10 m ahead
    fn line_up(sim: &mut ServerSimulation, shooter: EntityId, target: EntityId) {
        let tick = sim.current_tick();
        let store = sim.ctx.store_mut();
        store
            .mutate(shooter, tick, |s| {
                s.position = Vec3::ZERO;
                s.rotation = Rotation::new(0.0, 0.0);
            })
            .unwrap();
        store
            .mutate(target, tick, |s| s.position = Vec3::new(0.0, 0.0, 10.0))
            .unwrap();
        // Make the lined-up positions part of history
        sim.tick();
    }

    fn fire(sim: &mut ServerSimulation, id: EntityId) -> TickReport {
        let tick = sim.current_tick() + 1;
        let mut command = Command::neutral(0);
        command.held.set(HeldButtons::FIRE, true);
        sim.submit_command(id, TickedCommand { tick, command }).unwrap();
        sim.tick()
    }

    #[test]
    fn players_need_a_session() {
        let mut sim = ServerSimulation::new(ServerSettings::new(Rules::default()), 1);
        assert_eq!(sim.add_player(), Err(SimError::InvalidPhase("none")));
    }

    #[test]
    fn stale_commands_are_refused() {
        let (mut sim, ids) = lobby(1);
        sim.tick();
        let err = sim
            .submit_command(ids[0], TickedCommand { tick: 1, command: Command::default() })
            .unwrap_err();
        assert!(matches!(err, SimError::OutOfOrderCommand { .. }));
        assert_eq!(
            sim.submit_command(99, TickedCommand { tick: 5, command: Command::default() }),
            Err(SimError::UnknownEntity(99))
        );
    }

    #[test]
    fn hits_outside_the_match_do_no_damage() {
        let (mut sim, ids) = lobby(2);
        line_up(&mut sim, ids[0], ids[1]);
        let report = fire(&mut sim, ids[0]);
        assert_eq!(report.hits.len(), 1);
        assert_eq!(report.hits[0].target, Some(ids[1]));
        assert_eq!(report.hits[0].damage, 0.0);
        assert_eq!(sim.store().view(ids[1]).unwrap().health, 100.0);
    }

    #[test]
    fn sustained_fire_kills_and_credits_the_shooter() {
        let (mut sim, ids) = lobby(2);
        sim.start_match().unwrap();
        run_until(&mut sim, MatchPhase::InProgress);
        let (shooter, target) = (ids[0], ids[1]);
        line_up(&mut sim, shooter, target);

        let mut health = Vec::new();
        let mut kills = Vec::new();
        for _ in 0..60 {
            let report = fire(&mut sim, shooter);
            kills.extend(report.kills);
            let target_state = sim.store().view(target).unwrap();
            if health.last() != Some(&target_state.health) {
                health.push(target_state.health);
            }
            if !target_state.alive {
                break;
            }
        }

        // Eye-level rifle rounds land on the head: 15 x 2
        assert_eq!(health, vec![70.0, 40.0, 10.0, 0.0]);
        assert_eq!(kills.len(), 1);
        assert_eq!(kills[0].killer, Some(shooter));
        assert_eq!(kills[0].cause, KillCause::Shot);
        assert_eq!(sim.store().view(shooter).unwrap().kills, 1);
        assert_eq!(sim.store().view(target).unwrap().deaths, 1);
    }

    #[test]
    fn shots_beyond_history_are_rejected() {
        let (mut sim, ids) = lobby(2);
        sim.start_match().unwrap();
        run_until(&mut sim, MatchPhase::InProgress);
        line_up(&mut sim, ids[0], ids[1]);
        sim.set_latency_ticks(ids[0], sim.history().depth() + 5);

        let report = fire(&mut sim, ids[0]);
        assert!(report.hits.is_empty());
        assert_eq!(report.rejected_shots, 1);
        assert_eq!(sim.store().view(ids[1]).unwrap().health, 100.0);
    }

    #[test]
    fn grenade_outliving_its_thrower_kills_uncredited() {
        let (mut sim, ids) = lobby(2);
        sim.start_match().unwrap();
        run_until(&mut sim, MatchPhase::InProgress);
        let (thrower, victim) = (ids[0], ids[1]);

        let tick = sim.current_tick();
        let fuse = sim.clock().timer_in_ticks(1);
        let store = sim.ctx.store_mut();
        let position = store.get(victim).unwrap().position;
        store.mutate(victim, tick, |s| s.health = 10.0).unwrap();
        let grenade = store
            .spawn(tick, |id| EntityState::grenade(id, thrower, position, Vec3::ZERO, fuse))
            .unwrap();
        sim.remove_player(thrower).unwrap();

        let report = sim.tick();
        assert_eq!(report.kills.len(), 1);
        assert_eq!(report.kills[0].victim, victim);
        assert_eq!(report.kills[0].killer, None);
        assert_eq!(report.kills[0].cause, KillCause::Grenade);
        let state = sim.store().view(victim).unwrap();
        assert!(!state.alive);
        assert_eq!(state.deaths, 1);
        assert!(sim.store().view(grenade).is_none());
    }

    #[test]
    fn resupply_ends_a_running_reload() {
        let (mut sim, ids) = lobby(1);
        let id = ids[0];
        let tick = sim.current_tick();
        sim.ctx
            .store_mut()
            .mutate(id, tick, |s| s.weapon_mut().unwrap().ammo = 5)
            .unwrap();

        let mut command = Command::neutral(0);
        command.held.set(HeldButtons::RELOAD, true);
        sim.submit_command(id, TickedCommand { tick: tick + 1, command }).unwrap();
        let report = sim.tick();
        assert_eq!(report.snapshot.get(id).unwrap().action, Action::Reloading);

        assert_eq!(sim.fill_ammunition(id, 0), Ok(30));
        let next = sim.current_tick() + 1;
        sim.submit_command(id, TickedCommand { tick: next, command: Command::neutral(0) })
            .unwrap();
        let report = sim.tick();
        let state = report.snapshot.get(id).unwrap();
        assert_eq!(state.action, Action::Idle);
        assert_eq!(state.ammo(), 30);
        assert_eq!(sim.fill_ammunition(99, 0), Err(SimError::UnknownEntity(99)));
    }

    #[test]
    fn dead_players_respawn_after_delay() {
        let (mut sim, ids) = lobby(1);
        sim.start_match().unwrap();
        run_until(&mut sim, MatchPhase::InProgress);
        let tick = sim.current_tick();
        sim.ctx.store_mut().mutate(ids[0], tick, |s| s.health = 0.0).unwrap();
        assert!(!sim.store().view(ids[0]).unwrap().alive);

        let respawn = sim.rules().respawn_ticks;
        for _ in 0..respawn {
            sim.tick();
        }
        let state = sim.store().view(ids[0]).unwrap();
        assert!(state.alive);
        assert_eq!(state.health, 100.0);
        assert_eq!(state.deaths, 1);
    }

    #[test]
    fn missing_commands_are_counted() {
        let (mut sim, _) = lobby(3);
        let report = sim.tick();
        assert_eq!(report.missing_commands, 3);
    }

    #[test]
    fn teardown_forgets_the_world() {
        let (mut sim, _) = lobby(2);
        sim.tick();
        sim.teardown().unwrap();
        assert_eq!(sim.phase(), MatchPhase::None);
        assert_eq!(sim.current_tick(), 0);
        assert!(sim.store().is_empty());
        assert!(sim.history().is_empty());
        assert_eq!(sim.player_count(), 0);
    }

    #[test]
    fn same_seed_same_world() {
        let run = || {
            let (mut sim, _) = lobby(2);
            for _ in 0..30 {
                sim.tick();
            }
            sim.history().latest().unwrap()
        };
        assert_eq!(run(), run());
    }
}
