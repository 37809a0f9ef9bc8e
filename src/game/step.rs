//! Deterministic per-entity step shared by the server and predicting clients
//!
//! `advance` is a pure function of (state, command, tick, rules). The server
//! runs it authoritatively; the controlling client runs the exact same code
//! to predict and to replay after a correction.

use serde::{Deserialize, Serialize};

use super::actions::{ActionEffect, ActionSystem};
use super::command::{Command, HeldButtons, PressedButtons};
use super::entity::{EntityId, EntityKind, EntityState, Vec3};
use super::physics::{MoveIntent, PhysicsSystem};
use super::rules::Rules;
use crate::util::time::{Tick, Timer};

/// Read-only inputs of one step besides the entity and its command
#[derive(Debug, Clone, Copy)]
pub struct StepFrame<'a> {
    pub tick: Tick,
    pub rules: &'a Rules,
}

impl<'a> StepFrame<'a> {
    pub fn new(tick: Tick, rules: &'a Rules) -> Self {
        Self { tick, rules }
    }
}

/// A hit-scan attempt (shot or melee strike) as seen by the attacker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShotIntent {
    pub shooter: EntityId,
    pub origin: Vec3,
    /// Unit direction
    pub direction: Vec3,
    pub range: f32,
    pub damage: f32,
}

/// Something a step wants the world to resolve
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimEvent {
    Shot(ShotIntent),
    Melee(ShotIntent),
    GrenadeReleased {
        owner: EntityId,
        origin: Vec3,
        velocity: Vec3,
    },
    Detonated {
        grenade: EntityId,
        owner: EntityId,
        position: Vec3,
    },
}

/// Output of one step
#[derive(Debug, Clone, PartialEq)]
pub struct Stepped {
    pub state: EntityState,
    pub events: Vec<SimEvent>,
}

/// Advances simulation state by one tick
pub trait Simulatable {
    fn step(&self, command: &Command, frame: &StepFrame<'_>) -> Stepped;
}

/// Produces presentation state between two known states
pub trait Renderable {
    fn interpolate(&self, next: &Self, t: f32) -> Self;
}

impl Simulatable for EntityState {
    fn step(&self, command: &Command, frame: &StepFrame<'_>) -> Stepped {
        let (state, events) = advance(self, command, frame);
        Stepped { state, events }
    }
}

impl Renderable for EntityState {
    /// Continuous fields blend; discrete fields switch only once the
    /// newer state is reached. A teleport (death, respawn) snaps.
    fn interpolate(&self, next: &Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        if t >= 1.0 || self.alive != next.alive || self.kind != next.kind {
            return next.clone();
        }
        let mut out = self.clone();
        out.position = self.position.lerp(next.position, t);
        out.rotation = self.rotation.lerp(next.rotation, t);
        out.velocity = self.velocity.lerp(next.velocity, t);
        out
    }
}

/// Run one tick for one entity
pub fn advance(state: &EntityState, command: &Command, frame: &StepFrame<'_>) -> (EntityState, Vec<SimEvent>) {
    let mut next = state.clone();
    let mut events = Vec::new();

    match state.kind {
        EntityKind::Player => step_player(&mut next, &command.sanitized(), frame, &mut events),
        EntityKind::Grenade => step_grenade(&mut next, frame, &mut events),
    }

    (next, events)
}

fn step_player(state: &mut EntityState, cmd: &Command, frame: &StepFrame<'_>, events: &mut Vec<SimEvent>) {
    if !state.alive {
        return;
    }
    let tick = frame.tick;
    let rules = frame.rules;

    state.rotation = state.rotation.apply_delta(cmd.look_yaw, cmd.look_pitch);

    if let Some(ActionEffect::ReleaseGrenade) = ActionSystem::expire(state, tick) {
        events.push(SimEvent::GrenadeReleased {
            owner: state.id,
            origin: state.eye_position(rules),
            velocity: state.rotation.forward() * rules.grenade.speed,
        });
    }

    if cmd.weapon != state.weapon_index {
        ActionSystem::try_switch_weapon(state, cmd.weapon, tick, rules);
    }
    if cmd.pressed.contains(PressedButtons::HOLSTER) {
        ActionSystem::try_holster(state, tick, rules);
    }
    if cmd.held.contains(HeldButtons::RELOAD) {
        ActionSystem::try_reload(state, tick, rules);
    }
    if cmd.held.contains(HeldButtons::MELEE) && ActionSystem::try_melee(state, tick, rules) {
        events.push(SimEvent::Melee(ShotIntent {
            shooter: state.id,
            origin: state.eye_position(rules),
            direction: state.rotation.forward(),
            range: rules.melee.range,
            damage: rules.melee.damage,
        }));
    }
    if cmd.held.contains(HeldButtons::GRENADE) {
        ActionSystem::try_throw_grenade(state, tick, rules);
    }
    if cmd.held.contains(HeldButtons::INSPECT) {
        ActionSystem::try_inspect(state, tick, rules);
    }

    fire(state, cmd, frame, events);

    let intent = MoveIntent {
        move_x: cmd.move_x,
        move_y: cmd.move_y,
        sprint: cmd.held.contains(HeldButtons::SPRINT),
        aim: cmd.held.contains(HeldButtons::AIM),
        jump: cmd.pressed.contains(PressedButtons::JUMP),
    };
    PhysicsSystem::update_player(state, &intent, &rules.movement, rules.dt());
}

fn fire(state: &mut EntityState, cmd: &Command, frame: &StepFrame<'_>, events: &mut Vec<SimEvent>) {
    let held = cmd.held.contains(HeldButtons::FIRE);
    let edge = held && !state.trigger_held;
    state.trigger_held = held;
    if !held {
        return;
    }

    let (tick, rules) = (frame.tick, frame.rules);
    if ActionSystem::can_fire(state, tick, edge) {
        let origin = state.eye_position(rules);
        let direction = state.rotation.forward();
        let Some(slot) = state.weapon_mut() else {
            return;
        };
        let profile = slot.profile();
        slot.ammo -= 1;
        let rounds_left = slot.ammo;

        state.fire_cooldown = Timer::at(tick + rules.ticks(profile.fire_interval));
        events.push(SimEvent::Shot(ShotIntent {
            shooter: state.id,
            origin,
            direction,
            range: profile.range,
            damage: profile.damage,
        }));

        if profile.bolt_action && rounds_left > 0 {
            ActionSystem::try_bolt(state, tick, rules);
        }
    } else if rules.auto_reload && state.ammo() == 0 {
        ActionSystem::try_reload(state, tick, rules);
    }
}

fn step_grenade(state: &mut EntityState, frame: &StepFrame<'_>, events: &mut Vec<SimEvent>) {
    if !state.alive {
        return;
    }
    PhysicsSystem::update_projectile(state, &frame.rules.movement, frame.rules.dt());

    if state.fuse.is_expired(frame.tick) {
        state.alive = false;
        events.push(SimEvent::Detonated {
            grenade: state.id,
            owner: state.owner.unwrap_or(state.id),
            position: state.position,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::actions::Action;
    use crate::game::entity::Rotation;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_commands(seed: u64, n: usize) -> Vec<Command> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let mut cmd = Command {
                    move_x: rng.gen_range(-1.0..=1.0),
                    move_y: rng.gen_range(-1.0..=1.0),
                    look_yaw: rng.gen_range(-5.0..5.0),
                    look_pitch: rng.gen_range(-2.0..2.0),
                    weapon: rng.gen_range(0..2),
                    ..Command::default()
                };
                cmd.held.set(HeldButtons::FIRE, rng.gen_bool(0.4));
                cmd.held.set(HeldButtons::SPRINT, rng.gen_bool(0.3));
                cmd.held.set(HeldButtons::RELOAD, rng.gen_bool(0.05));
                cmd.held.set(HeldButtons::GRENADE, rng.gen_bool(0.01));
                cmd.pressed.set(PressedButtons::JUMP, rng.gen_bool(0.05));
                cmd
            })
            .collect()
    }

    fn run(commands: &[Command], rules: &Rules) -> (EntityState, Vec<SimEvent>) {
        let mut state = EntityState::player(1, Vec3::ZERO, Rotation::default(), rules);
        let mut all = Vec::new();
        for (i, cmd) in commands.iter().enumerate() {
            let frame = StepFrame::new(i as Tick + 1, rules);
            let (next, events) = advance(&state, cmd, &frame);
            state = next;
            all.extend(events);
        }
        (state, all)
    }

    #[test]
    fn step_is_deterministic() {
        let rules = Rules::default();
        let commands = random_commands(42, 600);
        let a = run(&commands, &rules);
        let b = run(&commands, &rules);
        assert_eq!(a, b);
    }

    #[test]
    fn holding_fire_on_automatic_respects_cooldown() {
        let rules = Rules::default();
        let mut cmd = Command::default();
        cmd.held.set(HeldButtons::FIRE, true);
        let (state, events) = run(&vec![cmd; 60], &rules);

        let shots = events.iter().filter(|e| matches!(e, SimEvent::Shot(_))).count();
        // 0.1 s interval at 60 Hz
        assert_eq!(shots, 10);
        assert_eq!(state.ammo(), 30 - 10);
    }

    #[test]
    fn semi_automatic_fires_once_per_press() {
        let rules = Rules::default();
        let mut held = Command::neutral(1);
        held.held.set(HeldButtons::FIRE, true);
        let released = Command::neutral(1);

        // first ticks only switch to the pistol
        let mut commands = vec![released; 40];
        commands.extend(std::iter::repeat(held).take(30));
        commands.push(released);
        commands.extend(std::iter::repeat(held).take(30));

        let (state, events) = run(&commands, &rules);
        let shots = events.iter().filter(|e| matches!(e, SimEvent::Shot(_))).count();
        assert_eq!(state.weapon_index, 1);
        assert_eq!(shots, 2);
    }

    #[test]
    fn empty_magazine_auto_reloads() {
        let rules = Rules::default();
        let mut state = EntityState::player(1, Vec3::ZERO, Rotation::default(), &rules);
        state.weapon_mut().unwrap().ammo = 0;
        let mut cmd = Command::default();
        cmd.held.set(HeldButtons::FIRE, true);

        let (next, events) = advance(&state, &cmd, &StepFrame::new(1, &rules));
        assert!(events.is_empty());
        assert_eq!(next.action, Action::Reloading);
    }

    #[test]
    fn grenade_is_released_after_wind_up_and_detonates_on_fuse() {
        let rules = Rules::default();
        let mut state = EntityState::player(1, Vec3::ZERO, Rotation::default(), &rules);
        let mut throw = Command::default();
        throw.held.set(HeldButtons::GRENADE, true);

        let (next, _) = advance(&state, &throw, &StepFrame::new(1, &rules));
        state = next;
        assert_eq!(state.action, Action::ThrowingGrenade);
        assert_eq!(state.grenades, rules.grenade.per_life - 1);

        let release_at = 1 + rules.grenade.throw_ticks;
        let (_, events) = advance(&state, &Command::default(), &StepFrame::new(release_at, &rules));
        let Some(SimEvent::GrenadeReleased { origin, velocity, .. }) = events.first().copied() else {
            panic!("expected release, got {events:?}");
        };

        let fuse = Timer::at(release_at + rules.grenade.fuse_ticks);
        let mut grenade = EntityState::grenade(2, 1, origin, velocity, fuse);
        let mut detonated = None;
        for tick in release_at + 1..=release_at + rules.grenade.fuse_ticks {
            let (next, events) = advance(&grenade, &Command::default(), &StepFrame::new(tick, &rules));
            grenade = next;
            if !events.is_empty() {
                detonated = Some(tick);
            }
        }
        assert_eq!(detonated, Some(release_at + rules.grenade.fuse_ticks));
        assert!(!grenade.alive);
    }

    #[test]
    fn interpolation_blends_position_and_snaps_on_death() {
        let rules = Rules::default();
        let a = EntityState::player(1, Vec3::ZERO, Rotation::new(350.0, 0.0), &rules);
        let mut b = a.clone();
        b.position = Vec3::new(2.0, 0.0, 0.0);
        b.rotation = Rotation::new(10.0, 0.0);

        let mid = a.interpolate(&b, 0.5);
        assert!((mid.position.x - 1.0).abs() < 1e-6);
        assert!(mid.rotation.yaw < 1e-3 || mid.rotation.yaw > 359.999);

        b.alive = false;
        assert_eq!(a.interpolate(&b, 0.1), b);
    }
}
