//! Simulated entity state and orientation helpers

pub use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::actions::Action;
use super::combat::{WeaponKind, WeaponProfile};
use super::rules::Rules;
use crate::util::time::Timer;

/// Stable identifier of a simulated entity
pub type EntityId = u32;

/// Maximum look pitch either side of the horizon, degrees
pub const MAX_PITCH: f32 = 89.0;

/// Horizontal part of a vector (y zeroed)
pub fn flat(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

/// Look orientation as wrapped yaw and clamped pitch, in degrees.
///
/// Yaw 0 faces +Z, positive yaw turns towards +X, positive pitch looks up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub yaw: f32,
    pub pitch: f32,
}

impl Rotation {
    pub fn new(yaw: f32, pitch: f32) -> Self {
        Self {
            yaw: wrap_degrees(yaw),
            pitch: pitch.clamp(-MAX_PITCH, MAX_PITCH),
        }
    }

    pub fn apply_delta(self, yaw: f32, pitch: f32) -> Self {
        Self::new(self.yaw + yaw, self.pitch + pitch)
    }

    /// Unit aim direction
    pub fn forward(self) -> Vec3 {
        let (sy, cy) = self.yaw.to_radians().sin_cos();
        let (sp, cp) = self.pitch.to_radians().sin_cos();
        Vec3::new(sy * cp, sp, cy * cp)
    }

    /// Horizontal facing, ignoring pitch
    pub fn flat_forward(self) -> Vec3 {
        let (sy, cy) = self.yaw.to_radians().sin_cos();
        Vec3::new(sy, 0.0, cy)
    }

    pub fn flat_right(self) -> Vec3 {
        let (sy, cy) = self.yaw.to_radians().sin_cos();
        Vec3::new(cy, 0.0, -sy)
    }

    /// Smallest absolute angle between two orientations
    pub fn angle_to(self, other: Rotation) -> f32 {
        shortest_yaw_delta(self.yaw, other.yaw)
            .abs()
            .max((self.pitch - other.pitch).abs())
    }

    /// Interpolate yaw along the shortest arc
    pub fn lerp(self, other: Rotation, t: f32) -> Rotation {
        let yaw = self.yaw + shortest_yaw_delta(self.yaw, other.yaw) * t;
        Rotation::new(yaw, self.pitch + (other.pitch - self.pitch) * t)
    }
}

/// Wrap an angle into [0, 360)
pub fn wrap_degrees(angle: f32) -> f32 {
    if !angle.is_finite() {
        return 0.0;
    }
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negatives
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed delta from `from` to `to` in (-180, 180]
pub fn shortest_yaw_delta(from: f32, to: f32) -> f32 {
    let delta = (to - from).rem_euclid(360.0);
    if delta > 180.0 {
        delta - 360.0
    } else {
        delta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    /// Thrown grenade, owned by the thrower
    Grenade,
}

/// One loadout slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponSlot {
    pub kind: WeaponKind,
    pub ammo: u32,
}

impl WeaponSlot {
    pub fn full(kind: WeaponKind) -> Self {
        Self {
            kind,
            ammo: WeaponProfile::for_kind(kind).magazine_capacity,
        }
    }

    pub fn profile(&self) -> WeaponProfile {
        WeaponProfile::for_kind(self.kind)
    }
}

/// Authoritative (or predicted) state of one simulated actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: EntityId,
    pub kind: EntityKind,

    // Movement
    pub position: Vec3,
    pub rotation: Rotation,
    pub velocity: Vec3,
    pub grounded: bool,

    // Vitals
    pub health: f32,
    pub max_health: f32,
    pub alive: bool,
    pub respawn: Timer,

    // Equipment
    pub weapons: Vec<WeaponSlot>,
    pub weapon_index: u8,
    /// Slot to draw when the current holster action completes
    pub pending_weapon: Option<u8>,
    pub grenades: u32,
    pub holstered: bool,

    // Exclusive action
    pub action: Action,
    pub action_timer: Timer,
    pub fire_cooldown: Timer,
    /// Fire was held on the previous tick (semi-automatic edge detection)
    pub trigger_held: bool,

    // Scoreboard
    pub kills: u32,
    pub deaths: u32,

    // Projectiles
    pub owner: Option<EntityId>,
    pub fuse: Timer,
}

impl EntityState {
    /// Fresh player with a full loadout
    pub fn player(id: EntityId, position: Vec3, rotation: Rotation, rules: &Rules) -> Self {
        Self {
            id,
            kind: EntityKind::Player,
            position,
            rotation,
            velocity: Vec3::ZERO,
            grounded: true,
            health: rules.max_health,
            max_health: rules.max_health,
            alive: true,
            respawn: Timer::NONE,
            weapons: rules.loadout.iter().copied().map(WeaponSlot::full).collect(),
            weapon_index: 0,
            pending_weapon: None,
            grenades: rules.grenade.per_life,
            holstered: false,
            action: Action::Idle,
            action_timer: Timer::NONE,
            fire_cooldown: Timer::NONE,
            trigger_held: false,
            kills: 0,
            deaths: 0,
            owner: None,
            fuse: Timer::NONE,
        }
    }

    /// Grenade in flight
    pub fn grenade(id: EntityId, owner: EntityId, position: Vec3, velocity: Vec3, fuse: Timer) -> Self {
        Self {
            id,
            kind: EntityKind::Grenade,
            position,
            rotation: Rotation::default(),
            velocity,
            grounded: false,
            health: 0.0,
            max_health: 0.0,
            alive: true,
            respawn: Timer::NONE,
            weapons: Vec::new(),
            weapon_index: 0,
            pending_weapon: None,
            grenades: 0,
            holstered: false,
            action: Action::Idle,
            action_timer: Timer::NONE,
            fire_cooldown: Timer::NONE,
            trigger_held: false,
            kills: 0,
            deaths: 0,
            owner: Some(owner),
            fuse,
        }
    }

    pub fn weapon(&self) -> Option<&WeaponSlot> {
        self.weapons.get(usize::from(self.weapon_index))
    }

    pub fn weapon_mut(&mut self) -> Option<&mut WeaponSlot> {
        self.weapons.get_mut(usize::from(self.weapon_index))
    }

    /// Rounds in the selected weapon's magazine
    pub fn ammo(&self) -> u32 {
        self.weapon().map_or(0, |w| w.ammo)
    }

    pub fn magazine_capacity(&self) -> u32 {
        self.weapon().map_or(0, |w| w.profile().magazine_capacity)
    }

    pub fn is_magazine_full(&self) -> bool {
        self.weapon()
            .map_or(true, |w| w.ammo >= w.profile().magazine_capacity)
    }

    pub fn eye_position(&self, rules: &Rules) -> Vec3 {
        self.position + Vec3::Y * rules.hitbox.eye_height
    }

    /// Can be struck by shots
    pub fn is_hittable(&self) -> bool {
        self.kind == EntityKind::Player && self.alive
    }

    /// Compare a predicted state against an authoritative one. Continuous
    /// fields use the tolerance; every discrete field must match exactly.
    pub fn diverges_from(&self, other: &EntityState, tolerance: &Tolerance) -> bool {
        if self.position.distance(other.position) > tolerance.position
            || self.rotation.angle_to(other.rotation) > tolerance.rotation
            || (self.health - other.health).abs() > tolerance.health
        {
            return true;
        }

        self.alive != other.alive
            || self.action != other.action
            || self.holstered != other.holstered
            || self.weapon_index != other.weapon_index
            || self.pending_weapon != other.pending_weapon
            || self.weapons != other.weapons
            || self.grenades != other.grenades
            || self.grounded != other.grounded
    }
}

/// How far a prediction may drift before it counts as a desync
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// World units
    pub position: f32,
    /// Degrees
    pub rotation: f32,
    pub health: f32,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            position: 0.01,
            rotation: 0.1,
            health: 0.01,
        }
    }
}
