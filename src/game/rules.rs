//! Gameplay tuning shared bit-for-bit by server and predicting clients

use super::combat::WeaponKind;
use super::physics::MovementStats;
use crate::util::time::{ticks_for, DEFAULT_TICK_RATE};
use std::time::Duration;

/// Player hit volumes, relative to the feet position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitboxDims {
    pub eye_height: f32,
    /// Half extent of the body box on X and Z
    pub body_half_width: f32,
    /// Body box spans from the feet up to this height
    pub body_height: f32,
    pub head_center_height: f32,
    pub head_radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeleeStats {
    pub damage: f32,
    pub range: f32,
    pub duration_ticks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrenadeStats {
    pub per_life: u32,
    /// Wind-up before release
    pub throw_ticks: u64,
    pub fuse_ticks: u64,
    pub speed: f32,
    pub blast_radius: f32,
    /// Damage at the blast center, falling off linearly to zero at the radius
    pub damage: f32,
}

/// Everything the deterministic step function depends on besides the state
/// and the command. Built once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct Rules {
    pub tick_rate: u32,
    pub movement: MovementStats,
    pub max_health: f32,
    pub respawn_ticks: u64,
    pub inspect_ticks: u64,
    pub holster_ticks: u64,
    pub melee: MeleeStats,
    pub grenade: GrenadeStats,
    pub hitbox: HitboxDims,
    pub headshot_multiplier: f32,
    /// Holding fire on an empty magazine starts a reload
    pub auto_reload: bool,
    pub loadout: Vec<WeaponKind>,
}

impl Rules {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        let ticks = |secs: f32| ticks_for(Duration::from_secs_f32(secs), tick_rate);
        Self {
            tick_rate,
            movement: MovementStats::default(),
            max_health: 100.0,
            respawn_ticks: ticks(3.0),
            inspect_ticks: ticks(2.5),
            holster_ticks: ticks(0.4),
            melee: MeleeStats {
                damage: 50.0,
                range: 2.0,
                duration_ticks: ticks(0.6),
            },
            grenade: GrenadeStats {
                per_life: 2,
                throw_ticks: ticks(0.5),
                fuse_ticks: ticks(2.5),
                speed: 18.0,
                blast_radius: 6.0,
                damage: 100.0,
            },
            hitbox: HitboxDims {
                eye_height: 1.6,
                body_half_width: 0.35,
                body_height: 1.45,
                head_center_height: 1.65,
                head_radius: 0.2,
            },
            headshot_multiplier: 2.0,
            auto_reload: true,
            loadout: vec![WeaponKind::Rifle, WeaponKind::Pistol],
        }
    }

    /// Seconds per tick
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Seconds to whole ticks at this rate (at least one)
    pub fn ticks(&self, secs: f32) -> u64 {
        ticks_for(Duration::from_secs_f32(secs.max(0.0)), self.tick_rate).max(1)
    }

    pub fn with_respawn(mut self, respawn: Duration) -> Self {
        self.respawn_ticks = ticks_for(respawn, self.tick_rate);
        self
    }
}

impl Default for Rules {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE)
    }
}
