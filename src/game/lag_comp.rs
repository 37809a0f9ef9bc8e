//! Lag-compensated hit validation
//!
//! Shots are tested against the world as the shooter saw it: every other
//! entity is looked up in the snapshot of the observed tick. Only the
//! snapshot copy is read, so present-time geometry is never moved. Damage is
//! then applied to the present-time entity.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::combat::CombatSystem;
use super::entity::{EntityId, EntityState, Vec3};
use super::error::SimError;
use super::rules::{HitboxDims, Rules};
use super::snapshot::SnapshotHistory;
use super::step::ShotIntent;
use super::store::StateStore;
use crate::util::time::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitZone {
    Head,
    Body,
}

/// Distance along a unit ray to the first intersection with a sphere
pub fn ray_sphere(origin: Vec3, dir: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let oc = origin - center;
    let b = oc.dot(dir);
    let c = oc.length_squared() - radius * radius;
    if c > 0.0 && b > 0.0 {
        return None;
    }
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    Some((-b - disc.sqrt()).max(0.0))
}

/// Distance along a ray to the first intersection with an axis-aligned box
pub fn ray_aabb(origin: Vec3, dir: Vec3, min: Vec3, max: Vec3) -> Option<f32> {
    let mut t_min = 0.0f32;
    let mut t_max = f32::INFINITY;

    for (o, d, lo, hi) in [
        (origin.x, dir.x, min.x, max.x),
        (origin.y, dir.y, min.y, max.y),
        (origin.z, dir.z, min.z, max.z),
    ] {
        if d.abs() < f32::EPSILON {
            if o < lo || o > hi {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let (a, b) = ((lo - o) * inv, (hi - o) * inv);
        let (near, far) = if a < b { (a, b) } else { (b, a) };
        t_min = t_min.max(near);
        t_max = t_max.min(far);
        if t_min > t_max {
            return None;
        }
    }
    Some(t_min)
}

/// Hit volumes of one player: a head sphere over a body box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hitbox {
    pub head_center: Vec3,
    pub head_radius: f32,
    pub body_min: Vec3,
    pub body_max: Vec3,
}

impl Hitbox {
    pub fn around(position: Vec3, dims: &HitboxDims) -> Self {
        let half = dims.body_half_width;
        Self {
            head_center: position + Vec3::Y * dims.head_center_height,
            head_radius: dims.head_radius,
            body_min: Vec3::new(position.x - half, position.y, position.z - half),
            body_max: Vec3::new(position.x + half, position.y + dims.body_height, position.z + half),
        }
    }

    /// Nearest volume hit within `range`; the head wins exact ties
    pub fn intersect(&self, origin: Vec3, dir: Vec3, range: f32) -> Option<(f32, HitZone)> {
        let head = ray_sphere(origin, dir, self.head_center, self.head_radius).map(|t| (t, HitZone::Head));
        let body = ray_aabb(origin, dir, self.body_min, self.body_max).map(|t| (t, HitZone::Body));

        let best = match (head, body) {
            (Some(h), Some(b)) => Some(if b.0 < h.0 { b } else { h }),
            (h, b) => h.or(b),
        };
        best.filter(|(t, _)| *t <= range)
    }
}

/// Which candidate wins when a ray passes through several entities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Nearest along the ray, lower id on equal distance
    #[default]
    ClosestAlongRay,
    LowestEntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotKind {
    Shot,
    Melee,
}

/// A hit-scan to validate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotRequest {
    pub kind: ShotKind,
    pub shooter: EntityId,
    pub origin: Vec3,
    pub direction: Vec3,
    pub range: f32,
    pub damage: f32,
    /// Tick whose world the shooter was looking at
    pub observed_tick: Tick,
}

impl ShotRequest {
    pub fn from_intent(kind: ShotKind, intent: &ShotIntent, current: Tick, latency_ticks: u64) -> Self {
        Self {
            kind,
            shooter: intent.shooter,
            origin: intent.origin,
            direction: intent.direction.normalize_or_zero(),
            range: intent.range,
            damage: intent.damage,
            observed_tick: current.saturating_sub(latency_ticks),
        }
    }
}

/// Closest hit found in the rewound world
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitCandidate {
    pub target: EntityId,
    pub distance: f32,
    pub zone: HitZone,
    pub point: Vec3,
}

/// Outcome of one validated shot, broadcast once for effects
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    pub tick: Tick,
    pub observed_tick: Tick,
    pub kind: ShotKind,
    pub shooter: EntityId,
    pub origin: Vec3,
    pub direction: Vec3,
    pub range: f32,
    pub point: Option<Vec3>,
    pub target: Option<EntityId>,
    pub zone: Option<HitZone>,
    pub damage: f32,
    pub killed: bool,
}

impl HitRecord {
    fn miss(tick: Tick, req: &ShotRequest) -> Self {
        Self {
            tick,
            observed_tick: req.observed_tick,
            kind: req.kind,
            shooter: req.shooter,
            origin: req.origin,
            direction: req.direction,
            range: req.range,
            point: None,
            target: None,
            zone: None,
            damage: 0.0,
            killed: false,
        }
    }
}

pub struct LagCompensator {
    tie_break: TieBreak,
}

impl LagCompensator {
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    /// Find what the shot hits in the snapshot of its observed tick
    pub fn validate(
        &self,
        history: &SnapshotHistory,
        req: &ShotRequest,
        current: Tick,
        dims: &HitboxDims,
    ) -> Result<Option<HitCandidate>, SimError> {
        // With zero latency the newest snapshot is the previous tick's
        let lookup = req.observed_tick.min(history.newest_tick().unwrap_or(current));
        let snapshot = history.at(lookup, current).map_err(|err| {
            debug!(tick = current, shooter = req.shooter, observed = req.observed_tick, %err, "rewind rejected");
            err
        })?;

        let candidates = snapshot
            .entities
            .iter()
            .filter(|e| e.id != req.shooter && e.is_hittable())
            .filter_map(|e| Self::test_entity(e, req, dims));

        Ok(match self.tie_break {
            TieBreak::ClosestAlongRay => candidates.min_by(|a, b| {
                a.distance
                    .total_cmp(&b.distance)
                    .then(a.target.cmp(&b.target))
            }),
            TieBreak::LowestEntityId => candidates.min_by_key(|c| c.target),
        })
    }

    fn test_entity(entity: &EntityState, req: &ShotRequest, dims: &HitboxDims) -> Option<HitCandidate> {
        let hitbox = Hitbox::around(entity.position, dims);
        hitbox
            .intersect(req.origin, req.direction, req.range)
            .map(|(distance, zone)| HitCandidate {
                target: entity.id,
                distance,
                zone,
                point: req.origin + req.direction * distance,
            })
    }

    /// Validate against history and apply damage to the present-time target.
    /// `apply_damage` false records the hit without damaging (outside the
    /// in-progress phase).
    pub fn resolve(
        &self,
        store: &mut StateStore,
        history: &SnapshotHistory,
        req: &ShotRequest,
        tick: Tick,
        rules: &Rules,
        apply_damage: bool,
    ) -> Result<HitRecord, SimError> {
        let mut record = HitRecord::miss(tick, req);
        let Some(hit) = self.validate(history, req, tick, &rules.hitbox)? else {
            return Ok(record);
        };

        let damage = match hit.zone {
            HitZone::Head => req.damage * rules.headshot_multiplier,
            HitZone::Body => req.damage,
        };

        record.point = Some(hit.point);
        record.target = Some(hit.target);
        record.zone = Some(hit.zone);

        if apply_damage {
            if let Some(outcome) = CombatSystem::apply_hit(store, tick, req.shooter, hit.target, damage)? {
                record.damage = outcome.applied;
                record.killed = outcome.killed;
            }
        }

        trace!(
            tick,
            shooter = req.shooter,
            target = hit.target,
            zone = ?hit.zone,
            damage = record.damage,
            "hit confirmed"
        );
        Ok(record)
    }
}

impl Default for LagCompensator {
    fn default() -> Self {
        Self::new(TieBreak::default())
    }
}
