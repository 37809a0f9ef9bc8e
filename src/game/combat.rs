//! Combat system - weapons, ammunition, damage

use serde::{Deserialize, Serialize};

use super::actions::ActionSystem;
use super::entity::{EntityId, EntityState, Vec3};
use super::error::SimError;
use super::store::StateStore;
use crate::util::time::Tick;

/// Weapons available in a loadout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponKind {
    /// Automatic, large magazine
    Rifle,
    /// Semi-automatic sidearm
    Pistol,
    /// Bolt-action, one shot per cycle
    Sniper,
    /// Semi-automatic, reloads shell by shell so topping off is allowed
    Shotgun,
}

/// Weapon stats per kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeaponProfile {
    /// Damage per body hit
    pub damage: f32,
    /// Maximum hit-scan distance
    pub range: f32,
    /// Minimum time between shots (seconds)
    pub fire_interval: f32,
    /// Fires while the trigger is held
    pub automatic: bool,
    /// Each shot is followed by a bolt cycle
    pub bolt_action: bool,
    pub magazine_capacity: u32,
    /// Reload may start on a full magazine
    pub can_reload_when_full: bool,
    /// Reload duration (seconds)
    pub reload_time: f32,
    /// Bolt cycle duration (seconds)
    pub bolt_time: f32,
}

impl WeaponProfile {
    pub fn for_kind(kind: WeaponKind) -> Self {
        match kind {
            WeaponKind::Rifle => Self {
                damage: 15.0,
                range: 200.0,
                fire_interval: 0.1,
                automatic: true,
                bolt_action: false,
                magazine_capacity: 30,
                can_reload_when_full: false,
                reload_time: 2.0,
                bolt_time: 0.0,
            },
            WeaponKind::Pistol => Self {
                damage: 20.0,
                range: 100.0,
                fire_interval: 0.15,
                automatic: false,
                bolt_action: false,
                magazine_capacity: 12,
                can_reload_when_full: false,
                reload_time: 1.5,
                bolt_time: 0.0,
            },
            WeaponKind::Sniper => Self {
                damage: 80.0,
                range: 500.0,
                fire_interval: 0.2,
                automatic: false,
                bolt_action: true,
                magazine_capacity: 5,
                can_reload_when_full: false,
                reload_time: 3.0,
                bolt_time: 1.0,
            },
            WeaponKind::Shotgun => Self {
                damage: 45.0,
                range: 30.0,
                fire_interval: 0.8,
                automatic: false,
                bolt_action: false,
                magazine_capacity: 6,
                can_reload_when_full: true,
                reload_time: 2.5,
                bolt_time: 0.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillCause {
    Shot,
    Melee,
    Grenade,
}

/// A kill for the scoreboard feed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KillEvent {
    pub tick: Tick,
    /// `None` for self-inflicted deaths
    pub killer: Option<EntityId>,
    pub victim: EntityId,
    pub cause: KillCause,
}

/// Damage actually applied to a present-time target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageOutcome {
    pub applied: f32,
    pub killed: bool,
    /// Who got the kill; `None` for self-inflicted deaths and for shooters
    /// that have left the world
    pub killer: Option<EntityId>,
}

/// Combat system for ammunition and damage
pub struct CombatSystem;

impl CombatSystem {
    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32, max_health: f32) -> (f32, bool) {
        let new_health = (current_health - damage.max(0.0)).clamp(0.0, max_health);
        (new_health, new_health <= 0.0)
    }

    /// Refill the selected magazine. `amount == 0` means "fill to capacity";
    /// any other amount adds rounds without exceeding capacity. Returns the
    /// resulting ammo count.
    pub fn fill_ammunition(state: &mut EntityState, amount: u32) -> u32 {
        let Some(slot) = state.weapon_mut() else {
            return 0;
        };
        let capacity = slot.profile().magazine_capacity;
        slot.ammo = if amount == 0 {
            capacity
        } else {
            slot.ammo.saturating_add(amount).min(capacity)
        };
        let ammo = slot.ammo;
        ActionSystem::on_magazine_filled(state);
        ammo
    }

    /// Linear falloff from `max_damage` at the center to zero at `radius`
    pub fn blast_damage(center: Vec3, position: Vec3, radius: f32, max_damage: f32) -> f32 {
        if radius <= 0.0 {
            return 0.0;
        }
        let distance = center.distance(position);
        if distance >= radius {
            0.0
        } else {
            max_damage * (1.0 - distance / radius)
        }
    }

    /// Damage a present-time target. Kill credit goes to the shooter before
    /// anything reads the shooter's state. Dead or missing targets take
    /// nothing and yield `Ok(None)`. A shooter that no longer exists (a
    /// grenade outliving its thrower) still kills, uncredited.
    pub fn apply_hit(
        store: &mut StateStore,
        tick: Tick,
        shooter: EntityId,
        target: EntityId,
        damage: f32,
    ) -> Result<Option<DamageOutcome>, SimError> {
        let Some(current) = store.get(target) else {
            return Ok(None);
        };
        if !current.is_hittable() {
            return Ok(None);
        }

        let (new_health, _) = Self::apply_damage(current.health, damage, current.max_health);
        let applied = current.health - new_health;
        let credit = shooter != target && store.contains(shooter);
        let outcome = store.mutate(target, tick, |t| t.health = new_health)?;

        let killer = if outcome.died && credit {
            store.mutate(shooter, tick, |s| s.kills += 1)?;
            Some(shooter)
        } else {
            None
        };

        Ok(Some(DamageOutcome {
            applied,
            killed: outcome.died,
            killer,
        }))
    }
}
