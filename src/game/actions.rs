//! Exclusive action state machine
//!
//! An entity is doing at most one exclusive action at a time. Every action is
//! entered from `Idle` only, and leaves back to `Idle` either when its
//! completion tick is reached or when the presentation layer reports that the
//! matching animation finished, whichever comes first. Guards that fail leave
//! the state untouched and report `false`.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::entity::EntityState;
use super::rules::Rules;
use crate::util::time::{Tick, Timer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Idle,
    Reloading,
    Bolting,
    Meleeing,
    ThrowingGrenade,
    Inspecting,
    Holstering,
}

impl Action {
    pub fn is_exclusive(self) -> bool {
        self != Action::Idle
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::Idle => "idle",
            Action::Reloading => "reloading",
            Action::Bolting => "bolting",
            Action::Meleeing => "meleeing",
            Action::ThrowingGrenade => "throwing_grenade",
            Action::Inspecting => "inspecting",
            Action::Holstering => "holstering",
        }
    }
}

/// Side effect of an action finishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionEffect {
    None,
    /// The grenade leaves the hand
    ReleaseGrenade,
}

pub struct ActionSystem;

impl ActionSystem {
    /// Shared part of every guard: idle and not mid-anything
    fn idle(state: &EntityState) -> bool {
        state.alive && state.action == Action::Idle
    }

    fn begin(state: &mut EntityState, action: Action, tick: Tick, duration_ticks: u64) {
        state.action = action;
        state.action_timer = Timer::at(tick + duration_ticks.max(1));
        trace!(entity = state.id, tick, action = action.name(), "action started");
    }

    /// Reload is allowed when idle, drawn, and either the magazine has room
    /// or the weapon allows topping off a full magazine.
    pub fn can_reload(state: &EntityState) -> bool {
        let Some(slot) = state.weapon() else {
            return false;
        };
        Self::idle(state)
            && !state.holstered
            && (slot.profile().can_reload_when_full || !state.is_magazine_full())
    }

    pub fn try_reload(state: &mut EntityState, tick: Tick, rules: &Rules) -> bool {
        if !Self::can_reload(state) {
            return false;
        }
        let Some(slot) = state.weapon() else {
            return false;
        };
        let duration = rules.ticks(slot.profile().reload_time);
        Self::begin(state, Action::Reloading, tick, duration);
        true
    }

    /// Bolt cycle after a shot of a bolt-action weapon with rounds left
    pub fn try_bolt(state: &mut EntityState, tick: Tick, rules: &Rules) -> bool {
        let Some(slot) = state.weapon() else {
            return false;
        };
        let profile = slot.profile();
        if !Self::idle(state) || state.holstered || !profile.bolt_action || slot.ammo == 0 {
            return false;
        }
        Self::begin(state, Action::Bolting, tick, rules.ticks(profile.bolt_time));
        true
    }

    pub fn try_melee(state: &mut EntityState, tick: Tick, rules: &Rules) -> bool {
        if !Self::idle(state) || state.holstered {
            return false;
        }
        Self::begin(state, Action::Meleeing, tick, rules.melee.duration_ticks);
        true
    }

    /// Commits one grenade at the start of the throw
    pub fn try_throw_grenade(state: &mut EntityState, tick: Tick, rules: &Rules) -> bool {
        if !Self::idle(state) || state.holstered || state.grenades == 0 {
            return false;
        }
        state.grenades -= 1;
        Self::begin(state, Action::ThrowingGrenade, tick, rules.grenade.throw_ticks);
        true
    }

    pub fn try_inspect(state: &mut EntityState, tick: Tick, rules: &Rules) -> bool {
        if !Self::idle(state) || state.holstered {
            return false;
        }
        Self::begin(state, Action::Inspecting, tick, rules.inspect_ticks);
        true
    }

    /// Toggle between drawn and holstered
    pub fn try_holster(state: &mut EntityState, tick: Tick, rules: &Rules) -> bool {
        if !Self::idle(state) {
            return false;
        }
        state.pending_weapon = None;
        Self::begin(state, Action::Holstering, tick, rules.holster_ticks);
        true
    }

    /// Put the current weapon away and draw `slot` when the holster completes
    pub fn try_switch_weapon(state: &mut EntityState, slot: u8, tick: Tick, rules: &Rules) -> bool {
        if !Self::idle(state)
            || slot == state.weapon_index
            || usize::from(slot) >= state.weapons.len()
        {
            return false;
        }
        state.pending_weapon = Some(slot);
        Self::begin(state, Action::Holstering, tick, rules.holster_ticks);
        true
    }

    /// Fire guard. Automatic weapons fire while held once the cooldown has
    /// elapsed; other weapons need a fresh trigger press as well.
    pub fn can_fire(state: &EntityState, tick: Tick, trigger_pressed: bool) -> bool {
        let Some(slot) = state.weapon() else {
            return false;
        };
        if !Self::idle(state) || state.holstered || slot.ammo == 0 {
            return false;
        }
        if !state.fire_cooldown.is_expired(tick) {
            return false;
        }
        slot.profile().automatic || trigger_pressed
    }

    /// Finish the current action if it is `action`. The external
    /// animation-end signal and tick expiry both land here.
    pub fn complete(state: &mut EntityState, action: Action) -> Option<ActionEffect> {
        if !action.is_exclusive() || state.action != action {
            return None;
        }

        let effect = match action {
            Action::Reloading => {
                if let Some(slot) = state.weapon_mut() {
                    slot.ammo = slot.profile().magazine_capacity;
                }
                ActionEffect::None
            }
            Action::ThrowingGrenade => ActionEffect::ReleaseGrenade,
            Action::Holstering => {
                match state.pending_weapon.take() {
                    Some(slot) => {
                        state.weapon_index = slot;
                        state.holstered = false;
                    }
                    None => state.holstered = !state.holstered,
                }
                ActionEffect::None
            }
            Action::Bolting | Action::Meleeing | Action::Inspecting | Action::Idle => {
                ActionEffect::None
            }
        };

        trace!(entity = state.id, action = action.name(), "action completed");
        state.action = Action::Idle;
        state.action_timer = Timer::NONE;
        Some(effect)
    }

    /// Complete the current action if its timer has run out
    pub fn expire(state: &mut EntityState, tick: Tick) -> Option<ActionEffect> {
        if state.action.is_exclusive() && state.action_timer.is_expired(tick) {
            Self::complete(state, state.action)
        } else {
            None
        }
    }

    /// A reload that is still running when the magazine gets filled from
    /// elsewhere ends right away; there is nothing left for it to do.
    pub fn on_magazine_filled(state: &mut EntityState) {
        if state.action == Action::Reloading && state.is_magazine_full() {
            state.action = Action::Idle;
            state.action_timer = Timer::NONE;
        }
    }

    /// Drop whatever is in progress (death, respawn)
    pub fn interrupt(state: &mut EntityState) {
        state.action = Action::Idle;
        state.action_timer = Timer::NONE;
        state.pending_weapon = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combat::{CombatSystem, WeaponKind};
    use crate::game::entity::{Rotation, Vec3, WeaponSlot};

    fn player() -> (EntityState, Rules) {
        let rules = Rules::default();
        let p = EntityState::player(1, Vec3::ZERO, Rotation::default(), &rules);
        (p, rules)
    }

    #[test]
    fn reload_on_full_magazine_is_rejected_silently() {
        let (mut p, rules) = player();
        assert!(!ActionSystem::try_reload(&mut p, 1, &rules));
        assert_eq!(p.action, Action::Idle);
    }

    #[test]
    fn shotgun_may_reload_when_full() {
        let (mut p, rules) = player();
        p.weapons[0] = WeaponSlot::full(WeaponKind::Shotgun);
        assert!(ActionSystem::try_reload(&mut p, 1, &rules));
        assert_eq!(p.action, Action::Reloading);
    }

    #[test]
    fn reload_completes_on_expiry_and_fills() {
        let (mut p, rules) = player();
        p.weapon_mut().unwrap().ammo = 3;
        assert!(ActionSystem::try_reload(&mut p, 10, &rules));
        let done_at = p.action_timer.target_tick().unwrap();

        assert_eq!(ActionSystem::expire(&mut p, done_at - 1), None);
        assert_eq!(p.action, Action::Reloading);

        assert_eq!(ActionSystem::expire(&mut p, done_at), Some(ActionEffect::None));
        assert_eq!(p.action, Action::Idle);
        assert_eq!(p.ammo(), 30);
    }

    #[test]
    fn external_fill_cuts_reload_short() {
        let (mut p, rules) = player();
        p.weapon_mut().unwrap().ammo = 3;
        assert!(ActionSystem::try_reload(&mut p, 10, &rules));

        CombatSystem::fill_ammunition(&mut p, 5);
        assert_eq!(p.action, Action::Reloading);

        CombatSystem::fill_ammunition(&mut p, 0);
        assert_eq!(p.action, Action::Idle);
        assert!(!p.action_timer.is_set());
    }

    #[test]
    fn grenade_requires_stock() {
        let (mut p, rules) = player();
        p.grenades = 0;
        assert!(!ActionSystem::try_throw_grenade(&mut p, 1, &rules));
        p.grenades = 1;
        assert!(ActionSystem::try_throw_grenade(&mut p, 1, &rules));
        assert_eq!(p.grenades, 0);
        assert_eq!(
            ActionSystem::complete(&mut p, Action::ThrowingGrenade),
            Some(ActionEffect::ReleaseGrenade)
        );
    }

    #[test]
    fn completion_signal_for_other_action_is_ignored() {
        let (mut p, rules) = player();
        assert!(ActionSystem::try_inspect(&mut p, 1, &rules));
        assert_eq!(ActionSystem::complete(&mut p, Action::Reloading), None);
        assert_eq!(p.action, Action::Inspecting);
        assert!(ActionSystem::complete(&mut p, Action::Inspecting).is_some());
        assert_eq!(p.action, Action::Idle);
    }

    #[test]
    fn holster_toggles_and_blocks_firing() {
        let (mut p, rules) = player();
        assert!(ActionSystem::try_holster(&mut p, 1, &rules));
        ActionSystem::complete(&mut p, Action::Holstering);
        assert!(p.holstered);
        assert!(!ActionSystem::can_fire(&p, 100, true));
        assert!(!ActionSystem::try_melee(&mut p, 100, &rules));

        assert!(ActionSystem::try_holster(&mut p, 100, &rules));
        ActionSystem::complete(&mut p, Action::Holstering);
        assert!(!p.holstered);
        assert!(ActionSystem::can_fire(&p, 100, true));
    }

    #[test]
    fn weapon_switch_draws_pending_slot() {
        let (mut p, rules) = player();
        assert!(!ActionSystem::try_switch_weapon(&mut p, 9, 1, &rules));
        assert!(ActionSystem::try_switch_weapon(&mut p, 1, 1, &rules));
        ActionSystem::complete(&mut p, Action::Holstering);
        assert_eq!(p.weapon_index, 1);
        assert_eq!(p.pending_weapon, None);
    }

    #[test]
    fn semi_automatic_needs_fresh_press() {
        let (mut p, _) = player();
        p.weapon_index = 1; // pistol
        assert!(!ActionSystem::can_fire(&p, 1, false));
        assert!(ActionSystem::can_fire(&p, 1, true));
        p.fire_cooldown = Timer::at(5);
        assert!(!ActionSystem::can_fire(&p, 4, true));
    }

    #[test]
    fn at_most_one_exclusive_action_under_any_attempt_order() {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        let (mut p, rules) = player();
        p.weapons.push(WeaponSlot::full(WeaponKind::Sniper));
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for tick in 0..5_000u64 {
            match rng.gen_range(0..10) {
                0 => {
                    ActionSystem::try_reload(&mut p, tick, &rules);
                }
                1 => {
                    ActionSystem::try_bolt(&mut p, tick, &rules);
                }
                2 => {
                    ActionSystem::try_melee(&mut p, tick, &rules);
                }
                3 => {
                    ActionSystem::try_throw_grenade(&mut p, tick, &rules);
                }
                4 => {
                    ActionSystem::try_inspect(&mut p, tick, &rules);
                }
                5 => {
                    ActionSystem::try_holster(&mut p, tick, &rules);
                }
                6 => {
                    let slot = rng.gen_range(0..3u8);
                    ActionSystem::try_switch_weapon(&mut p, slot, tick, &rules);
                }
                7 => {
                    if let Some(slot) = p.weapon_mut() {
                        slot.ammo = slot.ammo.saturating_sub(1);
                    }
                }
                8 => {
                    CombatSystem::fill_ammunition(&mut p, rng.gen_range(0..4));
                }
                _ => {
                    ActionSystem::expire(&mut p, tick);
                }
            }

            let started_while_busy = {
                let before = p.action;
                let mut probe = p.clone();
                ActionSystem::try_inspect(&mut probe, tick, &rules);
                before.is_exclusive() && probe.action != before
            };
            assert!(!started_while_busy, "tick {tick}: entered a second action");
        }
    }
}
