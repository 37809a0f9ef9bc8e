//! Authoritative, tick-versioned entity state
//!
//! The server role is the only writer. Clients hold a replica that changes
//! only through [`StateStore::apply_snapshot`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::actions::ActionSystem;
use super::entity::{EntityId, EntityState};
use super::error::SimError;
use super::snapshot::Snapshot;
use crate::util::time::{Tick, Timer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Server,
    Client,
}

/// What a successful mutation did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    pub changed: bool,
    /// Health crossed from above zero to zero or below in this mutation
    pub died: bool,
}

/// One entity's before/after pair, derived by diffing
#[derive(Debug, Clone, PartialEq)]
pub struct EntityChange {
    pub tick: Tick,
    pub id: EntityId,
    /// `None` when the entity was spawned
    pub before: Option<EntityState>,
    /// `None` when the entity was removed
    pub after: Option<EntityState>,
}

impl EntityChange {
    pub fn health_delta(&self) -> f32 {
        let health = |s: &Option<EntityState>| s.as_ref().map_or(0.0, |s| s.health);
        health(&self.after) - health(&self.before)
    }
}

/// Entities changed or removed after a given tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    pub since: Tick,
    pub changed: Vec<EntityState>,
    pub removed: Vec<EntityId>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

pub struct StateStore {
    role: Role,
    entities: BTreeMap<EntityId, EntityState>,
    /// Tick of each entity's latest change
    versions: BTreeMap<EntityId, Tick>,
    /// Tick each removed entity disappeared at
    removed: BTreeMap<EntityId, Tick>,
    changes: Vec<EntityChange>,
    next_id: EntityId,
    respawn_ticks: u64,
    /// Newest snapshot applied to a client replica
    applied_tick: Option<Tick>,
}

impl StateStore {
    pub fn new(role: Role, respawn_ticks: u64) -> Self {
        Self {
            role,
            entities: BTreeMap::new(),
            versions: BTreeMap::new(),
            removed: BTreeMap::new(),
            changes: Vec::new(),
            next_id: 1,
            respawn_ticks,
            applied_tick: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_authoritative(&self) -> bool {
        self.role == Role::Server
    }

    fn ensure_authoritative(&self, what: &'static str) -> Result<(), SimError> {
        if self.is_authoritative() {
            Ok(())
        } else {
            debug!(role = ?self.role, what, "rejected non-authoritative write");
            Err(SimError::NotAuthoritative)
        }
    }

    /// Copy of an entity's current state
    pub fn get(&self, id: EntityId) -> Option<EntityState> {
        self.entities.get(&id).cloned()
    }

    /// Borrowed view, for read-heavy callers
    pub fn view(&self, id: EntityId) -> Option<&EntityState> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Entity ids in ascending order
    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Entities in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &EntityState> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn version_of(&self, id: EntityId) -> Option<Tick> {
        self.versions.get(&id).copied()
    }

    /// Insert a new entity built around a freshly allocated id
    pub fn spawn(
        &mut self,
        tick: Tick,
        build: impl FnOnce(EntityId) -> EntityState,
    ) -> Result<EntityId, SimError> {
        self.ensure_authoritative("spawn")?;
        let id = self.next_id;
        self.next_id += 1;

        let mut state = build(id);
        state.id = id;
        trace!(tick, entity = id, kind = ?state.kind, "spawned");

        self.changes.push(EntityChange {
            tick,
            id,
            before: None,
            after: Some(state.clone()),
        });
        self.entities.insert(id, state);
        self.versions.insert(id, tick);
        self.removed.remove(&id);
        Ok(id)
    }

    pub fn despawn(&mut self, id: EntityId, tick: Tick) -> Result<EntityState, SimError> {
        self.ensure_authoritative("despawn")?;
        let state = self.entities.remove(&id).ok_or(SimError::UnknownEntity(id))?;
        self.versions.remove(&id);
        self.removed.insert(id, tick);
        self.changes.push(EntityChange {
            tick,
            id,
            before: Some(state.clone()),
            after: None,
        });
        trace!(tick, entity = id, "despawned");
        Ok(state)
    }

    /// Apply `f` to one entity at `tick`.
    ///
    /// Values are clamped afterwards (health into [0, max], ammo into
    /// [0, magazine]). Health crossing to zero marks the entity dead, adds a
    /// death and schedules the respawn.
    pub fn mutate(
        &mut self,
        id: EntityId,
        tick: Tick,
        f: impl FnOnce(&mut EntityState),
    ) -> Result<MutationOutcome, SimError> {
        self.ensure_authoritative("mutate")?;
        let respawn_ticks = self.respawn_ticks;
        let entity = self.entities.get_mut(&id).ok_or(SimError::UnknownEntity(id))?;

        let before = entity.clone();
        f(entity);
        entity.id = id;

        entity.health = entity.health.clamp(0.0, entity.max_health.max(0.0));
        for slot in &mut entity.weapons {
            slot.ammo = slot.ammo.min(slot.profile().magazine_capacity);
        }

        let died = before.alive && before.health > 0.0 && entity.health <= 0.0;
        if died {
            entity.alive = false;
            entity.deaths += 1;
            entity.respawn = Timer::at(tick + respawn_ticks);
            entity.velocity = Default::default();
            ActionSystem::interrupt(entity);
            debug!(tick, entity = id, deaths = entity.deaths, "entity died");
        }

        let changed = *entity != before;
        if changed {
            self.changes.push(EntityChange {
                tick,
                id,
                before: Some(before),
                after: Some(entity.clone()),
            });
            self.versions.insert(id, tick);
        }

        Ok(MutationOutcome { changed, died })
    }

    /// Everything that changed strictly after `since`
    pub fn delta_since(&self, since: Tick) -> StateDelta {
        let changed = self
            .versions
            .iter()
            .filter(|&(_, &version)| version > since)
            .filter_map(|(id, _)| self.entities.get(id).cloned())
            .collect();
        let removed = self
            .removed
            .iter()
            .filter(|&(_, &at)| at > since)
            .map(|(&id, _)| id)
            .collect();
        StateDelta {
            since,
            changed,
            removed,
        }
    }

    /// Immutable copy of every entity at `tick`
    pub fn snapshot(&self, tick: Tick) -> Snapshot {
        Snapshot::new(tick, self.entities.values().cloned().collect())
    }

    /// Replace a client replica with a snapshot. Snapshots at or before the
    /// last applied tick are discarded and reported as `Ok(false)`.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<bool, SimError> {
        if self.is_authoritative() {
            return Err(SimError::InvalidTransition);
        }
        if self.applied_tick.is_some_and(|t| snapshot.tick <= t) {
            trace!(tick = snapshot.tick, applied = ?self.applied_tick, "discarding stale snapshot");
            return Ok(false);
        }
        let tick = snapshot.tick;

        let incoming: BTreeMap<EntityId, EntityState> = snapshot
            .entities
            .iter()
            .map(|e| (e.id, e.clone()))
            .collect();

        for (id, before) in &self.entities {
            if !incoming.contains_key(id) {
                self.removed.insert(*id, tick);
                self.versions.remove(id);
                self.changes.push(EntityChange {
                    tick,
                    id: *id,
                    before: Some(before.clone()),
                    after: None,
                });
            }
        }

        for (id, after) in &incoming {
            let before = self.entities.get(id);
            if before != Some(after) {
                self.versions.insert(*id, tick);
                self.removed.remove(id);
                self.changes.push(EntityChange {
                    tick,
                    id: *id,
                    before: before.cloned(),
                    after: Some(after.clone()),
                });
            }
        }

        self.next_id = self.next_id.max(incoming.keys().max().map_or(1, |id| id + 1));
        self.entities = incoming;
        self.applied_tick = Some(tick);
        Ok(true)
    }

    /// Tick of the newest snapshot applied to this replica
    pub fn applied_tick(&self) -> Option<Tick> {
        self.applied_tick
    }

    /// Take the change events accumulated since the last drain
    pub fn drain_changes(&mut self) -> Vec<EntityChange> {
        std::mem::take(&mut self.changes)
    }

    /// Forget everything (session teardown)
    pub fn reset(&mut self) {
        self.entities.clear();
        self.versions.clear();
        self.removed.clear();
        self.changes.clear();
        self.next_id = 1;
        self.applied_tick = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{Rotation, Vec3};
    use crate::game::rules::Rules;

    fn server_with_player() -> (StateStore, EntityId, Rules) {
        let rules = Rules::default();
        let mut store = StateStore::new(Role::Server, rules.respawn_ticks);
        let id = store
            .spawn(0, |id| EntityState::player(id, Vec3::ZERO, Rotation::default(), &rules))
            .unwrap();
        store.drain_changes();
        (store, id, rules)
    }

    #[test]
    fn client_cannot_mutate() {
        let rules = Rules::default();
        let mut server = StateStore::new(Role::Server, rules.respawn_ticks);
        server
            .spawn(0, |id| EntityState::player(id, Vec3::ZERO, Rotation::default(), &rules))
            .unwrap();

        let mut client = StateStore::new(Role::Client, rules.respawn_ticks);
        assert!(client.apply_snapshot(&server.snapshot(1)).unwrap());
        let before = client.get(1);

        assert_eq!(client.mutate(1, 2, |s| s.health = 1.0), Err(SimError::NotAuthoritative));
        let spawned = client.spawn(2, |id| EntityState::player(id, Vec3::ZERO, Rotation::default(), &rules));
        assert_eq!(spawned, Err(SimError::NotAuthoritative));
        assert_eq!(client.get(1), before);
    }

    #[test]
    fn health_is_clamped() {
        let (mut store, id, _) = server_with_player();
        store.mutate(id, 1, |s| s.health = 250.0).unwrap();
        assert_eq!(store.get(id).unwrap().health, 100.0);
    }

    #[test]
    fn empty_magazine_is_not_a_death() {
        let (mut store, id, _) = server_with_player();
        let outcome = store
            .mutate(id, 1, |s| s.weapon_mut().unwrap().ammo = 0)
            .unwrap();
        assert!(!outcome.died);
        assert!(store.get(id).unwrap().alive);
    }

    #[test]
    fn death_fires_once() {
        let (mut store, id, rules) = server_with_player();
        let first = store.mutate(id, 10, |s| s.health = -5.0).unwrap();
        assert!(first.died);
        let second = store.mutate(id, 11, |s| s.health = 0.0).unwrap();
        assert!(!second.died);

        let s = store.get(id).unwrap();
        assert_eq!(s.deaths, 1);
        assert_eq!(s.respawn, Timer::at(10 + rules.respawn_ticks));
    }

    #[test]
    fn delta_lists_changes_after_tick() {
        let (mut store, id, rules) = server_with_player();
        let other = store
            .spawn(3, |id| EntityState::player(id, Vec3::new(5.0, 0.0, 0.0), Rotation::default(), &rules))
            .unwrap();
        store.mutate(id, 5, |s| s.health -= 10.0).unwrap();
        store.despawn(other, 6).unwrap();

        let delta = store.delta_since(4);
        assert_eq!(delta.changed.iter().map(|e| e.id).collect::<Vec<_>>(), vec![id]);
        assert_eq!(delta.removed, vec![other]);
        assert!(store.delta_since(6).is_empty());
    }

    #[test]
    fn no_op_mutation_is_not_versioned() {
        let (mut store, id, _) = server_with_player();
        let outcome = store.mutate(id, 9, |_| {}).unwrap();
        assert!(!outcome.changed);
        assert_eq!(store.version_of(id), Some(0));
        assert!(store.drain_changes().is_empty());
    }

    #[test]
    fn changes_carry_before_and_after() {
        let (mut store, id, _) = server_with_player();
        store.mutate(id, 2, |s| s.health -= 15.0).unwrap();
        let changes = store.drain_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].health_delta(), -15.0);
        assert!(store.drain_changes().is_empty());
    }

    #[test]
    fn replica_discards_stale_snapshots() {
        let (mut server, id, _) = server_with_player();
        let old = server.snapshot(4);
        server.mutate(id, 5, |s| s.health = 50.0).unwrap();
        let new = server.snapshot(5);

        let mut client = StateStore::new(Role::Client, 0);
        assert!(client.apply_snapshot(&new).unwrap());
        assert!(!client.apply_snapshot(&old).unwrap());
        assert!(!client.apply_snapshot(&new).unwrap());
        assert_eq!(client.get(id).unwrap().health, 50.0);
        assert_eq!(client.applied_tick(), Some(5));
    }

    #[test]
    fn server_refuses_snapshot_overwrite() {
        let (mut server, _, _) = server_with_player();
        let snap = server.snapshot(1);
        assert_eq!(server.apply_snapshot(&snap), Err(SimError::InvalidTransition));
    }
}
