//! Snapshot history and network snapshot building

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::util::time::Tick;
use crate::ws::protocol::{MatchInfo, ServerMsg};

use super::combat::KillEvent;
use super::entity::{EntityId, EntityState};
use super::error::SimError;
use super::lag_comp::HitRecord;

/// Every entity's state at one tick, sorted by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: Tick,
    pub entities: Vec<EntityState>,
}

impl Snapshot {
    pub fn new(tick: Tick, mut entities: Vec<EntityState>) -> Self {
        entities.sort_by_key(|e| e.id);
        Self { tick, entities }
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityState> {
        self.entities
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|i| &self.entities[i])
    }
}

/// Bounded ring of recent snapshots used for rewinding.
///
/// Holds the newest `depth + 1` ticks so any tick in
/// `[newest - depth, newest]` can be looked up.
pub struct SnapshotHistory {
    depth: u64,
    ring: VecDeque<Arc<Snapshot>>,
}

impl SnapshotHistory {
    pub fn new(depth: u64) -> Self {
        Self {
            depth,
            ring: VecDeque::with_capacity(depth as usize + 1),
        }
    }

    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// Append the snapshot taken at the end of a tick. Ticks must increase;
    /// anything else is ignored.
    pub fn record(&mut self, snapshot: impl Into<Arc<Snapshot>>) {
        let snapshot = snapshot.into();
        if let Some(newest) = self.newest_tick() {
            if snapshot.tick <= newest {
                debug!(tick = snapshot.tick, newest, "ignoring out-of-order snapshot");
                return;
            }
        }
        self.ring.push_back(snapshot);
        while let Some(front) = self.ring.front() {
            let newest = self.ring.back().map_or(front.tick, |b| b.tick);
            if newest - front.tick > self.depth {
                self.ring.pop_front();
            } else {
                break;
            }
        }
    }

    /// Snapshot at exactly `tick`, as seen from `current`. Fails closed when
    /// the rewind exceeds the depth or the tick is not retained.
    pub fn at(&self, tick: Tick, current: Tick) -> Result<Arc<Snapshot>, SimError> {
        let stale = || SimError::StaleHistory {
            requested: tick,
            oldest: self.oldest_tick(),
        };
        if current.saturating_sub(tick) > self.depth {
            return Err(stale());
        }
        self.ring
            .binary_search_by_key(&tick, |s| s.tick)
            .map(|i| Arc::clone(&self.ring[i]))
            .map_err(|_| stale())
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.ring.back().cloned()
    }

    pub fn oldest_tick(&self) -> Option<Tick> {
        self.ring.front().map(|s| s.tick)
    }

    pub fn newest_tick(&self) -> Option<Tick> {
        self.ring.back().map(|s| s.tick)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

/// Decides when to broadcast and builds the outgoing message
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
            stats: SnapshotStats::default(),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (phase changes, kills)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    pub fn build(
        &mut self,
        snapshot: &Snapshot,
        info: MatchInfo,
        hits: Vec<HitRecord>,
        kills: Vec<KillEvent>,
    ) -> ServerMsg {
        self.stats.record(snapshot.entities.len(), hits.len());
        ServerMsg::Snapshot {
            tick: snapshot.tick,
            info,
            entities: snapshot.entities.clone(),
            hits,
            kills,
        }
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }
}

/// Running counters for debugging
#[derive(Debug, Default, Clone)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_hits: u64,
    pub avg_entities_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, entity_count: usize, hits: usize) {
        self.total_snapshots += 1;
        self.total_hits += hits as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_entities_per_snapshot =
            self.avg_entities_per_snapshot * ((n - 1.0) / n) + (entity_count as f32 / n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{Rotation, Vec3};
    use crate::game::rules::Rules;

    fn snap(tick: Tick) -> Snapshot {
        let rules = Rules::default();
        Snapshot::new(
            tick,
            vec![
                EntityState::player(2, Vec3::new(tick as f32, 0.0, 0.0), Rotation::default(), &rules),
                EntityState::player(1, Vec3::ZERO, Rotation::default(), &rules),
            ],
        )
    }

    #[test]
    fn snapshot_sorts_and_finds_by_id() {
        let s = snap(3);
        assert_eq!(s.entities[0].id, 1);
        assert_eq!(s.get(2).unwrap().position.x, 3.0);
        assert!(s.get(9).is_none());
    }

    #[test]
    fn history_keeps_depth_plus_one() {
        let mut history = SnapshotHistory::new(10);
        for tick in 0..=50 {
            history.record(snap(tick));
        }
        assert_eq!(history.len(), 11);
        assert_eq!(history.oldest_tick(), Some(40));
        assert_eq!(history.newest_tick(), Some(50));
        assert_eq!(history.at(40, 50).unwrap().tick, 40);
    }

    #[test]
    fn lookup_beyond_depth_fails_closed() {
        let mut history = SnapshotHistory::new(10);
        for tick in 0..=50 {
            history.record(snap(tick));
        }
        assert_eq!(
            history.at(39, 50),
            Err(SimError::StaleHistory {
                requested: 39,
                oldest: Some(40)
            })
        );
        // retained but too old relative to the caller's present
        assert!(history.at(45, 56).is_err());
        // never recorded
        assert!(history.at(51, 51).is_err());
    }

    #[test]
    fn out_of_order_record_is_ignored() {
        let mut history = SnapshotHistory::new(5);
        history.record(snap(4));
        history.record(snap(3));
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().unwrap().tick, 4);
    }

    #[test]
    fn builder_sends_on_interval_and_when_forced() {
        let mut builder = SnapshotBuilder::new(3);
        let sent: Vec<bool> = (0..6).map(|_| builder.should_send()).collect();
        assert_eq!(sent, vec![false, false, true, false, false, true]);
        builder.force_next();
        assert!(builder.should_send());
    }
}
