//! Match phases and the authoritative tick loop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::time::{unix_millis, Stopwatch, Tick, TickClock, Timer};
use crate::ws::protocol::{MatchInfo, ServerMsg};

use super::entity::EntityId;
use super::error::SimError;
use super::lag_comp::HitRecord;
use super::combat::KillEvent;
use super::server::{ServerSettings, ServerSimulation};
use super::snapshot::SnapshotBuilder;
use super::store::Role;
use super::{InputMsg, PlayerInput};

/// Session phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// No session
    #[default]
    None,
    /// Session established, nobody asked to start yet
    LobbyConnected,
    /// Start requested, wait timer running
    WaitingForPlayers,
    /// Match timer running, damage enabled
    InProgress,
    /// Match over, entities frozen
    Finished,
}

impl MatchPhase {
    pub fn name(self) -> &'static str {
        match self {
            MatchPhase::None => "none",
            MatchPhase::LobbyConnected => "lobby_connected",
            MatchPhase::WaitingForPlayers => "waiting_for_players",
            MatchPhase::InProgress => "in_progress",
            MatchPhase::Finished => "finished",
        }
    }

    /// Entities are stepped in this phase
    pub fn simulates_movement(self) -> bool {
        matches!(
            self,
            MatchPhase::LobbyConnected | MatchPhase::WaitingForPlayers | MatchPhase::InProgress
        )
    }

    /// Hits and blasts deal damage in this phase
    pub fn applies_damage(self) -> bool {
        self == MatchPhase::InProgress
    }
}

/// Timer lengths and start requirements
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSettings {
    pub wait_for_players: Duration,
    pub match_duration: Duration,
    pub min_players: usize,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            wait_for_players: Duration::from_secs(15),
            match_duration: Duration::from_secs(120),
            min_players: 1,
        }
    }
}

/// Replicated match state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchState {
    pub phase: MatchPhase,
    pub wait_timer: Timer,
    pub end_timer: Timer,
}

/// Phase transitions. Only the server role advances it; clients apply
/// replicated state.
#[derive(Debug, Clone)]
pub struct MatchMachine {
    role: Role,
    settings: MatchSettings,
    state: MatchState,
}

impl MatchMachine {
    pub fn new(role: Role, settings: MatchSettings) -> Self {
        Self {
            role,
            settings,
            state: MatchState::default(),
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.state.phase
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    fn ensure_server(&self) -> Result<(), SimError> {
        if self.role == Role::Server {
            Ok(())
        } else {
            debug!(phase = self.state.phase.name(), "client tried to drive the match machine");
            Err(SimError::NotAuthoritative)
        }
    }

    fn set_phase(&mut self, phase: MatchPhase, tick: Tick) {
        info!(tick, from = self.state.phase.name(), to = phase.name(), "match phase changed");
        self.state.phase = phase;
    }

    /// None -> LobbyConnected
    pub fn establish_session(&mut self, clock: &TickClock) -> Result<(), SimError> {
        self.ensure_server()?;
        if self.state.phase != MatchPhase::None {
            return Err(SimError::InvalidPhase(self.state.phase.name()));
        }
        self.set_phase(MatchPhase::LobbyConnected, clock.current());
        Ok(())
    }

    /// LobbyConnected -> WaitingForPlayers, arming the wait timer
    pub fn start(&mut self, clock: &TickClock, players: usize) -> Result<(), SimError> {
        self.ensure_server()?;
        if self.state.phase != MatchPhase::LobbyConnected {
            return Err(SimError::InvalidPhase(self.state.phase.name()));
        }
        if players < self.settings.min_players {
            return Err(SimError::NotEnoughPlayers {
                required: self.settings.min_players,
                present: players,
            });
        }
        self.state.wait_timer = clock.create_timer(self.settings.wait_for_players);
        self.set_phase(MatchPhase::WaitingForPlayers, clock.current());
        Ok(())
    }

    /// Evaluate timers once for the current tick. At most one transition.
    pub fn update(&mut self, clock: &TickClock) -> Result<Option<MatchPhase>, SimError> {
        self.ensure_server()?;
        let tick = clock.current();
        match self.state.phase {
            MatchPhase::WaitingForPlayers if self.state.wait_timer.is_expired(tick) => {
                self.state.wait_timer = Timer::NONE;
                self.state.end_timer = clock.create_timer(self.settings.match_duration);
                self.set_phase(MatchPhase::InProgress, tick);
                Ok(Some(MatchPhase::InProgress))
            }
            MatchPhase::InProgress if self.state.end_timer.is_expired(tick) => {
                self.state.end_timer = Timer::NONE;
                self.set_phase(MatchPhase::Finished, tick);
                Ok(Some(MatchPhase::Finished))
            }
            _ => Ok(None),
        }
    }

    /// Any phase -> None
    pub fn teardown(&mut self, clock: &TickClock) -> Result<(), SimError> {
        self.ensure_server()?;
        if self.state.phase != MatchPhase::None {
            self.set_phase(MatchPhase::None, clock.current());
        }
        self.state = MatchState::default();
        Ok(())
    }

    /// Client path: take the server's state as is
    pub fn apply_replicated(&mut self, state: MatchState) -> Result<(), SimError> {
        if self.role == Role::Server {
            return Err(SimError::InvalidTransition);
        }
        self.state = state;
        Ok(())
    }

    /// Time left on the timer that drives the current phase
    pub fn remaining(&self, clock: &TickClock) -> Option<Duration> {
        match self.state.phase {
            MatchPhase::WaitingForPlayers => clock.remaining(&self.state.wait_timer),
            MatchPhase::InProgress => clock.remaining(&self.state.end_timer),
            _ => None,
        }
    }
}

/// Read by the HTTP layer, written once per tick by the loop
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchStatus {
    pub match_id: Uuid,
    pub tick: Tick,
    pub phase: MatchPhase,
    pub players: usize,
    pub remaining_ms: Option<u64>,
    pub last_tick_micros: u64,
    pub slow_ticks: u64,
}

/// Host-side failures of a match request
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error(transparent)]
    Sim(#[from] SimError),

    #[error("match is full ({0} players)")]
    Full(usize),

    #[error("match loop is not running")]
    Closed,
}

impl MatchError {
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::Sim(SimError::NotEnoughPlayers { .. }) => "not_enough_players",
            MatchError::Sim(SimError::InvalidPhase(_)) => "invalid_phase",
            MatchError::Sim(_) => "rejected",
            MatchError::Full(_) => "match_full",
            MatchError::Closed => "unavailable",
        }
    }
}

/// Sent back to a connection that joined
#[derive(Debug, Clone)]
pub struct JoinAck {
    pub entity: EntityId,
    pub tick: Tick,
    pub tick_rate: u32,
    pub info: MatchInfo,
}

/// Handle to the running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<PlayerInput>,
    pub outbound_tx: broadcast::Sender<ServerMsg>,
    status: Arc<RwLock<MatchStatus>>,
}

impl MatchHandle {
    pub fn status(&self) -> MatchStatus {
        self.status.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.outbound_tx.subscribe()
    }

    async fn send(&self, connection_id: Uuid, msg: InputMsg) -> Result<(), MatchError> {
        self.input_tx
            .send(PlayerInput {
                connection_id,
                msg,
                received_at: unix_millis(),
            })
            .await
            .map_err(|_| MatchError::Closed)
    }

    /// Spawn a player for `connection_id`
    pub async fn join(&self, connection_id: Uuid) -> Result<JoinAck, MatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(connection_id, InputMsg::Join { reply }).await?;
        rx.await.map_err(|_| MatchError::Closed)?
    }

    /// Request LobbyConnected -> WaitingForPlayers
    pub async fn start(&self, connection_id: Uuid) -> Result<(), MatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(connection_id, InputMsg::Start { reply }).await?;
        rx.await.map_err(|_| MatchError::Closed)?
    }

    pub async fn forward(&self, connection_id: Uuid, msg: InputMsg) -> Result<(), MatchError> {
        self.send(connection_id, msg).await
    }
}

struct Connection {
    entity: EntityId,
}

/// The authoritative game match
pub struct GameMatch {
    id: Uuid,
    sim: ServerSimulation,
    input_rx: mpsc::Receiver<PlayerInput>,
    outbound_tx: broadcast::Sender<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    status: Arc<RwLock<MatchStatus>>,
    connections: HashMap<Uuid, Connection>,
    max_players: usize,
    interp_delay_ticks: u64,
    /// Hits and kills since the last broadcast snapshot
    pending_hits: Vec<HitRecord>,
    pending_kills: Vec<KillEvent>,
    slow_ticks: u64,
}

impl GameMatch {
    pub fn new(
        settings: ServerSettings,
        seed: u64,
        snapshot_rate: u32,
        max_players: usize,
        interp_delay: Duration,
    ) -> (Self, MatchHandle) {
        let (input_tx, input_rx) = mpsc::channel(1024);
        let (outbound_tx, _) = broadcast::channel(128);
        let id = Uuid::new_v4();

        let tick_rate = settings.rules.tick_rate;
        let snapshot_interval = (tick_rate / snapshot_rate.max(1)).max(1);
        let interp_delay_ticks = crate::util::time::ticks_for(interp_delay, tick_rate);

        let mut sim = ServerSimulation::new(settings, seed);
        if let Err(err) = sim.establish_session() {
            warn!(%err, "session already established");
        }

        let status = Arc::new(RwLock::new(MatchStatus {
            match_id: id,
            phase: sim.phase(),
            ..MatchStatus::default()
        }));

        let handle = MatchHandle {
            id,
            input_tx,
            outbound_tx: outbound_tx.clone(),
            status: status.clone(),
        };

        let game_match = Self {
            id,
            sim,
            input_rx,
            outbound_tx,
            snapshot_builder: SnapshotBuilder::new(snapshot_interval),
            status,
            connections: HashMap::new(),
            max_players,
            interp_delay_ticks,
            pending_hits: Vec::new(),
            pending_kills: Vec::new(),
            slow_ticks: 0,
        };

        (game_match, handle)
    }

    /// Run the authoritative tick loop until every handle is dropped
    pub async fn run(mut self) {
        info!(match_id = %self.id, tick_rate = self.sim.rules().tick_rate, "match loop started");

        let budget = crate::util::time::tick_interval(self.sim.rules().tick_rate);
        let mut tick_interval = interval(budget);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            if !self.process_inputs() {
                break;
            }

            let watch = Stopwatch::new();
            let report = self.sim.tick();

            if let Some(phase) = report.phase_changed {
                let _ = self.outbound_tx.send(ServerMsg::MatchPhase {
                    tick: report.tick,
                    info: self.sim.match_info(),
                });
                self.snapshot_builder.force_next();
                debug!(match_id = %self.id, phase = phase.name(), "phase broadcast");
            }
            if !report.kills.is_empty() {
                self.snapshot_builder.force_next();
            }
            self.pending_hits.extend(report.hits);
            self.pending_kills.extend(report.kills);

            if self.snapshot_builder.should_send() {
                let msg = self.snapshot_builder.build(
                    &report.snapshot,
                    self.sim.match_info(),
                    std::mem::take(&mut self.pending_hits),
                    std::mem::take(&mut self.pending_kills),
                );
                // No receivers is fine
                let _ = self.outbound_tx.send(msg);
            }

            let elapsed = watch.elapsed_micros();
            if elapsed > budget.as_micros() as u64 {
                self.slow_ticks += 1;
                warn!(tick = report.tick, elapsed_us = elapsed, "tick over budget");
            }
            self.publish_status(elapsed);
        }

        info!(
            match_id = %self.id,
            snapshots = self.snapshot_builder.stats().total_snapshots,
            "match loop stopped"
        );
    }

    fn publish_status(&self, last_tick_micros: u64) {
        let info = self.sim.match_info();
        let mut status = self.status.write();
        status.tick = self.sim.current_tick();
        status.phase = info.state.phase;
        status.players = self.connections.len();
        status.remaining_ms = info.remaining_ms;
        status.last_tick_micros = last_tick_micros;
        status.slow_ticks = self.slow_ticks;
    }

    /// Drain the input queue. Returns false once every sender is gone.
    fn process_inputs(&mut self) -> bool {
        loop {
            match self.input_rx.try_recv() {
                Ok(input) => self.handle_input(input),
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle_input(&mut self, input: PlayerInput) {
        let connection_id = input.connection_id;
        match input.msg {
            InputMsg::Join { reply } => {
                let result = self.handle_join(connection_id);
                let _ = reply.send(result);
            }
            InputMsg::Start { reply } => {
                let result = self.sim.start_match().map_err(MatchError::from);
                match &result {
                    Ok(()) => {
                        let _ = self.outbound_tx.send(ServerMsg::MatchPhase {
                            tick: self.sim.current_tick(),
                            info: self.sim.match_info(),
                        });
                        self.snapshot_builder.force_next();
                    }
                    Err(err) => debug!(connection_id = %connection_id, %err, "start rejected"),
                }
                let _ = reply.send(result);
            }
            InputMsg::Command(ticked) => {
                let Some(conn) = self.connections.get(&connection_id) else {
                    return;
                };
                if let Err(err) = self.sim.submit_command(conn.entity, ticked) {
                    debug!(connection_id = %connection_id, %err, "command dropped");
                }
            }
            InputMsg::ActionCompleted(action) => {
                if let Some(conn) = self.connections.get(&connection_id) {
                    self.sim.action_completed(conn.entity, action);
                }
            }
            InputMsg::Latency { rtt_ms } => {
                if let Some(conn) = self.connections.get(&connection_id) {
                    let one_way = Duration::from_millis(rtt_ms / 2);
                    let ticks = self.sim.clock().ticks_for(one_way) + self.interp_delay_ticks;
                    self.sim.set_latency_ticks(conn.entity, ticks);
                }
            }
            InputMsg::Leave => self.handle_leave(connection_id),
        }
    }

    fn handle_join(&mut self, connection_id: Uuid) -> Result<JoinAck, MatchError> {
        if let Some(conn) = self.connections.get(&connection_id) {
            warn!(connection_id = %connection_id, "connection already joined");
            return Ok(self.ack(conn.entity));
        }
        if self.connections.len() >= self.max_players {
            return Err(MatchError::Full(self.max_players));
        }

        let entity = self.sim.add_player()?;
        self.connections.insert(connection_id, Connection { entity });

        let _ = self.outbound_tx.send(ServerMsg::PlayerJoined {
            connection_id,
            entity,
        });
        self.snapshot_builder.force_next();

        info!(
            match_id = %self.id,
            connection_id = %connection_id,
            entity,
            player_count = self.connections.len(),
            "player joined"
        );
        Ok(self.ack(entity))
    }

    fn ack(&self, entity: EntityId) -> JoinAck {
        JoinAck {
            entity,
            tick: self.sim.current_tick(),
            tick_rate: self.sim.rules().tick_rate,
            info: self.sim.match_info(),
        }
    }

    fn handle_leave(&mut self, connection_id: Uuid) {
        let Some(conn) = self.connections.remove(&connection_id) else {
            return;
        };
        if let Err(err) = self.sim.remove_player(conn.entity) {
            debug!(entity = conn.entity, %err, "player entity already gone");
        }

        let _ = self.outbound_tx.send(ServerMsg::PlayerLeft {
            connection_id,
            entity: conn.entity,
            reason: "disconnected".to_string(),
        });
        info!(
            match_id = %self.id,
            connection_id = %connection_id,
            player_count = self.connections.len(),
            "player left"
        );

        if self.connections.is_empty() && self.sim.phase() != MatchPhase::LobbyConnected {
            info!(match_id = %self.id, "last player left, resetting session");
            self.pending_hits.clear();
            self.pending_kills.clear();
            if let Err(err) = self.sim.teardown().and_then(|_| self.sim.establish_session()) {
                warn!(%err, "session reset failed");
            }
            let _ = self.outbound_tx.send(ServerMsg::MatchPhase {
                tick: self.sim.current_tick(),
                info: self.sim.match_info(),
            });
        }
    }
}
