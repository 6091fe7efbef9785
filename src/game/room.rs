//! Room state and authoritative tick loop

use dashmap::DashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::constants::{
    BULLET_DAMAGE, BULLET_MAX_DISTANCE, BULLET_OOB_MARGIN, BULLET_RADIUS,
    BULLET_REMOVE_GRACE_TICKS, BULLET_SPEED, MAP_SIZE, MAX_HEALTH, MAX_PENDING_INPUTS,
    MUZZLE_OFFSET, PLAYER_RADIUS, PLAYER_SPEED, RESPAWN_DELAY_TICKS, SHOOT_COOLDOWN_MS,
    SPAWN_MARGIN, TICK_RATE, VISIBILITY_REFRESH_TICKS,
};
use crate::game::interest::InterestManager;
use crate::game::physics::ArenaPhysics;
use crate::game::replication::ClientView;
use crate::game::{InputFrame, JoinError, RoomCmd};
use crate::util::angle::wrap_angle;
use crate::ws::protocol::ServerMsg;

/// Authoritative player state. Mutated only by the room's tick.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: Uuid,
    pub x: f32,
    pub y: f32,
    /// Facing in radians, wrapped into (-PI, PI]
    pub angle: f32,
    pub vx: f32,
    pub vy: f32,
    pub health: i32,
    /// Highest input seq actually simulated for this player
    pub last_seq: u32,
    /// Tick at which a dead player comes back, if any
    pub respawn_at: Option<u64>,
}

impl Player {
    pub fn spawned(id: Uuid, x: f32, y: f32) -> Self {
        Self {
            id,
            x,
            y,
            angle: 0.0,
            vx: 0.0,
            vy: 0.0,
            health: MAX_HEALTH,
            last_seq: 0,
            respawn_at: None,
        }
    }

    pub fn alive(&self) -> bool {
        self.health > 0
    }
}

/// Authoritative bullet state. The replicated position is the spawn point;
/// clients extrapolate from (x, y, angle, speed) and the server tracks the
/// live position only in physics.
#[derive(Debug, Clone)]
pub struct Bullet {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub speed: f32,
}

impl Bullet {
    pub fn new(id: Uuid, owner_id: Uuid, x: f32, y: f32, angle: f32) -> Self {
        Self {
            id,
            owner_id,
            x,
            y,
            angle,
            speed: BULLET_SPEED,
        }
    }
}

/// Per-session bookkeeping owned by the room
struct Session {
    outgoing: mpsc::Sender<ServerMsg>,
    view: ClientView,
    pending: VecDeque<InputFrame>,
    connected: bool,
    grace_deadline: Option<Instant>,
    last_shot: Option<Instant>,
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub name: String,
    pub cmd_tx: mpsc::Sender<RoomCmd>,
    player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }
}

/// Registry of all active rooms, keyed by room name
pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Fetch the room for `name`, spawning its task on first join
    pub fn get_or_spawn(self: &Arc<Self>, name: &str, config: &Config) -> RoomHandle {
        match self.rooms.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (room, handle) = Room::new(
                    name.to_string(),
                    rand::random(),
                    config.max_clients,
                    config.reconnect_grace,
                );
                entry.insert(handle.clone());

                let registry = self.clone();
                let room_name = name.to_string();
                tokio::spawn(async move {
                    room.run().await;
                    registry.rooms.remove(&room_name);
                    info!(room = %room_name, "Room removed from registry");
                });

                handle
            }
        }
    }

    /// Register an externally driven room (embedding drivers and tests)
    pub fn insert(&self, handle: RoomHandle) {
        self.rooms.insert(handle.name.clone(), handle);
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative room: single writer of the physics world, the player and
/// bullet maps, and the interest index.
pub struct Room {
    name: String,
    tick: u64,
    physics: ArenaPhysics,
    players: HashMap<Uuid, Player>,
    bullets: HashMap<Uuid, Bullet>,
    /// (due tick, bullet id) in schedule order: bullets whose physics body is
    /// gone but whose replicated state lingers for the impact display grace
    bullet_retire: VecDeque<(u64, Uuid)>,
    sessions: HashMap<Uuid, Session>,
    interest: InterestManager,
    rng: ChaCha8Rng,
    max_clients: usize,
    reconnect_grace: Duration,
    cmd_rx: mpsc::Receiver<RoomCmd>,
    player_count: Arc<AtomicUsize>,
    poisoned: bool,
}

impl Room {
    pub fn new(
        name: String,
        seed: u64,
        max_clients: usize,
        reconnect_grace: Duration,
    ) -> (Self, RoomHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            name: name.clone(),
            cmd_tx,
            player_count: player_count.clone(),
        };

        let room = Self {
            name,
            tick: 0,
            physics: ArenaPhysics::new(),
            players: HashMap::new(),
            bullets: HashMap::new(),
            bullet_retire: VecDeque::new(),
            sessions: HashMap::new(),
            interest: InterestManager::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            max_clients,
            reconnect_grace,
            cmd_rx,
            player_count,
            poisoned: false,
        };

        (room, handle)
    }

    /// Run the authoritative tick loop until the room empties out or the
    /// physics world faults.
    pub async fn run(mut self) {
        info!(room = %self.name, "Room started");

        let tick_duration = Duration::from_micros(1_000_000 / TICK_RATE as u64);
        let mut tick_interval = tokio::time::interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // A room that never attracts a session still tears itself down.
        let idle_limit = 30 * TICK_RATE as u64;
        let mut idle_ticks = 0u64;
        let mut started = false;

        loop {
            tick_interval.tick().await;

            self.drain_commands();
            self.step_tick();

            if self.poisoned {
                warn!(room = %self.name, "Room poisoned by physics fault, shutting down");
                break;
            }

            if self.sessions.is_empty() {
                if started {
                    info!(room = %self.name, "Last session gone, shutting down");
                    break;
                }
                idle_ticks += 1;
                if idle_ticks >= idle_limit {
                    info!(room = %self.name, "Room never used, shutting down");
                    break;
                }
            } else {
                started = true;
            }

            if self.tick % (5 * TICK_RATE as u64) == 0 {
                debug!(
                    room = %self.name,
                    tick = self.tick,
                    players = self.players.len(),
                    bullets = self.bullets.len(),
                    "Room status"
                );
            }
        }
    }

    /// Apply every queued command. Inputs keep per-session order; everything
    /// runs on the simulation timeline.
    pub fn drain_commands(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            self.handle_cmd(cmd);
        }
    }

    pub fn handle_cmd(&mut self, cmd: RoomCmd) {
        match cmd {
            RoomCmd::Connect {
                session_id,
                outgoing,
                ack,
            } => {
                let result = self.handle_connect(session_id, outgoing);
                let _ = ack.send(result);
            }
            RoomCmd::Input { session_id, frame } => self.handle_input(session_id, frame),
            RoomCmd::Shoot { session_id, angle } => self.handle_shoot(session_id, angle),
            RoomCmd::Disconnect {
                session_id,
                consented,
            } => self.handle_disconnect(session_id, consented),
        }
    }

    fn handle_connect(
        &mut self,
        session_id: Uuid,
        outgoing: mpsc::Sender<ServerMsg>,
    ) -> Result<(), JoinError> {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            // Only a session inside its reconnection grace window may be
            // re-claimed. A live connection keeps its channel; handing it to
            // a second socket would leave two writers racing over one player.
            if session.connected {
                warn!(
                    room = %self.name,
                    session = %session_id,
                    "Join refused, session id belongs to a live connection"
                );
                return Err(JoinError::SessionInUse);
            }
            // Clearing the view makes the next delta re-send everything in
            // full, so the client starts from a coherent snapshot.
            session.outgoing = outgoing;
            session.view.reset();
            session.pending.clear();
            session.connected = true;
            session.grace_deadline = None;
            info!(room = %self.name, session = %session_id, "Session reconnected");
            return Ok(());
        }

        if self.sessions.len() >= self.max_clients {
            warn!(room = %self.name, session = %session_id, "Join refused, room full");
            return Err(JoinError::RoomFull);
        }

        let (x, y) = self.spawn_position();
        self.players.insert(session_id, Player::spawned(session_id, x, y));
        self.physics.add_player(session_id, x, y);
        self.sessions.insert(
            session_id,
            Session {
                outgoing,
                view: ClientView::new(),
                pending: VecDeque::new(),
                connected: true,
                grace_deadline: None,
                last_shot: None,
            },
        );
        self.player_count.store(self.sessions.len(), Ordering::Relaxed);

        info!(
            room = %self.name,
            session = %session_id,
            players = self.sessions.len(),
            "Session joined"
        );
        Ok(())
    }

    fn handle_input(&mut self, session_id: Uuid, frame: InputFrame) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        // Bounded at one second's worth; overflow drops the oldest entries
        // so per-session ordering of what remains is untouched.
        if session.pending.len() >= MAX_PENDING_INPUTS {
            session.pending.pop_front();
        }
        session.pending.push_back(frame);
    }

    fn handle_shoot(&mut self, session_id: Uuid, angle: f32) {
        let Some(player) = self.players.get(&session_id) else {
            return;
        };
        if !player.alive() {
            return;
        }
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };

        let now = Instant::now();
        if let Some(last) = session.last_shot {
            if now.duration_since(last) < Duration::from_millis(SHOOT_COOLDOWN_MS) {
                return;
            }
        }
        session.last_shot = Some(now);

        let angle = wrap_angle(angle);
        let x = player.x + angle.cos() * MUZZLE_OFFSET;
        let y = player.y + angle.sin() * MUZZLE_OFFSET;

        let bullet_id = Uuid::new_v4();
        self.physics.add_bullet(bullet_id, x, y, angle, BULLET_SPEED);
        self.bullets
            .insert(bullet_id, Bullet::new(bullet_id, session_id, x, y, angle));
        // Sub-tick visibility grant: a bullet crosses a whole view distance
        // in about half a second, it cannot wait for the 1 Hz refresh.
        self.interest.grant_bullet(bullet_id, x, y, &self.players);

        debug!(room = %self.name, session = %session_id, bullet = %bullet_id, "Bullet spawned");
    }

    fn handle_disconnect(&mut self, session_id: Uuid, consented: bool) {
        if consented {
            self.destroy_session(session_id);
            return;
        }
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.connected = false;
            session.grace_deadline = Some(Instant::now() + self.reconnect_grace);
            info!(
                room = %self.name,
                session = %session_id,
                grace_secs = self.reconnect_grace.as_secs(),
                "Session lost, holding player for reconnection"
            );
        }
    }

    fn destroy_session(&mut self, session_id: Uuid) {
        if self.sessions.remove(&session_id).is_some() {
            self.players.remove(&session_id);
            self.physics.remove_player(session_id);
            self.interest.remove_session(session_id);
            self.player_count.store(self.sessions.len(), Ordering::Relaxed);
            info!(room = %self.name, session = %session_id, "Session destroyed");
        }
    }

    /// Advance the simulation one tick and flush per-session deltas.
    pub fn step_tick(&mut self) {
        if self.poisoned {
            return;
        }
        self.tick += 1;

        self.reap_expired_graces();
        self.apply_inputs();

        if self.physics.any_player_non_finite() {
            self.poison();
            return;
        }
        self.physics.step();
        if self.physics.any_player_non_finite() {
            self.poison();
            return;
        }

        self.sync_player_state();
        self.process_respawns();
        let kills = self.update_bullets();
        self.retire_due_bullets();

        if self.tick % VISIBILITY_REFRESH_TICKS == 0 {
            self.interest.refresh(&self.players);
        }

        self.flush_deltas();
        self.broadcast_kills(kills);
    }

    fn reap_expired_graces(&mut self) {
        let now = Instant::now();
        let expired: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                !s.connected && s.grace_deadline.map(|d| d <= now).unwrap_or(false)
            })
            .map(|(&id, _)| id)
            .collect();
        for id in expired {
            info!(room = %self.name, session = %id, "Reconnection grace expired");
            self.destroy_session(id);
        }
    }

    fn apply_inputs(&mut self) {
        let session_ids: Vec<Uuid> = self.sessions.keys().copied().collect();
        for id in session_ids {
            let frames: Vec<InputFrame> = self
                .sessions
                .get_mut(&id)
                .map(|s| s.pending.drain(..).collect())
                .unwrap_or_default();
            if frames.is_empty() {
                continue;
            }
            let Some(player) = self.players.get_mut(&id) else {
                continue;
            };

            for frame in frames {
                // Duplicate or stale seq: already simulated, discard.
                if frame.seq <= player.last_seq {
                    continue;
                }
                // Dead players' inputs are discarded without advancing the
                // seq; reconciliation only acknowledges simulated inputs.
                if !player.alive() {
                    continue;
                }

                let (dx, dy) = frame.keys.direction();
                self.physics
                    .set_player_velocity(id, dx * PLAYER_SPEED, dy * PLAYER_SPEED);
                player.angle = wrap_angle(frame.angle);
                player.last_seq = frame.seq;
            }
        }
    }

    fn sync_player_state(&mut self) {
        for (&id, player) in self.players.iter_mut() {
            if let Some((x, y, vx, vy)) = self.physics.player_state(id) {
                player.x = x;
                player.y = y;
                player.vx = vx;
                player.vy = vy;
            }
        }
    }

    fn process_respawns(&mut self) {
        let due: Vec<Uuid> = self
            .players
            .values()
            .filter(|p| p.respawn_at.map(|t| t <= self.tick).unwrap_or(false))
            .map(|p| p.id)
            .collect();
        for id in due {
            let (x, y) = self.spawn_position();
            if let Some(player) = self.players.get_mut(&id) {
                player.health = MAX_HEALTH;
                player.respawn_at = None;
                player.x = x;
                player.y = y;
                player.vx = 0.0;
                player.vy = 0.0;
            }
            self.physics.teleport_player(id, x, y);
            debug!(room = %self.name, session = %id, "Player respawned");
        }
    }

    /// Step bullet lifecycles: max distance, hits, out of bounds. Returns the
    /// (target, killer) pairs whose health crossed to zero this tick.
    fn update_bullets(&mut self) -> Vec<(Uuid, Uuid)> {
        let mut kills = Vec::new();
        let oob = MAP_SIZE / 2.0 + BULLET_OOB_MARGIN;
        let hit_range_sq = {
            let r = PLAYER_RADIUS + BULLET_RADIUS;
            r * r
        };

        for bullet_id in self.physics.live_bullets() {
            let Some(bullet) = self.bullets.get(&bullet_id) else {
                self.physics.remove_bullet(bullet_id);
                continue;
            };
            let Some((px, py)) = self.physics.bullet_position(bullet_id) else {
                continue;
            };

            let travelled_sq =
                (px - bullet.x) * (px - bullet.x) + (py - bullet.y) * (py - bullet.y);
            let mut remove = travelled_sq > BULLET_MAX_DISTANCE * BULLET_MAX_DISTANCE;

            if !remove {
                let owner = bullet.owner_id;
                for (&target_id, target) in self.players.iter_mut() {
                    // A bullet never damages its own shooter; corpses do not
                    // soak bullets either.
                    if target_id == owner || !target.alive() {
                        continue;
                    }
                    let dx = px - target.x;
                    let dy = py - target.y;
                    if dx * dx + dy * dy < hit_range_sq {
                        target.health = (target.health - BULLET_DAMAGE).max(0);
                        if target.health == 0 {
                            target.respawn_at = Some(self.tick + RESPAWN_DELAY_TICKS);
                            kills.push((target_id, owner));
                        }
                        remove = true;
                        break;
                    }
                }
            }

            if !remove && (px.abs() > oob || py.abs() > oob) {
                remove = true;
            }

            if remove {
                self.physics.remove_bullet(bullet_id);
                self.bullet_retire
                    .push_back((self.tick + BULLET_REMOVE_GRACE_TICKS, bullet_id));
            }
        }

        kills
    }

    fn retire_due_bullets(&mut self) {
        while let Some(&(due, id)) = self.bullet_retire.front() {
            if due > self.tick {
                break;
            }
            self.bullet_retire.pop_front();
            self.bullets.remove(&id);
            self.interest.forget_bullet(id);
        }
    }

    fn flush_deltas(&mut self) {
        let session_ids: Vec<Uuid> = self.sessions.keys().copied().collect();
        for id in session_ids {
            let Some(session) = self.sessions.get(&id) else {
                continue;
            };
            if !session.connected {
                continue;
            }
            let last_seq = self.players.get(&id).map(|p| p.last_seq).unwrap_or(0);
            let msg = session.view.diff(
                self.tick,
                id,
                &self.players,
                &self.bullets,
                self.interest.visible_players(id),
                self.interest.granted_bullets(id),
                last_seq,
            );
            let Some(msg) = msg else {
                continue;
            };
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            match session.outgoing.try_send(msg.clone()) {
                Ok(()) => session.view.record(&msg),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Not recorded: next tick's delta carries the missed
                    // changes once the client drains its queue.
                    warn!(room = %self.name, session = %id, "Outbound queue full, delta deferred");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(room = %self.name, session = %id, "Outbound channel closed");
                }
            }
        }
    }

    fn broadcast_kills(&mut self, kills: Vec<(Uuid, Uuid)>) {
        for (target_id, killer_id) in kills {
            info!(room = %self.name, target = %target_id, killer = %killer_id, "Kill");
            for (id, session) in self.sessions.iter() {
                if !session.connected {
                    continue;
                }
                let msg = ServerMsg::Kill {
                    target_id,
                    killer_id,
                };
                if session.outgoing.try_send(msg).is_err() {
                    warn!(room = %self.name, session = %id, "Kill broadcast dropped");
                }
            }
        }
    }

    fn poison(&mut self) {
        self.poisoned = true;
        for session in self.sessions.values() {
            if session.connected {
                let _ = session.outgoing.try_send(ServerMsg::Error {
                    code: "physics_fault".to_string(),
                    message: "simulation entered an unrecoverable state".to_string(),
                });
            }
        }
    }

    fn spawn_position(&mut self) -> (f32, f32) {
        let extent = MAP_SIZE / 2.0 - SPAWN_MARGIN;
        (
            self.rng.gen_range(-extent..=extent),
            self.rng.gen_range(-extent..=extent),
        )
    }

    /// Read-only access to a player, for embedding drivers and tests
    pub fn player(&self, id: Uuid) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn bullet_count(&self) -> usize {
        self.bullets.len()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }
}
