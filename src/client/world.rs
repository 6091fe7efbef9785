//! Client-side replica of the server view
//!
//! Consumes the per-client delta stream and keeps the pieces wired together:
//! the merged entity replica, the predictor for the local player, the
//! interpolator for remote players and the bullet tracers. A frontend calls
//! `local_input` every frame it captures input, `handle_message` for every
//! server message, and reads render state from the accessors.

use std::collections::HashMap;
use uuid::Uuid;

use crate::client::interpolator::RemoteInterpolator;
use crate::client::predictor::Predictor;
use crate::client::tracer::BulletTracers;
use crate::ws::protocol::{ClientMsg, KeyState, PlayerDelta, ServerMsg};

/// Merged authoritative state of one replicated player
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaPlayer {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub vx: f32,
    pub vy: f32,
    pub health: i32,
}

impl ReplicaPlayer {
    fn merge(&mut self, delta: &PlayerDelta) {
        if let Some(x) = delta.x {
            self.x = x;
        }
        if let Some(y) = delta.y {
            self.y = y;
        }
        if let Some(angle) = delta.angle {
            self.angle = angle;
        }
        if let Some(vx) = delta.vx {
            self.vx = vx;
        }
        if let Some(vy) = delta.vy {
            self.vy = vy;
        }
        if let Some(health) = delta.health {
            self.health = health;
        }
    }
}

pub struct ClientWorld {
    session_id: Uuid,
    players: HashMap<Uuid, ReplicaPlayer>,
    predictor: Option<Predictor>,
    interpolator: RemoteInterpolator,
    tracers: BulletTracers,
    kill_feed: Vec<(Uuid, Uuid)>,
    server_tick: u64,
}

impl ClientWorld {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            players: HashMap::new(),
            predictor: None,
            interpolator: RemoteInterpolator::new(),
            tracers: BulletTracers::new(),
            kill_feed: Vec::new(),
            server_tick: 0,
        }
    }

    /// Apply one server message. `now_ms` is the local receipt time driving
    /// interpolation and bullet extrapolation.
    pub fn handle_message(&mut self, msg: &ServerMsg, now_ms: u64) {
        match msg {
            ServerMsg::Delta {
                tick,
                players,
                bullets,
                removed_players,
                removed_bullets,
                last_seq,
            } => {
                self.server_tick = *tick;

                let mut self_touched = false;
                for delta in players {
                    let replica = self.players.entry(delta.id).or_default();
                    replica.merge(delta);

                    if delta.id == self.session_id {
                        self_touched = true;
                    } else {
                        self.interpolator.push(
                            delta.id,
                            replica.x,
                            replica.y,
                            replica.angle,
                            now_ms,
                        );
                    }
                }

                for &id in removed_players {
                    self.players.remove(&id);
                    self.interpolator.forget(id);
                }

                for spawn in bullets {
                    self.tracers.spawn(spawn, now_ms);
                }
                for &id in removed_bullets {
                    self.tracers.remove(id);
                }

                self.reconcile_self(self_touched, *last_seq);
            }
            ServerMsg::Kill {
                target_id,
                killer_id,
            } => {
                self.kill_feed.push((*target_id, *killer_id));
            }
            // Joined is handled at connection setup; Pong feeds the latency
            // display; errors end the session upstream.
            ServerMsg::Joined { .. } | ServerMsg::Pong { .. } | ServerMsg::Error { .. } => {}
        }
    }

    fn reconcile_self(&mut self, self_touched: bool, last_seq: Option<u32>) {
        let Some(replica) = self.players.get(&self.session_id).copied() else {
            return;
        };

        match self.predictor.as_mut() {
            None => {
                // First sight of our own player: the mirror world starts at
                // the authoritative spawn.
                self.predictor = Some(Predictor::new(replica.x, replica.y));
            }
            Some(predictor) => {
                if self_touched || last_seq.is_some() {
                    let acked = last_seq.unwrap_or_else(|| predictor.last_acked_seq());
                    predictor.reconcile(replica.x, replica.y, acked);
                }
            }
        }
    }

    /// Apply local input: instant prediction plus the message to send.
    /// Returns `None` until the server has replicated our own player.
    pub fn local_input(&mut self, keys: KeyState, angle: f32) -> Option<ClientMsg> {
        let predictor = self.predictor.as_mut()?;
        let frame = predictor.apply_input(keys, angle);
        Some(ClientMsg::Input {
            seq: frame.seq,
            keys: frame.keys,
            angle: frame.angle,
        })
    }

    /// Predicted local player position for this frame
    pub fn predicted_position(&self) -> Option<(f32, f32)> {
        self.predictor.as_ref().map(|p| p.position())
    }

    /// Interpolated remote players at render time: (id, x, y, angle)
    pub fn remote_players(&self, now_ms: u64) -> Vec<(Uuid, f32, f32, f32)> {
        self.players
            .keys()
            .filter(|&&id| id != self.session_id)
            .filter_map(|&id| {
                self.interpolator
                    .sample(id, now_ms)
                    .map(|(x, y, angle)| (id, x, y, angle))
            })
            .collect()
    }

    /// Extrapolated bullet positions at `now_ms`
    pub fn bullet_positions(&self, now_ms: u64) -> Vec<(Uuid, f32, f32)> {
        self.tracers.positions(now_ms)
    }

    /// Advisory hit feedback against the locally rendered players
    pub fn poll_hit_feedback(&mut self, now_ms: u64) -> Vec<crate::client::tracer::FeedbackHit> {
        let mut targets: Vec<(Uuid, f32, f32)> = self
            .remote_players(now_ms)
            .into_iter()
            .map(|(id, x, y, _)| (id, x, y))
            .collect();
        if let Some((x, y)) = self.predicted_position() {
            targets.push((self.session_id, x, y));
        }
        self.tracers.poll_feedback(now_ms, &targets)
    }

    /// Authoritative replica of a player (health display and the like)
    pub fn replica(&self, id: Uuid) -> Option<&ReplicaPlayer> {
        self.players.get(&id)
    }

    /// Kills observed so far, oldest first
    pub fn kill_feed(&self) -> &[(Uuid, Uuid)] {
        &self.kill_feed
    }

    pub fn server_tick(&self) -> u64 {
        self.server_tick
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}
