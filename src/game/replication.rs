//! Per-client replication views and delta building

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::game::room::{Bullet, Player};
use crate::ws::protocol::{BulletSpawn, PlayerDelta, ServerMsg};

/// What one client last saw of a player
#[derive(Debug, Clone, PartialEq)]
struct PlayerRecord {
    x: f32,
    y: f32,
    angle: f32,
    vx: f32,
    vy: f32,
    health: i32,
}

/// The per-session filtered view over shared game state.
///
/// `diff` is pure: it computes the delta against what this client is known to
/// have received. The caller commits with `record` only after the message was
/// actually enqueued, so a dropped send self-heals on the next tick instead
/// of silently losing one-shot changes.
#[derive(Debug, Default)]
pub struct ClientView {
    known_players: HashMap<Uuid, PlayerRecord>,
    known_bullets: HashSet<Uuid>,
    acked_seq: Option<u32>,
}

impl ClientView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything sent so far; the next delta re-transmits the whole
    /// view in full. Used when a session reconnects.
    pub fn reset(&mut self) {
        self.known_players.clear();
        self.known_bullets.clear();
        self.acked_seq = None;
    }

    /// Build this tick's delta, or `None` when nothing changed.
    ///
    /// Entities replicated are exactly: visible peers that still exist, the
    /// session's own player, and bullets granted at spawn time that are still
    /// in replicated state.
    #[allow(clippy::too_many_arguments)]
    pub fn diff(
        &self,
        tick: u64,
        self_id: Uuid,
        players: &HashMap<Uuid, Player>,
        bullets: &HashMap<Uuid, Bullet>,
        visible: &HashSet<Uuid>,
        granted: &HashSet<Uuid>,
        last_seq: u32,
    ) -> Option<ServerMsg> {
        let mut player_deltas = Vec::new();

        let mut desired: HashSet<Uuid> = visible
            .iter()
            .copied()
            .filter(|id| players.contains_key(id))
            .collect();
        if players.contains_key(&self_id) {
            desired.insert(self_id);
        }

        for &id in &desired {
            let player = &players[&id];
            match self.known_players.get(&id) {
                None => player_deltas.push(full_delta(player)),
                Some(record) => {
                    let delta = field_delta(record, player);
                    if !delta.is_empty() {
                        player_deltas.push(delta);
                    }
                }
            }
        }

        let removed_players: Vec<Uuid> = self
            .known_players
            .keys()
            .filter(|id| !desired.contains(id))
            .copied()
            .collect();

        let desired_bullets: HashSet<Uuid> = granted
            .iter()
            .copied()
            .filter(|id| bullets.contains_key(id))
            .collect();

        let bullet_spawns: Vec<BulletSpawn> = desired_bullets
            .iter()
            .filter(|id| !self.known_bullets.contains(id))
            .map(|id| {
                let b = &bullets[id];
                BulletSpawn {
                    id: b.id,
                    owner_id: b.owner_id,
                    x: b.x,
                    y: b.y,
                    angle: b.angle,
                    speed: b.speed,
                }
            })
            .collect();

        let removed_bullets: Vec<Uuid> = self
            .known_bullets
            .iter()
            .filter(|id| !desired_bullets.contains(id))
            .copied()
            .collect();

        let seq_changed = self.acked_seq != Some(last_seq);

        if player_deltas.is_empty()
            && bullet_spawns.is_empty()
            && removed_players.is_empty()
            && removed_bullets.is_empty()
            && !seq_changed
        {
            return None;
        }

        Some(ServerMsg::Delta {
            tick,
            players: player_deltas,
            bullets: bullet_spawns,
            removed_players,
            removed_bullets,
            last_seq: seq_changed.then_some(last_seq),
        })
    }

    /// Commit a delta as delivered, folding it into the known state.
    pub fn record(&mut self, msg: &ServerMsg) {
        let ServerMsg::Delta {
            players,
            bullets,
            removed_players,
            removed_bullets,
            last_seq,
            ..
        } = msg
        else {
            return;
        };

        for delta in players {
            let record = self
                .known_players
                .entry(delta.id)
                .or_insert_with(|| PlayerRecord {
                    x: 0.0,
                    y: 0.0,
                    angle: 0.0,
                    vx: 0.0,
                    vy: 0.0,
                    health: 0,
                });
            if let Some(x) = delta.x {
                record.x = x;
            }
            if let Some(y) = delta.y {
                record.y = y;
            }
            if let Some(angle) = delta.angle {
                record.angle = angle;
            }
            if let Some(vx) = delta.vx {
                record.vx = vx;
            }
            if let Some(vy) = delta.vy {
                record.vy = vy;
            }
            if let Some(health) = delta.health {
                record.health = health;
            }
        }
        for id in removed_players {
            self.known_players.remove(id);
        }
        for spawn in bullets {
            self.known_bullets.insert(spawn.id);
        }
        for id in removed_bullets {
            self.known_bullets.remove(id);
        }
        if let Some(seq) = last_seq {
            self.acked_seq = Some(*seq);
        }
    }
}

fn full_delta(player: &Player) -> PlayerDelta {
    PlayerDelta {
        id: player.id,
        x: Some(player.x),
        y: Some(player.y),
        angle: Some(player.angle),
        vx: Some(player.vx),
        vy: Some(player.vy),
        health: Some(player.health),
    }
}

fn field_delta(record: &PlayerRecord, player: &Player) -> PlayerDelta {
    let mut delta = PlayerDelta::empty(player.id);
    if record.x != player.x {
        delta.x = Some(player.x);
    }
    if record.y != player.y {
        delta.y = Some(player.y);
    }
    if record.angle != player.angle {
        delta.angle = Some(player.angle);
    }
    if record.vx != player.vx {
        delta.vx = Some(player.vx);
    }
    if record.vy != player.vy {
        delta.vy = Some(player.vy);
    }
    if record.health != player.health {
        delta.health = Some(player.health);
    }
    delta
}
