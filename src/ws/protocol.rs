//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Held movement keys for one input frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyState {
    pub w: bool,
    pub a: bool,
    pub s: bool,
    pub d: bool,
}

impl KeyState {
    /// Unit direction vector for these keys, diagonals normalized to length 1.
    /// Screen coordinates: `w` is -y, `s` is +y.
    pub fn direction(&self) -> (f32, f32) {
        let dx = (self.d as i32 - self.a as i32) as f32;
        let dy = (self.s as i32 - self.w as i32) as f32;
        let len = (dx * dx + dy * dy).sqrt();
        if len > 0.0 {
            (dx / len, dy / len)
        } else {
            (0.0, 0.0)
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// First frame after the upgrade: pick a room, optionally re-claim a
    /// session id that is still inside its reconnection grace window
    Join {
        room: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<Uuid>,
    },

    /// Movement input for one client frame
    Input {
        /// Strictly increasing per-session sequence number
        seq: u32,
        keys: KeyState,
        /// Facing angle in radians
        angle: f32,
    },

    /// Fire a bullet along `angle` (subject to the server-side cooldown)
    Shoot { angle: f32 },

    /// Latency probe, echoed back immediately
    Ping { t: u64 },

    /// Consented leave; the player is destroyed without a grace window
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Join accepted; all further traffic refers to this session id
    Joined { session_id: Uuid, server_time: u64 },

    /// Per-client state delta: full entities on first appearance, changed
    /// fields only afterwards, remove markers on departure
    Delta {
        tick: u64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        players: Vec<PlayerDelta>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        bullets: Vec<BulletSpawn>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        removed_players: Vec<Uuid>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        removed_bullets: Vec<Uuid>,
        /// Highest input seq simulated for the receiving session, present
        /// whenever it changed since the last delta
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seq: Option<u32>,
    },

    /// Broadcast to every session regardless of visibility
    Kill { target_id: Uuid, killer_id: Uuid },

    /// Reply to `Ping`
    Pong { t: u64 },

    /// Error message
    Error { code: String, message: String },
}

/// Per-field player delta. Absent fields are unchanged; an entity entering a
/// view has every field present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerDelta {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vx: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vy: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<i32>,
}

impl PlayerDelta {
    /// Delta carrying only the entity id (no changed fields)
    pub fn empty(id: Uuid) -> Self {
        Self {
            id,
            x: None,
            y: None,
            angle: None,
            vx: None,
            vy: None,
            health: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none()
            && self.y.is_none()
            && self.angle.is_none()
            && self.vx.is_none()
            && self.vy.is_none()
            && self.health.is_none()
    }
}

/// Bullet trajectory descriptor. Replicated once at spawn; clients
/// extrapolate the position from these parameters until the remove marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulletSpawn {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Spawn position, never overwritten with the live position
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub speed: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn key_direction_cardinal() {
        let keys = KeyState {
            w: true,
            ..Default::default()
        };
        assert_eq!(keys.direction(), (0.0, -1.0));
    }

    #[test]
    fn key_direction_diagonal_is_unit_length() {
        let keys = KeyState {
            w: true,
            d: true,
            ..Default::default()
        };
        let (dx, dy) = keys.direction();
        assert_approx_eq!((dx * dx + dy * dy).sqrt(), 1.0, 1e-6);
        assert!(dx > 0.0 && dy < 0.0);
    }

    #[test]
    fn key_direction_opposed_keys_cancel() {
        let keys = KeyState {
            a: true,
            d: true,
            ..Default::default()
        };
        assert_eq!(keys.direction(), (0.0, 0.0));
    }

    #[test]
    fn delta_skips_unchanged_fields_on_the_wire() {
        let mut delta = PlayerDelta::empty(Uuid::new_v4());
        delta.x = Some(10.0);
        let json = serde_json::to_string(&delta).unwrap();
        assert!(json.contains("\"x\""));
        assert!(!json.contains("\"y\""));
        assert!(!json.contains("health"));
    }

    #[test]
    fn client_msg_round_trip() {
        let msg = ClientMsg::Input {
            seq: 7,
            keys: KeyState {
                w: true,
                a: false,
                s: false,
                d: true,
            },
            angle: 1.25,
        };
        let json = serde_json::to_string(&msg).unwrap();
        match serde_json::from_str(&json).unwrap() {
            ClientMsg::Input { seq, keys, angle } => {
                assert_eq!(seq, 7);
                assert!(keys.w && keys.d);
                assert_approx_eq!(angle, 1.25);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
