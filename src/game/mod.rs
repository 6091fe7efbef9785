//! Authoritative game simulation modules

pub mod interest;
pub mod physics;
pub mod replication;
pub mod room;

pub use room::{Room, RoomHandle, RoomRegistry};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::ws::protocol::{KeyState, ServerMsg};

/// One movement input as queued for the simulation
#[derive(Debug, Clone, Copy)]
pub struct InputFrame {
    pub seq: u32,
    pub keys: KeyState,
    pub angle: f32,
}

/// Commands from session tasks to a room. Inputs and shots are applied at the
/// next tick boundary; ordering within one session is the channel order.
#[derive(Debug)]
pub enum RoomCmd {
    /// Attach a session (fresh join or grace-window reconnect)
    Connect {
        session_id: Uuid,
        outgoing: mpsc::Sender<ServerMsg>,
        ack: oneshot::Sender<Result<(), JoinError>>,
    },
    Input {
        session_id: Uuid,
        frame: InputFrame,
    },
    Shoot {
        session_id: Uuid,
        angle: f32,
    },
    /// Transport gone. Consented closes destroy the player immediately,
    /// anything else starts the reconnection grace window.
    Disconnect {
        session_id: Uuid,
        consented: bool,
    },
}

/// Join refusals surfaced to the session layer
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("room is full")]
    RoomFull,

    /// The presented session id belongs to a live connection; only ids
    /// inside their reconnection grace window may re-attach.
    #[error("session id is attached to a live connection")]
    SessionInUse,
}

impl JoinError {
    /// Stable error code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            JoinError::RoomFull => "room_full",
            JoinError::SessionInUse => "session_in_use",
        }
    }
}
