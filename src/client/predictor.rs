//! Client-side prediction with server reconciliation
//!
//! The predictor owns a private mirror of the server's player physics: one
//! disk with the shared radius and damping inside the shared arena walls, and
//! nothing else. Peer collisions are deliberately not mirrored; the resulting
//! divergence is corrected by the next reconciliation.

use std::collections::VecDeque;
use uuid::Uuid;

use crate::constants::{INPUT_HISTORY_LIMIT, PLAYER_SPEED};
use crate::game::physics::ArenaPhysics;
use crate::game::InputFrame;
use crate::ws::protocol::KeyState;

/// An input applied locally but not yet acknowledged by the server
#[derive(Debug, Clone, Copy)]
struct PendingInput {
    seq: u32,
    keys: KeyState,
}

pub struct Predictor {
    physics: ArenaPhysics,
    body_id: Uuid,
    history: VecDeque<PendingInput>,
    next_seq: u32,
    last_acked: u32,
}

impl Predictor {
    /// Build the mirror world with the local player at the server-assigned
    /// spawn position.
    pub fn new(spawn_x: f32, spawn_y: f32) -> Self {
        let body_id = Uuid::new_v4();
        let mut physics = ArenaPhysics::new();
        physics.add_player(body_id, spawn_x, spawn_y);
        Self {
            physics,
            body_id,
            history: VecDeque::new(),
            next_seq: 0,
            last_acked: 0,
        }
    }

    /// Apply one frame of local input immediately and return the frame to
    /// send to the server.
    pub fn apply_input(&mut self, keys: KeyState, angle: f32) -> InputFrame {
        self.next_seq += 1;
        let seq = self.next_seq;

        // Anything this old must already be acknowledged or the connection
        // is effectively dead; keep the history bounded either way.
        if self.history.len() >= INPUT_HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(PendingInput { seq, keys });

        self.step_with(keys);

        InputFrame { seq, keys, angle }
    }

    /// Snap to the authoritative state and re-simulate every input the
    /// server has not processed yet.
    pub fn reconcile(&mut self, server_x: f32, server_y: f32, last_processed_seq: u32) {
        self.physics.teleport_player(self.body_id, server_x, server_y);

        while let Some(front) = self.history.front() {
            if front.seq <= last_processed_seq {
                self.history.pop_front();
            } else {
                break;
            }
        }
        self.last_acked = self.last_acked.max(last_processed_seq);

        let pending: Vec<PendingInput> = self.history.iter().copied().collect();
        for input in pending {
            self.step_with(input.keys);
        }
    }

    fn step_with(&mut self, keys: KeyState) {
        let (dx, dy) = keys.direction();
        self.physics
            .set_player_velocity(self.body_id, dx * PLAYER_SPEED, dy * PLAYER_SPEED);
        self.physics.step();
    }

    /// Current predicted position for rendering
    pub fn position(&self) -> (f32, f32) {
        self.physics
            .player_state(self.body_id)
            .map(|(x, y, _, _)| (x, y))
            .unwrap_or((0.0, 0.0))
    }

    pub fn pending_inputs(&self) -> usize {
        self.history.len()
    }

    pub fn last_acked_seq(&self) -> u32 {
        self.last_acked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TICK_DT;

    fn keys_w() -> KeyState {
        KeyState {
            w: true,
            ..Default::default()
        }
    }

    #[test]
    fn input_moves_the_prediction_immediately() {
        let mut predictor = Predictor::new(0.0, 0.0);
        let frame = predictor.apply_input(keys_w(), 0.0);
        assert_eq!(frame.seq, 1);

        let (x, y) = predictor.position();
        assert_approx_eq::assert_approx_eq!(x, 0.0, 1e-4);
        assert!(y < 0.0, "w must move toward negative y, got {}", y);
        assert!(y >= -(PLAYER_SPEED * TICK_DT) - 1e-3);
    }

    #[test]
    fn full_ack_clears_history_and_keeps_position() {
        let mut predictor = Predictor::new(10.0, 10.0);
        for _ in 0..5 {
            predictor.apply_input(keys_w(), 0.0);
        }
        let (px, py) = predictor.position();

        // Server confirms everything at exactly the predicted spot.
        predictor.reconcile(px, py, 5);
        assert_eq!(predictor.pending_inputs(), 0);
        let (x, y) = predictor.position();
        assert_approx_eq::assert_approx_eq!(x, px, 1e-4);
        assert_approx_eq::assert_approx_eq!(y, py, 1e-4);
    }

    #[test]
    fn partial_ack_replays_only_unacknowledged_inputs() {
        let mut reference = Predictor::new(0.0, 0.0);
        for _ in 0..10 {
            reference.apply_input(keys_w(), 0.0);
        }

        // Second predictor, identical inputs, reconciled against the
        // reference's state after 6 inputs: replaying 7..10 must land on the
        // reference position.
        let mut probe = Predictor::new(0.0, 0.0);
        let mut after_six = (0.0, 0.0);
        let mut checkpoint = Predictor::new(0.0, 0.0);
        for i in 0..10 {
            probe.apply_input(keys_w(), 0.0);
            checkpoint.apply_input(keys_w(), 0.0);
            if i == 5 {
                after_six = checkpoint.position();
            }
        }
        probe.reconcile(after_six.0, after_six.1, 6);

        let (rx, ry) = reference.position();
        let (px, py) = probe.position();
        assert_approx_eq::assert_approx_eq!(px, rx, 1e-3);
        assert_approx_eq::assert_approx_eq!(py, ry, 1e-3);
        assert_eq!(probe.pending_inputs(), 4);
    }

    #[test]
    fn history_stays_bounded() {
        let mut predictor = Predictor::new(0.0, 0.0);
        for _ in 0..(INPUT_HISTORY_LIMIT + 40) {
            predictor.apply_input(KeyState::default(), 0.0);
        }
        assert_eq!(predictor.pending_inputs(), INPUT_HISTORY_LIMIT);
    }
}
