//! Client-side bullet extrapolation and advisory hit feedback
//!
//! The server ships only a trajectory descriptor per bullet; between the add
//! and remove markers the client extrapolates the position from local receipt
//! time. Hit feedback here is presentation-only (a flash, a sound) and never
//! touches replicated health; each bullet fires it at most once.

use std::collections::HashMap;
use uuid::Uuid;

use crate::constants::{BULLET_RADIUS, PLAYER_RADIUS};
use crate::ws::protocol::BulletSpawn;

#[derive(Debug, Clone)]
struct Tracer {
    owner_id: Uuid,
    x0: f32,
    y0: f32,
    angle: f32,
    speed: f32,
    received_ms: u64,
    feedback_fired: bool,
}

/// Presentation feedback for one apparent bullet impact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackHit {
    pub bullet_id: Uuid,
    pub target_id: Uuid,
}

#[derive(Debug, Default)]
pub struct BulletTracers {
    tracers: HashMap<Uuid, Tracer>,
}

impl BulletTracers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, spawn: &BulletSpawn, now_ms: u64) {
        self.tracers.insert(
            spawn.id,
            Tracer {
                owner_id: spawn.owner_id,
                x0: spawn.x,
                y0: spawn.y,
                angle: spawn.angle,
                speed: spawn.speed,
                received_ms: now_ms,
                feedback_fired: false,
            },
        );
    }

    pub fn remove(&mut self, id: Uuid) {
        self.tracers.remove(&id);
    }

    /// Extrapolated position of one bullet
    pub fn position(&self, id: Uuid, now_ms: u64) -> Option<(f32, f32)> {
        self.tracers.get(&id).map(|t| t.position(now_ms))
    }

    /// Extrapolated positions of every live tracer, for rendering
    pub fn positions(&self, now_ms: u64) -> Vec<(Uuid, f32, f32)> {
        self.tracers
            .iter()
            .map(|(&id, t)| {
                let (x, y) = t.position(now_ms);
                (id, x, y)
            })
            .collect()
    }

    /// Approximate hit detection against locally rendered players, for
    /// audio/flash feedback only. Bullets never react to their owner, and
    /// each bullet reports at most one hit ever.
    pub fn poll_feedback(
        &mut self,
        now_ms: u64,
        targets: &[(Uuid, f32, f32)],
    ) -> Vec<FeedbackHit> {
        let hit_range_sq = {
            let r = PLAYER_RADIUS + BULLET_RADIUS;
            r * r
        };
        let mut hits = Vec::new();

        for (&bullet_id, tracer) in self.tracers.iter_mut() {
            if tracer.feedback_fired {
                continue;
            }
            let (bx, by) = tracer.position(now_ms);
            for &(target_id, tx, ty) in targets {
                if target_id == tracer.owner_id {
                    continue;
                }
                let dx = bx - tx;
                let dy = by - ty;
                if dx * dx + dy * dy < hit_range_sq {
                    tracer.feedback_fired = true;
                    hits.push(FeedbackHit {
                        bullet_id,
                        target_id,
                    });
                    break;
                }
            }
        }

        hits
    }

    pub fn len(&self) -> usize {
        self.tracers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracers.is_empty()
    }
}

impl Tracer {
    fn position(&self, now_ms: u64) -> (f32, f32) {
        let dt = now_ms.saturating_sub(self.received_ms) as f32 / 1000.0;
        (
            self.x0 + self.angle.cos() * self.speed * dt,
            self.y0 + self.angle.sin() * self.speed * dt,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn spawn(owner: Uuid, angle: f32) -> BulletSpawn {
        BulletSpawn {
            id: Uuid::new_v4(),
            owner_id: owner,
            x: 0.0,
            y: 0.0,
            angle,
            speed: 1200.0,
        }
    }

    #[test]
    fn position_extrapolates_from_receipt_time() {
        let mut tracers = BulletTracers::new();
        let s = spawn(Uuid::new_v4(), 0.0);
        tracers.spawn(&s, 1000);

        let (x, y) = tracers.position(s.id, 1100).unwrap();
        assert_approx_eq!(x, 120.0, 1e-3);
        assert_approx_eq!(y, 0.0, 1e-3);
    }

    #[test]
    fn feedback_fires_once_and_never_for_the_owner() {
        let owner = Uuid::new_v4();
        let victim = Uuid::new_v4();
        let mut tracers = BulletTracers::new();
        let s = spawn(owner, 0.0);
        tracers.spawn(&s, 1000);

        // Owner standing on the trajectory is ignored.
        let hits = tracers.poll_feedback(1100, &[(owner, 120.0, 0.0)]);
        assert!(hits.is_empty());

        let hits = tracers.poll_feedback(1100, &[(victim, 120.0, 0.0)]);
        assert_eq!(
            hits,
            vec![FeedbackHit {
                bullet_id: s.id,
                target_id: victim
            }]
        );

        // Still overlapping on the next frame: no second report.
        let hits = tracers.poll_feedback(1110, &[(victim, 132.0, 0.0)]);
        assert!(hits.is_empty());
    }

    #[test]
    fn removed_bullets_stop_rendering() {
        let mut tracers = BulletTracers::new();
        let s = spawn(Uuid::new_v4(), 0.0);
        tracers.spawn(&s, 1000);
        tracers.remove(s.id);
        assert!(tracers.position(s.id, 1001).is_none());
        assert!(tracers.is_empty());
    }
}
