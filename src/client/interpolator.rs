//! Dead-reckoned remote-entity interpolation
//!
//! Remote players render at a fixed delay behind the newest data so there is
//! almost always a snapshot pair bracketing the render time. Only remote
//! entities are delayed; the local player comes from the predictor.

use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use crate::constants::{INTERPOLATION_DELAY_MS, SNAPSHOT_KEEP_MS};
use crate::util::angle::lerp_angle;

#[derive(Debug, Clone, Copy)]
struct SnapshotPoint {
    t: u64,
    x: f32,
    y: f32,
    angle: f32,
}

/// Per-entity timestamped snapshot buffers
#[derive(Debug, Default)]
pub struct RemoteInterpolator {
    buffers: HashMap<Uuid, VecDeque<SnapshotPoint>>,
}

impl RemoteInterpolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a snapshot for `id` received at `now_ms` (local clock)
    pub fn push(&mut self, id: Uuid, x: f32, y: f32, angle: f32, now_ms: u64) {
        let buffer = self.buffers.entry(id).or_default();
        buffer.push_back(SnapshotPoint {
            t: now_ms,
            x,
            y,
            angle,
        });

        let cutoff = now_ms.saturating_sub(SNAPSHOT_KEEP_MS);
        while buffer.front().map(|s| s.t < cutoff).unwrap_or(false) {
            // Keep at least a pair so a stalled entity still renders.
            if buffer.len() <= 2 {
                break;
            }
            buffer.pop_front();
        }
    }

    /// Position and angle of `id` at render time (`now_ms` minus the
    /// interpolation delay). Holds the newest snapshot rather than
    /// extrapolating past it.
    pub fn sample(&self, id: Uuid, now_ms: u64) -> Option<(f32, f32, f32)> {
        let buffer = self.buffers.get(&id)?;
        let newest = buffer.back()?;
        let render_time = now_ms.saturating_sub(INTERPOLATION_DELAY_MS);

        if render_time >= newest.t {
            return Some((newest.x, newest.y, newest.angle));
        }

        let mut before = None;
        let mut after = None;
        for snapshot in buffer {
            if snapshot.t <= render_time {
                before = Some(snapshot);
            } else {
                after = Some(snapshot);
                break;
            }
        }

        match (before, after) {
            (Some(a), Some(b)) => {
                let span = (b.t - a.t) as f32;
                let alpha = if span > 0.0 {
                    (render_time - a.t) as f32 / span
                } else {
                    0.0
                };
                Some((
                    a.x + (b.x - a.x) * alpha,
                    a.y + (b.y - a.y) * alpha,
                    lerp_angle(a.angle, b.angle, alpha),
                ))
            }
            // Render time is before everything we have: hold the oldest.
            (None, Some(b)) => Some((b.x, b.y, b.angle)),
            (Some(a), None) => Some((a.x, a.y, a.angle)),
            (None, None) => None,
        }
    }

    /// Drop the buffer of an entity that left the view
    pub fn forget(&mut self, id: Uuid) {
        self.buffers.remove(&id);
    }

    pub fn tracked_entities(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f32::consts::PI;

    #[test]
    fn single_snapshot_renders_as_is() {
        let mut interp = RemoteInterpolator::new();
        let id = Uuid::new_v4();
        interp.push(id, 10.0, 20.0, 0.5, 1000);

        let (x, y, angle) = interp.sample(id, 1050).unwrap();
        assert_approx_eq!(x, 10.0);
        assert_approx_eq!(y, 20.0);
        assert_approx_eq!(angle, 0.5);
    }

    #[test]
    fn interpolates_between_bracketing_snapshots() {
        let mut interp = RemoteInterpolator::new();
        let id = Uuid::new_v4();
        interp.push(id, 0.0, 0.0, 0.0, 1000);
        interp.push(id, 100.0, 50.0, 1.0, 1100);

        // now = 1150 -> render_time = 1050, halfway between the pair.
        let (x, y, angle) = interp.sample(id, 1150).unwrap();
        assert_approx_eq!(x, 50.0, 1e-3);
        assert_approx_eq!(y, 25.0, 1e-3);
        assert_approx_eq!(angle, 0.5, 1e-3);
    }

    #[test]
    fn holds_newest_instead_of_extrapolating() {
        let mut interp = RemoteInterpolator::new();
        let id = Uuid::new_v4();
        interp.push(id, 0.0, 0.0, 0.0, 1000);
        interp.push(id, 100.0, 0.0, 0.0, 1100);

        // Render time far past the newest snapshot.
        let (x, _, _) = interp.sample(id, 5000).unwrap();
        assert_approx_eq!(x, 100.0);
    }

    #[test]
    fn angle_crosses_the_wrap_seam_the_short_way() {
        let mut interp = RemoteInterpolator::new();
        let id = Uuid::new_v4();
        interp.push(id, 0.0, 0.0, PI - 0.1, 1000);
        interp.push(id, 0.0, 0.0, -PI + 0.1, 1100);

        let (_, _, angle) = interp.sample(id, 1150).unwrap();
        assert!(angle.abs() > PI - 0.11, "angle = {}", angle);
    }

    #[test]
    fn constant_velocity_tracks_the_true_position() {
        // Steady state law: for x(t) = v * (t - t0) the sampled position
        // equals the true position at render time.
        let mut interp = RemoteInterpolator::new();
        let id = Uuid::new_v4();
        let v = 0.2; // units per ms
        for i in 0..10u64 {
            let t = 1000 + i * 50;
            interp.push(id, v * (t - 1000) as f32, 0.0, 0.0, t);
        }

        let now = 1400;
        let render_time = now - INTERPOLATION_DELAY_MS;
        let (x, _, _) = interp.sample(id, now).unwrap();
        assert_approx_eq!(x, v * (render_time - 1000) as f32, 1e-3);
    }

    #[test]
    fn old_snapshots_are_pruned() {
        let mut interp = RemoteInterpolator::new();
        let id = Uuid::new_v4();
        for i in 0..100u64 {
            interp.push(id, i as f32, 0.0, 0.0, 1000 + i * 50);
        }
        let buffer = interp.buffers.get(&id).unwrap();
        assert!(buffer.len() < 30);
        // Everything kept is within the retention window of the newest push.
        let newest = 1000 + 99 * 50;
        assert!(buffer.front().unwrap().t >= newest - SNAPSHOT_KEEP_MS);
    }
}
