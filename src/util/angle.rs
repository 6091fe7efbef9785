//! Angle math shared by the simulation and the client interpolator

use std::f32::consts::{PI, TAU};

/// Wrap an angle into (-PI, PI]
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI {
        wrapped - TAU
    } else {
        wrapped
    }
}

/// Interpolate between two angles along the shortest arc
pub fn lerp_angle(from: f32, to: f32, alpha: f32) -> f32 {
    let diff = wrap_angle(to - from);
    wrap_angle(from + diff * alpha)
}
