//! Client-side synchronization: prediction, reconciliation, interpolation
//! and bullet extrapolation. No rendering or input capture lives here; a
//! frontend feeds inputs in and reads entity positions out.

pub mod interpolator;
pub mod predictor;
pub mod tracer;
pub mod world;

pub use interpolator::RemoteInterpolator;
pub use predictor::Predictor;
pub use tracer::BulletTracers;
pub use world::ClientWorld;
