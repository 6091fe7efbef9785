//! Tuning constants shared by the server simulation and the client predictor.
//!
//! Client and server must agree on every value here or prediction drifts on
//! every tick, so there is exactly one definition.

/// Side length of the square arena, centered on the origin.
pub const MAP_SIZE: f32 = 2000.0;

/// Player collision disk radius.
pub const PLAYER_RADIUS: f32 = 25.0;

/// Bullet collision disk radius.
pub const BULLET_RADIUS: f32 = 5.0;

/// Player movement speed in world units per second.
pub const PLAYER_SPEED: f32 = 200.0;

/// Bullet muzzle speed in world units per second.
pub const BULLET_SPEED: f32 = 1200.0;

/// Damage applied per bullet hit.
pub const BULLET_DAMAGE: i32 = 20;

/// Maximum (and spawn) player health.
pub const MAX_HEALTH: i32 = 500;

/// Authoritative simulation rate.
pub const TICK_RATE: u32 = 60;

/// Fixed physics timestep in seconds.
pub const TICK_DT: f32 = 1.0 / TICK_RATE as f32;

/// Linear damping on player bodies; high enough that a zero-velocity command
/// reads as an immediate stop.
pub const PLAYER_DAMPING: f32 = 10.0;

/// Minimum interval between two shots from the same player.
pub const SHOOT_COOLDOWN_MS: u64 = 200;

/// Interest radius: entities farther than this are not replicated.
pub const VIEW_DISTANCE: f32 = 600.0;

/// Visibility sets are recomputed once per this many ticks (1 Hz).
pub const VISIBILITY_REFRESH_TICKS: u64 = TICK_RATE as u64;

/// Render-time delay applied to remote entities on the client.
pub const INTERPOLATION_DELAY_MS: u64 = 100;

/// A bullet is removed from physics once it has travelled this far.
pub const BULLET_MAX_DISTANCE: f32 = 1000.0;

/// Ticks a removed bullet stays in replicated state so clients can render the
/// impact (200 ms).
pub const BULLET_REMOVE_GRACE_TICKS: u64 = TICK_RATE as u64 / 5;

/// Bullets spawn offset from the shooter's center along the aim direction.
pub const MUZZLE_OFFSET: f32 = PLAYER_RADIUS + BULLET_RADIUS + 5.0;

/// Spawn positions satisfy |x|, |y| <= MAP_SIZE / 2 - SPAWN_MARGIN.
pub const SPAWN_MARGIN: f32 = 200.0;

/// Bullets past MAP_SIZE / 2 + this on either axis are discarded.
pub const BULLET_OOB_MARGIN: f32 = 100.0;

/// Per-session pending-input queue bound: one second's worth. Overflow drops
/// the oldest entries, keeping order of the rest.
pub const MAX_PENDING_INPUTS: usize = TICK_RATE as usize;

/// Client-side input history bound (~2 s); anything older must already be
/// acknowledged or the connection is effectively dead.
pub const INPUT_HISTORY_LIMIT: usize = 2 * TICK_RATE as usize;

/// Interpolation snapshots older than this are dropped from client buffers.
pub const SNAPSHOT_KEEP_MS: u64 = 1000;

/// Ticks between death and respawn (3 s).
pub const RESPAWN_DELAY_TICKS: u64 = 3 * TICK_RATE as u64;
