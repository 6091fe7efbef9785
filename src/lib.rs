//! Skirmish - authoritative server and sync client for a small-arena
//! top-down shooter.
//!
//! The server side runs a fixed 60 Hz simulation per room (rapier2d world,
//! circular players, ballistic bullets), scopes replication per client
//! through an interest quadtree, and ships typed-field deltas over
//! WebSocket. The client side mirrors the player physics for zero-latency
//! prediction, reconciles against acknowledged input sequences, and renders
//! remote entities through a delayed snapshot interpolator.

pub mod app;
pub mod client;
pub mod config;
pub mod constants;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
