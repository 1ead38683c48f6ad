//! Militia room server - authoritative multiplayer room simulation
//!
//! Clients send intent over WebSocket; each room simulates movement, combat,
//! scoring and the round lifecycle on its own task and broadcasts the
//! authoritative state back.

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
