//! Authoritative match backend: matchmaking, session lifecycle, zone ticks
//! and anti-cheat, served over WebSockets.

pub mod anticheat;
pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod matchmaking;
pub mod net;
pub mod session;
pub mod store;
pub mod util;
pub mod ws;
