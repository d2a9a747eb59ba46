//! WebSocket transport: wire protocol, upgrade handler and dispatch

pub mod dispatch;
pub mod handler;
pub mod protocol;
