//! Connection bookkeeping and message routing

pub mod broadcast;
pub mod registry;

pub use broadcast::BroadcastRouter;
pub use registry::{ConnectionRegistry, OUTBOUND_BUFFER};
