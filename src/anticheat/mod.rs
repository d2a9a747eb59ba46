//! Anti-cheat: stateless telemetry checks plus a suspicion ledger that
//! escalates repeat offenders to a review flag. Detection is advisory only.

pub mod detectors;
pub mod engine;
pub mod ledger;

pub use detectors::{Detection, DetectionKind, HitSample, Severity};
pub use engine::{AntiCheatEngine, HitTelemetry};
pub use ledger::{FlagRecord, FlagStatus, SuspicionLedger, SuspicionRecord};
