//! Stream sessions: one decoder pipeline bound to one render surface.
//!
//! A session owns its decoder for the lifetime of one source, classifies
//! decoder errors, drives in-session recovery and reports readiness through
//! a status state machine (`Idle -> Initializing -> Ready <-> Buffering`,
//! any active state `-> Error`).

mod lifecycle;
pub mod recovery;
mod status;

#[cfg(test)]
mod tests;

pub use lifecycle::{SessionOptions, StatusCallback, StreamSession};
pub use recovery::{classify, ErrorResolution, RecoveryAction, RecoveryBudget};
pub use status::{SessionStatus, SettleOutcome, StatusReport};
