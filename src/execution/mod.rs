//! Step Execution Module
//!
//! Checkpointed step execution on top of a [`StepLedger`](crate::ledger::StepLedger).
//!
//! # Architecture
//!
//! - [`context`]: Replay/zombie/sequence decision engine
//! - [`codec`]: JSON encoding of step outputs

pub mod codec;
pub mod context;

pub use context::{ExecutionContext, DEFAULT_ZOMBIE_TIMEOUT};
