//! Durastep - Crash-Resilient Workflow Steps
//!
//! Lets ordinary imperative workflow code survive being killed at any
//! instant. Each unit of work runs through [`ExecutionContext::step`],
//! which checkpoints it in a persistent step ledger; re-running the same
//! workflow against the same ledger replays completed steps from their
//! recorded outputs and only executes what had not durably finished.
//!
//! # Architecture
//!
//! The library is organized into these modules:
//!
//! - [`ledger`]: Step records and their SQLite / in-memory storage
//! - [`execution`]: The replay decision engine and output encoding
//! - [`monitoring`]: Per-run timeline of step decisions
//! - [`config`]: YAML configuration for ledger and context
//! - [`demo`]: Sample onboarding workflow with crash simulation
//!
//! # Guarantees
//!
//! The return value used for replay is recorded exactly once. Step side
//! effects are at-least-once: a crash after an action finishes but before
//! its completion is recorded re-runs the action on recovery.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use durastep::{ExecutionContext, SqliteLedger};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ledger = Arc::new(SqliteLedger::open("durable.db")?);
//!     let ctx = ExecutionContext::new("wf-001", ledger);
//!
//!     // Skipped on replay once recorded
//!     let order: u64 = ctx.step_auto(|| Ok::<_, std::io::Error>(1042))?;
//!     let shipped: bool = ctx.step_auto(|| Ok::<_, std::io::Error>(order > 0))?;
//!     assert!(shipped);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod demo;
pub mod error;
pub mod execution;
pub mod ledger;
pub mod monitoring;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use error::{ActionError, DurableError, Result};
pub use execution::ExecutionContext;
pub use ledger::{Lease, MemoryLedger, SqliteLedger, StepLedger, StepRecord, StepStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Durastep";
