//! Error Types
//!
//! Every failure the execution context can surface to a workflow program.
//! None of these are recovered inside the context; storage contention is
//! the only condition retried locally (inside the ledger).

use std::error::Error;
use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by user step actions.
pub type ActionError = Box<dyn Error + Send + Sync>;

/// Errors raised while checkpointing or replaying a step.
#[derive(Error, Debug)]
pub enum DurableError {
    /// A live execution holds the lease on this step.
    #[error("Step '{step_id}' is already in progress (lease age {age:?})")]
    StepInProgress { step_id: String, age: Duration },

    /// The ledger could not commit a write within its retry budget.
    #[error("Ledger write failed after {attempts} attempts: storage is busy")]
    StorageContention { attempts: u32 },

    /// Underlying storage I/O failure.
    #[error("Storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The user-supplied step action failed.
    #[error("Step action failed: {0}")]
    Action(ActionError),

    /// A step output could not be encoded or decoded.
    #[error("Step output codec error: {0}")]
    OutputCodec(#[from] serde_json::Error),

    /// A ledger row violates the record invariants.
    #[error("Corrupt ledger record for step '{step_id}': {reason}")]
    CorruptRecord { step_id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger lock poisoned")]
    LockPoisoned,
}

impl DurableError {
    /// Returns true if retrying the workflow later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StepInProgress { .. } | Self::StorageContention { .. }
        )
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, DurableError>;
