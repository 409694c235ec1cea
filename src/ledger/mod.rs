//! Step Ledger Module
//!
//! Durable storage of step records keyed by (workflow id, step id).
//!
//! # Structure
//!
//! - [`record`]: Immutable step record and status model
//! - [`retry`]: Bounded fixed-delay retry for contended writes
//! - [`sqlite`]: SQLite-backed ledger (single writer, pooled readers)
//! - [`memory`]: In-process ledger for tests and embedding

pub mod memory;
pub mod record;
pub mod retry;
pub mod sqlite;

pub use memory::MemoryLedger;
pub use record::{StepRecord, StepStatus};
pub use retry::RetryPolicy;
pub use sqlite::{LedgerOptions, SqliteLedger};

use std::time::Duration;

use crate::error::Result;

/// Outcome of an attempt to take the lease on a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lease {
    /// The write-ahead record was written; the caller owns the step.
    /// `reclaimed` carries the age of the abandoned record it replaced.
    Acquired { reclaimed: Option<Duration> },
    /// The step already finished; its record is returned for replay.
    Completed(StepRecord),
    /// Another execution holds a lease younger than the zombie timeout.
    Held { age: Duration },
}

/// Lease decision for the current row of a step at `now` (epoch millis).
///
/// `Acquired` means the caller must write the write-ahead record.
pub(crate) fn decide_lease(existing: Option<StepRecord>, zombie_timeout: Duration, now: i64) -> Lease {
    match existing {
        None => Lease::Acquired { reclaimed: None },
        Some(record) if record.is_completed() => Lease::Completed(record),
        Some(record) => {
            let age = record.age_at(now);
            if age < zombie_timeout {
                Lease::Held { age }
            } else {
                Lease::Acquired { reclaimed: Some(age) }
            }
        }
    }
}

/// Storage interface the execution context requires.
///
/// Implementations must make each write atomic: an observer never sees a
/// half-written row, and a failed write leaves no trace.
pub trait StepLedger: Send + Sync {
    /// Point lookup. `Ok(None)` when the step has never been recorded.
    ///
    /// Fails with [`DurableError::Storage`](crate::DurableError::Storage)
    /// only; a read that stays busy past the retry budget is reported as
    /// a storage failure.
    fn get(&self, workflow_id: &str, step_id: &str) -> Result<Option<StepRecord>>;

    /// Inserts or replaces the row with an `IN_PROGRESS` write-ahead record.
    fn insert_in_progress(&self, workflow_id: &str, step_id: &str) -> Result<()>;

    /// Reads the row and writes the `IN_PROGRESS` record in one atomic
    /// step, unless the step is completed or held by a lease younger than
    /// `zombie_timeout`. Of any number of concurrent callers at most one
    /// gets [`Lease::Acquired`] for the same row state.
    fn try_acquire(&self, workflow_id: &str, step_id: &str, zombie_timeout: Duration) -> Result<Lease>;

    /// Transitions an existing row to `COMPLETED` with the encoded output.
    fn mark_completed(&self, workflow_id: &str, step_id: &str, output: &str) -> Result<()>;

    /// All records of a workflow run, oldest write first.
    fn list(&self, workflow_id: &str) -> Result<Vec<StepRecord>>;
}
