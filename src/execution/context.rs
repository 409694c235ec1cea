//! Execution Context
//!
//! The replay decision engine. Every unit of work a workflow program wants
//! checkpointed goes through [`ExecutionContext::step`], which consults the
//! ledger before running user code:
//!
//! - `COMPLETED` record: the stored output is decoded and returned, the
//!   action is not invoked
//! - fresh `IN_PROGRESS` record: [`DurableError::StepInProgress`]
//! - stale `IN_PROGRESS` record (older than the zombie timeout) or no
//!   record: write-ahead, run the action, record the output
//!
//! The check and the write-ahead are one ledger call
//! ([`StepLedger::try_acquire`]), so concurrent callers of the same step
//! never both run its action.
//!
//! # Step identity
//!
//! Step ids must be reproducible across restarts. Ids synthesized by
//! [`ExecutionContext::step_auto`] come from a process-local counter, so a
//! workflow using them must issue its steps in the same order on every
//! run. This is not checked.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::codec::{decode_output, encode_output};
use crate::error::{ActionError, DurableError, Result};
use crate::ledger::{Lease, StepLedger, StepRecord};
use crate::monitoring::{EventType, ExecutionTimeline};

/// Default age after which an `IN_PROGRESS` record is considered abandoned.
pub const DEFAULT_ZOMBIE_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of sequence-generated step ids.
pub const AUTO_STEP_PREFIX: &str = "step-";

/// Per-run orchestrator shared by every thread of a workflow program.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use durastep::{ExecutionContext, SqliteLedger};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ledger = Arc::new(SqliteLedger::open("durable.db")?);
///     let ctx = ExecutionContext::new("wf-001", ledger);
///
///     let employee: String = ctx.step("create-employee", || {
///         Ok::<_, std::io::Error>("EMP-001".to_string())
///     })?;
///     println!("created {}", employee);
///     Ok(())
/// }
/// ```
pub struct ExecutionContext {
    workflow_id: String,
    ledger: Arc<dyn StepLedger>,
    zombie_timeout: Duration,
    sequence: AtomicU64,
    timeline: Mutex<ExecutionTimeline>,
}

impl ExecutionContext {
    /// Creates a context for `workflow_id` backed by `ledger`.
    pub fn new(workflow_id: impl Into<String>, ledger: Arc<dyn StepLedger>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            ledger,
            zombie_timeout: DEFAULT_ZOMBIE_TIMEOUT,
            sequence: AtomicU64::new(0),
            timeline: Mutex::new(ExecutionTimeline::new()),
        }
    }

    /// Sets the zombie timeout.
    pub fn with_zombie_timeout(mut self, timeout: Duration) -> Self {
        self.zombie_timeout = timeout;
        self
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn zombie_timeout(&self) -> Duration {
        self.zombie_timeout
    }

    /// Shared handle to the underlying ledger.
    pub fn ledger(&self) -> Arc<dyn StepLedger> {
        Arc::clone(&self.ledger)
    }

    /// Snapshot of the step decisions made so far.
    pub fn timeline(&self) -> ExecutionTimeline {
        self.timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reserves the next sequence-generated step id (`step-1`, `step-2`, ...).
    pub fn next_step_id(&self) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}{}", AUTO_STEP_PREFIX, n)
    }

    /// Runs `action` as a checkpointed step with a sequence-generated id.
    pub fn step_auto<T, F, E>(&self, action: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> std::result::Result<T, E>,
        E: Into<ActionError>,
    {
        let step_id = self.next_step_id();
        self.step(&step_id, action)
    }

    /// Runs `action` as the checkpointed step `step_id`.
    ///
    /// Returns the recorded output without invoking `action` if the step
    /// already completed. If `action` fails the write-ahead record stays
    /// `IN_PROGRESS` and the error is returned as [`DurableError::Action`].
    pub fn step<T, F, E>(&self, step_id: &str, action: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> std::result::Result<T, E>,
        E: Into<ActionError>,
    {
        match self
            .ledger
            .try_acquire(&self.workflow_id, step_id, self.zombie_timeout)?
        {
            Lease::Completed(existing) => return self.replay(&existing),
            Lease::Held { age } => {
                warn!(
                    "Step '{}' is in progress elsewhere (lease age {:?})",
                    step_id, age
                );
                self.record(step_id, EventType::Rejected);
                return Err(DurableError::StepInProgress {
                    step_id: step_id.to_string(),
                    age,
                });
            }
            Lease::Acquired { reclaimed: Some(age) } => {
                info!("Step '{}' abandoned {:?} ago, re-executing", step_id, age);
            }
            Lease::Acquired { reclaimed: None } => {}
        }

        self.record(step_id, EventType::Started);
        debug!("Executing step '{}'", step_id);

        let value = match action() {
            Ok(value) => value,
            Err(e) => {
                let err: ActionError = e.into();
                warn!("Step '{}' failed: {}", step_id, err);
                self.record(step_id, EventType::Failed);
                return Err(DurableError::Action(err));
            }
        };

        let encoded = encode_output(&value)?;
        self.ledger
            .mark_completed(&self.workflow_id, step_id, &encoded)?;
        self.record(step_id, EventType::Completed);
        info!("Step '{}' completed", step_id);

        Ok(value)
    }

    fn replay<T: DeserializeOwned>(&self, record: &StepRecord) -> Result<T> {
        let encoded = record.output().ok_or_else(|| DurableError::CorruptRecord {
            step_id: record.step_id().to_string(),
            reason: "completed without output".to_string(),
        })?;

        let value = decode_output(encoded)?;
        self.record(record.step_id(), EventType::Replayed);
        info!("Step '{}' already completed, replaying output", record.step_id());
        Ok(value)
    }

    fn record(&self, step_id: &str, event_type: EventType) {
        self.timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_event(step_id, event_type);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("workflow_id", &self.workflow_id)
            .field("zombie_timeout", &self.zombie_timeout)
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .finish()
    }
}
