//! In-Memory Step Ledger
//!
//! Same semantics as the SQLite ledger without durability. Useful for
//! exercising workflow code in tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use log::warn;

use super::record::{now_millis, StepRecord};
use super::{decide_lease, Lease, StepLedger};
use crate::error::{DurableError, Result};

type Key = (String, String);

/// Step ledger held in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    rows: Mutex<HashMap<Key, StepRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all workflows.
    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores a record as-is, replacing any existing row.
    pub fn put_record(&self, record: StepRecord) -> Result<()> {
        let key = (record.workflow_id().to_string(), record.step_id().to_string());
        self.lock()?.insert(key, record);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Key, StepRecord>>> {
        self.rows.lock().map_err(|_| DurableError::LockPoisoned)
    }
}

impl StepLedger for MemoryLedger {
    fn get(&self, workflow_id: &str, step_id: &str) -> Result<Option<StepRecord>> {
        let key = (workflow_id.to_string(), step_id.to_string());
        Ok(self.lock()?.get(&key).cloned())
    }

    fn insert_in_progress(&self, workflow_id: &str, step_id: &str) -> Result<()> {
        self.put_record(StepRecord::in_progress(workflow_id, step_id, now_millis()))
    }

    fn try_acquire(&self, workflow_id: &str, step_id: &str, zombie_timeout: Duration) -> Result<Lease> {
        let mut rows = self.lock()?;
        let key = (workflow_id.to_string(), step_id.to_string());
        let now = now_millis();

        let lease = decide_lease(rows.get(&key).cloned(), zombie_timeout, now);
        if let Lease::Acquired { .. } = lease {
            rows.insert(key, StepRecord::in_progress(workflow_id, step_id, now));
        }
        Ok(lease)
    }

    fn mark_completed(&self, workflow_id: &str, step_id: &str, output: &str) -> Result<()> {
        let mut rows = self.lock()?;
        let key = (workflow_id.to_string(), step_id.to_string());

        match rows.get_mut(&key) {
            Some(row) => {
                *row = StepRecord::completed(workflow_id, step_id, output, now_millis());
            }
            None => warn!(
                "No write-ahead record for '{}/{}'; completion not recorded",
                workflow_id, step_id
            ),
        }
        Ok(())
    }

    fn list(&self, workflow_id: &str) -> Result<Vec<StepRecord>> {
        let mut records: Vec<StepRecord> = self
            .lock()?
            .values()
            .filter(|r| r.workflow_id() == workflow_id)
            .cloned()
            .collect();

        records.sort_by(|a, b| {
            a.updated_at()
                .cmp(&b.updated_at())
                .then_with(|| a.step_id().cmp(b.step_id()))
        });
        Ok(records)
    }
}
