//! SQLite Step Ledger
//!
//! One `steps` table keyed by `(workflow_id, step_id)`. All writes go
//! through a single writer connection behind a mutex, each inside an
//! immediate transaction that is rolled back if anything fails. Reads use
//! pooled connections of their own so they never queue behind the writer
//! or behind each other; WAL mode guarantees they only observe committed
//! rows.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

use super::record::{now_millis, StepRecord, StepStatus};
use super::retry::RetryPolicy;
use super::{decide_lease, Lease, StepLedger};
use crate::error::{DurableError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS steps (
    workflow_id TEXT NOT NULL,
    step_id     TEXT NOT NULL,
    status      TEXT NOT NULL,
    output      TEXT,
    updated_at  INTEGER NOT NULL,
    PRIMARY KEY (workflow_id, step_id)
);
";

const SELECT_COLUMNS: &str = "SELECT workflow_id, step_id, status, output, updated_at FROM steps";

/// Idle reader connections kept for reuse.
const MAX_IDLE_READERS: usize = 8;

/// Default SQLite busy timeout.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Tuning knobs for a SQLite ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerOptions {
    /// Retry policy for contended writes
    pub retry: RetryPolicy,
    /// How long SQLite itself waits on a lock before reporting busy
    pub busy_timeout: Duration,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Step ledger persisted in a SQLite database file.
pub struct SqliteLedger {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
    options: LedgerOptions,
}

impl SqliteLedger {
    /// Opens or creates a ledger at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, LedgerOptions::default())
    }

    /// Opens or creates a ledger at `path`.
    ///
    /// Creates missing parent directories, switches the database to WAL
    /// mode and creates the `steps` table if needed.
    pub fn open_with(path: impl AsRef<Path>, options: LedgerOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let writer = open_connection(&path, options.busy_timeout)?;
        let mode: String = writer.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        writer.execute_batch(SCHEMA)?;

        info!("Opened step ledger at {} (journal mode: {})", path.display(), mode);

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            readers: Mutex::new(Vec::new()),
            options,
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> LedgerOptions {
        self.options
    }

    /// Runs a write inside an immediate transaction under the writer lock,
    /// retrying on contention.
    fn write<T, F>(&self, label: &str, statement: F) -> Result<T>
    where
        F: Fn(&Transaction<'_>) -> rusqlite::Result<T>,
    {
        let mut conn = self.writer.lock().map_err(|_| DurableError::LockPoisoned)?;

        self.options.retry.run(label, || {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = statement(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    /// Runs a read on a pooled reader connection. A read that stays busy
    /// past the retry budget is a storage failure.
    fn read<T, F>(&self, label: &str, query: F) -> Result<T>
    where
        F: Fn(&Connection) -> rusqlite::Result<T>,
    {
        let pooled = self
            .readers
            .lock()
            .map_err(|_| DurableError::LockPoisoned)?
            .pop();

        let conn = match pooled {
            Some(conn) => conn,
            None => {
                debug!("Opening reader connection for {}", self.path.display());
                open_connection(&self.path, self.options.busy_timeout)?
            }
        };

        let result = self.options.retry.run_read(label, || query(&conn));

        if let Ok(mut pool) = self.readers.lock() {
            if pool.len() < MAX_IDLE_READERS {
                pool.push(conn);
            }
        }

        result
    }

    /// Writes a record verbatim, bypassing the clock.
    #[cfg(test)]
    pub(crate) fn put_record(&self, record: &StepRecord) -> Result<()> {
        self.write("put_record", |tx| {
            tx.execute(
                "INSERT OR REPLACE INTO steps (workflow_id, step_id, status, output, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.workflow_id(),
                    record.step_id(),
                    record.status(),
                    record.output(),
                    record.updated_at()
                ],
            )
        })
        .map(|_| ())
    }
}

impl StepLedger for SqliteLedger {
    fn get(&self, workflow_id: &str, step_id: &str) -> Result<Option<StepRecord>> {
        self.read("get", |conn| {
            conn.query_row(
                &format!("{} WHERE workflow_id = ?1 AND step_id = ?2", SELECT_COLUMNS),
                params![workflow_id, step_id],
                row_to_record,
            )
            .optional()
        })
    }

    fn insert_in_progress(&self, workflow_id: &str, step_id: &str) -> Result<()> {
        self.write("insert_in_progress", |tx| {
            tx.execute(
                "INSERT OR REPLACE INTO steps (workflow_id, step_id, status, output, updated_at)
                 VALUES (?1, ?2, ?3, NULL, ?4)",
                params![workflow_id, step_id, StepStatus::InProgress, now_millis()],
            )
        })?;

        debug!("Recorded '{}/{}' as {}", workflow_id, step_id, StepStatus::InProgress);
        Ok(())
    }

    fn try_acquire(&self, workflow_id: &str, step_id: &str, zombie_timeout: Duration) -> Result<Lease> {
        let lease = self.write("try_acquire", |tx| {
            let existing = tx
                .query_row(
                    &format!("{} WHERE workflow_id = ?1 AND step_id = ?2", SELECT_COLUMNS),
                    params![workflow_id, step_id],
                    row_to_record,
                )
                .optional()?;

            let now = now_millis();
            let lease = decide_lease(existing, zombie_timeout, now);
            if let Lease::Acquired { .. } = lease {
                tx.execute(
                    "INSERT OR REPLACE INTO steps (workflow_id, step_id, status, output, updated_at)
                     VALUES (?1, ?2, ?3, NULL, ?4)",
                    params![workflow_id, step_id, StepStatus::InProgress, now],
                )?;
            }
            Ok(lease)
        })?;

        if let Lease::Acquired { .. } = lease {
            debug!("Recorded '{}/{}' as {}", workflow_id, step_id, StepStatus::InProgress);
        }
        Ok(lease)
    }

    fn mark_completed(&self, workflow_id: &str, step_id: &str, output: &str) -> Result<()> {
        let changed = self.write("mark_completed", |tx| {
            tx.execute(
                "UPDATE steps SET status = ?1, output = ?2, updated_at = ?3
                 WHERE workflow_id = ?4 AND step_id = ?5",
                params![StepStatus::Completed, output, now_millis(), workflow_id, step_id],
            )
        })?;

        if changed == 0 {
            warn!(
                "No write-ahead record for '{}/{}'; completion not recorded",
                workflow_id, step_id
            );
        } else {
            debug!("Recorded '{}/{}' as {}", workflow_id, step_id, StepStatus::Completed);
        }
        Ok(())
    }

    fn list(&self, workflow_id: &str) -> Result<Vec<StepRecord>> {
        self.read("list", |conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE workflow_id = ?1 ORDER BY updated_at, step_id",
                SELECT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![workflow_id], row_to_record)?;
            rows.collect()
        })
    }
}

impl fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteLedger")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish()
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<StepRecord> {
    Ok(StepRecord::new(
        row.get::<_, String>("workflow_id")?,
        row.get::<_, String>("step_id")?,
        row.get::<_, StepStatus>("status")?,
        row.get::<_, Option<String>>("output")?,
        row.get::<_, i64>("updated_at")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::tempdir;

    fn setup_ledger() -> (tempfile::TempDir, SqliteLedger) {
        let dir = tempdir().unwrap();
        let ledger = SqliteLedger::open(dir.path().join("ledger.db")).unwrap();
        (dir, ledger)
    }

    #[test]
    fn test_open_creates_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("ledger.db");
        let ledger = SqliteLedger::open(&db_path).unwrap();

        assert!(db_path.exists());
        assert_eq!(ledger.path(), db_path.as_path());
    }

    #[test]
    fn test_get_missing_is_none() {
        let (_dir, ledger) = setup_ledger();
        assert!(ledger.get("wf1", "step-1").unwrap().is_none());
    }

    #[test]
    fn test_insert_in_progress() {
        let (_dir, ledger) = setup_ledger();
        let before = now_millis();

        ledger.insert_in_progress("wf1", "step-1").unwrap();

        let record = ledger.get("wf1", "step-1").unwrap().unwrap();
        assert_eq!(record.status(), StepStatus::InProgress);
        assert!(record.output().is_none());
        assert!(record.updated_at() >= before);
    }

    #[test]
    fn test_insert_replaces_existing_row() {
        let (_dir, ledger) = setup_ledger();
        ledger
            .put_record(&StepRecord::in_progress("wf1", "step-1", 1))
            .unwrap();

        ledger.insert_in_progress("wf1", "step-1").unwrap();

        let records = ledger.list("wf1").unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].updated_at() > 1);
    }

    #[test]
    fn test_mark_completed() {
        let (_dir, ledger) = setup_ledger();
        ledger.insert_in_progress("wf1", "step-1").unwrap();
        ledger.mark_completed("wf1", "step-1", "\"EMP-001\"").unwrap();

        let record = ledger.get("wf1", "step-1").unwrap().unwrap();
        assert_eq!(record.status(), StepStatus::Completed);
        assert_eq!(record.output(), Some("\"EMP-001\""));
    }

    #[test]
    fn test_mark_completed_without_row_writes_nothing() {
        let (_dir, ledger) = setup_ledger();
        ledger.mark_completed("wf1", "ghost", "1").unwrap();

        assert!(ledger.get("wf1", "ghost").unwrap().is_none());
        assert!(ledger.list("wf1").unwrap().is_empty());
    }

    #[test]
    fn test_workflows_are_partitioned() {
        let (_dir, ledger) = setup_ledger();
        ledger.insert_in_progress("wf1", "step-1").unwrap();
        ledger.insert_in_progress("wf2", "step-1").unwrap();
        ledger.mark_completed("wf2", "step-1", "2").unwrap();

        let wf1 = ledger.get("wf1", "step-1").unwrap().unwrap();
        let wf2 = ledger.get("wf2", "step-1").unwrap().unwrap();
        assert_eq!(wf1.status(), StepStatus::InProgress);
        assert_eq!(wf2.status(), StepStatus::Completed);
        assert_eq!(ledger.list("wf1").unwrap().len(), 1);
    }

    #[test]
    fn test_list_orders_by_write_time() {
        let (_dir, ledger) = setup_ledger();
        ledger
            .put_record(&StepRecord::completed("wf1", "b", "2", 20))
            .unwrap();
        ledger
            .put_record(&StepRecord::completed("wf1", "a", "1", 10))
            .unwrap();

        let ids: Vec<String> = ledger
            .list("wf1")
            .unwrap()
            .iter()
            .map(|r| r.step_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("ledger.db");

        {
            let ledger = SqliteLedger::open(&db_path).unwrap();
            ledger.insert_in_progress("wf1", "step-1").unwrap();
            ledger.mark_completed("wf1", "step-1", "42").unwrap();
        }

        let reopened = SqliteLedger::open(&db_path).unwrap();
        let record = reopened.get("wf1", "step-1").unwrap().unwrap();
        assert_eq!(record.output(), Some("42"));
    }

    #[test]
    fn test_unknown_status_is_storage_failure() {
        let (_dir, ledger) = setup_ledger();
        {
            let conn = ledger.writer.lock().unwrap();
            conn.execute(
                "INSERT INTO steps (workflow_id, step_id, status, output, updated_at)
                 VALUES ('wf1', 'step-1', 'DONE', NULL, 0)",
                [],
            )
            .unwrap();
        }

        let result = ledger.get("wf1", "step-1");
        assert!(matches!(result, Err(DurableError::Storage(_))));
    }

    #[test]
    fn test_concurrent_writes_and_reads() {
        let (_dir, ledger) = setup_ledger();
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    let step_id = format!("step-{}", i);
                    ledger.insert_in_progress("wf1", &step_id).unwrap();
                    assert!(ledger.get("wf1", &step_id).unwrap().is_some());
                    ledger.mark_completed("wf1", &step_id, &i.to_string()).unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let records = ledger.list("wf1").unwrap();
        assert_eq!(records.len(), 8);
        assert!(records.iter().all(|r| r.is_completed()));
    }

    #[test]
    fn test_try_acquire_is_conditional() {
        let (_dir, ledger) = setup_ledger();
        let timeout = Duration::from_secs(5);

        let first = ledger.try_acquire("wf1", "step-1", timeout).unwrap();
        assert_eq!(first, Lease::Acquired { reclaimed: None });

        let second = ledger.try_acquire("wf1", "step-1", timeout).unwrap();
        assert!(matches!(second, Lease::Held { age } if age < timeout));

        ledger.mark_completed("wf1", "step-1", "\"done\"").unwrap();
        let third = ledger.try_acquire("wf1", "step-1", timeout).unwrap();
        match third {
            Lease::Completed(record) => assert_eq!(record.output(), Some("\"done\"")),
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[test]
    fn test_try_acquire_reclaims_stale_row() {
        let (_dir, ledger) = setup_ledger();
        let stale = now_millis() - 60_000;
        ledger
            .put_record(&StepRecord::in_progress("wf1", "step-1", stale))
            .unwrap();

        let lease = ledger.try_acquire("wf1", "step-1", Duration::from_secs(5)).unwrap();
        match lease {
            Lease::Acquired { reclaimed: Some(age) } => assert!(age >= Duration::from_secs(60)),
            other => panic!("expected reclaim, got {:?}", other),
        }
        assert!(ledger.get("wf1", "step-1").unwrap().unwrap().updated_at() > stale);
    }

    #[test]
    fn test_simultaneous_acquire_grants_one_lease() {
        let (_dir, ledger) = setup_ledger();
        let ledger = Arc::new(ledger);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    ledger.try_acquire("wf1", "shared", Duration::from_secs(5)).unwrap()
                })
            })
            .collect();

        let leases: Vec<Lease> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let acquired = leases
            .iter()
            .filter(|l| matches!(l, Lease::Acquired { .. }))
            .count();
        assert_eq!(acquired, 1);
        assert!(leases
            .iter()
            .all(|l| matches!(l, Lease::Acquired { .. } | Lease::Held { .. })));
    }

    #[test]
    fn test_external_writer_lock_surfaces_contention() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("ledger.db");
        let options = LedgerOptions {
            retry: RetryPolicy::new(2, Duration::from_millis(1)),
            busy_timeout: Duration::from_millis(1),
        };
        let ledger = SqliteLedger::open_with(&db_path, options).unwrap();

        let blocker = Connection::open(&db_path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

        let result = ledger.insert_in_progress("wf1", "step-1");
        assert!(matches!(
            result,
            Err(DurableError::StorageContention { attempts: 2 })
        ));

        blocker.execute_batch("ROLLBACK").unwrap();
        ledger.insert_in_progress("wf1", "step-1").unwrap();
        assert!(ledger.get("wf1", "step-1").unwrap().is_some());
    }
}
