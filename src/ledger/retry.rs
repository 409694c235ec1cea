//! Bounded Retry for Ledger Access
//!
//! SQLite serializes writers; a second writer can see `SQLITE_BUSY` or
//! `SQLITE_LOCKED` even with a busy timeout configured. Those errors are
//! retried with a fixed delay, everything else is surfaced immediately.

use std::thread;
use std::time::Duration;

use log::warn;
use rusqlite::ErrorCode;
use serde::{Deserialize, Serialize};

use crate::error::{DurableError, Result};

/// Default number of write attempts.
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Default delay between write attempts, in milliseconds.
pub const DEFAULT_DELAY_MS: u64 = 100;

/// Fixed-delay retry policy for contended writes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_attempts() -> u32 {
    DEFAULT_ATTEMPTS
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt count and delay.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns the delay between attempts.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Runs `op` until it succeeds, fails with a non-contention error,
    /// or the attempt budget is spent.
    pub fn run<T, F>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        self.drive(label, op).map_err(|stop| match stop {
            Stop::Failed(e) => DurableError::Storage(e),
            Stop::Exhausted { attempts, .. } => DurableError::StorageContention { attempts },
        })
    }

    /// Same as [`run`](Self::run), but a spent budget surfaces the last
    /// busy error as [`DurableError::Storage`]. Used for lookups, which
    /// only fail with storage errors.
    pub fn run_read<T, F>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        self.drive(label, op).map_err(|stop| match stop {
            Stop::Failed(e) | Stop::Exhausted { last: e, .. } => DurableError::Storage(e),
        })
    }

    fn drive<T, F>(&self, label: &str, mut op: F) -> std::result::Result<T, Stop>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if is_contention(&e) => {
                    warn!(
                        "{}: storage busy (attempt {}/{}), retrying in {:?}",
                        label,
                        attempt,
                        attempts,
                        self.delay()
                    );
                    if attempt >= attempts {
                        return Err(Stop::Exhausted { attempts, last: e });
                    }
                    thread::sleep(self.delay());
                    attempt += 1;
                }
                Err(e) => return Err(Stop::Failed(e)),
            }
        }
    }
}

/// Why a retried operation gave up.
enum Stop {
    Failed(rusqlite::Error),
    Exhausted { attempts: u32, last: rusqlite::Error },
}

/// Returns true for the transient lock errors SQLite reports under
/// concurrent writers.
pub fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}
