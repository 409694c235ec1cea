//! Step Records
//!
//! Immutable snapshots of one step's last persisted outcome. A status
//! change is always a new row written to the ledger followed by a fresh
//! read, never an in-place edit of a returned record.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Write-ahead record exists; the action has not been recorded as done
    InProgress,
    /// Output is persisted; the step is terminal
    Completed,
}

impl StepStatus {
    /// Returns the persisted text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(format!("unknown step status '{}'", other)),
        }
    }
}

impl ToSql for StepStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for StepStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// Last known outcome of one step within a workflow run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    workflow_id: String,
    step_id: String,
    status: StepStatus,
    output: Option<String>,
    updated_at: i64,
}

impl StepRecord {
    /// Creates a record from raw field values.
    pub fn new(
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
        status: StepStatus,
        output: Option<String>,
        updated_at: i64,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            step_id: step_id.into(),
            status,
            output,
            updated_at,
        }
    }

    /// Creates a write-ahead record with no output.
    pub fn in_progress(
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
        updated_at: i64,
    ) -> Self {
        Self::new(workflow_id, step_id, StepStatus::InProgress, None, updated_at)
    }

    /// Creates a completed record carrying the encoded output.
    pub fn completed(
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
        output: impl Into<String>,
        updated_at: i64,
    ) -> Self {
        Self::new(
            workflow_id,
            step_id,
            StepStatus::Completed,
            Some(output.into()),
            updated_at,
        )
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// Encoded output; `None` unless the step is completed.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Epoch milliseconds of the last write.
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Last write time as a UTC timestamp.
    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.updated_at).single()
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    /// Time between the last write and `now` (epoch millis). Future
    /// timestamps count as zero.
    pub fn age_at(&self, now: i64) -> Duration {
        let elapsed = now.saturating_sub(self.updated_at).max(0);
        Duration::from_millis(elapsed as u64)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation() {
        let now = now_millis();
        let record = StepRecord::completed("wf1", "step1", "\"output\"", now);

        assert_eq!(record.workflow_id(), "wf1");
        assert_eq!(record.step_id(), "step1");
        assert_eq!(record.status(), StepStatus::Completed);
        assert_eq!(record.output(), Some("\"output\""));
        assert_eq!(record.updated_at(), now);
        assert!(record.is_completed());
    }

    #[test]
    fn test_in_progress_has_no_output() {
        let record = StepRecord::in_progress("wf1", "step1", 1_000);
        assert_eq!(record.status(), StepStatus::InProgress);
        assert!(record.output().is_none());
        assert!(!record.is_completed());
    }

    #[test]
    fn test_equality_covers_all_fields() {
        let a = StepRecord::completed("wf1", "s", "1", 10);
        assert_eq!(a, StepRecord::completed("wf1", "s", "1", 10));
        assert_ne!(a, StepRecord::completed("wf1", "s", "1", 11));
        assert_ne!(a, StepRecord::completed("wf1", "s", "2", 10));
        assert_ne!(a, StepRecord::completed("wf2", "s", "1", 10));
        assert_ne!(a, StepRecord::new("wf1", "s", StepStatus::InProgress, Some("1".into()), 10));
    }

    #[test]
    fn test_status_text_form() {
        assert_eq!(StepStatus::InProgress.to_string(), "IN_PROGRESS");
        assert_eq!("COMPLETED".parse::<StepStatus>().unwrap(), StepStatus::Completed);
        assert!("DONE".parse::<StepStatus>().is_err());
    }

    #[test]
    fn test_age_at() {
        let record = StepRecord::in_progress("wf1", "step1", 10_000);
        assert_eq!(record.age_at(12_500), Duration::from_millis(2_500));
        assert_eq!(record.age_at(9_000), Duration::ZERO);
    }

    #[test]
    fn test_updated_at_utc() {
        let record = StepRecord::in_progress("wf1", "step1", 0);
        let ts = record.updated_at_utc().unwrap();
        assert_eq!(ts.timestamp(), 0);
    }
}
