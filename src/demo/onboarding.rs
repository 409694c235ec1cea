//! Employee Onboarding Workflow
//!
//! Four checkpointed steps: create the employee record, then assign IT
//! equipment and provision system access in parallel, then schedule
//! orientation.
//!
//! Step ids come from the context's sequence. The two parallel branches
//! reserve their ids on the calling thread before fanning out so that
//! every run assigns the same id to the same branch.

use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ActionError, DurableError, Result};
use crate::execution::ExecutionContext;

/// Exit code used when a crash is simulated.
pub const CRASH_EXIT_CODE: i32 = 3;

/// Where to kill the process to demonstrate recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrashPlan {
    /// Exit right after this step is recorded completed
    pub after: Option<String>,
    /// Exit inside this step's action, leaving an in-progress record
    pub during: Option<String>,
}

impl CrashPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.after.is_some() || self.during.is_some()
    }

    fn check_during(&self, step_id: &str) {
        if self.during.as_deref() == Some(step_id) {
            warn!("Simulating crash during step '{}'", step_id);
            process::exit(CRASH_EXIT_CODE);
        }
    }

    fn check_after(&self, step_id: &str) {
        if self.after.as_deref() == Some(step_id) {
            warn!("Simulating crash after step '{}'", step_id);
            process::exit(CRASH_EXIT_CODE);
        }
    }
}

/// Output of the first step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Employee {
    pub id: String,
    pub name: String,
}

/// Final result of a completed onboarding run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OnboardingOutcome {
    pub employee: Employee,
    pub equipment: String,
    pub access: String,
    pub orientation: String,
}

/// Sample workflow exercising sequential and fan-out steps.
#[derive(Debug)]
pub struct OnboardingWorkflow {
    employee_name: String,
    crash_plan: CrashPlan,
    invocations: AtomicUsize,
}

impl OnboardingWorkflow {
    pub fn new(employee_name: impl Into<String>) -> Self {
        Self {
            employee_name: employee_name.into(),
            crash_plan: CrashPlan::none(),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn with_crash_plan(mut self, plan: CrashPlan) -> Self {
        self.crash_plan = plan;
        self
    }

    /// Number of step actions actually executed by this instance.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Runs the whole workflow, replaying completed steps.
    pub fn run(&self, ctx: &ExecutionContext) -> Result<OnboardingOutcome> {
        let employee = self.create_employee(ctx)?;
        let (equipment, access) = self.equip(ctx, &employee)?;
        let orientation = self.schedule_orientation(ctx, &employee)?;

        info!("Onboarding of {} completed", employee.id);

        Ok(OnboardingOutcome {
            employee,
            equipment,
            access,
            orientation,
        })
    }

    /// Step 1: create the employee record.
    pub fn create_employee(&self, ctx: &ExecutionContext) -> Result<Employee> {
        let step_id = ctx.next_step_id();
        self.run_step(ctx, &step_id, || {
            info!("Creating employee record for {}...", self.employee_name);
            Employee {
                id: "EMP-001".to_string(),
                name: self.employee_name.clone(),
            }
        })
    }

    /// Steps 2 and 3: equipment and access, in parallel.
    pub fn equip(&self, ctx: &ExecutionContext, employee: &Employee) -> Result<(String, String)> {
        let it_step = ctx.next_step_id();
        let access_step = ctx.next_step_id();

        thread::scope(|s| -> Result<(String, String)> {
            let it = s.spawn(|| {
                self.run_step(ctx, &it_step, || {
                    info!("Assigning laptop & email for {}", employee.id);
                    "IT-ASSIGNED".to_string()
                })
            });
            let access = s.spawn(|| {
                self.run_step(ctx, &access_step, || {
                    info!("Provisioning system access for {}", employee.id);
                    "ACCESS-PROVISIONED".to_string()
                })
            });

            let it = it.join().map_err(|_| worker_panicked(&it_step))?;
            let access = access.join().map_err(|_| worker_panicked(&access_step))?;
            Ok((it?, access?))
        })
    }

    /// Step 4: schedule orientation.
    pub fn schedule_orientation(&self, ctx: &ExecutionContext, employee: &Employee) -> Result<String> {
        let step_id = ctx.next_step_id();
        self.run_step(ctx, &step_id, || {
            info!("Scheduling orientation session for {}...", employee.name);
            "ORIENTATION-SCHEDULED".to_string()
        })
    }

    fn run_step<T, F>(&self, ctx: &ExecutionContext, step_id: &str, action: F) -> Result<T>
    where
        T: Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> T,
    {
        let mut executed = false;

        let value = ctx.step(step_id, || {
            executed = true;
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.crash_plan.check_during(step_id);
            Ok::<_, ActionError>(action())
        })?;

        if executed {
            self.crash_plan.check_after(step_id);
        }
        Ok(value)
    }
}

fn worker_panicked(step_id: &str) -> DurableError {
    DurableError::Action(format!("worker for step '{}' panicked", step_id).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::record::now_millis;
    use crate::ledger::{MemoryLedger, SqliteLedger, StepLedger, StepRecord, StepStatus};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn expected_outcome() -> OnboardingOutcome {
        OnboardingOutcome {
            employee: Employee {
                id: "EMP-001".to_string(),
                name: "Ada".to_string(),
            },
            equipment: "IT-ASSIGNED".to_string(),
            access: "ACCESS-PROVISIONED".to_string(),
            orientation: "ORIENTATION-SCHEDULED".to_string(),
        }
    }

    #[test]
    fn test_idempotent_round_trip() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(SqliteLedger::open(dir.path().join("ledger.db")).unwrap());

        let first = OnboardingWorkflow::new("Ada");
        let outcome = first
            .run(&ExecutionContext::new("wf-001", ledger.clone()))
            .unwrap();
        assert_eq!(outcome, expected_outcome());
        assert_eq!(first.invocations(), 4);

        let records = ledger.list("wf-001").unwrap();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.status() == StepStatus::Completed));

        let second = OnboardingWorkflow::new("Ada");
        let replayed = second
            .run(&ExecutionContext::new("wf-001", ledger.clone()))
            .unwrap();
        assert_eq!(replayed, outcome);
        assert_eq!(second.invocations(), 0);
        assert_eq!(ledger.list("wf-001").unwrap().len(), 4);
    }

    #[test]
    fn test_resume_after_first_step() {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(SqliteLedger::open(dir.path().join("ledger.db")).unwrap());

        let interrupted = OnboardingWorkflow::new("Ada");
        {
            let ctx = ExecutionContext::new("wf-001", ledger.clone());
            interrupted.create_employee(&ctx).unwrap();
        }
        assert_eq!(interrupted.invocations(), 1);

        let resumed = OnboardingWorkflow::new("Ada");
        let outcome = resumed
            .run(&ExecutionContext::new("wf-001", ledger.clone()))
            .unwrap();

        assert_eq!(outcome, expected_outcome());
        assert_eq!(resumed.invocations(), 3);
    }

    #[test]
    fn test_resume_after_crash_in_parallel_branch() {
        let ledger = Arc::new(MemoryLedger::new());
        let employee = r#"{"id":"EMP-001","name":"Ada"}"#;
        ledger
            .put_record(StepRecord::completed("wf-001", "step-1", employee, now_millis()))
            .unwrap();
        ledger
            .put_record(StepRecord::completed("wf-001", "step-2", "\"IT-ASSIGNED\"", now_millis()))
            .unwrap();
        ledger
            .put_record(StepRecord::in_progress("wf-001", "step-3", now_millis() - 60_000))
            .unwrap();

        let workflow = OnboardingWorkflow::new("Ada");
        let ctx = ExecutionContext::new("wf-001", ledger.clone());
        let outcome = workflow.run(&ctx).unwrap();

        assert_eq!(outcome, expected_outcome());
        assert_eq!(workflow.invocations(), 2);
        assert_eq!(
            ledger.get("wf-001", "step-3").unwrap().unwrap().status(),
            StepStatus::Completed
        );
    }

    #[test]
    fn test_recent_crash_in_branch_blocks_run() {
        let ledger = Arc::new(MemoryLedger::new());
        let employee = r#"{"id":"EMP-001","name":"Ada"}"#;
        ledger
            .put_record(StepRecord::completed("wf-001", "step-1", employee, now_millis()))
            .unwrap();
        ledger
            .put_record(StepRecord::in_progress("wf-001", "step-2", now_millis()))
            .unwrap();

        let workflow = OnboardingWorkflow::new("Ada");
        let ctx = ExecutionContext::new("wf-001", ledger.clone());
        let result = workflow.run(&ctx);

        assert!(matches!(result, Err(DurableError::StepInProgress { .. })));
        assert!(result.unwrap_err().is_retryable());
        // The access branch is independent and still completes
        assert_eq!(workflow.invocations(), 1);
        assert!(ledger.get("wf-001", "step-4").unwrap().is_none());
    }

    #[test]
    fn test_branches_keep_their_ids() {
        let ledger = Arc::new(MemoryLedger::new());
        let workflow = OnboardingWorkflow::new("Ada");
        workflow
            .run(&ExecutionContext::new("wf-001", ledger.clone()))
            .unwrap();

        let output = |id: &str| {
            ledger
                .get("wf-001", id)
                .unwrap()
                .unwrap()
                .output()
                .map(str::to_string)
        };
        assert_eq!(output("step-2").as_deref(), Some("\"IT-ASSIGNED\""));
        assert_eq!(output("step-3").as_deref(), Some("\"ACCESS-PROVISIONED\""));
        assert_eq!(output("step-4").as_deref(), Some("\"ORIENTATION-SCHEDULED\""));
    }

    #[test]
    fn test_crash_plan_arming() {
        assert!(!CrashPlan::none().is_armed());
        let plan = CrashPlan {
            after: Some("step-1".to_string()),
            during: None,
        };
        assert!(plan.is_armed());
        // Checks for other steps are no-ops
        plan.check_after("step-2");
        plan.check_during("step-1");
    }
}
