//! Sample Workflows
//!
//! Business workflows used by the CLI to demonstrate crash recovery.

pub mod onboarding;

pub use onboarding::{CrashPlan, Employee, OnboardingOutcome, OnboardingWorkflow, CRASH_EXIT_CODE};
