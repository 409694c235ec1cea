//! Monitoring Module
//!
//! Tracks the per-step decisions made during a workflow run.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Step events and timing for run reports

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
