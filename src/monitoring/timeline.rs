//! Execution Timeline
//!
//! Records what the execution context decided for each step during one
//! process lifetime: ran it, replayed it from the ledger, or rejected it
//! because a live lease was held elsewhere.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Write-ahead record written, action about to run
    Started,
    /// Action returned and its output was recorded
    Completed,
    /// Action returned an error
    Failed,
    /// Output served from a completed ledger record
    Replayed,
    /// Refused because another execution holds a fresh lease
    Rejected,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub step_id: String,
    pub event_type: EventType,
    /// Offset from the start of the timeline
    pub offset: Duration,
}

/// Step decisions of one execution context, in the order they happened.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a step.
    pub fn add_event(&mut self, step_id: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            step_id: step_id.into(),
            event_type,
            offset: self.start_time.elapsed(),
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Number of events of the given type.
    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Step ids that produced an event of the given type, in order.
    pub fn steps_with(&self, event_type: EventType) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .map(|e| e.step_id.as_str())
            .collect()
    }

    /// Durations of steps whose action ran to completion or failure.
    pub fn durations(&self) -> HashMap<String, Duration> {
        let mut starts: HashMap<&str, Duration> = HashMap::new();
        let mut durations = HashMap::new();

        for event in &self.events {
            match event.event_type {
                EventType::Started => {
                    starts.insert(event.step_id.as_str(), event.offset);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(start) = starts.get(event.step_id.as_str()) {
                        durations.insert(event.step_id.clone(), event.offset.saturating_sub(*start));
                    }
                }
                EventType::Replayed | EventType::Rejected => {}
            }
        }

        durations
    }

    /// One-line summary of step decisions.
    pub fn summary(&self) -> String {
        format!(
            "executed: {}, replayed: {}, failed: {}, rejected: {}",
            self.count(EventType::Completed),
            self.count(EventType::Replayed),
            self.count(EventType::Failed),
            self.count(EventType::Rejected)
        )
    }

    /// Renders an ASCII Gantt chart of the steps that executed.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total = self
            .events
            .iter()
            .map(|e| e.offset)
            .max()
            .unwrap_or_default()
            .as_millis();

        let mut spans: Vec<(&str, u128, u128)> = Vec::new();
        for event in &self.events {
            if event.event_type != EventType::Started {
                continue;
            }
            let end = self.events.iter().find(|e| {
                e.step_id == event.step_id
                    && matches!(e.event_type, EventType::Completed | EventType::Failed)
                    && e.offset >= event.offset
            });
            if let Some(end) = end {
                spans.push((event.step_id.as_str(), event.offset.as_millis(), end.offset.as_millis()));
            }
        }

        if spans.is_empty() || total == 0 {
            output.push_str("(no steps executed)\n");
            return output;
        }

        let scale = 50.0 / total as f64;
        for (step_id, start, end) in spans {
            let start_pos = (start as f64 * scale) as usize;
            let width = (((end - start) as f64) * scale).max(1.0) as usize;

            output.push_str(&format!(
                "{:14} |{}{}| ({} ms)\n",
                truncate(step_id, 14),
                " ".repeat(start_pos),
                "#".repeat(width),
                end - start
            ));
        }

        for step_id in self.steps_with(EventType::Replayed) {
            output.push_str(&format!("{:14} (replayed)\n", truncate(step_id, 14)));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total));
        output
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(2)).collect();
        format!("{}..", head)
    }
}
