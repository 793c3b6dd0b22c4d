use crate::records::{CampaignClickRow, GameEventRow, RecordSet, UserCampaignSummary};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub usize);

/// The steps of a marketing pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ExtractEvents,
    ExtractCampaigns,
    Transform,
    Load,
}

impl TaskKind {
    /// Stable task name used in logs and the graph view.
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::ExtractEvents => "extract_events",
            TaskKind::ExtractCampaigns => "extract_campaigns",
            TaskKind::Transform => "transform",
            TaskKind::Load => "load",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TaskKind::ExtractEvents => "Read game session events",
            TaskKind::ExtractCampaigns => "Read campaign clicks",
            TaskKind::Transform => "Clean, aggregate per user and join onto clicks",
            TaskKind::Load => "Replace the summary table",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How often a failed task is retried and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default: 1)
    pub retries: u32,
    /// Wait before each retry (default: 5 minutes)
    pub delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        RetryPolicy {
            retries: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 1,
            delay: Duration::from_secs(300),
        }
    }
}

/// Task in the pipeline graph
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Unique identifier for this task
    pub id: TaskId,
    pub kind: TaskKind,
    pub retry: RetryPolicy,
}

impl Task {
    pub fn new(id: TaskId, kind: TaskKind, retry: RetryPolicy) -> Self {
        Task { id, kind, retry }
    }
}

/// Result handed from a task to its children
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    GameEvents(RecordSet<GameEventRow>),
    CampaignClicks(RecordSet<CampaignClickRow>),
    Summary(Vec<UserCampaignSummary>),
    /// Number of rows written
    Loaded(usize),
}

impl TaskOutput {
    pub fn as_game_events(&self) -> Option<&RecordSet<GameEventRow>> {
        match self {
            TaskOutput::GameEvents(records) => Some(records),
            _ => None,
        }
    }

    pub fn as_campaign_clicks(&self) -> Option<&RecordSet<CampaignClickRow>> {
        match self {
            TaskOutput::CampaignClicks(records) => Some(records),
            _ => None,
        }
    }

    pub fn as_summary(&self) -> Option<&[UserCampaignSummary]> {
        match self {
            TaskOutput::Summary(rows) => Some(rows),
            _ => None,
        }
    }

    /// Record count for logging.
    pub fn len(&self) -> usize {
        match self {
            TaskOutput::GameEvents(records) => records.len(),
            TaskOutput::CampaignClicks(records) => records.len(),
            TaskOutput::Summary(rows) => rows.len(),
            TaskOutput::Loaded(count) => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_names() {
        assert_eq!(TaskKind::ExtractEvents.name(), "extract_events");
        assert_eq!(TaskKind::ExtractCampaigns.to_string(), "extract_campaigns");
        assert_eq!(
            serde_json::to_string(&TaskKind::Transform).unwrap(),
            "\"transform\""
        );
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 1);
        assert_eq!(policy.delay, Duration::from_secs(300));
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }

    #[test]
    fn test_output_accessors() {
        let output = TaskOutput::Summary(Vec::new());
        assert!(output.as_summary().is_some());
        assert!(output.as_game_events().is_none());
        assert!(output.is_empty());
        assert_eq!(TaskOutput::Loaded(3).len(), 3);
    }
}
