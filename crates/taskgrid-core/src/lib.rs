//! Core types and error definitions for the Taskgrid scheduling engine.
//!
//! This crate provides the foundational types shared across all Taskgrid
//! crates: the task/plan data model, capability traits for external
//! collaborators, configuration knobs, and the unified error enum.
//!
//! # Main types
//!
//! - [`TaskgridError`] — Unified error enum for all Taskgrid subsystems.
//! - [`TaskgridResult`] — Convenience alias for `Result<T, TaskgridError>`.
//! - [`Task`] / [`Plan`] — The validated task-graph data model.
//! - [`ExecutionResult`] — Outcome of one executor call for one task.
//! - [`TaskExecutor`] / [`RepairService`] — External capability traits.
//! - [`OrchestratorConfig`] — Tuning knobs consumed by the orchestrator.

/// External capability traits (executor, self-healing repair).
pub mod capability;
/// Configuration knobs for the orchestrator and its components.
pub mod config;
/// Task, plan, and execution-result data model.
pub mod task;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use capability::{ExecutionResult, RepairOutcome, RepairService, TaskExecutor};
pub use config::{BreakerConfig, OrchestratorConfig, QueueConfig};
pub use task::{Complexity, Plan, Priority, Task, TaskStatus};

// --- Error types ---

/// A single structural defect found while validating a plan.
///
/// Defects are accumulated: validation reports every defective task, not
/// just the first one encountered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDefect {
    /// 1-based position of the offending task in the input list, or `None`
    /// for plan-level defects (wrong top-level shape, dependency cycles).
    pub task_index: Option<usize>,
    /// The task's declared id, when one could be read.
    pub task_id: Option<String>,
    /// Human-readable description of the defect.
    pub message: String,
}

impl PlanDefect {
    /// Create a defect attached to a specific task position.
    pub fn for_task(index: usize, id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            task_index: Some(index),
            task_id: id,
            message: message.into(),
        }
    }

    /// Create a plan-level defect not attributable to a single task.
    pub fn for_plan(message: impl Into<String>) -> Self {
        Self {
            task_index: None,
            task_id: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PlanDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.task_index, self.task_id.as_deref()) {
            (Some(idx), Some(id)) => write!(f, "task {idx} (id {id}): {}", self.message),
            (Some(idx), None) => write!(f, "task {idx}: {}", self.message),
            _ => write!(f, "plan: {}", self.message),
        }
    }
}

/// Top-level error type for the Taskgrid scheduling engine.
#[derive(Debug, thiserror::Error)]
pub enum TaskgridError {
    /// A scheduling primitive was called with malformed arguments. Fatal to
    /// the call, never retried.
    #[error("Precondition violated in {primitive}: {message}")]
    Precondition {
        /// The scheduling primitive that rejected its arguments.
        primitive: &'static str,
        /// The violated precondition.
        message: String,
    },

    /// The embedded plan data could not be parsed at all.
    #[error("Plan parse error: {0}")]
    PlanParse(String),

    /// The plan parsed but failed structural validation. Carries every
    /// defect found, never just the first.
    #[error("Plan validation failed with {} defect(s)", .0.len())]
    PlanInvalid(Vec<PlanDefect>),

    /// An executor call for a task failed. Recoverable by default.
    #[error("Executor error: {0}")]
    Executor(String),

    /// A circuit breaker is open: the dependency should not be called right
    /// now. Not evidence that the task is unrecoverable.
    #[error("Circuit '{name}' is open, retry in {retry_in:?}")]
    CircuitOpen {
        /// Name of the open breaker.
        name: String,
        /// Remaining cooldown before the breaker will probe again.
        retry_in: Duration,
    },

    /// An operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The run was cancelled via its cancellation signal.
    #[error("Run cancelled")]
    Cancelled,

    /// An internal orchestrator error.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaskgridError {
    /// Whether a failed task may be retried after this error.
    ///
    /// Circuit-open means "not right now", timeouts and executor failures
    /// may be transient. Precondition and validation failures never are,
    /// and a cancelled run retries nothing.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskgridError::Executor(_)
                | TaskgridError::CircuitOpen { .. }
                | TaskgridError::Timeout(_)
        )
    }
}

/// A convenience `Result` alias using [`TaskgridError`].
pub type TaskgridResult<T> = Result<T, TaskgridError>;
