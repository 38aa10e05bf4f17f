use crate::TaskgridResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of one executor call for one task.
///
/// Produced when the call finishes and owned by the bounded result store
/// thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Id of the task this result belongs to.
    pub task_id: String,
    /// The executor role that ran the task.
    pub agent: String,
    /// Whether the task finished successfully.
    pub success: bool,
    /// The result payload (empty on failure).
    pub output: String,
    /// Error text when the task failed.
    pub error: Option<String>,
    /// Wall-clock duration of the executor call.
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Build a successful result.
    pub fn success(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        output: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            success: true,
            output: output.into(),
            error: None,
            duration_ms,
        }
    }

    /// Build a failed result.
    pub fn failure(
        task_id: impl Into<String>,
        agent: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent: agent.into(),
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// The external capability that performs a task's work.
///
/// The scheduling core never inspects executor internals: it only wraps
/// calls in a circuit breaker and a per-task timeout. Implementations may be
/// arbitrarily slow and may fail.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one task and return its output, or an error describing why it
    /// could not be completed.
    async fn execute(
        &self,
        agent: &str,
        description: &str,
        context: Option<&str>,
    ) -> TaskgridResult<String>;
}

/// Final outcome of a self-healing repair pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairOutcome {
    /// The full result set after repair, replacing the pre-repair set.
    pub results: Vec<ExecutionResult>,
    /// Whether the repair collaborator considers the run healed.
    pub success: bool,
    /// How many repair cycles the collaborator performed.
    pub cycles: u32,
}

/// The self-healing collaborator, invoked only when unrecovered task
/// failures remain after normal execution.
#[async_trait]
pub trait RepairService: Send + Sync {
    /// Attempt to repair the failed portion of a run.
    ///
    /// Receives the original objective, the full result set, and an upper
    /// bound on repair cycles; returns the final result set, a success
    /// flag, and the number of cycles actually performed.
    async fn repair(
        &self,
        objective: &str,
        results: &[ExecutionResult],
        max_cycles: u32,
    ) -> TaskgridResult<RepairOutcome>;
}
