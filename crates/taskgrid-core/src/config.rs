use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds and cooldown for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Consecutive successes while half-open before the breaker closes.
    pub success_threshold: u32,
    /// How long an open breaker waits before probing again.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Retry and demotion thresholds for the priority queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Retry count at which a requeued task is demoted one priority tier.
    pub demote_after: u32,
    /// Retry count at which a requeued task is forced to the lowest tier.
    pub floor_after: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            demote_after: 2,
            floor_after: 3,
        }
    }
}

/// Tuning knobs for an orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Deadline for a single executor call.
    pub task_timeout: Duration,
    /// Ceiling for a whole run; exceeding it cancels outstanding work and
    /// returns partial results.
    pub total_timeout: Duration,
    /// Maximum number of executor calls in flight at once.
    pub max_concurrency: usize,
    /// Capacity of the bounded result store.
    pub max_stored_results: usize,
    /// Age past which a stored result is no longer returned.
    pub result_ttl: Duration,
    /// Times a failed task is re-claimed before it is marked permanently
    /// failed.
    pub max_task_retries: u32,
    /// Whether a run with unrecovered failures still counts as (partial)
    /// success after repair is exhausted.
    pub accept_partial: bool,
    /// Upper bound on repair cycles requested from the self-healing
    /// collaborator.
    pub max_repair_cycles: u32,
    /// Circuit-breaker thresholds for executor dependencies.
    pub breaker: BreakerConfig,
    /// Priority-queue retry/demotion thresholds.
    pub queue: QueueConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(60),
            total_timeout: Duration::from_secs(600),
            max_concurrency: 4,
            max_stored_results: 100,
            result_ttl: Duration::from_secs(3600),
            max_task_retries: 2,
            accept_partial: true,
            max_repair_cycles: 3,
            breaker: BreakerConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}
