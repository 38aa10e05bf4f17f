use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Priority tier of a task. Higher tiers are scheduled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Must run as soon as its dependencies allow.
    Critical,
    /// Important work, scheduled before the default tier.
    High,
    /// The default tier for tasks that declare no priority.
    Medium,
    /// Background work and repeatedly-failing tasks.
    Low,
}

impl Priority {
    /// Numeric weight used for queue ordering (higher runs first).
    pub fn weight(self) -> u8 {
        match self {
            Priority::Critical => 4,
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }

    /// The next tier down; [`Priority::Low`] demotes to itself.
    pub fn demoted(self) -> Priority {
        match self {
            Priority::Critical => Priority::High,
            Priority::High => Priority::Medium,
            Priority::Medium | Priority::Low => Priority::Low,
        }
    }

    /// Parse the lowercase tier names used in plan input.
    pub fn parse(s: &str) -> Option<Priority> {
        match s {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Status of a task in the scheduling lifecycle.
///
/// Tasks are never deleted, only marked terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet claimed by any scheduling call.
    Pending,
    /// Claimed and dispatched to an executor.
    Running,
    /// Finished successfully. Terminal.
    Completed,
    /// Failed permanently. Terminal.
    Failed {
        /// Why the task failed.
        reason: String,
    },
}

/// Complexity classification of a plan, as reported by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Few tasks, little coordination.
    Simple,
    /// The default classification.
    Moderate,
    /// Many interdependent tasks.
    Complex,
}

impl Default for Complexity {
    fn default() -> Self {
        Complexity::Moderate
    }
}

impl Complexity {
    /// Parse the lowercase classification names used in plan input.
    /// Unknown values fall back to [`Complexity::Moderate`].
    pub fn parse(s: &str) -> Complexity {
        match s {
            "simple" => Complexity::Simple,
            "complex" => Complexity::Complex,
            _ => Complexity::Moderate,
        }
    }
}

/// One unit of work in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Identifier, unique within its plan. Normalized to a string even when
    /// the plan input used numbers.
    pub id: String,
    /// The executor role assigned to this task.
    pub agent: String,
    /// What the task is supposed to do.
    pub description: String,
    /// Ids of tasks that must complete before this one may run.
    pub dependencies: Vec<String>,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Scheduling tier.
    pub priority: Priority,
    /// Number of times this task has been retried after a failure.
    pub retry_count: u32,
    /// Optional extra context handed to the executor verbatim.
    pub context: Option<String>,
    /// Optional deadline used as a queue-ordering tie-breaker.
    pub deadline: Option<DateTime<Utc>>,
    /// When the task was created at plan parse.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task with default priority and no dependencies.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            description: description.into(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            priority: Priority::default(),
            retry_count: 0,
            context: None,
            deadline: None,
            created_at: Utc::now(),
        }
    }

    /// Set the dependency list.
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Set the priority tier.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the deadline.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the executor context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Whether this task is pending and all of its dependencies are in
    /// `completed`.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.status == TaskStatus::Pending
            && self.dependencies.iter().all(|dep| completed.contains(dep))
    }

    /// Whether the task has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed { .. }
        )
    }
}

/// A validated task graph with parallel-group hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// The overall objective this plan works toward.
    pub objective: String,
    /// Planner-reported complexity classification.
    pub complexity: Complexity,
    /// The tasks, in input order.
    pub tasks: Vec<Task>,
    /// Declared sets of task ids intended to be dispatched together.
    pub parallel_groups: Vec<Vec<String>>,
    /// Planner-reported time estimate, passed through verbatim.
    pub estimated_time: Option<String>,
}

impl Plan {
    /// Look up a task by id.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Mutable lookup by id.
    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Whether every task has reached a terminal status.
    pub fn is_done(&self) -> bool {
        self.tasks.iter().all(Task::is_terminal)
    }
}
