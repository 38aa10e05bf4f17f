use std::cmp::Ordering;
use std::collections::HashSet;
use taskgrid_core::{Priority, QueueConfig, Task, TaskStatus, TaskgridError, TaskgridResult};
use tracing::debug;

/// Dependency-aware, priority-ordered task queue.
///
/// An alternative scheduling structure for callers that do not need a full
/// parallel-group plan: tasks are yielded one at a time (or in bounded
/// batches) in priority order, and repeatedly-failing tasks are demoted so
/// they stop starving healthy work.
pub struct PriorityQueue {
    config: QueueConfig,
    /// Kept sorted by [`compare`]; re-sorted after every insertion.
    tasks: Vec<Task>,
    completed: HashSet<String>,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl PriorityQueue {
    /// Create an empty queue with the given retry/demotion thresholds.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            tasks: Vec::new(),
            completed: HashSet::new(),
        }
    }

    /// Insert a task, replacing any queued task with the same id.
    pub fn add(&mut self, task: Task) -> TaskgridResult<()> {
        if task.id.trim().is_empty() {
            return Err(TaskgridError::Precondition {
                primitive: "queue.add",
                message: "task id must not be empty".to_string(),
            });
        }
        self.tasks.retain(|t| t.id != task.id);
        self.tasks.push(task);
        self.tasks.sort_by(compare);
        Ok(())
    }

    /// Insert a batch of tasks.
    pub fn add_all(&mut self, tasks: Vec<Task>) -> TaskgridResult<()> {
        for task in tasks {
            self.add(task)?;
        }
        Ok(())
    }

    /// Take the highest-priority ready task, marking it running.
    pub fn get_next(&mut self) -> Option<Task> {
        let completed = &self.completed;
        let idx = self.tasks.iter().position(|t| t.is_ready(completed))?;
        self.tasks[idx].status = TaskStatus::Running;
        Some(self.tasks[idx].clone())
    }

    /// Take up to `max` ready tasks in priority order, marking each running.
    pub fn get_all_executable(&mut self, max: usize) -> TaskgridResult<Vec<Task>> {
        if max == 0 {
            return Err(TaskgridError::Precondition {
                primitive: "queue.get_all_executable",
                message: "max must be at least 1".to_string(),
            });
        }
        let completed = &self.completed;
        let mut batch = Vec::new();
        for task in &mut self.tasks {
            if batch.len() == max {
                break;
            }
            if task.is_ready(completed) {
                task.status = TaskStatus::Running;
                batch.push(task.clone());
            }
        }
        Ok(batch)
    }

    /// Mark a task complete, removing it and unblocking its dependents.
    pub fn complete(&mut self, id: &str) {
        self.tasks.retain(|t| t.id != id);
        self.completed.insert(id.to_string());
    }

    /// Record a task failure.
    ///
    /// With `requeue`, the retry count is incremented, the priority demoted
    /// past the configured thresholds, and the task re-inserted as pending.
    /// Without it, the failure is permanent: the task leaves the queue and
    /// its id counts as completed so dependents are not stranded.
    pub fn fail(&mut self, mut task: Task, requeue: bool) -> TaskgridResult<()> {
        if !requeue {
            debug!(task_id = %task.id, "task failed permanently");
            self.tasks.retain(|t| t.id != task.id);
            self.completed.insert(task.id);
            return Ok(());
        }

        task.retry_count += 1;
        if task.retry_count >= self.config.floor_after {
            task.priority = Priority::Low;
        } else if task.retry_count >= self.config.demote_after {
            task.priority = task.priority.demoted();
        }
        task.status = TaskStatus::Pending;
        debug!(
            task_id = %task.id,
            retry = task.retry_count,
            priority = %task.priority,
            "task requeued"
        );
        self.add(task)
    }

    /// Number of tasks still queued.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no tasks remain queued.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of ids recorded as completed (including permanent failures).
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Number of queued tasks still pending.
    pub fn pending_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }
}

/// Queue ordering: priority weight first, then earlier deadline
/// (deadline-less tasks sort last), then fewer dependencies, then lower
/// retry count.
fn compare(a: &Task, b: &Task) -> Ordering {
    b.priority
        .weight()
        .cmp(&a.priority.weight())
        .then_with(|| match (a.deadline, b.deadline) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.dependencies.len().cmp(&b.dependencies.len()))
        .then_with(|| a.retry_count.cmp(&b.retry_count))
}
