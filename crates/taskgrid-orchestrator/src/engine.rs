use crate::breaker::BreakerRegistry;
use crate::plan::PlanParser;
use crate::resolver::GroupResolver;
use crate::store::BoundedStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use taskgrid_core::{
    ExecutionResult, OrchestratorConfig, Plan, RepairService, TaskExecutor, TaskStatus,
    TaskgridError, TaskgridResult,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Final report of one orchestration run.
///
/// A run completes fully, completes partially with `interrupted` set, or —
/// only when the plan itself cannot be parsed or validated — fails before
/// any execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// The plan's objective, echoed back.
    pub objective: String,
    /// Results in completion order (post-repair when repair ran).
    pub results: Vec<ExecutionResult>,
    /// Total tasks in the validated plan.
    pub total_tasks: usize,
    /// Tasks that finished successfully.
    pub completed_tasks: usize,
    /// Tasks that failed permanently.
    pub failed_tasks: usize,
    /// Whether the run was cut short by cancellation or the total timeout.
    pub interrupted: bool,
    /// Repair cycles performed by the self-healing collaborator.
    pub repair_cycles: u32,
    /// Whether self-healing reported the run healed.
    pub repaired: bool,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
}

/// The orchestration engine: validate → resolve-and-claim → dispatch →
/// record → repeat, then hand remaining failures to self-healing.
///
/// All registries (breakers, claims) are owned by the engine instance, so
/// independent orchestrations in one process stay fully isolated.
pub struct Orchestrator {
    config: OrchestratorConfig,
    executor: Arc<dyn TaskExecutor>,
    repair: Option<Arc<dyn RepairService>>,
    parser: PlanParser,
    resolver: GroupResolver,
    breakers: BreakerRegistry,
    store: BoundedStore,
    limiter: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an engine around the given executor capability.
    pub fn new(
        config: OrchestratorConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> TaskgridResult<Self> {
        if config.max_concurrency == 0 {
            return Err(TaskgridError::Precondition {
                primitive: "orchestrator.new",
                message: "max_concurrency must be at least 1".to_string(),
            });
        }
        let store = BoundedStore::new(config.max_stored_results, config.result_ttl)?;
        Ok(Self {
            limiter: Arc::new(Semaphore::new(config.max_concurrency)),
            breakers: BreakerRegistry::new(config.breaker.clone()),
            parser: PlanParser::new(),
            resolver: GroupResolver::new(),
            cancel: CancellationToken::new(),
            store,
            config,
            executor,
            repair: None,
        })
    }

    /// Attach the self-healing collaborator.
    pub fn with_repair(mut self, repair: Arc<dyn RepairService>) -> Self {
        self.repair = Some(repair);
        self
    }

    /// Request cancellation of in-flight runs. Idempotent: calling twice
    /// has the same observable effect as calling once.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The circuit-breaker registry, for stats retrieval and bulk reset.
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Live results currently retained by the bounded store.
    pub async fn stored_results(&self) -> Vec<ExecutionResult> {
        self.store.values().await
    }

    /// Run a full orchestration over raw plan input.
    ///
    /// Parse and validation failures are fatal and surface as errors; after
    /// validation the run always resolves to a report — cancellation and
    /// timeouts yield the best partial result set with `interrupted` set.
    pub async fn execute(&self, raw_plan: &str) -> TaskgridResult<OrchestrationReport> {
        let started = Instant::now();
        let mut plan = self.parser.parse(raw_plan)?;
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            tasks = plan.tasks.len(),
            objective = %plan.objective,
            "starting orchestration run"
        );

        let token = self.cancel.child_token();
        let timer = {
            let token = token.clone();
            let ceiling = self.config.total_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(ceiling).await;
                warn!("total run timeout exceeded, cancelling outstanding work");
                token.cancel();
            })
        };

        let mut completed: HashSet<String> = HashSet::new();
        let mut interrupted = self.run_groups(&mut plan, &mut completed, &token).await;

        let mut repair_cycles = 0;
        let mut repaired = false;
        let failed_before_repair = count_failed(&plan);
        if !interrupted && failed_before_repair > 0 {
            if let Some(repair) = &self.repair {
                (repair_cycles, repaired, interrupted) = self
                    .run_repair(&mut plan, Arc::clone(repair), &token, failed_before_repair)
                    .await;
            }
        }
        timer.abort();

        let completed_tasks = plan
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        let failed_tasks = count_failed(&plan);

        if !interrupted && failed_tasks > 0 && !self.config.accept_partial {
            return Err(TaskgridError::Orchestrator(format!(
                "{failed_tasks} task(s) failed after repair was exhausted"
            )));
        }

        let report = OrchestrationReport {
            run_id,
            objective: plan.objective.clone(),
            results: self.store.values().await,
            total_tasks: plan.tasks.len(),
            completed_tasks,
            failed_tasks,
            interrupted,
            repair_cycles,
            repaired,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            %run_id,
            completed = report.completed_tasks,
            failed = report.failed_tasks,
            interrupted = report.interrupted,
            duration_ms = report.duration_ms,
            "orchestration run finished"
        );
        Ok(report)
    }

    /// Resolve-and-claim groups until nothing is ready, dispatching each
    /// group concurrently. Returns whether the run was interrupted.
    async fn run_groups(
        &self,
        plan: &mut Plan,
        completed: &mut HashSet<String>,
        token: &CancellationToken,
    ) -> bool {
        loop {
            if token.is_cancelled() {
                return true;
            }
            let Some(group) = self.resolver.next_group(plan, completed).await else {
                return false;
            };
            debug!(group_size = group.len(), "dispatching parallel group");

            let mut in_flight = JoinSet::new();
            for id in &group {
                let Some(task) = plan.task_mut(id) else {
                    continue;
                };
                task.status = TaskStatus::Running;
                let task = task.clone();
                let executor = Arc::clone(&self.executor);
                let breaker = self.breakers.breaker(&task.agent).await;
                let limiter = Arc::clone(&self.limiter);
                let token = token.clone();
                let task_timeout = self.config.task_timeout;

                in_flight.spawn(async move {
                    let started = Instant::now();
                    let permit = tokio::select! {
                        permit = limiter.acquire_owned() => permit,
                        () = token.cancelled() => {
                            return (task, Err(TaskgridError::Cancelled), 0);
                        }
                    };
                    let _permit = match permit {
                        Ok(p) => p,
                        Err(_) => return (task, Err(TaskgridError::Cancelled), 0),
                    };

                    debug!(task_id = %task.id, agent = %task.agent, "dispatching task");
                    let call = breaker.execute(|| async {
                        match tokio::time::timeout(
                            task_timeout,
                            executor.execute(&task.agent, &task.description, task.context.as_deref()),
                        )
                        .await
                        {
                            Ok(outcome) => outcome,
                            Err(_) => Err(TaskgridError::Timeout(format!(
                                "task {} exceeded {task_timeout:?}",
                                task.id
                            ))),
                        }
                    });
                    let outcome = tokio::select! {
                        outcome = call => outcome,
                        () = token.cancelled() => Err(TaskgridError::Cancelled),
                    };
                    let elapsed = started.elapsed().as_millis() as u64;
                    (task, outcome, elapsed)
                });
            }

            // Record in completion order, not submission order.
            let mut cancelled = false;
            while let Some(joined) = in_flight.join_next().await {
                let Ok((task, outcome, elapsed)) = joined else {
                    continue;
                };
                match outcome {
                    Ok(output) => {
                        info!(task_id = %task.id, agent = %task.agent, elapsed_ms = elapsed, "task completed");
                        self.store
                            .set(
                                &task.id,
                                ExecutionResult::success(&task.id, &task.agent, output, elapsed),
                            )
                            .await;
                        if let Some(t) = plan.task_mut(&task.id) {
                            t.status = TaskStatus::Completed;
                        }
                        completed.insert(task.id.clone());
                        self.resolver.complete(&task.id).await;
                    }
                    Err(TaskgridError::Cancelled) => {
                        cancelled = true;
                        self.resolver.release(&task.id).await;
                        if let Some(t) = plan.task_mut(&task.id) {
                            t.status = TaskStatus::Pending;
                        }
                    }
                    Err(err) => {
                        let retries = plan.task(&task.id).map(|t| t.retry_count).unwrap_or(0);
                        if err.is_retryable() && retries < self.config.max_task_retries {
                            warn!(
                                task_id = %task.id,
                                error = %err,
                                retry = retries + 1,
                                "task failed, releasing claim for retry"
                            );
                            if let Some(t) = plan.task_mut(&task.id) {
                                t.retry_count += 1;
                                t.status = TaskStatus::Pending;
                            }
                            self.resolver.release(&task.id).await;
                        } else {
                            error!(task_id = %task.id, error = %err, "task failed permanently");
                            self.store
                                .set(
                                    &task.id,
                                    ExecutionResult::failure(
                                        &task.id,
                                        &task.agent,
                                        err.to_string(),
                                        elapsed,
                                    ),
                                )
                                .await;
                            if let Some(t) = plan.task_mut(&task.id) {
                                t.status = TaskStatus::Failed {
                                    reason: err.to_string(),
                                };
                            }
                            // permanent failure unblocks dependents
                            completed.insert(task.id.clone());
                            self.resolver.complete(&task.id).await;
                        }
                    }
                }
            }

            if cancelled || token.is_cancelled() {
                return true;
            }
        }
    }

    /// Hand the failed portion of the run to the self-healing collaborator.
    /// Returns (repair cycles, healed flag, interrupted flag).
    async fn run_repair(
        &self,
        plan: &mut Plan,
        repair: Arc<dyn RepairService>,
        token: &CancellationToken,
        failed: usize,
    ) -> (u32, bool, bool) {
        info!(failed, "invoking self-healing repair");
        let results = self.store.values().await;
        let call = repair.repair(&plan.objective, &results, self.config.max_repair_cycles);
        let outcome = tokio::select! {
            outcome = call => outcome,
            () = token.cancelled() => Err(TaskgridError::Cancelled),
        };

        match outcome {
            Ok(outcome) => {
                info!(
                    cycles = outcome.cycles,
                    success = outcome.success,
                    "self-healing repair finished"
                );
                for result in &outcome.results {
                    self.store.set(&result.task_id, result.clone()).await;
                    if result.success {
                        if let Some(t) = plan.task_mut(&result.task_id) {
                            t.status = TaskStatus::Completed;
                        }
                    }
                }
                (outcome.cycles, outcome.success, false)
            }
            Err(TaskgridError::Cancelled) => (0, false, true),
            Err(err) => {
                warn!(error = %err, "self-healing repair failed");
                (0, false, false)
            }
        }
    }
}

fn count_failed(plan: &Plan) -> usize {
    plan.tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Failed { .. }))
        .count()
}
