//! End-to-end orchestration runs against scripted executor and repair
//! capabilities.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskgrid_core::{
    ExecutionResult, OrchestratorConfig, RepairOutcome, RepairService, TaskExecutor,
    TaskgridError, TaskgridResult,
};
use taskgrid_orchestrator::Orchestrator;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Executor whose behavior is scripted per task description.
struct ScriptedExecutor {
    calls: AtomicU32,
    /// Descriptions that always fail with an executor error.
    failing: HashSet<String>,
    /// Extra latency applied to every call.
    delay: Duration,
    /// Completion order of successful calls.
    log: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            failing: HashSet::new(),
            delay: Duration::ZERO,
            log: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(mut self, description: &str) -> Self {
        self.failing.insert(description.to_string());
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn completion_order(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _agent: &str,
        description: &str,
        _context: Option<&str>,
    ) -> TaskgridResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(description) {
            return Err(TaskgridError::Executor(format!("scripted failure: {description}")));
        }
        self.log.lock().unwrap().push(description.to_string());
        Ok(format!("ok: {description}"))
    }
}

/// Repair collaborator that marks every failed result successful.
struct HealingRepair {
    calls: AtomicU32,
}

impl HealingRepair {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RepairService for HealingRepair {
    async fn repair(
        &self,
        _objective: &str,
        results: &[ExecutionResult],
        max_cycles: u32,
    ) -> TaskgridResult<RepairOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(max_cycles >= 1);
        let healed = results
            .iter()
            .map(|r| {
                if r.success {
                    r.clone()
                } else {
                    ExecutionResult::success(&r.task_id, &r.agent, "healed", r.duration_ms)
                }
            })
            .collect();
        Ok(RepairOutcome {
            results: healed,
            success: true,
            cycles: 1,
        })
    }
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        task_timeout: Duration::from_secs(2),
        total_timeout: Duration::from_secs(10),
        ..OrchestratorConfig::default()
    }
}

const DIAMOND_PLAN: &str = r#"{
    "objective": "build and verify",
    "complexity": "moderate",
    "tasks": [
        {"id": 1, "task": "gather requirements", "agent": "analyst"},
        {"id": 2, "task": "write code", "agent": "coder", "dependencies": [1]},
        {"id": 3, "task": "write docs", "agent": "writer", "dependencies": [1]},
        {"id": 4, "task": "run tests", "agent": "tester", "dependencies": [2, 3]}
    ]
}"#;

#[tokio::test]
async fn test_full_pipeline_respects_dependency_order() {
    init_tracing();
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = Orchestrator::new(fast_config(), Arc::clone(&executor) as _).unwrap();

    let report = orchestrator.execute(DIAMOND_PLAN).await.unwrap();

    assert_eq!(report.total_tasks, 4);
    assert_eq!(report.completed_tasks, 4);
    assert_eq!(report.failed_tasks, 0);
    assert!(!report.interrupted);
    assert_eq!(report.results.len(), 4);
    assert!(report.results.iter().all(|r| r.success));
    assert_eq!(executor.calls(), 4);

    let order = executor.completion_order();
    let pos = |d: &str| order.iter().position(|x| x == d).unwrap();
    assert!(pos("gather requirements") < pos("write code"));
    assert!(pos("gather requirements") < pos("write docs"));
    assert!(pos("run tests") > pos("write code"));
    assert!(pos("run tests") > pos("write docs"));
}

#[tokio::test]
async fn test_markdown_fenced_plan_is_accepted() {
    init_tracing();
    let raw = "```json\n[{\"id\": 1, \"task\": \"only step\"}]\n```";
    let orchestrator =
        Orchestrator::new(fast_config(), Arc::new(ScriptedExecutor::new())).unwrap();

    let report = orchestrator.execute(raw).await.unwrap();
    assert_eq!(report.completed_tasks, 1);
    assert_eq!(report.results[0].agent, "general");
}

#[tokio::test]
async fn test_invalid_plan_never_reaches_the_executor() {
    init_tracing();
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator = Orchestrator::new(fast_config(), Arc::clone(&executor) as _).unwrap();

    let err = orchestrator
        .execute(r#"[{"id": 1, "task": "a", "dependencies": [7]}, {"id": 2}]"#)
        .await
        .unwrap_err();

    match err {
        TaskgridError::PlanInvalid(defects) => assert_eq!(defects.len(), 2),
        other => panic!("expected PlanInvalid, got {other}"),
    }
    assert_eq!(executor.calls(), 0);
}

#[tokio::test]
async fn test_cancellation_yields_partial_results() {
    init_tracing();
    let executor = Arc::new(ScriptedExecutor::new().with_delay(Duration::from_millis(100)));
    let orchestrator = Arc::new(
        Orchestrator::new(fast_config(), Arc::clone(&executor) as _).unwrap(),
    );

    let raw = r#"[
        {"id": 1, "task": "first"},
        {"id": 2, "task": "second", "dependencies": [1]},
        {"id": 3, "task": "third", "dependencies": [2]}
    ]"#;

    let runner = Arc::clone(&orchestrator);
    let run = tokio::spawn(async move { runner.execute(raw).await });

    // let the first task finish, then cancel mid-run
    tokio::time::sleep(Duration::from_millis(150)).await;
    orchestrator.cancel();
    orchestrator.cancel(); // idempotent

    let report = run.await.unwrap().unwrap();
    assert!(report.interrupted);
    assert!(report.completed_tasks >= 1);
    assert!(report.completed_tasks < 3);
    // partial results for whatever did finish are preserved
    assert_eq!(report.results.len(), report.completed_tasks);
}

#[tokio::test]
async fn test_total_timeout_interrupts_the_run() {
    init_tracing();
    let executor = Arc::new(ScriptedExecutor::new().with_delay(Duration::from_millis(100)));
    let config = OrchestratorConfig {
        task_timeout: Duration::from_secs(2),
        total_timeout: Duration::from_millis(150),
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(config, Arc::clone(&executor) as _).unwrap();

    let raw = r#"[
        {"id": 1, "task": "first"},
        {"id": 2, "task": "second", "dependencies": [1]},
        {"id": 3, "task": "third", "dependencies": [2]}
    ]"#;

    let report = orchestrator.execute(raw).await.unwrap();
    assert!(report.interrupted);
    assert!(report.completed_tasks < 3);
}

#[tokio::test]
async fn test_slow_task_times_out_and_fails() {
    init_tracing();
    let executor = Arc::new(ScriptedExecutor::new().with_delay(Duration::from_millis(200)));
    let config = OrchestratorConfig {
        task_timeout: Duration::from_millis(50),
        total_timeout: Duration::from_secs(10),
        max_task_retries: 0,
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(config, Arc::clone(&executor) as _).unwrap();

    let report = orchestrator
        .execute(r#"[{"id": 1, "task": "slow step"}]"#)
        .await
        .unwrap();

    assert!(!report.interrupted);
    assert_eq!(report.failed_tasks, 1);
    assert_eq!(report.results.len(), 1);
    assert!(!report.results[0].success);
    assert!(report.results[0].error.as_deref().unwrap().contains("exceeded"));
}

#[tokio::test]
async fn test_retries_then_permanent_failure_then_repair() {
    init_tracing();
    let executor = Arc::new(ScriptedExecutor::new().failing_on("flaky step"));
    let repair = Arc::new(HealingRepair::new());
    let config = OrchestratorConfig {
        max_task_retries: 1,
        ..fast_config()
    };
    let orchestrator = Orchestrator::new(config, Arc::clone(&executor) as _)
        .unwrap()
        .with_repair(Arc::clone(&repair) as _);

    let raw = r#"[
        {"id": 1, "task": "solid step"},
        {"id": 2, "task": "flaky step"}
    ]"#;
    let report = orchestrator.execute(raw).await.unwrap();

    // one initial attempt plus one retry for the flaky task
    assert_eq!(executor.calls(), 3);
    assert_eq!(repair.calls.load(Ordering::SeqCst), 1);
    assert!(report.repaired);
    assert_eq!(report.repair_cycles, 1);
    assert_eq!(report.completed_tasks, 2);
    assert_eq!(report.failed_tasks, 0);
    assert!(report.results.iter().all(|r| r.success));
}

#[tokio::test]
async fn test_permanent_failure_without_repair_is_partial() {
    init_tracing();
    let executor = Arc::new(ScriptedExecutor::new().failing_on("doomed step"));
    let config = OrchestratorConfig {
        max_task_retries: 0,
        ..fast_config()
    };
    let orchestrator = Orchestrator::new(config, Arc::clone(&executor) as _).unwrap();

    let raw = r#"[
        {"id": 1, "task": "good step"},
        {"id": 2, "task": "doomed step"},
        {"id": 3, "task": "dependent step", "dependencies": [2]}
    ]"#;
    let report = orchestrator.execute(raw).await.unwrap();

    assert!(!report.interrupted);
    assert_eq!(report.failed_tasks, 1);
    // the dependent of a permanently failed task still runs
    assert_eq!(report.completed_tasks, 2);
    assert_eq!(report.results.len(), 3);
}

#[tokio::test]
async fn test_strict_mode_rejects_partial_completion() {
    init_tracing();
    let executor = Arc::new(ScriptedExecutor::new().failing_on("doomed step"));
    let config = OrchestratorConfig {
        max_task_retries: 0,
        accept_partial: false,
        ..fast_config()
    };
    let orchestrator = Orchestrator::new(config, Arc::clone(&executor) as _).unwrap();

    let err = orchestrator
        .execute(r#"[{"id": 1, "task": "doomed step"}]"#)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskgridError::Orchestrator(_)));
}

#[tokio::test]
async fn test_breaker_stats_reflect_executor_failures() {
    init_tracing();
    let executor = Arc::new(ScriptedExecutor::new().failing_on("bad step"));
    let config = OrchestratorConfig {
        max_task_retries: 0,
        ..fast_config()
    };
    let orchestrator = Orchestrator::new(config, Arc::clone(&executor) as _).unwrap();

    orchestrator
        .execute(r#"[{"id": 1, "task": "bad step", "agent": "coder"}]"#)
        .await
        .unwrap();

    let stats = orchestrator.breakers().stats().await;
    assert_eq!(stats["coder"].consecutive_failures, 1);
}
