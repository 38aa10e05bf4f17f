use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use taskgrid_core::{BreakerConfig, TaskgridError, TaskgridResult};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow through normally.
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open,
    /// Probing: a few successes close the breaker, any failure reopens it.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Snapshot of one breaker's counters, for bulk stats retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    /// Current state.
    pub state: BreakerState,
    /// Consecutive failures observed.
    pub consecutive_failures: u32,
    /// Consecutive successes observed.
    pub consecutive_successes: u32,
}

/// Callback invoked synchronously on every state transition:
/// `(breaker name, from, to)`.
pub type TransitionObserver = Arc<dyn Fn(&str, BreakerState, BreakerState) + Send + Sync>;

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
}

/// Per-dependency failure isolation around calls to an unreliable external
/// capability.
///
/// Closed → Open after `failure_threshold` consecutive failures; Open →
/// HalfOpen once the cooldown elapses on the next attempt; HalfOpen →
/// Closed after `success_threshold` consecutive successes. Any failure
/// while half-open reopens the breaker and resets the cooldown clock.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    observer: Option<TransitionObserver>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for the named dependency.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            observer: None,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure: None,
            }),
        }
    }

    /// Attach a state-transition observer.
    pub fn with_observer(mut self, observer: TransitionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The dependency this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `call` through the breaker.
    ///
    /// While open and the cooldown has not expired, fails immediately with
    /// [`TaskgridError::CircuitOpen`] without invoking `call`. Otherwise
    /// invokes it, routes the outcome into the state machine, and
    /// propagates the original error unchanged.
    pub async fn execute<T, F, Fut>(&self, call: F) -> TaskgridResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TaskgridResult<T>>,
    {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == BreakerState::Open {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.cooldown);
                if elapsed < self.config.cooldown {
                    return Err(TaskgridError::CircuitOpen {
                        name: self.name.clone(),
                        retry_in: self.config.cooldown - elapsed,
                    });
                }
                self.transition(&mut inner, BreakerState::HalfOpen);
                inner.consecutive_successes = 0;
            }
        }

        let result = call().await;

        let mut inner = self.inner.lock().await;
        match &result {
            Ok(_) => {
                inner.consecutive_failures = 0;
                inner.consecutive_successes += 1;
                if inner.state == BreakerState::HalfOpen
                    && inner.consecutive_successes >= self.config.success_threshold
                {
                    self.transition(&mut inner, BreakerState::Closed);
                    inner.consecutive_successes = 0;
                }
            }
            Err(_) => {
                inner.consecutive_successes = 0;
                inner.consecutive_failures += 1;
                inner.last_failure = Some(Instant::now());
                match inner.state {
                    BreakerState::HalfOpen => {
                        // one probe failure is enough to reopen
                        self.transition(&mut inner, BreakerState::Open);
                    }
                    BreakerState::Closed
                        if inner.consecutive_failures >= self.config.failure_threshold =>
                    {
                        self.transition(&mut inner, BreakerState::Open);
                    }
                    _ => {}
                }
            }
        }
        result
    }

    /// Current state without invoking anything.
    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    /// Snapshot of counters and state.
    pub async fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock().await;
        BreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
        }
    }

    /// Force the breaker back to closed with cleared counters.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != BreakerState::Closed {
            self.transition(&mut inner, BreakerState::Closed);
        }
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.last_failure = None;
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        if to == BreakerState::Open {
            warn!(breaker = %self.name, %from, %to, "circuit breaker opened");
        } else {
            info!(breaker = %self.name, %from, %to, "circuit breaker transition");
        }
        if let Some(observer) = &self.observer {
            observer(&self.name, from, to);
        }
    }
}

/// Lazily-created, named breakers — one per distinguishable dependency,
/// reused for the process lifetime. Owned by the orchestrator rather than
/// held in a global so independent orchestrations stay isolated.
pub struct BreakerRegistry {
    config: BreakerConfig,
    observer: Option<TransitionObserver>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create a registry applying `config` to every breaker it creates.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            observer: None,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Attach an observer inherited by every breaker created afterwards.
    pub fn with_observer(mut self, observer: TransitionObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get or lazily create the breaker for a named dependency.
    pub async fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        if let Some(existing) = breakers.get(name) {
            return Arc::clone(existing);
        }
        let mut breaker = CircuitBreaker::new(name, self.config.clone());
        if let Some(observer) = &self.observer {
            breaker = breaker.with_observer(Arc::clone(observer));
        }
        let breaker = Arc::new(breaker);
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Reset every breaker to closed.
    pub async fn reset_all(&self) {
        let breakers = self.breakers.lock().await;
        for breaker in breakers.values() {
            breaker.reset().await;
        }
    }

    /// Snapshot counters for every breaker.
    pub async fn stats(&self) -> HashMap<String, BreakerStats> {
        let breakers = self.breakers.lock().await;
        let mut out = HashMap::with_capacity(breakers.len());
        for (name, breaker) in breakers.iter() {
            out.insert(name.clone(), breaker.stats().await);
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            cooldown: Duration::from_millis(50),
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> TaskgridResult<()> {
        breaker
            .execute(|| async { Err::<(), _>(TaskgridError::Executor("boom".into())) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> TaskgridResult<&'static str> {
        breaker.execute(|| async { Ok("ok") }).await
    }

    #[tokio::test]
    async fn test_three_failures_open_the_breaker() {
        let breaker = CircuitBreaker::new("exec", fast_config());
        assert_eq!(breaker.state().await, BreakerState::Closed);

        for _ in 0..2 {
            fail(&breaker).await.unwrap_err();
            assert_eq!(breaker.state().await, BreakerState::Closed);
        }
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state().await, BreakerState::Open);
    }

    #[tokio::test]
    async fn test_open_breaker_fails_without_invoking_call() {
        let breaker = CircuitBreaker::new("exec", fast_config());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }

        let calls = AtomicU32::new(0);
        let err = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match err {
            TaskgridError::CircuitOpen { name, retry_in } => {
                assert_eq!(name, "exec");
                assert!(retry_in <= Duration::from_millis(50));
            }
            other => panic!("expected CircuitOpen, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_half_open_then_closed_after_two_successes() {
        let breaker = CircuitBreaker::new("exec", fast_config());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state().await, BreakerState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_and_resets_cooldown() {
        let breaker = CircuitBreaker::new("exec", fast_config());
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        // probe fails: straight back to open with a fresh cooldown
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state().await, BreakerState::Open);

        let err = succeed(&breaker).await.unwrap_err();
        assert!(matches!(err, TaskgridError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn test_original_error_is_propagated() {
        let breaker = CircuitBreaker::new("exec", fast_config());
        let err = breaker
            .execute(|| async { Err::<(), _>(TaskgridError::Executor("the real cause".into())) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("the real cause"));
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let breaker = CircuitBreaker::new("exec", fast_config());
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        // streak was broken, so still closed
        assert_eq!(breaker.state().await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_observer_sees_transitions() {
        let transitions = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&transitions);
        let observer: TransitionObserver = Arc::new(move |name: &str, from, to| {
            seen.lock().unwrap().push((name.to_string(), from, to));
        });

        let breaker = CircuitBreaker::new("exec", fast_config()).with_observer(observer);
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }

        let log = transitions.lock().unwrap();
        assert_eq!(
            log.as_slice(),
            &[("exec".to_string(), BreakerState::Closed, BreakerState::Open)]
        );
    }

    #[tokio::test]
    async fn test_registry_reuses_named_breakers() {
        let registry = BreakerRegistry::new(fast_config());
        let a = registry.breaker("coder").await;
        let b = registry.breaker("coder").await;
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.breaker("tester").await;
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn test_registry_reset_all_and_stats() {
        let registry = BreakerRegistry::new(fast_config());
        let breaker = registry.breaker("coder").await;
        for _ in 0..3 {
            fail(&breaker).await.unwrap_err();
        }
        let stats = registry.stats().await;
        assert_eq!(stats["coder"].state, BreakerState::Open);
        assert_eq!(stats["coder"].consecutive_failures, 3);

        registry.reset_all().await;
        let stats = registry.stats().await;
        assert_eq!(stats["coder"].state, BreakerState::Closed);
        assert_eq!(stats["coder"].consecutive_failures, 0);
    }
}
