//! Scheduling and fault-tolerant execution core for Taskgrid.
//!
//! Turns a raw task plan into a validated task graph, resolves which tasks
//! may run in parallel, dispatches them to an executor capability behind
//! per-agent circuit breakers and timeouts, records results in a bounded
//! store, and hands remaining failures to a self-healing collaborator.
//!
//! # Main types
//!
//! - [`Orchestrator`] — The control loop tying every component together.
//! - [`OrchestrationReport`] — Final report of one orchestration run.
//! - [`PlanParser`] — Multi-error plan validation and normalization.
//! - [`GroupResolver`] — Atomic evaluate-and-claim of parallel task groups.
//! - [`PriorityQueue`] — Dependency-aware priority queue with retry demotion.
//! - [`CircuitBreaker`] / [`BreakerRegistry`] — Per-agent failure isolation.
//! - [`BoundedStore`] — Capacity- and TTL-bounded result retention.

/// Circuit breakers and the per-agent breaker registry.
pub mod breaker;
/// The orchestration control loop.
pub mod engine;
/// Plan parsing, validation, and normalization.
pub mod plan;
/// Priority-ordered task scheduling.
pub mod queue;
/// Parallel-group resolution and claim management.
pub mod resolver;
/// Bounded, time-limited result storage.
pub mod store;

pub use breaker::{
    BreakerRegistry, BreakerState, BreakerStats, CircuitBreaker, TransitionObserver,
};
pub use engine::{OrchestrationReport, Orchestrator};
pub use plan::{PlanParser, FALLBACK_AGENT};
pub use queue::PriorityQueue;
pub use resolver::GroupResolver;
pub use store::BoundedStore;
