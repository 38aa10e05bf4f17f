use std::collections::HashSet;
use taskgrid_core::Plan;
use tokio::sync::Mutex;
use tracing::debug;

/// Computes the next maximal ready-to-run task set and claims it atomically.
///
/// Readiness evaluation and claim-marking happen inside one critical
/// section, so concurrent callers against the same plan can never return
/// the same task twice: their claimed sets are pairwise disjoint.
pub struct GroupResolver {
    /// Task ids currently claimed but not completed. Mutated only while
    /// holding the lock.
    claims: Mutex<HashSet<String>>,
}

impl Default for GroupResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupResolver {
    /// Create a resolver with an empty claim set.
    pub fn new() -> Self {
        Self {
            claims: Mutex::new(HashSet::new()),
        }
    }

    /// Return the next set of task ids that are in some declared parallel
    /// group, not completed, not already claimed, and whose dependencies
    /// are all present in `completed`. Returns `None` when nothing is
    /// ready.
    ///
    /// Chosen ids are recorded in the claim set before the lock releases.
    pub async fn next_group(
        &self,
        plan: &Plan,
        completed: &HashSet<String>,
    ) -> Option<Vec<String>> {
        let mut claims = self.claims.lock().await;

        let mut chosen = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for group in &plan.parallel_groups {
            for id in group {
                if completed.contains(id) || claims.contains(id) || !seen.insert(id) {
                    continue;
                }
                let Some(task) = plan.task(id) else {
                    continue;
                };
                if task.dependencies.iter().all(|dep| completed.contains(dep)) {
                    chosen.push(id.clone());
                }
            }
        }

        if chosen.is_empty() {
            return None;
        }
        for id in &chosen {
            claims.insert(id.clone());
        }
        debug!(claimed = chosen.len(), "claimed next parallel group");
        Some(chosen)
    }

    /// Release a claim after a retryable failure so the task can be
    /// claimed again. Returns `false` if the id was not claimed.
    pub async fn release(&self, id: &str) -> bool {
        self.claims.lock().await.remove(id)
    }

    /// Drop the claim for a task that reached a terminal status. Completed
    /// ids are never reclaimable because `next_group` filters on the
    /// caller's completed set.
    pub async fn complete(&self, id: &str) {
        self.claims.lock().await.remove(id);
    }

    /// Snapshot of the current claim set.
    pub async fn claimed(&self) -> HashSet<String> {
        self.claims.lock().await.clone()
    }
}
