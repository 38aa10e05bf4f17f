use std::collections::VecDeque;
use std::time::{Duration, Instant};
use taskgrid_core::{ExecutionResult, TaskgridError, TaskgridResult};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
struct StoreEntry {
    key: String,
    value: ExecutionResult,
    inserted_at: Instant,
}

/// Fixed-capacity, time-bounded store for completed results.
///
/// Capacity and TTL are enforced on every access, not by a periodic sweep:
/// no caller ever observes more than `max_size` live entries or an entry
/// older than `ttl`, even if it has not been physically evicted yet.
#[derive(Debug)]
pub struct BoundedStore {
    max_size: usize,
    ttl: Duration,
    /// Insertion order front-to-back; the front is the oldest entry.
    entries: Mutex<VecDeque<StoreEntry>>,
}

impl BoundedStore {
    /// Create a store holding at most `max_size` entries, each for at most
    /// `ttl`.
    pub fn new(max_size: usize, ttl: Duration) -> TaskgridResult<Self> {
        if max_size == 0 {
            return Err(TaskgridError::Precondition {
                primitive: "store.new",
                message: "max_size must be at least 1".to_string(),
            });
        }
        Ok(Self {
            max_size,
            ttl,
            entries: Mutex::new(VecDeque::new()),
        })
    }

    /// Insert or update an entry, evicting expired entries first and then
    /// the oldest-inserted entries while at or over capacity.
    pub async fn set(&self, key: &str, value: ExecutionResult) {
        let mut entries = self.entries.lock().await;
        Self::purge(&mut entries, self.ttl);
        entries.retain(|e| e.key != key);
        while entries.len() >= self.max_size {
            if let Some(evicted) = entries.pop_front() {
                debug!(key = %evicted.key, "evicting oldest stored result");
            }
        }
        entries.push_back(StoreEntry {
            key: key.to_string(),
            value,
            inserted_at: Instant::now(),
        });
    }

    /// Fetch an entry, lazily deleting it when its age exceeds the TTL.
    pub async fn get(&self, key: &str) -> Option<ExecutionResult> {
        let mut entries = self.entries.lock().await;
        let idx = entries.iter().position(|e| e.key == key)?;
        if entries[idx].inserted_at.elapsed() >= self.ttl {
            entries.remove(idx);
            return None;
        }
        Some(entries[idx].value.clone())
    }

    /// All live values in insertion order, after purging expired entries.
    pub async fn values(&self) -> Vec<ExecutionResult> {
        let mut entries = self.entries.lock().await;
        Self::purge(&mut entries, self.ttl);
        entries.iter().map(|e| e.value.clone()).collect()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let mut entries = self.entries.lock().await;
        Self::purge(&mut entries, self.ttl);
        entries.len()
    }

    /// Whether no live entries remain.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn purge(entries: &mut VecDeque<StoreEntry>, ttl: Duration) {
        entries.retain(|e| e.inserted_at.elapsed() < ttl);
    }
}
