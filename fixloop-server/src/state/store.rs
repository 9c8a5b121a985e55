//! Thread-safe store for per-PR automation state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use fixloop_core::CommentId;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::pr_state::{
    AutomationStatus, FixAttempt, FixOutcome, MonitorOptions, PrAutomationState, PrKey,
    StateUpdate,
};

/// Held for the duration of one event's critical section on a key.
pub type KeyGuard = OwnedMutexGuard<()>;

pub struct PrStateStore {
    states: RwLock<HashMap<PrKey, PrAutomationState>>,
    /// One lock per key; the dedup check, its mark and every later mutation
    /// for an event happen while holding it.
    key_locks: Mutex<HashMap<PrKey, Arc<Mutex<()>>>>,
    clock: Arc<dyn Clock>,
}

impl Default for PrStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PrStateStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Acquire the per-key critical section. Waits while another event for
    /// the same key holds it.
    pub async fn lock_key(&self, key: &PrKey) -> KeyGuard {
        let lock = {
            let mut locks = self.key_locks.lock().await;
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Create fresh state for the key, replacing any prior state.
    pub async fn start_monitoring(&self, key: &PrKey, options: MonitorOptions) -> PrAutomationState {
        let state = PrAutomationState::new(options, self.clock.now());
        let mut states = self.states.write().await;
        if states.insert(key.clone(), state.clone()).is_some() {
            info!("Restarted monitoring PR {} (previous state discarded)", key);
        } else {
            info!("Started monitoring PR {}", key);
        }
        state
    }

    /// Stop monitoring. Returns `None` if the key has no state.
    pub async fn stop_monitoring(&self, key: &PrKey) -> Option<PrAutomationState> {
        let mut states = self.states.write().await;
        let state = states.get_mut(key)?;
        state.monitored = false;
        state.status = AutomationStatus::Stopped;
        state.stopped_at = Some(self.clock.now());
        info!("Stopped monitoring PR {}", key);
        Some(state.clone())
    }

    pub async fn get(&self, key: &PrKey) -> Option<PrAutomationState> {
        let states = self.states.read().await;
        states.get(key).cloned()
    }

    pub async fn is_monitored(&self, key: &PrKey) -> bool {
        let states = self.states.read().await;
        states.get(key).is_some_and(|s| s.monitored)
    }

    pub async fn is_comment_processed(&self, key: &PrKey, comment_id: CommentId) -> bool {
        let states = self.states.read().await;
        states
            .get(key)
            .is_some_and(|s| s.processed_comment_ids.contains(&comment_id))
    }

    /// Add a comment id to the dedup set. Only a monitored PR's set grows.
    pub async fn mark_comment_processed(&self, key: &PrKey, comment_id: CommentId) -> bool {
        let mut states = self.states.write().await;
        match states.get_mut(key) {
            Some(state) if state.monitored => {
                state.processed_comment_ids.insert(comment_id);
                true
            }
            _ => {
                warn!(
                    "Ignoring mark of comment {} on unmonitored PR {}",
                    comment_id, key
                );
                false
            }
        }
    }

    /// Check-then-mark in one step. Returns true if this call claimed the
    /// comment, false if it was already processed or the PR is unmonitored.
    pub async fn claim_comment(&self, key: &PrKey, comment_id: CommentId) -> bool {
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(key).filter(|s| s.monitored) else {
            debug!("Not claiming comment {}: PR {} is not monitored", comment_id, key);
            return false;
        };

        let claimed = state.processed_comment_ids.insert(comment_id);
        if !claimed {
            debug!("Comment {} on PR {} already processed", comment_id, key);
        }
        claimed
    }

    /// Append a fix attempt. Earlier attempts are never touched.
    pub async fn record_fix_attempt(&self, key: &PrKey, outcome: FixOutcome) -> bool {
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(key) else {
            warn!("Cannot record fix attempt for unknown PR {}", key);
            return false;
        };

        state.fix_attempts.push(FixAttempt {
            timestamp: self.clock.now(),
            issue_count: outcome.issue_count,
            fix_count: outcome.fix_count,
            success: outcome.success,
            error: outcome.error,
        });
        info!(
            "Recorded fix attempt #{} for PR {} (success={})",
            state.fix_attempts.len(),
            key,
            outcome.success
        );
        true
    }

    /// Merge a partial update into monitored state.
    ///
    /// Returns `None` and logs (never fails) when the key is unknown or
    /// unmonitored, or when the status change is not an allowed transition.
    pub async fn update_state(&self, key: &PrKey, update: StateUpdate) -> Option<PrAutomationState> {
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(key).filter(|s| s.monitored) else {
            warn!("Ignoring state update for unmonitored PR {}", key);
            return None;
        };

        if let Some(next) = update.status {
            if !state.status.can_transition_to(next) {
                warn!(
                    "Ignoring invalid transition {} -> {} for PR {}",
                    state.status, next, key
                );
                return None;
            }
            if state.status != next {
                info!("PR {} status {} -> {}", key, state.status, next);
            }
            state.status = next;
        }

        if let Some(review) = update.last_reviewer_event {
            state.last_reviewer_event = Some(review);
        }

        Some(state.clone())
    }

    /// Snapshot of every tracked PR, ordered by key.
    pub async fn all(&self) -> Vec<(PrKey, PrAutomationState)> {
        let states = self.states.read().await;
        let mut all: Vec<_> = states
            .iter()
            .map(|(key, state)| (key.clone(), state.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Evict unmonitored state older than `max_age` (measured from `started_at`).
    /// Returns the number of evicted entries.
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let now = self.clock.now();
        let evicted: Vec<PrKey> = {
            let mut states = self.states.write().await;
            let expired: Vec<PrKey> = states
                .iter()
                .filter(|(_, s)| !s.monitored && now - s.started_at > max_age)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                states.remove(key);
            }
            expired
        };

        let released = {
            let mut locks = self.key_locks.lock().await;
            let states = self.states.read().await;
            let before = locks.len();
            // Keep locks someone is waiting on or holding, and locks for live state.
            locks.retain(|key, lock| Arc::strong_count(lock) > 1 || states.contains_key(key));
            before - locks.len()
        };

        if !evicted.is_empty() {
            info!("Cleaned up {} stale PR states", evicted.len());
        }
        if released > 0 {
            debug!("Released {} idle key locks", released);
        }

        evicted.len()
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.key_locks.lock().await.len()
    }
}
