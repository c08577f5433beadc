//! # Request Deduplicator
//!
//! Single-flight coalescing of concurrent work keyed by request identity. The
//! first caller for a key becomes the leader and its work runs on a spawned
//! task; callers arriving while that work is pending (or within the grace
//! delay after it settles) join it and observe the same outcome.
//!
//! Dropping a caller never cancels the leader's work. Settled entries are
//! removed by a janitor task after `grace_delay`, and a periodic sweep reaps
//! entries older than `max_pending_age` in case a janitor never ran.

use crate::resilience::DeduplicatorConfig;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors raised by the deduplicator itself, independent of the work's outcome
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeduplicationError {
    /// The leader task panicked or was aborted
    #[error("Deduplicated work for '{key}' did not complete: {reason}")]
    TaskFailed { key: String, reason: String },
}

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, DeduplicationError>>>;

struct PendingRequest<T: Clone> {
    future: SharedOutcome<T>,
    created_at: Instant,
    ref_count: AtomicUsize,
    generation: u64,
}

/// Counters exposed through [`RequestDeduplicator::stats`]
#[derive(Debug, Default)]
struct DeduplicatorCounters {
    executions: AtomicU64,
    joined: AtomicU64,
    stale_evictions: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicationStats {
    /// Leader executions started
    pub executions: u64,
    /// Calls that joined an existing execution
    pub joined: u64,
    /// Entries reaped for exceeding the maximum pending age
    pub stale_evictions: u64,
    /// Entries currently joinable
    pub pending: usize,
}

pub struct RequestDeduplicator<T: Clone> {
    pending: Arc<DashMap<String, PendingRequest<T>>>,
    config: DeduplicatorConfig,
    next_generation: AtomicU64,
    counters: Arc<DeduplicatorCounters>,
    shutdown_tx: broadcast::Sender<()>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone> std::fmt::Debug for RequestDeduplicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("pending", &self.pending.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a deduplicator. Call [`Self::start_sweep`] from within a runtime
    /// to enable the periodic stale-entry sweep.
    pub fn new(config: DeduplicatorConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            pending: Arc::new(DashMap::new()),
            config,
            next_generation: AtomicU64::new(0),
            counters: Arc::new(DeduplicatorCounters::default()),
            shutdown_tx,
            sweep_handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DeduplicatorConfig {
        &self.config
    }

    /// Run `operation` once per overlapping set of calls for `key`
    ///
    /// `operation` is only invoked when no live entry exists for `key`.
    pub async fn execute<F, Fut>(&self, key: &str, operation: F) -> Result<T, DeduplicationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let future = match self.pending.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get();
                if entry.created_at.elapsed() < self.config.max_pending_age {
                    let joined = entry.ref_count.fetch_add(1, Ordering::AcqRel) + 1;
                    self.counters.joined.fetch_add(1, Ordering::Relaxed);
                    debug!(key = key, ref_count = joined, "Joining in-flight request");
                    entry.future.clone()
                } else {
                    warn!(
                        key = key,
                        age_ms = entry.created_at.elapsed().as_millis() as u64,
                        "Replacing stale pending request"
                    );
                    self.counters.stale_evictions.fetch_add(1, Ordering::Relaxed);
                    let pending = self.spawn_leader(key, operation);
                    let future = pending.future.clone();
                    occupied.insert(pending);
                    future
                }
            }
            Entry::Vacant(vacant) => {
                let pending = self.spawn_leader(key, operation);
                let future = pending.future.clone();
                vacant.insert(pending);
                future
            }
        };

        future.await
    }

    /// Spawn the leader's work plus the janitor that removes its entry
    /// `grace_delay` after settlement.
    fn spawn_leader<F, Fut>(&self, key: &str, operation: F) -> PendingRequest<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.counters.executions.fetch_add(1, Ordering::Relaxed);
        debug!(key = key, generation = generation, "Starting leader execution");

        let work = tokio::spawn(operation());
        let task_key = key.to_string();
        let future = async move {
            work.await.map_err(|join_error| DeduplicationError::TaskFailed {
                key: task_key,
                reason: join_error.to_string(),
            })
        }
        .boxed()
        .shared();

        let janitor_future = future.clone();
        let pending = Arc::clone(&self.pending);
        let grace_delay = self.config.grace_delay;
        let janitor_key = key.to_string();
        tokio::spawn(async move {
            let _ = janitor_future.await;
            tokio::time::sleep(grace_delay).await;
            // Only drop the entry this janitor belongs to
            if pending
                .remove_if(&janitor_key, |_, entry| entry.generation == generation)
                .is_some()
            {
                debug!(key = %janitor_key, generation = generation, "Removed settled request");
            }
        });

        PendingRequest {
            future,
            created_at: Instant::now(),
            ref_count: AtomicUsize::new(1),
            generation,
        }
    }

    /// Remove entries older than `max_pending_age`, returns the number removed
    pub fn sweep_stale(&self) -> usize {
        sweep_stale_entries(&self.pending, &self.config, &self.counters)
    }

    /// Spawn the periodic stale-entry sweep; a no-op when already running
    pub fn start_sweep(&self) {
        let mut handle = self.sweep_handle.lock();
        if handle.is_some() {
            return;
        }

        let pending = Arc::clone(&self.pending);
        let counters = Arc::clone(&self.counters);
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        sweep_stale_entries(&pending, &config, &counters);
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Deduplicator sweep received shutdown signal");
                        break;
                    }
                }
            }
        }));

        info!(
            sweep_interval_ms = self.config.sweep_interval.as_millis() as u64,
            "Deduplicator stale sweep started"
        );
    }

    /// Stop the periodic sweep and wait for it to exit
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handle = self.sweep_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Deduplicator sweep task ended abnormally");
            }
            info!("Deduplicator stale sweep stopped");
        }
    }

    pub fn is_sweep_running(&self) -> bool {
        self.sweep_handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of callers that joined the live entry for `key`, leader included
    pub fn ref_count(&self, key: &str) -> Option<usize> {
        self.pending
            .get(key)
            .map(|entry| entry.ref_count.load(Ordering::Acquire))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> DeduplicationStats {
        DeduplicationStats {
            executions: self.counters.executions.load(Ordering::Relaxed),
            joined: self.counters.joined.load(Ordering::Relaxed),
            stale_evictions: self.counters.stale_evictions.load(Ordering::Relaxed),
            pending: self.pending.len(),
        }
    }
}

impl<T: Clone> Drop for RequestDeduplicator<T> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

fn sweep_stale_entries<T: Clone>(
    pending: &DashMap<String, PendingRequest<T>>,
    config: &DeduplicatorConfig,
    counters: &DeduplicatorCounters,
) -> usize {
    let before = pending.len();
    pending.retain(|_, entry| entry.created_at.elapsed() < config.max_pending_age);
    let removed = before.saturating_sub(pending.len());

    if removed > 0 {
        counters
            .stale_evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        warn!(removed = removed, "Reaped stale pending requests");
    }
    removed
}
