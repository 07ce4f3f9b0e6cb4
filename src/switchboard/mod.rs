//! Live switchboard: the currently active route table and its hand-off.
//!
//! # Responsibilities
//! - Hand every request a single, consistent generation for its lifetime
//! - Atomically replace the active generation
//! - Drain superseded generations within a grace window
//! - Refuse new work once shutdown starts
//!
//! # Data Flow
//! ```text
//! RebuildTrigger
//!     → reload.rs (snapshot providers, compile, decide)
//!     → Switchboard::publish (swap pointer, drain previous)
//!
//! Request
//!     → Switchboard::admit (pin generation, count in flight)
//!     → RouteTable lookup → chain → pool
//!     → Admission dropped (release)
//! ```
//!
//! # Design Decisions
//! - The active generation lives behind one `ArcSwap`; readers never lock
//! - A generation is activated before it becomes visible and marked
//!   draining after it stops being visible, so admission can re-check the
//!   state it pinned and retry on the newer generation
//! - Publishers are serialized by a mutex that is never held across await

pub mod generation;
pub mod reload;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use thiserror::Error;

use crate::observability::metrics;
use crate::routing::RouteTable;

pub use generation::{Admission, DrainRecord, Generation, GenerationState};
pub use reload::{initial_compilation, RebuildOutcome, Reloader};

/// Errors raised by the switchboard.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SwitchboardError {
    #[error("switchboard is closed")]
    Closed,

    #[error("generation {given} is not newer than active generation {active}")]
    StaleGeneration { given: u64, active: u64 },
}

/// Result of a shutdown drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Generations that still had requests in flight when the grace expired.
    pub forced: Vec<u64>,
}

#[derive(Debug)]
struct Draining {
    generation: Arc<Generation>,
    started_at: SystemTime,
    deadline: SystemTime,
}

/// Holder of the active generation.
#[derive(Debug)]
pub struct Switchboard {
    current: ArcSwap<Generation>,
    draining: Arc<DashMap<u64, Draining>>,
    drain_grace: Duration,
    next_id: AtomicU64,
    accepting: AtomicBool,
    publish_lock: Mutex<()>,
}

impl Switchboard {
    /// Create a switchboard serving `initial`.
    pub fn new(initial: RouteTable, drain_grace: Duration) -> Self {
        let next_id = initial.generation() + 1;
        let generation = Generation::new(initial);
        generation.set_state(GenerationState::Active);
        metrics::set_active_generation(generation.id());
        Self {
            current: ArcSwap::from_pointee(generation),
            draining: Arc::new(DashMap::new()),
            drain_grace,
            next_id: AtomicU64::new(next_id),
            accepting: AtomicBool::new(true),
            publish_lock: Mutex::new(()),
        }
    }

    /// Reserve the id for the next generation.
    pub fn next_generation_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// The active generation.
    pub fn current(&self) -> Arc<Generation> {
        self.current.load_full()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Pin the active generation for one request.
    pub fn admit(&self) -> Result<Admission, SwitchboardError> {
        loop {
            if !self.is_accepting() {
                return Err(SwitchboardError::Closed);
            }
            if let Some(admission) = Admission::try_new(self.current.load_full()) {
                return Ok(admission);
            }
            // Lost a race with publish: the swapped-in generation is already
            // active, so the next attempt succeeds unless shutdown started.
            std::thread::yield_now();
        }
    }

    /// Make `table` the active generation and start draining the previous one.
    pub fn publish(&self, table: RouteTable) -> Result<u64, SwitchboardError> {
        let _guard = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_accepting() {
            return Err(SwitchboardError::Closed);
        }

        let id = table.generation();
        let active = self.current.load().id();
        if id <= active {
            return Err(SwitchboardError::StaleGeneration { given: id, active });
        }
        self.next_id.fetch_max(id + 1, Ordering::SeqCst);

        let next = Arc::new(Generation::new(table));
        next.set_state(GenerationState::Active);
        let previous = self.current.swap(Arc::clone(&next));
        previous.set_state(GenerationState::Draining);

        tracing::info!(
            generation = id,
            previous = previous.id(),
            routes = next.table().len(),
            in_flight = previous.in_flight(),
            "Route table generation activated"
        );
        metrics::set_active_generation(id);
        self.spawn_drain(previous);
        Ok(id)
    }

    fn spawn_drain(&self, generation: Arc<Generation>) {
        let id = generation.id();
        let grace = self.drain_grace;
        let now = SystemTime::now();
        self.draining.insert(
            id,
            Draining {
                generation: Arc::clone(&generation),
                started_at: now,
                deadline: now + grace,
            },
        );
        metrics::set_draining_generations(self.draining.len());

        let draining = Arc::clone(&self.draining);
        tokio::spawn(async move {
            if generation.wait_idle(grace).await {
                tracing::info!(generation = id, "Generation drained");
            } else {
                tracing::warn!(
                    generation = id,
                    in_flight = generation.in_flight(),
                    "Drain grace expired, cancelling in-flight requests"
                );
            }
            generation.set_state(GenerationState::Retired);
            draining.remove(&id);
            metrics::set_draining_generations(draining.len());
        });
    }

    /// Superseded generations that have not finished draining, oldest first.
    pub fn drain_records(&self) -> Vec<DrainRecord> {
        let mut records: Vec<DrainRecord> = self
            .draining
            .iter()
            .map(|entry| DrainRecord {
                generation: *entry.key(),
                in_flight: entry.generation.in_flight(),
                started_at: entry.started_at,
                deadline: entry.deadline,
            })
            .collect();
        records.sort_by_key(|r| r.generation);
        records
    }

    pub fn draining_count(&self) -> usize {
        self.draining.len()
    }

    /// Stop admitting requests and drain every generation within `grace`.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let current = {
            let _guard = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.accepting.store(false, Ordering::SeqCst);
            let current = self.current.load_full();
            current.set_state(GenerationState::Draining);
            current
        };

        let mut generations = vec![current];
        generations.extend(self.draining.iter().map(|e| Arc::clone(&e.generation)));
        tracing::info!(generations = generations.len(), grace = ?grace, "Draining generations for shutdown");

        let results = futures_util::future::join_all(
            generations
                .iter()
                .map(|g| async move { (g.id(), g.wait_idle(grace).await) }),
        )
        .await;

        for generation in &generations {
            generation.set_state(GenerationState::Retired);
        }

        let mut forced: Vec<u64> = results
            .into_iter()
            .filter(|(_, clean)| !clean)
            .map(|(id, _)| id)
            .collect();
        forced.sort_unstable();
        if !forced.is_empty() {
            tracing::warn!(generations = ?forced, "Shutdown grace expired with requests in flight");
        }
        ShutdownReport { forced }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn board() -> Switchboard {
        Switchboard::new(RouteTable::empty(1), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_publish_swaps_and_keeps_pinned_generation() {
        let sb = board();
        let pinned = sb.admit().unwrap();
        assert_eq!(pinned.generation().id(), 1);

        let id = sb.next_generation_id();
        assert_eq!(sb.publish(RouteTable::empty(id)).unwrap(), 2);

        // the old request still sees generation 1, new ones see 2
        assert_eq!(pinned.generation().id(), 1);
        assert_eq!(pinned.generation().state(), GenerationState::Draining);
        assert_eq!(sb.admit().unwrap().generation().id(), 2);
        assert_eq!(sb.drain_records()[0].generation, 1);
        assert_eq!(sb.drain_records()[0].in_flight, 1);
    }

    #[tokio::test]
    async fn test_stale_generation_rejected() {
        let sb = board();
        sb.publish(RouteTable::empty(5)).unwrap();
        assert_eq!(
            sb.publish(RouteTable::empty(5)),
            Err(SwitchboardError::StaleGeneration { given: 5, active: 5 })
        );
        assert_eq!(sb.next_generation_id(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_generation_is_retired() {
        let sb = board();
        let pinned = sb.admit().unwrap();
        let old = Arc::clone(pinned.generation());
        sb.publish(RouteTable::empty(2)).unwrap();
        assert_eq!(sb.draining_count(), 1);

        drop(pinned);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(old.state(), GenerationState::Retired);
        assert_eq!(sb.draining_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_grace_expiry_retires_generation() {
        let sb = board();
        let pinned = sb.admit().unwrap();
        sb.publish(RouteTable::empty(2)).unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(pinned.generation().state(), GenerationState::Retired);
        // a forced-retired request resolves its cancellation future
        pinned.generation().retired().await;
        assert_eq!(sb.draining_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_and_reports_forced() {
        let sb = board();
        let pinned = sb.admit().unwrap();

        let report = sb.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.forced, vec![1]);
        assert_eq!(sb.admit().unwrap_err(), SwitchboardError::Closed);
        assert_eq!(sb.publish(RouteTable::empty(9)), Err(SwitchboardError::Closed));
        drop(pinned);

        let clean = board().shutdown(Duration::from_secs(1)).await;
        assert!(clean.forced.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_never_touch_superseded_generation() {
        let sb = Arc::new(board());
        let violations = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::new();
        for _ in 0..4 {
            let sb = Arc::clone(&sb);
            let violations = Arc::clone(&violations);
            workers.push(tokio::spawn(async move {
                for _ in 0..2_000 {
                    let admission = sb.admit().unwrap();
                    if admission.generation().state() == GenerationState::Retired {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        for _ in 0..50 {
            let id = sb.next_generation_id();
            sb.publish(RouteTable::empty(id)).unwrap();
            tokio::task::yield_now().await;
        }
        for w in workers {
            w.await.unwrap();
        }

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(sb.current().id(), 51);
        assert_eq!(sb.current().in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_admission_pins_generation_across_awaits() {
        let sb = Arc::new(board());
        let mismatches = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::new();
        for _ in 0..8 {
            let sb = Arc::clone(&sb);
            let mismatches = Arc::clone(&mismatches);
            workers.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let admission = sb.admit().unwrap();
                    let before = Arc::clone(admission.generation());
                    // stands in for the upstream round trip
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    let after = admission.generation();
                    if !Arc::ptr_eq(&before, after)
                        || after.id() != before.id()
                        || after.table().generation() != before.id()
                        || after.state() == GenerationState::Retired
                    {
                        mismatches.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }

        for _ in 0..20 {
            let id = sb.next_generation_id();
            sb.publish(RouteTable::empty(id)).unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        for w in workers {
            w.await.unwrap();
        }
        assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    }
}
