//! One configuration generation and its in-flight accounting.
//!
//! # States
//! ```text
//! Building → Active → Draining → Retired
//! ```
//!
//! # Design Decisions
//! - State and counters are atomics so the hot path never takes a lock
//! - The idle notification is armed before the counter is read, so a
//!   release racing the check cannot be missed

use std::ops::Deref;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::Notify;

use crate::routing::RouteTable;

/// Lifecycle state of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum GenerationState {
    Building = 0,
    Active = 1,
    Draining = 2,
    Retired = 3,
}

impl From<u8> for GenerationState {
    fn from(value: u8) -> Self {
        match value {
            0 => GenerationState::Building,
            1 => GenerationState::Active,
            2 => GenerationState::Draining,
            _ => GenerationState::Retired,
        }
    }
}

/// A route table plus the requests currently dispatched against it.
#[derive(Debug)]
pub struct Generation {
    table: RouteTable,
    state: AtomicU8,
    in_flight: AtomicUsize,
    idle: Notify,
    retired: Notify,
}

impl Generation {
    pub fn new(table: RouteTable) -> Self {
        Self {
            table,
            state: AtomicU8::new(GenerationState::Building as u8),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            retired: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.table.generation()
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn state(&self) -> GenerationState {
        GenerationState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: GenerationState) {
        self.state.store(state as u8, Ordering::SeqCst);
        if state == GenerationState::Retired {
            self.retired.notify_waiters();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Wait until no request is in flight. Returns false if `grace` expired
    /// first.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let idle = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, idle).await.is_ok()
    }

    /// Resolves once the generation is retired.
    pub async fn retired(&self) {
        loop {
            let notified = self.retired.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state() == GenerationState::Retired {
                return;
            }
            notified.await;
        }
    }
}

/// A request's hold on one generation. Dropping it releases the request.
#[derive(Debug)]
pub struct Admission {
    generation: Arc<Generation>,
}

impl Admission {
    /// Register a request against `generation` if it is still active.
    pub(crate) fn try_new(generation: Arc<Generation>) -> Option<Self> {
        generation.acquire();
        if generation.state() == GenerationState::Active {
            return Some(Self { generation });
        }
        generation.release();
        None
    }

    pub fn generation(&self) -> &Arc<Generation> {
        &self.generation
    }
}

impl Deref for Admission {
    type Target = RouteTable;
    fn deref(&self) -> &Self::Target {
        self.generation.table()
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.generation.release();
    }
}

/// Drain progress of a superseded generation.
#[derive(Debug, Clone, Serialize)]
pub struct DrainRecord {
    pub generation: u64,
    pub in_flight: usize,
    pub started_at: SystemTime,
    pub deadline: SystemTime,
}
