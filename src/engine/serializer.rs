//! Mutation serializer
//!
//! Every operation that reads-then-writes the derived indexes runs while
//! holding a `MutationGuard`. The queue is a FIFO-fair tokio mutex, so
//! mutations execute in arrival order and a failed mutation simply drops its
//! guard and lets the next one run.
//!
//! Readers never wait here. They take a `ReadTicket` before touching the
//! indexes and validate it afterwards; if a mutation was in flight or ran in
//! between, the indexed result is discarded and the read is redone as a scan.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard};

/// Total order over index mutations
#[derive(Debug, Default)]
pub struct MutationSerializer {
    queue: Mutex<()>,
    in_flight: AtomicBool,
    /// Bumped on every mutation entry and exit
    sequence: AtomicU64,
    /// Mutations waiting or running
    pending: AtomicUsize,
}

/// Held for the duration of one mutation
pub struct MutationGuard<'a> {
    _permit: MutexGuard<'a, ()>,
    owner: &'a MutationSerializer,
}

/// Snapshot taken by a reader before an indexed read
#[derive(Debug, Clone, Copy)]
pub struct ReadTicket {
    sequence: u64,
}

impl MutationSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for our turn, then mark a mutation in flight
    pub async fn begin(&self) -> MutationGuard<'_> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let permit = self.queue.lock().await;
        self.enter(permit)
    }

    /// Start a mutation only if nothing is running or queued
    pub fn try_begin(&self) -> Option<MutationGuard<'_>> {
        let permit = self.queue.try_lock().ok()?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        Some(self.enter(permit))
    }

    fn enter<'a>(&'a self, permit: MutexGuard<'a, ()>) -> MutationGuard<'a> {
        self.in_flight.store(true, Ordering::SeqCst);
        self.sequence.fetch_add(1, Ordering::SeqCst);
        MutationGuard {
            _permit: permit,
            owner: self,
        }
    }

    /// Whether a mutation is executing right now
    pub fn is_mutating(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Mutations waiting or running
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Take a ticket for an indexed read; `None` if a mutation is in flight
    pub fn read_ticket(&self) -> Option<ReadTicket> {
        if self.is_mutating() {
            return None;
        }
        let ticket = ReadTicket {
            sequence: self.sequence.load(Ordering::SeqCst),
        };
        // A mutation may have started between the two loads
        (!self.is_mutating()).then_some(ticket)
    }

    /// Whether no mutation ran or is running since `ticket` was taken
    pub fn validate(&self, ticket: ReadTicket) -> bool {
        !self.is_mutating() && self.sequence.load(Ordering::SeqCst) == ticket.sequence
    }
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.owner.sequence.fetch_add(1, Ordering::SeqCst);
        self.owner.in_flight.store(false, Ordering::SeqCst);
        self.owner.pending.fetch_sub(1, Ordering::SeqCst);
    }
}
