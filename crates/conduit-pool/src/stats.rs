//! Point-in-time pool counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters shared by a pool and each of its keys.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) opened: AtomicU64,
    pub(crate) reused: AtomicU64,
    pub(crate) closed: AtomicU64,
    pub(crate) leased: AtomicUsize,
}

impl Counters {
    pub(crate) fn leased(&self) -> usize {
        self.leased.load(Ordering::Acquire)
    }

    pub(crate) fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    pub(crate) fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    pub(crate) fn closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }
}

/// Snapshot of the whole pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Keys currently tracked.
    pub keys: usize,
    /// Connections sitting idle.
    pub idle: usize,
    /// Connections currently leased.
    pub leased: usize,
    /// Connections opened since the pool was created.
    pub opened: u64,
    /// Leases served by an idle connection.
    pub reused: u64,
    /// Connections closed since the pool was created.
    pub closed: u64,
}

impl PoolStats {
    /// Connections that are open right now, idle or leased.
    #[must_use]
    pub const fn open(&self) -> u64 {
        self.opened.saturating_sub(self.closed)
    }
}

/// Snapshot of a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyStats {
    /// Connections sitting idle.
    pub idle: usize,
    /// Connections currently leased.
    pub leased: usize,
    /// Connections opened for this key.
    pub opened: u64,
    /// Leases served by an idle connection.
    pub reused: u64,
    /// Connections closed for this key.
    pub closed: u64,
}
