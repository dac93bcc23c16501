//! What the pool needs to know about connections.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use conduit_core::{BoxFuture, ConduitResult};

use crate::key::ConnectionKey;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a pooled connection, assigned when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connection that can sit idle in the pool.
///
/// Dropping the connection closes it.
pub trait Poolable: Send + 'static {
    /// Returns `false` once the connection can no longer carry requests.
    fn is_open(&self) -> bool;
}

/// Opens new connections for the pool.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced.
    type Connection: Poolable;

    /// Opens a connection to the endpoint described by `key`.
    fn connect<'a>(&'a self, key: &'a ConnectionKey)
        -> BoxFuture<'a, ConduitResult<Self::Connection>>;
}
