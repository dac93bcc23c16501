//! Keyed connection pool for the Conduit HTTP client.
//!
//! Connections are grouped by [`ConnectionKey`] (scheme, host, port and TLS
//! configuration). A caller leases a connection with [`Pool::acquire`] and
//! either gives it back with [`Lease::release`] or closes it by dropping the
//! lease.
//!
//! - At most one lease holds a connection at a time
//! - Idle connections are reused most recently released first
//! - Per-key and global lease limits, bounded by an acquire timeout
//! - A background sweep closes connections idle past their timeout
//!
//! # Example
//!
//! ```ignore
//! use conduit_pool::{ConnectionKey, Pool, PoolConfig, Scheme};
//!
//! let pool = Pool::new(MyConnector::default(), PoolConfig::default());
//! let key = ConnectionKey::new(Scheme::Http, "orders.internal", 8080);
//!
//! let lease = pool.acquire(&key).await?;
//! // ... exchange a request on lease.connection_mut() ...
//! lease.release(true);
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod connection;
mod key;
mod pool;
mod stats;

pub use connection::{ConnectionId, Connector, Poolable};
pub use key::{ConnectionKey, Scheme};
pub use pool::{Lease, Pool, PoolConfig};
pub use stats::{KeyStats, PoolStats};
