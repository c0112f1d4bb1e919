//! # sqlx-pg-replicas
//!
//! Connection pools for a PostgreSQL primary and its read replicas.
//!
//! ## Core Types
//!
//! - **[`PgPoolManager`]**: Owns the pools, routes reads and writes
//! - **[`ReplicaSetConfig`]**: Endpoints and pool bounds
//! - **[`PooledConnection`]**: RAII lease on one connection
//! - **[`Error`]**: Separates unreachable servers from busy pools
//!
//! ## Architecture
//!
//! - **Writes on the primary**: replicas are never written to
//! - **Random replica reads**: uniform choice with primary fallback; a
//!   failing replica sits out a cool-down before it is tried again
//! - **Wholesale rebuilds**: a reconnect discards every pool and builds new
//!   ones rather than repairing individual connections
//! - **No internal retry**: connect failures surface immediately so the caller
//!   owns the retry policy

mod config;
mod error;
mod manager;
mod routing;

// Re-export public types
pub use config::{PgEndpoint, PoolBounds, ReplicaSetConfig};
pub use error::{Error, Result};
pub use manager::{PgPoolManager, PooledConnection};
pub use routing::{PoolTarget, choose_target, healthy_replicas};
