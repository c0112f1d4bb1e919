//! # inventory-failover
//!
//! Inventory data access over a PostgreSQL primary and its read replicas,
//! with a local SQLite cache that takes over while the primary is
//! unreachable.
//!
//! ## Core Types
//!
//! - **[`Inventory`]**: Routes every operation to the authoritative store
//! - **[`InventoryConfig`]**: Startup configuration, read from JSON
//! - **[`LocalStore`]**: SQLite cache and offline write queue
//! - **[`PostgresStore`]**: The remote primary and replicas
//! - **[`Mutation`]**: A typed write, as applied and as queued
//! - **[`Error`]**: Error type for inventory operations
//!
//! ## Failover
//!
//! - **Connected**: reads and writes go to PostgreSQL, reads spread over the
//!   replicas
//! - **Degraded**: entered on the first connectivity failure; everything goes
//!   to the local cache and writes are queued
//! - **Reconnect**: a background monitor probes the primary, refreshes the
//!   cache, switches back and replays the queue in commit order
//!
//! Conflicts are not detected: a replayed write overwrites whatever the
//! remote holds.

mod config;
mod error;
mod inventory;
pub mod lease;
mod mode;
mod model;
mod monitor;
mod mutation;
mod store;
mod sync;

// Re-export public types
pub use config::InventoryConfig;
pub use error::{Error, Result};
pub use inventory::Inventory;
pub use mode::ModeController;
pub use model::{
   Asset, AssetFields, AssetFlag, CheckState, CurrentStatus, DELETED_STATUS, ExpiringAsset,
   ExpiryCheck, ExpiryRefresh, FlaggedAsset, HistoryEntry, InventoryEntry, LeaseImportReport,
   LeaseInfo, Mode, NO_HISTORY_NOTE, NewScanEvent, ScanEvent, ScanStatus, WriteOutcome, now_utc,
};
pub use monitor::{ConnectivityMonitor, MonitorHandle};
pub use mutation::{AssetMutation, Mutation, QueueOperation, ScanEventMutation, SyncQueueEntry};
pub use store::{InventoryStore, LocalStore, MirrorSnapshot, MirrorStats, PostgresStore, RemoteBackend};
pub use sync::{PushReport, SyncEngine, SyncReport};

pub use sqlx_pg_replicas::{PgEndpoint, PoolBounds, ReplicaSetConfig};
pub use sqlx_sqlite_conn::LocalDatabaseConfig;
