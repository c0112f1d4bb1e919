//! # sqlx-sqlite-conn
//!
//! A minimal wrapper around SQLx for embedded SQLite caches that are owned by
//! a single process.
//!
//! ## Core Types
//!
//! - **[`LocalDatabase`]**: Database file with one long-lived connection
//! - **[`LocalDatabaseConfig`]**: Timeouts for the connection
//! - **[`ConnectionGuard`]**: RAII guard ensuring exclusive use of the connection
//! - **[`Error`]**: Error type for database operations
//!
//! ## Architecture
//!
//! - **Single connection**: every statement runs on the same connection, so
//!   writers never contend with each other inside the process
//! - **Reconnect-on-error**: a broken connection is replaced on the next acquire
//! - **WAL mode**: enabled when the file is opened
//! - **Additive migrations**: [`schema::ensure_columns`] adds missing columns
//!   and never drops or renames existing ones

mod config;
mod database;
mod error;
mod guard;
pub mod schema;

// Re-export public types
pub use config::LocalDatabaseConfig;
pub use database::LocalDatabase;
pub use error::{Error, Result};
pub use guard::ConnectionGuard;
pub use schema::ColumnDef;
