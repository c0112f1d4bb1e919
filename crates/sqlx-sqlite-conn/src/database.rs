//! SQLite database backed by a single long-lived connection

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use tracing::debug;

use crate::config::LocalDatabaseConfig;
use crate::error::{Error, Result};
use crate::guard::ConnectionGuard;

/// SQLite database with exactly one connection shared by every caller.
///
/// ## Architecture
///
/// The connection lives in a pool capped at `max_connections=1`, which gives
/// two things for free:
/// - **Serialized access**: callers queue on [`acquire`](Self::acquire) and
///   hold the connection through a [`ConnectionGuard`]
/// - **Reconnect-on-error**: the pool pings the connection before handing it
///   out and transparently reopens the file if the previous one broke
///
/// WAL journal mode is enabled when the connection is opened.
///
/// ## State Management
///
/// - **`closed`**: Prevents use after the database has been closed
/// - **`path`**: Database file path for cleanup operations
#[derive(Debug)]
pub struct LocalDatabase {
   /// Single read-write connection pool (max_connections=1)
   conn: Pool<Sqlite>,

   /// Marks database as closed to prevent further operations
   closed: AtomicBool,

   /// Path to database file
   path: PathBuf,
}

impl LocalDatabase {
   /// Open (creating if needed) the database file at `path`.
   ///
   /// Parent directories are created when missing.
   pub async fn connect(
      path: impl AsRef<Path>,
      custom_config: Option<LocalDatabaseConfig>,
   ) -> Result<Arc<Self>> {
      let path = path.as_ref().to_path_buf();
      let config = custom_config.unwrap_or_default();

      if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
         std::fs::create_dir_all(parent)?;
      }

      let options = SqliteConnectOptions::new()
         .filename(&path)
         .create_if_missing(true)
         .journal_mode(SqliteJournalMode::Wal)
         .synchronous(SqliteSynchronous::Normal)
         .busy_timeout(config.busy_timeout);

      let conn = SqlitePoolOptions::new()
         .max_connections(1)
         .min_connections(1)
         .test_before_acquire(true)
         .acquire_timeout(config.acquire_timeout)
         .connect_with(options)
         .await?;

      debug!(path = %path.display(), "opened local database");

      Ok(Arc::new(Self {
         conn,
         closed: AtomicBool::new(false),
         path,
      }))
   }

   /// Wait for exclusive use of the connection.
   pub async fn acquire(&self) -> Result<ConnectionGuard> {
      if self.is_closed() {
         return Err(Error::DatabaseClosed);
      }

      let conn = self.conn.acquire().await.map_err(|e| match e {
         sqlx::Error::PoolClosed => Error::DatabaseClosed,
         other => Error::Sqlx(other),
      })?;

      Ok(ConnectionGuard::new(conn))
   }

   /// Path to the database file
   pub fn path(&self) -> &Path {
      &self.path
   }

   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::Acquire)
   }

   /// Close the connection. Later calls to [`acquire`](Self::acquire) fail
   /// with [`Error::DatabaseClosed`]. Closing twice is a no-op.
   pub async fn close(&self) {
      if self.closed.swap(true, Ordering::AcqRel) {
         return;
      }

      self.conn.close().await;
      debug!(path = %self.path.display(), "closed local database");
   }
}
