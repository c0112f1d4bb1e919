//! Configuration for the local SQLite connection

use std::time::Duration;

/// Configuration for a [`LocalDatabase`](crate::LocalDatabase)
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_conn::LocalDatabaseConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = LocalDatabaseConfig::default();
///
/// // Override just one field
/// let config = LocalDatabaseConfig {
///    busy_timeout: Duration::from_secs(10),
///    ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct LocalDatabaseConfig {
   /// How long SQLite waits on a locked database file before failing a statement
   ///
   /// Default: 5 seconds
   pub busy_timeout: Duration,

   /// How long a caller waits for the connection to become free
   ///
   /// Every caller shares one connection, so this bounds the wait behind a
   /// long-running statement or transaction.
   ///
   /// Default: 30 seconds
   pub acquire_timeout: Duration,
}

impl Default for LocalDatabaseConfig {
   fn default() -> Self {
      Self {
         busy_timeout: Duration::from_secs(5),
         acquire_timeout: Duration::from_secs(30),
      }
   }
}
