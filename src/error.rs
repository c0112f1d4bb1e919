use sqlx::error::ErrorKind;

/// Result type alias for inventory operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for inventory operations.
///
/// Absence is not an error: lookups return `Option` or an empty list.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// The remote database cannot be reached. Routed operations never return
   /// this while the local store can absorb the call.
   #[error("remote database unreachable: {0}")]
   Unreachable(String),

   /// Every pooled connection is in use. Retryable; does not change mode.
   #[error("connection pool for {pool} exhausted ({max_connections} connections in use)")]
   PoolExhausted { pool: String, max_connections: u32 },

   /// The store rejected the data (uniqueness, foreign key, not-null, check).
   #[error("constraint violation: {0}")]
   ConstraintViolation(String),

   /// The local cache could not be upgraded to the current schema.
   #[error("schema mismatch: {0}")]
   SchemaMismatch(String),

   /// The caller passed something unusable, e.g. an empty asset id.
   #[error("invalid input: {0}")]
   InvalidInput(String),

   /// A queued sync entry could not be decoded.
   #[error("sync queue entry {id} has a malformed payload: {source}")]
   MalformedPayload {
      id: i64,
      #[source]
      source: serde_json::Error,
   },

   #[error("failed to serialize sync payload: {0}")]
   Serialization(#[from] serde_json::Error),

   /// Any other database error.
   #[error(transparent)]
   Database(sqlx::Error),

   /// The local store was closed.
   #[error("local store has been closed")]
   LocalClosed,

   /// The connectivity monitor is no longer running.
   #[error("connectivity monitor has stopped")]
   MonitorStopped,

   /// A lease CSV could not be read.
   #[error("csv error: {0}")]
   Csv(#[from] csv::Error),

   /// I/O error when accessing database or configuration files.
   #[error("io error: {0}")]
   Io(#[from] std::io::Error),
}

impl Error {
   /// Classifies an error raised by the remote database. Transport failures
   /// and server shutdown are connectivity failures; everything else keeps
   /// its ordinary mapping.
   pub fn remote(err: sqlx::Error) -> Self {
      let unreachable = match &err {
         sqlx::Error::Io(_)
         | sqlx::Error::Tls(_)
         | sqlx::Error::Protocol(_)
         | sqlx::Error::PoolClosed
         | sqlx::Error::WorkerCrashed => true,
         // 08xxx: connection exception, 57P0x: operator intervention / shutdown
         sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| code.starts_with("08") || code.starts_with("57P0")),
         _ => false,
      };

      if unreachable {
         Error::Unreachable(err.to_string())
      } else {
         Error::from(err)
      }
   }

   /// True when the failure means the remote store is gone and the call
   /// should fall back to the local store.
   pub fn is_connectivity(&self) -> bool {
      matches!(self, Error::Unreachable(_))
   }

   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Unreachable(_) => "UNREACHABLE".to_string(),
         Error::PoolExhausted { .. } => "POOL_EXHAUSTED".to_string(),
         Error::ConstraintViolation(_) => "CONSTRAINT_VIOLATION".to_string(),
         Error::SchemaMismatch(_) => "SCHEMA_MISMATCH".to_string(),
         Error::InvalidInput(_) => "INVALID_INPUT".to_string(),
         Error::MalformedPayload { .. } => "MALFORMED_PAYLOAD".to_string(),
         Error::Serialization(_) => "SERIALIZATION_ERROR".to_string(),
         Error::Database(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("DATABASE_{}", code);
            }
            "DATABASE_ERROR".to_string()
         }
         Error::LocalClosed => "LOCAL_CLOSED".to_string(),
         Error::MonitorStopped => "MONITOR_STOPPED".to_string(),
         Error::Csv(_) => "CSV_ERROR".to_string(),
         Error::Io(_) => "IO_ERROR".to_string(),
      }
   }
}

impl From<sqlx::Error> for Error {
   fn from(err: sqlx::Error) -> Self {
      if let Some(db_err) = err.as_database_error() {
         match db_err.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => {
               return Error::ConstraintViolation(db_err.message().to_string());
            }
            _ => {}
         }
      }

      match err {
         sqlx::Error::PoolClosed => Error::LocalClosed,
         other => Error::Database(other),
      }
   }
}

impl From<sqlx_sqlite_conn::Error> for Error {
   fn from(err: sqlx_sqlite_conn::Error) -> Self {
      match err {
         sqlx_sqlite_conn::Error::DatabaseClosed => Error::LocalClosed,
         sqlx_sqlite_conn::Error::Io(e) => Error::Io(e),
         sqlx_sqlite_conn::Error::Sqlx(e) => Error::from(e),
         migration @ sqlx_sqlite_conn::Error::Migration { .. } => {
            Error::SchemaMismatch(migration.to_string())
         }
      }
   }
}

impl From<sqlx_pg_replicas::Error> for Error {
   fn from(err: sqlx_pg_replicas::Error) -> Self {
      match err {
         sqlx_pg_replicas::Error::PoolExhausted {
            endpoint,
            max_connections,
         } => Error::PoolExhausted {
            pool: endpoint,
            max_connections,
         },
         other => Error::Unreachable(other.to_string()),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_error_code_unreachable() {
      let err = Error::Unreachable("connection refused".into());
      assert_eq!(err.error_code(), "UNREACHABLE");
      assert!(err.is_connectivity());
      assert!(err.to_string().contains("connection refused"));
   }

   #[test]
   fn test_error_code_pool_exhausted() {
      let err = Error::PoolExhausted {
         pool: "db1:5432/inventory".into(),
         max_connections: 20,
      };
      assert_eq!(err.error_code(), "POOL_EXHAUSTED");
      assert!(!err.is_connectivity());
      assert!(err.to_string().contains("20 connections"));
   }

   #[test]
   fn test_error_code_invalid_input() {
      let err = Error::InvalidInput("asset id is empty".into());
      assert_eq!(err.error_code(), "INVALID_INPUT");
      assert!(!err.is_connectivity());
   }

   #[test]
   fn test_error_code_malformed_payload() {
      let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
      let err = Error::MalformedPayload { id: 42, source };
      assert_eq!(err.error_code(), "MALFORMED_PAYLOAD");
      assert!(err.to_string().contains("42"));
   }

   #[test]
   fn test_error_code_database_non_database() {
      // RowNotFound is not a database error, so no SQLSTATE
      let err = Error::Database(sqlx::Error::RowNotFound);
      assert_eq!(err.error_code(), "DATABASE_ERROR");
   }

   #[test]
   fn test_error_code_misc() {
      assert_eq!(Error::LocalClosed.error_code(), "LOCAL_CLOSED");
      assert_eq!(Error::MonitorStopped.error_code(), "MONITOR_STOPPED");
      assert_eq!(Error::SchemaMismatch("x".into()).error_code(), "SCHEMA_MISMATCH");
      assert_eq!(
         Error::ConstraintViolation("x".into()).error_code(),
         "CONSTRAINT_VIOLATION"
      );
   }

   #[test]
   fn test_remote_io_is_unreachable() {
      let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
      let err = Error::remote(sqlx::Error::Io(io));
      assert!(err.is_connectivity());
   }

   #[test]
   fn test_remote_pool_closed_is_unreachable() {
      assert!(Error::remote(sqlx::Error::PoolClosed).is_connectivity());
   }

   #[test]
   fn test_remote_row_not_found_is_not_connectivity() {
      let err = Error::remote(sqlx::Error::RowNotFound);
      assert!(!err.is_connectivity());
      assert_eq!(err.error_code(), "DATABASE_ERROR");
   }

   #[test]
   fn test_local_pool_closed_maps_to_local_closed() {
      assert!(matches!(Error::from(sqlx::Error::PoolClosed), Error::LocalClosed));
   }

   #[test]
   fn test_conn_migration_maps_to_schema_mismatch() {
      let err = Error::from(sqlx_sqlite_conn::Error::Migration {
         table: "assets".into(),
         column: "flag_status".into(),
         source: sqlx::Error::RowNotFound,
      });
      assert_eq!(err.error_code(), "SCHEMA_MISMATCH");
      assert!(err.to_string().contains("flag_status"));
   }

   #[test]
   fn test_pg_errors_map_by_class() {
      let exhausted = Error::from(sqlx_pg_replicas::Error::PoolExhausted {
         endpoint: "db1".into(),
         max_connections: 5,
      });
      assert!(!exhausted.is_connectivity());

      let gone = Error::from(sqlx_pg_replicas::Error::NotInitialized);
      assert!(gone.is_connectivity());
   }
}
