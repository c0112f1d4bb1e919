//! Error types for sqlx-pg-replicas

use std::time::Duration;

use thiserror::Error;

/// Errors that may occur when working with the primary and replica pools
#[derive(Error, Debug)]
pub enum Error {
   /// The server could not be reached or refused the connection
   #[error("{endpoint} is unreachable: {source}")]
   Unreachable {
      endpoint: String,
      #[source]
      source: sqlx::Error,
   },

   /// Every connection in the pool is leased and none came back in time
   #[error("pool for {endpoint} exhausted ({max_connections} connections in use)")]
   PoolExhausted {
      endpoint: String,
      max_connections: u32,
   },

   /// A connect or probe round-trip did not finish in time
   #[error("{endpoint} did not respond within {elapsed:?}")]
   Timeout { endpoint: String, elapsed: Duration },

   /// Pools have not been built yet, or were torn down
   #[error("connection pools are not initialized")]
   NotInitialized,
}

impl Error {
   /// True for failures that mean the server is gone, as opposed to a
   /// temporarily busy pool.
   pub fn is_connectivity(&self) -> bool {
      !matches!(self, Error::PoolExhausted { .. })
   }

   pub fn error_code(&self) -> String {
      match self {
         Error::Unreachable { .. } => "UNREACHABLE".to_string(),
         Error::PoolExhausted { .. } => "POOL_EXHAUSTED".to_string(),
         Error::Timeout { .. } => "TIMEOUT".to_string(),
         Error::NotInitialized => "NOT_INITIALIZED".to_string(),
      }
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_pool_exhausted_is_not_connectivity() {
      let err = Error::PoolExhausted {
         endpoint: "db1:5432/inventory".into(),
         max_connections: 20,
      };
      assert!(!err.is_connectivity());
      assert_eq!(err.error_code(), "POOL_EXHAUSTED");
      assert!(err.to_string().contains("20 connections"));
   }

   #[test]
   fn test_unreachable_is_connectivity() {
      let err = Error::Unreachable {
         endpoint: "db1:5432/inventory".into(),
         source: sqlx::Error::PoolTimedOut,
      };
      assert!(err.is_connectivity());
      assert_eq!(err.error_code(), "UNREACHABLE");
      assert!(err.to_string().contains("db1:5432/inventory"));
   }

   #[test]
   fn test_timeout_and_not_initialized_are_connectivity() {
      let timeout = Error::Timeout {
         endpoint: "db1".into(),
         elapsed: Duration::from_secs(5),
      };
      assert!(timeout.is_connectivity());
      assert_eq!(timeout.error_code(), "TIMEOUT");

      assert!(Error::NotInitialized.is_connectivity());
      assert_eq!(Error::NotInitialized.error_code(), "NOT_INITIALIZED");
   }
}
