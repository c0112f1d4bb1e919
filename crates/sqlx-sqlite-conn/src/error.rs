//! Error types for sqlx-sqlite-conn

use thiserror::Error;

/// Errors that may occur when working with sqlx-sqlite-conn
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library. Standard sqlx errors are converted to this variant
   #[error("Sqlx error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// Database has been closed and cannot be used
   #[error("Database has been closed")]
   DatabaseClosed,

   /// An additive migration could not add a column to an existing table
   #[error("failed to add column '{column}' to table '{table}': {source}")]
   Migration {
      table: String,
      column: String,
      #[source]
      source: sqlx::Error,
   },
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
