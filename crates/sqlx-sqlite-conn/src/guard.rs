//! RAII guard around the single local connection

use std::ops::{Deref, DerefMut};

use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection};

/// Exclusive access to the local connection.
///
/// Only one guard exists at a time. Dropping it hands the connection to the
/// next waiting caller.
#[derive(Debug)]
pub struct ConnectionGuard {
   conn: PoolConnection<Sqlite>,
}

impl ConnectionGuard {
   pub(crate) fn new(conn: PoolConnection<Sqlite>) -> Self {
      Self { conn }
   }
}

impl Deref for ConnectionGuard {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      &self.conn
   }
}

impl DerefMut for ConnectionGuard {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut self.conn
   }
}
