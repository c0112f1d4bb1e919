//! Configuration for the primary and replica pools

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;

/// Where and how to reach one PostgreSQL server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PgEndpoint {
   pub host: String,
   pub port: u16,
   pub database: String,
   pub username: String,
   pub password: String,
}

impl Default for PgEndpoint {
   fn default() -> Self {
      Self {
         host: "localhost".to_string(),
         port: 5432,
         database: "inventory".to_string(),
         username: "inventory_user".to_string(),
         password: String::new(),
      }
   }
}

impl PgEndpoint {
   /// `host:port/database`, used to label errors and log lines. Never
   /// includes credentials.
   pub fn label(&self) -> String {
      format!("{}:{}/{}", self.host, self.port, self.database)
   }

   pub(crate) fn connect_options(&self) -> PgConnectOptions {
      let options = PgConnectOptions::new()
         .host(&self.host)
         .port(self.port)
         .database(&self.database)
         .username(&self.username);

      if self.password.is_empty() {
         options
      } else {
         options.password(&self.password)
      }
   }
}

/// Connection count bounds for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBounds {
   pub min_connections: u32,
   pub max_connections: u32,
}

impl PoolBounds {
   pub const fn new(min_connections: u32, max_connections: u32) -> Self {
      Self {
         min_connections,
         max_connections,
      }
   }

   /// Clamps `min` to `max` and keeps `max` at one or more.
   pub(crate) fn normalized(self) -> Self {
      let max = self.max_connections.max(1);
      Self::new(self.min_connections.min(max), max)
   }
}

/// Configuration for a [`PgPoolManager`](crate::PgPoolManager)
///
/// # Examples
///
/// ```
/// use sqlx_pg_replicas::{PgEndpoint, ReplicaSetConfig};
///
/// let config = ReplicaSetConfig {
///    primary: PgEndpoint {
///       host: "db-primary".into(),
///       ..Default::default()
///    },
///    replicas: vec![PgEndpoint {
///       host: "db-replica-1".into(),
///       ..Default::default()
///    }],
///    ..Default::default()
/// };
///
/// assert_eq!(config.primary_pool.max_connections, 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaSetConfig {
   /// The read-write server
   pub primary: PgEndpoint,

   /// Read-only servers. May be empty, in which case reads go to the primary.
   pub replicas: Vec<PgEndpoint>,

   /// Default: 3..20
   pub primary_pool: PoolBounds,

   /// Applied to each replica pool. Default: 1..5
   pub replica_pool: PoolBounds,

   /// How long `acquire` waits for a free connection before giving up.
   ///
   /// Default: 5 seconds
   pub acquire_timeout_secs: u64,

   /// Bound on establishing the primary connection during `reinitialize`.
   ///
   /// Default: 5 seconds
   pub connect_timeout_secs: u64,

   /// How long a replica that failed an acquire is left out of read routing.
   ///
   /// Default: 30 seconds
   pub replica_cooldown_secs: u64,
}

impl Default for ReplicaSetConfig {
   fn default() -> Self {
      Self {
         primary: PgEndpoint::default(),
         replicas: Vec::new(),
         primary_pool: PoolBounds::new(3, 20),
         replica_pool: PoolBounds::new(1, 5),
         acquire_timeout_secs: 5,
         connect_timeout_secs: 5,
         replica_cooldown_secs: 30,
      }
   }
}

impl ReplicaSetConfig {
   pub fn acquire_timeout(&self) -> Duration {
      Duration::from_secs(self.acquire_timeout_secs)
   }

   pub fn connect_timeout(&self) -> Duration {
      Duration::from_secs(self.connect_timeout_secs)
   }

   pub fn replica_cooldown(&self) -> Duration {
      Duration::from_secs(self.replica_cooldown_secs)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_defaults() {
      let config = ReplicaSetConfig::default();

      assert_eq!(config.primary.port, 5432);
      assert_eq!(config.primary.database, "inventory");
      assert!(config.replicas.is_empty());
      assert_eq!(config.primary_pool, PoolBounds::new(3, 20));
      assert_eq!(config.replica_pool, PoolBounds::new(1, 5));
      assert_eq!(config.acquire_timeout(), Duration::from_secs(5));
      assert_eq!(config.replica_cooldown(), Duration::from_secs(30));
   }

   #[test]
   fn test_partial_json_uses_defaults() {
      let config: ReplicaSetConfig = serde_json::from_str(
         r#"{"primary": {"host": "db1", "password": "secret"}, "replicas": [{"host": "db2"}]}"#,
      )
      .unwrap();

      assert_eq!(config.primary.host, "db1");
      assert_eq!(config.primary.port, 5432);
      assert_eq!(config.replicas.len(), 1);
      assert_eq!(config.replicas[0].host, "db2");
      assert_eq!(config.replica_pool.max_connections, 5);
   }

   #[test]
   fn test_label_omits_credentials() {
      let endpoint = PgEndpoint {
         host: "db1".into(),
         password: "hunter2".into(),
         ..Default::default()
      };

      assert_eq!(endpoint.label(), "db1:5432/inventory");
   }

   #[test]
   fn test_bounds_normalized() {
      assert_eq!(PoolBounds::new(10, 4).normalized(), PoolBounds::new(4, 4));
      assert_eq!(PoolBounds::new(0, 0).normalized(), PoolBounds::new(0, 1));
      assert_eq!(PoolBounds::new(1, 5).normalized(), PoolBounds::new(1, 5));
   }
}
