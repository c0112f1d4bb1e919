//! Primary and replica pools, rebuilt wholesale on reconnect

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres};
use tracing::{debug, info, warn};

use crate::config::{PgEndpoint, PoolBounds, ReplicaSetConfig};
use crate::error::{Error, Result};
use crate::routing::{PoolTarget, choose_target, healthy_replicas};

/// A pool together with the endpoint it was built for.
#[derive(Debug)]
struct EndpointPool {
   label: String,
   bounds: PoolBounds,
   pool: PgPool,
   /// When an acquire last failed. Replicas only.
   failed_at: Mutex<Option<Instant>>,
}

impl EndpointPool {
   fn new(label: String, bounds: PoolBounds, pool: PgPool) -> Self {
      Self {
         label,
         bounds,
         pool,
         failed_at: Mutex::new(None),
      }
   }

   /// Maps an acquire failure onto the error taxonomy. A timeout while every
   /// connection is leased is exhaustion; a timeout with free slots means new
   /// connections cannot be opened.
   fn classify(&self, err: sqlx::Error) -> Error {
      match err {
         sqlx::Error::PoolTimedOut
            if self.pool.size() >= self.bounds.max_connections && self.pool.num_idle() == 0 =>
         {
            Error::PoolExhausted {
               endpoint: self.label.clone(),
               max_connections: self.bounds.max_connections,
            }
         }
         source => Error::Unreachable {
            endpoint: self.label.clone(),
            source,
         },
      }
   }
}

/// One generation of pools. Replaced as a unit, never patched.
#[derive(Debug)]
struct PoolSet {
   primary: EndpointPool,
   replicas: Vec<EndpointPool>,
}

impl PoolSet {
   /// Replicas eligible for a read right now.
   fn healthy_replicas(&self, cooldown: Duration) -> Vec<usize> {
      let failures = self
         .replicas
         .iter()
         .map(|replica| *replica.failed_at.lock())
         .collect::<Vec<_>>();
      healthy_replicas(&failures, Instant::now(), cooldown)
   }

   async fn close(&self) {
      self.primary.pool.close().await;
      for replica in &self.replicas {
         replica.pool.close().await;
      }
   }
}

/// A leased connection. Returned to its pool when dropped.
#[derive(Debug)]
pub struct PooledConnection {
   conn: PoolConnection<Postgres>,
}

impl Deref for PooledConnection {
   type Target = PgConnection;

   fn deref(&self) -> &Self::Target {
      &self.conn
   }
}

impl DerefMut for PooledConnection {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut self.conn
   }
}

/// Pools for one primary and any number of replicas.
///
/// ## Routing
///
/// - `acquire(true)` always draws from the primary
/// - `acquire(false)` draws from a random replica and falls back to the
///   primary when no replica is configured or the chosen one fails
/// - A replica that failed an acquire is skipped for
///   [`replica_cooldown_secs`](ReplicaSetConfig::replica_cooldown_secs)
///
/// ## Lifecycle
///
/// Pools are built by [`reinitialize`](Self::reinitialize) and discarded by
/// [`teardown`](Self::teardown). Each rebuild swaps in a complete new
/// generation; tasks already holding a connection from the previous
/// generation keep it until they drop it, after which the old pools close.
///
/// Connect failures are reported, never retried here.
#[derive(Debug)]
pub struct PgPoolManager {
   config: ReplicaSetConfig,
   pools: RwLock<Option<Arc<PoolSet>>>,
}

impl PgPoolManager {
   /// Creates a manager with no pools. Call [`reinitialize`](Self::reinitialize)
   /// before acquiring.
   pub fn new(config: ReplicaSetConfig) -> Self {
      Self {
         config,
         pools: RwLock::new(None),
      }
   }

   pub fn config(&self) -> &ReplicaSetConfig {
      &self.config
   }

   pub fn is_initialized(&self) -> bool {
      self.pools.read().is_some()
   }

   /// Builds a fresh generation of pools from the stored configuration.
   ///
   /// The primary connects eagerly so an unreachable server is reported here.
   /// Replica pools connect lazily on first use.
   pub async fn reinitialize(&self) -> Result<()> {
      let primary = self.connect_primary().await?;

      let replicas = self
         .config
         .replicas
         .iter()
         .map(|endpoint| self.lazy_pool(endpoint, self.config.replica_pool))
         .collect::<Vec<_>>();

      let replica_count = replicas.len();
      let previous = self.pools.write().replace(Arc::new(PoolSet { primary, replicas }));

      if let Some(previous) = previous {
         tokio::spawn(async move { previous.close().await });
      }

      info!(
         primary = %self.config.primary.label(),
         replicas = replica_count,
         "connection pools initialized"
      );

      Ok(())
   }

   /// Closes all pools. Safe to call when nothing is initialized.
   pub async fn teardown(&self) {
      let previous = self.pools.write().take();

      if let Some(previous) = previous {
         previous.close().await;
         debug!(primary = %previous.primary.label, "connection pools torn down");
      }
   }

   /// Leases a connection; see the type-level docs for routing.
   pub async fn acquire(&self, write: bool) -> Result<PooledConnection> {
      let set = self.current()?;

      let healthy = if write {
         Vec::new()
      } else {
         set.healthy_replicas(self.config.replica_cooldown())
      };

      let target = {
         let mut rng = rand::thread_rng();
         choose_target(write, healthy.len(), &mut rng)
      };

      if let PoolTarget::Replica(slot) = target {
         let replica = &set.replicas[healthy[slot]];

         match replica.pool.acquire().await {
            Ok(conn) => {
               *replica.failed_at.lock() = None;
               return Ok(PooledConnection { conn });
            }
            Err(e) => {
               *replica.failed_at.lock() = Some(Instant::now());
               warn!(
                  replica = %replica.label,
                  error = %e,
                  cooldown = ?self.config.replica_cooldown(),
                  "replica unavailable, reading from primary"
               );
            }
         }
      }

      let conn = set
         .primary
         .pool
         .acquire()
         .await
         .map_err(|e| set.primary.classify(e))?;

      Ok(PooledConnection { conn })
   }

   /// Returns a connection to its pool. Equivalent to dropping it.
   pub fn release(&self, conn: PooledConnection) {
      drop(conn);
   }

   /// Runs a trivial round trip against the primary within `timeout`.
   pub async fn probe(&self, timeout: Duration) -> Result<()> {
      let endpoint = self.config.primary.label();
      let probe_endpoint = endpoint.clone();

      let round_trip = async move {
         let mut conn = self.acquire(true).await?;
         sqlx::query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map_err(|source| Error::Unreachable {
               endpoint: probe_endpoint,
               source,
            })?;
         Ok::<(), Error>(())
      };

      let outcome = tokio::time::timeout(timeout, round_trip).await;
      outcome.unwrap_or(Err(Error::Timeout {
         endpoint,
         elapsed: timeout,
      }))
   }

   fn current(&self) -> Result<Arc<PoolSet>> {
      self.pools.read().clone().ok_or(Error::NotInitialized)
   }

   fn pool_options(&self, bounds: PoolBounds) -> PgPoolOptions {
      let bounds = bounds.normalized();
      PgPoolOptions::new()
         .min_connections(bounds.min_connections)
         .max_connections(bounds.max_connections)
         .acquire_timeout(self.config.acquire_timeout())
   }

   async fn connect_primary(&self) -> Result<EndpointPool> {
      let endpoint = &self.config.primary;
      let label = endpoint.label();
      let connect = self
         .pool_options(self.config.primary_pool)
         .connect_with(endpoint.connect_options());

      let timeout = self.config.connect_timeout();
      let pool = match tokio::time::timeout(timeout, connect).await {
         Ok(Ok(pool)) => pool,
         Ok(Err(source)) => {
            return Err(Error::Unreachable {
               endpoint: label,
               source,
            });
         }
         Err(_) => {
            return Err(Error::Timeout {
               endpoint: label,
               elapsed: timeout,
            });
         }
      };

      Ok(EndpointPool::new(
         label,
         self.config.primary_pool.normalized(),
         pool,
      ))
   }

   fn lazy_pool(&self, endpoint: &PgEndpoint, bounds: PoolBounds) -> EndpointPool {
      EndpointPool::new(
         endpoint.label(),
         bounds.normalized(),
         self
            .pool_options(bounds)
            .connect_lazy_with(endpoint.connect_options()),
      )
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn unreachable_config() -> ReplicaSetConfig {
      ReplicaSetConfig {
         primary: PgEndpoint {
            host: "127.0.0.1".into(),
            port: 1,
            ..Default::default()
         },
         acquire_timeout_secs: 1,
         connect_timeout_secs: 2,
         ..Default::default()
      }
   }

   /// A manager whose pools point at closed ports, installed without
   /// connecting.
   fn lazy_manager() -> PgPoolManager {
      let mut config = unreachable_config();
      config.replicas = vec![PgEndpoint {
         host: "127.0.0.1".into(),
         port: 2,
         ..Default::default()
      }];

      let manager = PgPoolManager::new(config);
      let set = PoolSet {
         primary: manager.lazy_pool(&manager.config.primary, PoolBounds::new(0, 1)),
         replicas: vec![manager.lazy_pool(&manager.config.replicas[0], PoolBounds::new(0, 1))],
      };
      *manager.pools.write() = Some(Arc::new(set));
      manager
   }

   #[tokio::test]
   async fn test_failed_replica_sits_out_cooldown() {
      let manager = lazy_manager();

      let err = manager.acquire(false).await.unwrap_err();
      assert!(err.is_connectivity(), "unexpected error: {err:?}");

      let set = manager.current().unwrap();
      assert!(set.replicas[0].failed_at.lock().is_some());
      assert!(set.healthy_replicas(manager.config().replica_cooldown()).is_empty());
      assert_eq!(set.healthy_replicas(Duration::ZERO), vec![0]);
   }

   #[tokio::test]
   async fn test_timeout_with_free_slots_is_unreachable() {
      let manager = lazy_manager();
      let set = manager.current().unwrap();

      let err = set.primary.classify(sqlx::Error::PoolTimedOut);

      assert!(matches!(err, Error::Unreachable { .. }));
      assert!(err.is_connectivity());
   }

   #[tokio::test]
   async fn test_acquire_before_reinitialize_fails() {
      let manager = PgPoolManager::new(ReplicaSetConfig::default());

      assert!(!manager.is_initialized());
      assert!(matches!(manager.acquire(true).await, Err(Error::NotInitialized)));
      assert!(matches!(manager.acquire(false).await, Err(Error::NotInitialized)));
   }

   #[tokio::test]
   async fn test_probe_before_reinitialize_is_connectivity_error() {
      let manager = PgPoolManager::new(ReplicaSetConfig::default());

      let err = manager.probe(Duration::from_secs(1)).await.unwrap_err();
      assert!(err.is_connectivity());
   }

   #[tokio::test]
   async fn test_teardown_without_pools_is_noop() {
      let manager = PgPoolManager::new(ReplicaSetConfig::default());

      manager.teardown().await;
      manager.teardown().await;

      assert!(!manager.is_initialized());
   }

   #[tokio::test]
   async fn test_reinitialize_unreachable_primary() {
      let manager = PgPoolManager::new(unreachable_config());

      let err = manager.reinitialize().await.unwrap_err();

      assert!(err.is_connectivity(), "unexpected error: {err:?}");
      assert!(!manager.is_initialized());
   }
}
