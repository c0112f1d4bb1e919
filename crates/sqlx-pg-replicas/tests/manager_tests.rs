use std::time::Duration;

use sqlx_pg_replicas::{Error, PgEndpoint, PgPoolManager, ReplicaSetConfig};

fn endpoint(port: u16) -> PgEndpoint {
   PgEndpoint {
      host: "127.0.0.1".into(),
      port,
      ..Default::default()
   }
}

fn config_with_replicas() -> ReplicaSetConfig {
   ReplicaSetConfig {
      primary: endpoint(1),
      replicas: vec![endpoint(2), endpoint(3)],
      acquire_timeout_secs: 1,
      connect_timeout_secs: 2,
      ..Default::default()
   }
}

#[tokio::test]
async fn test_unreachable_primary_leaves_manager_uninitialized() {
   let manager = PgPoolManager::new(config_with_replicas());

   let err = manager.reinitialize().await.unwrap_err();
   assert!(err.is_connectivity());
   assert_ne!(err.error_code(), "POOL_EXHAUSTED");

   // Replicas are never consulted when the primary is down
   assert!(matches!(manager.acquire(false).await, Err(Error::NotInitialized)));
}

#[tokio::test]
async fn test_repeated_failed_reinitialize_keeps_config() {
   let manager = PgPoolManager::new(config_with_replicas());

   for _ in 0..2 {
      assert!(manager.reinitialize().await.is_err());
   }

   assert_eq!(manager.config().replicas.len(), 2);
   assert!(!manager.is_initialized());
   assert!(manager.probe(Duration::from_millis(200)).await.is_err());
}

#[test]
fn test_config_from_json_file_shape() {
   let config: ReplicaSetConfig = serde_json::from_str(
      r#"{
         "primary": {"host": "10.0.0.5", "port": 5433, "database": "assets", "username": "svc"},
         "replicas": [{"host": "10.0.0.6"}],
         "primary_pool": {"min_connections": 2, "max_connections": 8},
         "acquire_timeout_secs": 3
      }"#,
   )
   .unwrap();

   assert_eq!(config.primary.label(), "10.0.0.5:5433/assets");
   assert_eq!(config.replicas[0].label(), "10.0.0.6:5432/inventory");
   assert_eq!(config.primary_pool.max_connections, 8);
   assert_eq!(config.acquire_timeout(), Duration::from_secs(3));
}
