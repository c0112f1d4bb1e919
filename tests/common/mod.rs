#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use inventory_failover::{
   Asset, CheckState, Error, FlaggedAsset, HistoryEntry, Inventory, InventoryConfig,
   InventoryEntry, InventoryStore, LocalStore, MirrorSnapshot, Mutation, RemoteBackend, Result,
   ScanEvent,
};
use tempfile::TempDir;
use time::OffsetDateTime;

pub fn init_tracing() {
   let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A remote backed by a SQLite file that can be switched off.
///
/// While off, or after a teardown until the next reinitialize, every call
/// fails as unreachable.
pub struct FlakyRemote {
   store: LocalStore,
   reachable: AtomicBool,
   initialized: AtomicBool,
   /// Data calls fail as an exhausted pool; probe and snapshot still work
   busy: AtomicBool,
   /// Remaining successful applies before going offline, if limited
   apply_budget: Mutex<Option<usize>>,
   rejected_asset: Mutex<Option<String>>,
   applied: Mutex<Vec<Mutation>>,
   reinitializations: AtomicUsize,
}

impl FlakyRemote {
   pub async fn new(dir: &TempDir, reachable: bool) -> Arc<Self> {
      let store = LocalStore::open(dir.path().join("remote.db"), None)
         .await
         .expect("Failed to open remote store");
      store.ensure_schema().await.expect("Failed to create remote schema");

      Arc::new(Self {
         store,
         reachable: AtomicBool::new(reachable),
         initialized: AtomicBool::new(false),
         busy: AtomicBool::new(false),
         apply_budget: Mutex::new(None),
         rejected_asset: Mutex::new(None),
         applied: Mutex::new(Vec::new()),
         reinitializations: AtomicUsize::new(0),
      })
   }

   /// The data behind the remote, bypassing reachability.
   pub fn store(&self) -> &LocalStore {
      &self.store
   }

   pub fn set_reachable(&self, reachable: bool) {
      self.reachable.store(reachable, Ordering::SeqCst);
   }

   pub fn set_busy(&self, busy: bool) {
      self.busy.store(busy, Ordering::SeqCst);
   }

   /// Goes offline after `count` more successful applies.
   pub fn go_offline_after(&self, count: usize) {
      *self.apply_budget.lock().unwrap() = Some(count);
   }

   /// Rejects every write to `asset_id` as a constraint violation.
   pub fn reject_asset(&self, asset_id: &str) {
      *self.rejected_asset.lock().unwrap() = Some(asset_id.to_string());
   }

   pub fn applied(&self) -> Vec<Mutation> {
      self.applied.lock().unwrap().clone()
   }

   pub fn reinitializations(&self) -> usize {
      self.reinitializations.load(Ordering::SeqCst)
   }

   fn check(&self) -> Result<()> {
      if self.reachable.load(Ordering::SeqCst) && self.initialized.load(Ordering::SeqCst) {
         Ok(())
      } else {
         Err(Error::Unreachable("remote offline".into()))
      }
   }

   fn check_pool(&self) -> Result<()> {
      self.check()?;
      if self.busy.load(Ordering::SeqCst) {
         return Err(Error::PoolExhausted {
            pool: "remote.db".into(),
            max_connections: 1,
         });
      }
      Ok(())
   }
}

#[async_trait]
impl InventoryStore for FlakyRemote {
   async fn apply(&self, mutation: &Mutation) -> Result<u64> {
      self.check_pool()?;

      if self.rejected_asset.lock().unwrap().as_deref() == Some(mutation.asset_id()) {
         return Err(Error::ConstraintViolation("rejected by remote".into()));
      }

      let rows = self.store.apply(mutation).await?;
      self.applied.lock().unwrap().push(mutation.clone());

      let mut budget = self.apply_budget.lock().unwrap();
      if let Some(remaining) = budget.as_mut() {
         *remaining = remaining.saturating_sub(1);
         if *remaining == 0 {
            self.reachable.store(false, Ordering::SeqCst);
            *budget = None;
         }
      }

      Ok(rows)
   }

   async fn asset_by_id(&self, asset_id: &str) -> Result<Option<Asset>> {
      self.check_pool()?;
      self.store.asset_by_id(asset_id).await
   }

   async fn asset_by_serial(&self, serial: &str) -> Result<Option<Asset>> {
      self.check_pool()?;
      self.store.asset_by_serial(serial).await
   }

   async fn inventory_by_state(
      &self,
      state: CheckState,
      include_deleted: bool,
   ) -> Result<Vec<InventoryEntry>> {
      self.check_pool()?;
      self.store.inventory_by_state(state, include_deleted).await
   }

   async fn asset_history(&self, asset_id: &str, limit: u32) -> Result<Vec<ScanEvent>> {
      self.check_pool()?;
      self.store.asset_history(asset_id, limit).await
   }

   async fn history_since(&self, since: OffsetDateTime) -> Result<Vec<HistoryEntry>> {
      self.check_pool()?;
      self.store.history_since(since).await
   }

   async fn search_history(&self, term: &str) -> Result<Vec<HistoryEntry>> {
      self.check_pool()?;
      self.store.search_history(term).await
   }

   async fn latest_check_event(&self, asset_id: &str) -> Result<Option<ScanEvent>> {
      self.check_pool()?;
      self.store.latest_check_event(asset_id).await
   }

   async fn flagged_assets(&self) -> Result<Vec<FlaggedAsset>> {
      self.check_pool()?;
      self.store.flagged_assets().await
   }

   async fn expiry_flagged_assets(&self, include_deleted: bool) -> Result<Vec<Asset>> {
      self.check_pool()?;
      self.store.expiry_flagged_assets(include_deleted).await
   }

   async fn lease_maturities(&self) -> Result<Vec<(String, String)>> {
      self.check_pool()?;
      self.store.lease_maturities().await
   }
}

#[async_trait]
impl RemoteBackend for FlakyRemote {
   async fn reinitialize(&self) -> Result<()> {
      self.reinitializations.fetch_add(1, Ordering::SeqCst);
      if !self.reachable.load(Ordering::SeqCst) {
         return Err(Error::Unreachable("connection refused".into()));
      }
      self.initialized.store(true, Ordering::SeqCst);
      Ok(())
   }

   async fn probe(&self, _timeout: Duration) -> Result<()> {
      self.check()
   }

   async fn teardown(&self) {
      self.initialized.store(false, Ordering::SeqCst);
   }

   async fn snapshot(&self, history_since: OffsetDateTime) -> Result<MirrorSnapshot> {
      self.check()?;
      Ok(MirrorSnapshot {
         assets: self.store.all_assets().await?,
         scan_events: self.store.scan_events_since(history_since).await?,
      })
   }
}

/// An inventory over a temp-file cache and a [`FlakyRemote`].
pub struct TestEnv {
   pub inventory: Inventory,
   pub remote: Arc<FlakyRemote>,
   pub local: LocalStore,
   pub config: InventoryConfig,
   pub dir: TempDir,
}

impl TestEnv {
   /// Reopens the inventory on the same files, as after a restart.
   pub async fn reopen(self) -> TestEnv {
      self.inventory.close().await;

      let local = LocalStore::open(&self.config.local_path, None)
         .await
         .expect("Failed to reopen local store");
      let inventory = Inventory::with_remote(self.config.clone(), local.clone(), self.remote.clone())
         .await
         .expect("Failed to reopen inventory");

      TestEnv {
         inventory,
         local,
         ..self
      }
   }
}

pub fn test_config(dir: &TempDir, monitor_interval_secs: u64) -> InventoryConfig {
   InventoryConfig {
      local_path: dir.path().join("cache").join("local_inventory.db"),
      monitor_interval_secs,
      ..Default::default()
   }
}

pub async fn create_env(remote_reachable: bool) -> TestEnv {
   create_env_with_interval(remote_reachable, 3600).await
}

pub async fn create_env_with_interval(remote_reachable: bool, monitor_interval_secs: u64) -> TestEnv {
   init_tracing();

   let dir = TempDir::new().expect("Failed to create temp directory");
   let remote = FlakyRemote::new(&dir, remote_reachable).await;
   let config = test_config(&dir, monitor_interval_secs);

   let local = LocalStore::open(&config.local_path, None)
      .await
      .expect("Failed to open local store");
   let inventory = Inventory::with_remote(config.clone(), local.clone(), remote.clone())
      .await
      .expect("Failed to open inventory");

   TestEnv {
      inventory,
      remote,
      local,
      config,
      dir,
   }
}

/// Polls `condition` every 50ms for up to `timeout`.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
   F: AsyncFnMut() -> bool,
{
   let deadline = tokio::time::Instant::now() + timeout;
   while tokio::time::Instant::now() < deadline {
      if condition().await {
         return true;
      }
      tokio::time::sleep(Duration::from_millis(50)).await;
   }
   condition().await
}
