//! Startup configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx_pg_replicas::ReplicaSetConfig;
use tracing::{info, warn};

/// Everything [`Inventory::open`](crate::Inventory::open) needs.
///
/// Every field is optional in the JSON file; missing fields take the
/// defaults listed below.
///
/// # Examples
///
/// ```
/// use inventory_failover::InventoryConfig;
///
/// let config: InventoryConfig = serde_json::from_str(r#"{
///    "remote": {"primary": {"host": "db-primary"}},
///    "monitor_interval_secs": 10
/// }"#).unwrap();
///
/// assert_eq!(config.remote.primary.host, "db-primary");
/// assert_eq!(config.pull_history_days, 90);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
   /// Primary, replicas and pool bounds
   pub remote: ReplicaSetConfig,

   /// Local cache file
   ///
   /// Default: `local_inventory.db`
   pub local_path: PathBuf,

   /// Interval between reconnect attempts while degraded
   ///
   /// Default: 30 seconds
   pub monitor_interval_secs: u64,

   /// Bound on the reconnect probe round trip
   ///
   /// Default: 5 seconds
   pub probe_timeout_secs: u64,

   /// How many days of scan history a pull copies into the local cache
   ///
   /// Default: 90
   pub pull_history_days: u32,

   /// Leases maturing within this many days get the expiry flag
   ///
   /// Default: 90
   pub expiry_warning_days: i64,
}

impl Default for InventoryConfig {
   fn default() -> Self {
      Self {
         remote: ReplicaSetConfig::default(),
         local_path: PathBuf::from("local_inventory.db"),
         monitor_interval_secs: 30,
         probe_timeout_secs: 5,
         pull_history_days: 90,
         expiry_warning_days: 90,
      }
   }
}

impl InventoryConfig {
   /// Reads the configuration file at `path`.
   ///
   /// A missing, unreadable or invalid file is not an error: it is logged and
   /// the built-in defaults are used instead.
   pub fn load(path: impl AsRef<Path>) -> Self {
      let path = path.as_ref();

      let contents = match std::fs::read_to_string(path) {
         Ok(contents) => contents,
         Err(e) => {
            warn!(path = %path.display(), error = %e, "config file unavailable, using defaults");
            return Self::default();
         }
      };

      match serde_json::from_str(&contents) {
         Ok(config) => {
            info!(path = %path.display(), "loaded configuration");
            config
         }
         Err(e) => {
            warn!(path = %path.display(), error = %e, "config file invalid, using defaults");
            Self::default()
         }
      }
   }

   pub fn monitor_interval(&self) -> Duration {
      Duration::from_secs(self.monitor_interval_secs.max(1))
   }

   pub fn probe_timeout(&self) -> Duration {
      Duration::from_secs(self.probe_timeout_secs.max(1))
   }

   pub fn pull_window(&self) -> time::Duration {
      time::Duration::days(i64::from(self.pull_history_days))
   }
}
