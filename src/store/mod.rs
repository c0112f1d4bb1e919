//! The two stores behind the router.
//!
//! Both implement [`InventoryStore`] with their own SQL dialect. The remote
//! side additionally implements [`RemoteBackend`] for the lifecycle calls the
//! connectivity monitor and sync engine need.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::Result;
use crate::model::{Asset, CheckState, FlaggedAsset, HistoryEntry, InventoryEntry, ScanEvent};
use crate::mutation::Mutation;

mod local;
mod remote;

pub use local::{LocalStore, MirrorStats};
pub use remote::PostgresStore;

/// Note appended to an asset's comments when it is soft-deleted.
pub(crate) const SOFT_DELETE_NOTE: &str = "Asset deleted from inventory";

/// Reads and writes shared by the local cache and the remote database.
#[async_trait]
pub trait InventoryStore: Send + Sync {
   /// Applies one mutation in its own transaction and returns the number of
   /// rows it touched.
   async fn apply(&self, mutation: &Mutation) -> Result<u64>;

   async fn asset_by_id(&self, asset_id: &str) -> Result<Option<Asset>>;

   async fn asset_by_serial(&self, serial: &str) -> Result<Option<Asset>>;

   /// Assets whose latest check-in/out event has the given state, most
   /// recent first.
   async fn inventory_by_state(
      &self,
      state: CheckState,
      include_deleted: bool,
   ) -> Result<Vec<InventoryEntry>>;

   /// Newest first.
   async fn asset_history(&self, asset_id: &str, limit: u32) -> Result<Vec<ScanEvent>>;

   /// Events at or after `since` for assets that still exist, newest first.
   async fn history_since(&self, since: OffsetDateTime) -> Result<Vec<HistoryEntry>>;

   /// Events whose asset id or serial number contains `term`, newest first.
   async fn search_history(&self, term: &str) -> Result<Vec<HistoryEntry>>;

   /// The most recent `in` or `out` event for an asset.
   async fn latest_check_event(&self, asset_id: &str) -> Result<Option<ScanEvent>>;

   /// Flagged assets, most recently flagged first.
   async fn flagged_assets(&self) -> Result<Vec<FlaggedAsset>>;

   /// Assets with the lease expiry flag set and a maturity date.
   async fn expiry_flagged_assets(&self, include_deleted: bool) -> Result<Vec<Asset>>;

   /// `(asset_id, maturity_date)` for every asset with a non-empty maturity date.
   async fn lease_maturities(&self) -> Result<Vec<(String, String)>>;
}

/// Everything a pull copies from the remote primary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirrorSnapshot {
   pub assets: Vec<Asset>,
   pub scan_events: Vec<ScanEvent>,
}

/// Lifecycle of the remote database as seen by the monitor and sync engine.
#[async_trait]
pub trait RemoteBackend: InventoryStore {
   /// Discards any pools and connects afresh.
   async fn reinitialize(&self) -> Result<()>;

   /// One trivial round trip against the primary.
   async fn probe(&self, timeout: std::time::Duration) -> Result<()>;

   /// Closes every pool. Calls fail as unreachable until the next
   /// [`reinitialize`](Self::reinitialize).
   async fn teardown(&self);

   /// Reads all assets and the scan events at or after `history_since` from
   /// the primary.
   async fn snapshot(&self, history_since: OffsetDateTime) -> Result<MirrorSnapshot>;
}

/// Parameter placeholder styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
   /// `?1, ?2, ...`
   Sqlite,
   /// `$1, $2, ...`
   Postgres,
}

impl Dialect {
   pub(crate) fn placeholder(self, n: usize) -> String {
      match self {
         Dialect::Sqlite => format!("?{n}"),
         Dialect::Postgres => format!("${n}"),
      }
   }
}

/// Insert-or-update for the given columns.
///
/// Binds, in order: `asset_id`, one value per column, then `last_updated`.
/// On conflict only the listed columns and `last_updated` change.
pub(crate) fn upsert_asset_sql(dialect: Dialect, columns: &[&str]) -> String {
   let mut insert_columns = vec!["asset_id"];
   insert_columns.extend_from_slice(columns);
   insert_columns.push("last_updated");

   let placeholders = (1..=insert_columns.len())
      .map(|n| dialect.placeholder(n))
      .collect::<Vec<_>>()
      .join(", ");

   let updates = columns
      .iter()
      .chain(std::iter::once(&"last_updated"))
      .map(|column| format!("{column} = excluded.{column}"))
      .collect::<Vec<_>>()
      .join(", ");

   format!(
      "INSERT INTO assets ({}) VALUES ({}) ON CONFLICT (asset_id) DO UPDATE SET {}",
      insert_columns.join(", "),
      placeholders,
      updates
   )
}

/// Builds a `LIKE` pattern matching `term` anywhere, with `\` as escape.
pub(crate) fn contains_pattern(term: &str) -> String {
   let escaped = term
      .replace('\\', "\\\\")
      .replace('%', "\\%")
      .replace('_', "\\_");
   format!("%{escaped}%")
}
