//! SQLite cache and offline write queue

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqliteConnection};
use sqlx_sqlite_conn::schema::ensure_columns;
use sqlx_sqlite_conn::{ColumnDef, LocalDatabase, LocalDatabaseConfig};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, info, warn};

use super::{Dialect, InventoryStore, MirrorSnapshot, SOFT_DELETE_NOTE, contains_pattern, upsert_asset_sql};
use crate::error::{Error, Result};
use crate::model::{Asset, CheckState, FlaggedAsset, HistoryEntry, InventoryEntry, ScanEvent, now_utc};
use crate::mutation::{AssetMutation, Mutation, QueueOperation, ScanEventMutation, SyncQueueEntry};

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS assets (
   asset_id TEXT PRIMARY KEY,
   serial_number TEXT,
   hostname TEXT,
   operational_status TEXT,
   install_status TEXT,
   location TEXT,
   ci_region TEXT,
   owned_by TEXT,
   assigned_to TEXT,
   comments TEXT,
   manufacturer TEXT,
   model_id TEXT,
   model_description TEXT,
   vendor TEXT,
   warranty_expiration TEXT,
   os TEXT,
   os_version TEXT,
   cmdb_url TEXT,
   last_updated TIMESTAMP
);

CREATE TABLE IF NOT EXISTS scan_history (
   id INTEGER PRIMARY KEY AUTOINCREMENT,
   asset_id TEXT NOT NULL,
   status TEXT NOT NULL,
   timestamp TIMESTAMP NOT NULL,
   notes TEXT,
   tech_name TEXT
);

CREATE TABLE IF NOT EXISTS sync_queue (
   id INTEGER PRIMARY KEY AUTOINCREMENT,
   operation TEXT NOT NULL,
   table_name TEXT NOT NULL,
   data TEXT NOT NULL,
   timestamp TIMESTAMP NOT NULL
);
"#;

/// Columns added to `assets` after the first release.
const ASSET_ADDED_COLUMNS: &[ColumnDef] = &[
   ColumnDef::new("flag_status", "INTEGER DEFAULT 0"),
   ColumnDef::new("flag_notes", "TEXT"),
   ColumnDef::new("flag_timestamp", "TIMESTAMP"),
   ColumnDef::new("flag_tech", "TEXT"),
   ColumnDef::new("lease_start_date", "TEXT"),
   ColumnDef::new("lease_maturity_date", "TEXT"),
   ColumnDef::new("expiry_flag_status", "INTEGER DEFAULT 0"),
];

/// Columns added to `scan_history` after the first release.
const SCAN_ADDED_COLUMNS: &[ColumnDef] = &[ColumnDef::new("site", "TEXT")];

const ASSET_COLUMNS: &str = "a.asset_id, a.serial_number, a.hostname, a.operational_status, \
   a.install_status, a.location, a.ci_region, a.owned_by, a.assigned_to, a.comments, \
   a.manufacturer, a.model_id, a.model_description, a.vendor, a.warranty_expiration, a.os, \
   a.os_version, a.cmdb_url, a.last_updated, COALESCE(a.flag_status, 0) AS flag_status, \
   a.flag_notes, a.flag_timestamp, a.flag_tech, a.lease_start_date, a.lease_maturity_date, \
   COALESCE(a.expiry_flag_status, 0) AS expiry_flag_status";

const SCAN_COLUMNS: &str = "h.id, h.asset_id, h.status, h.timestamp, h.tech_name, h.notes, h.site";

/// Latest in/out event per asset, ranked by time with id as tiebreak.
const LATEST_CHECK_CTE: &str = "WITH latest AS (
   SELECT asset_id, status, timestamp, tech_name, site,
      ROW_NUMBER() OVER (PARTITION BY asset_id ORDER BY timestamp DESC, id DESC) AS rn
   FROM scan_history
   WHERE status IN ('in', 'out')
)";

/// Timestamps are stored as fixed-width UTC text so that ordering and range
/// comparisons on the column match time order.
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
   "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
);

/// Cache rows written by queued scans take ids below every remote id, fixed by
/// their queue entry, so each pull recreates the same row.
const QUEUED_SCAN_ID_BASE: i64 = i64::MIN / 2;

fn queued_scan_id(queue_id: i64) -> i64 {
   QUEUED_SCAN_ID_BASE + queue_id
}

fn sql_time(timestamp: OffsetDateTime) -> String {
   let utc = timestamp.to_offset(UtcOffset::UTC);
   utc.format(TIMESTAMP_FORMAT).unwrap_or_else(|_| utc.to_string())
}

/// What a pull wrote into the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorStats {
   pub assets: usize,
   pub scan_events: usize,
   /// Queued local writes applied on top of the fresh copy
   pub reapplied: usize,
}

/// The local SQLite cache.
///
/// Holds the mirror of the remote tables and the `sync_queue` of writes made
/// while the remote was unreachable. All access goes through the single
/// connection of [`LocalDatabase`].
#[derive(Debug, Clone)]
pub struct LocalStore {
   db: Arc<LocalDatabase>,
}

impl LocalStore {
   /// Opens the cache file, creating it if needed. Call
   /// [`ensure_schema`](Self::ensure_schema) before use.
   pub async fn open(path: impl AsRef<Path>, config: Option<LocalDatabaseConfig>) -> Result<Self> {
      let db = LocalDatabase::connect(path, config).await?;
      Ok(Self { db })
   }

   pub fn path(&self) -> &Path {
      self.db.path()
   }

   /// Creates missing tables and adds columns introduced since the cache was
   /// created. Never drops or renames anything.
   pub async fn ensure_schema(&self) -> Result<()> {
      let mut conn = self.db.acquire().await?;

      sqlx::raw_sql(CREATE_TABLES)
         .execute(&mut *conn)
         .await
         .map_err(|e| Error::SchemaMismatch(e.to_string()))?;

      let mut added = ensure_columns(&mut conn, "assets", ASSET_ADDED_COLUMNS).await?;
      added.extend(ensure_columns(&mut conn, "scan_history", SCAN_ADDED_COLUMNS).await?);

      sqlx::query(
         "CREATE INDEX IF NOT EXISTS idx_scan_history_asset_time ON scan_history (asset_id, timestamp)",
      )
      .execute(&mut *conn)
      .await
      .map_err(|e| Error::SchemaMismatch(e.to_string()))?;

      if added.is_empty() {
         debug!(path = %self.path().display(), "local schema is current");
      } else {
         info!(path = %self.path().display(), columns = ?added, "migrated local schema");
      }

      Ok(())
   }

   /// Applies a mutation and records it in the sync queue in one transaction.
   pub async fn apply_queued(&self, mutation: &Mutation) -> Result<u64> {
      let payload = mutation.to_payload()?;
      let mut conn = self.db.acquire().await?;
      let mut tx = conn.begin().await?;

      let exists = match mutation {
         Mutation::Asset(AssetMutation::Upsert { fields, .. }) => {
            asset_exists(&mut tx, &fields.asset_id).await?
         }
         _ => true,
      };

      let id = insert_queue_entry(&mut tx, mutation.operation(exists), mutation.table_name(), &payload)
         .await?;
      let rows = apply_on(&mut tx, mutation, Some(queued_scan_id(id))).await?;

      tx.commit().await?;

      debug!(
         queue_id = id,
         table = %mutation.table_name(),
         asset_id = %mutation.asset_id(),
         "queued local write"
      );

      Ok(rows)
   }

   /// Appends an entry to the sync queue without applying it.
   pub async fn append_queue(&self, mutation: &Mutation, operation: QueueOperation) -> Result<i64> {
      let payload = mutation.to_payload()?;
      let mut conn = self.db.acquire().await?;
      insert_queue_entry(&mut conn, operation, mutation.table_name(), &payload).await
   }

   /// Every queued entry, oldest first. Entries stay queued until
   /// [`remove_queue_entries`](Self::remove_queue_entries).
   pub async fn drain_queue(&self) -> Result<Vec<SyncQueueEntry>> {
      let mut conn = self.db.acquire().await?;
      queue_entries(&mut conn).await
   }

   pub async fn remove_queue_entries(&self, ids: &[i64]) -> Result<u64> {
      if ids.is_empty() {
         return Ok(0);
      }

      let placeholders = (1..=ids.len())
         .map(|n| Dialect::Sqlite.placeholder(n))
         .collect::<Vec<_>>()
         .join(", ");
      let sql = format!("DELETE FROM sync_queue WHERE id IN ({placeholders})");

      let mut query = sqlx::query(&sql);
      for id in ids {
         query = query.bind(*id);
      }

      let mut conn = self.db.acquire().await?;
      Ok(query.execute(&mut *conn).await?.rows_affected())
   }

   pub async fn queue_len(&self) -> Result<u64> {
      let mut conn = self.db.acquire().await?;
      let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_queue")
         .fetch_one(&mut *conn)
         .await?;
      Ok(u64::try_from(count).unwrap_or_default())
   }

   /// Replaces the cached assets and scan history with `snapshot`, then
   /// re-applies the writes still waiting in the sync queue so the cache keeps
   /// showing them. One transaction; nothing changes on failure.
   pub async fn replace_mirror(&self, snapshot: &MirrorSnapshot) -> Result<MirrorStats> {
      let mut conn = self.db.acquire().await?;
      let mut tx = conn.begin().await?;

      sqlx::query("DELETE FROM assets").execute(&mut *tx).await?;
      sqlx::query("DELETE FROM scan_history").execute(&mut *tx).await?;

      for asset in &snapshot.assets {
         insert_asset_row(&mut tx, asset).await?;
      }

      for event in &snapshot.scan_events {
         sqlx::query(
            "INSERT INTO scan_history (id, asset_id, status, timestamp, tech_name, notes, site)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
         )
         .bind(event.id)
         .bind(event.asset_id.as_str())
         .bind(event.status.as_str())
         .bind(sql_time(event.timestamp))
         .bind(event.technician.as_deref())
         .bind(event.notes.as_deref())
         .bind(event.site.as_deref())
         .execute(&mut *tx)
         .await?;
      }

      let mut reapplied = 0;
      for entry in queue_entries(&mut tx).await? {
         let outcome = match entry.mutation() {
            Ok(mutation) => apply_on(&mut tx, &mutation, Some(queued_scan_id(entry.id))).await,
            Err(e) => Err(e),
         };

         match outcome {
            Ok(_) => reapplied += 1,
            Err(e) => warn!(queue_id = entry.id, error = %e, "queued write not reapplied to mirror"),
         }
      }

      tx.commit().await?;

      Ok(MirrorStats {
         assets: snapshot.assets.len(),
         scan_events: snapshot.scan_events.len(),
         reapplied,
      })
   }

   pub async fn all_assets(&self) -> Result<Vec<Asset>> {
      let sql = format!("SELECT {ASSET_COLUMNS} FROM assets a ORDER BY a.asset_id");
      let mut conn = self.db.acquire().await?;
      Ok(sqlx::query_as(&sql).fetch_all(&mut *conn).await?)
   }

   /// Scan events at or after `since`, oldest first.
   pub async fn scan_events_since(&self, since: OffsetDateTime) -> Result<Vec<ScanEvent>> {
      let sql = format!(
         "SELECT {SCAN_COLUMNS} FROM scan_history h WHERE h.timestamp >= ?1 ORDER BY h.timestamp, h.id"
      );
      let mut conn = self.db.acquire().await?;
      Ok(sqlx::query_as(&sql).bind(sql_time(since)).fetch_all(&mut *conn).await?)
   }

   pub async fn close(&self) {
      self.db.close().await;
   }
}

#[async_trait]
impl InventoryStore for LocalStore {
   async fn apply(&self, mutation: &Mutation) -> Result<u64> {
      let mut conn = self.db.acquire().await?;
      let mut tx = conn.begin().await?;
      let rows = apply_on(&mut tx, mutation, None).await?;
      tx.commit().await?;
      Ok(rows)
   }

   async fn asset_by_id(&self, asset_id: &str) -> Result<Option<Asset>> {
      let sql = format!("SELECT {ASSET_COLUMNS} FROM assets a WHERE a.asset_id = ?1");
      let mut conn = self.db.acquire().await?;
      Ok(sqlx::query_as(&sql)
         .bind(asset_id)
         .fetch_optional(&mut *conn)
         .await?)
   }

   async fn asset_by_serial(&self, serial: &str) -> Result<Option<Asset>> {
      let sql =
         format!("SELECT {ASSET_COLUMNS} FROM assets a WHERE a.serial_number = ?1 LIMIT 1");
      let mut conn = self.db.acquire().await?;
      Ok(sqlx::query_as(&sql)
         .bind(serial)
         .fetch_optional(&mut *conn)
         .await?)
   }

   async fn inventory_by_state(
      &self,
      state: CheckState,
      include_deleted: bool,
   ) -> Result<Vec<InventoryEntry>> {
      let sql = format!(
         "{LATEST_CHECK_CTE}
         SELECT {ASSET_COLUMNS}, l.timestamp AS last_scan, l.tech_name AS last_technician,
            l.site AS last_site
         FROM assets a
         JOIN latest l ON l.asset_id = a.asset_id AND l.rn = 1
         WHERE l.status = ?1
            AND (?2 OR a.operational_status IS NULL OR a.operational_status <> 'DELETED')
         ORDER BY l.timestamp DESC"
      );
      let mut conn = self.db.acquire().await?;
      Ok(sqlx::query_as(&sql)
         .bind(state.as_str())
         .bind(include_deleted)
         .fetch_all(&mut *conn)
         .await?)
   }

   async fn asset_history(&self, asset_id: &str, limit: u32) -> Result<Vec<ScanEvent>> {
      let sql = format!(
         "SELECT {SCAN_COLUMNS} FROM scan_history h WHERE h.asset_id = ?1
         ORDER BY h.timestamp DESC, h.id DESC LIMIT ?2"
      );
      let mut conn = self.db.acquire().await?;
      Ok(sqlx::query_as(&sql)
         .bind(asset_id)
         .bind(i64::from(limit))
         .fetch_all(&mut *conn)
         .await?)
   }

   async fn history_since(&self, since: OffsetDateTime) -> Result<Vec<HistoryEntry>> {
      let sql = format!(
         "SELECT {SCAN_COLUMNS}, a.serial_number
         FROM scan_history h
         JOIN assets a ON a.asset_id = h.asset_id
         WHERE h.timestamp >= ?1
         ORDER BY h.timestamp DESC, h.id DESC"
      );
      let mut conn = self.db.acquire().await?;
      Ok(sqlx::query_as(&sql).bind(sql_time(since)).fetch_all(&mut *conn).await?)
   }

   async fn search_history(&self, term: &str) -> Result<Vec<HistoryEntry>> {
      let sql = format!(
         "SELECT {SCAN_COLUMNS}, a.serial_number
         FROM scan_history h
         JOIN assets a ON a.asset_id = h.asset_id
         WHERE a.asset_id LIKE ?1 ESCAPE '\\' OR a.serial_number LIKE ?1 ESCAPE '\\'
         ORDER BY h.timestamp DESC, h.id DESC"
      );
      let mut conn = self.db.acquire().await?;
      Ok(sqlx::query_as(&sql)
         .bind(contains_pattern(term))
         .fetch_all(&mut *conn)
         .await?)
   }

   async fn latest_check_event(&self, asset_id: &str) -> Result<Option<ScanEvent>> {
      let sql = format!(
         "SELECT {SCAN_COLUMNS} FROM scan_history h
         WHERE h.asset_id = ?1 AND h.status IN ('in', 'out')
         ORDER BY h.timestamp DESC, h.id DESC LIMIT 1"
      );
      let mut conn = self.db.acquire().await?;
      Ok(sqlx::query_as(&sql)
         .bind(asset_id)
         .fetch_optional(&mut *conn)
         .await?)
   }

   async fn flagged_assets(&self) -> Result<Vec<FlaggedAsset>> {
      let sql = format!(
         "{LATEST_CHECK_CTE}
         SELECT {ASSET_COLUMNS}, l.status AS check_status, l.timestamp AS check_timestamp,
            l.site AS check_site
         FROM assets a
         LEFT JOIN latest l ON l.asset_id = a.asset_id AND l.rn = 1
         WHERE a.flag_status = 1
         ORDER BY a.flag_timestamp DESC"
      );
      let mut conn = self.db.acquire().await?;
      Ok(sqlx::query_as(&sql).fetch_all(&mut *conn).await?)
   }

   async fn expiry_flagged_assets(&self, include_deleted: bool) -> Result<Vec<Asset>> {
      let sql = format!(
         "SELECT {ASSET_COLUMNS} FROM assets a
         WHERE a.expiry_flag_status = 1
            AND a.lease_maturity_date IS NOT NULL AND a.lease_maturity_date <> ''
            AND (?1 OR a.operational_status IS NULL OR a.operational_status <> 'DELETED')
         ORDER BY a.asset_id"
      );
      let mut conn = self.db.acquire().await?;
      Ok(sqlx::query_as(&sql)
         .bind(include_deleted)
         .fetch_all(&mut *conn)
         .await?)
   }

   async fn lease_maturities(&self) -> Result<Vec<(String, String)>> {
      let mut conn = self.db.acquire().await?;
      Ok(sqlx::query_as(
         "SELECT asset_id, lease_maturity_date FROM assets
         WHERE lease_maturity_date IS NOT NULL AND lease_maturity_date <> ''
         ORDER BY asset_id",
      )
      .fetch_all(&mut *conn)
      .await?)
   }
}

async fn asset_exists(conn: &mut SqliteConnection, asset_id: &str) -> Result<bool> {
   let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM assets WHERE asset_id = ?1")
      .bind(asset_id)
      .fetch_optional(&mut *conn)
      .await?;
   Ok(row.is_some())
}

async fn insert_queue_entry(
   conn: &mut SqliteConnection,
   operation: QueueOperation,
   table_name: &str,
   payload: &str,
) -> Result<i64> {
   let result = sqlx::query(
      "INSERT INTO sync_queue (operation, table_name, data, timestamp) VALUES (?1, ?2, ?3, ?4)",
   )
   .bind(operation.as_str())
   .bind(table_name)
   .bind(payload)
   .bind(sql_time(now_utc()))
   .execute(&mut *conn)
   .await?;

   Ok(result.last_insert_rowid())
}

async fn queue_entries(conn: &mut SqliteConnection) -> Result<Vec<SyncQueueEntry>> {
   Ok(sqlx::query_as(
      "SELECT id, operation, table_name, data, timestamp FROM sync_queue ORDER BY id",
   )
   .fetch_all(&mut *conn)
   .await?)
}

async fn insert_asset_row(conn: &mut SqliteConnection, asset: &Asset) -> Result<()> {
   sqlx::query(
      "INSERT INTO assets (asset_id, serial_number, hostname, operational_status, install_status,
         location, ci_region, owned_by, assigned_to, comments, manufacturer, model_id,
         model_description, vendor, warranty_expiration, os, os_version, cmdb_url, last_updated,
         flag_status, flag_notes, flag_timestamp, flag_tech, lease_start_date,
         lease_maturity_date, expiry_flag_status)
      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
         ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
   )
   .bind(asset.asset_id.as_str())
   .bind(asset.serial_number.as_deref())
   .bind(asset.hostname.as_deref())
   .bind(asset.operational_status.as_deref())
   .bind(asset.install_status.as_deref())
   .bind(asset.location.as_deref())
   .bind(asset.ci_region.as_deref())
   .bind(asset.owned_by.as_deref())
   .bind(asset.assigned_to.as_deref())
   .bind(asset.comments.as_deref())
   .bind(asset.manufacturer.as_deref())
   .bind(asset.model_id.as_deref())
   .bind(asset.model_description.as_deref())
   .bind(asset.vendor.as_deref())
   .bind(asset.warranty_expiration.as_deref())
   .bind(asset.os.as_deref())
   .bind(asset.os_version.as_deref())
   .bind(asset.cmdb_url.as_deref())
   .bind(asset.last_updated.map(sql_time))
   .bind(asset.flag.flagged)
   .bind(asset.flag.notes.as_deref())
   .bind(asset.flag.timestamp.map(sql_time))
   .bind(asset.flag.technician.as_deref())
   .bind(asset.lease.start_date.as_deref())
   .bind(asset.lease.maturity_date.as_deref())
   .bind(asset.lease.expiry_flagged)
   .execute(&mut *conn)
   .await?;

   Ok(())
}

/// Applies one mutation on an open connection or transaction. A recorded scan
/// takes `scan_id` when given, otherwise the next free id.
async fn apply_on(
   conn: &mut SqliteConnection,
   mutation: &Mutation,
   scan_id: Option<i64>,
) -> Result<u64> {
   let result = match mutation {
      Mutation::Asset(AssetMutation::Upsert {
         fields,
         last_updated,
      }) => {
         let assignments = fields.assignments();
         let columns = assignments.iter().map(|(column, _)| *column).collect::<Vec<_>>();
         let sql = upsert_asset_sql(Dialect::Sqlite, &columns);

         let mut query = sqlx::query(&sql).bind(fields.asset_id.as_str());
         for (_, value) in &assignments {
            query = query.bind(*value);
         }
         query.bind(sql_time(*last_updated)).execute(&mut *conn).await?
      }

      Mutation::Asset(AssetMutation::SoftDelete { asset_id }) => {
         sqlx::query(
            "UPDATE assets SET operational_status = 'DELETED',
               comments = CASE
                  WHEN comments IS NULL OR comments = '' THEN ?2
                  ELSE comments || ' | ' || ?2
               END
            WHERE asset_id = ?1",
         )
         .bind(asset_id.as_str())
         .bind(SOFT_DELETE_NOTE)
         .execute(&mut *conn)
         .await?
      }

      Mutation::Asset(AssetMutation::HardDelete { asset_id }) => {
         sqlx::query("DELETE FROM assets WHERE asset_id = ?1")
            .bind(asset_id.as_str())
            .execute(&mut *conn)
            .await?
      }

      Mutation::Asset(AssetMutation::SetLease {
         asset_id,
         start_date,
         maturity_date,
         last_updated,
      }) => {
         sqlx::query(
            "UPDATE assets SET lease_start_date = COALESCE(?2, lease_start_date),
               lease_maturity_date = COALESCE(?3, lease_maturity_date), last_updated = ?4
            WHERE asset_id = ?1",
         )
         .bind(asset_id.as_str())
         .bind(start_date.as_deref())
         .bind(maturity_date.as_deref())
         .bind(sql_time(*last_updated))
         .execute(&mut *conn)
         .await?
      }

      Mutation::Asset(AssetMutation::SetExpiryFlag {
         asset_id,
         flagged,
         last_updated,
      }) => {
         sqlx::query("UPDATE assets SET expiry_flag_status = ?2, last_updated = ?3 WHERE asset_id = ?1")
            .bind(asset_id.as_str())
            .bind(*flagged)
            .bind(sql_time(*last_updated))
            .execute(&mut *conn)
            .await?
      }

      Mutation::Asset(AssetMutation::Flag {
         asset_id,
         notes,
         technician,
         timestamp,
      }) => {
         sqlx::query(
            "UPDATE assets SET flag_status = 1, flag_notes = ?2, flag_timestamp = ?3, flag_tech = ?4
            WHERE asset_id = ?1",
         )
         .bind(asset_id.as_str())
         .bind(notes.as_deref())
         .bind(sql_time(*timestamp))
         .bind(technician.as_deref())
         .execute(&mut *conn)
         .await?
      }

      Mutation::Asset(AssetMutation::Unflag { asset_id }) => {
         sqlx::query(
            "UPDATE assets SET flag_status = 0, flag_notes = NULL, flag_timestamp = NULL,
               flag_tech = NULL
            WHERE asset_id = ?1",
         )
         .bind(asset_id.as_str())
         .execute(&mut *conn)
         .await?
      }

      Mutation::ScanEvent(ScanEventMutation::Record { event }) => {
         sqlx::query(
            "INSERT INTO scan_history (id, asset_id, status, timestamp, tech_name, notes, site)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
         )
         .bind(scan_id)
         .bind(event.asset_id.as_str())
         .bind(event.status.as_str())
         .bind(sql_time(event.timestamp))
         .bind(event.technician.as_deref())
         .bind(event.notes.as_deref())
         .bind(event.site.as_deref())
         .execute(&mut *conn)
         .await?
      }
   };

   Ok(result.rows_affected())
}
