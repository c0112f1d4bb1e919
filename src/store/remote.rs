//! PostgreSQL primary and replicas

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Connection, Executor, PgConnection};
use sqlx_pg_replicas::{PgPoolManager, ReplicaSetConfig};
use time::OffsetDateTime;
use tracing::{debug, info};

use super::{Dialect, InventoryStore, MirrorSnapshot, RemoteBackend, SOFT_DELETE_NOTE, contains_pattern, upsert_asset_sql};
use crate::error::{Error, Result};
use crate::model::{Asset, CheckState, FlaggedAsset, HistoryEntry, InventoryEntry, ScanEvent};
use crate::mutation::{AssetMutation, Mutation, ScanEventMutation};

/// Run on the first successful connect. Additive only.
const ENSURE_SCHEMA: &str = r#"
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
   last_updated TIMESTAMPTZ
);

ALTER TABLE assets ADD COLUMN IF NOT EXISTS flag_status BOOLEAN NOT NULL DEFAULT FALSE;
ALTER TABLE assets ADD COLUMN IF NOT EXISTS flag_notes TEXT;
ALTER TABLE assets ADD COLUMN IF NOT EXISTS flag_timestamp TIMESTAMPTZ;
ALTER TABLE assets ADD COLUMN IF NOT EXISTS flag_tech TEXT;
ALTER TABLE assets ADD COLUMN IF NOT EXISTS lease_start_date TEXT;
ALTER TABLE assets ADD COLUMN IF NOT EXISTS lease_maturity_date TEXT;
ALTER TABLE assets ADD COLUMN IF NOT EXISTS expiry_flag_status BOOLEAN NOT NULL DEFAULT FALSE;

CREATE TABLE IF NOT EXISTS scan_history (
   id BIGSERIAL PRIMARY KEY,
   asset_id TEXT NOT NULL,
   status TEXT NOT NULL,
   timestamp TIMESTAMPTZ NOT NULL,
   notes TEXT,
   tech_name TEXT
);

ALTER TABLE scan_history ADD COLUMN IF NOT EXISTS site TEXT;

CREATE INDEX IF NOT EXISTS idx_scan_history_asset_time ON scan_history (asset_id, timestamp);
"#;

const ASSET_COLUMNS: &str = "a.asset_id, a.serial_number, a.hostname, a.operational_status, \
   a.install_status, a.location, a.ci_region, a.owned_by, a.assigned_to, a.comments, \
   a.manufacturer, a.model_id, a.model_description, a.vendor, a.warranty_expiration, a.os, \
   a.os_version, a.cmdb_url, a.last_updated, a.flag_status, a.flag_notes, a.flag_timestamp, \
   a.flag_tech, a.lease_start_date, a.lease_maturity_date, a.expiry_flag_status";

const SCAN_COLUMNS: &str = "h.id, h.asset_id, h.status, h.timestamp, h.tech_name, h.notes, h.site";

const LATEST_CHECK_CTE: &str = "WITH latest AS (
   SELECT asset_id, status, timestamp, tech_name, site,
      ROW_NUMBER() OVER (PARTITION BY asset_id ORDER BY timestamp DESC, id DESC) AS rn
   FROM scan_history
   WHERE status IN ('in', 'out')
)";

/// The authoritative store.
///
/// Writes and snapshots use the primary. Reads are spread over the replicas
/// by [`PgPoolManager`]. Database errors are classified with
/// [`Error::remote`] so transport failures surface as
/// [`Error::Unreachable`].
#[derive(Debug)]
pub struct PostgresStore {
   pools: PgPoolManager,
   schema_ready: AtomicBool,
}

impl PostgresStore {
   /// Creates the store without connecting.
   pub fn new(config: ReplicaSetConfig) -> Self {
      Self {
         pools: PgPoolManager::new(config),
         schema_ready: AtomicBool::new(false),
      }
   }

   pub fn pools(&self) -> &PgPoolManager {
      &self.pools
   }

   async fn ensure_schema(&self) -> Result<()> {
      let mut conn = self.pools.acquire(true).await?;
      (&mut *conn)
         .execute(sqlx::raw_sql(ENSURE_SCHEMA))
         .await
         .map_err(Error::remote)?;

      info!(primary = %self.pools.config().primary.label(), "remote schema ensured");
      Ok(())
   }
}

#[async_trait]
impl InventoryStore for PostgresStore {
   async fn apply(&self, mutation: &Mutation) -> Result<u64> {
      let mut conn = self.pools.acquire(true).await?;
      let mut tx = conn.begin().await.map_err(Error::remote)?;
      let rows = apply_on(&mut tx, mutation).await?;
      tx.commit().await.map_err(Error::remote)?;

      debug!(
         table = %mutation.table_name(),
         asset_id = %mutation.asset_id(),
         rows,
         "applied remote write"
      );

      Ok(rows)
   }

   async fn asset_by_id(&self, asset_id: &str) -> Result<Option<Asset>> {
      let sql = format!("SELECT {ASSET_COLUMNS} FROM assets a WHERE a.asset_id = $1");
      let mut conn = self.pools.acquire(false).await?;
      sqlx::query_as(&sql)
         .bind(asset_id)
         .fetch_optional(&mut *conn)
         .await
         .map_err(Error::remote)
   }

   async fn asset_by_serial(&self, serial: &str) -> Result<Option<Asset>> {
      let sql =
         format!("SELECT {ASSET_COLUMNS} FROM assets a WHERE a.serial_number = $1 LIMIT 1");
      let mut conn = self.pools.acquire(false).await?;
      sqlx::query_as(&sql)
         .bind(serial)
         .fetch_optional(&mut *conn)
         .await
         .map_err(Error::remote)
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
         WHERE l.status = $1
            AND ($2 OR a.operational_status IS NULL OR a.operational_status <> 'DELETED')
         ORDER BY l.timestamp DESC"
      );
      let mut conn = self.pools.acquire(false).await?;
      sqlx::query_as(&sql)
         .bind(state.as_str())
         .bind(include_deleted)
         .fetch_all(&mut *conn)
         .await
         .map_err(Error::remote)
   }

   async fn asset_history(&self, asset_id: &str, limit: u32) -> Result<Vec<ScanEvent>> {
      let sql = format!(
         "SELECT {SCAN_COLUMNS} FROM scan_history h WHERE h.asset_id = $1
         ORDER BY h.timestamp DESC, h.id DESC LIMIT $2"
      );
      let mut conn = self.pools.acquire(false).await?;
      sqlx::query_as(&sql)
         .bind(asset_id)
         .bind(i64::from(limit))
         .fetch_all(&mut *conn)
         .await
         .map_err(Error::remote)
   }

   async fn history_since(&self, since: OffsetDateTime) -> Result<Vec<HistoryEntry>> {
      let sql = format!(
         "SELECT {SCAN_COLUMNS}, a.serial_number
         FROM scan_history h
         JOIN assets a ON a.asset_id = h.asset_id
         WHERE h.timestamp >= $1
         ORDER BY h.timestamp DESC, h.id DESC"
      );
      let mut conn = self.pools.acquire(false).await?;
      sqlx::query_as(&sql)
         .bind(since)
         .fetch_all(&mut *conn)
         .await
         .map_err(Error::remote)
   }

   async fn search_history(&self, term: &str) -> Result<Vec<HistoryEntry>> {
      let sql = format!(
         "SELECT {SCAN_COLUMNS}, a.serial_number
         FROM scan_history h
         JOIN assets a ON a.asset_id = h.asset_id
         WHERE a.asset_id ILIKE $1 ESCAPE '\\' OR a.serial_number ILIKE $1 ESCAPE '\\'
         ORDER BY h.timestamp DESC, h.id DESC"
      );
      let mut conn = self.pools.acquire(false).await?;
      sqlx::query_as(&sql)
         .bind(contains_pattern(term))
         .fetch_all(&mut *conn)
         .await
         .map_err(Error::remote)
   }

   async fn latest_check_event(&self, asset_id: &str) -> Result<Option<ScanEvent>> {
      let sql = format!(
         "SELECT {SCAN_COLUMNS} FROM scan_history h
         WHERE h.asset_id = $1 AND h.status IN ('in', 'out')
         ORDER BY h.timestamp DESC, h.id DESC LIMIT 1"
      );
      let mut conn = self.pools.acquire(false).await?;
      sqlx::query_as(&sql)
         .bind(asset_id)
         .fetch_optional(&mut *conn)
         .await
         .map_err(Error::remote)
   }

   async fn flagged_assets(&self) -> Result<Vec<FlaggedAsset>> {
      let sql = format!(
         "{LATEST_CHECK_CTE}
         SELECT {ASSET_COLUMNS}, l.status AS check_status, l.timestamp AS check_timestamp,
            l.site AS check_site
         FROM assets a
         LEFT JOIN latest l ON l.asset_id = a.asset_id AND l.rn = 1
         WHERE a.flag_status
         ORDER BY a.flag_timestamp DESC NULLS LAST"
      );
      let mut conn = self.pools.acquire(false).await?;
      sqlx::query_as(&sql)
         .fetch_all(&mut *conn)
         .await
         .map_err(Error::remote)
   }

   async fn expiry_flagged_assets(&self, include_deleted: bool) -> Result<Vec<Asset>> {
      let sql = format!(
         "SELECT {ASSET_COLUMNS} FROM assets a
         WHERE a.expiry_flag_status
            AND a.lease_maturity_date IS NOT NULL AND a.lease_maturity_date <> ''
            AND ($1 OR a.operational_status IS NULL OR a.operational_status <> 'DELETED')
         ORDER BY a.asset_id"
      );
      let mut conn = self.pools.acquire(false).await?;
      sqlx::query_as(&sql)
         .bind(include_deleted)
         .fetch_all(&mut *conn)
         .await
         .map_err(Error::remote)
   }

   async fn lease_maturities(&self) -> Result<Vec<(String, String)>> {
      let mut conn = self.pools.acquire(false).await?;
      sqlx::query_as(
         "SELECT asset_id, lease_maturity_date FROM assets
         WHERE lease_maturity_date IS NOT NULL AND lease_maturity_date <> ''
         ORDER BY asset_id",
      )
      .fetch_all(&mut *conn)
      .await
      .map_err(Error::remote)
   }
}

#[async_trait]
impl RemoteBackend for PostgresStore {
   async fn reinitialize(&self) -> Result<()> {
      self.pools.reinitialize().await?;

      if !self.schema_ready.load(Ordering::Acquire) {
         self.ensure_schema().await?;
         self.schema_ready.store(true, Ordering::Release);
      }

      Ok(())
   }

   async fn probe(&self, timeout: Duration) -> Result<()> {
      Ok(self.pools.probe(timeout).await?)
   }

   async fn teardown(&self) {
      self.pools.teardown().await;
   }

   async fn snapshot(&self, history_since: OffsetDateTime) -> Result<MirrorSnapshot> {
      let mut conn = self.pools.acquire(true).await?;
      let mut tx = conn.begin().await.map_err(Error::remote)?;

      sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
         .execute(&mut *tx)
         .await
         .map_err(Error::remote)?;

      let assets = sqlx::query_as(&format!(
         "SELECT {ASSET_COLUMNS} FROM assets a ORDER BY a.asset_id"
      ))
      .fetch_all(&mut *tx)
      .await
      .map_err(Error::remote)?;

      let scan_events = sqlx::query_as(&format!(
         "SELECT {SCAN_COLUMNS} FROM scan_history h WHERE h.timestamp >= $1 ORDER BY h.id"
      ))
      .bind(history_since)
      .fetch_all(&mut *tx)
      .await
      .map_err(Error::remote)?;

      tx.commit().await.map_err(Error::remote)?;

      Ok(MirrorSnapshot {
         assets,
         scan_events,
      })
   }
}

async fn apply_on(conn: &mut PgConnection, mutation: &Mutation) -> Result<u64> {
   let result = match mutation {
      Mutation::Asset(AssetMutation::Upsert {
         fields,
         last_updated,
      }) => {
         let assignments = fields.assignments();
         let columns = assignments.iter().map(|(column, _)| *column).collect::<Vec<_>>();
         let sql = upsert_asset_sql(Dialect::Postgres, &columns);

         let mut query = sqlx::query(&sql).bind(fields.asset_id.as_str());
         for (_, value) in &assignments {
            query = query.bind(*value);
         }
         query.bind(*last_updated).execute(&mut *conn).await
      }

      Mutation::Asset(AssetMutation::SoftDelete { asset_id }) => {
         sqlx::query(
            "UPDATE assets SET operational_status = 'DELETED',
               comments = CASE
                  WHEN comments IS NULL OR comments = '' THEN $2::text
                  ELSE comments || ' | ' || $2::text
               END
            WHERE asset_id = $1",
         )
         .bind(asset_id.as_str())
         .bind(SOFT_DELETE_NOTE)
         .execute(&mut *conn)
         .await
      }

      Mutation::Asset(AssetMutation::HardDelete { asset_id }) => {
         sqlx::query("DELETE FROM assets WHERE asset_id = $1")
            .bind(asset_id.as_str())
            .execute(&mut *conn)
            .await
      }

      Mutation::Asset(AssetMutation::SetLease {
         asset_id,
         start_date,
         maturity_date,
         last_updated,
      }) => {
         sqlx::query(
            "UPDATE assets SET lease_start_date = COALESCE($2, lease_start_date),
               lease_maturity_date = COALESCE($3, lease_maturity_date), last_updated = $4
            WHERE asset_id = $1",
         )
         .bind(asset_id.as_str())
         .bind(start_date.as_deref())
         .bind(maturity_date.as_deref())
         .bind(*last_updated)
         .execute(&mut *conn)
         .await
      }

      Mutation::Asset(AssetMutation::SetExpiryFlag {
         asset_id,
         flagged,
         last_updated,
      }) => {
         sqlx::query("UPDATE assets SET expiry_flag_status = $2, last_updated = $3 WHERE asset_id = $1")
            .bind(asset_id.as_str())
            .bind(*flagged)
            .bind(*last_updated)
            .execute(&mut *conn)
            .await
      }

      Mutation::Asset(AssetMutation::Flag {
         asset_id,
         notes,
         technician,
         timestamp,
      }) => {
         sqlx::query(
            "UPDATE assets SET flag_status = TRUE, flag_notes = $2, flag_timestamp = $3,
               flag_tech = $4
            WHERE asset_id = $1",
         )
         .bind(asset_id.as_str())
         .bind(notes.as_deref())
         .bind(*timestamp)
         .bind(technician.as_deref())
         .execute(&mut *conn)
         .await
      }

      Mutation::Asset(AssetMutation::Unflag { asset_id }) => {
         sqlx::query(
            "UPDATE assets SET flag_status = FALSE, flag_notes = NULL, flag_timestamp = NULL,
               flag_tech = NULL
            WHERE asset_id = $1",
         )
         .bind(asset_id.as_str())
         .execute(&mut *conn)
         .await
      }

      Mutation::ScanEvent(ScanEventMutation::Record { event }) => {
         sqlx::query(
            "INSERT INTO scan_history (asset_id, status, timestamp, tech_name, notes, site)
            VALUES ($1, $2, $3, $4, $5, $6)",
         )
         .bind(event.asset_id.as_str())
         .bind(event.status.as_str())
         .bind(event.timestamp)
         .bind(event.technician.as_deref())
         .bind(event.notes.as_deref())
         .bind(event.site.as_deref())
         .execute(&mut *conn)
         .await
      }
   };

   Ok(result.map_err(Error::remote)?.rows_affected())
}
