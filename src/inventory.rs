use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::InventoryConfig;
use crate::error::{Error, Result};
use crate::lease::{LeaseRow, evaluate_expiry, read_lease_csv, today_utc};
use crate::mode::ModeController;
use crate::model::{
   Asset, AssetFields, CheckState, CurrentStatus, ExpiringAsset, ExpiryCheck, ExpiryRefresh,
   FlaggedAsset, HistoryEntry, InventoryEntry, LeaseImportReport, Mode, NewScanEvent, ScanEvent, ScanStatus,
   WriteOutcome, now_utc,
};
use crate::monitor::{ConnectivityMonitor, MonitorHandle};
use crate::mutation::{AssetMutation, Mutation};
use crate::store::{InventoryStore, LocalStore, PostgresStore, RemoteBackend};
use crate::sync::{SyncEngine, SyncReport};

/// Site recorded on the scans written when an asset is flagged.
const FLAGGED_SITE: &str = "Out";

/// Inventory data access with automatic failover.
///
/// Every call goes to the remote database while it is reachable and to the
/// local cache otherwise. Writes made locally are queued and replayed once
/// the remote is back; see [`WriteOutcome`].
///
/// Cheap to clone; clones share one set of connections and one monitor.
///
/// # Examples
///
/// ```no_run
/// use inventory_failover::{AssetFields, Inventory, InventoryConfig};
///
/// # async fn run() -> inventory_failover::Result<()> {
/// let inventory = Inventory::open(InventoryConfig::load("config.json")).await?;
///
/// let outcome = inventory
///    .upsert_asset(AssetFields {
///       hostname: Some("bench-07".into()),
///       ..AssetFields::new("GF-100")
///    })
///    .await?;
///
/// if outcome.is_queued() {
///    println!("saved locally, will sync later");
/// }
///
/// inventory.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Inventory {
   inner: Arc<Inner>,
}

struct Inner {
   config: InventoryConfig,
   local: LocalStore,
   remote: Arc<dyn RemoteBackend>,
   mode: Arc<ModeController>,
   monitor: MonitorHandle,
}

impl fmt::Debug for Inventory {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("Inventory")
         .field("mode", &self.inner.mode.mode())
         .field("local", &self.inner.local.path())
         .finish_non_exhaustive()
   }
}

impl Inventory {
   /// Opens the local cache at `config.local_path` and the PostgreSQL
   /// deployment described by `config.remote`.
   ///
   /// An unreachable remote is not an error: the inventory starts degraded
   /// and the monitor keeps trying to reconnect.
   pub async fn open(config: InventoryConfig) -> Result<Self> {
      let local = LocalStore::open(&config.local_path, None).await?;
      let remote = Arc::new(PostgresStore::new(config.remote.clone()));
      Self::with_remote(config, local, remote).await
   }

   /// Like [`open`](Self::open), with the stores supplied by the caller.
   /// Must be called within a Tokio runtime.
   pub async fn with_remote(
      config: InventoryConfig,
      local: LocalStore,
      remote: Arc<dyn RemoteBackend>,
   ) -> Result<Self> {
      local.ensure_schema().await?;

      let mode = Arc::new(ModeController::new(Mode::Degraded));
      mode.set_pending(local.queue_len().await? > 0);

      let sync = Arc::new(SyncEngine::new(
         local.clone(),
         Arc::clone(&remote),
         Arc::clone(&mode),
         config.pull_window(),
      ));

      let monitor = ConnectivityMonitor::new(
         Arc::clone(&remote),
         Arc::clone(&mode),
         sync,
         config.monitor_interval(),
         config.probe_timeout(),
      );

      match monitor.sync_now(false).await {
         Ok(report) => info!(mode = %report.mode, "inventory opened"),
         Err(e) => warn!(error = %e, "remote database unavailable, starting with local store"),
      }

      let monitor = monitor.spawn();

      Ok(Self {
         inner: Arc::new(Inner {
            config,
            local,
            remote,
            mode,
            monitor,
         }),
      })
   }

   pub fn current_mode(&self) -> Mode {
      self.inner.mode.mode()
   }

   /// Number of local writes waiting to be replayed.
   pub async fn pending_sync_count(&self) -> Result<u64> {
      self.inner.local.queue_len().await
   }

   /// Reconnects if degraded and replays the sync queue now, without waiting
   /// for the next monitor tick.
   ///
   /// Fails with the connect error if the remote is still unreachable.
   pub async fn force_sync(&self) -> Result<SyncReport> {
      self.inner.monitor.force_sync().await
   }

   /// Stops the monitor and closes both stores. Calls made afterwards fail
   /// with [`Error::LocalClosed`].
   pub async fn close(&self) {
      self.inner.monitor.shutdown().await;
      self.inner.remote.teardown().await;
      self.inner.local.close().await;
      info!("inventory closed");
   }

   // ─── Assets ───

   /// Inserts the asset, or updates only the fields that are set.
   pub async fn upsert_asset(&self, fields: AssetFields) -> Result<WriteOutcome> {
      require_asset_id(&fields.asset_id)?;
      self.write(Mutation::upsert_asset(fields, now_utc())).await
   }

   pub async fn asset_by_id(&self, asset_id: &str) -> Result<Option<Asset>> {
      let (remote, local) = (&self.inner.remote, &self.inner.local);
      self.read(remote.asset_by_id(asset_id), local.asset_by_id(asset_id)).await
   }

   pub async fn asset_by_serial(&self, serial: &str) -> Result<Option<Asset>> {
      let (remote, local) = (&self.inner.remote, &self.inner.local);
      self.read(remote.asset_by_serial(serial), local.asset_by_serial(serial)).await
   }

   /// Marks the asset `DELETED`. The row and its history are kept.
   pub async fn soft_delete_asset(&self, asset_id: &str) -> Result<WriteOutcome> {
      require_asset_id(asset_id)?;
      self
         .write(Mutation::Asset(AssetMutation::SoftDelete {
            asset_id: asset_id.to_string(),
         }))
         .await
   }

   /// Removes the asset row. Its scan history is kept.
   pub async fn hard_delete_asset(&self, asset_id: &str) -> Result<WriteOutcome> {
      require_asset_id(asset_id)?;
      self
         .write(Mutation::Asset(AssetMutation::HardDelete {
            asset_id: asset_id.to_string(),
         }))
         .await
   }

   // ─── Scans ───

   /// Appends a scan event stamped with the current time.
   pub async fn record_scan(
      &self,
      asset_id: &str,
      status: impl Into<ScanStatus>,
      technician: Option<&str>,
      notes: Option<&str>,
      site: Option<&str>,
   ) -> Result<WriteOutcome> {
      self
         .record_scan_at(asset_id, status.into(), technician, notes, site, now_utc())
         .await
   }

   async fn record_scan_at(
      &self,
      asset_id: &str,
      status: ScanStatus,
      technician: Option<&str>,
      notes: Option<&str>,
      site: Option<&str>,
      timestamp: OffsetDateTime,
   ) -> Result<WriteOutcome> {
      require_asset_id(asset_id)?;
      self
         .write(Mutation::record_scan(NewScanEvent {
            asset_id: asset_id.to_string(),
            status,
            technician: technician.map(String::from),
            notes: notes.map(String::from),
            site: site.map(String::from),
            timestamp,
         }))
         .await
   }

   /// Assets currently checked in.
   pub async fn current_inventory(&self, include_deleted: bool) -> Result<Vec<InventoryEntry>> {
      self.inventory_by_state(CheckState::In, include_deleted).await
   }

   /// Assets currently checked out. Assets never scanned in or out are not
   /// listed.
   pub async fn checked_out_inventory(&self, include_deleted: bool) -> Result<Vec<InventoryEntry>> {
      self.inventory_by_state(CheckState::Out, include_deleted).await
   }

   async fn inventory_by_state(
      &self,
      state: CheckState,
      include_deleted: bool,
   ) -> Result<Vec<InventoryEntry>> {
      let (remote, local) = (&self.inner.remote, &self.inner.local);
      self
         .read(
            remote.inventory_by_state(state, include_deleted),
            local.inventory_by_state(state, include_deleted),
         )
         .await
   }

   /// Scan events for one asset, newest first.
   pub async fn asset_history(&self, asset_id: &str, limit: u32) -> Result<Vec<ScanEvent>> {
      let (remote, local) = (&self.inner.remote, &self.inner.local);
      self
         .read(
            remote.asset_history(asset_id, limit),
            local.asset_history(asset_id, limit),
         )
         .await
   }

   /// Scan events from the last `days` days, newest first.
   ///
   /// While degraded only the history copied by the last pull is available.
   pub async fn recent_history(&self, days: u32) -> Result<Vec<HistoryEntry>> {
      let since = now_utc() - time::Duration::days(i64::from(days));
      let (remote, local) = (&self.inner.remote, &self.inner.local);
      self.read(remote.history_since(since), local.history_since(since)).await
   }

   /// Scan events whose asset id or serial number contains `term`. Matching
   /// ignores ASCII case.
   pub async fn search_history(&self, term: &str) -> Result<Vec<HistoryEntry>> {
      let (remote, local) = (&self.inner.remote, &self.inner.local);
      self.read(remote.search_history(term), local.search_history(term)).await
   }

   /// The state set by the asset's latest check-in or check-out.
   pub async fn current_status(&self, asset_id: &str) -> Result<CurrentStatus> {
      let (remote, local) = (&self.inner.remote, &self.inner.local);
      let latest = self
         .read(
            remote.latest_check_event(asset_id),
            local.latest_check_event(asset_id),
         )
         .await?;

      Ok(latest.map_or_else(CurrentStatus::never_checked_in, CurrentStatus::from_event))
   }

   // ─── Flags ───

   /// Flags the asset for attention and records a `flagged` scan. An asset
   /// that was checked in is checked out.
   ///
   /// Returns where the last write landed.
   pub async fn flag_asset(
      &self,
      asset_id: &str,
      notes: Option<&str>,
      technician: Option<&str>,
   ) -> Result<WriteOutcome> {
      require_asset_id(asset_id)?;
      let status = self.current_status(asset_id).await?;
      let now = now_utc();

      self
         .write(Mutation::Asset(AssetMutation::Flag {
            asset_id: asset_id.to_string(),
            notes: notes.map(String::from),
            technician: technician.map(String::from),
            timestamp: now,
         }))
         .await?;

      let mut outcome = self
         .record_scan_at(
            asset_id,
            ScanStatus::Flagged,
            technician,
            notes,
            Some(FLAGGED_SITE),
            now,
         )
         .await?;

      if status.state == CheckState::In {
         debug!(asset_id = %asset_id, "checking out flagged asset");
         let note = format!(
            "Automatically checked out due to flagging: {}",
            notes.unwrap_or_default()
         );
         outcome = self
            .record_scan_at(
               asset_id,
               ScanStatus::Out,
               technician,
               Some(&note),
               Some(FLAGGED_SITE),
               now,
            )
            .await?;
      }

      info!(asset_id = %asset_id, queued = outcome.is_queued(), "flagged asset");
      Ok(outcome)
   }

   /// Clears the flag and records an `unflagged` scan at the asset's current
   /// site.
   pub async fn unflag_asset(
      &self,
      asset_id: &str,
      technician: Option<&str>,
      notes: Option<&str>,
   ) -> Result<WriteOutcome> {
      require_asset_id(asset_id)?;
      let status = self.current_status(asset_id).await?;

      self
         .write(Mutation::Asset(AssetMutation::Unflag {
            asset_id: asset_id.to_string(),
         }))
         .await?;

      let outcome = self
         .record_scan(
            asset_id,
            ScanStatus::Unflagged,
            technician,
            notes,
            status.site.as_deref(),
         )
         .await?;

      info!(asset_id = %asset_id, queued = outcome.is_queued(), "unflagged asset");
      Ok(outcome)
   }

   /// Flagged assets with their latest check-in/out, most recently flagged
   /// first.
   pub async fn flagged_assets(&self) -> Result<Vec<FlaggedAsset>> {
      let (remote, local) = (&self.inner.remote, &self.inner.local);
      self.read(remote.flagged_assets(), local.flagged_assets()).await
   }

   // ─── Leases ───

   /// Sets whichever lease dates are given. Returns `None` when neither is.
   ///
   /// A new maturity date also recomputes the expiry flag.
   pub async fn update_lease_info(
      &self,
      asset_id: &str,
      start_date: Option<&str>,
      maturity_date: Option<&str>,
   ) -> Result<Option<WriteOutcome>> {
      require_asset_id(asset_id)?;

      if start_date.is_none() && maturity_date.is_none() {
         warn!(asset_id = %asset_id, "no lease data provided");
         return Ok(None);
      }

      let mut outcome = self
         .write(Mutation::Asset(AssetMutation::SetLease {
            asset_id: asset_id.to_string(),
            start_date: start_date.map(String::from),
            maturity_date: maturity_date.map(String::from),
            last_updated: now_utc(),
         }))
         .await?;

      if maturity_date.is_some_and(|date| !date.is_empty()) {
         let (check, expiry_outcome) = self.recompute_expiry(asset_id).await?;
         debug!(asset_id = %asset_id, ?check, "recomputed expiry flag");
         outcome = expiry_outcome.unwrap_or(outcome);
      }

      Ok(Some(outcome))
   }

   /// Recomputes the lease expiry flag from the stored maturity date.
   pub async fn recompute_expiry_flag(&self, asset_id: &str) -> Result<ExpiryCheck> {
      Ok(self.recompute_expiry(asset_id).await?.0)
   }

   async fn recompute_expiry(&self, asset_id: &str) -> Result<(ExpiryCheck, Option<WriteOutcome>)> {
      let maturity = self
         .asset_by_id(asset_id)
         .await?
         .and_then(|asset| asset.lease.maturity_date);

      let check = evaluate_expiry(
         maturity.as_deref(),
         today_utc(),
         self.inner.config.expiry_warning_days,
      );

      match check {
         ExpiryCheck::Updated { flagged, .. } => {
            let outcome = self.set_expiry_flag(asset_id, flagged).await?;
            Ok((check, Some(outcome)))
         }
         ExpiryCheck::Unparseable => {
            warn!(asset_id = %asset_id, maturity = ?maturity, "unrecognized lease maturity date");
            Ok((check, None))
         }
         ExpiryCheck::NoMaturityDate => Ok((check, None)),
      }
   }

   /// Recomputes the expiry flag of every asset with a maturity date.
   pub async fn refresh_expiry_flags(&self) -> Result<ExpiryRefresh> {
      let (remote, local) = (&self.inner.remote, &self.inner.local);
      let maturities = self
         .read(remote.lease_maturities(), local.lease_maturities())
         .await?;

      let today = today_utc();
      let mut refresh = ExpiryRefresh::default();

      for (asset_id, maturity) in maturities {
         match evaluate_expiry(Some(&maturity), today, self.inner.config.expiry_warning_days) {
            ExpiryCheck::Updated { flagged, .. } => {
               self.set_expiry_flag(&asset_id, flagged).await?;
               refresh.updated += 1;
            }
            ExpiryCheck::Unparseable => {
               warn!(asset_id = %asset_id, maturity = %maturity, "unrecognized lease maturity date");
               refresh.failed += 1;
            }
            ExpiryCheck::NoMaturityDate => {}
         }
      }

      info!(updated = refresh.updated, failed = refresh.failed, "refreshed lease expiry flags");
      Ok(refresh)
   }

   /// Assets carrying the expiry flag, each with its current status.
   pub async fn expiring_assets(&self, include_deleted: bool) -> Result<Vec<ExpiringAsset>> {
      let (remote, local) = (&self.inner.remote, &self.inner.local);
      let assets = self
         .read(
            remote.expiry_flagged_assets(include_deleted),
            local.expiry_flagged_assets(include_deleted),
         )
         .await?;

      let mut expiring = Vec::with_capacity(assets.len());
      for asset in assets {
         let status = self.current_status(&asset.asset_id).await?;
         expiring.push(ExpiringAsset { asset, status });
      }

      Ok(expiring)
   }

   /// Applies the lease dates of a CSV export to the assets it names.
   ///
   /// Rows are matched by serial number. Unknown serials and failed updates
   /// are counted in the report; only an unreadable file or a missing
   /// column fails the import.
   pub async fn import_lease_csv(&self, path: impl AsRef<Path>) -> Result<LeaseImportReport> {
      let path = path.as_ref();
      let bytes = tokio::fs::read(path).await?;
      let sheet = read_lease_csv(bytes.as_slice())?;

      let mut report = LeaseImportReport {
         rows: sheet.rows.len() + sheet.malformed,
         failed: sheet.malformed,
         ..Default::default()
      };

      for row in &sheet.rows {
         let LeaseRow {
            serial_number: Some(serial),
            start_date,
            maturity_date,
         } = row
         else {
            report.skipped += 1;
            continue;
         };
         if row.is_blank() {
            report.skipped += 1;
            continue;
         }

         let asset = match self.asset_by_serial(serial).await {
            Ok(Some(asset)) => asset,
            Ok(None) => {
               report.not_found += 1;
               report.not_found_serials.push(serial.clone());
               continue;
            }
            Err(e) => {
               warn!(serial = %serial, error = %e, "lease import lookup failed");
               report.failed += 1;
               continue;
            }
         };

         match self
            .update_lease_info(&asset.asset_id, start_date.as_deref(), maturity_date.as_deref())
            .await
         {
            Ok(Some(_)) => report.updated += 1,
            Ok(None) => report.skipped += 1,
            Err(e) => {
               warn!(asset_id = %asset.asset_id, serial = %serial, error = %e, "lease import update failed");
               report.failed += 1;
            }
         }
      }

      info!(
         path = %path.display(),
         updated = report.updated,
         not_found = report.not_found,
         skipped = report.skipped,
         failed = report.failed,
         "imported lease file"
      );
      Ok(report)
   }

   async fn set_expiry_flag(&self, asset_id: &str, flagged: bool) -> Result<WriteOutcome> {
      self
         .write(Mutation::Asset(AssetMutation::SetExpiryFlag {
            asset_id: asset_id.to_string(),
            flagged,
            last_updated: now_utc(),
         }))
         .await
   }

   // ─── Routing ───

   /// Sends one mutation to the authoritative store.
   ///
   /// A connectivity failure on the remote degrades and sends the same
   /// mutation to the local store, where it is queued. Any other remote error
   /// is returned. A remote write is also applied to the local mirror;
   /// failure there is only logged.
   async fn write(&self, mutation: Mutation) -> Result<WriteOutcome> {
      let inner = &self.inner;
      let _gate = inner.mode.read_gate().await;

      if !inner.mode.is_degraded() {
         match inner.remote.apply(&mutation).await {
            Ok(_) => {
               if let Err(e) = inner.local.apply(&mutation).await {
                  warn!(asset_id = %mutation.asset_id(), error = %e, "local mirror not updated");
               }
               return Ok(WriteOutcome::Remote);
            }
            Err(e) if e.is_connectivity() => {
               inner.mode.mark_degraded();
               debug!(asset_id = %mutation.asset_id(), error = %e, "write falling back to local store");
            }
            Err(e) => return Err(e),
         }
      }

      inner.local.apply_queued(&mutation).await?;
      inner.mode.set_pending(true);

      debug!(
         table = %mutation.table_name(),
         asset_id = %mutation.asset_id(),
         "saved locally, will sync later"
      );

      Ok(WriteOutcome::Local)
   }

   /// Runs `remote` if connected, `local` if degraded or the remote turns out
   /// to be unreachable. Neither future runs until chosen.
   async fn read<T>(
      &self,
      remote: impl Future<Output = Result<T>>,
      local: impl Future<Output = Result<T>>,
   ) -> Result<T> {
      let _gate = self.inner.mode.read_gate().await;

      if !self.inner.mode.is_degraded() {
         match remote.await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_connectivity() => {
               self.inner.mode.mark_degraded();
               debug!(error = %e, "read falling back to local store");
            }
            Err(e) => return Err(e),
         }
      }

      local.await
   }
}

fn require_asset_id(asset_id: &str) -> Result<()> {
   if asset_id.trim().is_empty() {
      return Err(Error::InvalidInput("asset id is empty".into()));
   }
   Ok(())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_require_asset_id() {
      assert!(require_asset_id("GF-100").is_ok());

      let err = require_asset_id("  ").unwrap_err();
      assert_eq!(err.error_code(), "INVALID_INPUT");
   }
}
