//! Pull and push between the remote primary and the local cache

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mode::ModeController;
use crate::model::{Mode, now_utc};
use crate::store::{InventoryStore, LocalStore, MirrorStats, RemoteBackend};

/// Outcome of one replay pass over the sync queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
   /// Entries replayed and removed from the queue
   pub applied: usize,
   /// Entries that failed and were kept
   pub failed: usize,
   /// Queue length after the pass
   pub remaining: u64,
   /// The pass stopped early because the remote became unavailable
   pub interrupted: bool,
}

impl PushReport {
   pub fn is_complete(&self) -> bool {
      self.remaining == 0
   }
}

/// What a [`force_sync`](crate::Inventory::force_sync) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
   /// Mode after the sync
   pub mode: Mode,
   /// Set when the local cache was refreshed as part of reconnecting
   pub pull: Option<MirrorStats>,
   pub push: Option<PushReport>,
}

/// Moves data between the stores. Never goes through the router, so it can
/// run while the route gate is held.
pub struct SyncEngine {
   local: LocalStore,
   remote: Arc<dyn RemoteBackend>,
   mode: Arc<ModeController>,
   pull_window: Duration,
   running: Mutex<()>,
}

impl SyncEngine {
   pub fn new(
      local: LocalStore,
      remote: Arc<dyn RemoteBackend>,
      mode: Arc<ModeController>,
      pull_window: Duration,
   ) -> Self {
      Self {
         local,
         remote,
         mode,
         pull_window,
         running: Mutex::new(()),
      }
   }

   /// Replaces the local mirror with the remote's current assets and recent
   /// scan history. Queued writes stay queued and stay visible locally.
   pub async fn pull(&self) -> Result<MirrorStats> {
      let _running = self.running.lock().await;

      let since = now_utc() - self.pull_window;
      let snapshot = self.remote.snapshot(since).await?;
      let stats = self.local.replace_mirror(&snapshot).await?;

      info!(
         assets = stats.assets,
         scan_events = stats.scan_events,
         reapplied = stats.reapplied,
         "pulled remote data into local cache"
      );

      Ok(stats)
   }

   /// Whether the sync queue holds any entry, counted from the queue itself.
   pub async fn has_pending(&self) -> Result<bool> {
      Ok(self.local.queue_len().await? > 0)
   }

   /// Replays the sync queue against the remote, oldest entry first.
   ///
   /// Each entry is its own remote transaction and is removed from the queue
   /// once it commits. An entry that cannot be decoded or is rejected by the
   /// remote is kept and the pass moves on. A connectivity failure ends the
   /// pass and degrades; an exhausted pool ends it without degrading.
   pub async fn push(&self) -> Result<PushReport> {
      let _running = self.running.lock().await;

      let entries = self.local.drain_queue().await?;
      let mut report = PushReport::default();

      for entry in entries {
         let mutation = match entry.mutation() {
            Ok(mutation) => mutation,
            Err(e) => {
               warn!(queue_id = entry.id, error = %e, "skipping undecodable sync entry");
               report.failed += 1;
               continue;
            }
         };

         match self.remote.apply(&mutation).await {
            Ok(_) => {
               self.local.remove_queue_entries(&[entry.id]).await?;
               report.applied += 1;
               debug!(
                  queue_id = entry.id,
                  operation = %entry.operation,
                  table = %entry.table_name,
                  "replayed sync entry"
               );
            }
            Err(e) if e.is_connectivity() => {
               warn!(queue_id = entry.id, error = %e, "remote lost during sync");
               self.mode.mark_degraded();
               report.interrupted = true;
               break;
            }
            Err(e @ Error::PoolExhausted { .. }) => {
               warn!(queue_id = entry.id, error = %e, "remote busy, stopping sync pass");
               report.interrupted = true;
               break;
            }
            Err(e) => {
               warn!(queue_id = entry.id, error = %e, "remote rejected sync entry, keeping it");
               report.failed += 1;
            }
         }
      }

      report.remaining = self.local.queue_len().await?;
      self.mode.set_pending(report.remaining > 0);

      if report.is_complete() {
         info!(applied = report.applied, "sync queue drained");
      } else {
         warn!(
            applied = report.applied,
            failed = report.failed,
            remaining = report.remaining,
            "sync finished with entries still queued"
         );
      }

      Ok(report)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_push_report_completeness() {
      assert!(PushReport::default().is_complete());

      let partial = PushReport {
         applied: 2,
         failed: 1,
         remaining: 1,
         interrupted: false,
      };
      assert!(!partial.is_complete());
   }

   #[test]
   fn test_sync_report_serializes_mode() {
      let report = SyncReport {
         mode: Mode::Connected,
         pull: None,
         push: Some(PushReport::default()),
      };
      let json = serde_json::to_value(report).unwrap();
      assert_eq!(json["mode"], "connected");
      assert_eq!(json["push"]["remaining"], 0);
   }
}
