//! Connected/degraded state and the route gate

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

use crate::model::Mode;

/// Process-wide failover state, shared by `Arc`.
///
/// Any component may move the state to degraded. Only the connectivity
/// monitor moves it back, and it does so while holding the write side of the
/// route gate so no routed operation reaches the remote before the local
/// cache has been refreshed.
#[derive(Debug)]
pub struct ModeController {
   degraded: AtomicBool,
   pending: AtomicBool,
   gate: RwLock<()>,
}

impl ModeController {
   pub fn new(mode: Mode) -> Self {
      Self {
         degraded: AtomicBool::new(mode == Mode::Degraded),
         pending: AtomicBool::new(false),
         gate: RwLock::new(()),
      }
   }

   pub fn is_degraded(&self) -> bool {
      self.degraded.load(Ordering::Acquire)
   }

   pub fn mode(&self) -> Mode {
      if self.is_degraded() {
         Mode::Degraded
      } else {
         Mode::Connected
      }
   }

   /// Returns `true` if this call switched the mode.
   pub fn mark_degraded(&self) -> bool {
      let switched = !self.degraded.swap(true, Ordering::AcqRel);
      if switched {
         warn!("remote database unreachable, switching to local store");
      }
      switched
   }

   pub(crate) fn mark_connected(&self) -> bool {
      let switched = self.degraded.swap(false, Ordering::AcqRel);
      if switched {
         info!("remote database reachable again, switching to remote store");
      }
      switched
   }

   /// Whether the sync queue held entries at last count.
   pub fn pending_sync(&self) -> bool {
      self.pending.load(Ordering::Acquire)
   }

   pub(crate) fn set_pending(&self, pending: bool) {
      self.pending.store(pending, Ordering::Release);
   }

   /// Held by every routed operation for its duration. Never acquire twice
   /// on one task: the lock is write-preferring.
   pub(crate) async fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
      self.gate.read().await
   }

   pub(crate) async fn write_gate(&self) -> RwLockWriteGuard<'_, ()> {
      self.gate.write().await
   }
}

#[cfg(test)]
mod tests {
   use std::sync::Arc;
   use std::time::Duration;

   use super::*;

   #[test]
   fn test_transitions_report_once() {
      let mode = ModeController::new(Mode::Connected);
      assert_eq!(mode.mode(), Mode::Connected);

      assert!(mode.mark_degraded());
      assert!(!mode.mark_degraded());
      assert!(mode.is_degraded());

      assert!(mode.mark_connected());
      assert!(!mode.mark_connected());
      assert_eq!(mode.mode(), Mode::Connected);
   }

   #[test]
   fn test_starts_in_given_mode() {
      assert!(ModeController::new(Mode::Degraded).is_degraded());
      assert!(!ModeController::new(Mode::Degraded).pending_sync());
   }

   #[test]
   fn test_pending_flag() {
      let mode = ModeController::new(Mode::Degraded);
      mode.set_pending(true);
      assert!(mode.pending_sync());
      mode.set_pending(false);
      assert!(!mode.pending_sync());
   }

   #[tokio::test]
   async fn test_write_gate_waits_for_readers() {
      let mode = Arc::new(ModeController::new(Mode::Degraded));
      let reader = mode.read_gate().await;

      let writer = {
         let mode = Arc::clone(&mode);
         tokio::spawn(async move {
            let _gate = mode.write_gate().await;
            mode.mark_connected();
         })
      };

      tokio::time::sleep(Duration::from_millis(50)).await;
      assert!(mode.is_degraded());

      drop(reader);
      writer.await.unwrap();
      assert!(!mode.is_degraded());
   }
}
