//! Background reconnect loop
//!
//! While degraded, every tick tries to bring the remote back: rebuild the
//! pools, probe the primary, refresh the local cache under the route gate,
//! switch to connected, then replay the sync queue. Any failure tears the
//! pools down again and the next tick retries.
//!
//! The loop is also the only place a forced sync runs, so the switch back to
//! connected always happens on this task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::mode::ModeController;
use crate::store::{MirrorStats, RemoteBackend};
use crate::sync::{SyncEngine, SyncReport};

enum Request {
   ForceSync(oneshot::Sender<Result<SyncReport>>),
}

pub struct ConnectivityMonitor {
   remote: Arc<dyn RemoteBackend>,
   mode: Arc<ModeController>,
   sync: Arc<SyncEngine>,
   interval: Duration,
   probe_timeout: Duration,
}

impl ConnectivityMonitor {
   pub fn new(
      remote: Arc<dyn RemoteBackend>,
      mode: Arc<ModeController>,
      sync: Arc<SyncEngine>,
      interval: Duration,
      probe_timeout: Duration,
   ) -> Self {
      Self {
         remote,
         mode,
         sync,
         interval,
         probe_timeout,
      }
   }

   /// Starts the loop. The first tick fires one interval from now.
   pub fn spawn(self) -> MonitorHandle {
      let (request_tx, request_rx) = mpsc::channel(8);
      let (stop_tx, stop_rx) = watch::channel(false);
      let task = tokio::spawn(self.run(request_rx, stop_rx));

      MonitorHandle {
         requests: request_tx,
         stop: stop_tx,
         task: Mutex::new(Some(task)),
      }
   }

   /// Reconnects if degraded, then pushes if there is anything queued or
   /// `force` is set.
   pub(crate) async fn sync_now(&self, force: bool) -> Result<SyncReport> {
      let pull = if self.mode.is_degraded() {
         Some(self.reconnect().await?)
      } else {
         None
      };

      let push = if force || self.sync.has_pending().await? {
         let report = self.sync.push().await?;
         if report.interrupted && self.mode.is_degraded() {
            self.remote.teardown().await;
         }
         Some(report)
      } else {
         None
      };

      Ok(SyncReport {
         mode: self.mode.mode(),
         pull,
         push,
      })
   }

   async fn reconnect(&self) -> Result<MirrorStats> {
      if let Err(e) = self.connect().await {
         self.remote.teardown().await;
         return Err(e);
      }

      let _gate = self.mode.write_gate().await;

      match self.sync.pull().await {
         Ok(stats) => {
            self.mode.mark_connected();
            Ok(stats)
         }
         Err(e) => {
            self.remote.teardown().await;
            Err(e)
         }
      }
   }

   async fn connect(&self) -> Result<()> {
      self.remote.reinitialize().await?;
      self.remote.probe(self.probe_timeout).await
   }

   async fn tick(&self) {
      if !self.mode.is_degraded() {
         return;
      }

      match self.sync_now(false).await {
         Ok(report) => info!(mode = %report.mode, "reconnect attempt finished"),
         Err(e) => debug!(error = %e, "remote still unavailable"),
      }
   }

   async fn run(self, mut requests: mpsc::Receiver<Request>, mut stop: watch::Receiver<bool>) {
      let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      debug!(interval = ?self.interval, "connectivity monitor started");

      loop {
         tokio::select! {
            _ = ticker.tick() => self.tick().await,

            request = requests.recv() => match request {
               Some(Request::ForceSync(reply)) => {
                  // The caller may have given up waiting
                  let _ = reply.send(self.sync_now(true).await);
               }
               None => break,
            },

            changed = stop.changed() => {
               if changed.is_err() || *stop.borrow() {
                  break;
               }
            }
         }
      }

      debug!("connectivity monitor stopped");
   }
}

/// Controls a running [`ConnectivityMonitor`].
pub struct MonitorHandle {
   requests: mpsc::Sender<Request>,
   stop: watch::Sender<bool>,
   task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorHandle {
   /// Runs a sync on the monitor task and waits for its result.
   pub async fn force_sync(&self) -> Result<SyncReport> {
      let (reply_tx, reply_rx) = oneshot::channel();

      self
         .requests
         .send(Request::ForceSync(reply_tx))
         .await
         .map_err(|_| Error::MonitorStopped)?;

      reply_rx.await.map_err(|_| Error::MonitorStopped)?
   }

   /// Stops the loop and waits for it to exit. A sync in progress finishes
   /// first. Later calls return immediately.
   pub async fn shutdown(&self) {
      let _ = self.stop.send(true);

      let task = self.task.lock().await.take();
      if let Some(task) = task {
         if let Err(e) = task.await {
            debug!(error = %e, "connectivity monitor task ended abnormally");
         }
      }
   }
}
