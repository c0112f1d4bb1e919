//! Typed mutations and the sync queue entries that carry them.
//!
//! Every write goes through a [`Mutation`]. The same value is applied to
//! whichever store is authoritative and, when that store is the local
//! cache, serialized into the sync queue for later replay against the
//! remote primary.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::model::{AssetFields, NewScanEvent};

/// A write against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "change", rename_all = "snake_case")]
pub enum Mutation {
   Asset(AssetMutation),
   ScanEvent(ScanEventMutation),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetMutation {
   /// Insert the asset, or update only the provided fields.
   Upsert {
      fields: AssetFields,
      #[serde(with = "time::serde::rfc3339")]
      last_updated: OffsetDateTime,
   },
   /// Mark the asset `DELETED` and note it in the comments.
   SoftDelete { asset_id: String },
   /// Remove the asset row. Its scan history is kept.
   HardDelete { asset_id: String },
   /// Set whichever lease dates are provided.
   SetLease {
      asset_id: String,
      start_date: Option<String>,
      maturity_date: Option<String>,
      #[serde(with = "time::serde::rfc3339")]
      last_updated: OffsetDateTime,
   },
   SetExpiryFlag {
      asset_id: String,
      flagged: bool,
      #[serde(with = "time::serde::rfc3339")]
      last_updated: OffsetDateTime,
   },
   Flag {
      asset_id: String,
      notes: Option<String>,
      technician: Option<String>,
      #[serde(with = "time::serde::rfc3339")]
      timestamp: OffsetDateTime,
   },
   /// Clear every flag field.
   Unflag { asset_id: String },
}

impl AssetMutation {
   pub fn asset_id(&self) -> &str {
      match self {
         AssetMutation::Upsert { fields, .. } => &fields.asset_id,
         AssetMutation::SoftDelete { asset_id }
         | AssetMutation::HardDelete { asset_id }
         | AssetMutation::SetLease { asset_id, .. }
         | AssetMutation::SetExpiryFlag { asset_id, .. }
         | AssetMutation::Flag { asset_id, .. }
         | AssetMutation::Unflag { asset_id } => asset_id,
      }
   }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanEventMutation {
   /// Append one history row.
   Record { event: NewScanEvent },
}

impl Mutation {
   pub fn upsert_asset(fields: AssetFields, last_updated: OffsetDateTime) -> Self {
      Mutation::Asset(AssetMutation::Upsert {
         fields,
         last_updated,
      })
   }

   pub fn record_scan(event: NewScanEvent) -> Self {
      Mutation::ScanEvent(ScanEventMutation::Record { event })
   }

   pub fn asset_id(&self) -> &str {
      match self {
         Mutation::Asset(change) => change.asset_id(),
         Mutation::ScanEvent(ScanEventMutation::Record { event }) => &event.asset_id,
      }
   }

   /// Table the mutation writes to.
   pub fn table_name(&self) -> &'static str {
      match self {
         Mutation::Asset(_) => "assets",
         Mutation::ScanEvent(_) => "scan_history",
      }
   }

   /// Queue operation recorded for this mutation. Upserts are classified by
   /// the caller since only the target store knows whether the row exists.
   pub fn operation(&self, row_exists: bool) -> QueueOperation {
      match self {
         Mutation::Asset(AssetMutation::Upsert { .. }) if !row_exists => QueueOperation::Insert,
         Mutation::Asset(AssetMutation::HardDelete { .. }) => QueueOperation::Delete,
         Mutation::Asset(_) => QueueOperation::Update,
         Mutation::ScanEvent(_) => QueueOperation::Insert,
      }
   }

   pub fn to_payload(&self) -> Result<String> {
      Ok(serde_json::to_string(self)?)
   }
}

/// Operation column of the sync queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueOperation {
   Insert,
   Update,
   Delete,
}

impl QueueOperation {
   pub fn as_str(self) -> &'static str {
      match self {
         QueueOperation::Insert => "INSERT",
         QueueOperation::Update => "UPDATE",
         QueueOperation::Delete => "DELETE",
      }
   }
}

impl fmt::Display for QueueOperation {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// A pending replay, as stored in the local `sync_queue` table.
///
/// The payload stays raw until [`mutation`](Self::mutation) is called, so an
/// entry that no longer decodes is still listed and kept in the queue.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SyncQueueEntry {
   pub id: i64,
   pub operation: String,
   pub table_name: String,
   #[sqlx(rename = "data")]
   pub payload: String,
   #[sqlx(rename = "timestamp")]
   pub enqueued_at: OffsetDateTime,
}

impl SyncQueueEntry {
   pub fn mutation(&self) -> Result<Mutation> {
      serde_json::from_str(&self.payload).map_err(|source| Error::MalformedPayload {
         id: self.id,
         source,
      })
   }
}

#[cfg(test)]
mod tests {
   use time::macros::datetime;

   use super::*;
   use crate::model::ScanStatus;

   #[test]
   fn test_payload_is_tagged() {
      let mutation = Mutation::Asset(AssetMutation::SoftDelete {
         asset_id: "GF-100".into(),
      });

      let payload: serde_json::Value = serde_json::from_str(&mutation.to_payload().unwrap()).unwrap();

      assert_eq!(payload["table"], "asset");
      assert_eq!(payload["change"]["kind"], "soft_delete");
      assert_eq!(payload["change"]["asset_id"], "GF-100");
   }

   #[test]
   fn test_payload_decodes_back() {
      let mutation = Mutation::record_scan(NewScanEvent {
         asset_id: "GF-100".into(),
         status: ScanStatus::In,
         technician: Some("kim".into()),
         notes: None,
         site: Some("Bench".into()),
         timestamp: datetime!(2026-02-01 09:30:00 UTC),
      });

      let entry = SyncQueueEntry {
         id: 1,
         operation: "INSERT".into(),
         table_name: "scan_history".into(),
         payload: mutation.to_payload().unwrap(),
         enqueued_at: datetime!(2026-02-01 09:30:01 UTC),
      };

      assert_eq!(entry.mutation().unwrap(), mutation);
   }

   #[test]
   fn test_malformed_payload_reports_entry_id() {
      let entry = SyncQueueEntry {
         id: 7,
         operation: "UPDATE".into(),
         table_name: "assets".into(),
         payload: r#"{"asset_id": "GF-100", "flag_status": 1}"#.into(),
         enqueued_at: datetime!(2026-02-01 09:30:01 UTC),
      };

      match entry.mutation() {
         Err(Error::MalformedPayload { id, .. }) => assert_eq!(id, 7),
         other => panic!("expected MalformedPayload, got {other:?}"),
      }
   }

   #[test]
   fn test_operation_classification() {
      let upsert = Mutation::upsert_asset(AssetFields::new("A1"), datetime!(2026-01-01 0:00 UTC));
      assert_eq!(upsert.operation(false), QueueOperation::Insert);
      assert_eq!(upsert.operation(true), QueueOperation::Update);

      let delete = Mutation::Asset(AssetMutation::HardDelete {
         asset_id: "A1".into(),
      });
      assert_eq!(delete.operation(true), QueueOperation::Delete);
      assert_eq!(delete.table_name(), "assets");

      let unflag = Mutation::Asset(AssetMutation::Unflag {
         asset_id: "A1".into(),
      });
      assert_eq!(unflag.operation(true), QueueOperation::Update);
   }

   #[test]
   fn test_asset_id_for_every_table() {
      let scan = Mutation::record_scan(NewScanEvent {
         asset_id: "A2".into(),
         status: ScanStatus::Note,
         technician: None,
         notes: Some("dusty".into()),
         site: None,
         timestamp: datetime!(2026-01-01 0:00 UTC),
      });
      assert_eq!(scan.asset_id(), "A2");
      assert_eq!(scan.table_name(), "scan_history");
   }
}
