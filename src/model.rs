//! Inventory records as read from either store

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Operational status that marks a soft-deleted asset.
pub const DELETED_STATUS: &str = "DELETED";

/// Note on the synthetic status of an asset that was never checked in or out.
pub const NO_HISTORY_NOTE: &str = "No check-in/out history found";

/// One inventory item, keyed by `asset_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Asset {
   pub asset_id: String,
   pub serial_number: Option<String>,
   pub hostname: Option<String>,
   pub operational_status: Option<String>,
   pub install_status: Option<String>,
   pub location: Option<String>,
   pub ci_region: Option<String>,
   pub owned_by: Option<String>,
   pub assigned_to: Option<String>,
   pub comments: Option<String>,
   pub manufacturer: Option<String>,
   pub model_id: Option<String>,
   pub model_description: Option<String>,
   pub vendor: Option<String>,
   pub warranty_expiration: Option<String>,
   pub os: Option<String>,
   pub os_version: Option<String>,
   pub cmdb_url: Option<String>,
   #[serde(with = "time::serde::rfc3339::option")]
   pub last_updated: Option<OffsetDateTime>,
   #[sqlx(flatten)]
   pub flag: AssetFlag,
   #[sqlx(flatten)]
   pub lease: LeaseInfo,
}

impl Asset {
   pub fn is_deleted(&self) -> bool {
      self.operational_status.as_deref() == Some(DELETED_STATUS)
   }
}

/// Attention flag raised by a technician.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AssetFlag {
   #[sqlx(rename = "flag_status")]
   pub flagged: bool,
   #[sqlx(rename = "flag_notes")]
   pub notes: Option<String>,
   #[sqlx(rename = "flag_timestamp")]
   #[serde(with = "time::serde::rfc3339::option")]
   pub timestamp: Option<OffsetDateTime>,
   #[sqlx(rename = "flag_tech")]
   pub technician: Option<String>,
}

/// Lease dates are kept as entered; see [`crate::lease`] for parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeaseInfo {
   #[sqlx(rename = "lease_start_date")]
   pub start_date: Option<String>,
   #[sqlx(rename = "lease_maturity_date")]
   pub maturity_date: Option<String>,
   #[sqlx(rename = "expiry_flag_status")]
   pub expiry_flagged: bool,
}

/// Input to an asset upsert. Only the fields that are `Some` are written;
/// on update the rest keep their stored values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetFields {
   #[serde(alias = "asset_tag")]
   pub asset_id: String,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub serial_number: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub hostname: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub operational_status: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub install_status: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub location: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub ci_region: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub owned_by: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub assigned_to: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub comments: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub manufacturer: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub model_id: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub model_description: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub vendor: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub warranty_expiration: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub os: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub os_version: Option<String>,
   #[serde(skip_serializing_if = "Option::is_none")]
   pub cmdb_url: Option<String>,
}

impl AssetFields {
   pub fn new(asset_id: impl Into<String>) -> Self {
      Self {
         asset_id: asset_id.into(),
         ..Default::default()
      }
   }

   /// Column/value pairs for every field that is set, in table order.
   pub fn assignments(&self) -> Vec<(&'static str, &str)> {
      let columns: [(&'static str, &Option<String>); 17] = [
         ("serial_number", &self.serial_number),
         ("hostname", &self.hostname),
         ("operational_status", &self.operational_status),
         ("install_status", &self.install_status),
         ("location", &self.location),
         ("ci_region", &self.ci_region),
         ("owned_by", &self.owned_by),
         ("assigned_to", &self.assigned_to),
         ("comments", &self.comments),
         ("manufacturer", &self.manufacturer),
         ("model_id", &self.model_id),
         ("model_description", &self.model_description),
         ("vendor", &self.vendor),
         ("warranty_expiration", &self.warranty_expiration),
         ("os", &self.os),
         ("os_version", &self.os_version),
         ("cmdb_url", &self.cmdb_url),
      ];

      columns
         .into_iter()
         .filter_map(|(column, value)| value.as_deref().map(|v| (column, v)))
         .collect()
   }
}

/// Label on a scan event. The vocabulary is open: unknown labels are kept
/// verbatim in [`ScanStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScanStatus {
   In,
   Out,
   Edited,
   Deleted,
   Flagged,
   Unflagged,
   Note,
   Other(String),
}

impl ScanStatus {
   pub fn as_str(&self) -> &str {
      match self {
         ScanStatus::In => "in",
         ScanStatus::Out => "out",
         ScanStatus::Edited => "edited",
         ScanStatus::Deleted => "deleted",
         ScanStatus::Flagged => "flagged",
         ScanStatus::Unflagged => "unflagged",
         ScanStatus::Note => "note",
         ScanStatus::Other(label) => label,
      }
   }

   /// The check state this event establishes, if it is a check-in or check-out.
   pub fn check_state(&self) -> Option<CheckState> {
      match self {
         ScanStatus::In => Some(CheckState::In),
         ScanStatus::Out => Some(CheckState::Out),
         _ => None,
      }
   }
}

impl From<String> for ScanStatus {
   fn from(label: String) -> Self {
      match label.as_str() {
         "in" => ScanStatus::In,
         "out" => ScanStatus::Out,
         "edited" => ScanStatus::Edited,
         "deleted" => ScanStatus::Deleted,
         "flagged" => ScanStatus::Flagged,
         "unflagged" => ScanStatus::Unflagged,
         "note" => ScanStatus::Note,
         _ => ScanStatus::Other(label),
      }
   }
}

impl From<&str> for ScanStatus {
   fn from(label: &str) -> Self {
      ScanStatus::from(label.to_string())
   }
}

impl From<ScanStatus> for String {
   fn from(status: ScanStatus) -> Self {
      match status {
         ScanStatus::Other(label) => label,
         known => known.as_str().to_string(),
      }
   }
}

impl From<CheckState> for ScanStatus {
   fn from(state: CheckState) -> Self {
      match state {
         CheckState::In => ScanStatus::In,
         CheckState::Out => ScanStatus::Out,
      }
   }
}

impl fmt::Display for ScanStatus {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Checked-in or checked-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
   In,
   Out,
}

impl CheckState {
   pub fn as_str(self) -> &'static str {
      match self {
         CheckState::In => "in",
         CheckState::Out => "out",
      }
   }
}

/// An append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScanEvent {
   pub id: i64,
   pub asset_id: String,
   #[sqlx(try_from = "String")]
   pub status: ScanStatus,
   #[serde(with = "time::serde::rfc3339")]
   pub timestamp: OffsetDateTime,
   #[sqlx(rename = "tech_name")]
   pub technician: Option<String>,
   pub notes: Option<String>,
   pub site: Option<String>,
}

/// A scan event that has not been stored yet. The timestamp is fixed when
/// the event is created so a delayed replay keeps the original time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewScanEvent {
   pub asset_id: String,
   pub status: ScanStatus,
   pub technician: Option<String>,
   pub notes: Option<String>,
   pub site: Option<String>,
   #[serde(with = "time::serde::rfc3339")]
   pub timestamp: OffsetDateTime,
}

/// Derived check-in state of an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentStatus {
   pub state: CheckState,
   /// `None` when the asset has no check-in/out history
   #[serde(with = "time::serde::rfc3339::option")]
   pub timestamp: Option<OffsetDateTime>,
   pub technician: Option<String>,
   pub notes: Option<String>,
   pub site: Option<String>,
}

impl CurrentStatus {
   /// An asset without check-in history counts as checked out.
   pub fn never_checked_in() -> Self {
      Self {
         state: CheckState::Out,
         timestamp: None,
         technician: None,
         notes: Some(NO_HISTORY_NOTE.to_string()),
         site: None,
      }
   }

   /// Builds the status from the latest in/out event. Any other event yields
   /// the no-history status.
   pub fn from_event(event: ScanEvent) -> Self {
      match event.status.check_state() {
         Some(state) => Self {
            state,
            timestamp: Some(event.timestamp),
            technician: event.technician,
            notes: event.notes,
            site: event.site,
         },
         None => Self::never_checked_in(),
      }
   }

   pub fn has_history(&self) -> bool {
      self.timestamp.is_some()
   }
}

/// An asset together with the scan that put it in its current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InventoryEntry {
   #[sqlx(flatten)]
   pub asset: Asset,
   #[serde(with = "time::serde::rfc3339")]
   pub last_scan: OffsetDateTime,
   pub last_technician: Option<String>,
   pub last_site: Option<String>,
}

/// A scan event joined with its asset's serial number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryEntry {
   #[sqlx(flatten)]
   pub event: ScanEvent,
   pub serial_number: Option<String>,
}

/// A flagged asset with its latest check-in/out, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FlaggedAsset {
   #[sqlx(flatten)]
   pub asset: Asset,
   pub check_status: Option<String>,
   #[serde(with = "time::serde::rfc3339::option")]
   pub check_timestamp: Option<OffsetDateTime>,
   pub check_site: Option<String>,
}

impl FlaggedAsset {
   pub fn check_state(&self) -> Option<CheckState> {
      self
         .check_status
         .as_deref()
         .and_then(|status| ScanStatus::from(status).check_state())
   }
}

/// An asset carrying the lease expiry flag, with its current status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiringAsset {
   pub asset: Asset,
   pub status: CurrentStatus,
}

/// Outcome of recomputing one asset's lease expiry flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExpiryCheck {
   /// The asset is unknown or has no maturity date; nothing was written.
   NoMaturityDate,
   /// The maturity date is in none of the accepted formats; nothing was written.
   Unparseable,
   Updated { flagged: bool, days_remaining: i64 },
}

/// Counts from a bulk expiry recomputation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryRefresh {
   pub updated: usize,
   pub failed: usize,
}

/// Counts from a lease CSV import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseImportReport {
   /// Data rows read, blank ones included.
   pub rows: usize,
   pub updated: usize,
   /// Rows with no serial number or no lease date.
   pub skipped: usize,
   pub not_found: usize,
   /// Rows that could not be decoded or whose update failed.
   pub failed: usize,
   pub not_found_serials: Vec<String>,
}

/// Which store is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
   Connected,
   Degraded,
}

impl Mode {
   pub fn as_str(self) -> &'static str {
      match self {
         Mode::Connected => "connected",
         Mode::Degraded => "degraded",
      }
   }
}

impl fmt::Display for Mode {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Where a write landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOutcome {
   /// Committed to the remote primary.
   Remote,
   /// Saved locally, will sync later.
   Local,
}

impl WriteOutcome {
   pub fn is_queued(self) -> bool {
      self == WriteOutcome::Local
   }
}

/// Current UTC time, truncated to microseconds so it survives a round trip
/// through either store unchanged.
pub fn now_utc() -> OffsetDateTime {
   let now = OffsetDateTime::now_utc();
   now.replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
      .unwrap_or(now)
}

#[cfg(test)]
mod tests {
   use super::*;

   fn event(status: &str) -> ScanEvent {
      ScanEvent {
         id: 1,
         asset_id: "A1".into(),
         status: ScanStatus::from(status),
         timestamp: OffsetDateTime::UNIX_EPOCH,
         technician: Some("kim".into()),
         notes: None,
         site: Some("Bench".into()),
      }
   }

   #[test]
   fn test_scan_status_known_labels() {
      for label in ["in", "out", "edited", "deleted", "flagged", "unflagged", "note"] {
         let status = ScanStatus::from(label);
         assert!(!matches!(status, ScanStatus::Other(_)), "{label}");
         assert_eq!(status.as_str(), label);
      }
   }

   #[test]
   fn test_scan_status_keeps_unknown_label() {
      let status = ScanStatus::from("repaired");
      assert_eq!(status, ScanStatus::Other("repaired".into()));
      assert_eq!(String::from(status), "repaired");
   }

   #[test]
   fn test_scan_status_serde_is_plain_string() {
      let json = serde_json::to_string(&ScanStatus::Unflagged).unwrap();
      assert_eq!(json, "\"unflagged\"");

      let parsed: ScanStatus = serde_json::from_str("\"custom\"").unwrap();
      assert_eq!(parsed, ScanStatus::Other("custom".into()));
   }

   #[test]
   fn test_current_status_from_check_event() {
      let status = CurrentStatus::from_event(event("in"));
      assert_eq!(status.state, CheckState::In);
      assert_eq!(status.site.as_deref(), Some("Bench"));
      assert!(status.has_history());
   }

   #[test]
   fn test_current_status_never_checked_in() {
      let status = CurrentStatus::never_checked_in();
      assert_eq!(status.state, CheckState::Out);
      assert_eq!(status.notes.as_deref(), Some(NO_HISTORY_NOTE));
      assert!(!status.has_history());

      assert_eq!(CurrentStatus::from_event(event("note")), status);
   }

   #[test]
   fn test_asset_fields_accepts_asset_tag() {
      let fields: AssetFields =
         serde_json::from_str(r#"{"asset_tag": "GF-100", "hostname": "bench-07"}"#).unwrap();

      assert_eq!(fields.asset_id, "GF-100");
      assert_eq!(fields.assignments(), vec![("hostname", "bench-07")]);
   }

   #[test]
   fn test_assignments_in_table_order() {
      let fields = AssetFields {
         cmdb_url: Some("https://cmdb/1".into()),
         serial_number: Some("SN1".into()),
         ..AssetFields::new("A1")
      };

      assert_eq!(
         fields.assignments(),
         vec![("serial_number", "SN1"), ("cmdb_url", "https://cmdb/1")]
      );
   }

   #[test]
   fn test_mode_display() {
      assert_eq!(Mode::Connected.to_string(), "connected");
      assert_eq!(Mode::Degraded.to_string(), "degraded");
   }

   #[test]
   fn test_now_utc_has_whole_microseconds() {
      let now = now_utc();
      assert_eq!(now.nanosecond() % 1_000, 0);
      assert_eq!(now.offset(), time::UtcOffset::UTC);
   }
}
