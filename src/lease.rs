//! Lease maturity dates, the expiry warning flag and lease CSV exports

use std::io;

use serde::Deserialize;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::ExpiryCheck;

/// Columns a lease export must carry. Others are ignored.
pub const LEASE_COLUMNS: [&str; 3] = ["Serial Number", "Lease Start Date", "Lease Maturity Date"];

/// Accepted maturity date layouts, tried in order. Month-first wins over
/// day-first when both would parse.
const DATE_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
   format_description!("[year]-[month]-[day]"),
   format_description!("[month padding:none]/[day padding:none]/[year]"),
   format_description!("[day padding:none]/[month padding:none]/[year]"),
   format_description!("[year]/[month padding:none]/[day padding:none]"),
];

/// Parses a free-text lease date.
///
/// A trailing time of day (as written by spreadsheet exports) is ignored.
pub fn parse_lease_date(raw: &str) -> Option<Date> {
   let trimmed = raw.trim();
   let date_part = trimmed
      .split(|c: char| c == ' ' || c == 'T')
      .next()
      .unwrap_or(trimmed);

   DATE_FORMATS
      .iter()
      .find_map(|format| Date::parse(date_part, format).ok())
}

/// Decides the expiry flag for a maturity date relative to `today`.
///
/// Leases that mature within `warning_days`, or have already matured, are
/// flagged.
pub fn evaluate_expiry(maturity: Option<&str>, today: Date, warning_days: i64) -> ExpiryCheck {
   let Some(raw) = maturity.filter(|m| !m.trim().is_empty()) else {
      return ExpiryCheck::NoMaturityDate;
   };

   match parse_lease_date(raw) {
      Some(date) => {
         let days_remaining = (date - today).whole_days();
         ExpiryCheck::Updated {
            flagged: days_remaining <= warning_days,
            days_remaining,
         }
      }
      None => ExpiryCheck::Unparseable,
   }
}

pub(crate) fn today_utc() -> Date {
   OffsetDateTime::now_utc().date()
}

/// One data row of a lease export. Empty cells read as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LeaseRow {
   #[serde(rename = "Serial Number", default)]
   pub serial_number: Option<String>,
   #[serde(rename = "Lease Start Date", default)]
   pub start_date: Option<String>,
   #[serde(rename = "Lease Maturity Date", default)]
   pub maturity_date: Option<String>,
}

impl LeaseRow {
   /// True when the row names no asset or carries no lease date.
   pub fn is_blank(&self) -> bool {
      self.serial_number.is_none() || (self.start_date.is_none() && self.maturity_date.is_none())
   }
}

/// The decoded rows of a lease export.
#[derive(Debug, Default)]
pub struct LeaseSheet {
   pub rows: Vec<LeaseRow>,
   /// Rows the reader could not decode.
   pub malformed: usize,
}

/// Reads a lease export with a header row.
///
/// Cells are trimmed. A missing required column fails the whole sheet; a
/// row that cannot be decoded is counted and skipped.
pub fn read_lease_csv<R: io::Read>(reader: R) -> Result<LeaseSheet> {
   let mut csv_reader = csv::ReaderBuilder::new()
      .has_headers(true)
      .trim(csv::Trim::All)
      .from_reader(reader);

   let headers = csv_reader.headers()?.clone();
   let missing: Vec<&str> = LEASE_COLUMNS
      .iter()
      .copied()
      .filter(|column| !headers.iter().any(|header| header == *column))
      .collect();
   if !missing.is_empty() {
      return Err(Error::InvalidInput(format!(
         "lease file is missing columns: {}",
         missing.join(", ")
      )));
   }

   let mut sheet = LeaseSheet::default();
   for result in csv_reader.deserialize::<LeaseRow>() {
      match result {
         Ok(row) => sheet.rows.push(row),
         Err(e) => {
            warn!(error = %e, "skipping unreadable lease row");
            sheet.malformed += 1;
         }
      }
   }

   Ok(sheet)
}

#[cfg(test)]
mod tests {
   use time::macros::date;

   use super::*;

   #[test]
   fn test_parse_iso() {
      assert_eq!(parse_lease_date("2026-03-15"), Some(date!(2026 - 03 - 15)));
   }

   #[test]
   fn test_parse_month_first() {
      assert_eq!(parse_lease_date("3/15/2026"), Some(date!(2026 - 03 - 15)));
      assert_eq!(parse_lease_date("03/15/2026"), Some(date!(2026 - 03 - 15)));
   }

   #[test]
   fn test_parse_day_first_when_month_first_fails() {
      assert_eq!(parse_lease_date("25/12/2026"), Some(date!(2026 - 12 - 25)));
   }

   #[test]
   fn test_parse_ambiguous_prefers_month_first() {
      assert_eq!(parse_lease_date("04/05/2026"), Some(date!(2026 - 04 - 05)));
   }

   #[test]
   fn test_parse_year_slash() {
      assert_eq!(parse_lease_date("2026/1/9"), Some(date!(2026 - 01 - 09)));
   }

   #[test]
   fn test_parse_ignores_time_of_day() {
      assert_eq!(
         parse_lease_date(" 2026-03-15 00:00:00 "),
         Some(date!(2026 - 03 - 15))
      );
   }

   #[test]
   fn test_parse_rejects_garbage() {
      assert_eq!(parse_lease_date("next spring"), None);
      assert_eq!(parse_lease_date("13/13/2026"), None);
   }

   #[test]
   fn test_evaluate_within_window() {
      let today = date!(2026 - 01 - 01);
      assert_eq!(
         evaluate_expiry(Some("2026-03-01"), today, 90),
         ExpiryCheck::Updated {
            flagged: true,
            days_remaining: 59
         }
      );
   }

   #[test]
   fn test_evaluate_boundary_is_flagged() {
      let today = date!(2026 - 01 - 01);
      let check = evaluate_expiry(Some("2026-04-01"), today, 90);
      assert_eq!(
         check,
         ExpiryCheck::Updated {
            flagged: true,
            days_remaining: 90
         }
      );
   }

   #[test]
   fn test_evaluate_outside_window() {
      let today = date!(2026 - 01 - 01);
      assert_eq!(
         evaluate_expiry(Some("2026-12-31"), today, 90),
         ExpiryCheck::Updated {
            flagged: false,
            days_remaining: 364
         }
      );
   }

   #[test]
   fn test_evaluate_already_expired() {
      let today = date!(2026 - 01 - 01);
      assert_eq!(
         evaluate_expiry(Some("12/01/2025"), today, 90),
         ExpiryCheck::Updated {
            flagged: true,
            days_remaining: -31
         }
      );
   }

   #[test]
   fn test_read_lease_csv_trims_and_blanks() {
      let data = "Asset Tag,Serial Number,Lease Start Date,Lease Maturity Date\n\
                  T1, SN-1 ,2024-01-01,2027-01-01\n\
                  T2,SN-2,,\n\
                  T3,,2024-01-01,\n";
      let sheet = read_lease_csv(data.as_bytes()).unwrap();

      assert_eq!(sheet.malformed, 0);
      assert_eq!(sheet.rows.len(), 3);
      assert_eq!(sheet.rows[0].serial_number.as_deref(), Some("SN-1"));
      assert_eq!(sheet.rows[0].maturity_date.as_deref(), Some("2027-01-01"));
      assert!(!sheet.rows[0].is_blank());
      assert!(sheet.rows[1].is_blank());
      assert!(sheet.rows[2].is_blank());
   }

   #[test]
   fn test_read_lease_csv_counts_short_rows() {
      let data = "Serial Number,Lease Start Date,Lease Maturity Date\nSN-1,2024-01-01\nSN-2,,2027-01-01\n";
      let sheet = read_lease_csv(data.as_bytes()).unwrap();

      assert_eq!(sheet.malformed, 1);
      assert_eq!(sheet.rows.len(), 1);
      assert_eq!(sheet.rows[0].serial_number.as_deref(), Some("SN-2"));
   }

   #[test]
   fn test_read_lease_csv_requires_columns() {
      let data = "Serial Number,Lease End\nSN-1,2027-01-01\n";
      let err = read_lease_csv(data.as_bytes()).unwrap_err();

      assert_eq!(err.error_code(), "INVALID_INPUT");
      assert!(err.to_string().contains("Lease Start Date"));
      assert!(err.to_string().contains("Lease Maturity Date"));
   }

   #[test]
   fn test_evaluate_missing_and_unparseable() {
      let today = date!(2026 - 01 - 01);
      assert_eq!(evaluate_expiry(None, today, 90), ExpiryCheck::NoMaturityDate);
      assert_eq!(evaluate_expiry(Some("  "), today, 90), ExpiryCheck::NoMaturityDate);
      assert_eq!(
         evaluate_expiry(Some("soon"), today, 90),
         ExpiryCheck::Unparseable
      );
   }
}
