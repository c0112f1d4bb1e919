//! Schema introspection and additive migration helpers.
//!
//! Local caches outlive application upgrades, so newer columns are added to
//! existing tables in place. Nothing here drops or renames a column.

use sqlx::{Row, SqliteConnection};
use tracing::info;

use crate::error::{Error, Result};

/// A column that must exist on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
   pub name: &'static str,
   /// Type and constraints as written after the column name in
   /// `ALTER TABLE ... ADD COLUMN`, e.g. `INTEGER DEFAULT 0`.
   pub decl: &'static str,
}

impl ColumnDef {
   pub const fn new(name: &'static str, decl: &'static str) -> Self {
      Self { name, decl }
   }
}

/// Lists the column names of `table` in declaration order.
///
/// Returns an empty list when the table doesn't exist.
pub async fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>> {
   // PRAGMA table_info returns: cid, name, type, notnull, dflt_value, pk
   let pragma = format!("PRAGMA table_info({})", quote_identifier(table));

   let rows = sqlx::query(&pragma).fetch_all(&mut *conn).await?;

   Ok(rows.iter().map(|row| row.get::<String, _>("name")).collect())
}

/// Adds every column in `columns` that `table` is missing.
///
/// Returns the names of the columns that were added, which is empty when the
/// table was already current.
pub async fn ensure_columns(
   conn: &mut SqliteConnection,
   table: &str,
   columns: &[ColumnDef],
) -> Result<Vec<&'static str>> {
   let existing = table_columns(conn, table).await?;
   let mut added = Vec::new();

   for column in columns {
      if existing.iter().any(|name| name.eq_ignore_ascii_case(column.name)) {
         continue;
      }

      let sql = format!(
         "ALTER TABLE {} ADD COLUMN {} {}",
         quote_identifier(table),
         quote_identifier(column.name),
         column.decl
      );

      sqlx::query(&sql)
         .execute(&mut *conn)
         .await
         .map_err(|source| Error::Migration {
            table: table.to_string(),
            column: column.name.to_string(),
            source,
         })?;

      info!(table = %table, column = %column.name, "added column to local table");
      added.push(column.name);
   }

   Ok(added)
}

/// Quotes a SQLite identifier to prevent SQL injection.
pub fn quote_identifier(name: &str) -> String {
   // Double any existing double quotes and wrap in double quotes
   format!("\"{}\"", name.replace('"', "\"\""))
}
