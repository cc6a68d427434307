//! Per-row transfer into the destination with conflict handling.
//!
//! Every row becomes one INSERT carrying its own `ON CONFLICT` clause and a
//! `RETURNING (xmax = 0)` probe, so the engine can tell inserts from updates
//! from no-ops without a second query. Rows are independent: a failure is
//! counted and logged, and the rest of the table keeps going.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_postgres::types::ToSql;
use tracing::{debug, info, warn};

use crate::catalog::TableDescriptor;
use crate::db::{quote_ident, Db};
use crate::error::Result;
use crate::row::Row;

/// What to do when a row's primary key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Keep the destination row untouched.
    InsertIfAbsent,
    /// Overwrite the destination row with the source row.
    #[default]
    UpsertOverwrite,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::InsertIfAbsent => write!(f, "insert-if-absent"),
            TransferMode::UpsertOverwrite => write!(f, "upsert-overwrite"),
        }
    }
}

impl std::str::FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "insert-if-absent" | "insert_if_absent" => Ok(TransferMode::InsertIfAbsent),
            "upsert-overwrite" | "upsert_overwrite" => Ok(TransferMode::UpsertOverwrite),
            other => Err(format!(
                "unknown transfer mode '{other}' (expected insert-if-absent or upsert-overwrite)"
            )),
        }
    }
}

/// Outcome counts for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl TableReport {
    pub fn new(table: impl Into<String>) -> Self {
        TableReport {
            table: table.into(),
            inserted: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
        }
    }

    /// Rows that changed the destination.
    pub fn rows_written(&self) -> u64 {
        self.inserted + self.updated
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Writes rows into one destination database.
pub struct TransferEngine<'a> {
    dest: &'a Db,
}

impl<'a> TransferEngine<'a> {
    pub fn new(dest: &'a Db) -> Self {
        TransferEngine { dest }
    }

    /// Transfer `rows` into `table`, one statement per row.
    pub async fn transfer_table(
        &self,
        table: &TableDescriptor,
        rows: &[Row],
        mode: TransferMode,
    ) -> Result<TableReport> {
        let mut report = TableReport::new(table.name);
        if rows.is_empty() {
            debug!("{}: no source rows", table.name);
            return Ok(report);
        }

        let client = self
            .dest
            .client(&format!("transferring {}", table.name))
            .await?;

        for row in rows {
            let (sql, params) = build_row_sql(table.name, table.primary_key, row, mode);
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            match client.query(&sql, &refs[..]).await {
                Ok(returned) => match returned.first() {
                    None => report.skipped += 1,
                    Some(r) => match r.try_get::<_, bool>(0) {
                        Ok(true) => report.inserted += 1,
                        Ok(false) => report.updated += 1,
                        Err(e) => {
                            warn!("{}: unreadable outcome for row: {}", table.name, e);
                            report.failed += 1;
                        }
                    },
                },
                Err(e) => {
                    warn!(
                        "{}: row with {} = {:?} failed: {}",
                        table.name,
                        table.primary_key,
                        row.get(table.primary_key),
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            "{}: {} inserted, {} updated, {} skipped, {} failed",
            table.name, report.inserted, report.updated, report.skipped, report.failed
        );
        Ok(report)
    }
}

/// One row's INSERT with conflict handling and an insert/update probe.
///
/// `RETURNING (xmax = 0)` is true exactly when the row version was freshly
/// inserted. The upsert form only updates when some column actually differs,
/// so unchanged rows come back empty and count as skipped. A row carrying
/// nothing but its primary key has nothing to update and falls back to the
/// insert-if-absent form.
pub(crate) fn build_row_sql(
    table: &str,
    primary_key: &str,
    row: &Row,
    mode: TransferMode,
) -> (String, Vec<Box<dyn ToSql + Sync + Send>>) {
    let table_q = quote_ident(table);
    let pk_q = quote_ident(primary_key);

    let mut column_list = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::with_capacity(row.len());
    for (idx, (column, value)) in row.iter().enumerate() {
        column_list.push(quote_ident(column));
        placeholders.push(format!("${}{}", idx + 1, value.cast_suffix()));
        params.push(value.to_param());
    }

    let non_pk: Vec<&str> = row
        .column_names()
        .filter(|c| *c != primary_key)
        .collect();

    let conflict_clause = match mode {
        TransferMode::UpsertOverwrite if !non_pk.is_empty() => {
            let assignments: Vec<String> = non_pk
                .iter()
                .map(|c| format!("{q} = EXCLUDED.{q}", q = quote_ident(c)))
                .collect();
            let changed: Vec<String> = non_pk
                .iter()
                .map(|c| {
                    format!(
                        "{table_q}.{q} IS DISTINCT FROM EXCLUDED.{q}",
                        q = quote_ident(c)
                    )
                })
                .collect();
            format!(
                "DO UPDATE SET {} WHERE {}",
                assignments.join(", "),
                changed.join(" OR ")
            )
        }
        _ => "DO NOTHING".to_string(),
    };

    let sql = format!(
        "INSERT INTO {table_q} ({}) VALUES ({}) ON CONFLICT ({pk_q}) {conflict_clause} RETURNING (xmax = 0) AS inserted",
        column_list.join(", "),
        placeholders.join(", ")
    );
    (sql, params)
}

/// Plain INSERT for restore, where target tables start empty.
pub(crate) fn build_plain_insert_sql(
    table: &str,
    row: &Row,
) -> (String, Vec<Box<dyn ToSql + Sync + Send>>) {
    let mut column_list = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::with_capacity(row.len());
    for (idx, (column, value)) in row.iter().enumerate() {
        column_list.push(quote_ident(column));
        placeholders.push(format!("${}{}", idx + 1, value.cast_suffix()));
        params.push(value.to_param());
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        column_list.join(", "),
        placeholders.join(", ")
    );
    (sql, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{NullKind, SqlValue};

    fn user_row() -> Row {
        let mut row = Row::new();
        row.push("id", SqlValue::I32(1));
        row.push("email", SqlValue::Text("a@a.com".into()));
        row
    }

    #[test]
    fn test_insert_if_absent_sql() {
        let (sql, params) = build_row_sql("users", "id", &user_row(), TransferMode::InsertIfAbsent);
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"id\", \"email\") \
             VALUES ($1::integer, $2::text) \
             ON CONFLICT (\"id\") DO NOTHING RETURNING (xmax = 0) AS inserted"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_upsert_sql_updates_only_changed_rows() {
        let (sql, params) = build_row_sql("users", "id", &user_row(), TransferMode::UpsertOverwrite);
        assert!(sql.contains("ON CONFLICT (\"id\") DO UPDATE SET \"email\" = EXCLUDED.\"email\""));
        assert!(sql.contains("WHERE \"users\".\"email\" IS DISTINCT FROM EXCLUDED.\"email\""));
        assert!(sql.ends_with("RETURNING (xmax = 0) AS inserted"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_upsert_never_assigns_primary_key() {
        let (sql, _) = build_row_sql("users", "id", &user_row(), TransferMode::UpsertOverwrite);
        assert!(!sql.contains("\"id\" = EXCLUDED"));
    }

    #[test]
    fn test_pk_only_row_falls_back_to_do_nothing() {
        let mut row = Row::new();
        row.push("id", SqlValue::I32(7));
        let (sql, _) = build_row_sql("progress", "id", &row, TransferMode::UpsertOverwrite);
        assert!(sql.contains("DO NOTHING"));
        assert!(!sql.contains("DO UPDATE"));
    }

    #[test]
    fn test_null_placeholder_keeps_column_cast() {
        let mut row = Row::new();
        row.push("id", SqlValue::I32(3));
        row.push("completed_at", SqlValue::Null(NullKind::Timestamp));
        let (sql, params) = build_row_sql("progress", "id", &row, TransferMode::InsertIfAbsent);
        assert!(sql.contains("$2::timestamp"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_plain_insert_sql() {
        let (sql, params) = build_plain_insert_sql("users", &user_row());
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"id\", \"email\") VALUES ($1::integer, $2::text)"
        );
        assert_eq!(params.len(), 2);
        assert!(!sql.contains("RETURNING"));
    }

    #[test]
    fn test_report_rows_written() {
        let mut report = TableReport::new("notes");
        report.inserted = 3;
        report.updated = 2;
        report.skipped = 10;
        report.failed = 1;
        assert_eq!(report.rows_written(), 5);
        assert!(report.has_failures());
    }

    #[test]
    fn test_mode_parses_both_separators() {
        use std::str::FromStr;
        assert_eq!(
            TransferMode::from_str("insert-if-absent").unwrap(),
            TransferMode::InsertIfAbsent
        );
        assert_eq!(
            TransferMode::from_str("upsert_overwrite").unwrap(),
            TransferMode::UpsertOverwrite
        );
        assert!(TransferMode::from_str("merge").is_err());
    }

    #[test]
    fn test_mode_default_is_upsert() {
        assert_eq!(TransferMode::default(), TransferMode::UpsertOverwrite);
        assert_eq!(TransferMode::UpsertOverwrite.to_string(), "upsert-overwrite");
    }
}
