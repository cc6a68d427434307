//! JSON snapshots: whole-database export and transactional restore.
//!
//! A snapshot is one JSON object keyed by table name, each value an array
//! of row objects. Restore replaces the destination's contents atomically:
//! child tables are cleared before their parents, rows go back in parent
//! order, and the whole thing rides a single transaction so a failure
//! leaves the destination exactly as it was.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio_postgres::types::ToSql;
use tracing::{debug, info, warn};

use crate::cache::materials_cache;
use crate::catalog;
use crate::db::{quote_ident, sequence_reset_sql, Db};
use crate::error::{Result, SyncError};
use crate::row::{resolve_column, Row};
use crate::transfer::build_plain_insert_sql;
use crate::value::from_json;

/// All exported tables and their rows, JSON-encoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub tables: BTreeMap<String, Vec<Json>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Snapshot::default()
    }

    pub fn insert(&mut self, table: impl Into<String>, rows: Vec<Json>) {
        self.tables.insert(table.into(), rows);
    }

    pub fn table(&self, name: &str) -> Option<&Vec<Json>> {
        self.tables.get(name)
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Snapshot> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Snapshot> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Snapshot::from_json_str(&raw)
    }

    /// Write to `path` via a temp file and rename, so a crash mid-write
    /// never leaves a truncated snapshot behind.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_pretty_json()?;
        let tmp = std::path::PathBuf::from(format!("{}.tmp", path.display()));
        std::fs::write(&tmp, json.as_bytes())?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Export every non-empty catalog table from `db`.
pub async fn export_snapshot(db: &Db) -> Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    for table in catalog::tables() {
        let rows = db.fetch_rows(table).await?;
        if rows.is_empty() {
            continue;
        }
        let json_rows: Vec<Json> = rows.iter().map(row_to_json).collect();
        debug!("Exported {} rows from {}", json_rows.len(), table.name);
        snapshot.insert(table.name, json_rows);
    }
    info!(
        "Snapshot holds {} rows across {} tables",
        snapshot.row_count(),
        snapshot.tables.len()
    );
    Ok(snapshot)
}

pub(crate) fn row_to_json(row: &Row) -> Json {
    let mut map = serde_json::Map::new();
    for (column, value) in row.iter() {
        map.insert(column.to_string(), value.to_json());
    }
    Json::Object(map)
}

/// Row counts per table from a restore.
#[derive(Debug, Default, Serialize)]
pub struct RestoreReport {
    pub deleted: BTreeMap<String, u64>,
    pub inserted: BTreeMap<String, u64>,
}

impl RestoreReport {
    pub fn rows_deleted(&self) -> u64 {
        self.deleted.values().sum()
    }

    pub fn rows_inserted(&self) -> u64 {
        self.inserted.values().sum()
    }
}

/// Replace the destination's contents with the snapshot, atomically.
///
/// Snapshot keys are matched against destination columns (exact name first,
/// then snake_case). Unknown columns are dropped with a warning; a value
/// the destination column cannot accept aborts the whole restore, and the
/// transaction rolls back.
pub async fn restore_snapshot(db: &Db, snapshot: &Snapshot) -> Result<RestoreReport> {
    if snapshot.is_empty() {
        return Err(SyncError::Snapshot(
            "snapshot contains no rows - refusing to clear the database".to_string(),
        ));
    }
    for name in snapshot.tables.keys() {
        if catalog::find(name).is_none() {
            warn!("Snapshot table {} is not part of the catalog; ignoring", name);
        }
    }

    // Destination metadata up front: a snapshot table the destination does
    // not have is fatal before anything gets deleted.
    let mut dest_columns: HashMap<&'static str, HashMap<String, String>> = HashMap::new();
    let mut serial_tables: Vec<&'static catalog::TableDescriptor> = Vec::new();
    for table in catalog::tables() {
        let columns = db.load_columns(table.name).await?;
        if columns.is_empty() {
            if snapshot.table(table.name).is_some() {
                return Err(SyncError::restore(
                    table.name,
                    "table does not exist in the destination",
                ));
            }
            debug!("{} not present in the destination; skipping", table.name);
            continue;
        }
        let pk_is_serial = columns
            .iter()
            .any(|c| c.name == table.primary_key
                && matches!(c.udt_name.as_str(), "int2" | "int4" | "int8"));
        if pk_is_serial {
            serial_tables.push(table);
        }
        dest_columns.insert(
            table.name,
            columns.into_iter().map(|c| (c.name, c.udt_name)).collect(),
        );
    }

    let mut client = db.client("restoring snapshot").await?;
    let tx = client.transaction().await?;
    let mut report = RestoreReport::default();

    for table in catalog::tables().iter().rev() {
        if !dest_columns.contains_key(table.name) {
            continue;
        }
        let deleted = tx
            .execute(&format!("DELETE FROM {}", quote_ident(table.name)), &[])
            .await?;
        if deleted > 0 {
            debug!("Cleared {} rows from {}", deleted, table.name);
        }
        report.deleted.insert(table.name.to_string(), deleted);
    }

    for table in catalog::tables() {
        let Some(rows) = snapshot.table(table.name) else {
            continue;
        };
        let Some(columns) = dest_columns.get(table.name) else {
            continue;
        };

        let mut inserted = 0u64;
        let mut dropped: BTreeSet<String> = BTreeSet::new();
        for (row_idx, json_row) in rows.iter().enumerate() {
            let Some(object) = json_row.as_object() else {
                return Err(SyncError::restore(
                    table.name,
                    format!("row {row_idx} is not a JSON object"),
                ));
            };
            let mut row = Row::new();
            for (key, value) in object {
                let Some((dest_name, udt)) = resolve_column(key, columns) else {
                    dropped.insert(key.clone());
                    continue;
                };
                let decoded = from_json(value, udt).map_err(|msg| {
                    SyncError::restore(table.name, format!("column \"{dest_name}\": {msg}"))
                })?;
                row.set(dest_name, decoded);
            }
            if row.is_empty() {
                return Err(SyncError::restore(
                    table.name,
                    format!("row {row_idx} has no recognizable columns"),
                ));
            }
            let (sql, params) = build_plain_insert_sql(table.name, &row);
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();
            inserted += tx
                .execute(&sql, &refs[..])
                .await
                .map_err(|e| SyncError::restore(table.name, e.to_string()))?;
        }
        if !dropped.is_empty() {
            let names: Vec<String> = dropped.into_iter().collect();
            warn!("{}: dropped unknown columns: {}", table.name, names.join(", "));
        }
        debug!("Restored {} rows into {}", inserted, table.name);
        report.inserted.insert(table.name.to_string(), inserted);
    }

    // Serial sequences must end up past the restored ids, or the next
    // insert collides. Still inside the transaction.
    for table in &serial_tables {
        tx.query(&sequence_reset_sql(table.name, table.primary_key), &[])
            .await?;
    }

    tx.commit().await?;
    materials_cache().invalidate();
    info!(
        "Restore complete: {} rows deleted, {} rows inserted",
        report.rows_deleted(),
        report.rows_inserted()
    );
    Ok(report)
}
