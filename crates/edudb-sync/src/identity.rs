//! Cross-environment user identity mapping.
//!
//! User ids are environment-local; the email address is the natural key
//! that survives environments. Before any user-owned table moves, every
//! source user is either matched to a destination user by email or carried
//! over as-is, and the resulting id map rewrites `user_id` columns so
//! ownership lands on the right destination rows.

use std::collections::HashMap;

use tokio_postgres::types::ToSql;
use tracing::{info, warn};

use crate::catalog::{self, USERS_TABLE, USER_EMAIL_COLUMN};
use crate::db::Db;
use crate::error::Result;
use crate::row::Row;
use crate::transfer::{build_row_sql, TableReport, TransferMode};
use crate::value::SqlValue;

/// Source user id to destination user id.
#[derive(Debug, Default)]
pub struct IdentityMap {
    map: HashMap<String, SqlValue>,
}

impl IdentityMap {
    pub fn new() -> Self {
        IdentityMap::default()
    }

    pub fn insert(&mut self, source_id: &SqlValue, dest_id: SqlValue) {
        self.map.insert(id_key(source_id), dest_id);
    }

    /// Destination id for a source id, if the user resolved.
    pub fn resolve(&self, source_id: &SqlValue) -> Option<&SqlValue> {
        self.map.get(&id_key(source_id))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Normalized lookup key for an id value, so an `int4` primary key still
/// matches an `int8` foreign key carrying the same number.
fn id_key(value: &SqlValue) -> String {
    match value {
        SqlValue::I16(n) => n.to_string(),
        SqlValue::I32(n) => n.to_string(),
        SqlValue::I64(n) => n.to_string(),
        SqlValue::Uuid(u) => u.to_string(),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Decimal(d) => d.to_string(),
        other => format!("{other:?}"),
    }
}

/// Index rows by their email column. Rows with a NULL or empty email never
/// participate in matching; duplicate emails keep the first row seen.
pub fn index_by_email(rows: &[Row]) -> HashMap<String, SqlValue> {
    let mut index = HashMap::new();
    for row in rows {
        let email = match row.get(USER_EMAIL_COLUMN) {
            Some(SqlValue::Text(s)) if !s.is_empty() => s.clone(),
            _ => continue,
        };
        let id = match row.get("id") {
            Some(v) if !v.is_null() => v.clone(),
            _ => continue,
        };
        if index.contains_key(&email) {
            warn!("Duplicate email {} in user rows; keeping the first", email);
            continue;
        }
        index.insert(email, id);
    }
    index
}

/// Result of reconciling source users against the destination.
pub struct IdentityOutcome {
    pub map: IdentityMap,
    pub report: TableReport,
    /// Source ids whose user could not be placed in the destination.
    pub unresolved: Vec<String>,
}

/// Reconcile source users with the destination and build the id map.
///
/// Each source user either matches a destination user by email (counted as
/// skipped, mapped to the destination id) or is inserted with its source id
/// kept. Insert conflicts on the id mean the row already exists and count
/// as skipped too.
pub async fn build_identity_map(
    dest: &Db,
    source_users: &[Row],
    dest_users: &[Row],
) -> Result<IdentityOutcome> {
    let mut map = IdentityMap::new();
    let mut report = TableReport::new(USERS_TABLE);
    let mut unresolved = Vec::new();

    if source_users.is_empty() {
        return Ok(IdentityOutcome {
            map,
            report,
            unresolved,
        });
    }

    let dest_by_email = index_by_email(dest_users);
    let primary_key = catalog::find(USERS_TABLE)
        .map(|t| t.primary_key)
        .unwrap_or("id");
    let client = dest.client("reconciling users").await?;

    for user in source_users {
        let source_id = match user.get(primary_key) {
            Some(v) if !v.is_null() => v.clone(),
            _ => {
                warn!("User row without an id ({}); cannot map", user_label(user));
                report.failed += 1;
                unresolved.push(user_label(user));
                continue;
            }
        };

        let email = match user.get(USER_EMAIL_COLUMN) {
            Some(SqlValue::Text(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        };
        if let Some(dest_id) = email.and_then(|e| dest_by_email.get(e)) {
            map.insert(&source_id, dest_id.clone());
            report.skipped += 1;
            continue;
        }

        let (sql, params) = build_row_sql(
            USERS_TABLE,
            primary_key,
            user,
            TransferMode::InsertIfAbsent,
        );
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        match client.query(&sql, &refs[..]).await {
            Ok(returned) => {
                if returned.is_empty() {
                    report.skipped += 1;
                } else {
                    report.inserted += 1;
                }
                map.insert(&source_id, source_id.clone());
            }
            Err(e) => {
                warn!("users: row with id = {:?} failed: {}", source_id, e);
                report.failed += 1;
                unresolved.push(id_key(&source_id));
            }
        }
    }

    info!(
        "users: {} matched or present, {} inserted, {} failed",
        report.skipped, report.inserted, report.failed
    );
    Ok(IdentityOutcome {
        map,
        report,
        unresolved,
    })
}

/// Rewrite a table's user foreign key through the id map. Ids the map does
/// not know, and NULLs, pass through unchanged.
pub fn rewrite_user_fk(rows: &mut [Row], fk_column: &str, map: &IdentityMap) {
    for row in rows.iter_mut() {
        let mapped = match row.get(fk_column) {
            Some(v) if !v.is_null() => map.resolve(v).cloned(),
            _ => None,
        };
        if let Some(dest_id) = mapped {
            row.set(fk_column, dest_id);
        }
    }
}

fn user_label(user: &Row) -> String {
    match user.get(USER_EMAIL_COLUMN) {
        Some(SqlValue::Text(s)) if !s.is_empty() => s.clone(),
        _ => "(unknown)".to_string(),
    }
}
