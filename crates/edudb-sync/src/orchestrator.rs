//! End-to-end sync runs against a source/destination pair.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::materials_cache;
use crate::catalog::{self, MATERIALS_TABLE};
use crate::config::{Config, EndpointConfig};
use crate::db::Db;
use crate::error::{Result, SyncError};
use crate::identity::{build_identity_map, rewrite_user_fk};
use crate::transfer::{TableReport, TransferEngine, TransferMode};

/// Connected source and destination, ready to run operations.
pub struct Orchestrator {
    config: Config,
    source: Db,
    dest: Db,
}

impl Orchestrator {
    /// Connect both endpoints concurrently.
    pub async fn connect(config: Config) -> Result<Orchestrator> {
        let max_connections = config.sync.max_connections;
        let (source, dest) = tokio::try_join!(
            Db::connect(&config.source, max_connections),
            Db::connect(&config.destination, max_connections),
        )?;
        Ok(Orchestrator {
            config,
            source,
            dest,
        })
    }

    /// Run a full sync: reconcile users, then move every data table with
    /// its `user_id` column rewritten through the identity map.
    ///
    /// Row-level failures are counted and the run keeps going; a table
    /// that cannot be read is skipped whole and recorded. Both downgrade
    /// the run to `partial` instead of failing it.
    pub async fn sync(&self, mode: TransferMode) -> Result<RunReport> {
        if self.config.is_self_sync() {
            return Err(SyncError::SelfSync);
        }
        self.source.ping().await?;
        self.dest.ping().await?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            "Sync {} started: {} -> {} ({})",
            run_id,
            self.source.location(),
            self.dest.location(),
            mode
        );

        let users = catalog::users_table();
        let source_users = self.source.fetch_rows(users).await?;
        let dest_users = self.dest.fetch_rows(users).await?;
        let outcome = build_identity_map(&self.dest, &source_users, &dest_users).await?;

        let mut tables = vec![outcome.report];
        let mut skipped_tables: Vec<SkippedTable> = Vec::new();
        let engine = TransferEngine::new(&self.dest);

        for table in catalog::data_tables() {
            let mut rows = match self.source.fetch_rows(table).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Skipping {}: {}", table.name, e);
                    skipped_tables.push(SkippedTable {
                        table: table.name.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if let Some(fk_column) = table.user_fk {
                rewrite_user_fk(&mut rows, fk_column, &outcome.map);
            }
            let report = engine.transfer_table(table, &rows, mode).await?;
            // Invalidate the moment materials lands; an abort on a later
            // table must not leave readers on the stale entry.
            if wrote_materials(&report) {
                materials_cache().invalidate();
            }
            tables.push(report);
        }

        for report in &tables {
            if report.inserted > 0 {
                if let Some(table) = catalog::find(&report.table) {
                    self.dest.reset_sequence(table.name, table.primary_key).await;
                }
            }
        }

        let status = if skipped_tables.is_empty() && tables.iter().all(|t| !t.has_failures()) {
            RunStatus::Completed
        } else {
            RunStatus::Partial
        };
        let completed_at = Utc::now();
        let report = RunReport {
            run_id,
            status,
            started_at,
            completed_at,
            duration_seconds: start.elapsed().as_secs_f64(),
            rows_written: tables.iter().map(TableReport::rows_written).sum(),
            tables,
            skipped_tables,
            unresolved_user_ids: outcome.unresolved,
        };
        info!(
            "Sync {} {}: {} rows written in {:.1}s",
            report.run_id, report.status, report.rows_written, report.duration_seconds
        );
        Ok(report)
    }

    /// Compare per-table row counts between the endpoints.
    pub async fn validate(&self) -> Result<Vec<CountCheck>> {
        let mut checks = Vec::with_capacity(catalog::tables().len());
        for table in catalog::tables() {
            let source_rows = self.source.count_rows(table.name).await?;
            // A relation missing on the destination counts as zero rows;
            // any other failure aborts instead of reporting a guess.
            let destination_rows = match self.dest.count_rows(table.name).await {
                Ok(count) => count,
                Err(e) if e.is_undefined_table() => 0,
                Err(e) => return Err(e),
            };
            let matches = source_rows == destination_rows;
            if matches {
                debug!("{}: {} rows on both sides", table.name, source_rows);
            } else {
                warn!(
                    "{}: source has {} rows, destination has {}",
                    table.name, source_rows, destination_rows
                );
            }
            checks.push(CountCheck {
                table: table.name.to_string(),
                source_rows,
                destination_rows,
                matches,
            });
        }
        Ok(checks)
    }
}

/// True when this report records a write to the materials table.
fn wrote_materials(report: &TableReport) -> bool {
    report.table == MATERIALS_TABLE && report.rows_written() > 0
}

/// Overall outcome of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Partial,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Partial => write!(f, "partial"),
        }
    }
}

/// A table left out of a run because its source rows could not be read.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedTable {
    pub table: String,
    pub reason: String,
}

/// Everything a sync run did.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub rows_written: u64,
    pub tables: Vec<TableReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_tables: Vec<SkippedTable>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unresolved_user_ids: Vec<String>,
}

impl RunReport {
    pub fn is_partial(&self) -> bool {
        self.status == RunStatus::Partial
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One table's row-count comparison from `validate`.
#[derive(Debug, Clone, Serialize)]
pub struct CountCheck {
    pub table: String,
    pub source_rows: i64,
    pub destination_rows: i64,
    pub matches: bool,
}

/// Health of one endpoint, from a fresh connection attempt.
#[derive(Debug, Serialize)]
pub struct EndpointHealth {
    pub endpoint: String,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Connectivity of both endpoints.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub source: EndpointHealth,
    pub destination: EndpointHealth,
    pub healthy: bool,
}

/// Probe both endpoints without failing; the report carries any errors.
pub async fn health_check(config: &Config) -> HealthReport {
    let source = probe_endpoint(&config.source).await;
    let destination = probe_endpoint(&config.destination).await;
    let healthy = source.connected && destination.connected;
    HealthReport {
        source,
        destination,
        healthy,
    }
}

async fn probe_endpoint(endpoint: &EndpointConfig) -> EndpointHealth {
    let location = endpoint.location();
    let start = Instant::now();
    match Db::connect(endpoint, 1).await {
        Ok(_) => EndpointHealth {
            endpoint: location,
            connected: true,
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => {
            warn!("Health check failed for {}: {}", location, e);
            EndpointHealth {
                endpoint: location,
                connected: false,
                latency_ms: None,
                error: Some(e.to_string()),
            }
        }
    }
}
