//! Cross-environment PostgreSQL sync and backup for the edudb platform.
//!
//! Moves the platform's tables between environments with user identities
//! reconciled by email, takes whole-database JSON snapshots, and restores
//! them atomically. The table list and its dependency order live in
//! [`catalog`]; everything else follows from it.
//!
//! ```rust,no_run
//! use edudb_sync::{Config, Orchestrator, TransferMode};
//!
//! # async fn run() -> edudb_sync::Result<()> {
//! let config = Config::load("config.yaml")?;
//! let orchestrator = Orchestrator::connect(config).await?;
//! let report = orchestrator.sync(TransferMode::UpsertOverwrite).await?;
//! println!("{} rows written", report.rows_written);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod row;
pub mod snapshot;
pub mod transfer;
pub mod value;

pub use cache::{materials_cache, RowCache};
pub use config::{CacheConfig, Config, EndpointConfig, SyncConfig};
pub use db::Db;
pub use error::{Result, SyncError};
pub use identity::IdentityMap;
pub use orchestrator::{health_check, CountCheck, HealthReport, Orchestrator, RunReport, RunStatus};
pub use row::Row;
pub use snapshot::{export_snapshot, restore_snapshot, RestoreReport, Snapshot};
pub use transfer::{TableReport, TransferEngine, TransferMode};
pub use value::SqlValue;
