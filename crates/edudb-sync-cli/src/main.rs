use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::fmt::format::FmtSpan;

use edudb_sync::{
    export_snapshot, health_check, restore_snapshot, Config, Db, Orchestrator, RunReport,
    Snapshot, SyncError, TransferMode,
};

#[derive(Parser)]
#[command(
    name = "edudb-sync",
    version,
    about = "PostgreSQL sync and backup for the edudb platform"
)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Print reports as JSON on stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, global = true, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the source database into the destination
    Sync {
        /// Conflict handling: insert-if-absent or upsert-overwrite.
        /// Overrides sync.mode from the config file
        #[arg(long)]
        mode: Option<String>,
    },
    /// Export the source database as a JSON snapshot
    Export {
        /// Write the snapshot here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Restore a JSON snapshot into the destination database
    Import {
        /// Snapshot file to restore
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Compare per-table row counts between the endpoints
    Validate,
    /// Probe both endpoints and report connectivity
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = setup_logging(&cli.verbosity, &cli.log_format) {
        eprintln!("Failed to set up logging: {e}");
        return ExitCode::from(1);
    }
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, SyncError> {
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Sync { mode } => {
            let mode: TransferMode = match mode {
                Some(raw) => raw.parse().map_err(SyncError::Config)?,
                None => config.sync.mode,
            };
            if config.is_self_sync() {
                return Err(SyncError::SelfSync);
            }
            let orchestrator = Orchestrator::connect(config).await?;
            let report = orchestrator.sync(mode).await?;
            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_run_summary(&report);
            }
            if report.is_partial() {
                return Ok(ExitCode::from(5));
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Export { output } => {
            let db = Db::connect(&config.source, config.sync.max_connections).await?;
            let snapshot = export_snapshot(&db).await?;
            match output {
                Some(path) => {
                    snapshot.save(&path)?;
                    println!(
                        "Wrote {} rows across {} tables to {}",
                        snapshot.row_count(),
                        snapshot.tables.len(),
                        path.display()
                    );
                }
                None => println!("{}", snapshot.to_pretty_json()?),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Import { input } => {
            // Read the snapshot before touching the database; a bad path
            // should not cost a connection.
            let snapshot = Snapshot::load(&input)?;
            let db = Db::connect(&config.destination, config.sync.max_connections).await?;
            let report = restore_snapshot(&db, &snapshot).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Restored {} rows ({} deleted first)",
                    report.rows_inserted(),
                    report.rows_deleted()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate => {
            let orchestrator = Orchestrator::connect(config).await?;
            let checks = orchestrator.validate().await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                for check in &checks {
                    let marker = if check.matches { "ok  " } else { "DIFF" };
                    println!(
                        "{marker} {:<24} source={:<8} destination={}",
                        check.table, check.source_rows, check.destination_rows
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::HealthCheck => {
            let report = health_check(&config).await;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for endpoint in [&report.source, &report.destination] {
                    match endpoint.latency_ms {
                        Some(ms) => println!("ok   {} ({}ms)", endpoint.endpoint, ms),
                        None => println!(
                            "FAIL {}: {}",
                            endpoint.endpoint,
                            endpoint.error.as_deref().unwrap_or("not connected")
                        ),
                    }
                }
            }
            if report.healthy {
                Ok(ExitCode::SUCCESS)
            } else {
                let failing = if report.source.connected {
                    &report.destination
                } else {
                    &report.source
                };
                Err(SyncError::connectivity(
                    failing.endpoint.clone(),
                    failing.error.clone().unwrap_or_else(|| "not connected".to_string()),
                ))
            }
        }
    }
}

fn print_run_summary(report: &RunReport) {
    println!(
        "Sync {} {} in {:.1}s",
        report.run_id, report.status, report.duration_seconds
    );
    for table in &report.tables {
        println!(
            "  {:<24} inserted={:<6} updated={:<6} skipped={:<6} failed={}",
            table.table, table.inserted, table.updated, table.skipped, table.failed
        );
    }
    for skipped in &report.skipped_tables {
        println!("  {:<24} SKIPPED: {}", skipped.table, skipped.reason);
    }
    if !report.unresolved_user_ids.is_empty() {
        println!(
            "  unresolved user ids: {}",
            report.unresolved_user_ids.join(", ")
        );
    }
    println!("  total rows written: {}", report.rows_written);
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        other => {
            return Err(format!(
                "unknown verbosity '{other}' (expected trace, debug, info, warn or error)"
            ))
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);

    match format {
        "json" => builder.json().init(),
        "text" => builder.init(),
        other => {
            return Err(format!(
                "unknown log format '{other}' (expected text or json)"
            ))
        }
    }
    Ok(())
}
