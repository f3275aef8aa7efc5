//! ClusterVault
//!
//! Backup, verification, and restore tooling for clustered PostgreSQL
//! deployments: durable point-in-time artifacts, compression/encryption,
//! off-host transfer, tiered retention, restorability checks, and full /
//! point-in-time / partial recovery.

// clustervault/src/main.rs
mod backup;
mod catalog;
mod config;
mod engine;
mod errors;
mod pipeline;
mod restore;
mod retention;
mod topology;
mod utils;
mod verify;

use anyhow::{Context, Result};
use backup::BackupRequest;
use catalog::{Catalog, RetentionTier};
use chrono::{DateTime, NaiveDateTime, Utc};
use config::AppConfig;
use engine::postgres::PostgresEngine;
use engine::DatabaseEngine;
use restore::orchestrator::{Orchestrator, RestoreOptions};
use restore::partial::{ObjectKind, ObjectSelector};
use restore::{RestoreJob, RestoreMode};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use topology::{ClusterTopology, StaticTopology};

/// Main entry point for the backup/restore tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    // Expects config.json next to the executable or in the project root
    // when running with `cargo run`; every key has a default.
    let config_path = PathBuf::from("config.json");
    let app_config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    let mut args: Vec<String> = env::args().collect();
    let assume_yes = args.iter().any(|a| a == "--yes");
    args.retain(|a| a != "--yes");

    let engine: Arc<dyn DatabaseEngine> =
        Arc::new(PostgresEngine::new(app_config.recovery_staging_dir.clone()));
    let topology: Arc<dyn ClusterTopology> =
        Arc::new(StaticTopology::new(app_config.topology.clone()));

    let command = args.get(1).cloned().unwrap_or_default();
    match command.as_str() {
        "backup" => {
            let request = match args.get(2).map(String::as_str) {
                Some("full") => {
                    let tier = match args.get(3) {
                        Some(tier) => RetentionTier::from_file_label(tier)?,
                        None => RetentionTier::Daily,
                    };
                    BackupRequest::Full(tier)
                }
                Some("incremental") => {
                    let segment = args
                        .get(3)
                        .context("Usage: clustervault backup incremental <segment>")?;
                    BackupRequest::Incremental(segment.clone())
                }
                Some("config") => BackupRequest::Config,
                Some("index-metadata") => BackupRequest::IndexMetadata,
                _ => {
                    print_usage();
                    anyhow::bail!("Unknown backup subcommand");
                }
            };
            println!("🚀 Starting Backup Process...");
            backup::run_backup_flow(&app_config, engine, topology, request)
                .await
                .context("Backup process failed")?;
        }
        "retention" => {
            match args.get(2).map(String::as_str) {
                Some("sweep") => {
                    println!("🧹 Starting Retention Sweep...");
                    let catalog = Catalog::open(&app_config.storage_root)?;
                    retention::sweep(&catalog, &app_config.retention)
                        .context("Retention sweep failed")?;
                }
                _ => {
                    print_usage();
                    anyhow::bail!("Unknown retention subcommand");
                }
            };
        }
        "verify" => {
            let artifact_ref = args
                .get(3)
                .context("Usage: clustervault verify <structural|functional> <artifactRef>")?;
            let catalog = Catalog::open(&app_config.storage_root)?;
            let artifact = catalog.resolve_ref(artifact_ref)?;
            match args.get(2).map(String::as_str) {
                Some("structural") => {
                    verify::verify_structural(&artifact, app_config.pipeline_key())?;
                    println!("✓ Structural verification passed for {}", artifact.id);
                }
                Some("functional") => {
                    let report =
                        verify::verify_functional(&app_config, engine, &catalog, &artifact).await?;
                    println!(
                        "Report: structural={} functional={:?} tables={:?} indexes={:?}",
                        report.structural_pass,
                        report.functional_pass,
                        report.table_count,
                        report.index_count
                    );
                    if report.functional_pass != Some(true) {
                        anyhow::bail!("Functional verification failed for artifact {}", artifact.id);
                    }
                }
                _ => {
                    print_usage();
                    anyhow::bail!("Unknown verify subcommand");
                }
            }
        }
        "restore" => {
            println!("🔄 Starting Restore Process...");
            run_restore(&app_config, engine, args, assume_yes).await?;
        }
        "status" => {
            run_status(&app_config)?;
        }
        _ => {
            print_usage();
            anyhow::bail!("Unknown command");
        }
    }

    Ok(())
}

async fn run_restore(
    app_config: &AppConfig,
    engine: Arc<dyn DatabaseEngine>,
    args: Vec<String>,
    assume_yes: bool,
) -> Result<()> {
    let catalog = Catalog::open(&app_config.storage_root)?;
    let options = RestoreOptions {
        assume_yes,
        interactive: true,
    };
    let orchestrator = Orchestrator::new(app_config, Arc::clone(&engine), &catalog, options);

    match args.get(2).map(String::as_str) {
        Some("full") => {
            let artifact_ref = args
                .get(3)
                .context("Usage: clustervault restore full <artifactRef> [target] [--yes]")?;
            let artifact = catalog.resolve_ref(artifact_ref)?;
            let target = resolve_target(app_config, args.get(4))?;
            println!("Restore target: {}, Artifact: {}", target_label(&target), artifact.id);
            let mut job = RestoreJob::new(artifact.id, RestoreMode::Full, target, None, None)?;
            orchestrator.run(&mut job, &artifact).await?;
        }
        Some("pitr") => {
            let artifact_ref = args.get(3).context(
                "Usage: clustervault restore pitr <artifactRef> <targetTime> [target]",
            )?;
            let time_str = args.get(4).context(
                "Usage: clustervault restore pitr <artifactRef> <targetTime> [target]",
            )?;
            let artifact = catalog.resolve_ref(artifact_ref)?;
            let target_time = parse_target_time(time_str)?;
            let target = resolve_target(app_config, args.get(5))?;
            println!(
                "Restore target: {}, Artifact: {}, Recovery point: {}",
                target_label(&target),
                artifact.id,
                target_time.to_rfc3339()
            );
            let mut job =
                RestoreJob::new(artifact.id, RestoreMode::Pitr, target, Some(target_time), None)?;
            orchestrator.run(&mut job, &artifact).await?;
        }
        Some("partial") => {
            let artifact_ref = args.get(3).context(
                "Usage: clustervault restore partial <artifactRef> <table|schema> <name> [target]",
            )?;
            let kind = args.get(4).context(
                "Usage: clustervault restore partial <artifactRef> <table|schema> <name> [target]",
            )?;
            let name = args.get(5).context(
                "Usage: clustervault restore partial <artifactRef> <table|schema> <name> [target]",
            )?;
            let artifact = catalog.resolve_ref(artifact_ref)?;
            let selector = ObjectSelector {
                kind: ObjectKind::from_selector(kind)?,
                name: name.clone(),
            };
            let target = resolve_target(app_config, args.get(6))?;
            println!(
                "Restore target: {}, Artifact: {}, Object: {} {}",
                target_label(&target),
                artifact.id,
                kind,
                name
            );
            let mut job =
                RestoreJob::new(artifact.id, RestoreMode::Partial, target, None, Some(selector))?;
            orchestrator.run(&mut job, &artifact).await?;
        }
        Some("rebuild-indexes") => {
            let target = resolve_target(app_config, args.get(3))?;
            orchestrator.rebuild_indexes_into(&target).await?;
        }
        _ => {
            print_usage();
            anyhow::bail!("Unknown restore subcommand");
        }
    }
    Ok(())
}

fn run_status(app_config: &AppConfig) -> Result<()> {
    let catalog = Catalog::open(&app_config.storage_root)?;
    let artifacts = catalog.list()?;

    if artifacts.is_empty() {
        println!("No artifacts in {}", app_config.storage_root.display());
        return Ok(());
    }

    println!("Artifacts in {}:", app_config.storage_root.display());
    let mut total: u64 = 0;
    for artifact in &artifacts {
        total += artifact.size_bytes;
        println!(
            "  {}  {:<8} {:<8} {:>10}  {}  {}{}",
            artifact.created_at.format("%Y-%m-%d %H:%M:%S"),
            artifact.kind.file_label(),
            artifact.retention_tier.file_label(),
            catalog::human_size(artifact.size_bytes),
            artifact.source_node,
            artifact
                .local_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            if artifact.remote_key.is_some() {
                "  [uploaded]"
            } else {
                ""
            }
        );
    }
    println!(
        "{} artifact(s), {} total",
        artifacts.len(),
        catalog::human_size(total)
    );
    Ok(())
}

/// Accepts either a full connection URL or a bare database name resolved
/// against the configured restore target server.
fn resolve_target(app_config: &AppConfig, arg: Option<&String>) -> Result<String> {
    let base = app_config
        .target_database_url
        .as_deref()
        .context("No restore target: set target_database_url (or TARGET_DATABASE_URL)")?;

    match arg {
        None => Ok(base.to_string()),
        Some(target) if target.contains("://") => Ok(target.clone()),
        Some(db_name) => Ok(engine::url_with_database(base, db_name)?),
    }
}

fn target_label(target_url: &str) -> String {
    engine::db_name_from_url(target_url).unwrap_or_else(|_| target_url.to_string())
}

/// Accepts RFC 3339 (`2026-08-07T12:00:00Z`) or `YYYY-mm-dd HH:MM:SS`
/// (interpreted as UTC).
fn parse_target_time(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("Unparseable recovery target time '{}'", s))?;
    Ok(naive.and_utc())
}

fn print_usage() {
    println!("Usage: clustervault <command>");
    println!("  backup full [daily|weekly|monthly|adhoc]");
    println!("  backup incremental <segment>");
    println!("  backup config");
    println!("  backup index-metadata");
    println!("  retention sweep");
    println!("  verify structural <artifactRef>");
    println!("  verify functional <artifactRef>");
    println!("  restore full <artifactRef> [target] [--yes]");
    println!("  restore pitr <artifactRef> <targetTime> [target]");
    println!("  restore partial <artifactRef> <table|schema> <name> [target]");
    println!("  restore rebuild-indexes [target]");
    println!("  status");
    println!();
    println!("<artifactRef> is an artifact id, a filename, or 'latest'.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_time_formats() -> Result<()> {
        let rfc = parse_target_time("2026-08-07T12:00:00Z")?;
        let plain = parse_target_time("2026-08-07 12:00:00")?;
        assert_eq!(rfc, plain);
        assert!(parse_target_time("yesterday").is_err());
        Ok(())
    }
}
