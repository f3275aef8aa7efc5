// clustervault/src/restore/orchestrator.rs
//
// Drives a RestoreJob through preparing -> restoring -> rebuilding-indexes
// -> validating. Terminal failure leaves the target in whatever partial
// state the failing step produced and reports the failing state name; there
// is no automatic rollback of a partially-restored target.

use super::partial::{self, ObjectSelector};
use super::{RestoreJob, RestoreMode, RestoreStatus};
use crate::catalog::{self, ArtifactKind, BackupArtifact, Catalog};
use crate::config::AppConfig;
use crate::engine::{self, DatabaseEngine};
use crate::errors::{AppError, Result};
use crate::pipeline;
use crate::utils::poll::{bounded_poll, PollOutcome};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RestoreOptions {
    /// Explicit bypass of the destructive-restore confirmation gate.
    pub assume_yes: bool,
    /// Whether an operator is present to answer the confirmation prompt.
    pub interactive: bool,
}

pub struct Orchestrator<'a> {
    config: &'a AppConfig,
    engine: Arc<dyn DatabaseEngine>,
    catalog: &'a Catalog,
    options: RestoreOptions,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a AppConfig,
        engine: Arc<dyn DatabaseEngine>,
        catalog: &'a Catalog,
        options: RestoreOptions,
    ) -> Self {
        Self {
            config,
            engine,
            catalog,
            options,
        }
    }

    pub async fn run(&self, job: &mut RestoreJob, artifact: &BackupArtifact) -> Result<()> {
        match self.drive(job, artifact).await {
            Ok(()) => {
                println!("🎉 Restore job {} ({}) completed", job.id, job.mode.as_str());
                Ok(())
            }
            Err(e) => {
                let state = job.status();
                job.fail();
                eprintln!(
                    "❌ Restore job {} failed during '{}': {}",
                    job.id,
                    state.as_str(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn drive(&self, job: &mut RestoreJob, artifact: &BackupArtifact) -> Result<()> {
        // --- preparing -------------------------------------------------
        let raw = self.prepare(job, artifact)?;

        // --- restoring -------------------------------------------------
        job.advance(RestoreStatus::Restoring)?;
        match job.mode {
            RestoreMode::Full => self.restore_full(job, &raw).await?,
            RestoreMode::Pitr => self.restore_pitr(job, artifact, &raw).await?,
            RestoreMode::Partial => self.restore_partial(job, &raw).await?,
        }

        // --- rebuilding-indexes ----------------------------------------
        job.advance(RestoreStatus::RebuildingIndexes)?;
        if self.config.rebuild_indexes && job.mode != RestoreMode::Partial {
            self.rebuild_indexes_into(&job.target_database).await?;
        } else {
            println!("↷ Index rebuild skipped");
        }

        // --- validating ------------------------------------------------
        job.advance(RestoreStatus::Validating)?;
        self.validate_target(&job.target_database)
            .await
            .map_err(|e| AppError::RestoreState {
                state: RestoreStatus::Validating.as_str().to_string(),
                reason: e.to_string(),
            })?;

        job.advance(RestoreStatus::Done)?;
        Ok(())
    }

    /// Stages the artifact in a scratch area and reverses the pipeline.
    /// Missing inputs (a chain-label mismatch, an absent decryption key)
    /// fail here, before the target is touched.
    fn prepare(&self, job: &RestoreJob, artifact: &BackupArtifact) -> Result<Vec<u8>> {
        catalog::verify_chain_consistency(artifact)?;

        if artifact
            .transform_chain
            .contains(&pipeline::TransformStage::Encrypt)
            && self.config.pipeline_key().is_none()
        {
            return Err(AppError::MissingKey);
        }

        if let Some(time) = job.recovery_target_time {
            // A recovery target earlier than the base backup can never be
            // reached; reject before the engine is asked to try.
            if time < artifact.created_at {
                return Err(AppError::InvalidInput(format!(
                    "Recovery target time {} is earlier than the base backup ({}); pick a later target or an older artifact",
                    time.to_rfc3339(),
                    artifact.created_at.to_rfc3339()
                )));
            }
        }

        let scratch = tempfile::tempdir()?;
        let file_name = artifact
            .local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let staged = scratch.path().join(&file_name);
        std::fs::copy(&artifact.local_path, &staged)?;

        let bytes = std::fs::read(&staged)?;
        let raw = pipeline::reverse(&bytes, &artifact.transform_chain, self.config.pipeline_key())?;

        if job.mode == RestoreMode::Partial && !engine::is_structured_export(&raw) {
            return Err(AppError::UnsupportedFormat(
                "the artifact's export is not a structured text stream".to_string(),
            ));
        }

        println!(
            "✓ Prepared artifact {} ({} raw bytes)",
            file_name,
            raw.len()
        );
        Ok(raw)
    }

    async fn restore_full(&self, job: &RestoreJob, raw: &[u8]) -> Result<()> {
        self.confirm_destructive(&job.target_database)?;

        let db_name = engine::db_name_from_url(&job.target_database)?;
        if self.engine.database_exists(&job.target_database).await? {
            println!("Dropping target database '{}'...", db_name);
            self.engine.drop_database(&job.target_database).await?;
        }
        println!("Creating target database '{}'...", db_name);
        self.engine.create_database(&job.target_database).await?;

        self.engine.import(&job.target_database, raw).await?;
        println!("✓ Full import into '{}' complete", db_name);
        Ok(())
    }

    async fn restore_pitr(
        &self,
        job: &RestoreJob,
        artifact: &BackupArtifact,
        raw: &[u8],
    ) -> Result<()> {
        let target_time = job.recovery_target_time.ok_or_else(|| {
            AppError::InvalidInput("Point-in-time restore lost its target time".to_string())
        })?;

        let db_name = engine::db_name_from_url(&job.target_database)?;
        if self.engine.database_exists(&job.target_database).await? {
            self.engine.drop_database(&job.target_database).await?;
        }
        self.engine.create_database(&job.target_database).await?;
        self.engine.import(&job.target_database, raw).await?;
        println!(
            "✓ Base backup {} imported into '{}'; starting recovery to {}",
            artifact.id,
            db_name,
            target_time.to_rfc3339()
        );

        self.engine
            .start_recovery(&job.target_database, &self.config.wal_archive_dir, target_time)
            .await?;

        let engine = Arc::clone(&self.engine);
        let target = job.target_database.clone();
        let outcome = bounded_poll(
            Duration::from_secs(self.config.pitr_poll_interval_secs),
            Duration::from_secs(self.config.pitr_timeout_secs),
            move || {
                let engine = Arc::clone(&engine);
                let target = target.clone();
                async move { Ok(!engine.is_in_recovery(&target).await?) }
            },
        )
        .await;

        match outcome {
            PollOutcome::Succeeded => {
                println!("✓ Target '{}' exited recovery at the requested point", db_name);
                Ok(())
            }
            PollOutcome::TimedOut => Err(AppError::RecoveryTimeout {
                timeout_secs: self.config.pitr_timeout_secs,
            }),
            PollOutcome::Failed(reason) => Err(AppError::Engine(format!(
                "Recovery polling failed: {}",
                reason
            ))),
        }
    }

    async fn restore_partial(&self, job: &RestoreJob, raw: &[u8]) -> Result<()> {
        let selector: &ObjectSelector = job.object_selector.as_ref().ok_or_else(|| {
            AppError::InvalidInput("Partial restore lost its object selector".to_string())
        })?;

        // The fragment is extracted before the target is opened, so a
        // failing extraction makes no writes at all.
        let fragment = partial::extract_object(raw, selector)?;

        if !self.engine.database_exists(&job.target_database).await? {
            return Err(AppError::InvalidInput(format!(
                "Partial restore opens the target non-destructively, but database '{}' does not exist",
                engine::db_name_from_url(&job.target_database)?
            )));
        }

        self.engine.import(&job.target_database, &fragment).await?;
        println!("✓ Imported '{}' into existing target", selector.name);
        Ok(())
    }

    /// Replays the newest index-definitions artifact against the target.
    pub async fn rebuild_indexes_into(&self, target_db_url: &str) -> Result<()> {
        let newest = self
            .catalog
            .list()?
            .into_iter()
            .filter(|a| a.kind == ArtifactKind::IndexDefinitions)
            .max_by_key(|a| a.created_at);

        let Some(artifact) = newest else {
            println!("↷ No index-definitions artifact in the catalog; skipping index rebuild");
            return Ok(());
        };

        catalog::verify_chain_consistency(&artifact)?;
        let bytes = std::fs::read(&artifact.local_path)?;
        let ddl = pipeline::reverse(&bytes, &artifact.transform_chain, self.config.pipeline_key())?;

        println!(
            "Rebuilding specialized indexes from {}...",
            artifact
                .local_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        );
        self.engine.import(target_db_url, &ddl).await?;
        println!("✓ Specialized indexes rebuilt");
        Ok(())
    }

    /// Same baseline assertions as the functional verifier, against the
    /// now-live target.
    async fn validate_target(&self, target_db_url: &str) -> Result<()> {
        let tables = self.engine.table_count(target_db_url).await?;
        if tables == 0 {
            println!("⚠ Restored target contains zero tables");
        } else {
            println!("✓ Restored target contains {} table(s)", tables);
        }

        let indexes = self.engine.vector_index_count(target_db_url).await?;
        if indexes > 0 {
            self.engine.probe_vector_index(target_db_url).await?;
            println!("✓ Probed one of {} vector-similarity indexes", indexes);
        }
        Ok(())
    }

    /// Destructive-restore gate: an interactive operator must type the
    /// target database name; non-interactive callers must pass the
    /// explicit bypass.
    fn confirm_destructive(&self, target_db_url: &str) -> Result<()> {
        if self.options.assume_yes {
            return Ok(());
        }
        if !self.options.interactive {
            return Err(AppError::Cancelled(
                "full restore drops and recreates the target database; pass --yes to confirm"
                    .to_string(),
            ));
        }

        let db_name = engine::db_name_from_url(target_db_url)?;
        println!(
            "⚠ Full restore will DROP and recreate database '{}' and all of its contents.",
            db_name
        );
        print!("Type the database name to confirm: ");
        use std::io::{stdin, stdout, Write};
        stdout().flush()?;
        let mut input = String::new();
        stdin().read_line(&mut input)?;

        if input.trim() == db_name {
            Ok(())
        } else {
            Err(AppError::Cancelled(format!(
                "confirmation did not match database name '{}'",
                db_name
            )))
        }
    }
}
