// clustervault/src/backup/producer.rs
use crate::catalog::{ArtifactKind, BackupArtifact, Catalog, RetentionTier};
use crate::config::{AppConfig, TopologyMode};
use crate::engine::{
    DatabaseEngine, ExportScope, WORKER_SECTION_PREFIX, WORKER_UNAVAILABLE_PREFIX,
};
use crate::errors::{AppError, Result};
use crate::pipeline;
use crate::topology::{ClusterTopology, NodeRef};
use crate::utils::poll::{bounded_poll, PollOutcome};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Result of one backup invocation. Warnings carry the non-fatal
/// degradations (worker metadata failures, primary fallback) that leave the
/// artifact complete but worth an operator's attention.
#[derive(Debug)]
pub struct BackupOutcome {
    pub artifact: BackupArtifact,
    pub warnings: Vec<String>,
}

pub struct Producer<'a> {
    config: &'a AppConfig,
    engine: Arc<dyn DatabaseEngine>,
    topology: Arc<dyn ClusterTopology>,
    catalog: &'a Catalog,
}

impl<'a> Producer<'a> {
    pub fn new(
        config: &'a AppConfig,
        engine: Arc<dyn DatabaseEngine>,
        topology: Arc<dyn ClusterTopology>,
        catalog: &'a Catalog,
    ) -> Self {
        Self {
            config,
            engine,
            topology,
            catalog,
        }
    }

    /// Produces a full backup artifact under the given retention tier.
    pub async fn produce_full(&self, tier: RetentionTier) -> Result<BackupOutcome> {
        let mut warnings = Vec::new();

        let (raw, source_node) = match self.topology.mode() {
            TopologyMode::SingleNode => {
                let node = self.topology.writable_primary()?;
                println!("🔍 Exporting full dataset from {}", node.name);
                (self.engine.export(&node.url, ExportScope::Full).await?, node)
            }
            TopologyMode::HaReplicated => {
                let node = self.select_ha_source(&mut warnings).await?;
                println!("🔍 Exporting full dataset from {} ({})", node.name, node.role.as_str());
                (self.engine.export(&node.url, ExportScope::Full).await?, node)
            }
            TopologyMode::Sharded => {
                let coordinator = self.topology.coordinator()?;
                println!("🔍 Exporting coordinator dataset from {}", coordinator.name);
                let raw = self.export_sharded(&coordinator, &mut warnings).await?;
                (raw, coordinator)
            }
        };

        self.finalize(ArtifactKind::Full, tier, &source_node, raw, warnings)
    }

    /// Archives one WAL segment out of the archive directory.
    pub async fn produce_incremental(&self, segment: &str) -> Result<BackupOutcome> {
        // Segment must be a bare WAL file name inside the archive
        // directory: 24 hex chars, optionally a .backup history suffix.
        let segment_pattern = regex::Regex::new(r"^[0-9A-Fa-f]{24}(\.[0-9A-Fa-f]{8}\.backup)?$")
            .map_err(|e| AppError::Config(format!("Invalid segment pattern: {}", e)))?;
        if !segment_pattern.is_match(segment) {
            return Err(AppError::InvalidInput(format!(
                "'{}' is not a WAL segment name; expected a segment file inside {}",
                segment,
                self.config.wal_archive_dir.display()
            )));
        }

        let segment_path = self.config.wal_archive_dir.join(segment);
        if !segment_path.is_file() {
            return Err(AppError::InvalidInput(format!(
                "WAL segment not found: {}",
                segment_path.display()
            )));
        }

        let raw = std::fs::read(&segment_path)?;
        println!("🔍 Archiving WAL segment {} ({} bytes)", segment, raw.len());

        let node = self.topology.writable_primary()?;
        self.finalize(
            ArtifactKind::WalIncrement,
            RetentionTier::Adhoc,
            &node,
            raw,
            Vec::new(),
        )
    }

    /// Captures non-default server settings from the writable primary.
    pub async fn produce_config(&self) -> Result<BackupOutcome> {
        let node = self.topology.writable_primary()?;
        println!("🔍 Exporting cluster configuration from {}", node.name);
        let raw = self.engine.export(&node.url, ExportScope::ClusterConfig).await?;
        self.finalize(ArtifactKind::Config, RetentionTier::Adhoc, &node, raw, Vec::new())
    }

    /// Captures vector-similarity index DDL for later rebuilds.
    pub async fn produce_index_definitions(&self) -> Result<BackupOutcome> {
        let node = self.topology.writable_primary()?;
        println!("🔍 Exporting index definitions from {}", node.name);
        let raw = self
            .engine
            .export(&node.url, ExportScope::IndexDefinitions)
            .await?;
        self.finalize(
            ArtifactKind::IndexDefinitions,
            RetentionTier::Adhoc,
            &node,
            raw,
            Vec::new(),
        )
    }

    /// HA source selection: a caught-up replica keeps the export load off
    /// production; the primary is the fallback and is flagged so operators
    /// know load was impacted.
    async fn select_ha_source(&self, warnings: &mut Vec<String>) -> Result<NodeRef> {
        for replica in self.topology.replicas() {
            if self.probe_node(&replica).await {
                return Ok(replica);
            }
            println!("⚠ Replica {} is not reachable, trying next candidate", replica.name);
        }

        let primary = self.topology.writable_primary()?;
        if !self.probe_node(&primary).await {
            return Err(AppError::Engine(format!(
                "No replica is reachable and the primary {} is down; cannot back up",
                primary.name
            )));
        }

        let warning = format!(
            "No replica was reachable; backup was taken from the writable primary {} and may have impacted production load",
            primary.name
        );
        println!("⚠ {}", warning);
        warnings.push(warning);
        Ok(primary)
    }

    async fn probe_node(&self, node: &NodeRef) -> bool {
        let engine = Arc::clone(&self.engine);
        let url = node.url.clone();
        let outcome = bounded_poll(
            Duration::from_secs(self.config.node_probe_interval_secs),
            Duration::from_secs(self.config.node_probe_timeout_secs),
            move || {
                let engine = Arc::clone(&engine);
                let url = url.clone();
                async move { Ok(engine.ping(&url).await.is_ok()) }
            },
        )
        .await;
        outcome == PollOutcome::Succeeded
    }

    /// Sharded export: the coordinator dump carries the authoritative data
    /// set; workers contribute schema-only metadata sections. Worker
    /// exports run concurrently and a failing worker never aborts the
    /// backup.
    async fn export_sharded(
        &self,
        coordinator: &NodeRef,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<u8>> {
        let mut raw = self.engine.export(&coordinator.url, ExportScope::Full).await?;

        let mut tasks = JoinSet::new();
        for worker in self.topology.workers() {
            let engine = Arc::clone(&self.engine);
            tasks.spawn(async move {
                let result = engine.export(&worker.url, ExportScope::SchemaOnly).await;
                (worker, result)
            });
        }

        let mut sections: Vec<(String, std::result::Result<Vec<u8>, String>)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((worker, Ok(bytes))) => sections.push((worker.name, Ok(bytes))),
                Ok((worker, Err(e))) => sections.push((worker.name, Err(e.to_string()))),
                Err(e) => sections.push(("<unknown worker>".to_string(), Err(e.to_string()))),
            }
        }
        // Deterministic artifact content regardless of completion order.
        sections.sort_by(|a, b| a.0.cmp(&b.0));

        for (worker_name, result) in sections {
            raw.push(b'\n');
            match result {
                Ok(bytes) => {
                    raw.extend_from_slice(
                        format!("{}{}\n", WORKER_SECTION_PREFIX, worker_name).as_bytes(),
                    );
                    // Worker metadata is annotation, not replayable DDL: a
                    // full restore must not recreate shard-local tables on
                    // the coordinator. Every line is comment-prefixed.
                    for line in String::from_utf8_lossy(&bytes).lines() {
                        raw.extend_from_slice(format!("-- | {}\n", line).as_bytes());
                    }
                    println!("✓ Captured schema metadata from worker {}", worker_name);
                }
                Err(reason) => {
                    let warning = format!(
                        "Worker {} metadata export failed ({}); backup continues from the coordinator dump",
                        worker_name, reason
                    );
                    eprintln!("⚠ {}", warning);
                    raw.extend_from_slice(
                        format!("{}{} ({})\n", WORKER_UNAVAILABLE_PREFIX, worker_name, reason)
                            .as_bytes(),
                    );
                    warnings.push(warning);
                }
            }
        }

        Ok(raw)
    }

    /// Runs the raw export through the artifact pipeline and stores the
    /// result plus metadata. The raw stream never touches the storage root.
    fn finalize(
        &self,
        kind: ArtifactKind,
        tier: RetentionTier,
        source_node: &NodeRef,
        raw: Vec<u8>,
        warnings: Vec<String>,
    ) -> Result<BackupOutcome> {
        let (bytes, stages) = pipeline::apply(
            &raw,
            self.config.compression,
            self.config.encryption_enabled,
            self.config.pipeline_key(),
        )?;

        let artifact = BackupArtifact {
            id: Uuid::new_v4(),
            kind,
            source_topology: self.topology.mode().as_str().to_string(),
            source_node: source_node.name.clone(),
            created_at: Utc::now(),
            transform_chain: stages,
            size_bytes: bytes.len() as u64,
            local_path: PathBuf::new(),
            remote_key: None,
            retention_tier: tier,
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let artifact = self.catalog.store(artifact, &bytes)?;
        println!(
            "📦 Stored artifact {} ({})",
            artifact
                .local_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            crate::catalog::human_size(artifact.size_bytes)
        );

        Ok(BackupOutcome { artifact, warnings })
    }
}
