pub(crate) mod cloud;
pub(crate) mod producer;

use crate::catalog::{Catalog, RetentionTier};
use crate::config::AppConfig;
use crate::engine::DatabaseEngine;
use crate::errors::Result;
use crate::topology::ClusterTopology;
use crate::verify;
use producer::{BackupOutcome, Producer};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum BackupRequest {
    Full(RetentionTier),
    Incremental(String),
    Config,
    IndexMetadata,
}

/// Public entry point for the backup process: produce the artifact, run the
/// post-backup structural check when enabled, then hand the finished local
/// artifact to cloud transfer. An upload failure never invalidates the
/// local artifact.
pub async fn run_backup_flow(
    config: &AppConfig,
    engine: Arc<dyn DatabaseEngine>,
    topology: Arc<dyn ClusterTopology>,
    request: BackupRequest,
) -> Result<()> {
    let catalog = Catalog::open(&config.storage_root)?;
    let producer = Producer::new(config, Arc::clone(&engine), topology, &catalog);

    let BackupOutcome { mut artifact, warnings } = match request {
        BackupRequest::Full(tier) => producer.produce_full(tier).await?,
        BackupRequest::Incremental(segment) => producer.produce_incremental(&segment).await?,
        BackupRequest::Config => producer.produce_config().await?,
        BackupRequest::IndexMetadata => producer.produce_index_definitions().await?,
    };

    if config.verify_after_backup {
        verify::verify_structural(&artifact, config.pipeline_key())?;
        println!("✓ Structural verification passed");
    }

    if let Some(cloud_config) = &config.cloud {
        match cloud::upload_artifact(cloud_config, &artifact).await {
            Ok(remote_key) => {
                catalog.record_remote_key(&mut artifact, &remote_key)?;
            }
            Err(e) => {
                // Local-first durability: the backup is complete once
                // written locally, distributed once uploaded.
                eprintln!("⚠ {}; the local artifact remains valid", e);
            }
        }
    }

    for warning in &warnings {
        println!("⚠ Completed with warning: {}", warning);
    }

    Ok(())
}
