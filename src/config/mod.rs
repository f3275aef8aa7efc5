// clustervault/src/config/mod.rs
use crate::pipeline::{CompressionAlgo, EncryptionKey};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENCRYPTION_KEY_ENV: &str = "CLUSTERVAULT_ENCRYPTION_KEY";

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonCloudStorageConfig {
    pub provider: Option<String>,
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRetentionConfig {
    pub daily_days: Option<i64>,
    pub weekly_days: Option<i64>,
    pub monthly_days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonTopologyConfig {
    pub mode: Option<String>,
    pub source_database_url: Option<String>,
    pub coordinator_url: Option<String>,
    pub worker_urls: Option<Vec<String>>,
    pub primary_url: Option<String>,
    pub replica_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub storage_root: Option<PathBuf>,
    pub wal_archive_dir: Option<PathBuf>,
    pub recovery_staging_dir: Option<PathBuf>,
    pub target_database_url: Option<String>,
    pub compression: Option<String>,
    pub encryption: Option<bool>,
    pub verify_after_backup: Option<bool>,
    pub rebuild_indexes: Option<bool>,
    pub pitr_poll_interval_secs: Option<u64>,
    pub pitr_timeout_secs: Option<u64>,
    pub node_probe_interval_secs: Option<u64>,
    pub node_probe_timeout_secs: Option<u64>,
    pub retention: Option<JsonRetentionConfig>,
    pub topology: Option<JsonTopologyConfig>,
    pub cloud_storage: Option<JsonCloudStorageConfig>,
}

// Application's internal configuration structs

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyMode {
    SingleNode,
    Sharded,
    HaReplicated,
}

impl TopologyMode {
    pub fn from_selector(s: &str) -> Result<Self> {
        match s {
            "single-node" => Ok(Self::SingleNode),
            "sharded" => Ok(Self::Sharded),
            "ha-replicated" => Ok(Self::HaReplicated),
            other => anyhow::bail!(
                "Unknown topology mode '{}', expected single-node|sharded|ha-replicated",
                other
            ),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SingleNode => "single-node",
            Self::Sharded => "sharded",
            Self::HaReplicated => "ha-replicated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopologyConfig {
    pub mode: TopologyMode,
    pub source_database_url: Option<String>,
    pub coordinator_url: Option<String>,
    pub worker_urls: Vec<String>,
    pub primary_url: Option<String>,
    pub replica_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    Aws,
    Spaces,
    Wasabi,
}

impl CloudProvider {
    pub fn from_selector(s: &str) -> Result<Option<Self>> {
        match s {
            "none" => Ok(None),
            "aws" => Ok(Some(Self::Aws)),
            "spaces" => Ok(Some(Self::Spaces)),
            "wasabi" => Ok(Some(Self::Wasabi)),
            other => anyhow::bail!(
                "Unknown cloud provider '{}', expected none|aws|spaces|wasabi",
                other
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub provider: CloudProvider,
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetentionDays {
    pub daily: i64,
    pub weekly: i64,
    pub monthly: i64,
}

impl Default for RetentionDays {
    fn default() -> Self {
        Self {
            daily: 7,
            weekly: 28,
            monthly: 180,
        }
    }
}

/// Immutable application configuration, constructed once at process start
/// and passed explicitly to every component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_root: PathBuf,
    pub wal_archive_dir: PathBuf,
    pub recovery_staging_dir: PathBuf,
    pub target_database_url: Option<String>,
    pub compression: CompressionAlgo,
    pub encryption_enabled: bool,
    pub encryption_key: Option<EncryptionKey>,
    pub verify_after_backup: bool,
    pub rebuild_indexes: bool,
    pub pitr_poll_interval_secs: u64,
    pub pitr_timeout_secs: u64,
    pub node_probe_interval_secs: u64,
    pub node_probe_timeout_secs: u64,
    pub retention: RetentionDays,
    pub topology: TopologyConfig,
    pub cloud: Option<CloudConfig>,
}

impl AppConfig {
    /// Loads config.json if present, then folds environment overrides on
    /// top. Every key has a default, so a missing config file is fine.
    pub fn load(config_path: &Path) -> Result<Self> {
        let raw: RawJsonConfig = if config_path.exists() {
            let config_content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
            serde_json::from_str(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            RawJsonConfig::default()
        };

        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let storage_root = env_path("CLUSTERVAULT_STORAGE_ROOT")
            .or(raw.storage_root)
            .unwrap_or_else(|| PathBuf::from("./vault"));
        let wal_archive_dir = env_path("CLUSTERVAULT_WAL_ARCHIVE_DIR")
            .or(raw.wal_archive_dir)
            .unwrap_or_else(|| PathBuf::from("./wal-archive"));
        let recovery_staging_dir = env_path("CLUSTERVAULT_RECOVERY_STAGING_DIR")
            .or(raw.recovery_staging_dir)
            .unwrap_or_else(|| PathBuf::from("./recovery-staging"));

        let compression_selector = env::var("CLUSTERVAULT_COMPRESSION")
            .ok()
            .or(raw.compression)
            .unwrap_or_else(|| "balanced".to_string());
        let compression = CompressionAlgo::from_selector(&compression_selector)
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        let encryption_enabled = env_bool("CLUSTERVAULT_ENCRYPTION")?
            .or(raw.encryption)
            .unwrap_or(false);

        // The key is supplied out-of-band only. It never appears in
        // config.json and is never written next to an artifact.
        let encryption_key = match env::var(ENCRYPTION_KEY_ENV) {
            Ok(hex_key) if !hex_key.trim().is_empty() => {
                Some(EncryptionKey::from_hex(&hex_key).map_err(|e| anyhow::anyhow!("{}", e))?)
            }
            _ => None,
        };

        if encryption_enabled && encryption_key.is_none() {
            println!(
                "⚠ Encryption is enabled but {} is not set. Backup operations will fail until a key is provided.",
                ENCRYPTION_KEY_ENV
            );
        }

        let retention_raw = raw.retention.as_ref();
        let defaults = RetentionDays::default();
        let retention = RetentionDays {
            daily: env_i64("CLUSTERVAULT_RETENTION_DAILY")?
                .or(retention_raw.and_then(|r| r.daily_days))
                .unwrap_or(defaults.daily),
            weekly: env_i64("CLUSTERVAULT_RETENTION_WEEKLY")?
                .or(retention_raw.and_then(|r| r.weekly_days))
                .unwrap_or(defaults.weekly),
            monthly: env_i64("CLUSTERVAULT_RETENTION_MONTHLY")?
                .or(retention_raw.and_then(|r| r.monthly_days))
                .unwrap_or(defaults.monthly),
        };

        let topology = load_topology(raw.topology)?;
        let cloud = load_cloud(raw.cloud_storage)?;

        Ok(AppConfig {
            storage_root,
            wal_archive_dir,
            recovery_staging_dir,
            target_database_url: env::var("TARGET_DATABASE_URL").ok().or(raw.target_database_url),
            compression,
            encryption_enabled,
            encryption_key,
            verify_after_backup: env_bool("CLUSTERVAULT_VERIFY_AFTER_BACKUP")?
                .or(raw.verify_after_backup)
                .unwrap_or(true),
            rebuild_indexes: env_bool("CLUSTERVAULT_REBUILD_INDEXES")?
                .or(raw.rebuild_indexes)
                .unwrap_or(false),
            pitr_poll_interval_secs: raw.pitr_poll_interval_secs.unwrap_or(5),
            pitr_timeout_secs: raw.pitr_timeout_secs.unwrap_or(300),
            node_probe_interval_secs: raw.node_probe_interval_secs.unwrap_or(2),
            node_probe_timeout_secs: raw.node_probe_timeout_secs.unwrap_or(15),
            retention,
            topology,
            cloud,
        })
    }

    /// The key the pipeline should use, or an explicit absence.
    pub fn pipeline_key(&self) -> Option<&EncryptionKey> {
        self.encryption_key.as_ref()
    }
}

fn load_topology(raw: Option<JsonTopologyConfig>) -> Result<TopologyConfig> {
    let raw = raw.unwrap_or(JsonTopologyConfig {
        mode: None,
        source_database_url: None,
        coordinator_url: None,
        worker_urls: None,
        primary_url: None,
        replica_urls: None,
    });

    let mode_selector = env::var("CLUSTERVAULT_TOPOLOGY")
        .ok()
        .or(raw.mode)
        .unwrap_or_else(|| "single-node".to_string());
    let mode = TopologyMode::from_selector(&mode_selector)?;

    let source_database_url = env::var("SOURCE_DATABASE_URL").ok().or(raw.source_database_url);

    let topology = TopologyConfig {
        mode,
        source_database_url,
        coordinator_url: raw.coordinator_url,
        worker_urls: raw.worker_urls.unwrap_or_default(),
        primary_url: raw.primary_url,
        replica_urls: raw.replica_urls.unwrap_or_default(),
    };

    match mode {
        TopologyMode::SingleNode => {
            if topology.source_database_url.is_none() {
                anyhow::bail!(
                    "single-node topology requires source_database_url (or SOURCE_DATABASE_URL)"
                );
            }
        }
        TopologyMode::Sharded => {
            if topology.coordinator_url.is_none() {
                anyhow::bail!("sharded topology requires topology.coordinator_url");
            }
        }
        TopologyMode::HaReplicated => {
            if topology.primary_url.is_none() {
                anyhow::bail!("ha-replicated topology requires topology.primary_url");
            }
        }
    }

    Ok(topology)
}

fn load_cloud(raw: Option<JsonCloudStorageConfig>) -> Result<Option<CloudConfig>> {
    let Some(cloud_raw) = raw else {
        return Ok(None);
    };

    let provider_selector = cloud_raw.provider.clone().unwrap_or_else(|| "none".to_string());
    let Some(provider) = CloudProvider::from_selector(&provider_selector)? else {
        return Ok(None);
    };

    if let (Some(bucket), Some(region), Some(key_id), Some(secret)) = (
        cloud_raw.bucket_name.as_ref().filter(|s| !s.is_empty()),
        cloud_raw.region.as_ref().filter(|s| !s.is_empty()),
        cloud_raw.access_key_id.as_ref().filter(|s| !s.is_empty()),
        cloud_raw.secret_access_key.as_ref().filter(|s| !s.is_empty()),
    ) {
        // Non-AWS providers are S3-compatible and need an explicit endpoint.
        let endpoint_url = cloud_raw.endpoint_url.clone().filter(|s| !s.is_empty());
        if provider != CloudProvider::Aws && endpoint_url.is_none() {
            anyhow::bail!(
                "cloud provider '{}' requires cloud_storage.endpoint_url",
                provider_selector
            );
        }

        Ok(Some(CloudConfig {
            provider,
            bucket_name: bucket.clone(),
            region: region.clone(),
            access_key_id: key_id.clone(),
            secret_access_key: secret.clone(),
            endpoint_url,
            folder_prefix: cloud_raw.folder_prefix.clone().filter(|s| !s.is_empty()),
        }))
    } else {
        println!(
            "Cloud storage is configured in config.json but some required fields (bucket_name, region, access_key_id, secret_access_key) are missing or empty. Uploads will be disabled."
        );
        Ok(None)
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var(name).ok().filter(|s| !s.is_empty()).map(PathBuf::from)
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => {
            let parsed = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => anyhow::bail!("{} must be a boolean, got '{}'", name, other),
            };
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

fn env_i64(name: &str) -> Result<Option<i64>> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => {
            let parsed = v
                .parse::<i64>()
                .with_context(|| format!("{} must be an integer number of days", name))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}
