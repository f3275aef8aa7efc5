// clustervault/src/catalog/mod.rs
//
// The artifact catalog is the local storage root: one file per artifact,
// carrying its transform-chain labels in its name, plus a co-located
// metadata record. The producer only ever appends here and the retention
// manager only ever deletes; nothing mutates a stored artifact in place.

use crate::errors::{AppError, Result};
use crate::pipeline::{self, TransformStage};
use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

pub const METADATA_SUFFIX: &str = ".meta.json";
pub const VERIFY_REPORT_SUFFIX: &str = ".verify.json";
pub const AUDIT_LOG_FILE: &str = "retention_audit.log";

const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Full,
    WalIncrement,
    Config,
    IndexDefinitions,
}

impl ArtifactKind {
    pub fn file_label(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::WalIncrement => "walinc",
            Self::Config => "config",
            Self::IndexDefinitions => "indexdef",
        }
    }

    pub fn from_file_label(label: &str) -> Result<Self> {
        match label {
            "full" => Ok(Self::Full),
            "walinc" => Ok(Self::WalIncrement),
            "config" => Ok(Self::Config),
            "indexdef" => Ok(Self::IndexDefinitions),
            other => Err(AppError::InvalidInput(format!(
                "Unknown artifact kind label '{}'",
                other
            ))),
        }
    }

    /// Base extension of the raw (untransformed) payload.
    pub fn base_extension(self) -> &'static str {
        match self {
            Self::WalIncrement => "wal",
            _ => "sql",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionTier {
    Daily,
    Weekly,
    Monthly,
    Adhoc,
}

impl RetentionTier {
    pub fn file_label(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Adhoc => "adhoc",
        }
    }

    pub fn from_file_label(label: &str) -> Result<Self> {
        match label {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "adhoc" => Ok(Self::Adhoc),
            other => Err(AppError::InvalidInput(format!(
                "Unknown retention tier '{}', expected daily|weekly|monthly|adhoc",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub id: Uuid,
    pub kind: ArtifactKind,
    pub source_topology: String,
    pub source_node: String,
    pub created_at: DateTime<Utc>,
    pub transform_chain: Vec<TransformStage>,
    pub size_bytes: u64,
    pub local_path: PathBuf,
    pub remote_key: Option<String>,
    pub retention_tier: RetentionTier,
    /// Tool version that produced the artifact.
    pub producer_version: String,
}

impl BackupArtifact {
    pub fn file_name(&self) -> String {
        let short_id = &self.id.simple().to_string()[..8];
        let mut name = format!(
            "{}-{}-{}-{}.{}",
            self.kind.file_label(),
            self.retention_tier.file_label(),
            self.created_at.format(FILE_TIMESTAMP_FORMAT),
            short_id,
            self.kind.base_extension(),
        );
        let suffix = pipeline::chain_suffix(&self.transform_chain);
        if !suffix.is_empty() {
            name.push('.');
            name.push_str(&suffix);
        }
        name
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

/// Components recoverable from an artifact filename alone.
#[derive(Debug, Clone)]
pub struct ParsedArtifactName {
    pub kind: ArtifactKind,
    pub tier: RetentionTier,
    pub timestamp: DateTime<Utc>,
    pub short_id: String,
    pub chain: Vec<TransformStage>,
}

pub fn parse_artifact_file_name(file_name: &str) -> Result<ParsedArtifactName> {
    let (stem, extensions) = file_name.split_once('.').ok_or_else(|| {
        AppError::InvalidInput(format!("Artifact name '{}' has no extension", file_name))
    })?;

    let parts: Vec<&str> = stem.split('-').collect();
    let [kind_label, tier_label, timestamp_str, short_id] = parts.as_slice() else {
        return Err(AppError::InvalidInput(format!(
            "Artifact name '{}' does not match kind-tier-timestamp-id",
            file_name
        )));
    };

    let kind = ArtifactKind::from_file_label(kind_label)?;
    let tier = RetentionTier::from_file_label(tier_label)?;
    let naive = NaiveDateTime::parse_from_str(timestamp_str, FILE_TIMESTAMP_FORMAT)
        .map_err(|e| {
            AppError::InvalidInput(format!(
                "Artifact name '{}' has an unparseable timestamp: {}",
                file_name, e
            ))
        })?;
    let timestamp = naive.and_utc();

    let mut ext_parts = extensions.splitn(2, '.');
    let base = ext_parts.next().unwrap_or_default();
    if base != kind.base_extension() {
        return Err(AppError::InvalidInput(format!(
            "Artifact name '{}' has base extension '{}', expected '{}'",
            file_name,
            base,
            kind.base_extension()
        )));
    }
    let chain = pipeline::parse_chain_suffix(ext_parts.next().unwrap_or(""))?;

    Ok(ParsedArtifactName {
        kind,
        tier,
        timestamp,
        short_id: short_id.to_string(),
        chain,
    })
}

/// Rejects an artifact whose filename chain disagrees with its metadata.
/// The dangerous case is an encrypt stage recorded in metadata but missing
/// from the filename: such an artifact cannot be restored and must never
/// reach restore preparation.
pub fn verify_chain_consistency(artifact: &BackupArtifact) -> Result<()> {
    let file_name = artifact
        .local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            AppError::InvalidInput(format!(
                "Artifact path has no file name: {}",
                artifact.local_path.display()
            ))
        })?;
    let parsed = parse_artifact_file_name(file_name)?;

    if parsed.chain != artifact.transform_chain {
        let reason = if artifact.transform_chain.contains(&TransformStage::Encrypt)
            && !parsed.chain.contains(&TransformStage::Encrypt)
        {
            "metadata records an encryption stage the filename does not carry; the artifact is unrestorable".to_string()
        } else {
            format!(
                "filename chain [{}] != metadata chain [{}]",
                pipeline::chain_suffix(&parsed.chain),
                pipeline::chain_suffix(&artifact.transform_chain)
            )
        };
        return Err(AppError::ChainMismatch {
            artifact: file_name.to_string(),
            reason,
        });
    }
    Ok(())
}

pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| {
            AppError::Config(format!(
                "Failed to create artifact storage root {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Writes transformed artifact bytes and the metadata record. The
    /// payload is staged in the storage root and renamed into place, so a
    /// crash never leaves a file whose name disagrees with its content.
    pub fn store(&self, mut artifact: BackupArtifact, bytes: &[u8]) -> Result<BackupArtifact> {
        let file_name = artifact.file_name();
        let final_path = self.root.join(&file_name);

        let mut staged = tempfile::NamedTempFile::new_in(&self.root)?;
        staged.write_all(bytes)?;
        staged.flush()?;
        staged
            .persist(&final_path)
            .map_err(|e| AppError::Io(e.error))?;

        artifact.local_path = final_path;
        artifact.size_bytes = bytes.len() as u64;
        self.write_metadata(&artifact)?;
        Ok(artifact)
    }

    pub fn metadata_path(&self, artifact_path: &Path) -> PathBuf {
        let mut name = artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        name.push_str(METADATA_SUFFIX);
        artifact_path.with_file_name(name)
    }

    pub fn verify_report_path(&self, artifact_path: &Path) -> PathBuf {
        let mut name = artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        name.push_str(VERIFY_REPORT_SUFFIX);
        artifact_path.with_file_name(name)
    }

    pub fn write_metadata(&self, artifact: &BackupArtifact) -> Result<()> {
        let path = self.metadata_path(&artifact.local_path);
        let json = serde_json::to_string_pretty(artifact)?;
        let mut staged = tempfile::NamedTempFile::new_in(&self.root)?;
        staged.write_all(json.as_bytes())?;
        staged.flush()?;
        staged.persist(&path).map_err(|e| AppError::Io(e.error))?;
        Ok(())
    }

    /// Records a completed upload on the metadata record.
    pub fn record_remote_key(&self, artifact: &mut BackupArtifact, remote_key: &str) -> Result<()> {
        artifact.remote_key = Some(remote_key.to_string());
        self.write_metadata(artifact)
    }

    /// Scans the storage root for artifacts. Metadata records are
    /// authoritative; an artifact missing its record is reconstructed from
    /// the filename so it still shows up for retention and status.
    pub fn list(&self) -> Result<Vec<BackupArtifact>> {
        let mut artifacts = Vec::new();

        for entry in WalkDir::new(&self.root).max_depth(1) {
            let entry = entry
                .map_err(|e| AppError::Config(format!("Failed to scan storage root: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.ends_with(METADATA_SUFFIX)
                || file_name.ends_with(VERIFY_REPORT_SUFFIX)
                || file_name == AUDIT_LOG_FILE
            {
                continue;
            }
            let Ok(parsed) = parse_artifact_file_name(&file_name) else {
                // Foreign files in the storage root are left alone.
                continue;
            };

            let path = entry.path().to_path_buf();
            let artifact = match self.load_metadata(&path) {
                Ok(Some(mut artifact)) => {
                    artifact.local_path = path;
                    artifact
                }
                Ok(None) | Err(_) => reconstruct_from_name(&path, &parsed)?,
            };
            artifacts.push(artifact);
        }

        artifacts.sort_by_key(|a| a.created_at);
        Ok(artifacts)
    }

    fn load_metadata(&self, artifact_path: &Path) -> Result<Option<BackupArtifact>> {
        let meta_path = self.metadata_path(artifact_path);
        if !meta_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&meta_path)?;
        let artifact: BackupArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse metadata record {}", meta_path.display()))?;
        Ok(Some(artifact))
    }

    /// Resolves a user-supplied artifact reference: an artifact id (full or
    /// 8-char short form), a filename, or the literal `latest` (newest full
    /// backup).
    pub fn resolve_ref(&self, artifact_ref: &str) -> Result<BackupArtifact> {
        let artifacts = self.list()?;

        if artifact_ref == "latest" {
            return artifacts
                .into_iter()
                .filter(|a| a.kind == ArtifactKind::Full)
                .max_by_key(|a| a.created_at)
                .ok_or_else(|| {
                    AppError::InvalidInput("No full backup artifacts in the catalog".to_string())
                });
        }

        let matches: Vec<BackupArtifact> = artifacts
            .into_iter()
            .filter(|a| {
                let file_name = a
                    .local_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                a.id.to_string() == artifact_ref
                    || a.id.simple().to_string().starts_with(artifact_ref)
                    || file_name == artifact_ref
                    // Artifacts reconstructed without a metadata record get
                    // a fresh id, but stay addressable by the short id
                    // embedded in their filename.
                    || parse_artifact_file_name(&file_name)
                        .map(|p| p.short_id == artifact_ref)
                        .unwrap_or(false)
            })
            .collect();

        match matches.len() {
            0 => Err(AppError::InvalidInput(format!(
                "No artifact matches '{}'",
                artifact_ref
            ))),
            1 => Ok(matches.into_iter().next().unwrap()),
            n => Err(AppError::InvalidInput(format!(
                "Artifact reference '{}' is ambiguous ({} matches)",
                artifact_ref, n
            ))),
        }
    }

    /// Removes an artifact and its co-located records.
    pub fn delete(&self, artifact: &BackupArtifact) -> Result<()> {
        fs::remove_file(&artifact.local_path)?;
        let meta = self.metadata_path(&artifact.local_path);
        if meta.exists() {
            fs::remove_file(meta)?;
        }
        let report = self.verify_report_path(&artifact.local_path);
        if report.exists() {
            fs::remove_file(report)?;
        }
        Ok(())
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.root.join(AUDIT_LOG_FILE)
    }
}

fn reconstruct_from_name(path: &Path, parsed: &ParsedArtifactName) -> Result<BackupArtifact> {
    let size_bytes = fs::metadata(path)?.len();
    Ok(BackupArtifact {
        id: Uuid::new_v4(),
        kind: parsed.kind,
        source_topology: "unknown".to_string(),
        source_node: "unknown".to_string(),
        created_at: parsed.timestamp,
        transform_chain: parsed.chain.clone(),
        size_bytes,
        local_path: path.to_path_buf(),
        remote_key: None,
        retention_tier: parsed.tier,
        producer_version: "unknown".to_string(),
    })
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_artifact(
        kind: ArtifactKind,
        tier: RetentionTier,
        created_at: DateTime<Utc>,
        chain: Vec<TransformStage>,
    ) -> BackupArtifact {
        BackupArtifact {
            id: Uuid::new_v4(),
            kind,
            source_topology: "single-node".to_string(),
            source_node: "localhost:5432".to_string(),
            created_at,
            transform_chain: chain,
            size_bytes: 0,
            local_path: PathBuf::new(),
            remote_key: None,
            retention_tier: tier,
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    #[test]
    fn test_file_name_round_trip() -> Result<()> {
        let created = Utc.with_ymd_and_hms(2026, 8, 7, 12, 30, 15).unwrap();
        let artifact = sample_artifact(
            ArtifactKind::Full,
            RetentionTier::Daily,
            created,
            vec![TransformStage::Gzip, TransformStage::Encrypt],
        );
        let name = artifact.file_name();
        assert!(name.starts_with("full-daily-20260807T123015-"));
        assert!(name.ends_with(".sql.gz.enc"));

        let parsed = parse_artifact_file_name(&name)?;
        assert_eq!(parsed.kind, ArtifactKind::Full);
        assert_eq!(parsed.tier, RetentionTier::Daily);
        assert_eq!(parsed.timestamp, created);
        assert_eq!(parsed.chain, artifact.transform_chain);
        Ok(())
    }

    #[test]
    fn test_wal_increment_uses_wal_extension() {
        let artifact = sample_artifact(
            ArtifactKind::WalIncrement,
            RetentionTier::Adhoc,
            Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            vec![TransformStage::Zstd],
        );
        assert!(artifact.file_name().ends_with(".wal.zst"));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(parse_artifact_file_name("notes.txt").is_err());
        assert!(parse_artifact_file_name("full-hourly-20260807T123015-abcd1234.sql").is_err());
        assert!(parse_artifact_file_name("full-daily-20260807T123015-abcd1234.sql.rar").is_err());
    }

    #[test]
    fn test_chain_mismatch_detects_missing_encrypt_label() {
        let created = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();
        let mut artifact = sample_artifact(
            ArtifactKind::Full,
            RetentionTier::Daily,
            created,
            vec![TransformStage::Gzip],
        );
        // Filename rendered without the encrypt label...
        let name = artifact.file_name();
        artifact.local_path = PathBuf::from(format!("/vault/{}", name));
        // ...while metadata claims encryption was applied.
        artifact.transform_chain = vec![TransformStage::Gzip, TransformStage::Encrypt];

        let err = verify_chain_consistency(&artifact).unwrap_err();
        match err {
            AppError::ChainMismatch { reason, .. } => {
                assert!(reason.contains("unrestorable"));
            }
            other => panic!("expected ChainMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_store_list_resolve_delete() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path())?;

        let older = catalog.store(
            sample_artifact(
                ArtifactKind::Full,
                RetentionTier::Daily,
                Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
                vec![],
            ),
            b"older",
        )?;
        let newer = catalog.store(
            sample_artifact(
                ArtifactKind::Full,
                RetentionTier::Weekly,
                Utc.with_ymd_and_hms(2026, 8, 5, 0, 0, 0).unwrap(),
                vec![],
            ),
            b"newer",
        )?;

        let listed = catalog.list()?;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed[1].size_bytes, 5);

        assert_eq!(catalog.resolve_ref("latest")?.id, newer.id);
        let older_id = older.id.simple().to_string();
        assert_eq!(catalog.resolve_ref(&older_id[..8])?.id, older.id);
        assert!(catalog.resolve_ref("nonexistent").is_err());

        catalog.delete(&older)?;
        assert_eq!(catalog.list()?.len(), 1);
        assert!(!catalog.metadata_path(&older.local_path).exists());
        Ok(())
    }

    #[test]
    fn test_list_reconstructs_artifact_without_metadata() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path())?;
        fs::write(
            dir.path().join("full-monthly-20260101T000000-deadbeef.sql.gz"),
            b"payload",
        )
        .unwrap();
        // A stray operator file is ignored, not an error.
        fs::write(dir.path().join("README.txt"), b"notes").unwrap();

        let listed = catalog.list()?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].retention_tier, RetentionTier::Monthly);
        assert_eq!(listed[0].transform_chain, vec![TransformStage::Gzip]);
        Ok(())
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
    }
}
