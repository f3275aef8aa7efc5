// clustervault/src/engine/mod.rs
//
// The database engine is an injected capability: the rest of the crate only
// ever talks to this trait. The production implementation drives PostgreSQL
// (sqlx for catalog queries and the logical dump, psql for imports, pg_ctl
// for recovery); tests use the in-memory fake, which emits and consumes the
// same structured dump format.

#[cfg(test)]
pub mod memory;
pub mod postgres;

use crate::errors::Result;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

/// First line of every structured text export. Partial restore refuses any
/// stream that does not start with this header.
pub const DUMP_HEADER: &str = "-- clustervault logical export";

/// Marks the start of one table's data section inside a full export.
pub const DATA_SECTION_PREFIX: &str = "-- Data for table: ";

/// Marks an embedded worker metadata section in a sharded export.
pub const WORKER_SECTION_PREFIX: &str = "-- WORKER METADATA: ";

/// Recorded in place of a worker section when that worker's schema export
/// failed. The backup is still complete from the coordinator dump.
pub const WORKER_UNAVAILABLE_PREFIX: &str = "-- WORKER METADATA UNAVAILABLE: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportScope {
    /// Schema and data for every user schema.
    Full,
    /// Schema only; used for sharded worker metadata.
    SchemaOnly,
    /// Non-default server settings.
    ClusterConfig,
    /// DDL for specialized (vector-similarity) indexes.
    IndexDefinitions,
}

impl ExportScope {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::SchemaOnly => "schema-only",
            Self::ClusterConfig => "cluster-config",
            Self::IndexDefinitions => "index-definitions",
        }
    }
}

/// Extracts the database name from a connection URL path.
pub fn db_name_from_url(db_url: &str) -> Result<String> {
    let parsed = url::Url::parse(db_url)?;
    let name = parsed.path().trim_start_matches('/').to_string();
    if name.is_empty() {
        return Err(crate::errors::AppError::InvalidInput(format!(
            "Connection URL '{}' does not name a database",
            parsed.host_str().unwrap_or("unknown-host")
        )));
    }
    Ok(name)
}

/// Rewrites a connection URL to point at a different database on the same
/// server.
pub fn url_with_database(db_url: &str, db_name: &str) -> Result<String> {
    let mut parsed = url::Url::parse(db_url)?;
    parsed.set_path(&format!("/{}", db_name));
    Ok(parsed.to_string())
}

#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// Cheap connectivity check against one node.
    async fn ping(&self, node_url: &str) -> anyhow::Result<()>;

    /// Produces a structured text export of the requested scope.
    async fn export(&self, node_url: &str, scope: ExportScope) -> Result<Vec<u8>>;

    /// Executes a structured text export against the database named in
    /// `target_db_url`. The database must already exist.
    async fn import(&self, target_db_url: &str, sql: &[u8]) -> Result<()>;

    async fn database_exists(&self, target_db_url: &str) -> Result<bool>;

    async fn create_database(&self, target_db_url: &str) -> Result<()>;

    /// Drops the database named in `target_db_url`, terminating open
    /// sessions first. Refuses system databases.
    async fn drop_database(&self, target_db_url: &str) -> Result<()>;

    async fn table_count(&self, target_db_url: &str) -> Result<i64>;

    /// Number of vector-similarity indexes (hnsw/ivfflat) in the database.
    async fn vector_index_count(&self, target_db_url: &str) -> Result<i64>;

    /// Exercises one vector-similarity index lookup, if any exists.
    async fn probe_vector_index(&self, target_db_url: &str) -> Result<()>;

    /// Hands control to the engine's own point-in-time recovery mechanism.
    /// Completion is observed via `is_in_recovery`, not awaited here.
    async fn start_recovery(
        &self,
        target_db_url: &str,
        wal_source: &Path,
        recovery_target_time: DateTime<Utc>,
    ) -> Result<()>;

    async fn is_in_recovery(&self, target_db_url: &str) -> anyhow::Result<bool>;
}

/// Checks that a byte stream is one of our structured text exports.
pub fn is_structured_export(raw: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(&raw[..raw.len().min(256)]) else {
        return false;
    };
    text.lines().next().map(|l| l.trim_end()) == Some(DUMP_HEADER)
}

/// Parses the header of a structured export, returning the source database
/// name recorded at export time.
pub fn export_source_database(raw: &[u8]) -> anyhow::Result<String> {
    let text = std::str::from_utf8(&raw[..raw.len().min(1024)])
        .context("Export header is not valid UTF-8")?;
    for line in text.lines().take(8) {
        if let Some(name) = line.strip_prefix("-- Database: ") {
            return Ok(name.trim().to_string());
        }
    }
    anyhow::bail!("Export header does not record a source database")
}
