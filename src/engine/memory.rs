// clustervault/src/engine/memory.rs
//
// In-memory engine used by tests. It emits and parses the same structured
// dump format as the PostgreSQL engine, which is what makes the verifier's
// functional check and the restore flows testable without a live cluster.

use super::{db_name_from_url, DatabaseEngine, ExportScope, DATA_SECTION_PREFIX, DUMP_HEADER};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct FakeTable {
    pub schema: String,
    pub name: String,
    pub columns: Vec<String>,
    /// Rendered SQL value tuples, without the surrounding parentheses.
    pub rows: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeDatabase {
    pub tables: Vec<FakeTable>,
    /// CREATE INDEX statements for vector-similarity indexes.
    pub vector_indexes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecoveryStart {
    pub database: String,
    pub wal_source: PathBuf,
    pub target_time: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryEngine {
    databases: Mutex<HashMap<String, FakeDatabase>>,
    unreachable: Mutex<Vec<String>>,
    recovery_polls_needed: Mutex<u32>,
    recovery_remaining: Mutex<HashMap<String, u32>>,
    recovery_starts: Mutex<Vec<RecoveryStart>>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_database(&self, name: &str, db: FakeDatabase) {
        self.databases.lock().unwrap().insert(name.to_string(), db);
    }

    /// Seeds a single-table database in one call.
    pub fn seed_table(&self, db_name: &str, table: &str, columns: &[&str], rows: &[&str]) {
        let mut databases = self.databases.lock().unwrap();
        let db = databases.entry(db_name.to_string()).or_default();
        db.tables.push(FakeTable {
            schema: "public".to_string(),
            name: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows.iter().map(|r| r.to_string()).collect(),
        });
    }

    pub fn add_vector_index(&self, db_name: &str, indexdef: &str) {
        let mut databases = self.databases.lock().unwrap();
        let db = databases.entry(db_name.to_string()).or_default();
        db.vector_indexes.push(indexdef.to_string());
    }

    /// Marks a node URL as unreachable; ping and export against it fail.
    pub fn mark_unreachable(&self, node_url: &str) {
        self.unreachable.lock().unwrap().push(node_url.to_string());
    }

    /// Number of `is_in_recovery` polls that report true after a recovery
    /// starts. Zero means recovery completes immediately.
    pub fn set_recovery_polls(&self, polls: u32) {
        *self.recovery_polls_needed.lock().unwrap() = polls;
    }

    pub fn recovery_starts(&self) -> Vec<RecoveryStart> {
        self.recovery_starts.lock().unwrap().clone()
    }

    pub fn database(&self, name: &str) -> Option<FakeDatabase> {
        self.databases.lock().unwrap().get(name).cloned()
    }

    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn row_count(&self, db_name: &str, table: &str) -> usize {
        self.database(db_name)
            .and_then(|db| db.tables.into_iter().find(|t| t.name == table))
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    fn check_reachable(&self, node_url: &str) -> anyhow::Result<()> {
        if self.unreachable.lock().unwrap().iter().any(|u| u == node_url) {
            anyhow::bail!("node {} is unreachable", node_url);
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseEngine for InMemoryEngine {
    async fn ping(&self, node_url: &str) -> anyhow::Result<()> {
        self.check_reachable(node_url)
    }

    async fn export(&self, node_url: &str, scope: ExportScope) -> Result<Vec<u8>> {
        self.check_reachable(node_url)
            .map_err(|e| AppError::Engine(e.to_string()))?;
        let db_name = db_name_from_url(node_url)?;
        let databases = self.databases.lock().unwrap();
        let db = databases
            .get(&db_name)
            .ok_or_else(|| AppError::Engine(format!("database '{}' does not exist", db_name)))?;

        let mut out = String::new();
        writeln!(out, "{}", DUMP_HEADER).ok();
        writeln!(out, "-- Database: {}", db_name).ok();
        writeln!(out, "-- Scope: {}", scope.describe()).ok();
        writeln!(out, "-- Exported at: {}", Utc::now().to_rfc3339()).ok();
        writeln!(out).ok();

        match scope {
            ExportScope::Full => {
                writeln!(out, "BEGIN;").ok();
                render_schema(db, &mut out);
                render_data(db, &mut out);
                render_indexes(db, &mut out);
                writeln!(out, "\nCOMMIT;").ok();
            }
            ExportScope::SchemaOnly => {
                writeln!(out, "BEGIN;").ok();
                render_schema(db, &mut out);
                render_indexes(db, &mut out);
                writeln!(out, "\nCOMMIT;").ok();
            }
            ExportScope::ClusterConfig => {
                writeln!(out, "-- Non-default server settings").ok();
                writeln!(out, "ALTER SYSTEM SET shared_buffers = '128MB';").ok();
                writeln!(out, "ALTER SYSTEM SET wal_level = 'replica';").ok();
            }
            ExportScope::IndexDefinitions => {
                writeln!(out, "-- Vector-similarity index definitions").ok();
                for def in &db.vector_indexes {
                    if let Some(name) = quoted_identifiers(def).first() {
                        writeln!(out, "DROP INDEX IF EXISTS \"{}\";", name).ok();
                    }
                    writeln!(out, "{};", def.trim_end_matches(';')).ok();
                }
            }
        }

        Ok(out.into_bytes())
    }

    async fn import(&self, target_db_url: &str, sql: &[u8]) -> Result<()> {
        let db_name = db_name_from_url(target_db_url)?;
        let text = std::str::from_utf8(sql)
            .map_err(|e| AppError::Engine(format!("import stream is not UTF-8: {}", e)))?
            .to_string();

        let mut databases = self.databases.lock().unwrap();
        let db = databases
            .get_mut(&db_name)
            .ok_or_else(|| AppError::Engine(format!("database '{}' does not exist", db_name)))?;

        let mut lines = text.lines().peekable();
        while let Some(line) = lines.next() {
            let trimmed = line.trim();

            if let Some(rest) = trimmed.strip_prefix("CREATE TABLE ") {
                let idents = quoted_identifiers(rest);
                let (schema, name) = qualify(&idents)?;
                let mut columns = Vec::new();
                for col_line in lines.by_ref() {
                    let col_trimmed = col_line.trim();
                    if col_trimmed.starts_with(')') {
                        break;
                    }
                    if let Some(col) = quoted_identifiers(col_trimmed).first() {
                        columns.push(col.clone());
                    }
                }
                if db.tables.iter().any(|t| t.schema == schema && t.name == name) {
                    return Err(AppError::Engine(format!(
                        "relation \"{}\".\"{}\" already exists",
                        schema, name
                    )));
                }
                db.tables.push(FakeTable {
                    schema,
                    name,
                    columns,
                    rows: Vec::new(),
                });
            } else if let Some(rest) = trimmed.strip_prefix("INSERT INTO ") {
                let idents = quoted_identifiers(rest.split('(').next().unwrap_or(""));
                let (schema, name) = qualify(&idents)?;
                let values = rest
                    .find("VALUES (")
                    .map(|pos| rest[pos + "VALUES (".len()..].trim_end_matches(';').trim_end_matches(')'))
                    .ok_or_else(|| {
                        AppError::Engine(format!("malformed INSERT statement: {}", trimmed))
                    })?;
                let table = db
                    .tables
                    .iter_mut()
                    .find(|t| t.schema == schema && t.name == name)
                    .ok_or_else(|| {
                        AppError::Engine(format!("relation \"{}\".\"{}\" does not exist", schema, name))
                    })?;
                table.rows.push(values.to_string());
            } else if trimmed.starts_with("CREATE INDEX ")
                && (trimmed.contains("USING hnsw") || trimmed.contains("USING ivfflat"))
            {
                db.vector_indexes
                    .push(trimmed.trim_end_matches(';').to_string());
            } else if let Some(rest) = trimmed.strip_prefix("DROP INDEX IF EXISTS ") {
                let idents = quoted_identifiers(rest);
                if let Some(index_name) = idents.last() {
                    db.vector_indexes.retain(|def| !def.contains(index_name.as_str()));
                }
            }
            // BEGIN/COMMIT, comments, schemas, sequences, constraints: no-op.
        }

        Ok(())
    }

    async fn database_exists(&self, target_db_url: &str) -> Result<bool> {
        let db_name = db_name_from_url(target_db_url)?;
        Ok(self.databases.lock().unwrap().contains_key(&db_name))
    }

    async fn create_database(&self, target_db_url: &str) -> Result<()> {
        let db_name = db_name_from_url(target_db_url)?;
        let mut databases = self.databases.lock().unwrap();
        if databases.contains_key(&db_name) {
            return Err(AppError::Engine(format!(
                "database \"{}\" already exists",
                db_name
            )));
        }
        databases.insert(db_name, FakeDatabase::default());
        Ok(())
    }

    async fn drop_database(&self, target_db_url: &str) -> Result<()> {
        let db_name = db_name_from_url(target_db_url)?;
        if db_name.eq_ignore_ascii_case("postgres") || db_name.starts_with("template") {
            return Err(AppError::InvalidInput(format!(
                "Refusing to drop system database '{}'",
                db_name
            )));
        }
        self.databases.lock().unwrap().remove(&db_name);
        Ok(())
    }

    async fn table_count(&self, target_db_url: &str) -> Result<i64> {
        let db_name = db_name_from_url(target_db_url)?;
        let databases = self.databases.lock().unwrap();
        let db = databases
            .get(&db_name)
            .ok_or_else(|| AppError::Engine(format!("database '{}' does not exist", db_name)))?;
        Ok(db.tables.len() as i64)
    }

    async fn vector_index_count(&self, target_db_url: &str) -> Result<i64> {
        let db_name = db_name_from_url(target_db_url)?;
        let databases = self.databases.lock().unwrap();
        let db = databases
            .get(&db_name)
            .ok_or_else(|| AppError::Engine(format!("database '{}' does not exist", db_name)))?;
        Ok(db.vector_indexes.len() as i64)
    }

    async fn probe_vector_index(&self, target_db_url: &str) -> Result<()> {
        let count = self.vector_index_count(target_db_url).await?;
        if count == 0 {
            return Err(AppError::Verification(
                "No vector-similarity index available to probe".to_string(),
            ));
        }
        Ok(())
    }

    async fn start_recovery(
        &self,
        target_db_url: &str,
        wal_source: &Path,
        recovery_target_time: DateTime<Utc>,
    ) -> Result<()> {
        let db_name = db_name_from_url(target_db_url)?;
        self.recovery_starts.lock().unwrap().push(RecoveryStart {
            database: db_name.clone(),
            wal_source: wal_source.to_path_buf(),
            target_time: recovery_target_time,
        });
        let polls = *self.recovery_polls_needed.lock().unwrap();
        self.recovery_remaining.lock().unwrap().insert(db_name, polls);
        Ok(())
    }

    async fn is_in_recovery(&self, target_db_url: &str) -> anyhow::Result<bool> {
        let db_name = db_name_from_url(target_db_url)?;
        let mut remaining = self.recovery_remaining.lock().unwrap();
        match remaining.get_mut(&db_name) {
            Some(0) | None => Ok(false),
            Some(n) => {
                *n -= 1;
                Ok(true)
            }
        }
    }
}

fn render_schema(db: &FakeDatabase, out: &mut String) {
    writeln!(out, "-- PHASE 1: TABLE STRUCTURES").ok();
    let mut seen = std::collections::BTreeSet::new();
    for table in &db.tables {
        if table.schema != "public" && seen.insert(table.schema.clone()) {
            writeln!(out, "CREATE SCHEMA IF NOT EXISTS \"{}\";", table.schema).ok();
        }
    }
    for table in &db.tables {
        writeln!(out, "CREATE TABLE \"{}\".\"{}\" (", table.schema, table.name).ok();
        for (i, col) in table.columns.iter().enumerate() {
            let comma = if i + 1 < table.columns.len() { "," } else { "" };
            writeln!(out, "  \"{}\" text{}", col, comma).ok();
        }
        writeln!(out, ");").ok();
        writeln!(out).ok();
    }
    writeln!(out, "\n-- PHASE 2: SEQUENCES").ok();
}

fn render_data(db: &FakeDatabase, out: &mut String) {
    writeln!(out, "\n-- PHASE 3: TABLE DATA").ok();
    for table in &db.tables {
        writeln!(out, "\n{}{}.{}", DATA_SECTION_PREFIX, table.schema, table.name).ok();
        writeln!(out, "-- Total rows: {}", table.rows.len()).ok();
        let column_list = table
            .columns
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ");
        for row in &table.rows {
            writeln!(
                out,
                "INSERT INTO \"{}\".\"{}\" ({}) VALUES ({});",
                table.schema, table.name, column_list, row
            )
            .ok();
        }
    }
}

fn render_indexes(db: &FakeDatabase, out: &mut String) {
    writeln!(out, "\n-- PHASE 4: CONSTRAINTS AND INDEXES").ok();
    for def in &db.vector_indexes {
        writeln!(out, "{};", def.trim_end_matches(';')).ok();
    }
}

/// Collects the contents of double-quoted identifiers in order.
fn quoted_identifiers(fragment: &str) -> Vec<String> {
    let mut idents = Vec::new();
    let mut rest = fragment;
    while let Some(start) = rest.find('"') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('"') else { break };
        idents.push(after[..end].to_string());
        rest = &after[end + 1..];
    }
    idents
}

fn qualify(idents: &[String]) -> Result<(String, String)> {
    match idents {
        [name] => Ok(("public".to_string(), name.clone())),
        [schema, name, ..] => Ok((schema.clone(), name.clone())),
        [] => Err(AppError::Engine(
            "statement names no quoted identifiers".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(db: &str) -> String {
        format!("postgres://vault@localhost:5432/{}", db)
    }

    #[tokio::test]
    async fn test_export_import_round_trip() -> Result<()> {
        let engine = InMemoryEngine::new();
        engine.seed_table(
            "app",
            "users",
            &["id", "email"],
            &["1, 'a@example.com'", "2, 'b@example.com'"],
        );
        engine.add_vector_index(
            "app",
            "CREATE INDEX \"users_emb_idx\" ON \"public\".\"users\" USING hnsw (\"emb\" vector_l2_ops)",
        );

        let dump = engine.export(&url("app"), ExportScope::Full).await?;
        assert!(super::super::is_structured_export(&dump));

        engine.create_database(&url("restored")).await?;
        engine.import(&url("restored"), &dump).await?;

        assert_eq!(engine.table_count(&url("restored")).await?, 1);
        assert_eq!(engine.vector_index_count(&url("restored")).await?, 1);
        assert_eq!(engine.row_count("restored", "users"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_schema_only_export_carries_no_rows() -> Result<()> {
        let engine = InMemoryEngine::new();
        engine.seed_table("app", "users", &["id"], &["1"]);

        let dump = engine.export(&url("app"), ExportScope::SchemaOnly).await?;
        let text = String::from_utf8(dump.clone()).unwrap();
        assert!(text.contains("CREATE TABLE \"public\".\"users\""));
        assert!(!text.contains("INSERT INTO"));

        engine.create_database(&url("restored")).await?;
        engine.import(&url("restored"), &dump).await?;
        assert_eq!(engine.row_count("restored", "users"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_export() {
        let engine = InMemoryEngine::new();
        engine.seed_table("app", "users", &["id"], &[]);
        engine.mark_unreachable(&url("app"));

        assert!(engine.ping(&url("app")).await.is_err());
        assert!(engine.export(&url("app"), ExportScope::Full).await.is_err());
    }

    #[tokio::test]
    async fn test_recovery_poll_countdown() -> Result<()> {
        let engine = InMemoryEngine::new();
        engine.add_database("restored", FakeDatabase::default());
        engine.set_recovery_polls(2);

        engine
            .start_recovery(&url("restored"), Path::new("/wal"), Utc::now())
            .await?;
        assert!(engine.is_in_recovery(&url("restored")).await.unwrap());
        assert!(engine.is_in_recovery(&url("restored")).await.unwrap());
        assert!(!engine.is_in_recovery(&url("restored")).await.unwrap());
        assert_eq!(engine.recovery_starts().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_refuses_system_database() {
        let engine = InMemoryEngine::new();
        assert!(engine.drop_database(&url("postgres")).await.is_err());
    }
}
