// clustervault/src/restore/partial.rs
//
// Object-scoped extraction from a structured text export. Boundaries come
// from the dump writer's own section markers and statement heads, and every
// identifier comparison is an exact equality on the parsed identifier, so
// an object whose name is a substring of another's can never be
// mis-extracted.

use crate::engine::{self, DUMP_HEADER};
use crate::errors::{AppError, Result};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    Schema,
}

impl ObjectKind {
    pub fn from_selector(s: &str) -> Result<Self> {
        match s {
            "table" => Ok(Self::Table),
            "schema" => Ok(Self::Schema),
            other => Err(AppError::InvalidInput(format!(
                "Unknown object kind '{}', expected table|schema",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectSelector {
    pub kind: ObjectKind,
    /// Bare table name, `schema.table`, or a schema name.
    pub name: String,
}

#[derive(Debug)]
struct TableBlock {
    schema: String,
    name: String,
    create_lines: Vec<String>,
    inserts: Vec<String>,
    trailing: Vec<String>,
}

/// Extracts one table's (or one schema's) definition and data from a raw
/// decoded export. Fails fast with `UnsupportedFormat` for anything that is
/// not one of our structured text exports, before any target write.
pub fn extract_object(raw: &[u8], selector: &ObjectSelector) -> Result<Vec<u8>> {
    if !engine::is_structured_export(raw) {
        return Err(AppError::UnsupportedFormat(
            "the export stream does not carry the structured dump header; \
             binary or foreign dump formats cannot be partially restored"
                .to_string(),
        ));
    }
    let text = std::str::from_utf8(raw).map_err(|_| {
        AppError::UnsupportedFormat("the export stream is not valid UTF-8".to_string())
    })?;

    let tables = parse_tables(text);

    let selected: Vec<&TableBlock> = match selector.kind {
        ObjectKind::Table => {
            let (want_schema, want_name) = split_selector(&selector.name);
            let matches: Vec<&TableBlock> = tables
                .iter()
                .filter(|t| {
                    t.name == want_name
                        && want_schema.as_deref().map(|s| t.schema == s).unwrap_or(true)
                })
                .collect();
            match matches.len() {
                0 => {
                    return Err(AppError::InvalidInput(format!(
                        "Table '{}' not found in the export",
                        selector.name
                    )))
                }
                1 => matches,
                _ => {
                    return Err(AppError::InvalidInput(format!(
                        "Table name '{}' is ambiguous across schemas; qualify it as schema.table",
                        selector.name
                    )))
                }
            }
        }
        ObjectKind::Schema => {
            let matches: Vec<&TableBlock> = tables
                .iter()
                .filter(|t| t.schema == selector.name)
                .collect();
            if matches.is_empty() {
                return Err(AppError::InvalidInput(format!(
                    "Schema '{}' has no tables in the export",
                    selector.name
                )));
            }
            matches
        }
    };

    let mut out = String::new();
    writeln!(out, "{}", DUMP_HEADER).ok();
    writeln!(
        out,
        "-- Database: {}",
        engine::export_source_database(raw).unwrap_or_else(|_| "unknown".to_string())
    )
    .ok();
    writeln!(out, "-- Scope: partial ({})", selector.name).ok();
    writeln!(out).ok();
    writeln!(out, "BEGIN;").ok();

    let mut seen_schemas = std::collections::BTreeSet::new();
    for table in &selected {
        if table.schema != "public" && seen_schemas.insert(table.schema.clone()) {
            writeln!(out, "CREATE SCHEMA IF NOT EXISTS \"{}\";", table.schema).ok();
        }
    }

    for table in &selected {
        for line in &table.create_lines {
            writeln!(out, "{}", line).ok();
        }
        writeln!(out).ok();
    }

    for table in &selected {
        writeln!(
            out,
            "{}{}.{}",
            engine::DATA_SECTION_PREFIX,
            table.schema,
            table.name
        )
        .ok();
        writeln!(out, "-- Total rows: {}", table.inserts.len()).ok();
        for insert in &table.inserts {
            writeln!(out, "{}", insert).ok();
        }
        writeln!(out).ok();
    }

    for table in &selected {
        for line in &table.trailing {
            writeln!(out, "{}", line).ok();
        }
    }

    writeln!(out, "\nCOMMIT;").ok();
    Ok(out.into_bytes())
}

fn split_selector(name: &str) -> (Option<String>, String) {
    match name.split_once('.') {
        Some((schema, table)) => (Some(schema.to_string()), table.to_string()),
        None => (None, name.to_string()),
    }
}

fn parse_tables(text: &str) -> Vec<TableBlock> {
    let mut tables: Vec<TableBlock> = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let trimmed = line.trim_end();

        if let Some(rest) = trimmed.trim_start().strip_prefix("CREATE TABLE ") {
            let Some((schema, name)) = qualified_from(rest) else {
                continue;
            };
            let mut create_lines = vec![trimmed.to_string()];
            // The block ends at the line closing the column list.
            if !trimmed.ends_with(';') {
                for block_line in lines.by_ref() {
                    create_lines.push(block_line.trim_end().to_string());
                    if block_line.trim_start().starts_with(')') {
                        break;
                    }
                }
            }
            tables.push(TableBlock {
                schema,
                name,
                create_lines,
                inserts: Vec::new(),
                trailing: Vec::new(),
            });
        } else if let Some(rest) = trimmed.trim_start().strip_prefix("INSERT INTO ") {
            let head = rest.split('(').next().unwrap_or("");
            if let Some((schema, name)) = qualified_from(head) {
                if let Some(table) = find_table(&mut tables, &schema, &name) {
                    table.inserts.push(trimmed.trim_start().to_string());
                }
            }
        } else if let Some(rest) = trimmed.trim_start().strip_prefix("ALTER TABLE ") {
            if let Some((schema, name)) = qualified_from(rest) {
                if let Some(table) = find_table(&mut tables, &schema, &name) {
                    table.trailing.push(trimmed.trim_start().to_string());
                }
            }
        } else if trimmed.trim_start().starts_with("CREATE INDEX")
            || trimmed.trim_start().starts_with("CREATE UNIQUE INDEX")
        {
            if let Some(target) = index_target(trimmed) {
                if let Some(table) = find_table(&mut tables, &target.0, &target.1) {
                    table.trailing.push(trimmed.trim_start().to_string());
                }
            }
        }
    }

    tables
}

fn find_table<'a>(
    tables: &'a mut [TableBlock],
    schema: &str,
    name: &str,
) -> Option<&'a mut TableBlock> {
    tables
        .iter_mut()
        .find(|t| t.schema == schema && t.name == name)
}

/// Parses a `"schema"."table"` or `"table"` head into exact identifiers.
fn qualified_from(fragment: &str) -> Option<(String, String)> {
    let mut idents = Vec::new();
    let mut rest = fragment;
    while rest.starts_with('"') || rest.starts_with(".\"") {
        rest = rest.trim_start_matches('.');
        let after = &rest[1..];
        let end = after.find('"')?;
        idents.push(after[..end].to_string());
        rest = &after[end + 1..];
        if !rest.starts_with('.') {
            break;
        }
    }
    match idents.as_slice() {
        [name] => Some(("public".to_string(), name.clone())),
        [schema, name] => Some((schema.clone(), name.clone())),
        _ => None,
    }
}

/// Resolves the `ON <target>` of a CREATE INDEX statement, which the engine
/// may emit quoted or unquoted.
fn index_target(statement: &str) -> Option<(String, String)> {
    let on_pos = statement.find(" ON ")?;
    let target = statement[on_pos + 4..]
        .split_whitespace()
        .next()?
        .trim_end_matches(';');

    if target.starts_with('"') {
        return qualified_from(target);
    }
    match target.split_once('.') {
        Some((schema, table)) => Some((schema.to_string(), table.to_string())),
        None => Some(("public".to_string(), target.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::InMemoryEngine;
    use crate::engine::{DatabaseEngine, ExportScope};

    async fn sample_dump() -> Vec<u8> {
        let engine = InMemoryEngine::new();
        // "user" is a textual substring of "users": the classic
        // mis-extraction trap.
        engine.seed_table("app", "user", &["id"], &["1"]);
        engine.seed_table("app", "users", &["id"], &["10", "11", "12"]);
        engine.seed_table("app", "orders", &["id", "user_id"], &["1, 1"]);
        engine
            .export("postgres://vault@localhost:5432/app", ExportScope::Full)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_extract_single_table_exact_match() -> Result<()> {
        let dump = sample_dump().await;
        let fragment = extract_object(
            &dump,
            &ObjectSelector {
                kind: ObjectKind::Table,
                name: "user".to_string(),
            },
        )?;
        let text = String::from_utf8(fragment).unwrap();

        assert!(text.contains("CREATE TABLE \"public\".\"user\""));
        assert!(text.contains("INSERT INTO \"public\".\"user\""));
        // Exact-identifier matching: nothing from "users" leaks in.
        assert!(!text.contains("CREATE TABLE \"public\".\"users\""));
        assert!(!text.contains("INSERT INTO \"public\".\"users\""));
        assert!(!text.contains("orders"));
        Ok(())
    }

    #[tokio::test]
    async fn test_extracted_fragment_imports_cleanly() -> Result<()> {
        let dump = sample_dump().await;
        let fragment = extract_object(
            &dump,
            &ObjectSelector {
                kind: ObjectKind::Table,
                name: "users".to_string(),
            },
        )?;

        let engine = InMemoryEngine::new();
        engine.add_database("target", Default::default());
        engine
            .import("postgres://vault@localhost:5432/target", &fragment)
            .await?;
        assert_eq!(engine.row_count("target", "users"), 3);
        assert_eq!(engine.row_count("target", "user"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_extract_whole_schema() -> Result<()> {
        let dump = sample_dump().await;
        let fragment = extract_object(
            &dump,
            &ObjectSelector {
                kind: ObjectKind::Schema,
                name: "public".to_string(),
            },
        )?;
        let text = String::from_utf8(fragment).unwrap();
        assert!(text.contains("\"user\""));
        assert!(text.contains("\"users\""));
        assert!(text.contains("\"orders\""));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_table_is_an_error() {
        let dump = sample_dump().await;
        let err = extract_object(
            &dump,
            &ObjectSelector {
                kind: ObjectKind::Table,
                name: "missing".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_non_structured_stream_is_rejected() {
        // pg_dump custom-format magic.
        let err = extract_object(
            b"PGDMP\x01\x0e\x00binary payload",
            &ObjectSelector {
                kind: ObjectKind::Table,
                name: "users".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_index_target_parsing() {
        assert_eq!(
            index_target("CREATE INDEX idx ON public.users USING btree (id);"),
            Some(("public".to_string(), "users".to_string()))
        );
        assert_eq!(
            index_target("CREATE INDEX \"idx\" ON \"audit\".\"events\" USING hnsw (\"emb\" vector_l2_ops);"),
            Some(("audit".to_string(), "events".to_string()))
        );
    }
}
