// ABOUTME: JSON interchange document holding a replayed catalog pair
// ABOUTME: Loading it skips changelog replay entirely on later runs

use crate::catalog::{CatalogSet, ColumnDefinition, CreationOrderIndex, SchemaCatalog, TableDefinition};
use crate::error::ReplayError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct InterchangeDocument {
    /// dialect -> table name -> table records (one per table)
    databases: BTreeMap<String, BTreeMap<String, Vec<TableRecord>>>,
    tables_indexes: BTreeMap<String, u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableRecord {
    column_types: Vec<ColumnRecord>,
    table_name: String,
    select_stmt: String,
    insert_stmt: String,
    delete_stmt: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnRecord {
    index: usize,
    column_name: String,
    column_type: Option<String>,
}

impl From<&TableDefinition> for TableRecord {
    fn from(table: &TableDefinition) -> Self {
        TableRecord {
            column_types: table
                .columns
                .iter()
                .map(|c| ColumnRecord {
                    index: c.ordinal,
                    column_name: c.name.clone(),
                    column_type: c.dialect_type.clone(),
                })
                .collect(),
            table_name: table.name.clone(),
            select_stmt: table.select_sql.clone(),
            insert_stmt: table.insert_sql.clone(),
            delete_stmt: table.delete_sql.clone(),
        }
    }
}

impl From<TableRecord> for TableDefinition {
    fn from(record: TableRecord) -> Self {
        let mut columns: Vec<ColumnDefinition> = record
            .column_types
            .into_iter()
            .map(|c| ColumnDefinition {
                name: c.column_name,
                dialect_type: c.column_type,
                ordinal: c.index,
            })
            .collect();
        columns.sort_by_key(|c| c.ordinal);
        TableDefinition {
            name: record.table_name,
            columns,
            select_sql: record.select_stmt,
            insert_sql: record.insert_stmt,
            delete_sql: record.delete_stmt,
        }
    }
}

/// Serialize a replayed catalog set as a pretty-printed JSON document.
pub fn to_json(catalogs: &CatalogSet) -> Result<String> {
    let databases = catalogs
        .catalogs()
        .map(|catalog| {
            let tables = catalog
                .tables()
                .map(|table| (table.name.clone(), vec![TableRecord::from(table)]))
                .collect();
            (catalog.dialect().to_string(), tables)
        })
        .collect();

    let document = InterchangeDocument {
        databases,
        tables_indexes: catalogs.order().entries().clone(),
    };
    serde_json::to_string_pretty(&document).context("Failed to serialize catalog document")
}

/// Write the interchange document for `catalogs` to `path`.
///
/// # Errors
///
/// Returns an error if serialization fails or the file cannot be written.
pub fn save(catalogs: &CatalogSet, path: &Path) -> Result<()> {
    let json = to_json(catalogs)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write catalog document {}", path.display()))?;
    tracing::info!("✓ Catalog written to {}", path.display());
    Ok(())
}

/// Load an interchange document and check it has a catalog for every
/// dialect in `dialects`.
///
/// The SQL templates are taken verbatim; nothing is regenerated.
///
/// # Errors
///
/// Returns [`ReplayError`] if the file cannot be read, is not a valid
/// document, or lacks one of the requested dialects.
pub fn load(path: &Path, dialects: &[&str]) -> Result<CatalogSet, ReplayError> {
    let text = std::fs::read_to_string(path).map_err(|e| ReplayError::io(path, e))?;
    from_json(&text, path, dialects)
}

pub(crate) fn from_json(
    text: &str,
    path: &Path,
    dialects: &[&str],
) -> Result<CatalogSet, ReplayError> {
    let document: InterchangeDocument =
        serde_json::from_str(text).map_err(|e| ReplayError::interchange(path, e.to_string()))?;

    let order = CreationOrderIndex::from_entries(document.tables_indexes);
    let mut databases = document.databases;
    let mut catalogs = Vec::new();

    for dialect in dialects {
        let key = databases
            .keys()
            .find(|name| name.eq_ignore_ascii_case(dialect))
            .cloned()
            .ok_or_else(|| ReplayError::MissingDialect {
                path: path.to_path_buf(),
                dialect: dialect.to_string(),
            })?;
        let tables = databases.remove(&key).unwrap_or_default();

        let mut catalog = SchemaCatalog::new(key);
        for (table_name, records) in tables {
            let record = records.into_iter().next().ok_or_else(|| {
                ReplayError::interchange(path, format!("table '{}' has no record", table_name))
            })?;
            if order.get(&record.table_name).is_none() {
                return Err(ReplayError::interchange(
                    path,
                    format!("table '{}' has no creation index", record.table_name),
                ));
            }
            catalog
                .push(TableDefinition::from(record))
                .map_err(|e| ReplayError::interchange(path, e.to_string()))?;
        }
        catalog.sort_by_creation(&order);
        catalogs.push(catalog);
    }

    Ok(CatalogSet::from_parts(catalogs, order))
}
