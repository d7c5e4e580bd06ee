// ABOUTME: Verifies transferred data by walking source and target rows in lockstep
// ABOUTME: Mismatches and decode failures are logged and counted, never fatal

use crate::catalog::{ColumnDefinition, SchemaCatalog, TableDefinition};
use crate::changelog::TypeCategory;
use crate::db::{Database, Row, RowReader, Value, DEFAULT_BATCH_SIZE};
use crate::migration::large_object::{self, Direction, LargeObjectRules};
use crate::utils::sanitize_identifier;
use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// One column value that differs between source and target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub table: String,
    pub column: String,
    pub column_type: String,
    pub source_value: String,
    pub target_value: String,
}

/// Outcome of a comparison run.
#[derive(Debug, Default, Clone)]
pub struct CompareReport {
    pub tables_compared: usize,
    pub rows_compared: u64,
    pub mismatches: Vec<Mismatch>,
    /// Values or rows that could not be decoded on either side
    pub errors: u64,
    /// Tables whose rows could not be read, with the reason
    pub failed_tables: Vec<(String, String)>,
}

impl CompareReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.errors == 0 && self.failed_tables.is_empty()
    }
}

/// Row-by-row, column-by-column comparison of two databases.
///
/// Rows are matched purely by position: both sides run their table's
/// SELECT template and the n-th source row is compared with the n-th
/// target row. Both sides are read through cursors in batches.
pub struct CompareEngine {
    rules: LargeObjectRules,
    batch_size: usize,
}

impl CompareEngine {
    pub fn new(rules: LargeObjectRules) -> Self {
        Self {
            rules,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Rows fetched per round trip on each side.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Compare every source table that also exists in the target catalog.
    pub async fn compare(
        &self,
        source_catalog: &SchemaCatalog,
        target_catalog: &SchemaCatalog,
        source: &mut dyn Database,
        target: &mut dyn Database,
    ) -> CompareReport {
        let mut report = CompareReport::default();
        tracing::info!("Comparing data in {} tables...", source_catalog.len());

        for source_table in source_catalog.tables() {
            let Some(target_table) = target_catalog.table(&source_table.name) else {
                tracing::debug!(
                    "Table {} is not in the target catalog, not compared",
                    sanitize_identifier(&source_table.name)
                );
                continue;
            };
            if let Err(e) = self
                .compare_table(source_table, target_table, source, target, &mut report)
                .await
            {
                tracing::warn!(
                    "⚠ Could not compare table {}: {:#}",
                    sanitize_identifier(&source_table.name),
                    e
                );
                report
                    .failed_tables
                    .push((source_table.name.clone(), format!("{:#}", e)));
            }
        }

        if report.is_clean() {
            tracing::info!(
                "✓ Comparison complete: {} rows in {} tables match",
                report.rows_compared,
                report.tables_compared
            );
        } else {
            tracing::warn!(
                "⚠ Comparison complete: {} mismatches, {} decode errors, {} tables failed",
                report.mismatches.len(),
                report.errors,
                report.failed_tables.len()
            );
        }
        report
    }

    async fn compare_table(
        &self,
        source_table: &TableDefinition,
        target_table: &TableDefinition,
        source: &mut dyn Database,
        target: &mut dyn Database,
        report: &mut CompareReport,
    ) -> Result<()> {
        let mut source_rows =
            RowReader::open(source, &source_table.select_sql, self.batch_size).await?;
        let opened = RowReader::open(target, &target_table.select_sql, self.batch_size).await;
        let mut target_rows = match opened {
            Ok(rows) => rows,
            Err(e) => {
                source_rows.close(source).await;
                return Err(e);
            }
        };
        report.tables_compared += 1;

        let outcome = self
            .compare_rows(
                source_table,
                target_table,
                (&mut source_rows, &mut target_rows),
                source,
                target,
                report,
            )
            .await;
        source_rows.close(source).await;
        target_rows.close(target).await;
        outcome
    }

    async fn compare_rows(
        &self,
        source_table: &TableDefinition,
        target_table: &TableDefinition,
        (source_rows, target_rows): (&mut RowReader, &mut RowReader),
        source: &mut dyn Database,
        target: &mut dyn Database,
        report: &mut CompareReport,
    ) -> Result<()> {
        let table = sanitize_identifier(&source_table.name);
        loop {
            let left = source_rows.next(source).await?;
            let right = target_rows.next(target).await?;
            let (source_row, target_row) = match (left, right) {
                (Some(left), Some(right)) => (left, right),
                (Some(_), None) => {
                    let missing = 1 + source_rows.drain(source).await?;
                    tracing::warn!(
                        "⚠ Target table {} has {} fewer rows than the source",
                        table,
                        missing
                    );
                    break;
                }
                (None, Some(_)) => {
                    let extra = 1 + target_rows.drain(target).await?;
                    tracing::warn!(
                        "⚠ Target table {} has {} more rows than the source",
                        table,
                        extra
                    );
                    break;
                }
                (None, None) => break,
            };

            match (source_row, target_row) {
                (Ok(source_row), Ok(target_row)) => {
                    self.compare_row(
                        source_table,
                        target_table,
                        &source_row,
                        &target_row,
                        source,
                        target,
                        report,
                    )
                    .await;
                }
                (source_row, target_row) => {
                    for e in [source_row, target_row].into_iter().filter_map(Result::err) {
                        tracing::warn!("⚠ Table: {}, row {}: {:#}", table, report.rows_compared + 1, e);
                        report.errors += 1;
                    }
                }
            }
            report.rows_compared += 1;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn compare_row(
        &self,
        source_table: &TableDefinition,
        target_table: &TableDefinition,
        source_row: &Row,
        target_row: &Row,
        source: &mut dyn Database,
        target: &mut dyn Database,
        report: &mut CompareReport,
    ) {
        let table = sanitize_identifier(&source_table.name);
        for column in &source_table.columns {
            let category = column.category();
            let translation = self.rules.translation(&target_table.name, &column.name, category);
            match self
                .compare_value(column, category, translation, source_row, target_row, source, target)
                .await
            {
                Ok(None) => {}
                Ok(Some((source_value, target_value))) => {
                    let mismatch = Mismatch {
                        table: source_table.name.clone(),
                        column: column.name.clone(),
                        column_type: column.dialect_type.clone().unwrap_or_default(),
                        source_value,
                        target_value,
                    };
                    tracing::warn!(
                        "⚠ table: {}, column: {}, type: {}, source: {}, target: {}",
                        table,
                        sanitize_identifier(&mismatch.column),
                        mismatch.column_type,
                        mismatch.source_value,
                        mismatch.target_value
                    );
                    report.mismatches.push(mismatch);
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠ Table: {}, column: {}, columnType: {}, error: {:#}",
                        table,
                        sanitize_identifier(&column.name),
                        column.dialect_type.as_deref().unwrap_or(""),
                        e
                    );
                    report.errors += 1;
                }
            }
        }
    }

    /// `Some((source, target))` when the values differ.
    #[allow(clippy::too_many_arguments)]
    async fn compare_value(
        &self,
        column: &ColumnDefinition,
        category: TypeCategory,
        translation: Option<Direction>,
        source_row: &Row,
        target_row: &Row,
        source: &mut dyn Database,
        target: &mut dyn Database,
    ) -> Result<Option<(String, String)>> {
        let name = column.name.as_str();
        let (left, right) = match category {
            TypeCategory::Unknown => return Ok(None),
            TypeCategory::Text => {
                let left = match translation {
                    Some(Direction::FromLargeObject) => resolve_handle(source_row, name, source).await?,
                    _ => source_row.get(name, TypeCategory::Text)?,
                };
                let right = match translation {
                    Some(Direction::ToLargeObject) => resolve_handle(target_row, name, target).await?,
                    _ => target_row.get(name, TypeCategory::Text)?,
                };
                if left.is_null() || right.is_null() {
                    return Ok(None);
                }
                (left, right)
            }
            TypeCategory::Binary => (
                encode_binary(source_row.get(name, category)?),
                encode_binary(target_row.get(name, category)?),
            ),
            category => (source_row.get(name, category)?, target_row.get(name, category)?),
        };

        if left == right {
            Ok(None)
        } else {
            Ok(Some((left.to_string(), right.to_string())))
        }
    }
}

/// Text behind a large-object handle stored in `column`.
async fn resolve_handle(row: &Row, column: &str, database: &mut dyn Database) -> Result<Value> {
    let Value::Int64(handle) = row.get(column, TypeCategory::Int64)? else {
        return Ok(Value::Null);
    };
    let text = large_object::read_text(database.large_objects()?, handle).await?;
    Ok(text.map(Value::Text).unwrap_or(Value::Null))
}

fn encode_binary(value: Value) -> Value {
    match value {
        Value::Bytes(bytes) => Value::Text(STANDARD.encode(bytes)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::SqliteDatabase;

    fn table(name: &str, columns: &[(&str, &str)]) -> TableDefinition {
        let mut table = TableDefinition::new(name);
        for (column, ty) in columns {
            table
                .columns
                .push(ColumnDefinition::new(*column, Some(ty.to_string())));
        }
        table.generate_sql();
        table
    }

    fn catalog(dialect: &str, tables: Vec<TableDefinition>) -> SchemaCatalog {
        let mut catalog = SchemaCatalog::new(dialect);
        for t in tables {
            catalog.push(t).unwrap();
        }
        catalog
    }

    fn database(sql: &str) -> SqliteDatabase {
        let mut db = SqliteDatabase::open("sqlite::memory:").unwrap();
        db.execute_batch(sql).unwrap();
        db
    }

    async fn run(source_sql: &str, target_sql: &str, columns: &[(&str, &str)]) -> CompareReport {
        let mut source = database(source_sql);
        let mut target = database(target_sql);
        CompareEngine::new(LargeObjectRules::default())
            .compare(
                &catalog("mysql", vec![table("t", columns)]),
                &catalog("postgresql", vec![table("t", columns)]),
                &mut source,
                &mut target,
            )
            .await
    }

    #[tokio::test]
    async fn test_equal_decimals_with_different_scale_match() {
        let report = run(
            "CREATE TABLE t (id INTEGER, amount TEXT); INSERT INTO t VALUES (1, '10.50');",
            "CREATE TABLE t (id INTEGER, amount TEXT); INSERT INTO t VALUES (1, '10.5');",
            &[("id", "int"), ("amount", "number(10,2)")],
        )
        .await;
        assert!(report.is_clean());
        assert_eq!(report.rows_compared, 1);
    }

    #[tokio::test]
    async fn test_decimal_difference_is_one_mismatch() {
        let report = run(
            "CREATE TABLE t (id INTEGER, amount TEXT); INSERT INTO t VALUES (1, '10.50');",
            "CREATE TABLE t (id INTEGER, amount TEXT); INSERT INTO t VALUES (1, '10.51');",
            &[("id", "int"), ("amount", "number(10,2)")],
        )
        .await;
        assert_eq!(report.mismatches.len(), 1);
        let mismatch = &report.mismatches[0];
        assert_eq!(mismatch.table, "t");
        assert_eq!(mismatch.column, "amount");
        assert_eq!(mismatch.source_value, "10.50");
        assert_eq!(mismatch.target_value, "10.51");
    }

    #[tokio::test]
    async fn test_text_null_on_either_side_is_skipped() {
        let report = run(
            "CREATE TABLE t (note TEXT); INSERT INTO t VALUES (NULL), ('same'), ('a');",
            "CREATE TABLE t (note TEXT); INSERT INTO t VALUES ('x'), ('same'), ('b');",
            &[("note", "varchar(10)")],
        )
        .await;
        assert_eq!(report.rows_compared, 3);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].source_value, "a");
    }

    #[tokio::test]
    async fn test_null_integer_against_value_is_a_mismatch() {
        let report = run(
            "CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (NULL);",
            "CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (0);",
            &[("n", "int")],
        )
        .await;
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].source_value, "null");
    }

    #[tokio::test]
    async fn test_binary_compared_after_encoding() {
        let report = run(
            "CREATE TABLE t (raw BLOB); INSERT INTO t VALUES (x'0102'), (x'0a');",
            "CREATE TABLE t (raw BLOB); INSERT INTO t VALUES (x'0102'), (x'0b');",
            &[("raw", "blob")],
        )
        .await;
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].source_value, "Cg==");
        assert_eq!(report.mismatches[0].target_value, "Cw==");
    }

    #[tokio::test]
    async fn test_decode_error_is_counted_and_comparison_continues() {
        let report = run(
            "CREATE TABLE t (n TEXT, m INTEGER); INSERT INTO t VALUES ('oops', 1), ('2', 2);",
            "CREATE TABLE t (n TEXT, m INTEGER); INSERT INTO t VALUES ('1', 1), ('2', 3);",
            &[("n", "int"), ("m", "int")],
        )
        .await;
        assert_eq!(report.errors, 1);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.rows_compared, 2);
    }

    #[tokio::test]
    async fn test_row_count_difference_compares_common_prefix() {
        let report = run(
            "CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1), (2), (3);",
            "CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1);",
            &[("n", "int")],
        )
        .await;
        assert_eq!(report.rows_compared, 1);
        assert!(report.mismatches.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_row_keeps_rows_aligned() {
        let mut source = database(
            "CREATE TABLE t (id INTEGER, note TEXT);
             INSERT INTO t VALUES (1, 'ok'), (2, CAST(x'ff' AS TEXT)), (3, 'fine');",
        );
        let mut target = database(
            "CREATE TABLE t (id INTEGER, note TEXT);
             INSERT INTO t VALUES (1, 'ok'), (2, 'x'), (3, 'changed');",
        );
        let tables = || vec![table("t", &[("id", "int"), ("note", "varchar(10)")])];

        let report = CompareEngine::new(LargeObjectRules::default())
            .with_batch_size(2)
            .compare(
                &catalog("mysql", tables()),
                &catalog("postgresql", tables()),
                &mut source,
                &mut target,
            )
            .await;

        assert!(report.failed_tables.is_empty());
        assert_eq!(report.rows_compared, 3);
        assert_eq!(report.errors, 1);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].source_value, "fine");
        assert_eq!(report.mismatches[0].target_value, "changed");
    }

    #[tokio::test]
    async fn test_extra_target_rows_are_reported_not_compared() {
        let mut source = database("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1);");
        let mut target = database("CREATE TABLE t (n INTEGER); INSERT INTO t VALUES (1), (2), (3);");
        let tables = || vec![table("t", &[("n", "int")])];

        let report = CompareEngine::new(LargeObjectRules::default())
            .with_batch_size(1)
            .compare(
                &catalog("mysql", tables()),
                &catalog("postgresql", tables()),
                &mut source,
                &mut target,
            )
            .await;
        assert_eq!(report.rows_compared, 1);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_missing_target_table_fails_only_that_table() {
        let mut source = database(
            "CREATE TABLE a (n INTEGER); CREATE TABLE b (n INTEGER);
             INSERT INTO a VALUES (1); INSERT INTO b VALUES (1);",
        );
        let mut target = database("CREATE TABLE b (n INTEGER); INSERT INTO b VALUES (1);");
        let tables = || vec![table("a", &[("n", "int")]), table("b", &[("n", "int")])];

        let report = CompareEngine::new(LargeObjectRules::default())
            .compare(
                &catalog("mysql", tables()),
                &catalog("postgresql", tables()),
                &mut source,
                &mut target,
            )
            .await;
        assert_eq!(report.failed_tables.len(), 1);
        assert_eq!(report.failed_tables[0].0, "a");
        assert_eq!(report.tables_compared, 1);
    }

    #[tokio::test]
    async fn test_dates_compare_exactly() {
        let report = run(
            "CREATE TABLE t (d TEXT); INSERT INTO t VALUES ('2024-01-02'), ('2024-01-03');",
            "CREATE TABLE t (d TEXT); INSERT INTO t VALUES ('2024-01-02 00:00:00'), ('2024-01-04');",
            &[("d", "date")],
        )
        .await;
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].target_value, "2024-01-04");
    }
}
