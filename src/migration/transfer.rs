// ABOUTME: Copies rows table by table from the source to the target database
// ABOUTME: Type-driven marshaling, large-object translation and per-row failure isolation

use crate::catalog::{SchemaCatalog, TableDefinition};
use crate::changelog::TypeCategory;
use crate::db::{Database, Row, RowReader, Value, DEFAULT_BATCH_SIZE};
use crate::migration::classify::{DuplicateClassifier, DuplicateDetection};
use crate::migration::large_object::{self, Direction, LargeObjectRules};
use crate::utils::sanitize_identifier;
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

/// When the engine commits while building a row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Commit both connections after every bound column, then after the insert
    #[default]
    Column,
    /// Commit both connections once, after the insert
    Row,
}

/// Counters for one transferred table.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TableTransfer {
    pub table: String,
    pub transferred: u64,
    pub duplicates: u64,
    pub failed: u64,
}

/// Outcome of a full transfer.
#[derive(Debug, Default, Clone)]
pub struct TransferReport {
    /// Tables in the order they were processed
    pub tables: Vec<TableTransfer>,
    /// Tables that could not be set up, with the reason
    pub skipped_tables: Vec<(String, String)>,
}

impl TransferReport {
    pub fn rows_transferred(&self) -> u64 {
        self.tables.iter().map(|t| t.transferred).sum()
    }

    pub fn rows_failed(&self) -> u64 {
        self.tables.iter().map(|t| t.failed).sum()
    }

    pub fn table(&self, name: &str) -> Option<&TableTransfer> {
        self.tables.iter().find(|t| t.table.eq_ignore_ascii_case(name))
    }
}

/// How one source column feeds the insert.
#[derive(Debug, Clone)]
struct ColumnPlan {
    source_name: String,
    category: TypeCategory,
    /// 0-based insert parameter index (target ordinal - 1)
    slot: usize,
    translation: Option<Direction>,
}

#[derive(Debug)]
struct TablePlan {
    columns: Vec<ColumnPlan>,
    target_columns: Vec<String>,
}

impl TablePlan {
    fn new(source: &TableDefinition, target: &TableDefinition, rules: &LargeObjectRules) -> Result<Self> {
        let mut columns = Vec::with_capacity(source.columns.len());
        for column in &source.columns {
            let target_column = target.column(&column.name).with_context(|| {
                format!(
                    "Column {} of table {} has no counterpart in the target table",
                    column.name, source.name
                )
            })?;
            if target_column.ordinal == 0 || target_column.ordinal > target.columns.len() {
                bail!(
                    "Column {} of table {} has no insert position",
                    column.name,
                    target.name
                );
            }

            let category = column.category();
            if category == TypeCategory::Unknown {
                tracing::warn!(
                    "⚠ Column {}.{} has unrecognised type {:?} and will not be bound",
                    sanitize_identifier(&source.name),
                    sanitize_identifier(&column.name),
                    column.dialect_type.as_deref().unwrap_or("")
                );
            }
            columns.push(ColumnPlan {
                source_name: column.name.clone(),
                category,
                slot: target_column.ordinal - 1,
                translation: rules.translation(&target.name, &column.name, category),
            });
        }

        Ok(Self {
            columns,
            target_columns: target.columns.iter().map(|c| c.name.clone()).collect(),
        })
    }
}

/// Copies data between two catalogs' databases.
///
/// Tables are visited in ascending creation order. Source rows are read
/// through a forward-only cursor in batches and inserted one at a time.
/// A failing row (including one that cannot be decoded) is logged, rolled
/// back and skipped; a table that cannot be set up is logged and skipped.
/// Nothing below the run level escalates.
pub struct TransferEngine {
    rules: LargeObjectRules,
    source_native_text: bool,
    commit_mode: CommitMode,
    classifier: Box<dyn DuplicateClassifier>,
    batch_size: usize,
}

impl TransferEngine {
    pub fn new(rules: LargeObjectRules) -> Self {
        Self {
            rules,
            source_native_text: false,
            commit_mode: CommitMode::default(),
            classifier: DuplicateDetection::default().classifier(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// The source stores text natively, so text columns are read directly.
    pub fn with_native_text(mut self, native_text: bool) -> Self {
        self.source_native_text = native_text;
        self
    }

    pub fn with_commit_mode(mut self, commit_mode: CommitMode) -> Self {
        self.commit_mode = commit_mode;
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn DuplicateClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Source rows fetched per round trip.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Copy every table present in both catalogs.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use changelog_transfer::catalog::SchemaCatalog;
    /// # use changelog_transfer::db;
    /// # use changelog_transfer::migration::{LargeObjectRules, TransferEngine};
    /// # async fn example(source_catalog: &SchemaCatalog, target_catalog: &SchemaCatalog) -> anyhow::Result<()> {
    /// let mut source = db::connect("sqlite:///tmp/legacy.db", None, None).await?;
    /// let mut target = db::connect("postgresql://app@db/main", None, None).await?;
    ///
    /// let engine = TransferEngine::new(LargeObjectRules::default());
    /// let report = engine
    ///     .transfer(source_catalog, target_catalog, source.as_mut(), target.as_mut())
    ///     .await;
    /// println!("{} rows copied", report.rows_transferred());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn transfer(
        &self,
        source_catalog: &SchemaCatalog,
        target_catalog: &SchemaCatalog,
        source: &mut dyn Database,
        target: &mut dyn Database,
    ) -> TransferReport {
        let mut report = TransferReport::default();

        let progress = ProgressBar::new(source_catalog.len() as u64);
        progress.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );

        for source_table in source_catalog.tables() {
            progress.set_message(sanitize_identifier(&source_table.name));
            let Some(target_table) = target_catalog.table(&source_table.name) else {
                tracing::warn!(
                    "⚠ Table {} has no counterpart in the target catalog, skipping",
                    sanitize_identifier(&source_table.name)
                );
                report.skipped_tables.push((
                    source_table.name.clone(),
                    "not present in target catalog".to_string(),
                ));
                progress.inc(1);
                continue;
            };

            let mut stats = TableTransfer {
                table: target_table.name.clone(),
                ..Default::default()
            };
            if let Err(e) = self
                .transfer_table(source_table, target_table, source, target, &mut stats)
                .await
            {
                tracing::warn!(
                    "⚠ Skipping table {}: {:#}",
                    sanitize_identifier(&target_table.name),
                    e
                );
                report
                    .skipped_tables
                    .push((target_table.name.clone(), format!("{:#}", e)));
            }
            if stats.transferred > 0 {
                tracing::info!(
                    "Target table {} updated, row count: {}",
                    sanitize_identifier(&target_table.name),
                    stats.transferred
                );
            }
            report.tables.push(stats);
            progress.inc(1);
        }

        progress.finish_with_message("Transfer complete");
        tracing::info!(
            "✓ Transfer completed: {} rows copied, {} rows failed, {} tables skipped",
            report.rows_transferred(),
            report.rows_failed(),
            report.skipped_tables.len()
        );
        report
    }

    async fn transfer_table(
        &self,
        source_table: &TableDefinition,
        target_table: &TableDefinition,
        source: &mut dyn Database,
        target: &mut dyn Database,
        stats: &mut TableTransfer,
    ) -> Result<()> {
        let plan = TablePlan::new(source_table, target_table, &self.rules)?;
        target.prepare(&target_table.insert_sql).await?;
        tracing::debug!(
            "Reading {} in batches of {} rows",
            sanitize_identifier(&source_table.name),
            self.batch_size
        );
        let mut rows = RowReader::open(source, &source_table.select_sql, self.batch_size).await?;
        let outcome = self
            .transfer_rows(&plan, target_table, &mut rows, source, target, stats)
            .await;
        rows.close(source).await;
        outcome
    }

    async fn transfer_rows(
        &self,
        plan: &TablePlan,
        target_table: &TableDefinition,
        rows: &mut RowReader,
        source: &mut dyn Database,
        target: &mut dyn Database,
        stats: &mut TableTransfer,
    ) -> Result<()> {
        while let Some(fetched) = rows.next(source).await? {
            let outcome = match fetched {
                Ok(row) => {
                    self.transfer_row(plan, target_table, &row, source, target)
                        .await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => stats.transferred += 1,
                Err(e) => {
                    if self.classifier.is_duplicate(&e) {
                        tracing::info!(
                            "Duplicate entry found in table: {}",
                            sanitize_identifier(&target_table.name)
                        );
                        stats.duplicates += 1;
                    } else {
                        tracing::warn!(
                            "Table: {}, error: {:#}",
                            sanitize_identifier(&target_table.name),
                            e
                        );
                        stats.failed += 1;
                    }
                    restore_connections(source, target).await;
                }
            }
        }
        Ok(())
    }

    async fn transfer_row(
        &self,
        plan: &TablePlan,
        target_table: &TableDefinition,
        row: &Row,
        source: &mut dyn Database,
        target: &mut dyn Database,
    ) -> Result<()> {
        source.set_auto_commit(false).await?;
        target.set_auto_commit(false).await?;

        let mut slots: Vec<Option<Value>> = vec![None; plan.target_columns.len()];
        for column in &plan.columns {
            if let Some(value) = self.read_column(column, row, source, target).await? {
                slots[column.slot] = Some(value);
            }
            if self.commit_mode == CommitMode::Column {
                target.commit().await?;
                source.commit().await?;
            }
        }

        let params = slots
            .into_iter()
            .zip(&plan.target_columns)
            .enumerate()
            .map(|(i, (value, name))| {
                value.with_context(|| format!("No value bound for parameter {} ({})", i + 1, name))
            })
            .collect::<Result<Vec<_>>>()?;

        target.execute(&target_table.insert_sql, &params).await?;
        target.commit().await?;
        source.commit().await?;
        target.set_auto_commit(true).await?;
        source.set_auto_commit(true).await?;
        Ok(())
    }

    /// Value to bind for one column, `None` when the column is not bound.
    async fn read_column(
        &self,
        column: &ColumnPlan,
        row: &Row,
        source: &mut dyn Database,
        target: &mut dyn Database,
    ) -> Result<Option<Value>> {
        let value = match column.category {
            TypeCategory::Unknown => return Ok(None),
            TypeCategory::Text => self.read_text(column, row, source, target).await?,
            category => row.get(&column.source_name, category)?,
        };
        Ok(Some(value))
    }

    async fn read_text(
        &self,
        column: &ColumnPlan,
        row: &Row,
        source: &mut dyn Database,
        target: &mut dyn Database,
    ) -> Result<Value> {
        if column.translation == Some(Direction::FromLargeObject) {
            let handle = row.get(&column.source_name, TypeCategory::Int64)?;
            let Value::Int64(handle) = handle else {
                return Ok(Value::Null);
            };
            let text = large_object::read_text(source.large_objects()?, handle).await?;
            return Ok(text.map(Value::Text).unwrap_or(Value::Null));
        }

        let text = row.get(&column.source_name, TypeCategory::Text)?;
        if self.source_native_text {
            return Ok(text);
        }
        match (column.translation, text) {
            (Some(Direction::ToLargeObject), Value::Text(text)) => {
                let handle = large_object::write_text(target.large_objects()?, &text).await?;
                Ok(Value::Text(handle.to_string()))
            }
            (_, text) => Ok(text),
        }
    }
}

/// Put both connections back in auto-commit after a failed row.
async fn restore_connections(source: &mut dyn Database, target: &mut dyn Database) {
    if let Err(e) = target.rollback().await {
        tracing::warn!("⚠ Target rollback failed: {:#}", e);
    }
    if let Err(e) = source.rollback().await {
        tracing::warn!("⚠ Source rollback failed: {:#}", e);
    }
    if let Err(e) = target.set_auto_commit(true).await {
        tracing::warn!("⚠ Could not restore auto-commit on target: {:#}", e);
    }
    if let Err(e) = source.set_auto_commit(true).await {
        tracing::warn!("⚠ Could not restore auto-commit on source: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDefinition;
    use crate::db::sqlite::SqliteDatabase;
    use crate::migration::classify::MessageClassifier;
    use crate::migration::large_object::TranslationRule;

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

    fn database(ddl: &str) -> SqliteDatabase {
        let mut db = SqliteDatabase::open("sqlite::memory:").unwrap();
        db.execute_batch(ddl).unwrap();
        db
    }

    const ORDERS_DDL: &str = "CREATE TABLE orders (id INTEGER PRIMARY KEY, amount NUMERIC);
         CREATE TABLE line_items (order_id INTEGER REFERENCES orders(id), qty INTEGER);";

    #[tokio::test]
    async fn test_parents_are_inserted_before_children() {
        let mut source = database(ORDERS_DDL);
        source
            .execute_batch(
                "INSERT INTO orders VALUES (1, 10.50), (2, 3);
                 INSERT INTO line_items VALUES (1, 4), (2, 1), (2, 7);",
            )
            .unwrap();
        let mut target = database(&format!("PRAGMA foreign_keys = ON; {}", ORDERS_DDL));

        let tables = || {
            vec![
                table("orders", &[("id", "int"), ("amount", "number(10,2)")]),
                table("line_items", &[("order_id", "int"), ("qty", "int")]),
            ]
        };
        let source_catalog = catalog("mysql", tables());
        let target_catalog = catalog("postgresql", tables());

        let report = TransferEngine::new(LargeObjectRules::default())
            .transfer(&source_catalog, &target_catalog, &mut source, &mut target)
            .await;

        let order: Vec<&str> = report.tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(order, vec!["orders", "line_items"]);
        assert_eq!(report.table("orders").unwrap().transferred, 2);
        assert_eq!(report.table("line_items").unwrap().transferred, 3);
        assert_eq!(report.rows_failed(), 0);

        let rows = target.query("SELECT id,amount FROM orders;").await.unwrap();
        assert_eq!(
            rows[0].get("amount", TypeCategory::Decimal).unwrap(),
            Value::Text("10.5".into()).coerce(TypeCategory::Decimal).unwrap()
        );
        assert!(target.auto_commit());
        assert!(source.auto_commit());
    }

    #[tokio::test]
    async fn test_columns_bind_by_target_ordinal() {
        let mut source = database("CREATE TABLE t (a INTEGER, b TEXT);");
        source.execute_batch("INSERT INTO t VALUES (1, 'x');").unwrap();
        let mut target = database("CREATE TABLE t (b TEXT, a INTEGER);");

        let source_catalog = catalog("mysql", vec![table("t", &[("a", "int"), ("b", "varchar(5)")])]);
        let target_catalog = catalog("postgresql", vec![table("T", &[("B", "text"), ("A", "int")])]);

        let report = TransferEngine::new(LargeObjectRules::default())
            .with_commit_mode(CommitMode::Row)
            .transfer(&source_catalog, &target_catalog, &mut source, &mut target)
            .await;
        assert_eq!(report.rows_transferred(), 1);

        let rows = target.query("SELECT b,a FROM t;").await.unwrap();
        assert_eq!(rows[0].value("b").unwrap(), &Value::Text("x".into()));
        assert_eq!(rows[0].value("a").unwrap(), &Value::Int64(1));
    }

    #[tokio::test]
    async fn test_duplicate_rows_are_skipped_not_fatal() {
        let mut source = database("CREATE TABLE t (id INTEGER, note TEXT);");
        source
            .execute_batch("INSERT INTO t VALUES (1, 'a'), (1, 'dup'), (2, 'b');")
            .unwrap();
        let mut target = database("CREATE TABLE t (id INTEGER PRIMARY KEY, note TEXT);");

        let tables = || vec![table("t", &[("id", "int"), ("note", "varchar(10)")])];
        let report = TransferEngine::new(LargeObjectRules::default())
            .transfer(
                &catalog("mysql", tables()),
                &catalog("postgresql", tables()),
                &mut source,
                &mut target,
            )
            .await;

        let stats = report.table("t").unwrap();
        assert_eq!(stats.transferred, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(target.query("SELECT id FROM t;").await.unwrap().len(), 2);
        assert!(target.auto_commit());
    }

    #[tokio::test]
    async fn test_message_classifier_counts_sqlite_unique_violation_as_failure() {
        let mut source = database("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (1), (2);");
        let mut target = database("CREATE TABLE t (id INTEGER PRIMARY KEY);");
        let tables = || vec![table("t", &[("id", "int")])];

        let report = TransferEngine::new(LargeObjectRules::default())
            .with_classifier(Box::new(MessageClassifier))
            .transfer(
                &catalog("mysql", tables()),
                &catalog("postgresql", tables()),
                &mut source,
                &mut target,
            )
            .await;

        let stats = report.table("t").unwrap();
        assert_eq!(stats.duplicates, 0);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_undecodable_row_fails_alone_across_batches() {
        let mut source = database(
            "CREATE TABLE t (id INTEGER, note TEXT);
             INSERT INTO t VALUES (1, 'ok'), (2, CAST(x'ff' AS TEXT)), (3, 'fine');",
        );
        let mut target = database("CREATE TABLE t (id INTEGER, note TEXT);");
        let tables = || vec![table("t", &[("id", "int"), ("note", "varchar(10)")])];

        let report = TransferEngine::new(LargeObjectRules::default())
            .with_batch_size(2)
            .transfer(
                &catalog("mysql", tables()),
                &catalog("postgresql", tables()),
                &mut source,
                &mut target,
            )
            .await;

        assert!(report.skipped_tables.is_empty(), "{:?}", report.skipped_tables);
        let stats = report.table("t").unwrap();
        assert_eq!(stats.transferred, 2);
        assert_eq!(stats.failed, 1);
        let rows = target.query("SELECT id FROM t ORDER BY id;").await.unwrap();
        let ids: Vec<&Value> = rows.iter().map(|r| r.value("id").unwrap()).collect();
        assert_eq!(ids, vec![&Value::Int64(1), &Value::Int64(3)]);
        assert!(source.auto_commit());
    }

    #[tokio::test]
    async fn test_row_failure_is_isolated() {
        let mut source = database("CREATE TABLE t (id INTEGER, n TEXT);");
        source
            .execute_batch("INSERT INTO t VALUES (1, '5'), (2, 'not a number'), (3, '7');")
            .unwrap();
        let mut target = database("CREATE TABLE t (id INTEGER, n INTEGER);");

        let report = TransferEngine::new(LargeObjectRules::default())
            .transfer(
                &catalog("mysql", vec![table("t", &[("id", "int"), ("n", "int")])]),
                &catalog("postgresql", vec![table("t", &[("id", "int"), ("n", "int")])]),
                &mut source,
                &mut target,
            )
            .await;

        let stats = report.table("t").unwrap();
        assert_eq!(stats.transferred, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(target.query("SELECT id FROM t;").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_column_skips_table_only() {
        let mut source = database(
            "CREATE TABLE a (id INTEGER, extra INTEGER); CREATE TABLE b (id INTEGER);
             INSERT INTO a VALUES (1, 1); INSERT INTO b VALUES (9);",
        );
        let mut target = database("CREATE TABLE a (id INTEGER); CREATE TABLE b (id INTEGER);");

        let report = TransferEngine::new(LargeObjectRules::default())
            .transfer(
                &catalog(
                    "mysql",
                    vec![
                        table("a", &[("id", "int"), ("extra", "int")]),
                        table("b", &[("id", "int")]),
                    ],
                ),
                &catalog(
                    "postgresql",
                    vec![table("a", &[("id", "int")]), table("b", &[("id", "int")])],
                ),
                &mut source,
                &mut target,
            )
            .await;

        assert_eq!(report.skipped_tables.len(), 1);
        assert_eq!(report.skipped_tables[0].0, "a");
        assert_eq!(report.table("b").unwrap().transferred, 1);
    }

    #[tokio::test]
    async fn test_unknown_type_leaves_parameter_unbound() {
        let mut source = database("CREATE TABLE t (id INTEGER, ratio REAL); INSERT INTO t VALUES (1, 0.5);");
        let mut target = database("CREATE TABLE t (id INTEGER, ratio REAL);");
        let tables = || vec![table("t", &[("id", "int"), ("ratio", "float")])];

        let report = TransferEngine::new(LargeObjectRules::default())
            .transfer(
                &catalog("mysql", tables()),
                &catalog("postgresql", tables()),
                &mut source,
                &mut target,
            )
            .await;
        assert_eq!(report.table("t").unwrap().failed, 1);
        assert!(target.query("SELECT id FROM t;").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_large_object_rule_without_store_fails_row() {
        let mut source = database("CREATE TABLE docs (id INTEGER, body TEXT); INSERT INTO docs VALUES (1, 'hello');");
        let mut target = database("CREATE TABLE docs (id INTEGER, body TEXT);");
        let rules = LargeObjectRules::new(
            vec![TranslationRule {
                table: "docs".into(),
                columns: vec!["body".into()],
                translate_all: false,
            }],
            vec![],
        );
        let tables = || vec![table("docs", &[("id", "int"), ("body", "clob")])];

        let report = TransferEngine::new(rules)
            .transfer(
                &catalog("mysql", tables()),
                &catalog("postgresql", tables()),
                &mut source,
                &mut target,
            )
            .await;
        assert_eq!(report.table("docs").unwrap().failed, 1);
        assert!(target.auto_commit());
    }

    #[tokio::test]
    async fn test_native_text_source_reads_text_directly() {
        let mut source = database("CREATE TABLE docs (id INTEGER, body TEXT); INSERT INTO docs VALUES (1, 'hello');");
        let mut target = database("CREATE TABLE docs (id INTEGER, body TEXT);");
        let rules = LargeObjectRules::new(
            vec![TranslationRule {
                table: "docs".into(),
                columns: vec![],
                translate_all: true,
            }],
            vec![],
        );
        let tables = || vec![table("docs", &[("id", "int"), ("body", "text")])];

        let report = TransferEngine::new(rules)
            .with_native_text(true)
            .transfer(
                &catalog("postgresql", tables()),
                &catalog("mysql", tables()),
                &mut source,
                &mut target,
            )
            .await;
        assert_eq!(report.rows_transferred(), 1);
        let rows = target.query("SELECT body FROM docs;").await.unwrap();
        assert_eq!(rows[0].value("body").unwrap(), &Value::Text("hello".into()));
    }
}
