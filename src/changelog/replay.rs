// ABOUTME: Applies changelog operations to every dialect's catalog in lockstep
// ABOUTME: Produces the catalog set, creation order and generated SQL for a run

use crate::catalog::{CatalogSet, ColumnDefinition, TableDefinition};
use crate::changelog::alias::TypeAliasResolver;
use crate::changelog::operation::{ChangeOperation, ColumnSpec, PropertyDeclaration};
use crate::changelog::parser::load_changelog;
use crate::error::ReplayError;
use std::collections::BTreeSet;
use std::path::Path;

/// Result of a successful replay.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub catalogs: CatalogSet,
    /// Operation kinds that were read but do not affect data shape
    pub unhandled: BTreeSet<String>,
}

/// Replays schema changes for a fixed set of dialects.
///
/// Type aliases are scoped to a single call of [`replay`](Self::replay);
/// two replays never see each other's property declarations.
#[derive(Debug, Clone)]
pub struct ChangelogReplayer {
    dialects: Vec<String>,
}

impl ChangelogReplayer {
    pub fn new<I, S>(dialects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dialects: dialects.into_iter().map(Into::into).collect(),
        }
    }

    /// Read a master changelog with its includes and replay it.
    ///
    /// # Errors
    ///
    /// Fails on unreadable or malformed documents and on structural
    /// operations against tables that do not exist.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use changelog_transfer::changelog::ChangelogReplayer;
    /// # fn example() -> anyhow::Result<()> {
    /// let replayer = ChangelogReplayer::new(["mysql", "postgresql"]);
    /// let outcome = replayer.replay_file("db/changelog-master.xml".as_ref())?;
    /// let target = outcome.catalogs.catalog("postgresql").unwrap();
    /// for table in target.tables() {
    ///     println!("{}", table.insert_sql);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn replay_file(&self, master: &Path) -> Result<ReplayOutcome, ReplayError> {
        tracing::info!("Replaying changelog {}", master.display());
        let changelog = load_changelog(master)?;
        self.replay(&changelog.properties, &changelog.operations)
    }

    /// Replay already-parsed declarations and operations.
    ///
    /// All property declarations are registered before the first operation
    /// runs. SQL is generated once, after the last operation.
    pub fn replay(
        &self,
        properties: &[PropertyDeclaration],
        operations: &[ChangeOperation],
    ) -> Result<ReplayOutcome, ReplayError> {
        let mut aliases = TypeAliasResolver::new();
        for property in properties {
            if property.dialects.is_empty() {
                aliases.declare_global(&property.name, &property.value);
            } else {
                for dialect in &property.dialects {
                    aliases.declare(dialect, &property.name, &property.value);
                }
            }
        }

        let mut catalogs = CatalogSet::new(self.dialects.iter().cloned());
        let mut unhandled = BTreeSet::new();
        for operation in operations {
            apply(&mut catalogs, &aliases, operation, &mut unhandled)?;
        }
        catalogs.generate_sql();

        if !unhandled.is_empty() {
            tracing::info!(
                "Ignored changelog operations without effect on data shape: {}",
                unhandled.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        tracing::info!(
            "✓ Replayed {} operations into {} tables",
            operations.len(),
            catalogs.order().len()
        );

        Ok(ReplayOutcome {
            catalogs,
            unhandled,
        })
    }
}

fn resolve_columns(aliases: &TypeAliasResolver, dialect: &str, columns: &[ColumnSpec]) -> Vec<ColumnDefinition> {
    columns
        .iter()
        .map(|spec| ColumnDefinition::new(spec.name.clone(), aliases.resolve(dialect, &spec.raw_type)))
        .collect()
}

fn unknown_table(operation: &ChangeOperation, table: &str) -> ReplayError {
    ReplayError::UnknownTable {
        operation: operation.kind().to_string(),
        table: table.to_string(),
    }
}

fn apply(
    catalogs: &mut CatalogSet,
    aliases: &TypeAliasResolver,
    operation: &ChangeOperation,
    unhandled: &mut BTreeSet<String>,
) -> Result<(), ReplayError> {
    match operation {
        ChangeOperation::CreateTable { table, columns } => {
            if catalogs.contains_table(table) {
                return Err(ReplayError::DuplicateTable(table.clone()));
            }
            catalogs.order_mut().assign(table);
            for catalog in catalogs.catalogs_mut() {
                let mut definition = TableDefinition::new(table.clone());
                definition.columns = resolve_columns(aliases, catalog.dialect(), columns);
                catalog.push(definition)?;
            }
        }
        ChangeOperation::AddColumn { table, columns } => {
            for catalog in catalogs.catalogs_mut() {
                let dialect = catalog.dialect().to_string();
                let definition = catalog
                    .table_mut(table)
                    .ok_or_else(|| unknown_table(operation, table))?;
                definition
                    .columns
                    .extend(resolve_columns(aliases, &dialect, columns));
            }
        }
        ChangeOperation::DropColumn { table, column } => {
            for catalog in catalogs.catalogs_mut() {
                let definition = catalog
                    .table_mut(table)
                    .ok_or_else(|| unknown_table(operation, table))?;
                if !definition.drop_column(column) {
                    tracing::debug!("dropColumn: {}.{} not present, nothing to drop", table, column);
                }
            }
        }
        ChangeOperation::RenameColumn {
            table,
            old_name,
            new_name,
            new_type,
        } => {
            for catalog in catalogs.catalogs_mut() {
                let dialect = catalog.dialect().to_string();
                let definition = catalog
                    .table_mut(table)
                    .ok_or_else(|| unknown_table(operation, table))?;
                match definition.column_mut(old_name) {
                    Some(col) => {
                        col.name = new_name.clone();
                        if let Some(raw) = new_type {
                            col.dialect_type = aliases.resolve(&dialect, raw);
                        }
                    }
                    None => tracing::debug!(
                        "renameColumn: {}.{} not present, nothing to rename",
                        table,
                        old_name
                    ),
                }
            }
        }
        ChangeOperation::ModifyType {
            table,
            column,
            new_type,
        } => {
            for catalog in catalogs.catalogs_mut() {
                let dialect = catalog.dialect().to_string();
                let definition = catalog
                    .table_mut(table)
                    .ok_or_else(|| unknown_table(operation, table))?;
                match definition.column_mut(column) {
                    Some(col) => col.dialect_type = aliases.resolve(&dialect, new_type),
                    None => tracing::debug!(
                        "modifyDataType: {}.{} not present, nothing to modify",
                        table,
                        column
                    ),
                }
            }
        }
        ChangeOperation::DropTable { table } => {
            if !catalogs.contains_table(table) {
                return Err(unknown_table(operation, table));
            }
            for catalog in catalogs.catalogs_mut() {
                catalog.remove(table);
            }
            catalogs.order_mut().remove(table);
        }
        ChangeOperation::RenameTable { old_name, new_name } => {
            if !catalogs.contains_table(old_name) {
                return Err(unknown_table(operation, old_name));
            }
            if !old_name.eq_ignore_ascii_case(new_name) && catalogs.contains_table(new_name) {
                return Err(ReplayError::DuplicateTable(new_name.clone()));
            }
            for catalog in catalogs.catalogs_mut() {
                if let Some(definition) = catalog.table_mut(old_name) {
                    definition.name = new_name.clone();
                }
            }
            catalogs.order_mut().rename(old_name, new_name);
        }
        ChangeOperation::Unhandled { kind } => {
            unhandled.insert(kind.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::TypeCategory;

    fn create(table: &str, columns: &[(&str, &str)]) -> ChangeOperation {
        ChangeOperation::CreateTable {
            table: table.to_string(),
            columns: columns.iter().map(|(n, t)| ColumnSpec::new(*n, *t)).collect(),
        }
    }

    fn property(name: &str, value: &str, dialects: &[&str]) -> PropertyDeclaration {
        PropertyDeclaration {
            name: name.to_string(),
            value: value.to_string(),
            dialects: dialects.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn replayer() -> ChangelogReplayer {
        ChangelogReplayer::new(["mysql", "postgresql"])
    }

    #[test]
    fn test_orders_and_line_items_creation_order() {
        let ops = vec![
            create("orders", &[("id", "int"), ("amount", "number")]),
            create("line_items", &[("order_id", "int"), ("qty", "int")]),
        ];
        let outcome = replayer().replay(&[], &ops).unwrap();
        let order = outcome.catalogs.order();
        assert_eq!(order.get("orders"), Some(1));
        assert_eq!(order.get("line_items"), Some(2));

        for catalog in outcome.catalogs.catalogs() {
            let names: Vec<&str> = catalog.tables().map(|t| t.name.as_str()).collect();
            assert_eq!(names, vec!["orders", "line_items"]);
            let reversed: Vec<&str> = catalog.tables_reversed().map(|t| t.name.as_str()).collect();
            assert_eq!(reversed, vec!["line_items", "orders"]);
        }
    }

    #[test]
    fn test_aliases_resolve_per_dialect() {
        let props = vec![
            property("type.clob", "longtext", &["mysql"]),
            property("type.clob", "text", &["postgresql"]),
        ];
        let ops = vec![create("docs", &[("id", "bigint"), ("body", "${type.clob}")])];
        let outcome = replayer().replay(&props, &ops).unwrap();

        let mysql = outcome.catalogs.catalog("mysql").unwrap().table("docs").unwrap();
        let pg = outcome.catalogs.catalog("postgresql").unwrap().table("docs").unwrap();
        assert_eq!(mysql.columns[1].dialect_type.as_deref(), Some("longtext"));
        assert_eq!(pg.columns[1].dialect_type.as_deref(), Some("text"));
        assert_eq!(pg.columns[1].category(), TypeCategory::Text);
    }

    #[test]
    fn test_unresolved_alias_is_unknown_type() {
        let props = vec![property("type.clob", "longtext", &["mysql"])];
        let ops = vec![create("docs", &[("body", "${type.clob}")])];
        let outcome = replayer().replay(&props, &ops).unwrap();

        let pg = outcome.catalogs.catalog("postgresql").unwrap().table("docs").unwrap();
        assert_eq!(pg.columns[0].dialect_type, None);
        assert_eq!(pg.columns[0].category(), TypeCategory::Unknown);
    }

    #[test]
    fn test_column_changes_apply_to_both_dialects() {
        let ops = vec![
            create("orders", &[("id", "int"), ("note", "varchar(10)"), ("old", "int")]),
            ChangeOperation::AddColumn {
                table: "ORDERS".to_string(),
                columns: vec![ColumnSpec::new("created", "timestamp")],
            },
            ChangeOperation::DropColumn {
                table: "orders".to_string(),
                column: "OLD".to_string(),
            },
            ChangeOperation::RenameColumn {
                table: "orders".to_string(),
                old_name: "note".to_string(),
                new_name: "remark".to_string(),
                new_type: Some("text".to_string()),
            },
            ChangeOperation::ModifyType {
                table: "orders".to_string(),
                column: "id".to_string(),
                new_type: "bigint".to_string(),
            },
        ];
        let outcome = replayer().replay(&[], &ops).unwrap();

        for catalog in outcome.catalogs.catalogs() {
            let table = catalog.table("orders").unwrap();
            assert_eq!(table.select_sql, "SELECT id,remark,created FROM orders;");
            assert_eq!(table.insert_sql, "INSERT INTO orders(id,remark,created) VALUES (?,?,?)");
            assert_eq!(table.columns[0].category(), TypeCategory::Int64);
            assert_eq!(table.columns[1].category(), TypeCategory::Text);
            assert_eq!(table.columns[2].ordinal, 3);
        }
        assert!(outcome
            .catalogs
            .column_count_mismatches("mysql", "postgresql")
            .is_empty());
    }

    #[test]
    fn test_rename_without_type_keeps_type() {
        let ops = vec![
            create("t", &[("a", "int")]),
            ChangeOperation::RenameColumn {
                table: "t".to_string(),
                old_name: "a".to_string(),
                new_name: "b".to_string(),
                new_type: None,
            },
        ];
        let outcome = replayer().replay(&[], &ops).unwrap();
        let table = outcome.catalogs.catalog("mysql").unwrap().table("t").unwrap();
        assert_eq!(table.columns[0].name, "b");
        assert_eq!(table.columns[0].dialect_type.as_deref(), Some("int"));
    }

    #[test]
    fn test_operation_on_unknown_table_is_fatal() {
        let ops = vec![ChangeOperation::AddColumn {
            table: "ghost".to_string(),
            columns: vec![ColumnSpec::new("a", "int")],
        }];
        let err = replayer().replay(&[], &ops).unwrap_err();
        assert!(
            matches!(err, ReplayError::UnknownTable { ref operation, ref table } if operation == "addColumn" && table == "ghost")
        );
    }

    #[test]
    fn test_duplicate_create_is_fatal() {
        let ops = vec![create("t", &[("a", "int")]), create("T", &[("a", "int")])];
        let err = replayer().replay(&[], &ops).unwrap_err();
        assert!(matches!(err, ReplayError::DuplicateTable(_)));
    }

    #[test]
    fn test_drop_and_rename_table() {
        let ops = vec![
            create("a", &[("id", "int")]),
            create("b", &[("id", "int")]),
            create("c", &[("id", "int")]),
            ChangeOperation::DropTable {
                table: "b".to_string(),
            },
            ChangeOperation::RenameTable {
                old_name: "a".to_string(),
                new_name: "alpha".to_string(),
            },
        ];
        let outcome = replayer().replay(&[], &ops).unwrap();
        let order = outcome.catalogs.order();
        assert_eq!(order.get("alpha"), Some(1));
        assert_eq!(order.get("b"), None);
        assert_eq!(order.get("c"), Some(3));

        let pg = outcome.catalogs.catalog("postgresql").unwrap();
        let names: Vec<&str> = pg.tables().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "c"]);
        assert_eq!(pg.table("alpha").unwrap().delete_sql, "DELETE FROM alpha;");
    }

    #[test]
    fn test_unhandled_kinds_are_collected() {
        let ops = vec![
            create("t", &[("a", "int")]),
            ChangeOperation::Unhandled {
                kind: "createIndex".to_string(),
            },
            ChangeOperation::Unhandled {
                kind: "addForeignKeyConstraint".to_string(),
            },
            ChangeOperation::Unhandled {
                kind: "createIndex".to_string(),
            },
        ];
        let outcome = replayer().replay(&[], &ops).unwrap();
        let kinds: Vec<&str> = outcome.unhandled.iter().map(String::as_str).collect();
        assert_eq!(kinds, vec!["addForeignKeyConstraint", "createIndex"]);
    }

    #[test]
    fn test_replays_do_not_share_aliases() {
        let replayer = replayer();
        let props = vec![property("type.clob", "text", &["postgresql"])];
        replayer
            .replay(&props, &[create("t", &[("a", "${type.clob}")])])
            .unwrap();

        let second = replayer
            .replay(&[], &[create("t", &[("a", "${type.clob}")])])
            .unwrap();
        let table = second.catalogs.catalog("postgresql").unwrap().table("t").unwrap();
        assert_eq!(table.columns[0].dialect_type, None);
    }
}
