// ABOUTME: Per-dialect table catalogs built by changelog replay
// ABOUTME: Holds column order, creation order and the generated SELECT/INSERT/DELETE SQL

pub mod interchange;

use crate::changelog::TypeCategory;
use crate::error::ReplayError;
use std::collections::BTreeMap;

/// One column of a table in one dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Column name as declared; identity is case-insensitive
    pub name: String,
    /// Dialect type string, `None` when a type alias did not resolve
    pub dialect_type: Option<String>,
    /// 1-based position, assigned by SQL generation (0 before that)
    pub ordinal: usize,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, dialect_type: Option<String>) -> Self {
        Self {
            name: name.into(),
            dialect_type,
            ordinal: 0,
        }
    }

    pub fn category(&self) -> TypeCategory {
        TypeCategory::of(self.dialect_type.as_deref())
    }
}

/// A table in one dialect, its columns in declaration order and its SQL templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub select_sql: String,
    pub insert_sql: String,
    pub delete_sql: String,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            select_sql: String::new(),
            insert_sql: String::new(),
            delete_sql: String::new(),
        }
    }

    /// Find a column by name, ignoring case.
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnDefinition> {
        self.columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Remove the first column matching `name`. Returns whether one was removed.
    pub fn drop_column(&mut self, name: &str) -> bool {
        match self
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
        {
            Some(index) => {
                self.columns.remove(index);
                true
            }
            None => false,
        }
    }

    /// Assign ordinals 1..N in current column order and build the SQL templates.
    ///
    /// SELECT and INSERT list the columns in the same order, so the ordinal of
    /// a column is both its position in a fetched row and its INSERT parameter.
    ///
    /// # Examples
    ///
    /// ```
    /// # use changelog_transfer::catalog::{ColumnDefinition, TableDefinition};
    /// let mut table = TableDefinition::new("orders");
    /// table.columns.push(ColumnDefinition::new("id", Some("int".into())));
    /// table.columns.push(ColumnDefinition::new("amount", Some("number(10,2)".into())));
    /// table.generate_sql();
    ///
    /// assert_eq!(table.select_sql, "SELECT id,amount FROM orders;");
    /// assert_eq!(table.insert_sql, "INSERT INTO orders(id,amount) VALUES (?,?)");
    /// assert_eq!(table.delete_sql, "DELETE FROM orders;");
    /// assert_eq!(table.columns[1].ordinal, 2);
    /// ```
    pub fn generate_sql(&mut self) {
        for (index, column) in self.columns.iter_mut().enumerate() {
            column.ordinal = index + 1;
        }
        let names = self
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let placeholders = vec!["?"; self.columns.len()].join(",");

        self.select_sql = format!("SELECT {} FROM {};", names, self.name);
        self.insert_sql = format!(
            "INSERT INTO {}({}) VALUES ({})",
            self.name, names, placeholders
        );
        self.delete_sql = format!("DELETE FROM {};", self.name);
    }
}

/// Table name to creation step, shared by every dialect.
///
/// Values only ever grow: a dropped table's number is not reused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreationOrderIndex {
    entries: BTreeMap<String, u32>,
    last: u32,
}

impl CreationOrderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored entries, e.g. an interchange document.
    pub fn from_entries(entries: BTreeMap<String, u32>) -> Self {
        let last = entries.values().copied().max().unwrap_or(0);
        Self { entries, last }
    }

    /// Give `table` the next creation number.
    pub fn assign(&mut self, table: &str) -> u32 {
        self.last += 1;
        self.entries.insert(table.to_string(), self.last);
        self.last
    }

    pub fn get(&self, table: &str) -> Option<u32> {
        self.key_of(table).and_then(|key| self.entries.get(key).copied())
    }

    pub fn remove(&mut self, table: &str) -> Option<u32> {
        let key = self.key_of(table)?.to_string();
        self.entries.remove(&key)
    }

    /// Move a table's creation number to a new name.
    pub fn rename(&mut self, old_name: &str, new_name: &str) {
        if let Some(order) = self.remove(old_name) {
            self.entries.insert(new_name.to_string(), order);
        }
    }

    pub fn entries(&self) -> &BTreeMap<String, u32> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key_of(&self, table: &str) -> Option<&str> {
        self.entries
            .keys()
            .find(|k| k.eq_ignore_ascii_case(table))
            .map(String::as_str)
    }
}

/// All tables of one dialect, kept in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaCatalog {
    dialect: String,
    tables: Vec<TableDefinition>,
}

impl SchemaCatalog {
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
            tables: Vec::new(),
        }
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    /// Look a table up by name, ignoring case.
    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableDefinition> {
        self.tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// Tables in ascending creation order (parents first).
    pub fn tables(&self) -> impl DoubleEndedIterator<Item = &TableDefinition> {
        self.tables.iter()
    }

    /// Tables in descending creation order (dependents first).
    pub fn tables_reversed(&self) -> impl Iterator<Item = &TableDefinition> {
        self.tables.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub(crate) fn push(&mut self, table: TableDefinition) -> Result<(), ReplayError> {
        if self.contains(&table.name) {
            return Err(ReplayError::DuplicateTable(table.name));
        }
        self.tables.push(table);
        Ok(())
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<TableDefinition> {
        let index = self
            .tables
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name))?;
        Some(self.tables.remove(index))
    }

    /// Re-sort tables to match `order`. Tables missing from it go last.
    pub(crate) fn sort_by_creation(&mut self, order: &CreationOrderIndex) {
        self.tables
            .sort_by_key(|t| order.get(&t.name).unwrap_or(u32::MAX));
    }

    pub fn generate_sql(&mut self) {
        for table in &mut self.tables {
            table.generate_sql();
        }
    }
}

/// Every dialect's catalog plus the shared creation order.
///
/// Structural changes go through this type so that all catalogs are
/// mutated together and cannot drift apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSet {
    catalogs: Vec<SchemaCatalog>,
    order: CreationOrderIndex,
}

impl CatalogSet {
    /// An empty set with one catalog per distinct dialect.
    pub fn new<I, S>(dialects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut catalogs: Vec<SchemaCatalog> = Vec::new();
        for dialect in dialects {
            let dialect = dialect.into();
            if !catalogs
                .iter()
                .any(|c| c.dialect.eq_ignore_ascii_case(&dialect))
            {
                catalogs.push(SchemaCatalog::new(dialect));
            }
        }
        Self {
            catalogs,
            order: CreationOrderIndex::new(),
        }
    }

    pub(crate) fn from_parts(catalogs: Vec<SchemaCatalog>, order: CreationOrderIndex) -> Self {
        Self { catalogs, order }
    }

    /// Catalog for `dialect`, ignoring case.
    pub fn catalog(&self, dialect: &str) -> Option<&SchemaCatalog> {
        self.catalogs
            .iter()
            .find(|c| c.dialect.eq_ignore_ascii_case(dialect))
    }

    pub fn catalogs(&self) -> impl Iterator<Item = &SchemaCatalog> {
        self.catalogs.iter()
    }

    pub(crate) fn catalogs_mut(&mut self) -> impl Iterator<Item = &mut SchemaCatalog> {
        self.catalogs.iter_mut()
    }

    pub fn order(&self) -> &CreationOrderIndex {
        &self.order
    }

    pub(crate) fn order_mut(&mut self) -> &mut CreationOrderIndex {
        &mut self.order
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.catalogs.iter().any(|c| c.contains(name))
    }

    /// Assign ordinals and generate SQL in every catalog. Run once, after replay.
    pub fn generate_sql(&mut self) {
        for catalog in &mut self.catalogs {
            catalog.generate_sql();
        }
    }

    /// Tables whose column count differs between two dialects.
    pub fn column_count_mismatches(&self, left: &str, right: &str) -> Vec<String> {
        let (Some(left), Some(right)) = (self.catalog(left), self.catalog(right)) else {
            return Vec::new();
        };
        left.tables()
            .filter(|table| {
                right
                    .table(&table.name)
                    .map(|other| other.columns.len() != table.columns.len())
                    .unwrap_or(false)
            })
            .map(|table| table.name.clone())
            .collect()
    }
}
