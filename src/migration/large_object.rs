// ABOUTME: Large-object translation rules and handle-based text I/O
// ABOUTME: Decides per table and column whether text moves into or out of a large object

use crate::changelog::TypeCategory;
use crate::db::LargeObjectStore;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Which way a column is translated during transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Source text is written to a new target large object; the handle is inserted
    ToLargeObject,
    /// Source holds a handle; the object's content is inserted as text
    FromLargeObject,
}

/// One configured table entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TranslationRule {
    pub table: String,
    #[serde(default)]
    pub columns: Vec<String>,
    /// Apply to every text column of the table
    #[serde(default)]
    pub translate_all: bool,
}

impl TranslationRule {
    fn matches(&self, table: &str, column: &str, category: TypeCategory) -> bool {
        if !self.table.eq_ignore_ascii_case(table) {
            return false;
        }
        if self.translate_all {
            category == TypeCategory::Text
        } else {
            self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
        }
    }
}

/// All translation rules for one run.
#[derive(Debug, Clone, Default)]
pub struct LargeObjectRules {
    to_large_object: Vec<TranslationRule>,
    from_large_object: Vec<TranslationRule>,
}

impl LargeObjectRules {
    pub fn new(to_large_object: Vec<TranslationRule>, from_large_object: Vec<TranslationRule>) -> Self {
        Self {
            to_large_object,
            from_large_object,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_large_object.is_empty() && self.from_large_object.is_empty()
    }

    /// Translation for a column, if any. `category` is the source column's.
    ///
    /// # Examples
    ///
    /// ```
    /// # use changelog_transfer::changelog::TypeCategory;
    /// # use changelog_transfer::migration::large_object::{Direction, LargeObjectRules, TranslationRule};
    /// let rules = LargeObjectRules::new(
    ///     vec![TranslationRule { table: "docs".into(), columns: vec!["body".into()], translate_all: false }],
    ///     vec![],
    /// );
    /// assert_eq!(
    ///     rules.translation("DOCS", "Body", TypeCategory::Text),
    ///     Some(Direction::ToLargeObject)
    /// );
    /// assert_eq!(rules.translation("docs", "title", TypeCategory::Text), None);
    /// ```
    pub fn translation(&self, table: &str, column: &str, category: TypeCategory) -> Option<Direction> {
        if self
            .from_large_object
            .iter()
            .any(|r| r.matches(table, column, category))
        {
            Some(Direction::FromLargeObject)
        } else if self
            .to_large_object
            .iter()
            .any(|r| r.matches(table, column, category))
        {
            Some(Direction::ToLargeObject)
        } else {
            None
        }
    }
}

/// Read the text stored under `handle`. Non-positive handles mean "no object".
pub async fn read_text(store: &mut dyn LargeObjectStore, handle: i64) -> Result<Option<String>> {
    if handle <= 0 {
        return Ok(None);
    }
    let bytes = store.read_all(handle).await?;
    let text = String::from_utf8(bytes)
        .with_context(|| format!("Large object {} does not hold UTF-8 text", handle))?;
    Ok(Some(text))
}

/// Store `text` in a new large object and return its handle.
pub async fn write_text(store: &mut dyn LargeObjectStore, text: &str) -> Result<i64> {
    let handle = store.allocate().await?;
    store.write(handle, text.as_bytes()).await?;
    Ok(handle)
}
