// ABOUTME: Resolves ${symbolic.name} type placeholders to dialect type strings
// ABOUTME: Lives for exactly one replay; nothing is shared between runs

use std::collections::HashMap;

/// Per-replay table of type aliases.
///
/// Declarations are keyed by `(dialect, name)`. A declaration registered
/// without a dialect applies to every dialect, but a dialect-specific
/// declaration of the same name takes precedence.
#[derive(Debug, Default, Clone)]
pub struct TypeAliasResolver {
    by_dialect: HashMap<String, HashMap<String, String>>,
    global: HashMap<String, String>,
}

impl TypeAliasResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` for `dialect`. Later declarations replace earlier ones.
    pub fn declare(&mut self, dialect: &str, name: &str, concrete: &str) {
        self.by_dialect
            .entry(dialect.trim().to_lowercase())
            .or_default()
            .insert(name.trim().to_string(), concrete.to_string());
    }

    /// Register `name` for every dialect.
    pub fn declare_global(&mut self, name: &str, concrete: &str) {
        self.global
            .insert(name.trim().to_string(), concrete.to_string());
    }

    /// Resolve a raw column type for `dialect`.
    ///
    /// Plain type strings pass through untouched. A placeholder such as
    /// `${type.clob}` is looked up; a miss yields `None`, which later
    /// normalises to an unknown type category rather than failing the replay.
    ///
    /// # Examples
    ///
    /// ```
    /// # use changelog_transfer::changelog::TypeAliasResolver;
    /// let mut aliases = TypeAliasResolver::new();
    /// aliases.declare("postgresql", "type.clob", "text");
    ///
    /// assert_eq!(aliases.resolve("postgresql", "${type.clob}"), Some("text".to_string()));
    /// assert_eq!(aliases.resolve("mysql", "${type.clob}"), None);
    /// assert_eq!(aliases.resolve("mysql", "int"), Some("int".to_string()));
    /// ```
    pub fn resolve(&self, dialect: &str, raw: &str) -> Option<String> {
        let Some(name) = placeholder_name(raw) else {
            return Some(raw.to_string());
        };

        let resolved = self
            .by_dialect
            .get(&dialect.to_lowercase())
            .and_then(|aliases| aliases.get(name))
            .or_else(|| self.global.get(name))
            .cloned();

        if resolved.is_none() {
            tracing::warn!(
                "No type declared for placeholder '{}' in dialect '{}'",
                raw,
                dialect
            );
        }
        resolved
    }

    pub fn is_empty(&self) -> bool {
        self.by_dialect.is_empty() && self.global.is_empty()
    }
}

/// Strip `${` and `}` from a placeholder, returning `None` for plain types.
fn placeholder_name(raw: &str) -> Option<&str> {
    raw.trim()
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_type_passes_through() {
        let aliases = TypeAliasResolver::new();
        assert_eq!(
            aliases.resolve("mysql", "varchar(255)"),
            Some("varchar(255)".to_string())
        );
    }

    #[test]
    fn test_placeholder_resolves_per_dialect() {
        let mut aliases = TypeAliasResolver::new();
        aliases.declare("mysql", "type.clob", "longtext");
        aliases.declare("postgresql", "type.clob", "text");

        assert_eq!(
            aliases.resolve("mysql", "${type.clob}"),
            Some("longtext".to_string())
        );
        assert_eq!(
            aliases.resolve("postgresql", "${type.clob}"),
            Some("text".to_string())
        );
    }

    #[test]
    fn test_dialect_lookup_is_case_insensitive() {
        let mut aliases = TypeAliasResolver::new();
        aliases.declare("PostgreSQL", "type.uuid", "uuid");
        assert_eq!(
            aliases.resolve("postgresql", "${type.uuid}"),
            Some("uuid".to_string())
        );
    }

    #[test]
    fn test_missing_placeholder_is_absent() {
        let mut aliases = TypeAliasResolver::new();
        aliases.declare("mysql", "type.clob", "longtext");
        assert_eq!(aliases.resolve("postgresql", "${type.clob}"), None);
        assert_eq!(aliases.resolve("mysql", "${type.blob}"), None);
    }

    #[test]
    fn test_global_declaration_is_fallback() {
        let mut aliases = TypeAliasResolver::new();
        aliases.declare_global("type.flag", "boolean");
        aliases.declare("mysql", "type.flag", "tinyint(1)");

        assert_eq!(
            aliases.resolve("postgresql", "${type.flag}"),
            Some("boolean".to_string())
        );
        assert_eq!(
            aliases.resolve("mysql", "${type.flag}"),
            Some("tinyint(1)".to_string())
        );
    }

    #[test]
    fn test_placeholder_name() {
        assert_eq!(placeholder_name("${a.b}"), Some("a.b"));
        assert_eq!(placeholder_name(" ${ a.b } "), Some("a.b"));
        assert_eq!(placeholder_name("$a"), None);
        assert_eq!(placeholder_name("int"), None);
    }
}
