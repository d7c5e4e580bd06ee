// ABOUTME: Maps free-form dialect type strings onto a closed set of categories
// ABOUTME: Every transfer and comparison decision switches on the category only

use std::fmt;

/// Semantic type category of a column.
///
/// Raw type strings (`varchar(255)`, `BIGINT`, `${type.clob}` after
/// resolution) are normalised once with [`TypeCategory::of`]; nothing
/// downstream looks at the raw string again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    Int16,
    Int32,
    Int64,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Text,
    Binary,
    Unknown,
}

/// Prefix table, checked in order. Longer prefixes that would otherwise be
/// shadowed by a shorter one must come first.
const PREFIXES: &[(&str, TypeCategory)] = &[
    ("tinyint", TypeCategory::Int16),
    ("smallint", TypeCategory::Int16),
    ("int2", TypeCategory::Int16),
    ("int8", TypeCategory::Int64),
    ("bigint", TypeCategory::Int64),
    ("int", TypeCategory::Int32),
    ("number", TypeCategory::Decimal),
    ("numeric", TypeCategory::Decimal),
    ("decimal", TypeCategory::Decimal),
    ("bool", TypeCategory::Boolean),
    ("timestamp", TypeCategory::Timestamp),
    ("datetime", TypeCategory::Timestamp),
    ("date", TypeCategory::Date),
    ("clob", TypeCategory::Text),
    ("varchar", TypeCategory::Text),
    ("char", TypeCategory::Text),
    ("text", TypeCategory::Text),
    ("uuid", TypeCategory::Text),
    ("blob", TypeCategory::Binary),
    ("byte", TypeCategory::Binary),
];

impl TypeCategory {
    /// Normalise a dialect type string.
    ///
    /// Matching is case-insensitive and prefix based, so `VARCHAR(64)` and
    /// `varchar2` both land in [`TypeCategory::Text`]. An absent type (an
    /// unresolved alias) and anything not in the table are `Unknown`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use changelog_transfer::changelog::TypeCategory;
    /// assert_eq!(TypeCategory::of(Some("BIGINT")), TypeCategory::Int64);
    /// assert_eq!(TypeCategory::of(Some("varchar(255)")), TypeCategory::Text);
    /// assert_eq!(TypeCategory::of(Some("float")), TypeCategory::Unknown);
    /// assert_eq!(TypeCategory::of(None), TypeCategory::Unknown);
    /// ```
    pub fn of(raw: Option<&str>) -> TypeCategory {
        let Some(raw) = raw else {
            return TypeCategory::Unknown;
        };
        let lowered = raw.trim().to_lowercase();
        PREFIXES
            .iter()
            .find(|(prefix, _)| lowered.starts_with(prefix))
            .map(|(_, category)| *category)
            .unwrap_or(TypeCategory::Unknown)
    }
}

impl fmt::Display for TypeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeCategory::Int16 => "int16",
            TypeCategory::Int32 => "int32",
            TypeCategory::Int64 => "int64",
            TypeCategory::Decimal => "decimal",
            TypeCategory::Boolean => "boolean",
            TypeCategory::Date => "date",
            TypeCategory::Timestamp => "timestamp",
            TypeCategory::Text => "text",
            TypeCategory::Binary => "binary",
            TypeCategory::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_family() {
        assert_eq!(TypeCategory::of(Some("int")), TypeCategory::Int32);
        assert_eq!(TypeCategory::of(Some("INTEGER")), TypeCategory::Int32);
        assert_eq!(TypeCategory::of(Some("int4")), TypeCategory::Int32);
        assert_eq!(TypeCategory::of(Some("tinyint(1)")), TypeCategory::Int16);
        assert_eq!(TypeCategory::of(Some("smallint")), TypeCategory::Int16);
        assert_eq!(TypeCategory::of(Some("bigint")), TypeCategory::Int64);
        assert_eq!(TypeCategory::of(Some("int8")), TypeCategory::Int64);
    }

    #[test]
    fn test_decimal_and_boolean() {
        assert_eq!(TypeCategory::of(Some("number(10,2)")), TypeCategory::Decimal);
        assert_eq!(TypeCategory::of(Some("NUMERIC")), TypeCategory::Decimal);
        assert_eq!(TypeCategory::of(Some("boolean")), TypeCategory::Boolean);
        assert_eq!(TypeCategory::of(Some("bool")), TypeCategory::Boolean);
    }

    #[test]
    fn test_temporal() {
        assert_eq!(TypeCategory::of(Some("timestamp")), TypeCategory::Timestamp);
        assert_eq!(
            TypeCategory::of(Some("TIMESTAMP WITH TIME ZONE")),
            TypeCategory::Timestamp
        );
        assert_eq!(TypeCategory::of(Some("datetime(6)")), TypeCategory::Timestamp);
        assert_eq!(TypeCategory::of(Some("date")), TypeCategory::Date);
    }

    #[test]
    fn test_text_like() {
        for raw in ["clob", "varchar(32)", "char(1)", "character varying", "text", "uuid"] {
            assert_eq!(TypeCategory::of(Some(raw)), TypeCategory::Text, "{}", raw);
        }
    }

    #[test]
    fn test_binary() {
        assert_eq!(TypeCategory::of(Some("blob")), TypeCategory::Binary);
        assert_eq!(TypeCategory::of(Some("bytea")), TypeCategory::Binary);
    }

    #[test]
    fn test_unknown() {
        assert_eq!(TypeCategory::of(Some("float")), TypeCategory::Unknown);
        assert_eq!(TypeCategory::of(Some("")), TypeCategory::Unknown);
        assert_eq!(TypeCategory::of(None), TypeCategory::Unknown);
    }
}
