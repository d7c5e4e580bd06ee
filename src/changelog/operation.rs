// ABOUTME: Shape-affecting schema change operations read from a changelog
// ABOUTME: Constraint, index and data operations are carried only as unhandled kinds

/// A column as declared in createTable / addColumn, type still unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub raw_type: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, raw_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raw_type: raw_type.into(),
        }
    }
}

/// A `<property>` declaration used for type placeholders.
///
/// `dialects` is empty when the declaration applies to every dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDeclaration {
    pub name: String,
    pub value: String,
    pub dialects: Vec<String>,
}

/// One schema change, in changelog order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOperation {
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
    },
    AddColumn {
        table: String,
        columns: Vec<ColumnSpec>,
    },
    DropColumn {
        table: String,
        column: String,
    },
    RenameColumn {
        table: String,
        old_name: String,
        new_name: String,
        /// `None` keeps the column's current type
        new_type: Option<String>,
    },
    ModifyType {
        table: String,
        column: String,
        new_type: String,
    },
    DropTable {
        table: String,
    },
    RenameTable {
        old_name: String,
        new_name: String,
    },
    /// Any element the replay does not model (constraints, indexes, inserts ...)
    Unhandled {
        kind: String,
    },
}

impl ChangeOperation {
    /// Element name as it appears in a changelog, used in error messages.
    pub fn kind(&self) -> &str {
        match self {
            ChangeOperation::CreateTable { .. } => "createTable",
            ChangeOperation::AddColumn { .. } => "addColumn",
            ChangeOperation::DropColumn { .. } => "dropColumn",
            ChangeOperation::RenameColumn { .. } => "renameColumn",
            ChangeOperation::ModifyType { .. } => "modifyDataType",
            ChangeOperation::DropTable { .. } => "dropTable",
            ChangeOperation::RenameTable { .. } => "renameTable",
            ChangeOperation::Unhandled { kind } => kind,
        }
    }
}
