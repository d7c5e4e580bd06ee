// ABOUTME: Changelog reading and replay into per-dialect table catalogs
// ABOUTME: Re-exports the replay entry points and type classification

pub mod alias;
pub mod category;
pub mod operation;
pub mod parser;
pub mod replay;

pub use alias::TypeAliasResolver;
pub use category::TypeCategory;
pub use operation::{ChangeOperation, ColumnSpec, PropertyDeclaration};
pub use parser::{load_changelog, Changelog};
pub use replay::{ChangelogReplayer, ReplayOutcome};
