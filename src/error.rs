// ABOUTME: Fatal error types raised while building the table catalogs
// ABOUTME: Any of these aborts the run before a single row is touched

use std::path::PathBuf;
use thiserror::Error;

/// Errors that make a changelog (or interchange document) unusable.
///
/// Replay is all-or-nothing: when one of these is returned no partial
/// catalog is handed to the transfer or compare engines.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// A referenced changelog or interchange file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not well-formed XML
    #[error("Malformed changelog document {path}: {message}")]
    Xml { path: PathBuf, message: String },

    /// An element lacks an attribute the replay depends on
    #[error("{path}: <{element}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        path: PathBuf,
        element: String,
        attribute: String,
    },

    /// A structural operation names a table that was never created
    #[error("{operation} references table '{table}' which has not been created")]
    UnknownTable { operation: String, table: String },

    /// createTable for a name that already exists in the catalog
    #[error("Table '{0}' is created more than once")]
    DuplicateTable(String),

    /// A document includes itself, directly or through other includes
    #[error("Changelog include cycle detected at {0}")]
    IncludeCycle(PathBuf),

    /// The interchange document could not be decoded or is inconsistent
    #[error("Malformed interchange document {path}: {message}")]
    Interchange { path: PathBuf, message: String },

    /// The interchange document holds no catalog for a configured dialect
    #[error("Interchange document {path} has no catalog for dialect '{dialect}'")]
    MissingDialect { path: PathBuf, dialect: String },
}

impl ReplayError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReplayError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn interchange(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ReplayError::Interchange {
            path: path.into(),
            message: message.into(),
        }
    }
}
