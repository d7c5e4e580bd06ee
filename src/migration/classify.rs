// ABOUTME: Decides whether a failed row insert was a duplicate-key violation
// ABOUTME: Driver error codes with a message fallback by default, message matching alone when configured

use serde::Deserialize;

/// Classifies row-level insert failures.
pub trait DuplicateClassifier: Send + Sync {
    fn is_duplicate(&self, error: &anyhow::Error) -> bool;
}

/// Matches "duplicate" anywhere in the error chain, ignoring case.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageClassifier;

impl DuplicateClassifier for MessageClassifier {
    fn is_duplicate(&self, error: &anyhow::Error) -> bool {
        error
            .chain()
            .any(|cause| cause.to_string().to_lowercase().contains("duplicate"))
    }
}

/// Uses driver error codes (PostgreSQL 23505, SQLite unique/primary key
/// constraint), falling back to [`MessageClassifier`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlStateClassifier;

/// SQLITE_CONSTRAINT_PRIMARYKEY
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
/// SQLITE_CONSTRAINT_UNIQUE
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

impl DuplicateClassifier for SqlStateClassifier {
    fn is_duplicate(&self, error: &anyhow::Error) -> bool {
        for cause in error.chain() {
            if let Some(pg) = cause.downcast_ref::<tokio_postgres::Error>() {
                if pg.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION) {
                    return true;
                }
            }
            if let Some(rusqlite::Error::SqliteFailure(failure, _)) =
                cause.downcast_ref::<rusqlite::Error>()
            {
                if matches!(
                    failure.extended_code,
                    SQLITE_CONSTRAINT_PRIMARYKEY | SQLITE_CONSTRAINT_UNIQUE
                ) {
                    return true;
                }
            }
        }
        MessageClassifier.is_duplicate(error)
    }
}

/// Which classifier a run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateDetection {
    /// Only the "duplicate" message check
    Message,
    /// Driver error codes, then the message check
    #[default]
    SqlState,
}

impl DuplicateDetection {
    pub fn classifier(self) -> Box<dyn DuplicateClassifier> {
        match self {
            DuplicateDetection::Message => Box::new(MessageClassifier),
            DuplicateDetection::SqlState => Box::new(SqlStateClassifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_message_classifier_matches_any_case() {
        let err = anyhow::anyhow!("ERROR: Duplicate entry '1' for key 'PRIMARY'");
        assert!(MessageClassifier.is_duplicate(&err));

        let err = anyhow::anyhow!("value too long for type character varying(10)");
        assert!(!MessageClassifier.is_duplicate(&err));
    }

    #[test]
    fn test_message_classifier_searches_chain() {
        let err: anyhow::Result<()> =
            Err(anyhow::anyhow!("duplicate key value violates unique constraint"));
        let err = err.context("Failed to insert row").unwrap_err();
        assert!(MessageClassifier.is_duplicate(&err));
    }

    #[test]
    fn test_sql_state_classifier_on_sqlite_unique_violation() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err();
        let err = anyhow::Error::from(err).context("insert failed");

        assert!(!MessageClassifier.is_duplicate(&err));
        assert!(SqlStateClassifier.is_duplicate(&err));
    }

    #[test]
    fn test_sql_state_classifier_ignores_other_constraints() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER NOT NULL);")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES (NULL)", []).unwrap_err();
        let err = anyhow::Error::from(err);
        assert!(!SqlStateClassifier.is_duplicate(&err));
    }

    #[test]
    fn test_default_detection_recognises_sqlite_unique_violation() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = anyhow::Error::from(conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err());

        assert_eq!(DuplicateDetection::default(), DuplicateDetection::SqlState);
        assert!(DuplicateDetection::default().classifier().is_duplicate(&err));
        assert!(!DuplicateDetection::Message.classifier().is_duplicate(&err));
    }

    #[test]
    fn test_sql_state_classifier_keeps_message_fallback() {
        let err = anyhow::anyhow!("ERROR: Duplicate entry '1' for key 'PRIMARY'");
        assert!(SqlStateClassifier.is_duplicate(&err));
    }
}
