// ABOUTME: Empties target tables before a transfer
// ABOUTME: Walks the catalog newest-first so dependent tables are cleared before their parents

use crate::catalog::SchemaCatalog;
use crate::db::Database;
use crate::utils::sanitize_identifier;

/// Outcome of [`delete_target_data`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    /// Tables in the order their DELETE ran
    pub tables: Vec<String>,
    pub rows_deleted: u64,
    pub failed_tables: Vec<String>,
}

/// Run every table's DELETE statement in reverse creation order.
///
/// A failing table is logged and recorded; the remaining tables are still
/// emptied. Running this against an empty target deletes zero rows and
/// reports no failures.
pub async fn delete_target_data(catalog: &SchemaCatalog, target: &mut dyn Database) -> DeleteReport {
    let mut report = DeleteReport::default();
    tracing::info!("Deleting data from {} target tables...", catalog.len());

    for table in catalog.tables_reversed() {
        report.tables.push(table.name.clone());
        match target.execute(&table.delete_sql, &[]).await {
            Ok(rows) => {
                tracing::debug!(
                    "Deleted {} rows from {}",
                    rows,
                    sanitize_identifier(&table.name)
                );
                report.rows_deleted += rows;
            }
            Err(e) => {
                tracing::warn!(
                    "⚠ Failed to delete data from table {}: {:#}",
                    sanitize_identifier(&table.name),
                    e
                );
                report.failed_tables.push(table.name.clone());
                if let Err(e) = target.rollback().await {
                    tracing::warn!("⚠ Rollback after failed delete also failed: {:#}", e);
                }
            }
        }
    }

    if report.failed_tables.is_empty() {
        tracing::info!("✓ Target data deleted ({} rows)", report.rows_deleted);
    } else {
        tracing::warn!(
            "⚠ Target data deleted with {} failed table(s): {}",
            report.failed_tables.len(),
            report.failed_tables.join(", ")
        );
    }
    report
}
