// ABOUTME: Compares source and target data without transferring anything
// ABOUTME: Used to re-check a target after an earlier transfer run

use super::{catalog_pair, close, load_catalogs, open};
use crate::config::Config;
use crate::migration::{CompareEngine, CompareReport};
use anyhow::Result;

/// Compare every table present in both catalogs, row by row.
///
/// # Errors
///
/// Returns an error if the catalogs cannot be built or a connection cannot
/// be opened. Mismatches are reported in the returned [`CompareReport`].
pub async fn compare_data(config: &Config) -> Result<CompareReport> {
    let catalogs = load_catalogs(config)?;
    let (source_catalog, target_catalog) = catalog_pair(&catalogs, config)?;
    let rules = config.large_object_rules()?;

    let mut source = open(&config.source, "source").await?;
    let mut target = match open(config.target()?, "target").await {
        Ok(target) => target,
        Err(e) => {
            close(source.as_mut(), "source").await;
            return Err(e);
        }
    };

    let report = CompareEngine::new(rules)
        .with_batch_size(config.chunk_size)
        .compare(source_catalog, target_catalog, source.as_mut(), target.as_mut())
        .await;

    close(source.as_mut(), "source").await;
    close(target.as_mut(), "target").await;

    println!();
    println!("========================================");
    println!("Comparison Summary");
    println!("========================================");
    println!("Tables compared: {}", report.tables_compared);
    println!("Rows compared:   {}", report.rows_compared);
    println!("Mismatches:      {}", report.mismatches.len());
    println!("Decode errors:   {}", report.errors);
    for (table, reason) in &report.failed_tables {
        println!("Failed table:    {} ({})", table, reason);
    }
    println!("========================================");
    println!();

    Ok(report)
}
