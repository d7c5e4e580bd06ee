// ABOUTME: Full transfer run: replay, optional delete, copy rows, optional compare
// ABOUTME: Fatal errors stop before data moves; row and table failures only degrade the report

use super::{catalog_pair, close, load_catalogs, open};
use crate::catalog::SchemaCatalog;
use crate::config::Config;
use crate::db::Database;
use crate::migration::{
    delete_target_data, CompareEngine, CompareReport, DeleteReport, LargeObjectRules,
    TransferEngine, TransferReport,
};
use anyhow::{bail, Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm};

/// Everything a transfer run reports.
#[derive(Debug, Default)]
pub struct TransferSummary {
    pub deleted: Option<DeleteReport>,
    pub transfer: TransferReport,
    pub compare: Option<CompareReport>,
}

/// Copy all data from the configured source into the target.
///
/// Steps:
/// 1. Builds the source and target catalogs from the changelog
/// 2. Connects to both databases
/// 3. Empties the target tables, newest first (if `delete_target_data`)
/// 4. Copies every table, oldest first, row by row
/// 5. Compares source and target (if `compare_data`)
///
/// # Arguments
///
/// * `config` - Validated run configuration
/// * `skip_confirmation` - Do not ask before deleting target data
///
/// # Errors
///
/// Returns an error if the changelog cannot be replayed, a connection cannot
/// be opened, or the user declines the delete confirmation. Failing rows and
/// tables are logged and counted in the returned summary instead.
///
/// # Examples
///
/// ```no_run
/// # use changelog_transfer::{commands, config::Config};
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::load("transfer.toml")?;
/// let summary = commands::transfer_data(&config, true).await?;
/// println!("{} rows copied", summary.transfer.rows_transferred());
/// # Ok(())
/// # }
/// ```
pub async fn transfer_data(config: &Config, skip_confirmation: bool) -> Result<TransferSummary> {
    tracing::info!("Starting transfer...");
    let catalogs = load_catalogs(config)?;
    let (source_catalog, target_catalog) = catalog_pair(&catalogs, config)?;
    let target_config = config.target()?;
    let rules = config.large_object_rules()?;

    if config.delete_target_data && !skip_confirmation && !confirm_delete(&target_config.name)? {
        tracing::warn!("⚠ User cancelled operation");
        bail!("Transfer cancelled by user");
    }

    let mut source = open(&config.source, "source").await?;
    let mut target = match open(target_config, "target").await {
        Ok(target) => target,
        Err(e) => {
            close(source.as_mut(), "source").await;
            return Err(e);
        }
    };

    let summary = run(
        config,
        rules,
        (source_catalog, target_catalog),
        source.as_mut(),
        target.as_mut(),
    )
    .await;

    close(source.as_mut(), "source").await;
    close(target.as_mut(), "target").await;

    print_summary(&summary);
    Ok(summary)
}

async fn run(
    config: &Config,
    rules: LargeObjectRules,
    (source_catalog, target_catalog): (&SchemaCatalog, &SchemaCatalog),
    source: &mut dyn Database,
    target: &mut dyn Database,
) -> TransferSummary {
    let mut summary = TransferSummary::default();

    if config.delete_target_data {
        summary.deleted = Some(delete_target_data(target_catalog, target).await);
    } else {
        tracing::info!("Skipping target data deletion (delete_target_data = false)");
    }

    let engine = TransferEngine::new(rules.clone())
        .with_native_text(config.source.native_text)
        .with_commit_mode(config.commit_mode)
        .with_classifier(config.duplicate_detection.classifier())
        .with_batch_size(config.chunk_size);
    summary.transfer = engine
        .transfer(source_catalog, target_catalog, source, target)
        .await;

    if config.compare_data {
        summary.compare = Some(
            CompareEngine::new(rules)
                .with_batch_size(config.chunk_size)
                .compare(source_catalog, target_catalog, source, target)
                .await,
        );
    }
    summary
}

fn confirm_delete(target_name: &str) -> Result<bool> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "All data in the tables of target database '{}' will be deleted. Proceed?",
            target_name
        ))
        .default(false)
        .interact()
        .context("Failed to get confirmation")
}

fn print_summary(summary: &TransferSummary) {
    println!();
    println!("========================================");
    println!("Transfer Summary");
    println!("========================================");
    if let Some(deleted) = &summary.deleted {
        println!(
            "Rows deleted:        {} ({} tables failed)",
            deleted.rows_deleted,
            deleted.failed_tables.len()
        );
    }
    for table in &summary.transfer.tables {
        println!(
            "{:<30} {:>8} copied {:>6} duplicates {:>6} failed",
            table.table, table.transferred, table.duplicates, table.failed
        );
    }
    for (table, reason) in &summary.transfer.skipped_tables {
        println!("{:<30} skipped: {}", table, reason);
    }
    println!(
        "Total:               {} rows copied, {} rows failed",
        summary.transfer.rows_transferred(),
        summary.transfer.rows_failed()
    );
    if let Some(compare) = &summary.compare {
        println!(
            "Comparison:          {} rows compared, {} mismatches, {} errors",
            compare.rows_compared,
            compare.mismatches.len(),
            compare.errors
        );
    }
    println!("========================================");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn test_transfer_into_postgres() {
        let source = std::env::var("TEST_SOURCE_URL").unwrap();
        let target = std::env::var("TEST_TARGET_URL").unwrap();
        let changelog = std::env::var("TEST_CHANGELOG").unwrap();

        let config = Config::from_toml_str(&format!(
            "changelog = \"{}\"\ncompare_data = true\n\
             [source]\nname = \"a\"\ndialect = \"mysql\"\nurl = \"{}\"\n\
             [[targets]]\nname = \"b\"\ndialect = \"postgresql\"\nurl = \"{}\"\n",
            changelog, source, target
        ))
        .unwrap();

        let summary = transfer_data(&config, true).await.unwrap();
        assert_eq!(summary.transfer.rows_failed(), 0);
        assert!(summary.compare.unwrap().is_clean());
    }
}
