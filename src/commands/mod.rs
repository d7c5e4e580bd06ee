// ABOUTME: Command implementations, one per CLI operation
// ABOUTME: Shared helpers load the catalogs and open the configured connections

pub mod changelog;
pub mod compare;
pub mod transfer;
pub mod validate;

pub use changelog::changelog_to_json;
pub use compare::compare_data;
pub use transfer::{transfer_data, TransferSummary};
pub use validate::{validate_changelog, validate_config, validate_source, validate_target};

use crate::catalog::{interchange, CatalogSet, SchemaCatalog};
use crate::changelog::ChangelogReplayer;
use crate::config::{Config, DatabaseConfig};
use crate::db::{self, Database};
use crate::utils::sanitize_identifier;
use anyhow::{Context, Result};
use std::path::Path;

/// Build the catalogs for the configured source and target dialects.
///
/// A changelog path ending in `.json` is read as a previously written
/// interchange document; anything else is replayed as a changelog.
pub(crate) fn load_catalogs(config: &Config) -> Result<CatalogSet> {
    let dialects = config.dialects()?;
    let path = config.changelog.as_path();

    if is_interchange(path) {
        tracing::info!("Loading catalog from {}", path.display());
        let catalogs = interchange::load(path, &dialects)?;
        tracing::info!("✓ Catalog loaded ({} tables)", catalogs.order().len());
        return Ok(catalogs);
    }

    let outcome = ChangelogReplayer::new(dialects)
        .replay_file(path)
        .with_context(|| format!("Failed to replay changelog {}", path.display()))?;
    Ok(outcome.catalogs)
}

fn is_interchange(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// The source and target catalogs of a loaded set.
pub(crate) fn catalog_pair<'a>(
    catalogs: &'a CatalogSet,
    config: &Config,
) -> Result<(&'a SchemaCatalog, &'a SchemaCatalog)> {
    let target = config.target()?;
    let source_catalog = catalogs
        .catalog(&config.source.dialect)
        .with_context(|| format!("No catalog for source dialect '{}'", config.source.dialect))?;
    let target_catalog = catalogs
        .catalog(&target.dialect)
        .with_context(|| format!("No catalog for target dialect '{}'", target.dialect))?;

    let mismatched = catalogs.column_count_mismatches(&config.source.dialect, &target.dialect);
    if !mismatched.is_empty() {
        tracing::warn!(
            "⚠ Column counts differ between {} and {} for: {}",
            config.source.dialect,
            target.dialect,
            mismatched.join(", ")
        );
    }
    Ok((source_catalog, target_catalog))
}

pub(crate) async fn open(database: &DatabaseConfig, role: &str) -> Result<Box<dyn Database>> {
    tracing::info!(
        "Connecting to {} database '{}'...",
        role,
        sanitize_identifier(&database.name)
    );
    let connection = db::connect(&database.url, database.username(), database.password())
        .await
        .with_context(|| format!("Failed to connect to {} database '{}'", role, database.name))?;
    tracing::info!("✓ Connected to {} ({})", role, connection.driver());
    Ok(connection)
}

pub(crate) async fn close(connection: &mut dyn Database, role: &str) {
    if let Err(e) = connection.close().await {
        tracing::warn!("⚠ Failed to close {} connection: {:#}", role, e);
    }
}
