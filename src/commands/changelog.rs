// ABOUTME: Writes the replayed catalogs to a JSON interchange document
// ABOUTME: The document can replace the changelog in later runs

use super::load_catalogs;
use crate::catalog::interchange;
use crate::config::Config;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Replay the configured changelog and save the result as JSON.
///
/// # Arguments
///
/// * `config` - Validated run configuration
/// * `output` - Destination file; defaults to `changelog-<epoch millis>.json`
///   in the current directory
///
/// # Returns
///
/// The path the document was written to.
///
/// # Examples
///
/// ```no_run
/// # use changelog_transfer::{commands, config::Config};
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::load("transfer.toml")?;
/// let written = commands::changelog_to_json(&config, None)?;
/// println!("{}", written.display());
/// # Ok(())
/// # }
/// ```
pub fn changelog_to_json(config: &Config, output: Option<&Path>) -> Result<PathBuf> {
    let catalogs = load_catalogs(config)?;
    let path = match output {
        Some(path) => path.to_path_buf(),
        None => default_output(),
    };

    interchange::save(&catalogs, &path)?;
    tracing::info!(
        "The changelog-json file was generated at: {}",
        std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone()).display()
    );
    Ok(path)
}

fn default_output() -> PathBuf {
    PathBuf::from(format!(
        "changelog-{}.json",
        chrono::Utc::now().timestamp_millis()
    ))
}
