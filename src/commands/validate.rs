// ABOUTME: Pre-flight checks for a transfer run
// ABOUTME: Validates the configuration, the changelog and both connections

use super::{close, load_catalogs, open};
use crate::config::Config;
use crate::utils::validate_connection_string;
use anyhow::{Context, Result};
use std::path::Path;

/// Load the configuration, apply its rules and check both connection URLs.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, a structural rule
/// is broken, or a connection URL is unusable.
pub fn validate_config(path: &Path) -> Result<Config> {
    tracing::info!("Validating configuration {}...", path.display());
    let config = Config::load(path)?;
    let target = config.target()?;

    validate_connection_string(&config.source.url).context("Invalid source connection URL")?;
    validate_connection_string(&target.url).context("Invalid target connection URL")?;

    tracing::info!(
        "✓ Configuration valid: {} ({}) -> {} ({}), delete_target_data={}, compare_data={}",
        config.source.name,
        config.source.dialect,
        target.name,
        target.dialect,
        config.delete_target_data,
        config.compare_data
    );
    Ok(config)
}

/// Replay the changelog (or load the interchange document) and report the result.
pub fn validate_changelog(config: &Config) -> Result<()> {
    let catalogs = load_catalogs(config)?;
    for catalog in catalogs.catalogs() {
        tracing::info!(
            "✓ {}: {} tables",
            catalog.dialect(),
            catalog.len()
        );
    }
    Ok(())
}

/// Open and close the source connection.
pub async fn validate_source(config: &Config) -> Result<()> {
    let mut connection = open(&config.source, "source").await?;
    close(connection.as_mut(), "source").await;
    Ok(())
}

/// Open and close the target connection.
pub async fn validate_target(config: &Config) -> Result<()> {
    let target = config.target()?;
    let mut connection = open(target, "target").await?;
    close(connection.as_mut(), "target").await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, source_url: &str) -> std::path::PathBuf {
        let path = dir.path().join("transfer.toml");
        std::fs::write(
            &path,
            format!(
                r#"
changelog = "master.xml"

[source]
name = "legacy"
dialect = "mysql"
url = "{}"

[[targets]]
name = "new"
dialect = "sqlite"
url = "sqlite::memory:"
"#,
                source_url
            ),
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_validate_config_and_connections() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("legacy.db");
        let path = write_config(&dir, &format!("sqlite://{}", db_path.display()));

        let config = validate_config(&path).unwrap();
        validate_source(&config).await.unwrap();
        validate_target(&config).await.unwrap();
    }

    #[test]
    fn test_validate_config_rejects_unsupported_url() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "jdbc:mariadb://root:pw@h:3306/db");

        let err = validate_config(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid source connection URL"));
        assert!(!format!("{:#}", err).contains(":pw@"));
    }

    #[test]
    fn test_validate_changelog_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "sqlite::memory:");
        let config = Config::load(&path).unwrap();

        assert!(validate_changelog(&config).is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_validate_postgres_target() {
        let target = std::env::var("TEST_TARGET_URL").unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transfer.toml");
        std::fs::write(
            &path,
            format!(
                "changelog = \"m.xml\"\n[source]\nname = \"a\"\ndialect = \"mysql\"\nurl = \"sqlite::memory:\"\n\
                 [[targets]]\nname = \"b\"\ndialect = \"postgresql\"\nurl = \"{}\"\n",
                target
            ),
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        validate_target(&config).await.unwrap();
    }
}
