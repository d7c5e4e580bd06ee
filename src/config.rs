// ABOUTME: Run configuration loaded from TOML (or JSON) and validated before any data moves
// ABOUTME: Names the changelog, the source, the single target and large-object translation rules

use crate::db::DEFAULT_BATCH_SIZE;
use crate::migration::{
    CommitMode, DuplicateDetection, LargeObjectRules, TranslationRule,
};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Connection settings for one database.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    /// Dialect used for changelog property lookup
    #[serde(alias = "dbms_type")]
    pub dialect: String,
    #[serde(alias = "jdbc_url")]
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Text columns are stored natively rather than as character streams
    #[serde(default, alias = "postgres_type")]
    pub native_text: bool,
    #[serde(default, alias = "translate_to_postgres_large_clob_object")]
    pub to_large_object: Vec<TranslationRule>,
    #[serde(default, alias = "translate_from_postgres_large_clob_object")]
    pub from_large_object: Vec<TranslationRule>,
}

impl DatabaseConfig {
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub description: Option<String>,
    /// Master changelog, or a previously written interchange document (`.json`)
    #[serde(alias = "change_log_file")]
    pub changelog: PathBuf,
    #[serde(default = "default_true")]
    pub delete_target_data: bool,
    #[serde(default)]
    pub compare_data: bool,
    #[serde(default)]
    pub commit_mode: CommitMode,
    #[serde(default)]
    pub duplicate_detection: DuplicateDetection,
    /// Rows fetched per round trip while reading a table
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(alias = "source_database")]
    pub source: DatabaseConfig,
    #[serde(default, alias = "target_databases")]
    pub targets: Vec<DatabaseConfig>,
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as TOML.
    /// A relative changelog path is resolved against the directory of the
    /// configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or fails
    /// [`Config::validate`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use changelog_transfer::config::Config;
    /// # fn example() -> anyhow::Result<()> {
    /// let config = Config::load("transfer.toml")?;
    /// println!("{} -> {}", config.source.name, config.target()?.name);
    /// # Ok(())
    /// # }
    /// ```
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let mut config = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
        .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;

        if config.changelog.is_relative() {
            if let Some(dir) = path.parent() {
                config.changelog = dir.join(&config.changelog);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Config> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Config> {
        Ok(serde_json::from_str(content)?)
    }

    /// Check the structural rules a run depends on.
    ///
    /// # Errors
    ///
    /// Fails unless there is exactly one target, `chunk_size` is positive,
    /// database names are unique,
    /// source and target dialects differ, and every translation rule either
    /// sets `translate_all` or lists columns (not both). A target may carry
    /// rules in one direction only.
    pub fn validate(&self) -> Result<()> {
        if self.targets.len() != 1 {
            bail!("The configuration needs to contain exactly one target database");
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }

        let source_is_postgres = self.source.dialect.to_lowercase().starts_with("post");
        if source_is_postgres && !self.source.native_text {
            tracing::warn!(
                "⚠ It appears that the source database is of type 'postgresql' but the flag 'native_text=true' has not been set. Please set the flag if it is the case."
            );
        }
        if !source_is_postgres && self.source.native_text {
            tracing::warn!(
                "⚠ It appears that the source database is not of type 'postgresql' but the flag 'native_text=true' has been set. Please unset the flag if it is the case."
            );
        }

        let mut names = HashSet::new();
        let mut dialects = HashSet::new();
        names.insert(self.source.name.to_lowercase());
        dialects.insert(self.source.dialect.to_lowercase());

        for target in &self.targets {
            if !names.insert(target.name.to_lowercase()) {
                bail!("Database Names have to be unique. Duplicates were found");
            }
            if !dialects.insert(target.dialect.to_lowercase()) {
                bail!(
                    "The source ({}) and target ({}) database cannot be of the same dbms_type",
                    self.source.name,
                    target.name
                );
            }
            if !target.to_large_object.is_empty() && !target.from_large_object.is_empty() {
                bail!(
                    "A target database can either include {{to_large_object}} or {{from_large_object}} but not both"
                );
            }
            for rule in target.to_large_object.iter().chain(&target.from_large_object) {
                if rule.translate_all && !rule.columns.is_empty() {
                    bail!(
                        "If {{translate_all=true}} is configured a list of columns is not supported. Check the config of target database '{}'",
                        target.name
                    );
                }
                if !rule.translate_all && rule.columns.is_empty() {
                    bail!(
                        "If {{translate_all=false}} a list of columns must be configured. Check the config of target database '{}'",
                        target.name
                    );
                }
            }
        }
        Ok(())
    }

    /// The single target database.
    pub fn target(&self) -> Result<&DatabaseConfig> {
        self.targets
            .first()
            .context("The configuration needs to contain exactly one target database")
    }

    /// Dialects to build catalogs for: source first, then target.
    pub fn dialects(&self) -> Result<Vec<&str>> {
        Ok(vec![self.source.dialect.as_str(), self.target()?.dialect.as_str()])
    }

    pub fn large_object_rules(&self) -> Result<LargeObjectRules> {
        let target = self.target()?;
        Ok(LargeObjectRules::new(
            target.to_large_object.clone(),
            target.from_large_object.clone(),
        ))
    }
}
