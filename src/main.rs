// ABOUTME: CLI entry point for changelog-transfer
// ABOUTME: Parses commands and routes to appropriate handlers

use changelog_transfer::commands;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "changelog-transfer")]
#[command(about = "Changelog-driven data transfer between two relational databases", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the run configuration (TOML, or JSON with a .json extension)
    #[arg(long, global = true, default_value = "transfer.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the configuration file
    ValidateConfig,
    /// Replay the changelog (or load the interchange document)
    ValidateChangelog,
    /// Check that the source database can be reached
    ValidateSource,
    /// Check that the target database can be reached
    ValidateTarget,
    /// Replay the changelog and write the catalogs as JSON
    ChangelogToJson {
        /// Output file (default: changelog-<timestamp>.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Delete target data (optional), transfer all rows, compare (optional)
    TransferData {
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Compare source and target data row by row
    CompareData,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = commands::validate_config(&cli.config)?;

    match cli.command {
        Commands::ValidateConfig => Ok(()),
        Commands::ValidateChangelog => commands::validate_changelog(&config),
        Commands::ValidateSource => commands::validate_source(&config).await,
        Commands::ValidateTarget => commands::validate_target(&config).await,
        Commands::ChangelogToJson { output } => {
            commands::changelog_to_json(&config, output.as_deref())?;
            Ok(())
        }
        Commands::TransferData { yes } => {
            let summary = commands::transfer_data(&config, yes).await?;
            if summary.transfer.rows_failed() > 0 || !summary.transfer.skipped_tables.is_empty() {
                tracing::warn!("⚠ Transfer finished with failures, see the log above");
            } else {
                tracing::info!("✓ Transfer complete");
            }
            Ok(())
        }
        Commands::CompareData => {
            let report = commands::compare_data(&config).await?;
            if !report.is_clean() {
                tracing::warn!("⚠ Source and target data differ");
            }
            Ok(())
        }
    }
}
