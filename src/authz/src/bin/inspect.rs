//! # Rule Table Inspector
//!
//! Loads a seed of permissions and roles into the configured backend and
//! prints the resolved decision table as JSON.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `ROLEKEEP_CONFIG` - Configuration file (TOML)
//! - `ROLEKEEP_DATABASE_URL` - Storage connection target
//! - `ROLEKEEP_STORAGE_BACKEND` - `memory` or `postgres`
//! - `RUST_LOG` - Log level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use rolekeep_authz::{IncludesExpansion, Rbac, RbacConfig, RuleTable, Seed};
use std::path::{Path, PathBuf};
use tracing::info;

/// Rolekeep rule table inspector
#[derive(Parser)]
#[command(name = "rolekeep-inspect")]
#[command(about = "Resolve roles and permissions into a decision table")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "ROLEKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Seed file with permissions and roles (.json or .toml)
    #[arg(short, long)]
    seed: Option<PathBuf>,

    /// Only print these roles
    #[arg(short, long = "role")]
    roles: Vec<String>,

    /// Expand umbrella permissions down to leaf permissions
    #[arg(long)]
    transitive: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => RbacConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RbacConfig::default(),
    };
    config.apply_env().context("Invalid environment override")?;
    if cli.transitive {
        config.resolver.includes = IncludesExpansion::Transitive;
    }

    let rbac = Rbac::from_config(config).context("Failed to initialize rule store")?;

    if let Some(path) = &cli.seed {
        let seed = read_seed(path)?;
        rbac.import(seed).await.context("Seed import failed")?;
    }

    let provider = rbac.provider().await.context("Failed to resolve rule table")?;
    let table: RuleTable = if cli.roles.is_empty() {
        provider.table().clone()
    } else {
        provider
            .table()
            .iter()
            .filter(|(code, _)| cli.roles.contains(*code))
            .map(|(code, entry)| (code.clone(), entry.clone()))
            .collect()
    };

    info!("Resolved {} roles (generation {})", table.len(), provider.generation());
    println!("{}", serde_json::to_string_pretty(&table)?);

    Ok(())
}

fn read_seed(path: &Path) -> Result<Seed> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;

    let seed = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Seed::from_toml_str(&text)?,
        _ => Seed::from_json_str(&text)?,
    };
    Ok(seed)
}
