//! Preflight CLI - validate cluster hosts before provisioning.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use preflight::{ClusterCheck, ClusterInfoBrief, PreflightConfig, ProbeScript, SshExecutor};

/// Preflight CLI - check OS release, hardware and time sync of cluster hosts.
#[derive(Parser)]
#[command(name = "preflight")]
#[command(about = "Validate cluster hosts before provisioning")]
struct Cli {
    /// Cluster brief listing hosts and SSH credentials.
    #[arg(long, default_value = "cluster-info-brief.yaml")]
    brief: PathBuf,

    /// Preflight configuration (policy, SSH settings). Defaults apply when omitted.
    #[arg(long, env = "PREFLIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Probe script to run instead of the bundled one.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Parameters passed to the probe script.
    #[arg(long, default_value = "")]
    script_params: String,

    /// Where to write the detailed cluster info.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Number of leading hosts tagged as masters.
    #[arg(long)]
    master_count: Option<usize>,

    /// Per-host timeout in seconds for distribution and collection.
    #[arg(long)]
    host_timeout: Option<u64>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => PreflightConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PreflightConfig::default(),
    };
    if let Some(output) = cli.output {
        config.output_path = output;
    }
    if let Some(count) = cli.master_count {
        config.master_count = count;
    }
    if cli.host_timeout.is_some() {
        config.host_timeout_secs = cli.host_timeout;
    }

    let brief = ClusterInfoBrief::load(&cli.brief)
        .with_context(|| format!("Failed to load brief {}", cli.brief.display()))?;
    let probe = match &cli.script {
        Some(path) => ProbeScript::from_file(path)
            .with_context(|| format!("Failed to read probe {}", path.display()))?,
        None => ProbeScript::bundled(),
    }
    .with_params(cli.script_params);

    let check = ClusterCheck::new(brief, config)
        .context("Invalid cluster brief")?
        .with_probe(probe);
    let metadata = check.metadata();
    info!(check = check.name(), "{}", metadata.description);

    let executor = Arc::new(SshExecutor::new(check.config().ssh.clone()));
    let verdict = check.validate(executor).await;

    println!("{verdict}");
    if verdict.passed {
        println!(
            "📄 Detailed cluster info written to {}",
            check.config().output_path.display()
        );
        Ok(ExitCode::SUCCESS)
    } else {
        println!("   {}", metadata.explain);
        Ok(ExitCode::FAILURE)
    }
}
