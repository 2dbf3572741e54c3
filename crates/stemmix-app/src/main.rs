//! Stemmix - two-track stem mixing from the command line.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use stemmix_ai::{CapabilityReport, ResultCache, SeparationMethod};
use stemmix_core::{HostProfile, MixSettings, OptimizationLevel, StemmixConfig};
use stemmix_media::SystemRunner;
use stemmix_workflow::{MixProgress, MixRequest, Orchestrator};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "stemmix")]
#[command(about = "Separate, enhance and mix two tracks into one master", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mix two tracks and print the diagnostics as JSON.
    Mix {
        primary: PathBuf,
        secondary: PathBuf,

        /// MixSettings JSON file.
        #[arg(short, long)]
        settings: Option<PathBuf>,

        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Force an optimization level instead of detecting one.
        #[arg(long)]
        level: Option<OptimizationLevel>,

        /// Keep the job workspace after finishing.
        #[arg(long)]
        retain: bool,

        #[arg(short, long)]
        quiet: bool,
    },

    /// Analyze a track and print its features.
    Analyze { input: PathBuf },

    /// Report detected resources and tool availability.
    Doctor,

    /// Cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove stale and broken entries.
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let mut config = StemmixConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Mix {
            primary,
            secondary,
            settings,
            output_dir,
            level,
            retain,
            quiet,
        } => {
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            if level.is_some() {
                config.force_level = level;
            }
            config.retain_artifacts |= retain;
            run_mix(config, &primary, &secondary, settings.as_deref(), quiet).await
        }
        Commands::Analyze { input } => run_analyze(config, &input).await,
        Commands::Doctor => run_doctor(&config),
        Commands::Cache {
            action: CacheAction::Purge,
        } => {
            let removed = ResultCache::from_config(&config)
                .purge_stale()
                .context("purging cache")?;
            info!(removed, "Cache purged");
            println!("{removed}");
            Ok(())
        }
    }
}

async fn run_mix(
    config: StemmixConfig,
    primary: &Path,
    secondary: &Path,
    settings: Option<&Path>,
    quiet: bool,
) -> Result<()> {
    let settings = match settings {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("reading settings {}", path.display()))?;
            MixSettings::from_json(&data)
                .with_context(|| format!("parsing settings {}", path.display()))?
        }
        None => MixSettings::default(),
    };

    let orchestrator = Orchestrator::new(SystemRunner, config);
    let request = MixRequest {
        primary: orchestrator
            .load_track(primary)
            .await
            .with_context(|| format!("loading {}", primary.display()))?,
        secondary: orchestrator
            .load_track(secondary)
            .await
            .with_context(|| format!("loading {}", secondary.display()))?,
        settings,
    };

    let show = |p: MixProgress| {
        if !quiet {
            eprint!(
                "\r{:>3}% {:<24}",
                (p.overall_progress * 100.0).round() as u32,
                p.message
            );
            let _ = std::io::stderr().flush();
        }
    };
    let diagnostics = orchestrator.run(&request, &show).await.context("mix failed")?;
    if !quiet {
        eprintln!();
    }
    println!("{}", diagnostics.to_json()?);
    Ok(())
}

async fn run_analyze(config: StemmixConfig, input: &Path) -> Result<()> {
    let orchestrator = Orchestrator::new(SystemRunner, config);
    let track = orchestrator
        .load_track(input)
        .await
        .with_context(|| format!("analyzing {}", input.display()))?;
    let out = serde_json::json!({
        "source": track.source(),
        "cached": track.features_cached(),
        "features": track.features(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn run_doctor(config: &StemmixConfig) -> Result<()> {
    let host = HostProfile::detect(config);
    let report = CapabilityReport::detect(&host);
    println!("{}", serde_json::to_string_pretty(&report)?);
    let best = report.best_separation();
    if best == SeparationMethod::Ml {
        info!(best = best.as_str(), "Best separation tier");
    } else {
        warn!(best = best.as_str(), "ML separation unavailable; stems will be approximated");
    }
    if !report.can_mix() {
        anyhow::bail!("ffmpeg is not available; mixing is impossible on this host");
    }
    Ok(())
}
