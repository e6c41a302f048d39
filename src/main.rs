//! sortie CLI - integration-test orchestrator.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sortie::config::{self, Config, PlatformConfig};
use sortie::harness::{Harness, HarnessOptions};
use sortie::platform::Flight;
use sortie::platform::local::{self, LocalFlight};
use sortie::register::Registry;
use sortie::report::{ConsoleReporter, JUnitReporter, MultiReporter};
use sortie::selector::{Selection, Target, list_eligible};
use sortie::{suite, util};

const DEFAULT_CONFIG: &str = "sortie.toml";

#[derive(Parser)]
#[command(name = "sortie")]
#[command(about = "Integration-test orchestrator for ephemeral machine clusters", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to ./sortie.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// Test name patterns (`*` and `?` wildcards); all tests if omitted
    patterns: Vec<String>,

    /// Override the target distribution
    #[arg(long)]
    distro: Option<String>,

    /// Override the target architecture
    #[arg(long)]
    arch: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Override maximum parallel tests
        #[arg(short, long)]
        parallel: Option<usize>,

        /// JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,
    },

    /// List registered tests and whether they would run
    List {
        #[command(flatten)]
        target: TargetArgs,

        /// Evaluate against this platform instead of the configured one
        #[arg(long)]
        platform: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run {
            target,
            parallel,
            junit,
        } => run_tests(config_path, target, parallel, junit, cli.verbose).await,
        Commands::List {
            target,
            platform,
            format,
        } => list_tests(config_path, target, platform, &format),
        Commands::Validate => validate_config(config_path),
    }
}

/// Loads the explicit config, else `./sortie.toml` if it exists, else defaults.
fn load(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            info!("Using {}", DEFAULT_CONFIG);
            config::load_config(Path::new(DEFAULT_CONFIG))
        }
        None => Ok(Config::default()),
    }
}

fn registry() -> Result<Registry> {
    let mut registry = Registry::new();
    suite::register_all(&mut registry).context("Failed to register built-in tests")?;
    registry.close();
    Ok(registry)
}

fn platform_name(config: &Config) -> &'static str {
    match &config.platform {
        PlatformConfig::Local(_) => local::PLATFORM,
    }
}

fn build_target(config: &Config, platform: &str, args: TargetArgs) -> Result<Target> {
    let distro = args.distro.unwrap_or_else(|| config.target.distro.clone());
    let arch = args
        .arch
        .or_else(|| config.target.arch.clone())
        .unwrap_or_else(|| util::host_arch().to_string());
    let patterns = if args.patterns.is_empty() {
        config.target.patterns.clone()
    } else {
        args.patterns
    };

    let target = Target::new(platform, distro, arch)
        .with_patterns(&patterns)?
        .with_exclude_flags(config.target.exclude_flags.iter().copied());
    Ok(target)
}

async fn run_tests(
    config_path: Option<&Path>,
    target_args: TargetArgs,
    parallel_override: Option<usize>,
    junit_path: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let mut config = load(config_path)?;

    if let Some(parallel) = parallel_override {
        config.harness.parallel = parallel;
    }

    let target = build_target(&config, platform_name(&config), target_args)?;
    let registry = registry()?;

    match &config.platform {
        PlatformConfig::Local(cfg) => {
            let flight = LocalFlight::new(cfg).context("Failed to create local flight")?;
            run_with(&config, flight, &registry, &target, junit_path, verbose).await
        }
    }
}

async fn run_with<F: Flight>(
    config: &Config,
    flight: F,
    registry: &Registry,
    target: &Target,
    junit_path: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    info!("Using platform: {}", flight.platform());

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling running tests");
            interrupt.cancel();
        }
    });

    let reporter = create_reporter(config, target, junit_path, verbose);
    let harness = Harness::new(flight, reporter, HarnessOptions::from(&config.harness))
        .with_cancellation_token(token);

    let result = harness.run(registry, target).await;

    if let Err(e) = harness.flight().destroy().await {
        warn!("Failed to destroy flight: {}", e);
    }

    let code = result?.exit_code();
    // Releases the flight's scratch directory; exit() skips destructors.
    drop(harness);
    std::process::exit(code);
}

fn create_reporter(
    config: &Config,
    target: &Target,
    junit_path: Option<PathBuf>,
    verbose: bool,
) -> MultiReporter {
    let mut reporter = MultiReporter::new().with_reporter(ConsoleReporter::new(verbose));

    if config.report.junit || junit_path.is_some() {
        let path = junit_path
            .unwrap_or_else(|| config.report.output_dir.join(&config.report.junit_file));
        let suite_name = format!("{}-{}", target.distro(), target.platform());
        reporter = reporter.with_reporter(JUnitReporter::new(path).with_testsuite_name(suite_name));
    }

    reporter
}

#[derive(Serialize)]
struct ListEntry<'a> {
    name: &'a str,
    eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

fn list_tests(
    config_path: Option<&Path>,
    target_args: TargetArgs,
    platform: Option<String>,
    format: &str,
) -> Result<()> {
    let config = load(config_path)?;
    let platform = platform.unwrap_or_else(|| platform_name(&config).to_string());
    let target = build_target(&config, &platform, target_args)?;
    let listing = list_eligible(&registry()?, &target)?;

    match format {
        "json" => {
            let entries: Vec<ListEntry<'_>> = listing
                .iter()
                .map(|l| ListEntry {
                    name: &l.name,
                    eligible: l.selection.is_eligible(),
                    reason: match l.selection {
                        Selection::Eligible => None,
                        Selection::Skip(reason) => Some(reason.to_string()),
                    },
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            let eligible = listing.iter().filter(|l| l.selection.is_eligible()).count();
            println!(
                "{} of {} tests eligible for {}/{}/{}:",
                eligible,
                listing.len(),
                target.platform(),
                target.distro(),
                target.arch()
            );
            for l in &listing {
                match l.selection {
                    Selection::Eligible => println!("  {}", l.name),
                    Selection::Skip(reason) => println!(
                        "  {} {}",
                        l.name,
                        console::style(format!("(skip: {})", reason)).dim()
                    ),
                }
            }
        }
    }

    Ok(())
}

fn validate_config(config_path: Option<&Path>) -> Result<()> {
    match load(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Parallel: {}", config.harness.parallel);
            println!("  Test timeout: {}s", config.harness.test_timeout_secs);
            println!("  Teardown timeout: {}s", config.harness.teardown_timeout_secs);
            println!("  Platform: {}", platform_name(&config));
            println!("  Distro: {}", config.target.distro);
            println!(
                "  Arch: {}",
                config.target.arch.as_deref().unwrap_or(util::host_arch())
            );

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}
