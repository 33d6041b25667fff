//! Kaiwa CLI.
//!
//! Runs the session gateway on the terminal and manages its configuration.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

use clap::{Args, Parser, Subcommand};
use kaiwa::config::{self, KaiwaConfig};
use kaiwa::error::{DisplayError, KaiwaError, Result};
use kaiwa::gateway::GatewayBuilder;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Kaiwa - conversational sessions over a message bus
#[derive(Parser)]
#[command(name = "kaiwa")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "KAIWA_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway on the terminal
    Run(RunArgs),

    /// Write a default configuration file
    Init(InitArgs),

    /// Show configuration location and effective settings
    Status,

    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Session lifetime in seconds (overrides config)
    #[arg(long)]
    ttl_secs: Option<u64>,

    /// Background sweep interval in seconds (overrides config)
    #[arg(long)]
    sweep_interval_secs: Option<u64>,
}

#[derive(Args)]
struct InitArgs {
    /// Overwrite an existing configuration
    #[arg(short, long)]
    force: bool,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show configuration file path
    Path,
    /// Show effective configuration
    Show,
    /// Validate configuration
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = rt.block_on(run(cli));
    // Stdin reads block a runtime thread until the next line arrives.
    rt.shutdown_timeout(Duration::from_millis(200));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", DisplayError(&e));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "kaiwa={level},{}",
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let path = config::resolve_path(cli.config.as_deref());
    match cli.command {
        Commands::Run(args) => cmd_run(args, &path).await,
        Commands::Init(args) => cmd_init(args, &path).await,
        Commands::Status => cmd_status(&path).await,
        Commands::Config(args) => cmd_config(args, &path).await,
    }
}

async fn cmd_run(args: RunArgs, path: &Path) -> Result<()> {
    let mut builder = GatewayBuilder::new().load_config(Some(path)).await?;
    if let Some(secs) = args.ttl_secs {
        builder = builder.ttl(Duration::from_secs(secs));
    }
    if let Some(secs) = args.sweep_interval_secs {
        builder = builder.sweep_interval(Duration::from_secs(secs));
    }
    let gateway = builder.build()?;

    println!("Kaiwa running. Send 'profile' to start the wizard; 'quit' or Ctrl+C to stop.\n");

    gateway
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    let status = gateway.status().await;
    println!(
        "\nHandled {} messages, started {} sessions, saved {} profiles.",
        status.dispatcher.messages, status.dispatcher.sessions_started, status.profiles
    );
    for channel in &status.channels {
        println!(
            "{}: {} in, {} out ({} errors reported).",
            channel.name,
            channel.received,
            channel.delivered.total(),
            channel.delivered.diagnostics
        );
    }
    Ok(())
}

async fn cmd_init(args: InitArgs, path: &Path) -> Result<()> {
    if config::init_config(path, args.force).await? {
        println!("Configuration created: {}", path.display());
    } else {
        println!("Configuration already exists at: {}", path.display());
        println!("Use --force to overwrite.");
    }
    Ok(())
}

async fn cmd_status(path: &Path) -> Result<()> {
    println!("Kaiwa Status\n");
    println!("Configuration:");
    println!("  Path:   {}", path.display());
    println!("  Exists: {}", if path.exists() { "yes" } else { "no" });

    let config = match config::load_config(Some(path)).await {
        Ok(config) => {
            println!("  Valid:  yes");
            config
        }
        Err(e) => {
            println!("  Valid:  no ({e})");
            return Ok(());
        }
    };

    print_settings(&config);
    Ok(())
}

fn print_settings(config: &KaiwaConfig) {
    println!();
    println!("Sessions:");
    println!("  TTL:            {:?}", config.sessions.ttl());
    match config.sessions.sweep_interval() {
        Some(interval) => println!("  Sweep interval: {interval:?}"),
        None => println!("  Sweep interval: off"),
    }
    println!();
    println!("Bus:");
    println!("  Inbound capacity:   {}", config.bus.inbound_capacity);
    println!("  Broadcast capacity: {}", config.bus.broadcast_capacity);
    println!();
    println!("Channels:");
    println!(
        "  CLI: {} (user {})",
        if config.channels.cli.enabled {
            "enabled"
        } else {
            "disabled"
        },
        config.channels.cli.user_id
    );
}

async fn cmd_config(args: ConfigArgs, path: &Path) -> Result<()> {
    match args.command {
        ConfigCommands::Path => println!("{}", path.display()),
        ConfigCommands::Show => {
            let config = config::load_config(Some(path)).await?;
            let json = serde_json::to_string_pretty(&config).map_err(KaiwaError::from)?;
            println!("{json}");
        }
        ConfigCommands::Validate => {
            let content = match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    println!("error: configuration file does not exist");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            let parsed: KaiwaConfig = match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    println!("error: {e}");
                    return Ok(());
                }
            };
            let issues = parsed.check();
            if issues.is_empty() {
                println!("Configuration is valid");
            }
            for issue in issues {
                println!("{issue}");
            }
        }
    }
    Ok(())
}
