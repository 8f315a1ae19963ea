//! OnDemand CLI
//!
//! Single binary for the tunnel wrapper:
//! - run: wrap a build command in a tunnel lifecycle
//! - agent: serve launch requests on an execution node
//! - management commands (browsers, ping, config)

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use od_core::browser::AutomationKind;
use ondemand::commands::{self, RunArgs};
use ondemand::output::print_error;

#[derive(Parser)]
#[command(name = "ondemand")]
#[command(author, version, about = "Run CI jobs with a managed testing-cloud tunnel")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a build command with a tunnel around it
    Run {
        /// Job configuration file
        #[arg(short, long)]
        job: Option<PathBuf>,
        /// Project name
        #[arg(long, env = "JOB_NAME", default_value = "job")]
        project: String,
        /// Build number
        #[arg(long, env = "BUILD_NUMBER", default_value_t = 1)]
        number: u64,
        /// Agent address of the execution node running the job
        #[arg(long)]
        node: Option<SocketAddr>,
        /// Per-axis variable (KEY=VALUE), repeatable
        #[arg(long = "axis", value_parser = commands::parse_axis)]
        axes: Vec<(String, String)>,
        /// Encoding of the command's output (defaults to UTF-8)
        #[arg(long)]
        encoding: Option<String>,
        /// Tag the job's sessions with the build number at teardown
        #[arg(long)]
        report: bool,
        /// Command to run, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Serve launch requests on this execution node
    Agent {
        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
        /// Directory for staged tunnel binaries (overrides config)
        #[arg(long)]
        staging: Option<PathBuf>,
    },

    /// List the browsers offered for an automation flavor
    Browsers {
        /// selenium, webdriver or appium
        kind: AutomationKind,
    },

    /// Check that a node agent answers
    Ping {
        /// Agent address
        addr: SocketAddr,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Check a tunnel working directory (the configured one by default)
    CheckDir { dir: Option<String> },
    /// Check the configured credentials against the REST API
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout carries the job log, so diagnostics go to stderr
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match dispatch(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Run {
            job,
            project,
            number,
            node,
            axes,
            encoding,
            report,
            command,
        } => {
            let args = RunArgs {
                job,
                project,
                number,
                node,
                axes,
                encoding,
                report,
                command,
            };
            return commands::run_command(config, args).await;
        }

        Commands::Agent { bind, staging } => {
            commands::agent_command(config, bind, staging).await?;
        }

        Commands::Browsers { kind } => {
            commands::browsers_command(config, kind).await?;
        }

        Commands::Ping { addr } => {
            commands::ping_command(addr).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config)?,
            ConfigAction::Path => commands::config_path(config),
            ConfigAction::Init { force } => commands::config_init(config, force)?,
            ConfigAction::CheckDir { dir } => commands::config_check_dir(config, dir)?,
            ConfigAction::Validate => commands::config_validate(config).await?,
        },
    }

    Ok(0)
}
