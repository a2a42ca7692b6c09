//! CLI module for the Ashfall launcher
//!
//! Provides a one-shot command-line interface and an interactive shell over
//! the orchestration core.

mod commands;
mod output;
mod shell;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;

use ashfall::config::Config;
use ashfall::{GameVariant, HttpGateway, Launcher};

pub use output::OutputFormat;

/// Ashfall - multi-variant game launcher
#[derive(Parser, Debug)]
#[command(name = "ashfall")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format
    #[command(flatten)]
    pub output: OutputOptions,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output formatting options
#[derive(Parser, Debug, Clone)]
pub struct OutputOptions {
    /// Output in JSON format (for machine parsing)
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl OutputOptions {
    pub fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the game variants the launcher manages
    Variants,

    /// Release listings, status and upgrade paths
    Release {
        #[command(subcommand)]
        command: commands::release::ReleaseCommands,
    },

    /// Install, launch and reset games
    Game {
        #[command(subcommand)]
        command: commands::game::GameCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: commands::config::ConfigCommands,
    },

    /// Start an interactive shell
    Shell,
}

/// Connection to the backend, shared by every command of a shell session
pub struct Session {
    pub config: Config,
    pub launcher: Launcher<HttpGateway>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Connect to the configured backend and start routing its events.
    pub async fn connect() -> Result<Self> {
        let config = Config::load()?;
        let gateway = HttpGateway::new(&config.backend.url, config.backend.request_timeout())
            .context("Failed to create backend client")?;
        let launcher = Launcher::new(Arc::new(gateway));
        let router = launcher.start();

        let pump = launcher
            .gateway()
            .listen()
            .await
            .with_context(|| format!("Failed to connect to backend at {}", config.backend.url))?;
        let listener = tokio::spawn(async move {
            if let Err(e) = pump.await {
                tracing::warn!("Backend event stream failed: {}", e);
            }
        });

        Ok(Self {
            config,
            launcher,
            tasks: vec![router, listener],
        })
    }

    /// Reuse the session in `slot`, connecting first if there is none.
    pub async fn ensure(slot: &mut Option<Session>) -> Result<&Session> {
        let session = match slot.take() {
            Some(session) => session,
            None => Session::connect().await?,
        };
        Ok(slot.insert(session))
    }

    /// Variant named on the command line, else the configured default
    pub fn variant(&self, explicit: Option<GameVariant>) -> Result<GameVariant> {
        explicit.or(self.config.launcher.default_variant).context(
            "No variant given. Use --variant or set launcher.default_variant in the config",
        )
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Run the CLI with parsed arguments
pub async fn run(cli: Cli) -> Result<()> {
    let format = cli.output.format();
    let quiet = cli.output.quiet;

    if matches!(cli.command, Commands::Shell) {
        return shell::run().await;
    }

    let mut session = None;
    dispatch(cli.command, &mut session, format, quiet).await
}

/// Execute one command, connecting to the backend only when it needs one.
async fn dispatch(
    command: Commands,
    session: &mut Option<Session>,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    match command {
        Commands::Variants => commands::release::variants(format),
        Commands::Config { command } => commands::config::run(command, format, quiet).await,
        Commands::Release { command } => {
            let session = Session::ensure(session).await?;
            commands::release::run(command, session, format, quiet).await
        }
        Commands::Game { command } => {
            let session = Session::ensure(session).await?;
            commands::game::run(command, session, format, quiet).await
        }
        Commands::Shell => anyhow::bail!("Already in shell mode."),
    }
}
