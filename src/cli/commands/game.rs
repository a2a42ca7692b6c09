//! Install, launch and reset commands

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Subcommand;
use futures::StreamExt;
use serde::Serialize;

use ashfall::GameVariant;
use ashfall::interaction::Interaction;
use ashfall::progress::{InstallPhase, ProgressEvent};

use crate::cli::Session;
use crate::cli::commands::release::load_releases;
use crate::cli::output::{
    OutputFormat, flag, format_size, print_formatted, print_success, should_show_progress,
};

#[derive(Subcommand, Debug)]
pub enum GameCommands {
    /// Install a release (defaults to the newest one)
    Install {
        release: Option<String>,

        /// Game variant (uses launcher.default_variant if not specified)
        #[arg(short, long)]
        variant: Option<GameVariant>,
    },

    /// Launch a release (defaults to the installed one)
    Play {
        release: Option<String>,

        #[arg(short, long)]
        variant: Option<GameVariant>,
    },

    /// Launch a release straight into a world
    Resume {
        release: Option<String>,

        /// World to load (defaults to the last played one)
        #[arg(long)]
        world: Option<String>,

        #[arg(short, long)]
        variant: Option<GameVariant>,
    },

    /// Show what can be done with a release right now
    Actions {
        release: Option<String>,

        #[arg(short, long)]
        variant: Option<GameVariant>,
    },

    /// Wipe launcher-managed data for a variant (saves are kept)
    Reset {
        #[arg(short, long)]
        variant: Option<GameVariant>,

        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Serialize)]
struct InstallResult {
    variant: GameVariant,
    version: String,
    release_type: &'static str,
}

#[derive(Serialize)]
struct LaunchResult<'a> {
    variant: GameVariant,
    release: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    world: Option<&'a str>,
}

pub async fn run(
    command: GameCommands,
    session: &Session,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    match command {
        GameCommands::Install { release, variant } => {
            install(session, session.variant(variant)?, release, format, quiet).await
        }
        GameCommands::Play { release, variant } => {
            play(session, session.variant(variant)?, release, format).await
        }
        GameCommands::Resume {
            release,
            world,
            variant,
        } => resume(session, session.variant(variant)?, release, world, format).await,
        GameCommands::Actions { release, variant } => {
            actions(session, session.variant(variant)?, release, format).await
        }
        GameCommands::Reset { variant, yes } => {
            reset(session, session.variant(variant)?, yes, quiet).await
        }
    }
}

async fn install(
    session: &Session,
    variant: GameVariant,
    release: Option<String>,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let release = match release {
        Some(release) => release,
        None => load_releases(session, variant)
            .await?
            .first()
            .map(|r| r.version.clone())
            .with_context(|| format!("No releases available for {}", variant.name()))?,
    };

    let orchestrator = session.launcher.orchestrator(variant);
    let mut handle = orchestrator.start_install(&release)?;

    let show_progress = should_show_progress(quiet, format);
    let refresh = session.config.launcher.progress_refresh();
    if let Some(mut events) = handle.events() {
        let mut last_draw: Option<Instant> = None;
        while let Some(event) = events.next().await {
            if !show_progress {
                continue;
            }
            match event {
                ProgressEvent::Phase(InstallPhase::Downloading(p)) => {
                    let done = p.total_bytes > 0 && p.bytes_downloaded == p.total_bytes;
                    if !done && last_draw.is_some_and(|t| t.elapsed() < refresh) {
                        continue;
                    }
                    last_draw = Some(Instant::now());
                    if p.total_bytes > 0 {
                        eprint!(
                            "\rDownloading: {}% ({} / {})   ",
                            (p.fraction() * 100.0) as u32,
                            format_size(p.bytes_downloaded),
                            format_size(p.total_bytes)
                        );
                    } else {
                        eprint!("\rDownloading: {}   ", format_size(p.bytes_downloaded));
                    }
                }
                ProgressEvent::Phase(phase @ InstallPhase::Installing) => {
                    eprint!("\r{:<48}", phase.description());
                }
                ProgressEvent::Finished(_) => eprintln!(),
            }
        }
    }

    let installed = handle.wait().await?;
    let result = InstallResult {
        variant,
        version: installed.version,
        release_type: installed.release_type.label(),
    };
    if format == OutputFormat::Json {
        print_formatted(&result, format, |_| String::new());
    } else {
        print_success(
            &format!(
                "Installed {} {} ({})",
                result.variant.name(),
                result.version,
                result.release_type
            ),
            quiet,
        );
    }
    Ok(())
}

/// Release named on the command line, else the installed one
async fn selected_release(session: &Session, variant: GameVariant, release: Option<String>) -> Result<String> {
    match release {
        Some(release) => Ok(release),
        // An empty id is rejected by the orchestrator as "no release selected".
        None => Ok(session
            .launcher
            .active_release(variant)
            .await?
            .unwrap_or_default()),
    }
}

async fn play(
    session: &Session,
    variant: GameVariant,
    release: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let release = selected_release(session, variant, release).await?;
    session.launcher.orchestrator(variant).play(&release).await?;

    let result = LaunchResult {
        variant,
        release: &release,
        world: None,
    };
    print_formatted(&result, format, |r| {
        format!("Launched {} {}", r.variant.name(), r.release)
    });
    Ok(())
}

async fn resume(
    session: &Session,
    variant: GameVariant,
    release: Option<String>,
    world: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let release = selected_release(session, variant, release).await?;
    let orchestrator = session.launcher.orchestrator(variant);

    let world = match world {
        Some(world) => world,
        None => orchestrator
            .last_played_world()
            .await?
            .with_context(|| format!("{} has no last played world", variant.name()))?,
    };
    orchestrator.resume(&release, &world).await?;

    let result = LaunchResult {
        variant,
        release: &release,
        world: Some(&world),
    };
    print_formatted(&result, format, |r| {
        format!(
            "Launched {} {} into {}",
            r.variant.name(),
            r.release,
            r.world.unwrap_or_default()
        )
    });
    Ok(())
}

async fn actions(
    session: &Session,
    variant: GameVariant,
    release: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    load_releases(session, variant).await?;
    let release = selected_release(session, variant, release).await?;
    let merged = session.launcher.interaction(variant, Some(&release)).await;

    print_formatted(&merged, format, format_actions_text);
    Ok(())
}

fn format_actions_text(merged: &Interaction) -> String {
    let mut lines = vec![format!(
        "{:<24} enabled: {}",
        merged.label.text(),
        flag(merged.primary_enabled)
    )];
    if let Some(progress) = merged.progress {
        lines.push(format!(
            "  {} / {}",
            format_size(progress.bytes_downloaded),
            format_size(progress.total_bytes)
        ));
    }
    if let Some(enabled) = merged.resume_enabled {
        lines.push(format!("{:<24} enabled: {}", "Resume Last World", flag(enabled)));
    }
    if let Some(upgrade) = &merged.upgrade {
        lines.push(format!(
            "{:<24} enabled: {} (target: {})",
            "Upgrade",
            flag(upgrade.enabled && upgrade.main_enabled),
            upgrade.target.as_deref().unwrap_or("-")
        ));
    }
    if let Some(hint) = merged.hint {
        lines.push(hint.to_string());
    }
    lines.join("\n")
}

async fn reset(session: &Session, variant: GameVariant, yes: bool, quiet: bool) -> Result<()> {
    if !yes {
        anyhow::bail!(
            "Refusing to reset {} without --yes. This removes every installed release.",
            variant.name()
        );
    }
    session.launcher.master_reset(variant).await?;
    print_success(&format!("Reset {}", variant.name()), quiet);
    Ok(())
}
