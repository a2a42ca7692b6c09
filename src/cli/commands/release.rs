//! Release listing, status and upgrade commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;

use ashfall::upgrade::UpgradeInfo;
use ashfall::{GameVariant, InstallationStatus, Release};

use crate::cli::Session;
use crate::cli::output::{OutputFormat, flag, print_formatted};

#[derive(Subcommand, Debug)]
pub enum ReleaseCommands {
    /// List releases, newest first as delivered by the backend
    List {
        /// Game variant (uses launcher.default_variant if not specified)
        #[arg(short, long)]
        variant: Option<GameVariant>,

        /// Maximum number of releases to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show the installation status of a release
    Status {
        /// Release id
        release: String,

        #[arg(short, long)]
        variant: Option<GameVariant>,
    },

    /// Show the release the backend considers installed
    Active {
        #[arg(short, long)]
        variant: Option<GameVariant>,
    },

    /// Show upgrade options for a release (defaults to the active one)
    Upgrades {
        release: Option<String>,

        #[arg(short, long)]
        variant: Option<GameVariant>,
    },
}

#[derive(Serialize)]
struct VariantEntry {
    id: &'static str,
    name: &'static str,
}

#[derive(Serialize)]
struct ReleaseEntry {
    version: String,
    release_type: &'static str,
    latest: bool,
    active: bool,
}

#[derive(Serialize)]
struct StatusResult<'a> {
    variant: GameVariant,
    release: &'a str,
    status: InstallationStatus,
}

#[derive(Serialize)]
struct ActiveResult {
    variant: GameVariant,
    active_release: Option<String>,
}

pub async fn run(
    command: ReleaseCommands,
    session: &Session,
    format: OutputFormat,
    _quiet: bool,
) -> Result<()> {
    match command {
        ReleaseCommands::List { variant, limit } => {
            list(session, session.variant(variant)?, limit, format).await
        }
        ReleaseCommands::Status { release, variant } => {
            status(session, session.variant(variant)?, &release, format).await
        }
        ReleaseCommands::Active { variant } => active(session, session.variant(variant)?, format).await,
        ReleaseCommands::Upgrades { release, variant } => {
            upgrades(session, session.variant(variant)?, release, format).await
        }
    }
}

pub fn variants(format: OutputFormat) -> Result<()> {
    let entries: Vec<VariantEntry> = GameVariant::ALL
        .iter()
        .map(|v| VariantEntry {
            id: v.id(),
            name: v.name(),
        })
        .collect();

    print_formatted(&entries, format, |entries| {
        entries
            .iter()
            .map(|e| format!("{:<20} {}", e.id, e.name))
            .collect::<Vec<_>>()
            .join("\n")
    });
    Ok(())
}

/// Release list for `variant`, fetched if nothing is cached yet
pub async fn load_releases(session: &Session, variant: GameVariant) -> Result<Vec<Release>> {
    let cached = session.launcher.releases(variant);
    if !cached.is_empty() {
        return Ok(cached);
    }
    let timeout = session.config.backend.request_timeout();
    Ok(session.launcher.load_releases(variant, timeout).await?)
}

async fn list(session: &Session, variant: GameVariant, limit: usize, format: OutputFormat) -> Result<()> {
    let releases = load_releases(session, variant).await?;
    let active = session.launcher.active_release(variant).await?;

    let entries: Vec<ReleaseEntry> = releases
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, r)| ReleaseEntry {
            version: r.version.clone(),
            release_type: r.release_type.label(),
            latest: i == 0,
            active: active.as_deref() == Some(r.version.as_str()),
        })
        .collect();

    print_formatted(&entries, format, |entries| {
        if entries.is_empty() {
            return format!("No releases found for {}", variant.name());
        }
        let mut lines = vec![format!("{} releases:", variant.name())];
        for e in entries {
            let mut markers = Vec::new();
            if e.latest {
                markers.push("latest");
            }
            if e.active {
                markers.push("installed");
            }
            let suffix = if markers.is_empty() {
                String::new()
            } else {
                format!(" ({})", markers.join(", "))
            };
            lines.push(format!("  {:<32} {}{}", e.version, e.release_type, suffix));
        }
        lines.join("\n")
    });
    Ok(())
}

async fn status(session: &Session, variant: GameVariant, release: &str, format: OutputFormat) -> Result<()> {
    let status = session.launcher.fetch_status(variant, release).await?;
    let result = StatusResult {
        variant,
        release,
        status,
    };
    print_formatted(&result, format, |r| {
        format!("{} {}: {}", r.variant.name(), r.release, r.status.description())
    });
    Ok(())
}

async fn active(session: &Session, variant: GameVariant, format: OutputFormat) -> Result<()> {
    let active_release = session.launcher.active_release(variant).await?;
    let result = ActiveResult {
        variant,
        active_release,
    };
    print_formatted(&result, format, |r| match &r.active_release {
        Some(release) => format!("{}: {}", r.variant.name(), release),
        None => format!("{}: no release installed", r.variant.name()),
    });
    Ok(())
}

async fn upgrades(
    session: &Session,
    variant: GameVariant,
    release: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    load_releases(session, variant).await?;
    let active = session.launcher.active_release(variant).await?;
    let selected = release.or(active);
    let info = session.launcher.upgrade_info(variant, selected.as_deref());

    print_formatted(&info, format, format_upgrades_text);
    Ok(())
}

fn format_upgrades_text(info: &UpgradeInfo) -> String {
    let mut lines = vec![format!(
        "Upgrade available: {}",
        flag(info.should_allow_upgrading)
    )];
    if let Some(latest) = &info.latest_release_id {
        lines.push(format!("Latest release: {}", latest));
    }
    for option in &info.options {
        let note = option
            .tooltip
            .map(|t| format!(" [{}]", t))
            .unwrap_or_default();
        lines.push(format!("  {:<26} {}{}", option.label, option.target_version, note));
    }
    lines.join("\n")
}
