//! What the user can do right now for one variant.
//!
//! [`merge`] is the single place where cached status, install state, the
//! running slot and upgrade eligibility are combined into actions.

use serde::Serialize;

use crate::install::OrchestratorState;
use crate::progress::InstallPhase;
use crate::release::{DownloadProgress, InstallationStatus};
use crate::upgrade::UpgradeInfo;
use crate::variant::GameVariant;

/// Hint shown while the selected release cannot be installed
pub const NOT_AVAILABLE_HINT: &str =
    "This release is not yet available. Try again in a couple of hours.";

/// Label of the primary action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionLabel {
    SelectRelease,
    Running,
    Downloading,
    Installing,
    Loading,
    Play,
    NotAvailable,
    Install,
}

impl ActionLabel {
    pub fn text(&self) -> &'static str {
        match self {
            ActionLabel::SelectRelease => "Select a Release to Play",
            ActionLabel::Running => "Running...",
            ActionLabel::Downloading => "Downloading...",
            ActionLabel::Installing => "Installing...",
            ActionLabel::Loading => "Loading...",
            ActionLabel::Play => "Play",
            ActionLabel::NotAvailable => "Not Available",
            ActionLabel::Install => "Install",
        }
    }
}

/// What the primary action does when triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrimaryAction {
    Play,
    Install,
}

/// Upgrade affordance, present only when upgrading is allowed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeAction {
    /// Release the main "Upgrade" action installs
    pub target: Option<String>,
    pub enabled: bool,
    /// Main action is pointless when the head is already selected
    pub main_enabled: bool,
}

/// Everything that feeds the merge
#[derive(Debug, Clone)]
pub struct InteractionInputs<'a> {
    pub variant: GameVariant,
    pub selected_release_id: Option<&'a str>,
    pub status: InstallationStatus,
    /// The last status fetch for the selection failed
    pub status_error: bool,
    pub install: &'a OrchestratorState,
    /// Slot holder, including a launch that has not started yet
    pub currently_playing: Option<GameVariant>,
    pub last_played_world: Option<&'a str>,
    pub upgrade: Option<&'a UpgradeInfo>,
}

/// Result of the merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interaction {
    pub label: ActionLabel,
    pub primary: PrimaryAction,
    pub primary_enabled: bool,
    /// `None` when the resume action is hidden
    pub resume_enabled: Option<bool>,
    pub upgrade: Option<UpgradeAction>,
    /// Byte progress while this variant is downloading
    pub progress: Option<DownloadProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

pub fn merge(inputs: &InteractionInputs<'_>) -> Interaction {
    let selected = inputs.selected_release_id.filter(|id| !id.is_empty());
    let phase = match inputs.install {
        OrchestratorState::Idle => None,
        OrchestratorState::Installing { phase, .. } => Some(*phase),
    };
    let this_running = inputs.currently_playing == Some(inputs.variant);
    let any_running = inputs.currently_playing.is_some();
    let status = inputs.status;

    let label = if selected.is_none() {
        ActionLabel::SelectRelease
    } else if this_running {
        ActionLabel::Running
    } else {
        match (phase, status) {
            (Some(InstallPhase::Downloading(_)), _) => ActionLabel::Downloading,
            (Some(InstallPhase::Installing), _) => ActionLabel::Installing,
            (None, InstallationStatus::Unknown) => ActionLabel::Loading,
            (None, InstallationStatus::ReadyToPlay) => ActionLabel::Play,
            (None, InstallationStatus::NotAvailable) => ActionLabel::NotAvailable,
            (None, _) => ActionLabel::Install,
        }
    };

    let primary_enabled = selected.is_some()
        && !inputs.status_error
        && !matches!(
            status,
            InstallationStatus::Unknown | InstallationStatus::NotAvailable
        )
        && phase.is_none()
        && !any_running;

    let primary = if status == InstallationStatus::ReadyToPlay {
        PrimaryAction::Play
    } else {
        PrimaryAction::Install
    };

    let resume_enabled = (selected.is_some() && status == InstallationStatus::ReadyToPlay).then(|| {
        primary_enabled && inputs.last_played_world.is_some_and(|w| !w.is_empty())
    });

    let upgrade = inputs
        .upgrade
        .filter(|info| info.should_allow_upgrading)
        .map(|info| UpgradeAction {
            target: info.latest_release_id.clone(),
            enabled: !any_running,
            main_enabled: info.latest_release_id.as_deref() != selected,
        });

    Interaction {
        label,
        primary,
        primary_enabled,
        resume_enabled,
        upgrade,
        progress: phase.and_then(|p| p.progress()),
        hint: (status == InstallationStatus::NotAvailable).then_some(NOT_AVAILABLE_HINT),
    }
}
