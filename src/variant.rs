//! Game variants managed by the launcher.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::release::ReleaseType;

/// One of the installable game forks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameVariant {
    DarkDaysAhead,
    BrightNights,
    TheLastGeneration,
}

impl GameVariant {
    /// All variants in default display order
    pub const ALL: [GameVariant; 3] = [
        GameVariant::DarkDaysAhead,
        GameVariant::BrightNights,
        GameVariant::TheLastGeneration,
    ];

    /// Stable identifier used on the wire and in the CLI
    pub fn id(&self) -> &'static str {
        match self {
            GameVariant::DarkDaysAhead => "DarkDaysAhead",
            GameVariant::BrightNights => "BrightNights",
            GameVariant::TheLastGeneration => "TheLastGeneration",
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            GameVariant::DarkDaysAhead => "Dark Days Ahead",
            GameVariant::BrightNights => "Bright Nights",
            GameVariant::TheLastGeneration => "The Last Generation",
        }
    }

    /// Whether this variant's non-stable release line is deprecated.
    ///
    /// For such a variant the upgrade resolver only ever offers the head of
    /// the release list, labelled Stable.
    pub fn is_legacy_experimental(&self) -> bool {
        matches!(self, GameVariant::TheLastGeneration)
    }

    /// Classify a release from its tag and GitHub prerelease flag.
    ///
    /// Dark Days Ahead distinguishes experimental builds from release
    /// candidates by tag; the other forks only publish stable and
    /// experimental lines.
    pub fn determine_release_type(&self, tag_name: &str, prerelease: bool) -> ReleaseType {
        match self {
            GameVariant::DarkDaysAhead => {
                if !prerelease {
                    ReleaseType::Stable
                } else if tag_name.contains("experimental") {
                    ReleaseType::Experimental
                } else {
                    ReleaseType::ReleaseCandidate
                }
            }
            _ => {
                if prerelease {
                    ReleaseType::Experimental
                } else {
                    ReleaseType::Stable
                }
            }
        }
    }
}

impl fmt::Display for GameVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Error returned when parsing an unknown variant id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown game variant: {0}")]
pub struct UnknownVariant(pub String);

impl FromStr for GameVariant {
    type Err = UnknownVariant;

    /// Accepts the id or a short alias (`dda`, `bn`, `tlg`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "darkdaysahead" | "dda" => Ok(GameVariant::DarkDaysAhead),
            "brightnights" | "bn" => Ok(GameVariant::BrightNights),
            "thelastgeneration" | "tlg" => Ok(GameVariant::TheLastGeneration),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}
