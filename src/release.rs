//! Release data model shared by the orchestration components.

use serde::{Deserialize, Serialize};

use crate::variant::GameVariant;

/// Release channel a build belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReleaseType {
    Stable,
    ReleaseCandidate,
    Experimental,
}

impl ReleaseType {
    /// Channels in the order upgrade options are offered
    pub const PRIORITY: [ReleaseType; 3] = [
        ReleaseType::Stable,
        ReleaseType::ReleaseCandidate,
        ReleaseType::Experimental,
    ];

    /// Human-readable channel name
    pub fn label(&self) -> &'static str {
        match self {
            ReleaseType::Stable => "Stable",
            ReleaseType::ReleaseCandidate => "Release Candidate",
            ReleaseType::Experimental => "Experimental",
        }
    }
}

/// A specific installable version of a variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Version string, unique within a variant; also the release id
    pub version: String,
    pub release_type: ReleaseType,
}

impl Release {
    pub fn new(version: impl Into<String>, release_type: ReleaseType) -> Self {
        Self {
            version: version.into(),
            release_type,
        }
    }
}

/// Installation status of one `(variant, release)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InstallationStatus {
    /// Not fetched yet
    #[default]
    Unknown,
    NotInstalled,
    Downloading,
    Installing,
    ReadyToPlay,
    /// The backend cannot install this release yet
    NotAvailable,
}

impl InstallationStatus {
    /// Get a human-readable description of the status
    pub fn description(&self) -> &'static str {
        match self {
            InstallationStatus::Unknown => "Unknown",
            InstallationStatus::NotInstalled => "Not installed",
            InstallationStatus::Downloading => "Downloading",
            InstallationStatus::Installing => "Installing",
            InstallationStatus::ReadyToPlay => "Ready to play",
            InstallationStatus::NotAvailable => "Not available",
        }
    }
}

/// Byte progress of one download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
}

impl DownloadProgress {
    /// Calculate download progress as a fraction (0.0 - 1.0)
    pub fn fraction(&self) -> f32 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.bytes_downloaded as f32 / self.total_bytes as f32
        }
    }
}

/// Payload of the releases broadcast that answers a fetch trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasesUpdate {
    pub variant: GameVariant,
    /// Recency-descending as delivered; never re-sorted
    pub releases: Vec<Release>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction() {
        let progress = DownloadProgress {
            bytes_downloaded: 50,
            total_bytes: 100,
        };
        assert_eq!(progress.fraction(), 0.5);

        // Zero total should return 0
        assert_eq!(DownloadProgress::default().fraction(), 0.0);
    }

    #[test]
    fn test_status_defaults_to_unknown() {
        assert_eq!(InstallationStatus::default(), InstallationStatus::Unknown);
    }

    #[test]
    fn test_release_deserializes_from_backend_json() {
        let release: Release =
            serde_json::from_str(r#"{"version":"0.H-RC2","release_type":"ReleaseCandidate"}"#)
                .unwrap();
        assert_eq!(release, Release::new("0.H-RC2", ReleaseType::ReleaseCandidate));
    }
}
