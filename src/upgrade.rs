//! Upgrade path resolution.
//!
//! Pure functions over an already-fetched release list: nothing here ever
//! talks to the backend.

use std::collections::HashMap;

use serde::Serialize;

use crate::release::{Release, ReleaseType};
use crate::variant::GameVariant;

/// Tooltip on an option that targets the selected release
pub const ALREADY_INSTALLED: &str = "Already installed";

/// Latest release per channel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpgradeBucket<'a> {
    latest: HashMap<ReleaseType, &'a Release>,
}

impl<'a> UpgradeBucket<'a> {
    /// Scan `releases` in delivered order; the first release seen for a
    /// channel is its latest. Listing order decides, not version semantics.
    ///
    /// A legacy-experimental variant collapses to `{Stable: releases[0]}`
    /// whatever the head's declared channel is.
    pub fn build(releases: &'a [Release], variant: GameVariant) -> Self {
        let mut latest = HashMap::new();

        if variant.is_legacy_experimental() {
            if let Some(head) = releases.first() {
                latest.insert(ReleaseType::Stable, head);
                return Self { latest };
            }
        }

        for release in releases {
            latest.entry(release.release_type).or_insert(release);
        }
        Self { latest }
    }

    pub fn get(&self, release_type: ReleaseType) -> Option<&'a Release> {
        self.latest.get(&release_type).copied()
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// Present channels in `Stable, ReleaseCandidate, Experimental` order
    pub fn ordered(&self) -> impl Iterator<Item = (ReleaseType, &'a Release)> + '_ {
        ReleaseType::PRIORITY
            .into_iter()
            .filter_map(|release_type| self.get(release_type).map(|r| (release_type, r)))
    }
}

/// A suggestion to switch to the latest release of one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeOption {
    pub release_type: ReleaseType,
    pub label: String,
    pub target_version: String,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<&'static str>,
}

/// Everything needed to render the upgrade affordance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeInfo {
    /// Head of the release list, target of the main "Upgrade" action
    pub latest_release_id: Option<String>,
    pub options: Vec<UpgradeOption>,
    pub should_allow_upgrading: bool,
}

/// Resolve upgrade options for the current selection.
///
/// Upgrading is offered only while the user looks at the installed release
/// and some channel's latest differs from it.
pub fn resolve(
    releases: &[Release],
    selected_release_id: Option<&str>,
    active_release: Option<&str>,
    variant: GameVariant,
) -> UpgradeInfo {
    let selected = selected_release_id.filter(|id| !id.is_empty());
    let active = active_release.filter(|id| !id.is_empty());
    let bucket = UpgradeBucket::build(releases, variant);

    let options = bucket
        .ordered()
        .map(|(release_type, latest)| {
            let is_current = Some(latest.version.as_str()) == selected;
            UpgradeOption {
                release_type,
                label: format!("Latest {}", release_type.label()),
                target_version: latest.version.clone(),
                disabled: is_current,
                tooltip: is_current.then_some(ALREADY_INSTALLED),
            }
        })
        .collect();

    let should_allow_upgrading = match (selected, active) {
        (Some(selected), Some(active)) if selected == active => bucket
            .ordered()
            .any(|(_, latest)| latest.version != selected),
        _ => false,
    };

    UpgradeInfo {
        latest_release_id: releases.first().map(|r| r.version.clone()),
        options,
        should_allow_upgrading,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(version: &str, release_type: ReleaseType) -> Release {
        Release::new(version, release_type)
    }

    fn targets(info: &UpgradeInfo) -> Vec<(ReleaseType, &str)> {
        info.options
            .iter()
            .map(|o| (o.release_type, o.target_version.as_str()))
            .collect()
    }

    #[test]
    fn test_first_seen_per_type_and_priority_order() {
        let releases = vec![
            release("1.2-rc", ReleaseType::ReleaseCandidate),
            release("1.1", ReleaseType::Stable),
            release("1.0", ReleaseType::Stable),
        ];

        let bucket = UpgradeBucket::build(&releases, GameVariant::DarkDaysAhead);
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.get(ReleaseType::ReleaseCandidate), Some(&releases[0]));
        assert_eq!(bucket.get(ReleaseType::Stable), Some(&releases[1]));
        assert_eq!(bucket.get(ReleaseType::Experimental), None);

        let info = resolve(&releases, None, None, GameVariant::DarkDaysAhead);
        assert_eq!(
            targets(&info),
            vec![
                (ReleaseType::Stable, "1.1"),
                (ReleaseType::ReleaseCandidate, "1.2-rc")
            ]
        );
        assert_eq!(info.options[0].label, "Latest Stable");
        assert_eq!(info.options[1].label, "Latest Release Candidate");
        assert_eq!(info.latest_release_id.as_deref(), Some("1.2-rc"));
    }

    #[test]
    fn test_listing_order_beats_version_order() {
        // "0.9" arrives first, so it is the latest Stable even though "1.0" sorts higher.
        let releases = vec![
            release("0.9", ReleaseType::Stable),
            release("1.0", ReleaseType::Stable),
        ];
        let bucket = UpgradeBucket::build(&releases, GameVariant::BrightNights);
        assert_eq!(bucket.get(ReleaseType::Stable).map(|r| r.version.as_str()), Some("0.9"));
    }

    /// The Last Generation takes the head of the list as its Stable entry
    /// without checking the head's declared channel. Kept as-is on purpose.
    #[test]
    fn test_legacy_variant_uses_head_as_stable_regardless_of_type() {
        let releases = vec![
            release("2.0", ReleaseType::Experimental),
            release("1.9", ReleaseType::Stable),
        ];

        let bucket = UpgradeBucket::build(&releases, GameVariant::TheLastGeneration);
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.get(ReleaseType::Stable), Some(&releases[0]));
        assert_eq!(bucket.get(ReleaseType::Experimental), None);

        let info = resolve(&releases, None, None, GameVariant::TheLastGeneration);
        assert_eq!(targets(&info), vec![(ReleaseType::Stable, "2.0")]);
    }

    #[test]
    fn test_legacy_variant_with_no_releases_is_empty() {
        let bucket = UpgradeBucket::build(&[], GameVariant::TheLastGeneration);
        assert!(bucket.is_empty());
        let info = resolve(&[], Some("1.0"), Some("1.0"), GameVariant::TheLastGeneration);
        assert!(info.options.is_empty());
        assert!(!info.should_allow_upgrading);
        assert_eq!(info.latest_release_id, None);
    }

    #[test]
    fn test_allowed_when_viewing_installed_and_newer_exists() {
        let releases = vec![release("1.2", ReleaseType::Stable), release("1.1", ReleaseType::Stable)];
        let info = resolve(&releases, Some("1.1"), Some("1.1"), GameVariant::BrightNights);
        assert!(info.should_allow_upgrading);
    }

    #[test]
    fn test_not_allowed_when_selection_differs_from_active() {
        let releases = vec![release("1.2", ReleaseType::Stable), release("1.1", ReleaseType::Stable)];
        let info = resolve(&releases, Some("1.1"), Some("1.0"), GameVariant::BrightNights);
        assert!(!info.should_allow_upgrading);

        let info = resolve(&releases, None, Some("1.1"), GameVariant::BrightNights);
        assert!(!info.should_allow_upgrading);

        let info = resolve(&releases, Some("1.1"), None, GameVariant::BrightNights);
        assert!(!info.should_allow_upgrading);
    }

    #[test]
    fn test_not_allowed_when_already_on_every_latest() {
        let releases = vec![release("1.2", ReleaseType::Stable)];
        let info = resolve(&releases, Some("1.2"), Some("1.2"), GameVariant::DarkDaysAhead);
        assert!(!info.should_allow_upgrading);
        assert!(info.options[0].disabled);
        assert_eq!(info.options[0].tooltip, Some(ALREADY_INSTALLED));
    }

    #[test]
    fn test_option_for_selected_release_is_disabled() {
        let releases = vec![
            release("0.I-exp", ReleaseType::Experimental),
            release("0.H", ReleaseType::Stable),
        ];
        let info = resolve(&releases, Some("0.H"), Some("0.H"), GameVariant::DarkDaysAhead);

        let stable = &info.options[0];
        assert_eq!(stable.release_type, ReleaseType::Stable);
        assert!(stable.disabled);
        assert_eq!(stable.tooltip, Some(ALREADY_INSTALLED));

        let experimental = &info.options[1];
        assert!(!experimental.disabled);
        assert_eq!(experimental.tooltip, None);
        assert!(info.should_allow_upgrading);
    }

    #[test]
    fn test_empty_ids_count_as_absent() {
        let releases = vec![release("1.2", ReleaseType::Stable)];
        let info = resolve(&releases, Some(""), Some(""), GameVariant::DarkDaysAhead);
        assert!(!info.should_allow_upgrading);
        assert!(!info.options[0].disabled);
    }
}
