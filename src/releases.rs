//! Release lists per variant, filled from the gateway's release broadcasts.

use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;

use crate::release::{Release, ReleasesUpdate};
use crate::variant::GameVariant;

/// Cached release lists, in the order the backend delivered them
pub struct ReleaseCatalog {
    lists: DashMap<GameVariant, Vec<Release>>,
    loading: DashSet<GameVariant>,
    updated: broadcast::Sender<GameVariant>,
}

impl Default for ReleaseCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseCatalog {
    pub fn new() -> Self {
        let (updated, _) = broadcast::channel(crate::gateway::EVENT_CHANNEL_CAPACITY);
        Self {
            lists: DashMap::new(),
            loading: DashSet::new(),
            updated,
        }
    }

    /// Mark a fetch as started. Returns false if one is already running.
    pub fn begin_fetch(&self, variant: GameVariant) -> bool {
        self.loading.insert(variant)
    }

    /// Clear the loading flag after a failed trigger
    pub fn end_fetch(&self, variant: GameVariant) {
        self.loading.remove(&variant);
    }

    pub fn is_loading(&self, variant: GameVariant) -> bool {
        self.loading.contains(&variant)
    }

    /// Store a delivered list, replacing the previous one wholesale.
    pub fn apply(&self, update: ReleasesUpdate) {
        let ReleasesUpdate { variant, releases } = update;
        tracing::info!("Received {} releases for {}", releases.len(), variant);
        self.lists.insert(variant, releases);
        self.loading.remove(&variant);
        let _ = self.updated.send(variant);
    }

    /// Cached list; `None` until the first delivery
    pub fn releases(&self, variant: GameVariant) -> Option<Vec<Release>> {
        self.lists.get(&variant).map(|list| list.clone())
    }

    /// Head of the cached list
    pub fn latest(&self, variant: GameVariant) -> Option<Release> {
        self.lists
            .get(&variant)
            .and_then(|list| list.first().cloned())
    }

    /// Find a release by id in the cached list
    pub fn find(&self, variant: GameVariant, release_id: &str) -> Option<Release> {
        self.lists
            .get(&variant)
            .and_then(|list| list.iter().find(|r| r.version == release_id).cloned())
    }

    pub fn invalidate(&self, variant: GameVariant) {
        self.lists.remove(&variant);
        self.loading.remove(&variant);
    }

    /// Notified with the variant each time a list is delivered
    pub fn subscribe(&self) -> broadcast::Receiver<GameVariant> {
        self.updated.subscribe()
    }
}
