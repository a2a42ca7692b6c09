//! Top-level facade: one gateway, shared caches, the running slot and an
//! install orchestrator per variant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::error::{GatewayError, OrchestratorError, Result};
use crate::gateway::{CommandGateway, GatewayEvent};
use crate::install::{InstallOrchestrator, OrchestratorState};
use crate::interaction::{self, Interaction, InteractionInputs};
use crate::release::{InstallationStatus, Release};
use crate::releases::ReleaseCatalog;
use crate::running::RunningGameRegistry;
use crate::status_cache::StatusCache;
use crate::upgrade::{self, UpgradeInfo};
use crate::variant::GameVariant;

pub struct Launcher<G> {
    gateway: Arc<G>,
    statuses: StatusCache<G>,
    registry: Arc<RunningGameRegistry>,
    catalog: Arc<ReleaseCatalog>,
    orchestrators: HashMap<GameVariant, InstallOrchestrator<G>>,
}

impl<G: CommandGateway> Launcher<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        let statuses = StatusCache::new(Arc::clone(&gateway));
        let registry = Arc::new(RunningGameRegistry::new());
        let orchestrators = GameVariant::ALL
            .into_iter()
            .map(|variant| {
                let orchestrator = InstallOrchestrator::new(
                    variant,
                    Arc::clone(&gateway),
                    statuses.clone(),
                    Arc::clone(&registry),
                );
                (variant, orchestrator)
            })
            .collect();

        Self {
            gateway,
            statuses,
            registry,
            catalog: Arc::new(ReleaseCatalog::new()),
            orchestrators,
        }
    }

    /// Route gateway events into the catalog and the running slot.
    ///
    /// Runs until the gateway's event channel closes.
    pub fn start(&self) -> JoinHandle<()> {
        let mut events = self.gateway.subscribe();
        let catalog = Arc::clone(&self.catalog);
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(GatewayEvent::ReleasesUpdate(update)) => catalog.apply(update),
                    Ok(GatewayEvent::GameExited { variant }) => {
                        registry.on_game_exited(variant);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event pump lagged, skipped {} backend events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Backend event channel closed, event pump stopped");
        })
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn statuses(&self) -> &StatusCache<G> {
        &self.statuses
    }

    pub fn registry(&self) -> &Arc<RunningGameRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &ReleaseCatalog {
        &self.catalog
    }

    pub fn orchestrator(&self, variant: GameVariant) -> &InstallOrchestrator<G> {
        &self.orchestrators[&variant]
    }

    /// Trigger a release list refresh. The list arrives on the event pump.
    pub async fn fetch_releases(&self, variant: GameVariant) -> Result<()> {
        if !self.catalog.begin_fetch(variant) {
            tracing::debug!("Release fetch for {} already in progress", variant);
            return Ok(());
        }
        tracing::info!("Fetching releases for {}", variant);
        if let Err(e) = self.gateway.fetch_releases(variant).await {
            tracing::warn!("Release fetch for {} failed: {}", variant, e);
            self.catalog.end_fetch(variant);
            return Err(e.into());
        }
        Ok(())
    }

    /// Trigger a refresh and wait up to `timeout` for the list to arrive.
    ///
    /// Needs the event pump from [`Launcher::start`] to be running.
    pub async fn load_releases(&self, variant: GameVariant, timeout: Duration) -> Result<Vec<Release>> {
        let mut updated = self.catalog.subscribe();
        self.fetch_releases(variant).await?;

        let arrived = tokio::time::timeout(timeout, async {
            loop {
                match updated.recv().await {
                    Ok(v) if v == variant => return true,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return false,
                }
            }
        })
        .await;

        match arrived {
            Ok(true) => Ok(self.releases(variant)),
            _ => {
                self.catalog.end_fetch(variant);
                Err(OrchestratorError::BackendUnavailable(GatewayError::Transport(format!(
                    "no release list for {} within {:?}",
                    variant, timeout
                ))))
            }
        }
    }

    /// Cached release list, empty until one has been delivered
    pub fn releases(&self, variant: GameVariant) -> Vec<Release> {
        self.catalog.releases(variant).unwrap_or_default()
    }

    /// Non-blocking status read, including the live install phase
    pub fn status(&self, variant: GameVariant, release_id: &str) -> InstallationStatus {
        self.orchestrator(variant).status(release_id)
    }

    pub async fn fetch_status(&self, variant: GameVariant, release_id: &str) -> Result<InstallationStatus> {
        self.statuses.fetch_status(variant, release_id).await
    }

    pub async fn active_release(&self, variant: GameVariant) -> Result<Option<String>> {
        self.statuses.fetch_active_release(variant).await
    }

    /// Upgrade choices for `selected`, computed from cached data only
    pub fn upgrade_info(&self, variant: GameVariant, selected: Option<&str>) -> UpgradeInfo {
        let releases = self.releases(variant);
        let active = self.statuses.active_release(variant);
        upgrade::resolve(&releases, selected, active.as_deref(), variant)
    }

    /// Refresh status, active release and last world, then merge them into
    /// the actions currently open to the user.
    pub async fn interaction(&self, variant: GameVariant, selected: Option<&str>) -> Interaction {
        let orchestrator = self.orchestrator(variant);
        let selected = selected.filter(|id| !id.is_empty());

        let (status, status_error) = match selected {
            None => (InstallationStatus::Unknown, false),
            Some(id) if orchestrator.is_installing() => (orchestrator.status(id), false),
            Some(id) => match self.statuses.fetch_status(variant, id).await {
                Ok(status) => (status, false),
                Err(e) => {
                    tracing::warn!("Failed to get installation status: {}", e);
                    (self.statuses.cached_status(variant, id), true)
                }
            },
        };

        if let Err(e) = self.statuses.fetch_active_release(variant).await {
            tracing::warn!("Failed to get active release: {}", e);
        }
        let last_world = match orchestrator.last_played_world().await {
            Ok(world) => world,
            Err(e) => {
                tracing::warn!("Failed to get last played world: {}", e);
                None
            }
        };

        let install = orchestrator.state();
        let upgrade = self.upgrade_info(variant, selected);
        interaction::merge(&InteractionInputs {
            variant,
            selected_release_id: selected,
            status,
            status_error,
            install: &install,
            currently_playing: self.registry.currently_playing(),
            last_played_world: last_world.as_deref(),
            upgrade: Some(&upgrade),
        })
    }

    /// Wipe launcher-managed data for a variant and forget everything
    /// cached about it.
    pub async fn master_reset(&self, variant: GameVariant) -> Result<()> {
        let orchestrator = self.orchestrator(variant);
        if let OrchestratorState::Installing { release_id, .. } = orchestrator.state() {
            return Err(OrchestratorError::AlreadyInstalling {
                variant,
                release_id,
            });
        }
        if self.registry.currently_playing() == Some(variant) {
            return Err(OrchestratorError::AlreadyRunning(variant));
        }

        tracing::info!("Master reset of {}", variant);
        self.gateway.master_reset(variant).await?;
        self.statuses.reset_variant(variant);
        self.catalog.invalidate(variant);
        Ok(())
    }
}
