//! Per-variant install state machine and launch entry points.
//!
//! ```text
//! Idle -> Installing(phase) -> { ReadyToPlay | NotAvailable | Failed } -> Idle
//! ```
//!
//! Each install runs in its own task. Callers get an [`InstallHandle`] to
//! observe it; dropping the handle detaches the observer and nothing more.
//! There is no way to cancel an install once it has started.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{GatewayError, OrchestratorError, Result};
use crate::gateway::CommandGateway;
use crate::progress::{InstallPhase, ProgressSession, ProgressSink, ProgressStream, SessionOutcome};
use crate::release::{InstallationStatus, Release};
use crate::running::RunningGameRegistry;
use crate::status_cache::StatusCache;
use crate::variant::GameVariant;

/// Snapshot of the orchestrator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Installing {
        release_id: String,
        phase: InstallPhase,
    },
}

impl OrchestratorState {
    pub fn is_installing(&self) -> bool {
        matches!(self, OrchestratorState::Installing { .. })
    }
}

/// How the most recent install of a variant ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    ReadyToPlay(Release),
    NotAvailable,
    Failed(OrchestratorError),
}

enum State {
    Idle,
    Installing {
        release_id: String,
        phase: watch::Receiver<InstallPhase>,
    },
}

struct Inner {
    state: State,
    last_outcome: Option<(String, InstallOutcome)>,
}

/// Observer of one install started by [`InstallOrchestrator::start_install`]
pub struct InstallHandle {
    release_id: String,
    events: Option<ProgressStream>,
    task: JoinHandle<Result<Release>>,
}

impl InstallHandle {
    pub fn release_id(&self) -> &str {
        &self.release_id
    }

    /// Take the ordered progress stream. Only the first call returns it.
    pub fn events(&mut self) -> Option<ProgressStream> {
        self.events.take()
    }

    /// Wait for the install to settle.
    pub async fn wait(self) -> Result<Release> {
        self.task.await.unwrap_or_else(|e| {
            Err(OrchestratorError::BackendUnavailable(GatewayError::TaskFailed(
                e.to_string(),
            )))
        })
    }
}

/// Drives installs and launches for a single variant
pub struct InstallOrchestrator<G> {
    variant: GameVariant,
    gateway: Arc<G>,
    statuses: StatusCache<G>,
    registry: Arc<RunningGameRegistry>,
    inner: Arc<Mutex<Inner>>,
}

impl<G> Clone for InstallOrchestrator<G> {
    fn clone(&self) -> Self {
        Self {
            variant: self.variant,
            gateway: Arc::clone(&self.gateway),
            statuses: self.statuses.clone(),
            registry: Arc::clone(&self.registry),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G: CommandGateway> InstallOrchestrator<G> {
    pub fn new(
        variant: GameVariant,
        gateway: Arc<G>,
        statuses: StatusCache<G>,
        registry: Arc<RunningGameRegistry>,
    ) -> Self {
        Self {
            variant,
            gateway,
            statuses,
            registry,
            inner: Arc::new(Mutex::new(Inner {
                state: State::Idle,
                last_outcome: None,
            })),
        }
    }

    pub fn variant(&self) -> GameVariant {
        self.variant
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> OrchestratorState {
        match &self.lock().state {
            State::Idle => OrchestratorState::Idle,
            State::Installing { release_id, phase } => OrchestratorState::Installing {
                release_id: release_id.clone(),
                phase: *phase.borrow(),
            },
        }
    }

    pub fn is_installing(&self) -> bool {
        matches!(self.lock().state, State::Installing { .. })
    }

    /// Outcome of the most recent install and the release it targeted
    pub fn last_outcome(&self) -> Option<(String, InstallOutcome)> {
        self.lock().last_outcome.clone()
    }

    /// Status of `release_id` as the user should see it: the live install
    /// phase while it is installing, the cached status otherwise.
    pub fn status(&self, release_id: &str) -> InstallationStatus {
        if let State::Installing {
            release_id: installing,
            phase,
        } = &self.lock().state
        {
            if installing == release_id {
                return match *phase.borrow() {
                    InstallPhase::Downloading(_) => InstallationStatus::Downloading,
                    InstallPhase::Installing => InstallationStatus::Installing,
                };
            }
        }
        self.statuses.get_status(self.variant, release_id)
    }

    /// Start installing `release_id` and return immediately.
    pub fn start_install(&self, release_id: &str) -> Result<InstallHandle> {
        if release_id.is_empty() {
            return Err(OrchestratorError::Validation(
                "no release selected to install".to_string(),
            ));
        }
        if self.statuses.cached_status(self.variant, release_id) == InstallationStatus::NotAvailable {
            return Err(OrchestratorError::NotAvailable(release_id.to_string()));
        }

        let (session, events) = {
            let mut inner = self.lock();
            if let State::Installing {
                release_id: current,
                ..
            } = &inner.state
            {
                tracing::warn!(
                    "Rejecting install of {} {}: {} is still installing",
                    self.variant,
                    release_id,
                    current
                );
                return Err(OrchestratorError::AlreadyInstalling {
                    variant: self.variant,
                    release_id: current.clone(),
                });
            }

            let (session, events) = ProgressSession::open(self.variant, release_id);
            inner.state = State::Installing {
                release_id: release_id.to_string(),
                phase: session.watch(),
            };
            (session, events)
        };

        tracing::info!("Installing {} {}", self.variant, release_id);

        let this = self.clone();
        let target = release_id.to_string();
        let task = tokio::spawn(async move { this.run_install(session, target).await });

        Ok(InstallHandle {
            release_id: release_id.to_string(),
            events: Some(events),
            task,
        })
    }

    /// Install `release_id` and wait for the result.
    pub async fn install(&self, release_id: &str) -> Result<Release> {
        self.start_install(release_id)?.wait().await
    }

    async fn run_install(self, mut session: ProgressSession, release_id: String) -> Result<Release> {
        let (sink, mut updates) = ProgressSink::channel();
        let result = session
            .follow(
                &mut updates,
                self.gateway.install_release(self.variant, &release_id, sink),
            )
            .await;

        let result = self.settle(&release_id, result);
        session.finish(match &result {
            Ok(release) => SessionOutcome::Installed(release.clone()),
            Err(e) => SessionOutcome::Failed(e.clone()),
        });
        result
    }

    /// Apply an install result to the caches and return to `Idle`.
    fn settle(
        &self,
        release_id: &str,
        result: std::result::Result<Release, GatewayError>,
    ) -> Result<Release> {
        let result = result.map_err(OrchestratorError::from);
        let outcome = match &result {
            Ok(release) => {
                tracing::info!("Installed {} {}", self.variant, release.version);
                self.statuses.record_installed(self.variant, release_id);
                self.statuses.invalidate_active_release(self.variant);
                InstallOutcome::ReadyToPlay(release.clone())
            }
            Err(OrchestratorError::NotAvailable(_)) => {
                tracing::warn!("{} {} is not available yet", self.variant, release_id);
                self.statuses.record_not_available(self.variant, release_id);
                InstallOutcome::NotAvailable
            }
            Err(e) => {
                tracing::warn!("Install of {} {} failed: {}", self.variant, release_id, e);
                InstallOutcome::Failed(e.clone())
            }
        };

        let mut inner = self.lock();
        inner.state = State::Idle;
        inner.last_outcome = Some((release_id.to_string(), outcome));
        result
    }

    /// Launch `release_id` with no world selected.
    pub async fn play(&self, release_id: &str) -> Result<()> {
        self.launch(release_id, None).await
    }

    /// Launch `release_id` straight into `world`.
    pub async fn resume(&self, release_id: &str, world: &str) -> Result<()> {
        if world.is_empty() {
            return Err(OrchestratorError::Validation("no world to resume".to_string()));
        }
        self.launch(release_id, Some(world)).await
    }

    /// World the variant was last played in, if the backend knows one
    pub async fn last_played_world(&self) -> Result<Option<String>> {
        let world = self.gateway.get_last_played_world(self.variant).await?;
        Ok(world.filter(|w| !w.is_empty()))
    }

    /// Resume `release_id` in the last played world.
    pub async fn resume_last_world(&self, release_id: &str) -> Result<()> {
        let Some(world) = self.last_played_world().await? else {
            return Err(OrchestratorError::Validation(format!(
                "{} has no last played world",
                self.variant
            )));
        };
        self.resume(release_id, &world).await
    }

    async fn launch(&self, release_id: &str, world: Option<&str>) -> Result<()> {
        if release_id.is_empty() {
            return Err(OrchestratorError::Validation(
                "no release selected to play".to_string(),
            ));
        }
        if let State::Installing {
            release_id: current,
            ..
        } = &self.lock().state
        {
            return Err(OrchestratorError::AlreadyInstalling {
                variant: self.variant,
                release_id: current.clone(),
            });
        }

        match self.statuses.fetch_status(self.variant, release_id).await? {
            InstallationStatus::ReadyToPlay => {}
            InstallationStatus::NotAvailable => {
                return Err(OrchestratorError::NotAvailable(release_id.to_string()));
            }
            other => {
                return Err(OrchestratorError::Validation(format!(
                    "{} {} is not ready to play ({})",
                    self.variant,
                    release_id,
                    other.description()
                )));
            }
        }

        let pending = self.registry.begin_launch(self.variant)?;
        match world {
            Some(world) => tracing::info!("Launching {} {} into {}", self.variant, release_id, world),
            None => tracing::info!("Launching {} {}", self.variant, release_id),
        }

        if let Err(e) = self.gateway.launch_game(self.variant, release_id, world).await {
            tracing::warn!("Launch of {} {} failed: {}", self.variant, release_id, e);
            return Err(e.into());
        }
        pending.started();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::{Calls, FakeGateway};
    use crate::progress::ProgressEvent;
    use crate::release::{DownloadProgress, ReleaseType};
    use futures::StreamExt;

    struct Fixture {
        gateway: Arc<FakeGateway>,
        statuses: StatusCache<FakeGateway>,
        registry: Arc<RunningGameRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            let gateway = Arc::new(FakeGateway::default());
            Self {
                statuses: StatusCache::new(Arc::clone(&gateway)),
                gateway,
                registry: Arc::new(RunningGameRegistry::new()),
            }
        }

        fn orchestrator(&self, variant: GameVariant) -> InstallOrchestrator<FakeGateway> {
            InstallOrchestrator::new(
                variant,
                Arc::clone(&self.gateway),
                self.statuses.clone(),
                Arc::clone(&self.registry),
            )
        }
    }

    #[tokio::test]
    async fn test_install_success_reports_progress_and_returns_to_idle() {
        let fx = Fixture::new();
        let dda = fx.orchestrator(GameVariant::DarkDaysAhead);
        let script = fx.gateway.script_install("0.H");

        let mut handle = dda.start_install("0.H").unwrap();
        let events = handle.events().unwrap();
        assert!(handle.events().is_none());
        assert!(dda.is_installing());
        assert_eq!(dda.status("0.H"), InstallationStatus::Downloading);

        script.progress(5, 10);
        script.progress(10, 10);
        script.installing();
        let release = Release::new("0.H", ReleaseType::Stable);
        script.finish(Ok(release.clone()));

        assert_eq!(handle.wait().await, Ok(release.clone()));
        let events: Vec<_> = events.collect().await;
        assert_eq!(
            events,
            vec![
                ProgressEvent::Phase(InstallPhase::Downloading(DownloadProgress {
                    bytes_downloaded: 5,
                    total_bytes: 10
                })),
                ProgressEvent::Phase(InstallPhase::Downloading(DownloadProgress {
                    bytes_downloaded: 10,
                    total_bytes: 10
                })),
                ProgressEvent::Phase(InstallPhase::Installing),
                ProgressEvent::Finished(SessionOutcome::Installed(release.clone())),
            ]
        );

        assert_eq!(dda.state(), OrchestratorState::Idle);
        assert_eq!(
            dda.last_outcome(),
            Some(("0.H".to_string(), InstallOutcome::ReadyToPlay(release)))
        );
        assert_eq!(
            fx.statuses.cached_status(GameVariant::DarkDaysAhead, "0.H"),
            InstallationStatus::ReadyToPlay
        );
    }

    #[tokio::test]
    async fn test_second_install_rejected_first_unaffected() {
        let fx = Fixture::new();
        let dda = fx.orchestrator(GameVariant::DarkDaysAhead);
        let script = fx.gateway.script_install("0.H");

        let mut first = dda.start_install("0.H").unwrap();
        let events = first.events().unwrap();

        let second = dda.start_install("0.I");
        assert!(matches!(
            second,
            Err(OrchestratorError::AlreadyInstalling { variant: GameVariant::DarkDaysAhead, ref release_id })
                if release_id == "0.H"
        ));
        assert!(matches!(
            dda.start_install("0.H"),
            Err(OrchestratorError::AlreadyInstalling { .. })
        ));

        script.progress(3, 6);
        script.installing();
        script.finish(Ok(Release::new("0.H", ReleaseType::Stable)));

        assert!(first.wait().await.is_ok());
        let events: Vec<_> = events.collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(Calls::get(&fx.gateway.calls.install), 1);
    }

    #[tokio::test]
    async fn test_installs_on_different_variants_are_independent() {
        let fx = Fixture::new();
        let dda = fx.orchestrator(GameVariant::DarkDaysAhead);
        let bn = fx.orchestrator(GameVariant::BrightNights);
        let script = fx.gateway.script_install("0.H");

        let first = dda.start_install("0.H").unwrap();
        assert!(bn.install("v1").await.is_ok());
        assert!(dda.is_installing());

        script.finish(Ok(Release::new("0.H", ReleaseType::Stable)));
        assert!(first.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_status_read_in_flight_during_install_does_not_undo_it() {
        let fx = Fixture::new();
        let dda = fx.orchestrator(GameVariant::DarkDaysAhead);
        let script = fx.gateway.script_install("0.H");

        let handle = dda.start_install("0.H").unwrap();
        fx.gateway
            .set_status(GameVariant::DarkDaysAhead, "0.H", InstallationStatus::Downloading);
        let release_read = fx.gateway.hold_status("0.H");
        let read = tokio::spawn({
            let statuses = fx.statuses.clone();
            async move { statuses.fetch_status(GameVariant::DarkDaysAhead, "0.H").await }
        });
        while Calls::get(&fx.gateway.calls.status) == 0 {
            tokio::task::yield_now().await;
        }

        script.finish(Ok(Release::new("0.H", ReleaseType::Stable)));
        handle.wait().await.unwrap();
        assert_eq!(
            fx.statuses.cached_status(GameVariant::DarkDaysAhead, "0.H"),
            InstallationStatus::ReadyToPlay
        );

        release_read.send(()).unwrap();
        assert_eq!(read.await.unwrap(), Ok(InstallationStatus::Downloading));
        assert_eq!(
            fx.statuses.cached_status(GameVariant::DarkDaysAhead, "0.H"),
            InstallationStatus::ReadyToPlay
        );

        fx.gateway
            .set_status(GameVariant::DarkDaysAhead, "0.H", InstallationStatus::ReadyToPlay);
        assert_eq!(
            fx.statuses.fetch_status(GameVariant::DarkDaysAhead, "0.H").await,
            Ok(InstallationStatus::ReadyToPlay)
        );
        assert_eq!(Calls::get(&fx.gateway.calls.status), 2);
        assert_eq!(dda.status("0.H"), InstallationStatus::ReadyToPlay);
    }

    #[tokio::test]
    async fn test_failure_leaves_status_unchanged() {
        let fx = Fixture::new();
        let variant = GameVariant::BrightNights;
        let bn = fx.orchestrator(variant);
        fx.gateway.set_status(variant, "v1", InstallationStatus::NotInstalled);
        fx.statuses.fetch_status(variant, "v1").await.unwrap();

        let script = fx.gateway.script_install("v1");
        let mut handle = bn.start_install("v1").unwrap();
        let events = handle.events().unwrap();
        script.progress(1, 4);
        script.finish(Err(GatewayError::Transport("connection reset".into())));

        let result = handle.wait().await;
        assert!(matches!(result, Err(OrchestratorError::BackendUnavailable(_))));
        assert_eq!(bn.state(), OrchestratorState::Idle);
        assert_eq!(fx.statuses.cached_status(variant, "v1"), InstallationStatus::NotInstalled);
        assert!(matches!(
            bn.last_outcome(),
            Some((_, InstallOutcome::Failed(OrchestratorError::BackendUnavailable(_))))
        ));

        let events: Vec<_> = events.collect().await;
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Finished(SessionOutcome::Failed(_)))
        ));

        // Retry is a plain re-invocation.
        assert!(bn.install("v1").await.is_ok());
    }

    #[tokio::test]
    async fn test_not_available_is_recorded_and_blocks_retry() {
        let fx = Fixture::new();
        let variant = GameVariant::DarkDaysAhead;
        let dda = fx.orchestrator(variant);

        let script = fx.gateway.script_install("0.I-exp");
        let handle = dda.start_install("0.I-exp").unwrap();
        script.finish(Err(GatewayError::NotAvailable("0.I-exp".into())));

        assert_eq!(
            handle.wait().await,
            Err(OrchestratorError::NotAvailable("0.I-exp".to_string()))
        );
        assert_eq!(
            fx.statuses.cached_status(variant, "0.I-exp"),
            InstallationStatus::NotAvailable
        );
        assert_eq!(
            dda.start_install("0.I-exp").err(),
            Some(OrchestratorError::NotAvailable("0.I-exp".to_string()))
        );
        assert_eq!(Calls::get(&fx.gateway.calls.install), 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_cancel_install() {
        let fx = Fixture::new();
        let variant = GameVariant::TheLastGeneration;
        let tlg = fx.orchestrator(variant);
        let script = fx.gateway.script_install("1.0");

        drop(tlg.start_install("1.0").unwrap());
        script.progress(2, 2);
        script.finish(Ok(Release::new("1.0", ReleaseType::Stable)));

        while tlg.is_installing() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(tlg.last_outcome(), Some((_, InstallOutcome::ReadyToPlay(_)))));
        assert_eq!(fx.statuses.cached_status(variant, "1.0"), InstallationStatus::ReadyToPlay);
    }

    #[tokio::test]
    async fn test_empty_release_is_a_validation_error() {
        let fx = Fixture::new();
        let dda = fx.orchestrator(GameVariant::DarkDaysAhead);
        assert!(matches!(dda.start_install(""), Err(OrchestratorError::Validation(_))));
        assert!(matches!(dda.play("").await, Err(OrchestratorError::Validation(_))));
        assert!(matches!(
            dda.resume("0.H", "").await,
            Err(OrchestratorError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_play_requires_ready_to_play() {
        let fx = Fixture::new();
        let variant = GameVariant::DarkDaysAhead;
        let dda = fx.orchestrator(variant);

        fx.gateway.set_status(variant, "0.H", InstallationStatus::NotInstalled);
        assert!(matches!(dda.play("0.H").await, Err(OrchestratorError::Validation(_))));
        assert_eq!(fx.registry.currently_playing(), None);
        assert!(fx.gateway.launched().is_empty());
    }

    #[tokio::test]
    async fn test_play_holds_slot_until_exit() {
        let fx = Fixture::new();
        let variant = GameVariant::DarkDaysAhead;
        let dda = fx.orchestrator(variant);
        fx.gateway.set_status(variant, "0.H", InstallationStatus::ReadyToPlay);

        dda.play("0.H").await.unwrap();
        assert_eq!(fx.registry.currently_playing(), Some(variant));
        assert_eq!(fx.gateway.launched(), vec![(variant, "0.H".to_string(), None)]);

        assert_eq!(
            dda.play("0.H").await,
            Err(OrchestratorError::AlreadyRunning(variant))
        );

        fx.registry.on_game_exited(variant);
        assert!(dda.play("0.H").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_plays_on_different_variants_exactly_one_wins() {
        let fx = Fixture::new();
        fx.gateway.set_status(GameVariant::DarkDaysAhead, "0.H", InstallationStatus::ReadyToPlay);
        fx.gateway.set_status(GameVariant::BrightNights, "v1", InstallationStatus::ReadyToPlay);
        let dda = fx.orchestrator(GameVariant::DarkDaysAhead);
        let bn = fx.orchestrator(GameVariant::BrightNights);

        let (a, b) = tokio::join!(dda.play("0.H"), bn.play("v1"));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let loser = if a.is_err() { a } else { b };
        assert!(matches!(loser, Err(OrchestratorError::AlreadyRunning(_))));
        assert_eq!(Calls::get(&fx.gateway.calls.launch), 1);
    }

    #[tokio::test]
    async fn test_failed_launch_releases_slot() {
        let fx = Fixture::new();
        let variant = GameVariant::BrightNights;
        let bn = fx.orchestrator(variant);
        fx.gateway.set_status(variant, "v1", InstallationStatus::ReadyToPlay);
        fx.gateway.fail_launches(GatewayError::Backend("executable missing".into()));

        assert!(matches!(
            bn.play("v1").await,
            Err(OrchestratorError::BackendUnavailable(_))
        ));
        assert_eq!(fx.registry.currently_playing(), None);
    }

    #[tokio::test]
    async fn test_resume_last_world() {
        let fx = Fixture::new();
        let variant = GameVariant::DarkDaysAhead;
        let dda = fx.orchestrator(variant);
        fx.gateway.set_status(variant, "0.H", InstallationStatus::ReadyToPlay);

        assert!(matches!(
            dda.resume_last_world("0.H").await,
            Err(OrchestratorError::Validation(_))
        ));
        assert_eq!(fx.registry.currently_playing(), None);

        fx.gateway.set_last_played_world(variant, "Cataclysm");
        dda.resume_last_world("0.H").await.unwrap();
        assert_eq!(
            fx.gateway.launched(),
            vec![(variant, "0.H".to_string(), Some("Cataclysm".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_play_rejected_while_installing() {
        let fx = Fixture::new();
        let variant = GameVariant::DarkDaysAhead;
        let dda = fx.orchestrator(variant);
        fx.gateway.set_status(variant, "0.G", InstallationStatus::ReadyToPlay);
        let script = fx.gateway.script_install("0.H");

        let handle = dda.start_install("0.H").unwrap();
        assert!(matches!(
            dda.play("0.G").await,
            Err(OrchestratorError::AlreadyInstalling { .. })
        ));

        script.finish(Ok(Release::new("0.H", ReleaseType::Stable)));
        handle.wait().await.unwrap();
        assert!(dda.play("0.G").await.is_ok());
    }
}
