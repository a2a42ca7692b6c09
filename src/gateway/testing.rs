//! Scripted in-memory gateway for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{broadcast, mpsc, oneshot};

use super::{CommandGateway, EVENT_CHANNEL_CAPACITY, GatewayEvent};
use crate::error::GatewayError;
use crate::progress::ProgressSink;
use crate::release::{InstallationStatus, Release, ReleaseType, ReleasesUpdate};
use crate::variant::GameVariant;

/// One step of a scripted install
pub enum InstallStep {
    Progress(u64, u64),
    Installing,
    Finish(Result<Release, GatewayError>),
}

/// Handle used by a test to drive a scripted install
pub struct InstallScript {
    tx: mpsc::UnboundedSender<InstallStep>,
}

impl InstallScript {
    pub fn progress(&self, bytes_downloaded: u64, total_bytes: u64) {
        self.tx
            .send(InstallStep::Progress(bytes_downloaded, total_bytes))
            .unwrap();
    }

    pub fn installing(&self) {
        self.tx.send(InstallStep::Installing).unwrap();
    }

    pub fn finish(&self, result: Result<Release, GatewayError>) {
        self.tx.send(InstallStep::Finish(result)).unwrap();
    }
}

#[derive(Default)]
pub struct Calls {
    pub fetch_releases: AtomicUsize,
    pub status: AtomicUsize,
    pub install: AtomicUsize,
    pub active_release: AtomicUsize,
    pub launch: AtomicUsize,
    pub reset: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct FakeGateway {
    pub calls: Calls,
    statuses: Mutex<HashMap<(GameVariant, String), Result<InstallationStatus, GatewayError>>>,
    status_holds: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    install_scripts: Mutex<HashMap<String, mpsc::UnboundedReceiver<InstallStep>>>,
    active: Mutex<HashMap<GameVariant, Result<Option<String>, GatewayError>>>,
    worlds: Mutex<HashMap<GameVariant, String>>,
    releases: Mutex<HashMap<GameVariant, Vec<Release>>>,
    launch_error: Mutex<Option<GatewayError>>,
    launched: Mutex<Vec<(GameVariant, String, Option<String>)>>,
    events: broadcast::Sender<GatewayEvent>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            calls: Calls::default(),
            statuses: Mutex::default(),
            status_holds: Mutex::default(),
            install_scripts: Mutex::default(),
            active: Mutex::default(),
            worlds: Mutex::default(),
            releases: Mutex::default(),
            launch_error: Mutex::default(),
            launched: Mutex::default(),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        }
    }
}

impl FakeGateway {
    pub fn set_status(&self, variant: GameVariant, release_id: &str, status: InstallationStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert((variant, release_id.to_string()), Ok(status));
    }

    pub fn fail_status(&self, variant: GameVariant, release_id: &str, error: GatewayError) {
        self.statuses
            .lock()
            .unwrap()
            .insert((variant, release_id.to_string()), Err(error));
    }

    /// Hold the next status response for `release_id` until the sender fires
    pub fn hold_status(&self, release_id: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.status_holds
            .lock()
            .unwrap()
            .insert(release_id.to_string(), rx);
        tx
    }

    /// Make the next install of `release_id` follow the returned script
    pub fn script_install(&self, release_id: &str) -> InstallScript {
        let (tx, rx) = mpsc::unbounded_channel();
        self.install_scripts
            .lock()
            .unwrap()
            .insert(release_id.to_string(), rx);
        InstallScript { tx }
    }

    pub fn set_active_release(&self, variant: GameVariant, release_id: Option<&str>) {
        self.active
            .lock()
            .unwrap()
            .insert(variant, Ok(release_id.map(str::to_string)));
    }

    pub fn set_last_played_world(&self, variant: GameVariant, world: &str) {
        self.worlds.lock().unwrap().insert(variant, world.to_string());
    }

    pub fn set_releases(&self, variant: GameVariant, releases: Vec<Release>) {
        self.releases.lock().unwrap().insert(variant, releases);
    }

    pub fn fail_launches(&self, error: GatewayError) {
        *self.launch_error.lock().unwrap() = Some(error);
    }

    pub fn launched(&self) -> Vec<(GameVariant, String, Option<String>)> {
        self.launched.lock().unwrap().clone()
    }

    pub fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }
}

impl CommandGateway for FakeGateway {
    async fn fetch_releases(&self, variant: GameVariant) -> Result<(), GatewayError> {
        self.calls.fetch_releases.fetch_add(1, Ordering::SeqCst);
        let releases = self
            .releases
            .lock()
            .unwrap()
            .get(&variant)
            .cloned()
            .unwrap_or_default();
        self.emit(GatewayEvent::ReleasesUpdate(ReleasesUpdate { variant, releases }));
        Ok(())
    }

    async fn get_installation_status(
        &self,
        variant: GameVariant,
        release_id: &str,
    ) -> Result<InstallationStatus, GatewayError> {
        self.calls.status.fetch_add(1, Ordering::SeqCst);
        // The answer is decided when the request arrives, then held in transit.
        let response = self
            .statuses
            .lock()
            .unwrap()
            .get(&(variant, release_id.to_string()))
            .cloned()
            .unwrap_or(Ok(InstallationStatus::NotInstalled));
        let hold = self.status_holds.lock().unwrap().remove(release_id);
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        response
    }

    async fn install_release(
        &self,
        _variant: GameVariant,
        release_id: &str,
        progress: ProgressSink,
    ) -> Result<Release, GatewayError> {
        self.calls.install.fetch_add(1, Ordering::SeqCst);
        let script = self.install_scripts.lock().unwrap().remove(release_id);
        let Some(mut script) = script else {
            progress.download(0, 10);
            progress.download(10, 10);
            progress.installing();
            return Ok(Release::new(release_id, ReleaseType::Stable));
        };

        while let Some(step) = script.recv().await {
            match step {
                InstallStep::Progress(bytes, total) => {
                    progress.download(bytes, total);
                }
                InstallStep::Installing => {
                    progress.installing();
                }
                InstallStep::Finish(result) => return result,
            }
        }
        Err(GatewayError::Transport("install script dropped".to_string()))
    }

    async fn get_active_release(&self, variant: GameVariant) -> Result<Option<String>, GatewayError> {
        self.calls.active_release.fetch_add(1, Ordering::SeqCst);
        self.active
            .lock()
            .unwrap()
            .get(&variant)
            .cloned()
            .unwrap_or(Ok(None))
    }

    async fn get_last_played_world(
        &self,
        variant: GameVariant,
    ) -> Result<Option<String>, GatewayError> {
        Ok(self.worlds.lock().unwrap().get(&variant).cloned())
    }

    async fn launch_game(
        &self,
        variant: GameVariant,
        release_id: &str,
        world: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.calls.launch.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.launch_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.launched.lock().unwrap().push((
            variant,
            release_id.to_string(),
            world.map(str::to_string),
        ));
        Ok(())
    }

    async fn master_reset(&self, _variant: GameVariant) -> Result<(), GatewayError> {
        self.calls.reset.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }
}
