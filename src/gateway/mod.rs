//! Typed calls into the backend that performs downloads, installs and
//! process launching.
//!
//! The orchestration core only talks to the backend through
//! [`CommandGateway`]. Request/response calls return directly; release
//! listings and process-exit notifications arrive on the event broadcast
//! returned by [`CommandGateway::subscribe`].

mod http;

#[cfg(test)]
pub mod testing;

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::GatewayError;
use crate::progress::ProgressSink;
use crate::release::{InstallationStatus, Release, ReleasesUpdate};
use crate::variant::GameVariant;

pub use http::HttpGateway;

/// Capacity of the gateway event broadcast
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Unsolicited events published by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Answer to a `fetch_releases` trigger
    ReleasesUpdate(ReleasesUpdate),
    /// A launched game process has exited
    GameExited { variant: GameVariant },
}

/// Backend command surface consumed by the orchestration core.
pub trait CommandGateway: Send + Sync + 'static {
    /// Ask the backend to refresh the release list. The list itself arrives
    /// later as a [`GatewayEvent::ReleasesUpdate`].
    fn fetch_releases(
        &self,
        variant: GameVariant,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn get_installation_status(
        &self,
        variant: GameVariant,
        release_id: &str,
    ) -> impl Future<Output = Result<InstallationStatus, GatewayError>> + Send;

    /// Install a release, pushing progress into `progress` until the
    /// returned future resolves.
    fn install_release(
        &self,
        variant: GameVariant,
        release_id: &str,
        progress: ProgressSink,
    ) -> impl Future<Output = Result<Release, GatewayError>> + Send;

    fn get_active_release(
        &self,
        variant: GameVariant,
    ) -> impl Future<Output = Result<Option<String>, GatewayError>> + Send;

    fn get_last_played_world(
        &self,
        variant: GameVariant,
    ) -> impl Future<Output = Result<Option<String>, GatewayError>> + Send;

    fn launch_game(
        &self,
        variant: GameVariant,
        release_id: &str,
        world: Option<&str>,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Wipe all launcher-managed data for a variant except saves
    fn master_reset(
        &self,
        variant: GameVariant,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Subscribe to backend events
    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent>;
}
