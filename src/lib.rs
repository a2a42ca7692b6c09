//! Installation and play orchestration for a multi-variant game launcher.
//!
//! The backend that downloads, installs and launches games sits behind
//! [`gateway::CommandGateway`]. This crate reconciles its status answers,
//! progress streams and the user's commands into one view of what can be
//! done right now.

pub mod config;
pub mod error;
pub mod gateway;
pub mod install;
pub mod interaction;
pub mod launcher;
pub mod progress;
pub mod release;
pub mod releases;
pub mod running;
pub mod status_cache;
pub mod upgrade;
pub mod variant;

pub use error::{GatewayError, OrchestratorError};
pub use gateway::{CommandGateway, GatewayEvent, HttpGateway};
pub use install::{InstallHandle, InstallOrchestrator, InstallOutcome, OrchestratorState};
pub use launcher::Launcher;
pub use release::{DownloadProgress, InstallationStatus, Release, ReleaseType};
pub use running::RunningGameRegistry;
pub use variant::GameVariant;
