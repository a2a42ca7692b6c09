//! Error types for the orchestration core.

use thiserror::Error;

use crate::variant::GameVariant;

/// Failures reaching or reported by the backend.
///
/// `Clone` so that one coalesced fetch can hand the same outcome to every
/// waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Backend unreachable: {0}")]
    Transport(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Release not available: {0}")]
    NotAvailable(String),

    #[error("Malformed backend response: {0}")]
    Decode(String),

    #[error("Backend task failed: {0}")]
    TaskFailed(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

/// Errors returned by orchestrator operations.
///
/// None of these are fatal: the component that returned one is always back
/// in a stable state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(GatewayError),

    #[error("{variant} is already installing {release_id}")]
    AlreadyInstalling {
        variant: GameVariant,
        release_id: String,
    },

    #[error("{0} is already running")]
    AlreadyRunning(GameVariant),

    #[error("Release {0} is not available yet. Try again in a couple of hours.")]
    NotAvailable(String),

    #[error("Invalid request: {0}")]
    Validation(String),
}

impl From<GatewayError> for OrchestratorError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotAvailable(release_id) => OrchestratorError::NotAvailable(release_id),
            other => OrchestratorError::BackendUnavailable(other),
        }
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_available_maps_to_not_available() {
        let err: OrchestratorError = GatewayError::NotAvailable("0.H".to_string()).into();
        assert_eq!(err, OrchestratorError::NotAvailable("0.H".to_string()));
    }

    #[test]
    fn test_other_gateway_errors_map_to_backend_unavailable() {
        let err: OrchestratorError = GatewayError::Transport("connection refused".into()).into();
        assert!(matches!(err, OrchestratorError::BackendUnavailable(_)));

        let err: OrchestratorError = GatewayError::Decode("eof".into()).into();
        assert!(matches!(err, OrchestratorError::BackendUnavailable(_)));
    }

    #[test]
    fn test_messages() {
        let err = OrchestratorError::AlreadyInstalling {
            variant: GameVariant::BrightNights,
            release_id: "v0.7".to_string(),
        };
        assert_eq!(err.to_string(), "BrightNights is already installing v0.7");
        assert_eq!(
            OrchestratorError::AlreadyRunning(GameVariant::DarkDaysAhead).to_string(),
            "DarkDaysAhead is already running"
        );
    }
}
