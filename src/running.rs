//! Single-slot registry of the variant currently being played.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::OrchestratorError;
use crate::variant::GameVariant;

/// Holds at most one playing variant for the whole process.
///
/// Every launch goes through [`RunningGameRegistry::acquire`]; the slot is
/// the source of truth even when callers have already disabled their
/// launch actions.
pub struct RunningGameRegistry {
    slot: watch::Sender<Option<GameVariant>>,
}

impl Default for RunningGameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningGameRegistry {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot }
    }

    /// Variant currently holding the slot
    pub fn currently_playing(&self) -> Option<GameVariant> {
        *self.slot.borrow()
    }

    /// Watch the slot, e.g. to disable launch actions everywhere
    pub fn subscribe(&self) -> watch::Receiver<Option<GameVariant>> {
        self.slot.subscribe()
    }

    /// Claim the slot for `variant`. Never blocks.
    pub fn acquire(&self, variant: GameVariant) -> Result<(), OrchestratorError> {
        let mut holder = None;
        self.slot.send_if_modified(|current| match current {
            Some(running) => {
                holder = Some(*running);
                false
            }
            None => {
                *current = Some(variant);
                true
            }
        });

        match holder {
            Some(running) => {
                tracing::warn!("Refusing to start {}: {} is already running", variant, running);
                Err(OrchestratorError::AlreadyRunning(running))
            }
            None => {
                tracing::info!("{} acquired the running slot", variant);
                Ok(())
            }
        }
    }

    /// Empty the slot, returning who held it.
    pub fn release(&self) -> Option<GameVariant> {
        let previous = self.slot.send_replace(None);
        if let Some(variant) = previous {
            tracing::info!("{} released the running slot", variant);
        }
        previous
    }

    /// Handle a process-exit notification. Only empties the slot when
    /// `variant` is the one holding it.
    pub fn on_game_exited(&self, variant: GameVariant) -> bool {
        let released = self.slot.send_if_modified(|current| {
            if *current == Some(variant) {
                *current = None;
                true
            } else {
                false
            }
        });
        if released {
            tracing::info!("{} exited, running slot released", variant);
        } else {
            tracing::debug!("Ignoring exit of {}: it does not hold the slot", variant);
        }
        released
    }

    /// Claim the slot for a launch that has not started yet.
    ///
    /// The returned guard gives the slot back on drop unless
    /// [`PendingLaunch::started`] is called, so a failed or abandoned launch
    /// never leaves the slot held.
    pub fn begin_launch(self: &Arc<Self>, variant: GameVariant) -> Result<PendingLaunch, OrchestratorError> {
        self.acquire(variant)?;
        Ok(PendingLaunch {
            registry: Some(Arc::clone(self)),
            variant,
        })
    }
}

/// Slot claim held while a launch request is in flight
pub struct PendingLaunch {
    registry: Option<Arc<RunningGameRegistry>>,
    variant: GameVariant,
}

impl PendingLaunch {
    /// The game is running; keep the slot until its exit is reported.
    pub fn started(mut self) {
        self.registry = None;
    }
}

impl Drop for PendingLaunch {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            tracing::debug!("Launch of {} did not start, giving the slot back", self.variant);
            registry.on_game_exited(self.variant);
        }
    }
}
