//! Download progress sessions.
//!
//! A [`ProgressSession`] owns the progress subscription of one install call.
//! The backend pushes raw updates into a [`ProgressSink`]; the session
//! filters them so observers only ever see:
//!
//! - non-decreasing `bytes_downloaded`, never above a known `total_bytes`
//! - at most one `Downloading -> Installing` phase change, signalled by the
//!   backend and never inferred from byte counts
//! - exactly one terminal event, after which nothing else is delivered
//!
//! Observers get a [`ProgressStream`]. Dropping it only detaches the
//! listener; the install it belongs to keeps running.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::OrchestratorError;
use crate::release::{DownloadProgress, Release};
use crate::variant::GameVariant;

/// Raw update pushed by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// Bytes streamed so far
    Download(DownloadProgress),
    /// Download finished, backend is extracting and finalizing
    Installing,
}

/// Push side of a progress session, handed to the gateway.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressSink {
    /// Create a sink and the receiver a session drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report download progress. Returns false once the session has closed.
    pub fn download(&self, bytes_downloaded: u64, total_bytes: u64) -> bool {
        self.send(ProgressUpdate::Download(DownloadProgress {
            bytes_downloaded,
            total_bytes,
        }))
    }

    /// Report that the download is done and installation has begun.
    pub fn installing(&self) -> bool {
        self.send(ProgressUpdate::Installing)
    }

    pub fn send(&self, update: ProgressUpdate) -> bool {
        self.tx.send(update).is_ok()
    }
}

/// Sub-state of an in-flight install as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    /// Bytes streaming; starts at 0/0 before the first event
    Downloading(DownloadProgress),
    /// Post-download finalization, no byte progress
    Installing,
}

impl InstallPhase {
    /// Get a human-readable description of the current phase
    pub fn description(&self) -> &'static str {
        match self {
            InstallPhase::Downloading(_) => "Downloading...",
            InstallPhase::Installing => "Installing...",
        }
    }

    /// Byte progress, present only while downloading
    pub fn progress(&self) -> Option<DownloadProgress> {
        match self {
            InstallPhase::Downloading(progress) => Some(*progress),
            InstallPhase::Installing => None,
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Installed(Release),
    Failed(OrchestratorError),
}

/// Event delivered to a session listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Phase(InstallPhase),
    Finished(SessionOutcome),
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Finished(_))
    }
}

/// Ordered stream of events for one session. Ends after the terminal event.
pub struct ProgressStream {
    inner: UnboundedReceiverStream<ProgressEvent>,
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// One streamed download-progress subscription tied to one install call
pub struct ProgressSession {
    variant: GameVariant,
    release_id: String,
    phase: InstallPhase,
    snapshot: watch::Sender<InstallPhase>,
    listener: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSession {
    /// Open a session at 0/0 downloading progress.
    pub fn open(variant: GameVariant, release_id: &str) -> (Self, ProgressStream) {
        let phase = InstallPhase::Downloading(DownloadProgress::default());
        let (snapshot, _) = watch::channel(phase);
        let (listener, rx) = mpsc::unbounded_channel();

        let session = Self {
            variant,
            release_id: release_id.to_string(),
            phase,
            snapshot,
            listener,
        };
        let stream = ProgressStream {
            inner: UnboundedReceiverStream::new(rx),
        };
        (session, stream)
    }

    pub fn phase(&self) -> InstallPhase {
        self.phase
    }

    /// Latest-value view of the phase, for pollers that don't need every event
    pub fn watch(&self) -> watch::Receiver<InstallPhase> {
        self.snapshot.subscribe()
    }

    /// Apply one backend update. Returns whether it changed the phase.
    pub fn apply(&mut self, update: ProgressUpdate) -> bool {
        let next = match (self.phase, update) {
            (InstallPhase::Downloading(current), ProgressUpdate::Download(incoming)) => {
                let mut next = incoming;
                if next.total_bytes > 0 {
                    next.bytes_downloaded = next.bytes_downloaded.min(next.total_bytes);
                }
                if next.bytes_downloaded < current.bytes_downloaded {
                    tracing::debug!(
                        "Dropping non-monotonic progress for {} {}: {} < {}",
                        self.variant,
                        self.release_id,
                        next.bytes_downloaded,
                        current.bytes_downloaded
                    );
                    return false;
                }
                if next == current {
                    return false;
                }
                InstallPhase::Downloading(next)
            }
            (InstallPhase::Downloading(_), ProgressUpdate::Installing) => InstallPhase::Installing,
            (InstallPhase::Installing, ProgressUpdate::Download(_)) => {
                tracing::debug!(
                    "Ignoring download progress for {} {} after installation began",
                    self.variant,
                    self.release_id
                );
                return false;
            }
            (InstallPhase::Installing, ProgressUpdate::Installing) => return false,
        };

        self.phase = next;
        self.snapshot.send_replace(next);
        // A closed listener only means nobody is watching.
        let _ = self.listener.send(ProgressEvent::Phase(next));
        true
    }

    /// Drive `work` to completion while applying updates from `updates`.
    ///
    /// Updates already queued when `work` finishes are still applied; the
    /// receiver is closed afterwards so late sends are rejected.
    pub async fn follow<F, T>(
        &mut self,
        updates: &mut mpsc::UnboundedReceiver<ProgressUpdate>,
        work: F,
    ) -> T
    where
        F: Future<Output = T>,
    {
        tokio::pin!(work);
        loop {
            tokio::select! {
                biased;
                Some(update) = updates.recv() => {
                    self.apply(update);
                }
                result = &mut work => {
                    while let Ok(update) = updates.try_recv() {
                        self.apply(update);
                    }
                    updates.close();
                    return result;
                }
            }
        }
    }

    /// Emit the terminal event and tear the session down.
    pub fn finish(self, outcome: SessionOutcome) {
        match &outcome {
            SessionOutcome::Installed(release) => tracing::debug!(
                "Progress session for {} {} finished: installed {}",
                self.variant,
                self.release_id,
                release.version
            ),
            SessionOutcome::Failed(e) => tracing::debug!(
                "Progress session for {} {} finished: {}",
                self.variant,
                self.release_id,
                e
            ),
        }
        let _ = self.listener.send(ProgressEvent::Finished(outcome));
    }
}
