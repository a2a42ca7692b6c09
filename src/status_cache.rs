//! Installation status and active release caches.
//!
//! Both caches are keyed, fetch lazily through the gateway and coalesce
//! concurrent reads of one key into a single backend call. A fetch runs as
//! its own task: callers that stop waiting do not cancel it, and its result
//! is still written to the cache when it lands. A result that lands after
//! its key was invalidated or overwritten is kept only as a fallback: it
//! never replaces a recorded value and the next read asks the backend again.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::{GatewayError, OrchestratorError};
use crate::gateway::CommandGateway;
use crate::release::InstallationStatus;
use crate::variant::GameVariant;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, GatewayError>>>;

struct Slot<V> {
    /// Last value received, kept as a fallback while stale
    value: Option<V>,
    /// Whether `value` may be served without asking the backend
    fresh: bool,
    /// `value` was recorded locally and only a current fetch may replace it
    recorded: bool,
    /// Outstanding fetch and its ticket
    in_flight: Option<(u64, SharedFetch<V>)>,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self {
            value: None,
            fresh: false,
            recorded: false,
            in_flight: None,
        }
    }
}

/// Keyed cache whose concurrent loads of one key share a single fetch.
struct Coalescing<K, V> {
    slots: Arc<DashMap<K, Slot<V>>>,
    tickets: Arc<AtomicU64>,
}

impl<K, V> Clone for Coalescing<K, V> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
            tickets: Arc::clone(&self.tickets),
        }
    }
}

impl<K, V> Coalescing<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            tickets: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current value and whether it is fresh
    fn peek(&self, key: &K) -> Option<(V, bool)> {
        self.slots
            .get(key)
            .and_then(|slot| slot.value.clone().map(|v| (v, slot.fresh)))
    }

    /// Return the fresh value, join the outstanding fetch, or start one.
    ///
    /// Whichever response lands last is the one the slot keeps, but a
    /// response from a detached fetch leaves the slot stale.
    fn load<F, Fut>(&self, key: K, fetch: F) -> SharedFetch<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, GatewayError>> + Send + 'static,
    {
        let mut slot = self.slots.entry(key.clone()).or_default();

        if slot.fresh {
            if let Some(value) = slot.value.clone() {
                return futures::future::ready(Ok(value)).boxed().shared();
            }
        }
        if let Some((_, pending)) = &slot.in_flight {
            tracing::debug!("Joining in-flight fetch for {:?}", key);
            return pending.clone();
        }

        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let slots = Arc::clone(&self.slots);
        let request = fetch();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let result = request.await;
            if let Some(mut slot) = slots.get_mut(&task_key) {
                let current = slot.in_flight.as_ref().is_some_and(|(t, _)| *t == ticket);
                match &result {
                    Ok(value) if current => {
                        slot.value = Some(value.clone());
                        slot.fresh = true;
                        slot.recorded = false;
                    }
                    Ok(value) if !slot.recorded => {
                        tracing::debug!("Late response for {:?} kept as fallback", task_key);
                        slot.value = Some(value.clone());
                        slot.fresh = false;
                    }
                    Ok(_) => {
                        tracing::debug!("Late response for {:?} dropped", task_key);
                    }
                    Err(_) => {}
                }
                if current {
                    slot.in_flight = None;
                }
            }
            if let Err(e) = &result {
                tracing::warn!("Fetch for {:?} failed: {}", task_key, e);
            }
            result
        });

        let pending = async move {
            task.await
                .unwrap_or_else(|e| Err(GatewayError::TaskFailed(e.to_string())))
        }
        .boxed()
        .shared();
        slot.in_flight = Some((ticket, pending.clone()));
        pending
    }

    /// Store a value without asking the backend. Fetches already in flight
    /// are detached and cannot overwrite it.
    fn put(&self, key: K, value: V, fresh: bool) {
        let mut slot = self.slots.entry(key).or_default();
        slot.value = Some(value);
        slot.fresh = fresh;
        slot.recorded = true;
        slot.in_flight = None;
    }

    /// Force the next load to hit the backend. The old value stays as a fallback.
    fn invalidate(&self, key: &K) {
        if let Some(mut slot) = self.slots.get_mut(key) {
            slot.fresh = false;
            slot.in_flight = None;
        }
    }

    /// Drop every key for which `remove` returns true.
    fn clear_where(&self, remove: impl Fn(&K) -> bool) {
        self.slots.retain(|key, _| !remove(key));
    }
}

/// Cache key of an installation status
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusKey {
    pub variant: GameVariant,
    pub release_id: String,
}

impl StatusKey {
    fn new(variant: GameVariant, release_id: &str) -> Self {
        Self {
            variant,
            release_id: release_id.to_string(),
        }
    }
}

/// Installation status per `(variant, release)` and active release per variant
pub struct StatusCache<G> {
    gateway: Arc<G>,
    statuses: Coalescing<StatusKey, InstallationStatus>,
    active: Coalescing<GameVariant, Option<String>>,
}

impl<G> Clone for StatusCache<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            statuses: self.statuses.clone(),
            active: self.active.clone(),
        }
    }
}

impl<G: CommandGateway> StatusCache<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            statuses: Coalescing::new(),
            active: Coalescing::new(),
        }
    }

    /// Non-blocking read.
    ///
    /// Returns the cached status, starting a background fetch when it is
    /// stale or missing. Until that fetch lands this is `Unknown` (or the
    /// previous value after an invalidation).
    pub fn get_status(&self, variant: GameVariant, release_id: &str) -> InstallationStatus {
        let key = StatusKey::new(variant, release_id);
        match self.statuses.peek(&key) {
            Some((status, true)) => status,
            stale => {
                drop(self.start_status_fetch(key));
                stale.map(|(status, _)| status).unwrap_or_default()
            }
        }
    }

    /// Authoritative read: the cached value if fresh, otherwise the result of
    /// a (possibly shared) backend fetch.
    pub async fn fetch_status(
        &self,
        variant: GameVariant,
        release_id: &str,
    ) -> Result<InstallationStatus, OrchestratorError> {
        let key = StatusKey::new(variant, release_id);
        self.start_status_fetch(key)
            .await
            .map_err(OrchestratorError::BackendUnavailable)
    }

    /// Cached status without touching the backend
    pub fn cached_status(&self, variant: GameVariant, release_id: &str) -> InstallationStatus {
        self.statuses
            .peek(&StatusKey::new(variant, release_id))
            .map(|(status, _)| status)
            .unwrap_or_default()
    }

    fn start_status_fetch(&self, key: StatusKey) -> SharedFetch<InstallationStatus> {
        let gateway = Arc::clone(&self.gateway);
        let StatusKey { variant, release_id } = key.clone();
        self.statuses.load(key, move || async move {
            tracing::debug!("Fetching installation status for {} {}", variant, release_id);
            gateway.get_installation_status(variant, &release_id).await
        })
    }

    /// Record a finished install: `ReadyToPlay` is shown immediately but the
    /// next read re-fetches so the backend has the final word.
    pub fn record_installed(&self, variant: GameVariant, release_id: &str) {
        self.statuses.put(
            StatusKey::new(variant, release_id),
            InstallationStatus::ReadyToPlay,
            false,
        );
    }

    /// Record an explicit not-available report from the backend.
    pub fn record_not_available(&self, variant: GameVariant, release_id: &str) {
        self.statuses.put(
            StatusKey::new(variant, release_id),
            InstallationStatus::NotAvailable,
            true,
        );
    }

    pub fn invalidate(&self, variant: GameVariant, release_id: &str) {
        self.statuses.invalidate(&StatusKey::new(variant, release_id));
    }

    /// Forget every status and the active release of a variant.
    pub fn reset_variant(&self, variant: GameVariant) {
        self.statuses.clear_where(|key| key.variant == variant);
        self.active.clear_where(|key| *key == variant);
        tracing::info!("Cleared cached installation state for {}", variant);
    }

    /// Cached active release; never fetches
    pub fn active_release(&self, variant: GameVariant) -> Option<String> {
        self.active.peek(&variant).and_then(|(active, _)| active)
    }

    /// Authoritative active release, fetched if stale
    pub async fn fetch_active_release(
        &self,
        variant: GameVariant,
    ) -> Result<Option<String>, OrchestratorError> {
        let gateway = Arc::clone(&self.gateway);
        self.active
            .load(variant, move || async move {
                gateway.get_active_release(variant).await
            })
            .await
            .map_err(OrchestratorError::BackendUnavailable)
    }

    pub fn invalidate_active_release(&self, variant: GameVariant) {
        self.active.invalidate(&variant);
    }
}
