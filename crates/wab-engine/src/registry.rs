use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use wab_client::{ApiError, ControlApi};
use wab_core::{normalize_phone_number, Instance, PhoneNumberError};

use crate::Poller;

/// Most recently settled view of the instance fleet.
///
/// `instances` always reflects the last successful listing in full; a
/// failed refresh leaves it untouched and records the failure in
/// `last_error` so projections can show a non-blocking banner over
/// last-known-good state.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub instances: Vec<Instance>,
    pub last_error: Option<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl RegistrySnapshot {
    pub fn get(&self, id: &str) -> Option<&Instance> {
        self.instances.iter().find(|instance| instance.id == id)
    }

    pub fn total(&self) -> usize {
        self.instances.len()
    }

    pub fn active_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|instance| instance.status.is_active())
            .count()
    }

    pub fn pairing_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|instance| instance.status.is_pairing())
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Snapshot replaced with a fresh listing.
    Updated,
    /// A refresh was already in flight; this call issued no request.
    Skipped,
    /// The fetch failed; previous snapshot kept, error recorded.
    Failed,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("an action is already in progress for instance {0}")]
    ActionInProgress(String),
    #[error(transparent)]
    InvalidPhone(#[from] PhoneNumberError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Authoritative local snapshot of all instances plus per-instance
/// serialization of mutating commands.
pub struct InstanceRegistry {
    api: Arc<dyn ControlApi>,
    state: Mutex<RegistrySnapshot>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    refresh_in_flight: AtomicBool,
}

impl InstanceRegistry {
    pub fn new(api: Arc<dyn ControlApi>) -> Self {
        Self {
            api,
            state: Mutex::new(RegistrySnapshot::default()),
            locks: Mutex::new(HashMap::new()),
            refresh_in_flight: AtomicBool::new(false),
        }
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.state.lock().await.clone()
    }

    /// Re-fetch the instance list and replace the snapshot wholesale.
    ///
    /// At most one refresh is in flight at a time; a call that finds one
    /// already running returns [`RefreshOutcome::Skipped`] without
    /// issuing a request, which bounds outstanding requests under a
    /// timer that keeps firing. A failed fetch never clears the
    /// snapshot.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self.refresh_in_flight.swap(true, Ordering::SeqCst) {
            debug!("instance refresh already in flight, skipping");
            return RefreshOutcome::Skipped;
        }
        // Guard rather than straight-line store: a refresh cancelled at
        // the await below (the loop poller being dropped mid-run) must
        // still release the flag, or every later refresh is skipped.
        let _in_flight = InFlightGuard(&self.refresh_in_flight);
        let result = self.api.list_instances().await;
        let mut state = self.state.lock().await;
        match result {
            Ok(instances) => {
                state.instances = dedupe_by_id(instances);
                state.last_error = None;
                state.refreshed_at = Some(Utc::now());
                RefreshOutcome::Updated
            }
            Err(err) => {
                warn!(error = %err, "instance list refresh failed, keeping previous snapshot");
                state.last_error = Some(err.to_string());
                RefreshOutcome::Failed
            }
        }
    }

    /// Start the fleet reconciliation loop: one refresh immediately,
    /// then one per `period`. Dropping the returned poller stops it.
    pub fn spawn_refresh_loop(self: Arc<Self>, period: Duration) -> Poller {
        let registry = self;
        Poller::spawn(period, move || {
            let registry = Arc::clone(&registry);
            async move {
                registry.refresh().await;
            }
        })
    }

    /// Run one mutating command for `id` under its action lock.
    ///
    /// Fails fast with [`CommandError::ActionInProgress`] when another
    /// command for the same instance is still in flight (no queuing).
    /// The lock is released on every exit path, and a refresh runs
    /// after settlement so observers see post-action state without
    /// waiting for the next scheduled tick.
    pub async fn with_action_lock<T, F, Fut>(&self, id: &str, action: F) -> Result<T, CommandError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let slot = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        let guard = match slot.try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => return Err(CommandError::ActionInProgress(id.to_string())),
        };
        let result = action().await;
        drop(guard);
        self.refresh().await;
        result.map_err(CommandError::from)
    }

    /// Whether a mutating command is currently in flight for `id`.
    pub async fn action_in_progress(&self, id: &str) -> bool {
        let locks = self.locks.lock().await;
        locks
            .get(id)
            .map(|slot| slot.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Create an instance. The phone number is normalized and validated
    /// locally; invalid input is rejected before any network call.
    /// Creation takes no action lock since the backend has not minted
    /// an id yet.
    pub async fn create(&self, name: &str, phone_number: &str) -> Result<Instance, CommandError> {
        let digits = normalize_phone_number(phone_number)?;
        let instance = self.api.create_instance(name, &digits).await?;
        self.refresh().await;
        Ok(instance)
    }

    pub async fn start(&self, id: &str) -> Result<(), CommandError> {
        self.with_action_lock(id, || self.api.start_instance(id))
            .await
    }

    pub async fn stop(&self, id: &str) -> Result<(), CommandError> {
        self.with_action_lock(id, || self.api.stop_instance(id))
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<(), CommandError> {
        let result = self
            .with_action_lock(id, || self.api.delete_instance(id))
            .await;
        if result.is_ok() {
            self.locks.lock().await.remove(id);
        }
        result
    }
}

/// Clears the refresh-in-flight flag on drop, covering cancellation
/// and panic exits as well as normal completion.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The backend keys instances by id, so duplicates should not occur;
/// if one slips through, the first occurrence wins.
fn dedupe_by_id(instances: Vec<Instance>) -> Vec<Instance> {
    let mut seen = HashSet::new();
    instances
        .into_iter()
        .filter(|instance| seen.insert(instance.id.clone()))
        .collect()
}
