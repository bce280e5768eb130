use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use wab_client::{ApiError, ControlApi};
use wab_core::{InstanceStatus, PairingCodeInfo};

use crate::{EngineConfig, Poller};

/// Lifecycle of the (single) open pairing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingPhase {
    /// No session open.
    Idle,
    /// Session opened, first fetch not settled yet.
    Loading,
    /// A live code is available, counting down.
    Valid,
    /// The code ran out; a new one must be generated.
    Expired,
    /// Regeneration in flight; no code may be shown.
    Regenerating,
    /// The instance reached `connected` while the session was open.
    Linked,
    /// The instance vanished server-side; the caller should close.
    Gone,
}

impl PairingPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, PairingPhase::Linked | PairingPhase::Gone)
    }
}

/// Read-only projection of the open session, cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct PairingView {
    pub instance_id: Option<String>,
    pub phase: PairingPhase,
    pub code: Option<String>,
    /// Epoch milliseconds, as reported by the backend.
    pub expires_at_ms: Option<i64>,
    pub remaining_seconds: i64,
    pub status: Option<InstanceStatus>,
}

impl PairingView {
    fn idle() -> Self {
        Self {
            instance_id: None,
            phase: PairingPhase::Idle,
            code: None,
            expires_at_ms: None,
            remaining_seconds: 0,
            status: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("no pairing session is open")]
    NotOpen,
    #[error("a code regeneration is already in flight")]
    RegenerationInProgress,
    #[error("pairing session superseded before the response arrived")]
    Superseded,
    #[error(transparent)]
    Api(#[from] ApiError),
}

struct SessionState {
    /// Bumped on open, close and regenerate. A response settles only if
    /// the generation it was issued under is still current; anything
    /// else is discarded.
    generation: u64,
    view: PairingView,
    /// Runtime-clock deadline mirroring `expires_at_ms`; drives the
    /// autonomous Valid -> Expired transition.
    deadline: Option<Instant>,
}

/// Tracks one instance's pairing-credential lifecycle: a short-cadence
/// poll of the pairing payload (to catch externally-driven transitions
/// such as the user completing pairing on the phone) plus a local
/// countdown that expires the code without waiting for the network.
pub struct PairingTracker {
    api: Arc<dyn ControlApi>,
    config: EngineConfig,
    state: Arc<Mutex<SessionState>>,
    tasks: Mutex<Vec<Poller>>,
}

impl PairingTracker {
    pub fn new(api: Arc<dyn ControlApi>, config: EngineConfig) -> Self {
        Self {
            api,
            config,
            state: Arc::new(Mutex::new(SessionState {
                generation: 0,
                view: PairingView::idle(),
                deadline: None,
            })),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn view(&self) -> PairingView {
        self.state.lock().await.view.clone()
    }

    /// Open a pairing session for `instance_id`. Any previously open
    /// session is superseded: its tasks stop and late responses for it
    /// are discarded.
    pub async fn open(&self, instance_id: &str) {
        {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.view = PairingView {
                instance_id: Some(instance_id.to_string()),
                phase: PairingPhase::Loading,
                ..PairingView::idle()
            };
            state.deadline = None;
        }

        let mut tasks = self.tasks.lock().await;
        tasks.clear();

        // Session-scoped reconciliation loop, independent of the
        // registry's fleet poll.
        let api = Arc::clone(&self.api);
        let state = Arc::clone(&self.state);
        let id = instance_id.to_string();
        tasks.push(Poller::spawn(self.config.pairing_poll, move || {
            let api = Arc::clone(&api);
            let state = Arc::clone(&state);
            let id = id.clone();
            async move {
                poll_once(api, &state, &id).await;
            }
        }));

        // Local countdown so the code expires on time even when no poll
        // response arrives.
        let state = Arc::clone(&self.state);
        tasks.push(Poller::spawn(self.config.countdown_tick, move || {
            let state = Arc::clone(&state);
            async move {
                countdown_tick(&state).await;
            }
        }));
    }

    /// Request a fresh code. Callable only from `Valid` or `Expired`.
    /// The displayed code is cleared before the request goes out, so a
    /// superseded code can never be shown even if the response is slow.
    pub async fn regenerate(&self) -> Result<(), PairingError> {
        let (generation, id) = {
            let mut state = self.state.lock().await;
            match state.view.phase {
                PairingPhase::Valid | PairingPhase::Expired => {}
                PairingPhase::Regenerating => return Err(PairingError::RegenerationInProgress),
                _ => return Err(PairingError::NotOpen),
            }
            let id = match state.view.instance_id.clone() {
                Some(id) => id,
                None => return Err(PairingError::NotOpen),
            };
            state.generation += 1;
            state.view.phase = PairingPhase::Regenerating;
            state.view.code = None;
            state.view.expires_at_ms = None;
            state.view.remaining_seconds = 0;
            state.deadline = None;
            (state.generation, id)
        };

        let result = self.api.regenerate_code(&id).await;

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(instance = %id, "pairing session superseded mid-regeneration, discarding response");
            return Err(PairingError::Superseded);
        }
        match result {
            Ok(info) => {
                apply_info(&mut state, info, true);
                Ok(())
            }
            Err(ApiError::NotFound(detail)) => {
                state.view.phase = PairingPhase::Gone;
                Err(PairingError::Api(ApiError::NotFound(detail)))
            }
            Err(err) => {
                // Back to Expired so the caller can retry.
                state.view.phase = PairingPhase::Expired;
                Err(PairingError::Api(err))
            }
        }
    }

    /// Tear down polling and countdown and return to `Idle`. Responses
    /// from requests still in flight are discarded.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.view = PairingView::idle();
            state.deadline = None;
        }
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.stop();
        }
    }
}

async fn poll_once(api: Arc<dyn ControlApi>, state: &Mutex<SessionState>, id: &str) {
    let generation = {
        let state = state.lock().await;
        if state.view.phase == PairingPhase::Idle || state.view.phase.is_terminal() {
            return;
        }
        state.generation
    };

    let result = api.pairing_code(id).await;

    let mut state = state.lock().await;
    if state.generation != generation {
        debug!(instance = id, "discarding stale pairing response");
        return;
    }
    match result {
        Ok(info) => apply_info(&mut state, info, false),
        Err(ApiError::NotFound(_)) => {
            warn!(instance = id, "instance vanished during pairing");
            state.view.phase = PairingPhase::Gone;
            state.view.code = None;
            state.deadline = None;
        }
        Err(err) if err.is_retryable() => {
            debug!(instance = id, error = %err, "pairing poll failed, retrying next tick");
        }
        Err(err) => {
            warn!(instance = id, error = %err, "pairing poll rejected by backend");
        }
    }
}

fn apply_info(state: &mut SessionState, info: PairingCodeInfo, from_regenerate: bool) {
    if !from_regenerate && state.view.phase == PairingPhase::Regenerating {
        // regenerate() owns the next transition; a concurrent poll may
        // still carry the superseded code.
        return;
    }
    if let Some(status) = info.status.clone() {
        state.view.status = Some(status.clone());
        if status == InstanceStatus::Connected {
            state.view.phase = PairingPhase::Linked;
            state.view.code = None;
            state.view.remaining_seconds = 0;
            state.deadline = None;
            return;
        }
    }
    if info.is_usable() {
        let remaining = info.pairing_code_remaining_seconds;
        state.view.phase = PairingPhase::Valid;
        state.view.code = info.pairing_code;
        state.view.expires_at_ms = info.pairing_code_expires_at;
        state.view.remaining_seconds = remaining;
        state.deadline = Some(Instant::now() + Duration::from_secs(remaining as u64));
    } else {
        state.view.phase = PairingPhase::Expired;
        state.view.code = None;
        state.view.expires_at_ms = None;
        state.view.remaining_seconds = 0;
        state.deadline = None;
    }
}

async fn countdown_tick(state: &Mutex<SessionState>) {
    let mut state = state.lock().await;
    if state.view.phase != PairingPhase::Valid {
        return;
    }
    let remaining = match state.deadline {
        Some(deadline) => deadline.saturating_duration_since(Instant::now()).as_secs() as i64,
        None => 0,
    };
    state.view.remaining_seconds = remaining;
    if remaining == 0 {
        state.view.phase = PairingPhase::Expired;
        state.view.code = None;
    }
}
