//! Client-side lifecycle reconciliation engine for the wabot control
//! surface.
//!
//! Two independent reconciliation loops keep local state consistent
//! with the backend under polling delivery: [`InstanceRegistry`]
//! refreshes the fleet snapshot, and [`PairingTracker`] follows one
//! open pairing session (code validity, expiry countdown,
//! regeneration). Both are driven by [`Poller`], a cancellable
//! periodic task that structurally rules out overlapping runs.

pub mod pairing;
pub mod poller;
pub mod registry;

pub use pairing::{PairingError, PairingPhase, PairingTracker, PairingView};
pub use poller::Poller;
pub use registry::{CommandError, InstanceRegistry, RefreshOutcome, RegistrySnapshot};

use std::time::Duration;

const DEFAULT_REGISTRY_POLL_SECS: u64 = 5;
const DEFAULT_PAIRING_POLL_SECS: u64 = 3;
const DEFAULT_COUNTDOWN_TICK_MS: u64 = 1_000;

/// Cadences for the two reconciliation loops and the expiry countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How often the fleet snapshot is refreshed.
    pub registry_poll: Duration,
    /// How often an open pairing session re-fetches its payload.
    pub pairing_poll: Duration,
    /// How often the local countdown recomputes remaining seconds.
    pub countdown_tick: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            registry_poll: Duration::from_secs(DEFAULT_REGISTRY_POLL_SECS),
            pairing_poll: Duration::from_secs(DEFAULT_PAIRING_POLL_SECS),
            countdown_tick: Duration::from_millis(DEFAULT_COUNTDOWN_TICK_MS),
        }
    }
}
