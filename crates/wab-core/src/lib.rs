use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

pub mod phone;

pub use phone::{normalize_phone_number, PhoneNumberError, MIN_PHONE_DIGITS};

/// Lifecycle states reported by the backend for a bot instance.
///
/// The wire set is open: the backend forwards whatever status string the
/// bot process reports, so unrecognized values are preserved as
/// [`InstanceStatus::Unknown`] instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstanceStatus {
    Starting,
    WaitingForPairing,
    Pairing,
    Connecting,
    Connected,
    Running,
    Stopped,
    Disconnected,
    LoggedOut,
    Error,
    Unknown(String),
}

impl InstanceStatus {
    pub fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "starting" => InstanceStatus::Starting,
            "waiting_for_pairing" => InstanceStatus::WaitingForPairing,
            "pairing" => InstanceStatus::Pairing,
            "connecting" => InstanceStatus::Connecting,
            "connected" => InstanceStatus::Connected,
            "running" => InstanceStatus::Running,
            "stopped" => InstanceStatus::Stopped,
            "disconnected" => InstanceStatus::Disconnected,
            "logged_out" => InstanceStatus::LoggedOut,
            "error" => InstanceStatus::Error,
            _ => InstanceStatus::Unknown(input.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::WaitingForPairing => "waiting_for_pairing",
            InstanceStatus::Pairing => "pairing",
            InstanceStatus::Connecting => "connecting",
            InstanceStatus::Connected => "connected",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Disconnected => "disconnected",
            InstanceStatus::LoggedOut => "logged_out",
            InstanceStatus::Error => "error",
            InstanceStatus::Unknown(raw) => raw,
        }
    }

    /// States in which the backing process is up, including the pairing
    /// handshake states.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Running
                | InstanceStatus::Connected
                | InstanceStatus::Pairing
                | InstanceStatus::Connecting
                | InstanceStatus::WaitingForPairing
        )
    }

    /// States in which the bot holds a live WhatsApp session.
    pub fn is_active(&self) -> bool {
        matches!(self, InstanceStatus::Running | InstanceStatus::Connected)
    }

    pub fn is_pairing(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Pairing | InstanceStatus::WaitingForPairing
        )
    }
}

impl Default for InstanceStatus {
    fn default() -> Self {
        InstanceStatus::Unknown("unknown".to_string())
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for InstanceStatus {
    fn from(value: String) -> Self {
        InstanceStatus::parse(&value)
    }
}

impl From<InstanceStatus> for String {
    fn from(value: InstanceStatus) -> Self {
        value.as_str().to_string()
    }
}

/// Identity metadata for the WhatsApp account linked to an instance.
/// The shape is bot-defined; unknown fields are kept for projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConnectedUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl ConnectedUser {
    /// Preferred display label: the account name, falling back to id.
    pub fn label(&self) -> Option<&str> {
        self.name.as_deref().or(self.id.as_deref())
    }
}

/// One managed bot instance as reported by the backend. `id`, `name`
/// and `phone_number` are immutable after creation; `status` is a
/// cached projection that may be stale by up to one poll interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub pairing_code: Option<String>,
    #[serde(default)]
    pub connected_user: Option<ConnectedUser>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Payload of `GET /api/instances`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InstanceList {
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub total: usize,
}

/// Payload of the pairing-code and regenerate-code endpoints.
/// `pairing_code_expires_at` is epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PairingCodeInfo {
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub pairing_code: Option<String>,
    #[serde(default)]
    pub pairing_code_valid: bool,
    #[serde(default)]
    pub pairing_code_remaining_seconds: i64,
    #[serde(default)]
    pub pairing_code_expires_at: Option<i64>,
    #[serde(default)]
    pub status: Option<InstanceStatus>,
}

impl PairingCodeInfo {
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.pairing_code_expires_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// Whether the payload carries a code that can still be entered.
    pub fn is_usable(&self) -> bool {
        self.pairing_code.is_some()
            && self.pairing_code_valid
            && self.pairing_code_remaining_seconds > 0
    }
}
