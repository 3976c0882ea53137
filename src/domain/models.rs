use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Lifecycle state of the controller. Exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    PermissionsNeeded,
    AdapterDisabled,
    AdapterUnsupported,
    PeerNotFound,
    SelectingPeer,
}

impl ConnectionState {
    /// States that own a live transport session.
    pub fn has_session(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
            Self::PermissionsNeeded => "Permissions Required",
            Self::AdapterDisabled => "Bluetooth Disabled",
            Self::AdapterUnsupported => "Bluetooth Not Supported",
            Self::PeerNotFound => "Device Not Found",
            Self::SelectingPeer => "Select a Device",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Opaque handle the transport uses to reach a peer.
///
/// For the TCP transport this is a `host:port` endpoint, for the local socket
/// transport it is a socket name or path.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerHandle(Arc<str>);

impl PeerHandle {
    pub fn new(endpoint: impl Into<Arc<str>>) -> Self {
        Self(endpoint.into())
    }

    pub fn endpoint(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerHandle({})", self.0)
    }
}

/// A paired peer as reported by the enumeration collaborator.
///
/// Identity is the address: two descriptors with the same address are the
/// same peer regardless of name or handle.
#[derive(Debug, Clone)]
pub struct PeerDescriptor {
    pub name: Option<String>,
    pub address: String,
    pub handle: PeerHandle,
}

impl PeerDescriptor {
    pub fn new(name: Option<String>, address: impl Into<String>, handle: PeerHandle) -> Self {
        Self {
            name,
            address: address.into(),
            handle,
        }
    }

    /// Name for display, falling back to "Unknown".
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }

    /// Name if known, otherwise the address. Used in notifications.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl PartialEq for PeerDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for PeerDescriptor {}

/// Directional command sent to the remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Self::Up, Self::Down, Self::Left, Self::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    /// Wire encoding: lowercase name followed by a single newline.
    pub fn encode(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(6);
        bytes.extend_from_slice(self.as_str().as_bytes());
        bytes.push(b'\n');
        bytes
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown direction: {0:?}")]
pub struct UnknownDirection(pub String);

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            _ => Err(UnknownDirection(s.to_string())),
        }
    }
}

/// Edge-triggered radio events from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioEvent {
    /// Adapter turned off or is turning off
    Off,
    On,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// What the rendering side sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: ConnectionState,
    pub peers: Vec<PeerDescriptor>,
    pub selected: Option<PeerDescriptor>,
    /// True while a transport session exists
    pub session_active: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            peers: Vec::new(),
            selected: None,
            session_active: false,
        }
    }
}
