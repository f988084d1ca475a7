//! Core session types shared across all modules.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

/// World-space vector.  Used for both positions (blocks) and velocities.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Look direction in degrees.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Rotation {
    pub yaw: f32,
    pub pitch: f32,
}

impl Rotation {
    pub fn new(yaw: f32, pitch: f32) -> Self {
        Self { yaw, pitch }
    }

    pub fn is_finite(&self) -> bool {
        self.yaw.is_finite() && self.pitch.is_finite()
    }
}

// ---------------------------------------------------------------------------
// Session descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.host.trim().is_empty() || self.port == 0 {
            return Err(SessionError::InvalidEndpoint {
                host: self.host.clone(),
                port: self.port,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Stored account the session authenticates as.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub access_token: String,
}

// Keep the token out of logs.
impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Target server plus the account used to reach it.
///
/// Owned by the storage layer; the session only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub server: ServerEndpoint,
    pub account: Account,
}

/// Post-authentication identity handed over by the auth flow at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameProfile {
    pub id: Uuid,
    pub name: String,
}

impl GameProfile {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// States during which the world model may hold entities.
    pub fn holds_world(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Log entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub scope: String,
    pub message: String,
    pub level: LogLevel,
}

impl LogEntry {
    pub fn new(scope: impl Into<String>, message: impl Into<String>, level: LogLevel) -> Self {
        Self {
            scope: scope.into(),
            message: message.into(),
            level,
        }
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.scope, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_rejects_port_zero_and_blank_host() {
        assert!(ServerEndpoint::new("mc.example.net", 25565).validate().is_ok());
        assert!(ServerEndpoint::new("mc.example.net", 0).validate().is_err());
        assert!(ServerEndpoint::new("  ", 25565).validate().is_err());
    }

    #[test]
    fn account_debug_hides_token() {
        let account = Account {
            username: "steve".into(),
            access_token: "secret-token".into(),
        };
        let dbg = format!("{account:?}");
        assert!(dbg.contains("steve"));
        assert!(!dbg.contains("secret-token"));
    }

    #[test]
    fn only_live_states_hold_world() {
        assert!(ConnectionState::Connecting.holds_world());
        assert!(ConnectionState::Connected.holds_world());
        assert!(!ConnectionState::Disconnecting.holds_world());
        assert!(!ConnectionState::Disconnected.holds_world());
    }
}
