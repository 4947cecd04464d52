use std::fmt;

use serde::{Deserialize, Serialize};

use super::severity::Severity;

/// Current state of a monitored component
///
/// Nodes do not enforce a transition table; any state may follow any other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    #[default]
    Unknown,
    Normal,
    Broken,
    Overflow,

    NotInitialized,
    Initializing,
    Initialized,
    InitializationFailed,

    Deinitializing,
    Deinitialized,
    DeinitializationFailed,

    NotConnected,
    Connecting,
    Connected,
    ConnectionFailed,

    Disconnecting,
    Disconnected,
    DisconnectionFailed,

    AuthenticationFailed,
    AuthorizationFailed,
}

impl ComponentState {
    /// Severity used when a state change does not name one
    pub fn default_severity(self) -> Severity {
        use ComponentState::*;
        match self {
            Initializing | Deinitializing | Connecting | Disconnecting => Severity::DEBUG,
            Normal | NotInitialized | Initialized | Deinitialized | NotConnected | Connected
            | Disconnected => Severity::INFO,
            Unknown | Overflow => Severity::WARNING,
            InitializationFailed
            | DeinitializationFailed
            | ConnectionFailed
            | DisconnectionFailed
            | AuthenticationFailed
            | AuthorizationFailed => Severity::ERROR,
            Broken => Severity::FATAL,
        }
    }

    pub fn is_failure(self) -> bool {
        self.default_severity().reaches(Severity::ERROR)
    }

    pub fn as_str(self) -> &'static str {
        use ComponentState::*;
        match self {
            Unknown => "unknown",
            Normal => "normal",
            Broken => "broken",
            Overflow => "overflow",
            NotInitialized => "not_initialized",
            Initializing => "initializing",
            Initialized => "initialized",
            InitializationFailed => "initialization_failed",
            Deinitializing => "deinitializing",
            Deinitialized => "deinitialized",
            DeinitializationFailed => "deinitialization_failed",
            NotConnected => "not_connected",
            Connecting => "connecting",
            Connected => "connected",
            ConnectionFailed => "connection_failed",
            Disconnecting => "disconnecting",
            Disconnected => "disconnected",
            DisconnectionFailed => "disconnection_failed",
            AuthenticationFailed => "authentication_failed",
            AuthorizationFailed => "authorization_failed",
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
