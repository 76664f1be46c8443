//! Connection state of a managed MCP server.
//!
//! Transition table (anything not listed is rejected):
//!
//! | from           | to                                    |
//! |----------------|---------------------------------------|
//! | `Disconnected` | `Connecting`, `Disconnected`          |
//! | `Connecting`   | `Connected`, `Error`, `Disconnected`  |
//! | `Connected`    | `Error`, `Disconnected`               |
//! | `Error`        | `Connecting`, `Disconnected`          |
//!
//! `Connecting -> Disconnected` is a shutdown racing an in-flight connect;
//! `Disconnected -> Disconnected` keeps shutdown idempotent.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting | Disconnected)
                | (Connecting, Connected | Error | Disconnected)
                | (Connected, Error | Disconnected)
                | (Error, Connecting | Disconnected)
        )
    }

    /// A `connect()` in this state is a no-op.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
