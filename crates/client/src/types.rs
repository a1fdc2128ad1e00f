//! Public types for the client.

use std::fmt;

use serde::Serialize;

use livewire_protocol::constants::{KIND_CONNECTED, KIND_DISCONNECTED, KIND_ERROR, KIND_SESSION};
use livewire_protocol::{Envelope, SessionInfo};

/// Connection state. Only the connection manager transitions it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// A stream open is in flight.
    Connecting,
    /// Stream open and auth frame written.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Payload of the `connected` lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedInfo {
    /// `true` when an earlier connection of this client existed.
    pub reconnected: bool,
}

/// Payload of the `disconnected` lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectInfo {
    pub reason: String,
    /// WebSocket close code, if the peer sent one.
    pub code: Option<u16>,
    /// Whether a reconnect has been scheduled.
    pub will_reconnect: bool,
}

/// Origin of an `error` lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The stream could not be opened.
    Transport,
    /// An inbound frame was malformed and dropped.
    Protocol,
    /// No pong arrived in time; the stream is being torn down.
    Heartbeat,
    /// The server sent an `error` frame.
    Server,
    /// The reconnect attempt ceiling was reached.
    ReconnectExhausted,
}

/// Payload of the `error` lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// No further automatic recovery will happen until `connect()` is called.
    pub terminal: bool,
}

impl ErrorInfo {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            terminal: false,
        }
    }

    pub(crate) fn terminal(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            terminal: true,
        }
    }
}

/// Everything delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected(ConnectedInfo),
    Disconnected(DisconnectInfo),
    Error(ErrorInfo),
    /// Server `connected` acknowledgement with its session metadata.
    Session(SessionInfo),
    /// Application frame, keyed by its own kind.
    Message(Envelope),
}

impl Event {
    /// Returns the kind listeners subscribe to for this event.
    pub fn kind(&self) -> &str {
        match self {
            Event::Connected(_) => KIND_CONNECTED,
            Event::Disconnected(_) => KIND_DISCONNECTED,
            Event::Error(_) => KIND_ERROR,
            Event::Session(_) => KIND_SESSION,
            Event::Message(env) => &env.kind,
        }
    }
}

/// Read-only diagnostics returned by [`Client::stats`](crate::Client::stats).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub state: ConnectionState,
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Successful connections after the first one.
    pub reconnects: u64,
    /// Current value of the reconnect attempt counter.
    pub reconnect_attempts: u32,
    pub queue_depth: usize,
    pub dropped_messages: u64,
    pub protocol_errors: u64,
    pub last_heartbeat_rtt_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kinds() {
        let connected = Event::Connected(ConnectedInfo { reconnected: false });
        assert_eq!(connected.kind(), "connected");

        let err = Event::Error(ErrorInfo::new(ErrorKind::Protocol, "bad frame"));
        assert_eq!(err.kind(), "error");

        let msg = Event::Message(Envelope::new("message", serde_json::json!({})));
        assert_eq!(msg.kind(), "message");

        assert_eq!(Event::Session(SessionInfo::default()).kind(), "session");
    }

    #[test]
    fn terminal_error_info() {
        let info = ErrorInfo::terminal(ErrorKind::ReconnectExhausted, "gave up");
        assert!(info.terminal);
        assert!(!ErrorInfo::new(ErrorKind::Transport, "refused").terminal);
    }

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_ne!(ConnectionState::Connected, ConnectionState::Disconnected);
    }
}
