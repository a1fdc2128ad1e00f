use std::time::Duration;

/// Close code for an orderly shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code sent when an endpoint is going away (server restart, page unload).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Maximum encoded frame size in bytes (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// How often a liveness probe is sent while connected.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// How long to wait for the matching pong before the stream is considered dead.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// Base delay for the first reconnect attempt.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the exponential part of the reconnect delay.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Upper bound (exclusive) of the random jitter added to each reconnect delay.
pub const RECONNECT_MAX_JITTER: Duration = Duration::from_secs(1);

/// Failed attempts tolerated before reconnection gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Messages buffered while disconnected.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 100;

/// Time allowed for the stream to open.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed to write a single frame.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Frame kind: client identifies itself after the stream opens.
pub const KIND_AUTH: &str = "auth";
/// Frame kind: liveness probe.
pub const KIND_PING: &str = "ping";
/// Frame kind: liveness acknowledgement.
pub const KIND_PONG: &str = "pong";
/// Frame kind: server session acknowledgement. Also the client's own
/// lifecycle event raised when the stream is up.
pub const KIND_CONNECTED: &str = "connected";
/// Frame kind: server-reported error. Also the client's error lifecycle event.
pub const KIND_ERROR: &str = "error";
/// Lifecycle event raised when the stream goes down.
pub const KIND_DISCONNECTED: &str = "disconnected";
/// Event kind carrying the server session acknowledgement to listeners.
pub const KIND_SESSION: &str = "session";

const RESERVED_KINDS: [&str; 7] = [
    KIND_AUTH,
    KIND_PING,
    KIND_PONG,
    KIND_CONNECTED,
    KIND_ERROR,
    KIND_DISCONNECTED,
    KIND_SESSION,
];

/// Returns `true` if `kind` belongs to the protocol or the client lifecycle
/// and cannot carry application payloads.
pub fn is_reserved_kind(kind: &str) -> bool {
    RESERVED_KINDS.contains(&kind)
}

/// Returns `true` for close codes that signal an intentional shutdown by the
/// peer. These never trigger a reconnect.
pub fn is_normal_closure(code: u16) -> bool {
    matches!(code, CLOSE_NORMAL | CLOSE_GOING_AWAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_kinds() {
        assert!(is_reserved_kind("ping"));
        assert!(is_reserved_kind("session"));
        assert!(is_reserved_kind("disconnected"));
        assert!(!is_reserved_kind("message"));
        assert!(!is_reserved_kind("Ping"));
    }

    #[test]
    fn normal_closure_class() {
        assert!(is_normal_closure(1000));
        assert!(is_normal_closure(1001));
        assert!(!is_normal_closure(1006));
        assert!(!is_normal_closure(4000));
    }

    #[test]
    fn heartbeat_defaults_are_consistent() {
        assert!(HEARTBEAT_TIMEOUT < HEARTBEAT_INTERVAL);
        assert!(RECONNECT_BASE_DELAY < RECONNECT_MAX_DELAY);
    }
}
