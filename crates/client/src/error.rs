use tokio_tungstenite::tungstenite;

use livewire_protocol::FrameError;

/// Errors from the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Publish while not connected with auto-reconnect disabled.
    #[error("connection unavailable")]
    ConnectionUnavailable,

    #[error("event kind `{0}` is reserved")]
    ReservedKind(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("write timed out")]
    WriteTimeout,

    #[error("client has shut down")]
    Shutdown,
}
