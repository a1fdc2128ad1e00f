//! Stream opening, behind a trait so the manager never touches sockets directly.

use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::debug;

use livewire_protocol::constants::MAX_FRAME_SIZE;

use crate::error::ClientError;

/// Outbound half of an open stream.
pub type WsSink = Pin<Box<dyn Sink<tungstenite::Message, Error = tungstenite::Error> + Send>>;

/// Inbound half of an open stream.
pub type WsStream =
    Pin<Box<dyn Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Send>>;

/// An open, split stream.
pub struct Transport {
    pub sink: WsSink,
    pub stream: WsStream,
}

/// Boxed future returned by [`Connector::connect`].
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<Transport, ClientError>> + Send + 'a>>;

/// Opens streams to an endpoint.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, endpoint: &'a str) -> ConnectFuture<'a>;
}

/// The socket accepts messages up to this multiple of the frame limit, so
/// moderately oversized frames reach the decoder and are reported as protocol
/// errors instead of failing the read.
const TRANSPORT_LIMIT_FACTOR: usize = 2;

/// Hard per-message cap for the socket given the protocol frame limit.
fn transport_limit(max_frame_size: usize) -> usize {
    max_frame_size.saturating_mul(TRANSPORT_LIMIT_FACTOR)
}

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    max_frame_size: usize,
}

impl TungsteniteConnector {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl Connector for TungsteniteConnector {
    fn connect<'a>(&'a self, endpoint: &'a str) -> ConnectFuture<'a> {
        Box::pin(async move {
            let limit = transport_limit(self.max_frame_size);
            let mut ws_config = WebSocketConfig::default();
            ws_config.max_message_size = Some(limit);
            ws_config.max_frame_size = Some(limit);
            let (ws_stream, response) =
                tokio_tungstenite::connect_async_with_config(endpoint, Some(ws_config), false)
                    .await?;
            debug!(endpoint, status = %response.status(), "stream opened");

            let (write, read) = ws_stream.split();
            Ok(Transport {
                sink: Box::pin(write),
                stream: Box::pin(read),
            })
        })
    }
}
