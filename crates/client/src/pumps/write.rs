//! The single write path onto the stream.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::SinkExt;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, trace};

use livewire_protocol::Frame;

use crate::error::ClientError;
use crate::transport::WsSink;

/// Anything frames can be written to.
pub(crate) trait FrameSink {
    fn write_frame(&mut self, frame: &Frame)
    -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// Owns the sink half of the stream. Every outbound frame (auth, probes,
/// queued and live messages) goes through here, so writes never interleave.
pub(crate) struct FrameWriter {
    sink: WsSink,
    write_timeout: Duration,
    frames_sent: Arc<AtomicU64>,
}

impl FrameWriter {
    pub(crate) fn new(sink: WsSink, write_timeout: Duration, frames_sent: Arc<AtomicU64>) -> Self {
        Self {
            sink,
            write_timeout,
            frames_sent,
        }
    }

    /// Sends a close frame with `code` and closes the sink. Best effort.
    pub(crate) async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: code.into(),
            reason: reason.to_string().into(),
        };
        let write_timeout = self.write_timeout;
        let sink = &mut self.sink;
        let close = async move {
            sink.send(tungstenite::Message::Close(Some(frame))).await?;
            sink.close().await
        };
        match tokio::time::timeout(write_timeout, close).await {
            Ok(Ok(())) => debug!(code, "stream closed"),
            Ok(Err(e)) => debug!(code, error = %e, "close frame not delivered"),
            Err(_) => debug!(code, "close timed out"),
        }
    }
}

impl FrameSink for FrameWriter {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let text = frame.encode()?;
        trace!(kind = frame.kind(), bytes = text.len(), "writing frame");
        match tokio::time::timeout(
            self.write_timeout,
            self.sink.send(tungstenite::Message::Text(text.into())),
        )
        .await
        {
            Ok(Ok(())) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(Err(e)) => Err(ClientError::Ws(e)),
            Err(_) => Err(ClientError::WriteTimeout),
        }
    }
}
