//! Read pump: forwards inbound frames to the manager.

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::manager::Signal;

/// Reads the stream until it ends, forwarding every text frame tagged with
/// `epoch`. Decoding happens on the manager so protocol errors surface on
/// the same loop as everything else.
///
/// Always finishes with a [`Signal::Closed`] unless cancelled.
pub(crate) async fn read_pump<S>(
    mut read: S,
    epoch: u64,
    signals: mpsc::UnboundedSender<Signal>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let (code, reason) = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if signals
                            .send(Signal::Inbound { epoch, text: text.as_str().to_owned() })
                            .is_err()
                        {
                            return;
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        debug!(epoch, frame = ?frame, "received close frame");
                        break match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                            None => (None, "closed by peer".to_string()),
                        };
                    }
                    Some(Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_))) => {
                        trace!(epoch, "transport-level ping/pong");
                    }
                    Some(Ok(_)) => {
                        trace!(epoch, "ignoring non-text frame");
                    }
                    Some(Err(e)) => {
                        warn!(epoch, "WebSocket read error: {e}");
                        break (None, format!("read error: {e}"));
                    }
                    None => {
                        debug!(epoch, "WebSocket stream ended");
                        break (None, "stream ended".to_string());
                    }
                }
            }
        }
    };

    let _ = signals.send(Signal::Closed {
        epoch,
        code,
        reason,
    });
}
