//! In-memory connector and server side for driving a client in tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{sink, stream};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message, protocol::CloseFrame};

use livewire_client::{
    ClientConfig, ClientError, ConnectFuture, Connector, Event, Transport,
};

/// What the next connection attempt does.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Accept,
    Refuse,
    /// Accepts after the given delay.
    Slow(Duration),
}

#[derive(Default)]
struct Shared {
    script: VecDeque<Step>,
    attempts: Vec<Instant>,
}

/// Connector whose attempts follow a script. Once the script runs out every
/// attempt is accepted.
pub struct MockConnector {
    shared: Arc<Mutex<Shared>>,
    accepted: mpsc::UnboundedSender<ServerSide>,
}

/// Test-side view of a [`MockConnector`].
pub struct MockServer {
    shared: Arc<Mutex<Shared>>,
    accepted: mpsc::UnboundedReceiver<ServerSide>,
}

pub fn mock(script: impl IntoIterator<Item = Step>) -> (MockConnector, MockServer) {
    let shared = Arc::new(Mutex::new(Shared {
        script: script.into_iter().collect(),
        attempts: Vec::new(),
    }));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockConnector {
            shared: shared.clone(),
            accepted: tx,
        },
        MockServer {
            shared,
            accepted: rx,
        },
    )
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, _endpoint: &'a str) -> ConnectFuture<'a> {
        Box::pin(async move {
            let step = {
                let mut shared = self.shared.lock().unwrap();
                shared.attempts.push(Instant::now());
                shared.script.pop_front().unwrap_or(Step::Accept)
            };
            if let Step::Slow(delay) = step {
                tokio::time::sleep(delay).await;
            }
            match step {
                Step::Refuse => Err(ClientError::Ws(tungstenite::Error::Io(
                    std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                ))),
                Step::Accept | Step::Slow(_) => {
                    let (client_tx, server_rx) = mpsc::unbounded_channel::<Message>();
                    let (server_tx, client_rx) =
                        mpsc::unbounded_channel::<Result<Message, tungstenite::Error>>();

                    let sink = sink::unfold(client_tx, |tx, msg: Message| async move {
                        tx.send(msg)
                            .map_err(|_| tungstenite::Error::ConnectionClosed)?;
                        Ok::<_, tungstenite::Error>(tx)
                    });
                    let stream = stream::unfold(client_rx, |mut rx| async move {
                        rx.recv().await.map(|item| (item, rx))
                    });

                    let _ = self.accepted.send(ServerSide {
                        inbound: server_rx,
                        outbound: Some(server_tx),
                    });
                    Ok(Transport {
                        sink: Box::pin(sink),
                        stream: Box::pin(stream),
                    })
                }
            }
        })
    }
}

impl MockServer {
    /// Waits for the client's next accepted connection.
    pub async fn accept(&mut self) -> ServerSide {
        tokio::time::timeout(Duration::from_secs(120), self.accepted.recv())
            .await
            .expect("no connection within timeout")
            .expect("connector dropped")
    }

    /// A connection the client has already been handed, if any.
    pub fn try_accept(&mut self) -> Option<ServerSide> {
        self.accepted.try_recv().ok()
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.shared.lock().unwrap().attempts.clone()
    }
}

/// The server end of one accepted stream.
pub struct ServerSide {
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: Option<mpsc::UnboundedSender<Result<Message, tungstenite::Error>>>,
}

impl ServerSide {
    /// Next text frame written by the client, parsed as JSON.
    pub async fn recv(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(120), self.inbound.recv())
                .await
                .expect("no frame within timeout")
                .expect("client closed the stream");
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).expect("client sent invalid JSON");
            }
        }
    }

    /// Next frame whose `type` is not heartbeat traffic.
    pub async fn recv_app(&mut self) -> Value {
        loop {
            let frame = self.recv().await;
            if frame["type"] != "ping" && frame["type"] != "pong" {
                return frame;
            }
        }
    }

    /// Consumes and checks the auth frame every stream starts with.
    pub async fn expect_auth(&mut self) -> Value {
        let auth = self.recv().await;
        assert_eq!(auth["type"], "auth", "first frame must be auth: {auth}");
        auth
    }

    pub fn try_recv_raw(&mut self) -> Option<Message> {
        self.inbound.try_recv().ok()
    }

    /// Waits for the client to drop its end of the stream and returns the
    /// close frame, if it sent one.
    pub async fn closed(&mut self) -> Option<CloseFrame> {
        let mut close = None;
        while let Some(msg) = self.inbound.recv().await {
            if let Message::Close(frame) = msg {
                close = frame;
            }
        }
        close
    }

    pub fn send(&self, frame: Value) {
        if let Some(tx) = &self.outbound {
            let _ = tx.send(Ok(Message::Text(frame.to_string().into())));
        }
    }

    pub fn send_raw(&self, text: &str) {
        if let Some(tx) = &self.outbound {
            let _ = tx.send(Ok(Message::Text(text.to_string().into())));
        }
    }

    pub fn pong(&self, probe_id: &str) {
        self.send(json!({
            "type": "pong",
            "timestamp": 0,
            "probe_id": probe_id,
            "device_id": "server",
        }));
    }

    pub fn close(&self, code: u16, reason: &str) {
        if let Some(tx) = &self.outbound {
            let _ = tx.send(Ok(Message::Close(Some(CloseFrame {
                code: code.into(),
                reason: reason.to_string().into(),
            }))));
        }
    }

    /// Ends the client's read stream without a close frame.
    pub fn drop_link(&mut self) {
        self.outbound = None;
    }
}

pub fn config(max_reconnect_attempts: u32) -> ClientConfig {
    let mut config = ClientConfig::new("ws://mock.test/socket", "secret-token", "device-1");
    config.max_reconnect_attempts = max_reconnect_attempts;
    config
}

/// Receives the next event, failing the test if none arrives in time.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("no event within timeout")
        .expect("event channel closed")
}
