//! Host-facing handle.

use std::sync::{Arc, OnceLock, Weak};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use livewire_protocol::Envelope;

use crate::config::ClientConfig;
use crate::dispatcher::{Dispatcher, Listener, listener};
use crate::error::ClientError;
use crate::manager::{Command, ConnectionManager};
use crate::transport::{Connector, TungsteniteConnector};
use crate::types::{ClientStats, ConnectionState, Event};

const COMMAND_BUFFER: usize = 64;

/// Cheap, cloneable handle to one connection.
///
/// All clones drive the same connection manager. When the last clone is
/// dropped the manager disconnects and stops.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::Sender<Command>,
    dispatcher: Arc<Dispatcher>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Client {
    /// Creates a client over real WebSockets. Does not connect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let connector = TungsteniteConnector::new(config.max_frame_size);
        Self::with_connector(config, connector)
    }

    /// Creates a client that opens streams through `connector`.
    pub fn with_connector<C: Connector>(
        mut config: ClientConfig,
        connector: C,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        if config.device_id.is_empty() {
            config.device_id = uuid::Uuid::new_v4().to_string();
            warn!(
                device_id = %config.device_id,
                "no device id configured, using an ephemeral one"
            );
        }
        info!(endpoint = %config.endpoint, device_id = %config.device_id, "client created");

        let dispatcher = Arc::new(Dispatcher::new());
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let manager = ConnectionManager::new(
            Arc::new(config),
            Arc::new(connector),
            dispatcher.clone(),
            signals_tx,
            state_tx,
        );
        tokio::spawn(manager.run(commands_rx, signals_rx));

        Ok(Self {
            commands: commands_tx,
            dispatcher,
            state_rx,
        })
    }

    /// Starts connecting. Returns once the request is accepted; progress is
    /// reported through `connected`, `disconnected` and `error` events.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.commands
            .send(Command::Connect)
            .await
            .map_err(|_| ClientError::Shutdown)
    }

    /// Closes the stream and disables automatic reconnection until the next
    /// [`connect`](Self::connect). Queued messages are kept.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(Command::Disconnect { done })
            .await
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }

    /// Sends `payload` under `kind`, or queues it while disconnected.
    pub async fn publish(&self, kind: impl Into<String>, payload: Value) -> Result<(), ClientError> {
        self.send(Envelope::new(kind, payload)).await
    }

    /// Like [`publish`](Self::publish) for a prebuilt envelope, e.g. one
    /// carrying a correlation id.
    pub async fn send(&self, message: Envelope) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Publish { message, reply })
            .await
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    pub fn subscribe(&self, kind: impl Into<String>, listener: Listener) {
        self.dispatcher.subscribe(kind, listener);
    }

    /// Registers a closure and returns the handle needed to unsubscribe it.
    pub fn on<F>(&self, kind: impl Into<String>, f: F) -> Listener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let handle = listener(f);
        self.dispatcher.subscribe(kind, handle.clone());
        handle
    }

    pub fn unsubscribe(&self, kind: &str, listener: &Listener) -> bool {
        self.dispatcher.unsubscribe(kind, listener)
    }

    /// Channel view of one event kind. The listener removes itself once the
    /// receiver is dropped; the returned handle can also unsubscribe it early.
    pub fn events(&self, kind: impl Into<String>) -> (Listener, mpsc::UnboundedReceiver<Event>) {
        let kind = kind.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::downgrade(&self.dispatcher);
        let this: Arc<OnceLock<Weak<dyn Fn(&Event) + Send + Sync>>> = Arc::new(OnceLock::new());

        let handle = listener({
            let kind = kind.clone();
            let this = this.clone();
            move |event| {
                if !tx.is_closed() && tx.send(event.clone()).is_ok() {
                    return;
                }
                let me = this.get().and_then(Weak::upgrade);
                if let (Some(dispatcher), Some(me)) = (dispatcher.upgrade(), me) {
                    debug!(kind = %kind, "event receiver dropped, removing listener");
                    dispatcher.unsubscribe(&kind, &me);
                }
            }
        });
        let _ = this.set(Arc::downgrade(&handle));
        self.dispatcher.subscribe(kind, handle.clone());
        (handle, rx)
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: &str) -> usize {
        self.dispatcher.listener_count(kind)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Waits until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<(), ClientError> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|s| *s == state)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Shutdown)
    }

    pub async fn stats(&self) -> Result<ClientStats, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .await
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }

    /// Disconnects, discards queued messages and listeners, and stops the
    /// manager. Other clones of this handle fail with
    /// [`ClientError::Shutdown`] afterwards.
    pub async fn shutdown(self) -> Result<(), ClientError> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { done })
            .await
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }
}
