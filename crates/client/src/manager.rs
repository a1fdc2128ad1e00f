//! Connection manager: the single owner of connection state.
//!
//! Runs as one task per client. Host commands and internal signals (stream
//! opened, inbound frame, stream closed, timer expiry) are handled one at a
//! time to completion, so no two handlers for the same client ever overlap.
//! Every signal carries the epoch it belongs to; anything from an older
//! epoch is discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use livewire_protocol::constants::CLOSE_NORMAL;
use livewire_protocol::{AuthFrame, Envelope, Frame, Probe, is_normal_closure, is_reserved_kind};

use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ClientError;
use crate::heartbeat::HeartbeatMonitor;
use crate::pumps::read::read_pump;
use crate::pumps::write::{FrameSink, FrameWriter};
use crate::queue::OutboundQueue;
use crate::reconnection::{ReconnectPolicy, TimerSlot};
use crate::transport::{Connector, Transport};
use crate::types::{
    ClientStats, ConnectedInfo, ConnectionState, DisconnectInfo, ErrorInfo, ErrorKind, Event,
};

/// Requests from the host-facing [`Client`](crate::Client).
pub(crate) enum Command {
    Connect,
    Disconnect {
        done: oneshot::Sender<()>,
    },
    Publish {
        message: Envelope,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Stats {
        reply: oneshot::Sender<ClientStats>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Work produced by spawned tasks (connect attempts, read pump, timers).
pub(crate) enum Signal {
    Opened { epoch: u64, transport: Transport },
    OpenFailed { epoch: u64, error: String },
    Inbound { epoch: u64, text: String },
    Closed {
        epoch: u64,
        code: Option<u16>,
        reason: String,
    },
    ReconnectDue { epoch: u64 },
    HeartbeatTick { epoch: u64 },
    HeartbeatTimeout { epoch: u64, probe_id: String },
}

/// An open stream: the writer plus the read pump feeding the manager.
struct Link {
    writer: FrameWriter,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

impl Link {
    async fn close(mut self, code: u16, reason: &str) {
        self.cancel.cancel();
        self.writer.close(code, reason).await;
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.reader.abort();
    }
}

pub(crate) struct ConnectionManager {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    /// Bumped whenever a connection attempt starts or a connection ends.
    epoch: u64,
    /// Failed attempts and unexpected closures since the last success.
    attempts: u32,
    /// Cleared by `disconnect()`, restored by an explicit `connect()`.
    auto_reconnect: bool,
    /// Set once the attempt ceiling is hit; only an explicit `connect()` clears it.
    exhausted: bool,
    link: Option<Link>,
    pending_open: Option<JoinHandle<()>>,
    reconnect_timer: TimerSlot,
    heartbeat: HeartbeatMonitor,
    queue: OutboundQueue,
    backoff: ReconnectPolicy,
    frames_sent: Arc<AtomicU64>,
    frames_received: u64,
    connections: u64,
    protocol_errors: u64,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<Dispatcher>,
        signals_tx: mpsc::UnboundedSender<Signal>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            auto_reconnect: config.auto_reconnect,
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval, config.heartbeat_timeout),
            queue: OutboundQueue::new(config.outbound_queue_capacity),
            backoff: ReconnectPolicy::new(config.reconnect_base_delay),
            config,
            connector,
            dispatcher,
            signals_tx,
            state_tx,
            state: ConnectionState::Disconnected,
            epoch: 0,
            attempts: 0,
            exhausted: false,
            link: None,
            pending_open: None,
            reconnect_timer: TimerSlot::default(),
            frames_sent: Arc::new(AtomicU64::new(0)),
            frames_received: 0,
            connections: 0,
            protocol_errors: 0,
        }
    }

    /// Event loop. Ends on `Shutdown` or once every client handle is dropped.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => {
                        debug!("all client handles dropped");
                        self.teardown().await;
                        break;
                    }
                },
                Some(signal) = signals.recv() => self.handle_signal(signal).await,
            }
        }
        info!("connection manager stopped");
    }

    /// Returns `false` once the manager should stop.
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Connect => self.connect(),
            Command::Disconnect { done } => {
                self.disconnect().await;
                let _ = done.send(());
            }
            Command::Publish { message, reply } => {
                let result = self.publish(message).await;
                let _ = reply.send(result);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown { done } => {
                self.teardown().await;
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    async fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Opened { epoch, transport } => self.on_opened(epoch, transport).await,
            Signal::OpenFailed { epoch, error } => self.on_open_failed(epoch, error),
            Signal::Inbound { epoch, text } => self.on_inbound(epoch, &text).await,
            Signal::Closed {
                epoch,
                code,
                reason,
            } => {
                if epoch == self.epoch {
                    self.on_closed(code, reason);
                } else {
                    trace!(epoch, current = self.epoch, "ignoring close from stale stream");
                }
            }
            Signal::ReconnectDue { epoch } => self.on_reconnect_due(epoch),
            Signal::HeartbeatTick { epoch } => self.on_heartbeat_tick(epoch).await,
            Signal::HeartbeatTimeout { epoch, probe_id } => {
                self.on_heartbeat_timeout(epoch, &probe_id)
            }
        }
    }

    // ------------------------------------------------------------------
    // Host operations
    // ------------------------------------------------------------------

    /// Explicit connect. No-op while connected or connecting; otherwise
    /// starts a fresh cycle with a zeroed attempt counter.
    fn connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!(state = %self.state, "connect ignored");
            return;
        }
        self.auto_reconnect = self.config.auto_reconnect;
        self.exhausted = false;
        self.attempts = 0;
        self.reconnect_timer.cancel();
        self.begin_attempt();
    }

    /// Intentional shutdown of the stream. Never schedules a reconnect.
    async fn disconnect(&mut self) {
        self.auto_reconnect = false;
        self.reconnect_timer.cancel();
        if let Some(handle) = self.pending_open.take() {
            handle.abort();
        }
        self.heartbeat.stop();
        self.epoch += 1;

        let was = self.state;
        if let Some(link) = self.link.take() {
            link.close(CLOSE_NORMAL, "client disconnect").await;
        }
        self.set_state(ConnectionState::Disconnected);

        if was != ConnectionState::Disconnected {
            info!(epoch = self.epoch, "disconnected by client");
            self.dispatcher.dispatch(&Event::Disconnected(DisconnectInfo {
                reason: "client disconnect".into(),
                code: Some(CLOSE_NORMAL),
                will_reconnect: false,
            }));
        }
    }

    async fn publish(&mut self, message: Envelope) -> Result<(), ClientError> {
        if is_reserved_kind(&message.kind) {
            return Err(ClientError::ReservedKind(message.kind));
        }

        if self.state == ConnectionState::Connected {
            match self.write(&Frame::Application(message.clone())).await {
                Ok(()) => return Ok(()),
                // The stream just died; fall through to the disconnected path.
                Err(e) => self.on_write_failure(e),
            }
        }

        if !self.auto_reconnect {
            return Err(ClientError::ConnectionUnavailable);
        }

        if let Some(evicted) = self.queue.enqueue(message) {
            warn!(
                kind = %evicted.kind,
                capacity = self.config.outbound_queue_capacity,
                "outbound queue full, dropped oldest message"
            );
        }
        trace!(depth = self.queue.len(), "message queued");

        if self.state == ConnectionState::Disconnected
            && !self.reconnect_timer.is_armed()
            && !self.exhausted
        {
            self.begin_attempt();
        }
        Ok(())
    }

    fn stats(&self) -> ClientStats {
        ClientStats {
            state: self.state,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received,
            reconnects: self.connections.saturating_sub(1),
            reconnect_attempts: self.attempts,
            queue_depth: self.queue.len(),
            dropped_messages: self.queue.dropped(),
            protocol_errors: self.protocol_errors,
            last_heartbeat_rtt_ms: self.heartbeat.last_rtt().map(|d| d.as_millis() as u64),
        }
    }

    /// Disconnects and discards everything this instance holds.
    async fn teardown(&mut self) {
        self.disconnect().await;
        let dropped = self.queue.len();
        self.queue.clear();
        self.dispatcher.clear();
        if dropped > 0 {
            warn!(dropped, "discarded queued messages on shutdown");
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    fn begin_attempt(&mut self) {
        self.epoch += 1;
        let epoch = self.epoch;
        self.set_state(ConnectionState::Connecting);
        if let Some(handle) = self.pending_open.take() {
            handle.abort();
        }

        info!(
            endpoint = %self.config.endpoint,
            epoch,
            attempt = self.attempts + 1,
            "opening stream"
        );

        let connector = self.connector.clone();
        let endpoint = self.config.endpoint.clone();
        let connect_timeout = self.config.connect_timeout;
        let signals = self.signals_tx.clone();
        self.pending_open = Some(tokio::spawn(async move {
            let signal =
                match tokio::time::timeout(connect_timeout, connector.connect(&endpoint)).await {
                    Ok(Ok(transport)) => Signal::Opened { epoch, transport },
                    Ok(Err(e)) => Signal::OpenFailed {
                        epoch,
                        error: e.to_string(),
                    },
                    Err(_) => Signal::OpenFailed {
                        epoch,
                        error: ClientError::ConnectTimeout.to_string(),
                    },
                };
            let _ = signals.send(signal);
        }));
    }

    async fn on_opened(&mut self, epoch: u64, transport: Transport) {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            debug!(epoch, current = self.epoch, "discarding stream from stale attempt");
            return;
        }
        self.pending_open = None;

        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_pump(
            transport.stream,
            epoch,
            self.signals_tx.clone(),
            cancel.clone(),
        ));
        self.link = Some(Link {
            writer: FrameWriter::new(
                transport.sink,
                self.config.write_timeout,
                self.frames_sent.clone(),
            ),
            cancel,
            reader,
        });

        let reconnected = self.connections > 0;
        self.connections += 1;
        self.attempts = 0;
        self.exhausted = false;
        self.set_state(ConnectionState::Connected);
        info!(epoch, reconnected, "stream connected");

        let auth = Frame::Auth(AuthFrame {
            credential: self.config.credential.clone(),
            device_id: self.config.device_id.clone(),
        });
        if let Err(e) = self.write(&auth).await {
            self.on_write_failure(e);
            return;
        }

        self.heartbeat.start(epoch, &self.signals_tx);

        // Queued messages go out before any publish handled after this point.
        let flushed = match self.link.as_mut() {
            Some(link) => self.queue.flush(&mut link.writer).await,
            None => return,
        };
        if let Err(e) = flushed {
            self.on_write_failure(e);
            return;
        }

        self.dispatcher
            .dispatch(&Event::Connected(ConnectedInfo { reconnected }));
    }

    fn on_open_failed(&mut self, epoch: u64, error: String) {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            trace!(epoch, "ignoring failure of stale attempt");
            return;
        }
        self.pending_open = None;
        self.epoch += 1;
        self.set_state(ConnectionState::Disconnected);
        self.attempts = self.attempts.saturating_add(1);
        warn!(attempt = self.attempts, error = %error, "failed to open stream");

        self.dispatcher
            .dispatch(&Event::Error(ErrorInfo::new(ErrorKind::Transport, error)));
        if self.auto_reconnect {
            self.schedule_reconnect();
        }
    }

    /// Unexpected loss of the stream: peer close, read error, write failure
    /// or heartbeat timeout.
    fn on_closed(&mut self, code: Option<u16>, reason: String) {
        if self.link.is_none() && self.state != ConnectionState::Connected {
            return;
        }
        self.link = None;
        self.heartbeat.stop();
        self.epoch += 1;
        self.set_state(ConnectionState::Disconnected);

        let normal = code.is_some_and(is_normal_closure);
        if !normal {
            self.attempts = self.attempts.saturating_add(1);
        }
        let retry = self.auto_reconnect && !normal;
        let will_reconnect = retry && self.attempts < self.config.max_reconnect_attempts;
        warn!(?code, reason = %reason, will_reconnect, "stream closed");

        self.dispatcher.dispatch(&Event::Disconnected(DisconnectInfo {
            reason,
            code,
            will_reconnect,
        }));
        if retry {
            self.schedule_reconnect();
        }
    }

    fn on_write_failure(&mut self, error: ClientError) {
        warn!(error = %error, "write failed, treating stream as dead");
        self.on_closed(None, format!("write failed: {error}"));
    }

    /// Arms the reconnect timer for the failure just counted, or gives up
    /// once the ceiling is reached.
    fn schedule_reconnect(&mut self) {
        if self.attempts >= self.config.max_reconnect_attempts {
            self.exhausted = true;
            warn!(attempts = self.attempts, "reconnect attempts exhausted");
            self.dispatcher.dispatch(&Event::Error(ErrorInfo::terminal(
                ErrorKind::ReconnectExhausted,
                format!(
                    "gave up after {} failed attempts; call connect() to retry",
                    self.attempts
                ),
            )));
            return;
        }

        let delay = self.backoff.delay_for_attempt(self.attempts);
        info!(
            attempt = self.attempts,
            delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
            "reconnect scheduled"
        );
        self.reconnect_timer.arm_once(
            delay,
            &self.signals_tx,
            Signal::ReconnectDue { epoch: self.epoch },
        );
    }

    fn on_reconnect_due(&mut self, epoch: u64) {
        // The timer has fired; release the slot before deciding anything.
        self.reconnect_timer.cancel();
        if epoch != self.epoch || self.state != ConnectionState::Disconnected {
            trace!(epoch, "ignoring stale reconnect timer");
            return;
        }
        self.begin_attempt();
    }

    // ------------------------------------------------------------------
    // Inbound frames and heartbeat
    // ------------------------------------------------------------------

    async fn on_inbound(&mut self, epoch: u64, text: &str) {
        if epoch != self.epoch || self.link.is_none() {
            trace!(epoch, "dropping frame from stale stream");
            return;
        }
        self.frames_received += 1;

        let frame = match Frame::decode(text, self.config.max_frame_size) {
            Ok(frame) => frame,
            Err(e) => {
                self.protocol_error(format!("dropped malformed frame: {e}"));
                return;
            }
        };
        trace!(kind = frame.kind(), "received frame");

        match frame {
            Frame::Ping(probe) => {
                let pong = Frame::Pong(Probe {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                    probe_id: probe.probe_id,
                    device_id: self.config.device_id.clone(),
                });
                if let Err(e) = self.write(&pong).await {
                    self.on_write_failure(e);
                }
            }
            Frame::Pong(probe) => {
                if !self.heartbeat.acknowledge(&probe.probe_id) {
                    debug!(probe_id = %probe.probe_id, "ignoring unmatched pong");
                }
            }
            Frame::Connected(session) => {
                debug!(fields = session.metadata.len(), "server acknowledged session");
                self.dispatcher.dispatch(&Event::Session(session));
            }
            Frame::Error(err) => {
                warn!(message = %err.message, "server reported error");
                self.dispatcher
                    .dispatch(&Event::Error(ErrorInfo::new(ErrorKind::Server, err.message)));
            }
            Frame::Auth(_) => self.protocol_error("unexpected auth frame from server".into()),
            Frame::Application(envelope) => {
                self.dispatcher.dispatch(&Event::Message(envelope));
            }
        }
    }

    fn protocol_error(&mut self, message: String) {
        self.protocol_errors += 1;
        warn!(message = %message, "protocol error");
        self.dispatcher
            .dispatch(&Event::Error(ErrorInfo::new(ErrorKind::Protocol, message)));
    }

    async fn on_heartbeat_tick(&mut self, epoch: u64) {
        if epoch != self.epoch || self.state != ConnectionState::Connected {
            return;
        }
        let Some(probe_id) = self.heartbeat.begin_probe() else {
            return;
        };
        let ping = Frame::Ping(Probe {
            timestamp: chrono::Utc::now().timestamp_millis(),
            probe_id,
            device_id: self.config.device_id.clone(),
        });
        if let Err(e) = self.write(&ping).await {
            self.on_write_failure(e);
            return;
        }
        self.heartbeat.arm_timeout(epoch, &self.signals_tx);
    }

    fn on_heartbeat_timeout(&mut self, epoch: u64, probe_id: &str) {
        if epoch != self.epoch || !self.heartbeat.is_awaiting(probe_id) {
            trace!(epoch, probe_id, "ignoring stale heartbeat timeout");
            return;
        }
        let timeout = self.config.heartbeat_timeout;
        warn!(
            probe_id,
            timeout_ms = timeout.as_millis() as u64,
            "heartbeat timed out, forcing reconnect"
        );
        self.dispatcher.dispatch(&Event::Error(ErrorInfo::new(
            ErrorKind::Heartbeat,
            format!("no pong within {}ms", timeout.as_millis()),
        )));
        self.on_closed(None, "heartbeat timeout".into());
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn write(&mut self, frame: &Frame) -> Result<(), ClientError> {
        match self.link.as_mut() {
            Some(link) => link.writer.write_frame(frame).await,
            None => Err(ClientError::ConnectionUnavailable),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            trace!(from = %self.state, to = %state, "state transition");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }
}
