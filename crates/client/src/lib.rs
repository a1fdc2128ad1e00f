//! Resilient persistent-connection client.
//!
//! Keeps one WebSocket stream to a server alive: authenticates on open,
//! probes liveness with application-level heartbeats, reconnects with
//! exponential backoff, buffers outbound messages while offline and delivers
//! inbound frames and lifecycle changes to registered listeners.

mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
mod heartbeat;
pub mod identity;
mod manager;
mod pumps;
mod queue;
mod reconnection;
pub mod transport;
pub mod types;

pub use client::Client;
pub use config::ClientConfig;
pub use dispatcher::{DispatchReport, Dispatcher, Listener, listener};
pub use error::ClientError;
pub use identity::{DeviceIdentity, IdentityError, default_identity_path};
pub use transport::{ConnectFuture, Connector, Transport, TungsteniteConnector, WsSink, WsStream};
pub use types::{
    ClientStats, ConnectedInfo, ConnectionState, DisconnectInfo, ErrorInfo, ErrorKind, Event,
};

pub use livewire_protocol::{Envelope, SessionInfo};
