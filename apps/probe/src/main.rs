//! livewire probe: holds a connection open, logs every event and publishes
//! lines read from stdin.
//!
//! Usage: `livewire-probe [config.toml]`. Each stdin line is `<kind> [json]`;
//! a payload that is not valid JSON is sent as a string.

mod config;

use std::path::PathBuf;

use anyhow::Context;
use livewire_client::{Client, DeviceIdentity, Event, default_identity_path};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const LIFECYCLE_KINDS: [&str; 4] = ["connected", "disconnected", "error", "session"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(config::config_path);
    let mut probe_config = config::ProbeConfig::load(&path)?;

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&probe_config.log_filter)),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %path.display(),
        "starting livewire probe"
    );

    if probe_config.client.device_id.is_empty() {
        let identity_path = probe_config
            .identity_path
            .clone()
            .or_else(default_identity_path);
        match identity_path.map(|p| DeviceIdentity::load_or_create(&p)) {
            Some(Ok(identity)) => probe_config.client.device_id = identity.device_id,
            Some(Err(e)) => warn!(error = %e, "failed to load device identity"),
            None => warn!("no location for a device identity"),
        }
    }

    let client = Client::new(probe_config.client.clone())
        .with_context(|| format!("invalid [client] section in {}", path.display()))?;

    for kind in LIFECYCLE_KINDS
        .iter()
        .copied()
        .chain(probe_config.subscribe.iter().map(String::as_str))
    {
        client.on(kind, log_event);
    }

    client.connect().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => publish_line(&client, &line).await,
                None => break,
            },
        }
    }

    let stats = client.stats().await?;
    info!(stats = %serde_json::to_string(&stats)?, "final statistics");
    client.shutdown().await?;
    Ok(())
}

fn log_event(event: &Event) {
    match event {
        Event::Connected(info) => info!(reconnected = info.reconnected, "connected"),
        Event::Disconnected(info) => warn!(
            code = ?info.code,
            reason = %info.reason,
            will_reconnect = info.will_reconnect,
            "disconnected"
        ),
        Event::Error(info) if info.terminal => {
            error!(kind = ?info.kind, message = %info.message, "connection gave up")
        }
        Event::Error(info) => warn!(kind = ?info.kind, message = %info.message, "error"),
        Event::Session(session) => info!(
            session = %serde_json::Value::Object(session.metadata.clone()),
            "session established"
        ),
        Event::Message(envelope) => info!(
            kind = %envelope.kind,
            id = ?envelope.correlation_id,
            payload = %envelope.payload.clone().unwrap_or(serde_json::Value::Null),
            "message"
        ),
    }
}

async fn publish_line(client: &Client, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let (kind, payload) = parse_line(line);
    if let Err(e) = client.publish(kind, payload).await {
        warn!(kind, error = %e, "publish failed");
    }
}

fn parse_line(line: &str) -> (&str, Value) {
    match line.split_once(char::is_whitespace) {
        Some((kind, rest)) => {
            let rest = rest.trim();
            let payload =
                serde_json::from_str(rest).unwrap_or_else(|_| Value::String(rest.to_string()));
            (kind, payload)
        }
        None => (line, Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_kind_only() {
        assert_eq!(parse_line("status"), ("status", Value::Null));
    }

    #[test]
    fn parse_json_payload() {
        assert_eq!(
            parse_line(r#"chat {"text": "hi"}"#),
            ("chat", json!({"text": "hi"}))
        );
    }

    #[test]
    fn parse_plain_text_payload() {
        assert_eq!(
            parse_line("chat hello there"),
            ("chat", json!("hello there"))
        );
    }
}
