use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{
    KIND_AUTH, KIND_CONNECTED, KIND_ERROR, KIND_PING, KIND_PONG, is_reserved_kind,
};

/// Errors from decoding or encoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no `type` field")]
    MissingType,

    #[error("frame too large ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },

    #[error("kind `{0}` is reserved and cannot carry application payloads")]
    ReservedKind(String),

    #[error("unexpected top-level fields next to `payload`: {0}")]
    UnexpectedFields(String),
}

/// Identity sent right after the stream opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFrame {
    pub credential: String,
    pub device_id: String,
}

/// Liveness probe or acknowledgement. A pong must echo the ping's `probe_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    /// Unix milliseconds at the sender.
    pub timestamp: i64,
    pub probe_id: String,
    pub device_id: String,
}

/// Session metadata from the server's `connected` acknowledgement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Error reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub message: String,
}

/// Application message: a kind, an opaque payload and an optional
/// correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, rename = "id", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Builds an envelope from a decoded application frame.
    ///
    /// A frame that carries its data at the top level instead of under
    /// `payload` has those fields collected into the payload. Extra fields
    /// next to an explicit `payload` are rejected rather than dropped.
    fn from_wire(value: Value) -> Result<Self, FrameError> {
        let Value::Object(mut map) = value else {
            return Err(FrameError::NotAnObject);
        };
        let mut known = Map::new();
        for key in ["type", "payload", "id"] {
            if let Some(v) = map.remove(key) {
                known.insert(key.to_string(), v);
            }
        }
        let mut envelope: Envelope = serde_json::from_value(Value::Object(known))?;

        if !map.is_empty() {
            if envelope.payload.is_some() {
                let fields: Vec<&str> = map.keys().map(String::as_str).collect();
                return Err(FrameError::UnexpectedFields(fields.join(", ")));
            }
            envelope.payload = Some(Value::Object(map));
        }
        Ok(envelope)
    }

    /// Creates an envelope with a payload and no correlation id.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload: Some(payload),
            correlation_id: None,
        }
    }

    /// Attaches a correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Deserializes the payload into the given type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
    ) -> Result<Option<T>, serde_json::Error> {
        match &self.payload {
            Some(v) => Ok(Some(T::deserialize(v)?)),
            None => Ok(None),
        }
    }
}

/// Every frame that can cross the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Auth(AuthFrame),
    Ping(Probe),
    Pong(Probe),
    Connected(SessionInfo),
    Error(ServerError),
    Application(Envelope),
}

impl Frame {
    /// Returns the wire discriminator of this frame.
    pub fn kind(&self) -> &str {
        match self {
            Frame::Auth(_) => KIND_AUTH,
            Frame::Ping(_) => KIND_PING,
            Frame::Pong(_) => KIND_PONG,
            Frame::Connected(_) => KIND_CONNECTED,
            Frame::Error(_) => KIND_ERROR,
            Frame::Application(env) => &env.kind,
        }
    }

    /// Parses a text frame, rejecting anything larger than `limit` bytes.
    pub fn decode(text: &str, limit: usize) -> Result<Self, FrameError> {
        if text.len() > limit {
            return Err(FrameError::TooLarge {
                size: text.len(),
                limit,
            });
        }

        let value: Value = serde_json::from_str(text)?;
        let kind = match &value {
            Value::Object(map) => match map.get("type") {
                Some(Value::String(kind)) => kind.clone(),
                _ => return Err(FrameError::MissingType),
            },
            _ => return Err(FrameError::NotAnObject),
        };

        let frame = match kind.as_str() {
            KIND_AUTH => Frame::Auth(serde_json::from_value(value)?),
            KIND_PING => Frame::Ping(serde_json::from_value(value)?),
            KIND_PONG => Frame::Pong(serde_json::from_value(value)?),
            KIND_CONNECTED => {
                let Value::Object(mut map) = value else {
                    return Err(FrameError::NotAnObject);
                };
                map.remove("type");
                Frame::Connected(SessionInfo { metadata: map })
            }
            KIND_ERROR => Frame::Error(serde_json::from_value(value)?),
            other if is_reserved_kind(other) => {
                return Err(FrameError::ReservedKind(other.to_string()));
            }
            _ => Frame::Application(Envelope::from_wire(value)?),
        };
        Ok(frame)
    }

    /// Serializes the frame to its JSON text form.
    pub fn encode(&self) -> Result<String, FrameError> {
        let body = match self {
            Frame::Auth(auth) => serde_json::to_value(auth)?,
            Frame::Ping(probe) | Frame::Pong(probe) => serde_json::to_value(probe)?,
            Frame::Connected(session) => serde_json::to_value(session)?,
            Frame::Error(err) => serde_json::to_value(err)?,
            Frame::Application(env) => {
                if is_reserved_kind(&env.kind) {
                    return Err(FrameError::ReservedKind(env.kind.clone()));
                }
                return Ok(serde_json::to_string(env)?);
            }
        };

        let Value::Object(mut map) = body else {
            return Err(FrameError::NotAnObject);
        };
        map.insert("type".into(), Value::String(self.kind().to_string()));
        Ok(serde_json::to_string(&Value::Object(map))?)
    }
}
