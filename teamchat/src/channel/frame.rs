//! Engine.IO v4 / Socket.IO v5 text frames.
//!
//! Only the default namespace and text frames are supported, which is all the
//! agent backend uses:
//!
//! - `0{...}` open, `1` close, `2` ping, `3` pong, `6` noop
//! - `40{...}` namespace connect, `41` namespace disconnect
//! - `42["event", data]` event, `44{...}` connect error

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

/// Handshake details sent by the server in the open packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

impl OpenInfo {
    /// How long the server may stay silent before the transport is
    /// considered dead. `None` when the server announced no ping schedule.
    pub fn liveness_window(&self) -> Option<Duration> {
        let total = self.ping_interval.saturating_add(self.ping_timeout);
        (total > 0).then(|| Duration::from_millis(total))
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Noop,
    /// Namespace connect (client request or server acknowledgement).
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Option<Value> },
    ConnectError(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown packet type '{0}'")]
    UnknownType(char),
    #[error("frame for namespace '{0}' is not supported")]
    Namespace(String),
    #[error("malformed payload: {0}")]
    Payload(String),
}

impl Packet {
    /// Build an event frame.
    pub fn event(name: impl Into<String>, data: Option<Value>) -> Self {
        Self::Event {
            name: name.into(),
            data,
        }
    }

    /// Encode into a text frame.
    pub fn encode(&self) -> String {
        match self {
            Self::Open(_) => "0".to_string(),
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Noop => "6".to_string(),
            Self::Connect(None) => "40".to_string(),
            Self::Connect(Some(auth)) => format!("40{auth}"),
            Self::Disconnect => "41".to_string(),
            Self::Event { name, data } => {
                let mut args = vec![Value::String(name.clone())];
                args.extend(data.iter().cloned());
                format!("42{}", Value::Array(args))
            }
            Self::ConnectError(err) => format!("44{err}"),
        }
    }

    /// Decode a text frame.
    pub fn decode(frame: &str) -> Result<Self, FrameError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(FrameError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => {
                let info = if rest.is_empty() {
                    OpenInfo::default()
                } else {
                    serde_json::from_str(rest).map_err(|e| FrameError::Payload(e.to_string()))?
                };
                Ok(Self::Open(info))
            }
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '6' => Ok(Self::Noop),
            '4' => decode_socket_packet(rest),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

fn decode_socket_packet(body: &str) -> Result<Packet, FrameError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let mut rest = chars.as_str();

    if rest.starts_with('/') {
        let (namespace, tail) = rest.split_once(',').unwrap_or((rest, ""));
        if namespace != "/" {
            return Err(FrameError::Namespace(namespace.to_string()));
        }
        rest = tail;
    }

    // Acknowledgement ids are not used; skip them.
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    let payload = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(rest).map_err(|e| FrameError::Payload(e.to_string()))?)
    };

    match kind {
        '0' => Ok(Packet::Connect(payload)),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let Some(Value::Array(mut args)) = payload else {
                return Err(FrameError::Payload("event without argument array".to_string()));
            };
            if args.is_empty() {
                return Err(FrameError::Payload("event without a name".to_string()));
            }
            let Value::String(name) = args.remove(0) else {
                return Err(FrameError::Payload("event name is not a string".to_string()));
            };
            Ok(Packet::Event {
                name,
                data: args.into_iter().next(),
            })
        }
        '4' => Ok(Packet::ConnectError(payload.unwrap_or(Value::Null))),
        other => Err(FrameError::UnknownType(other)),
    }
}
