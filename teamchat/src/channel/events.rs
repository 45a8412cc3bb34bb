//! Normalization of inbound realtime events.
//!
//! The backend is loose about payload shapes: the agent may be named in
//! `agentName` or `agent`, and the body may be a string or an object with a
//! `content` field. Everything is folded into [`InboundMessage`] here so no
//! other code branches on wire shapes.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Agent name used when the payload does not carry a usable one.
pub const FALLBACK_AGENT: &str = "system";
/// Body used when the payload does not carry usable content.
pub const INVALID_MESSAGE: &str = "Invalid message format";

/// A normalized `agent_response` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Lowercased agent name, or [`FALLBACK_AGENT`].
    pub agent_name: String,
    /// Plain-text body, or [`INVALID_MESSAGE`].
    pub message: String,
    /// Event subtype reported by the backend (`message` when absent).
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    /// Session the backend addressed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl InboundMessage {
    /// Normalize an arbitrary JSON payload. Never fails.
    pub fn parse(value: &Value) -> Self {
        let agent_name = value
            .get("agentName")
            .and_then(Value::as_str)
            .or_else(|| value.get("agent").and_then(Value::as_str))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(|| FALLBACK_AGENT.to_string(), str::to_lowercase);

        let message = match value.get("message") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Object(body)) => body
                .get("content")
                .and_then(Value::as_str)
                .map_or_else(|| INVALID_MESSAGE.to_string(), String::from),
            _ => INVALID_MESSAGE.to_string(),
        };

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("message")
            .to_string();

        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(String::from);

        Self {
            agent_name,
            message,
            kind,
            timestamp,
            session_id,
        }
    }
}

/// Parse a timestamp from RFC 3339 or a naive ISO 8601 form (assumed UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Failures reported to error handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("server reported an error: {0}")]
    Server(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("message handling failed: {0}")]
    Handler(String),
}

impl ChannelError {
    /// Build a server error from an `error` event payload.
    pub fn from_payload(data: Option<&Value>) -> Self {
        let text = match data {
            Some(Value::String(s)) => s.clone(),
            Some(value) => value
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| value.to_string(), String::from),
            None => "unknown error".to_string(),
        };
        Self::Server(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_agent_name_and_lowercases() {
        let msg = InboundMessage::parse(&json!({"agentName": "Emma", "agent": "Bob", "message": "x"}));
        assert_eq!(msg.agent_name, "emma");
    }

    #[test]
    fn falls_back_to_agent_field() {
        let msg = InboundMessage::parse(&json!({"agent": "Bob", "message": "done"}));
        assert_eq!(msg.agent_name, "bob");
        assert_eq!(msg.message, "done");
        assert_eq!(msg.kind, "message");
    }

    #[test]
    fn non_string_agent_uses_sentinel() {
        let msg = InboundMessage::parse(&json!({"agentName": 42, "message": "x"}));
        assert_eq!(msg.agent_name, FALLBACK_AGENT);
    }

    #[test]
    fn structured_body_is_flattened() {
        let msg = InboundMessage::parse(
            &json!({"agent": "alex", "message": {"content": "code ready", "type": "code"}}),
        );
        assert_eq!(msg.message, "code ready");
    }

    #[test]
    fn malformed_body_uses_placeholder() {
        for payload in [
            json!({"message": null}),
            json!({"message": 3}),
            json!({"message": {"text": "wrong key"}}),
            json!(null),
        ] {
            let msg = InboundMessage::parse(&payload);
            assert_eq!(msg.message, INVALID_MESSAGE);
            assert_eq!(msg.agent_name, FALLBACK_AGENT);
        }
    }

    #[test]
    fn parses_backend_timestamps() {
        let msg = InboundMessage::parse(&json!({
            "message": "x",
            "timestamp": "2024-05-01T08:30:00.250000"
        }));
        assert_eq!(msg.timestamp.to_rfc3339(), "2024-05-01T08:30:00.250+00:00");
        assert!(parse_timestamp("2024-05-01T08:30:00Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn carries_session_id() {
        let msg = InboundMessage::parse(&json!({"message": "x", "sessionId": "s-9"}));
        assert_eq!(msg.session_id.as_deref(), Some("s-9"));
    }

    #[test]
    fn error_payloads() {
        assert_eq!(
            ChannelError::from_payload(Some(&json!({"message": "boom"}))),
            ChannelError::Server("boom".to_string())
        );
        assert_eq!(
            ChannelError::from_payload(Some(&json!("plain"))),
            ChannelError::Server("plain".to_string())
        );
    }
}
