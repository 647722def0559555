//! Wire messages for GraphQL over WebSockets, covering both the legacy
//! `graphql-ws` protocol and the newer `graphql-transport-ws` protocol as per
//! the spec: https://github.com/enisdenjo/graphql-ws/blob/master/PROTOCOL.md

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::subprotocol::Subprotocol;

/// Every message kind that can appear in a `{id?, type, payload?}` frame,
/// across both sub-protocols. Client-to-server and server-to-client kinds
/// share one namespace because a client must also recognize echoes of its
/// own outbound kinds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    ConnectionInit,
    ConnectionTerminate,
    Start,
    Subscribe,
    Stop,
    Complete,
    Ping,
    Pong,
    Data,
    Next,
    Error,
    ConnectionAck,
    /// Legacy keep-alive, `"ka"` on the wire.
    #[serde(rename = "ka")]
    #[strum(serialize = "ka")]
    ConnectionKeepAlive,
    StartAck,
    ConnectionError,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FrameError {
    /// The frame parsed as JSON but its `type` is missing or unknown.
    /// Carries the raw text so the caller can surface the frame verbatim.
    #[error("unprocessed message: {0}")]
    Unprocessed(String),
    #[error("malformed message frame: {0}")]
    Malformed(String),
    #[error("failed to serialize message frame: {0}")]
    Serialize(String),
}

/// A single GraphQL over WebSocket frame.
///
/// Both sub-protocols share this envelope; only the set of valid kinds and
/// the payload shape differ between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl WireMessage {
    pub fn init(payload: Option<Value>) -> Self {
        Self {
            id: None,
            kind: MessageKind::ConnectionInit,
            payload,
        }
    }

    pub fn terminate() -> Self {
        Self {
            id: None,
            kind: MessageKind::ConnectionTerminate,
            payload: None,
        }
    }

    /// Message starting an operation, using the start kind of the given
    /// sub-protocol (`start` for the legacy protocol, `subscribe` otherwise).
    pub fn start(subprotocol: Subprotocol, id: String, payload: Value) -> Self {
        Self {
            id: Some(id),
            kind: subprotocol.start_kind(),
            payload: Some(payload),
        }
    }

    /// Message stopping an operation (`stop` legacy, `complete` otherwise).
    pub fn stop(subprotocol: Subprotocol, id: String) -> Self {
        Self {
            id: Some(id),
            kind: subprotocol.stop_kind(),
            payload: None,
        }
    }

    pub fn ping(payload: Option<Value>) -> Self {
        Self {
            id: None,
            kind: MessageKind::Ping,
            payload,
        }
    }

    pub fn pong(payload: Option<Value>) -> Self {
        Self {
            id: None,
            kind: MessageKind::Pong,
            payload,
        }
    }

    /// Serializes into a UTF-8 text frame.
    pub fn to_text(&self) -> Result<String, FrameError> {
        sonic_rs::to_string(self).map_err(|e| FrameError::Serialize(e.to_string()))
    }

    /// Parses an inbound text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let raw: RawFrame =
            sonic_rs::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;

        let kind = raw
            .kind
            .as_deref()
            .and_then(|kind| kind.parse::<MessageKind>().ok())
            .ok_or_else(|| FrameError::Unprocessed(text.to_string()))?;

        Ok(Self {
            id: raw.id,
            kind,
            payload: raw.payload,
        })
    }
}

/// Loosely-typed envelope used during parsing so an unknown `type` can be
/// reported together with the raw frame instead of as a serde error.
#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}
