use serde::{Deserialize, Serialize};

use crate::message::MessageKind;

/// WebSocket sub-protocol negotiated through the `Sec-WebSocket-Protocol`
/// header. Selected once at construction time and carried through the
/// transport, so the wire kinds of an operation never depend on re-inspecting
/// a header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subprotocol {
    /// The legacy `graphql-ws` protocol (subscriptions-transport-ws).
    #[serde(rename = "graphql-ws")]
    GraphqlWs,
    /// The newer `graphql-transport-ws` protocol.
    #[default]
    #[serde(rename = "graphql-transport-ws")]
    GraphqlTransportWs,
}

impl Subprotocol {
    /// Value carried by the `Sec-WebSocket-Protocol` request header.
    pub fn header_value(&self) -> &'static str {
        match self {
            Subprotocol::GraphqlWs => "graphql-ws",
            Subprotocol::GraphqlTransportWs => "graphql-transport-ws",
        }
    }

    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim() {
            "graphql-ws" => Some(Subprotocol::GraphqlWs),
            "graphql-transport-ws" => Some(Subprotocol::GraphqlTransportWs),
            _ => None,
        }
    }

    /// Kind used to start an operation.
    pub fn start_kind(&self) -> MessageKind {
        match self {
            Subprotocol::GraphqlWs => MessageKind::Start,
            Subprotocol::GraphqlTransportWs => MessageKind::Subscribe,
        }
    }

    /// Kind used to stop an operation.
    pub fn stop_kind(&self) -> MessageKind {
        match self {
            Subprotocol::GraphqlWs => MessageKind::Stop,
            Subprotocol::GraphqlTransportWs => MessageKind::Complete,
        }
    }
}

impl std::fmt::Display for Subprotocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.header_value())
    }
}
