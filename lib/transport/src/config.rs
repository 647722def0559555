use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Configuration for [`WebSocketTransport`](crate::transport::WebSocketTransport).
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct WebSocketTransportConfig {
    /// Name of the client, sent to the server as the `graphql-client-name`
    /// header on every (re)connection.
    #[serde(default)]
    pub client_name: Option<String>,
    /// Version of the client, sent as the `graphql-client-version` header.
    #[serde(default)]
    pub client_version: Option<String>,
    /// Whether a dropped connection schedules an automatic reconnection attempt.
    /// Default: true
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,
    /// Delay before a reconnection attempt.
    /// Default: 500ms
    #[serde(
        default = "default_reconnection_interval",
        deserialize_with = "humantime_serde::deserialize",
        serialize_with = "humantime_serde::serialize"
    )]
    pub reconnection_interval: Duration,
    /// Whether subscription replay after a reconnect may re-send a subscribe
    /// message that is still sitting in the outbound queue, at the cost of a
    /// duplicate server-side subscribe.
    /// Default: true
    #[serde(default = "default_allow_sending_duplicates")]
    pub allow_sending_duplicates: bool,
    /// Whether the transport connects immediately on initialization.
    /// Default: true
    #[serde(default = "default_connect_on_init")]
    pub connect_on_init: bool,
    /// Payload attached to the `connection_init` handshake message.
    /// Default: an empty object
    #[serde(default = "default_connecting_payload")]
    pub connecting_payload: Option<Value>,
}

impl Default for WebSocketTransportConfig {
    fn default() -> Self {
        Self {
            client_name: None,
            client_version: None,
            reconnect: default_reconnect(),
            reconnection_interval: default_reconnection_interval(),
            allow_sending_duplicates: default_allow_sending_duplicates(),
            connect_on_init: default_connect_on_init(),
            connecting_payload: default_connecting_payload(),
        }
    }
}

fn default_reconnect() -> bool {
    true
}

fn default_reconnection_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_allow_sending_duplicates() -> bool {
    true
}

fn default_connect_on_init() -> bool {
    true
}

fn default_connecting_payload() -> Option<Value> {
    Some(Value::Object(serde_json::Map::new()))
}
