use graphql_ws_protocol::message::FrameError;

/// Transport-level failures delivered to operation sinks and retained as the
/// sticky connection error. `Clone` because one failure can fan out to every
/// registered sink.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("received a message that could not be processed: {0}")]
    UnprocessedMessage(String),
    #[error("received a result frame carrying neither an error nor a payload")]
    NeitherErrorNorPayloadReceived,
    #[error("websocket network error: {0}")]
    NetworkError(String),
    #[error("failed to parse message frame: {0}")]
    ParseError(String),
    #[error("failed to serialize outgoing message: {0}")]
    SerializationFailure(String),
}

impl From<FrameError> for TransportError {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::Unprocessed(raw) => TransportError::UnprocessedMessage(raw),
            FrameError::Malformed(message) => TransportError::ParseError(message),
            FrameError::Serialize(message) => TransportError::SerializationFailure(message),
        }
    }
}
