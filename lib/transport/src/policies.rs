use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use graphql_ws_protocol::request::GraphQLRequest;

/// Shapes the JSON body of an outgoing operation.
pub trait RequestBodyCreator: Send + Sync {
    fn request_body(&self, request: &GraphQLRequest) -> Value;
}

const PERSISTED_QUERY_EXTENSION: &str = "persistedQuery";

/// Default body creator. Always sends the full query document; any
/// persisted-query extension is stripped, since the server never sees the
/// registration round-trip over this transport.
#[derive(Debug, Default)]
pub struct DefaultBodyCreator;

impl RequestBodyCreator for DefaultBodyCreator {
    fn request_body(&self, request: &GraphQLRequest) -> Value {
        let mut request = request.clone();
        if let Some(extensions) = request.extensions.as_mut() {
            extensions.remove(PERSISTED_QUERY_EXTENSION);
            if extensions.is_empty() {
                request.extensions = None;
            }
        }
        serde_json::to_value(&request).unwrap_or(Value::Null)
    }
}

/// Produces the unique id attached to each outbound operation.
pub trait OperationIdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Monotonically sequenced ids, starting at `"1"`.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationIdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> String {
        self.next.fetch_add(1, Ordering::SeqCst).to_string()
    }
}
