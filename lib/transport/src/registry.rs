use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::TransportError;

/// Result delivered to a per-operation sink: a decoded payload or a failure.
pub type OperationResult = Result<Value, TransportError>;

/// Per-operation result sink. One-shot operations receive at most one result;
/// subscriptions receive unbounded many.
pub type OperationSink = mpsc::UnboundedSender<OperationResult>;

/// Maps operation ids to their result sinks, and retains the serialized
/// subscribe message of every live subscription for replay after a reconnect.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: HashMap<String, OperationSink>,
    subscriptions: HashMap<String, String>,
}

impl SubscriberRegistry {
    pub fn register(&mut self, id: String, sink: OperationSink, subscribe_message: Option<String>) {
        if let Some(message) = subscribe_message {
            self.subscriptions.insert(id.clone(), message);
        }
        self.subscribers.insert(id, sink);
    }

    /// Delivers a result to the sink registered for `id`. Missing ids are
    /// ignored: the subscriber may have already removed itself.
    pub fn dispatch(&self, id: &str, result: OperationResult) {
        if let Some(sink) = self.subscribers.get(id) {
            let _ = sink.send(result);
        } else {
            trace!(id = %id, "dropping result for unknown operation");
        }
    }

    /// Removes the subscriber for `id` unless it belongs to a subscription.
    /// The client decides when a subscription ends, so a server `complete`
    /// only finishes one-shot operations.
    pub fn complete_if_one_shot(&mut self, id: &str) {
        if !self.subscriptions.contains_key(id) {
            self.subscribers.remove(id);
        }
    }

    /// Removes both the subscriber and any retained subscribe message.
    /// Returns whether a subscriber was present.
    pub fn remove(&mut self, id: &str) -> bool {
        self.subscriptions.remove(id);
        self.subscribers.remove(id).is_some()
    }

    /// Delivers a failure to every sink without removing any of them, so the
    /// operations can resume once the connection recovers.
    pub fn broadcast_error(&self, error: &TransportError) {
        for sink in self.subscribers.values() {
            let _ = sink.send(Err(error.clone()));
        }
    }

    /// Serialized subscribe messages of all live subscriptions, in ascending
    /// id order so replay is deterministic.
    pub fn replay_messages(&self) -> Vec<String> {
        let mut ids: Vec<&String> = self.subscriptions.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| self.subscriptions[id].clone())
            .collect()
    }

    pub fn contains_subscriber(&self, id: &str) -> bool {
        self.subscribers.contains_key(id)
    }

    pub fn clear_subscriptions(&mut self) {
        self.subscriptions.clear();
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
        self.subscriptions.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
