use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::TransportError;
use crate::queue::MessageQueue;
use crate::registry::SubscriberRegistry;

/// Socket-level connection state. The handshake ack is tracked separately:
/// a socket can be `Connected` while still waiting for `connection_ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Failed,
}

/// State shared between the facade, the worker task and arbitrary reader
/// threads. Every field sits behind its own lock or atomic, and access goes
/// through methods so the protected boundary stays in one place.
pub struct SharedState {
    state: Mutex<ConnectionState>,
    acked: AtomicBool,
    reconnect: AtomicBool,
    reconnected: AtomicBool,
    last_error: Mutex<Option<TransportError>>,
    registry: Mutex<SubscriberRegistry>,
    queue: Mutex<MessageQueue>,
}

impl SharedState {
    pub fn new(reconnect: bool) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            acked: AtomicBool::new(false),
            reconnect: AtomicBool::new(reconnect),
            reconnected: AtomicBool::new(false),
            last_error: Mutex::new(None),
            registry: Mutex::new(SubscriberRegistry::default()),
            queue: Mutex::new(MessageQueue::new()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn set_acked(&self, acked: bool) {
        self.acked.store(acked, Ordering::SeqCst);
    }

    pub fn reconnect(&self) -> bool {
        self.reconnect.load(Ordering::SeqCst)
    }

    pub fn set_reconnect(&self, reconnect: bool) {
        self.reconnect.store(reconnect, Ordering::SeqCst);
    }

    pub fn reconnected(&self) -> bool {
        self.reconnected.load(Ordering::SeqCst)
    }

    pub fn set_reconnected(&self, reconnected: bool) {
        self.reconnected.store(reconnected, Ordering::SeqCst);
    }

    pub fn last_error(&self) -> Option<TransportError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_last_error(&self, error: Option<TransportError>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }

    pub fn with_registry<R>(&self, f: impl FnOnce(&mut SubscriberRegistry) -> R) -> R {
        f(&mut self.registry.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn with_queue<R>(&self, f: impl FnOnce(&mut MessageQueue) -> R) -> R {
        f(&mut self.queue.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
