use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use http::header::{HeaderName, HeaderValue};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use graphql_ws_protocol::message::{MessageKind, WireMessage};
use graphql_ws_protocol::request::{GraphQLRequest, OperationKind};
use graphql_ws_protocol::subprotocol::Subprotocol;

use crate::config::WebSocketTransportConfig;
use crate::error::TransportError;
use crate::policies::{
    DefaultBodyCreator, OperationIdGenerator, RequestBodyCreator, SequentialIdGenerator,
};
use crate::registry::{OperationResult, OperationSink};
use crate::socket::{PingCompletion, SocketEvent, SocketListener, WebSocketClient};
use crate::state::{ConnectionState, SharedState};

/// Timeout forced on the socket teardown triggered by [`WebSocketTransport::pause`].
const PAUSE_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Header carrying the configured client name on the connection request.
pub const CLIENT_NAME_HEADER: &str = "graphql-client-name";
/// Header carrying the configured client version on the connection request.
pub const CLIENT_VERSION_HEADER: &str = "graphql-client-version";

/// Upward notifications about the transport's connection lifecycle.
pub trait TransportDelegate: Send + Sync {
    /// The first connection of this transport instance was established.
    fn did_connect(&self);
    /// Any subsequent connection was established.
    fn did_reconnect(&self);
    fn did_disconnect(&self, error: Option<TransportError>);
    /// Data carried by a native ping frame from the server.
    fn received_ping_data(&self, _data: &[u8]) {}
    /// Data carried by a native pong frame from the server.
    fn received_pong_data(&self, _data: &[u8]) {}
}

enum TransportCommand {
    Write {
        text: String,
    },
    Ping {
        data: Vec<u8>,
        completion: Option<PingCompletion>,
    },
    UpdateHeaders {
        headers: HashMap<String, String>,
        reconnect_if_connected: bool,
    },
    UpdateConnectingPayload {
        payload: Option<Value>,
        reconnect_if_connected: bool,
    },
    SetClientMetadata {
        name: Option<String>,
        version: Option<String>,
    },
    Close,
    Pause,
    Resume {
        auto_reconnect: bool,
    },
    Reconnect,
    Shutdown,
}

/// GraphQL over WebSocket client transport.
///
/// Multiplexes many GraphQL operations onto a single socket under one of the
/// two GraphQL over WebSocket sub-protocols. Operations submitted before the
/// server acknowledges the handshake are staged in an ordered queue and
/// flushed on `connection_ack`; live subscriptions are replayed after a
/// reconnect.
///
/// All mutating work runs on a single worker task; the facade methods only
/// enqueue events for it, so they are cheap and safe to call from any thread.
/// Must be constructed inside a tokio runtime.
pub struct WebSocketTransport {
    commands: mpsc::UnboundedSender<TransportCommand>,
    shared: Arc<SharedState>,
    subprotocol: Subprotocol,
    body_creator: Arc<dyn RequestBodyCreator>,
    id_generator: Arc<dyn OperationIdGenerator>,
}

impl WebSocketTransport {
    pub fn new(socket: Box<dyn WebSocketClient>, config: WebSocketTransportConfig) -> Self {
        Self::with_policies(
            socket,
            config,
            None,
            Arc::new(DefaultBodyCreator),
            Arc::new(SequentialIdGenerator::new()),
        )
    }

    pub fn with_policies(
        mut socket: Box<dyn WebSocketClient>,
        config: WebSocketTransportConfig,
        delegate: Option<Arc<dyn TransportDelegate>>,
        body_creator: Arc<dyn RequestBodyCreator>,
        id_generator: Arc<dyn OperationIdGenerator>,
    ) -> Self {
        let shared = Arc::new(SharedState::new(config.reconnect));
        let subprotocol = socket.subprotocol();

        apply_client_headers(
            socket.as_mut(),
            config.client_name.as_deref(),
            config.client_version.as_deref(),
        );

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        socket.set_listener(Some(SocketListener::new(events_tx.clone(), 1)));

        if config.connect_on_init {
            socket.connect();
        }

        let worker = Worker {
            socket,
            shared: shared.clone(),
            config,
            delegate,
            commands: commands_rx,
            events: events_rx,
            events_tx,
            generation: 1,
            commands_tx: commands_tx.clone(),
        };
        tokio::spawn(worker.run());

        Self {
            commands: commands_tx,
            shared,
            subprotocol,
            body_creator,
            id_generator,
        }
    }

    /// Submits a GraphQL operation and returns the id assigned to it.
    ///
    /// The sink receives one result for queries and mutations and unbounded
    /// many for subscriptions. While the transport holds a sticky connection
    /// error, the sink immediately receives that failure, nothing is
    /// registered and `None` is returned.
    pub fn send(
        &self,
        request: &GraphQLRequest,
        kind: OperationKind,
        sink: OperationSink,
    ) -> Option<String> {
        if let Some(sticky) = self.shared.last_error() {
            let _ = sink.send(Err(sticky));
            return None;
        }

        let body = self.body_creator.request_body(request);
        let id = self.id_generator.next_id();
        let message = WireMessage::start(self.subprotocol, id.clone(), body);
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                let _ = sink.send(Err(TransportError::from(e)));
                return None;
            }
        };

        let subscribe_message = kind.is_subscription().then(|| text.clone());
        self.shared
            .with_registry(|registry| registry.register(id.clone(), sink, subscribe_message));
        let _ = self.commands.send(TransportCommand::Write { text });

        trace!(id = %id, kind = %kind, "operation submitted");
        Some(id)
    }

    /// Channel-backed convenience over [`send`](Self::send): returns the
    /// operation id together with a stream of its results.
    pub fn subscribe(
        &self,
        request: &GraphQLRequest,
        kind: OperationKind,
    ) -> Option<(String, BoxStream<'static, OperationResult>)> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.send(request, kind, tx)?;
        let stream = Box::pin(async_stream::stream! {
            while let Some(result) = rx.recv().await {
                yield result;
            }
        });
        Some((id, stream))
    }

    /// Stops the operation and removes its records. Calling this twice is
    /// indistinguishable from calling it once.
    pub fn unsubscribe(&self, id: &str) {
        let removed = self.shared.with_registry(|registry| registry.remove(id));
        if !removed {
            return;
        }
        match WireMessage::stop(self.subprotocol, id.to_string()).to_text() {
            Ok(text) => {
                let _ = self.commands.send(TransportCommand::Write { text });
            }
            Err(e) => warn!(id = %id, error = %e, "failed to serialize stop message"),
        }
        trace!(id = %id, "operation unsubscribed");
    }

    /// Sends a native WebSocket ping, orthogonal to the GraphQL-level `ping`
    /// message.
    pub fn ping(&self, data: Vec<u8>, completion: Option<PingCompletion>) {
        let _ = self.commands.send(TransportCommand::Ping { data, completion });
    }

    /// Merges `headers` into the socket request. With `reconnect_if_connected`
    /// the change is applied right away through an internal reconnect;
    /// otherwise it takes effect on the next (re)connection.
    pub fn update_headers(&self, headers: HashMap<String, String>, reconnect_if_connected: bool) {
        let _ = self.commands.send(TransportCommand::UpdateHeaders {
            headers,
            reconnect_if_connected,
        });
    }

    /// Replaces the `connection_init` payload, with the same reconnect
    /// semantics as [`update_headers`](Self::update_headers).
    pub fn update_connecting_payload(&self, payload: Option<Value>, reconnect_if_connected: bool) {
        let _ = self
            .commands
            .send(TransportCommand::UpdateConnectingPayload {
                payload,
                reconnect_if_connected,
            });
    }

    /// Updates the client name advertised in the connection headers,
    /// effective from the next reconnection.
    pub fn set_client_name(&self, client_name: impl Into<String>) {
        let _ = self.commands.send(TransportCommand::SetClientMetadata {
            name: Some(client_name.into()),
            version: None,
        });
    }

    /// Updates the client version advertised in the connection headers,
    /// effective from the next reconnection.
    pub fn set_client_version(&self, client_version: impl Into<String>) {
        let _ = self.commands.send(TransportCommand::SetClientMetadata {
            name: None,
            version: Some(client_version.into()),
        });
    }

    /// True iff the socket is connected, regardless of the handshake ack.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// The sticky connection error captured at the last disconnect, cleared
    /// by the next successful connect.
    pub fn error(&self) -> Option<TransportError> {
        self.shared.last_error()
    }

    pub fn subprotocol(&self) -> Subprotocol {
        self.subprotocol
    }

    /// Tells the server the client is going away and stops reconnecting.
    /// Staged messages and retained subscriptions are dropped.
    pub fn close(&self) {
        let _ = self.commands.send(TransportCommand::Close);
    }

    /// Disconnects without dropping operation records, forcing the socket
    /// teardown after two seconds. [`resume`](Self::resume) re-establishes
    /// the connection.
    pub fn pause(&self) {
        let _ = self.commands.send(TransportCommand::Pause);
    }

    pub fn resume(&self, auto_reconnect: bool) {
        let _ = self
            .commands
            .send(TransportCommand::Resume { auto_reconnect });
    }

    #[cfg(test)]
    pub(crate) fn has_subscriber(&self, id: &str) -> bool {
        self.shared
            .with_registry(|registry| registry.contains_subscriber(id))
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        let _ = self.commands.send(TransportCommand::Shutdown);
    }
}

fn apply_client_headers(
    socket: &mut dyn WebSocketClient,
    client_name: Option<&str>,
    client_version: Option<&str>,
) {
    let headers = &mut socket.request_mut().headers;
    if let Some(name) = client_name {
        match HeaderValue::try_from(name) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(CLIENT_NAME_HEADER), value);
            }
            Err(_) => warn!(client_name = %name, "client name is not a valid header value"),
        }
    }
    if let Some(version) = client_version {
        match HeaderValue::try_from(version) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(CLIENT_VERSION_HEADER), value);
            }
            Err(_) => {
                warn!(client_version = %version, "client version is not a valid header value")
            }
        }
    }
}

/// The single consumer of all transport events. Socket callbacks and facade
/// operations both land here, which keeps every mutation of the queue, the
/// registry and the connection state on one task.
struct Worker {
    socket: Box<dyn WebSocketClient>,
    shared: Arc<SharedState>,
    config: WebSocketTransportConfig,
    delegate: Option<Arc<dyn TransportDelegate>>,
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::UnboundedReceiver<(u64, SocketEvent)>,
    events_tx: mpsc::UnboundedSender<(u64, SocketEvent)>,
    /// Generation of the current connection attempt. Bumped whenever the
    /// worker initiates a new connection; events stamped with an older
    /// generation belong to a superseded connection and are dropped.
    generation: u64,
    commands_tx: mpsc::UnboundedSender<TransportCommand>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(command) = self.commands.recv() => {
                    if self.handle_command(command) {
                        break;
                    }
                }
                Some((generation, event)) = self.events.recv() => {
                    self.handle_socket_event(generation, event)
                }
                else => break,
            }
        }
        self.teardown();
    }

    /// Returns true when the worker should shut down.
    fn handle_command(&mut self, command: TransportCommand) -> bool {
        match command {
            TransportCommand::Write { text } => self.write_or_queue(text),
            TransportCommand::Ping { data, completion } => self.socket.write_ping(data, completion),
            TransportCommand::UpdateHeaders {
                headers,
                reconnect_if_connected,
            } => {
                let request = self.socket.request_mut();
                for (name, value) in headers {
                    match (
                        HeaderName::try_from(name.as_str()),
                        HeaderValue::try_from(value.as_str()),
                    ) {
                        (Ok(header_name), Ok(header_value)) => {
                            request.headers.insert(header_name, header_value);
                        }
                        _ => warn!(header = %name, "ignoring header with an invalid name or value"),
                    }
                }
                if reconnect_if_connected && self.shared.is_connected() {
                    self.reconnect_socket();
                }
            }
            TransportCommand::UpdateConnectingPayload {
                payload,
                reconnect_if_connected,
            } => {
                self.config.connecting_payload = payload;
                if reconnect_if_connected && self.shared.is_connected() {
                    self.reconnect_socket();
                }
            }
            TransportCommand::SetClientMetadata { name, version } => {
                if let Some(name) = name {
                    self.config.client_name = Some(name);
                }
                if let Some(version) = version {
                    self.config.client_version = Some(version);
                }
                apply_client_headers(
                    self.socket.as_mut(),
                    self.config.client_name.as_deref(),
                    self.config.client_version.as_deref(),
                );
            }
            TransportCommand::Close => self.close_connection(),
            TransportCommand::Pause => {
                debug!("pausing websocket connection");
                self.shared.set_reconnect(false);
                self.socket.disconnect(Some(PAUSE_DISCONNECT_TIMEOUT));
            }
            TransportCommand::Resume { auto_reconnect } => {
                debug!(auto_reconnect, "resuming websocket connection");
                self.shared.set_reconnect(auto_reconnect);
                self.connect_socket();
            }
            TransportCommand::Reconnect => {
                if !self.shared.reconnect() {
                    return false;
                }
                // errors during the retry are a fresh disconnect, not part of
                // the failure that scheduled it
                if self.shared.state() == ConnectionState::Failed {
                    self.shared.set_state(ConnectionState::Disconnected);
                }
                debug!("attempting reconnection");
                self.connect_socket();
            }
            TransportCommand::Shutdown => return true,
        }
        false
    }

    fn handle_socket_event(&mut self, generation: u64, event: SocketEvent) {
        if generation != self.generation {
            // a connection that was replaced mid-teardown; a late disconnect
            // from it must not touch the state of its successor
            trace!(
                generation,
                current = self.generation,
                "dropping event from a superseded connection"
            );
            return;
        }
        match event {
            SocketEvent::Connected => self.handle_connected(),
            SocketEvent::Disconnected(error) => self.handle_disconnected(error),
            SocketEvent::Text(text) => self.handle_text(text),
            SocketEvent::Binary(data) => {
                // binary frames are not part of either sub-protocol
                debug!(len = data.len(), "ignoring inbound binary frame");
            }
            SocketEvent::ReceivedPing(data) => {
                if let Some(delegate) = &self.delegate {
                    delegate.received_ping_data(&data);
                }
            }
            SocketEvent::ReceivedPong(data) => {
                if let Some(delegate) = &self.delegate {
                    delegate.received_pong_data(&data);
                }
            }
        }
    }

    fn handle_connected(&mut self) {
        debug!("websocket connected");
        self.shared.set_last_error(None);
        self.shared.set_acked(false);
        self.shared.set_state(ConnectionState::Connected);

        match WireMessage::init(self.config.connecting_payload.clone()).to_text() {
            // the handshake message is the one write that must bypass the queue
            Ok(text) => self.socket.write(text),
            Err(e) => error!(error = %e, "failed to serialize connection_init"),
        }

        if self.shared.reconnected() {
            self.replay_subscriptions();
            if let Some(delegate) = &self.delegate {
                delegate.did_reconnect();
            }
        } else if let Some(delegate) = &self.delegate {
            delegate.did_connect();
        }
        self.shared.set_reconnected(true);
    }

    fn handle_disconnected(&mut self, error: Option<String>) {
        match error {
            None => {
                debug!("websocket disconnected");
                self.shared.set_last_error(None);
                if let Some(delegate) = &self.delegate {
                    delegate.did_disconnect(None);
                }
                self.shared.set_acked(false);
                self.shared.set_state(ConnectionState::Disconnected);
                if self.shared.reconnect() {
                    self.schedule_reconnect();
                }
            }
            Some(message) => {
                let network_error = TransportError::NetworkError(message);
                if self.shared.state() == ConnectionState::Failed {
                    // the socket layer can emit bursts of errors for a single
                    // drop; capture the latest but handle the failure once
                    self.shared.set_last_error(Some(network_error));
                    return;
                }

                warn!(error = %network_error, "websocket disconnected with error");
                self.shared.set_state(ConnectionState::Failed);
                self.shared.set_last_error(Some(network_error.clone()));
                self.shared
                    .with_registry(|registry| registry.broadcast_error(&network_error));
                if let Some(delegate) = &self.delegate {
                    delegate.did_disconnect(Some(network_error));
                }
                self.shared.set_acked(false);
                if self.shared.reconnect() {
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn schedule_reconnect(&self) {
        let commands = self.commands_tx.clone();
        let delay = self.config.reconnection_interval;
        debug!(delay = ?delay, "scheduling reconnection");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(TransportCommand::Reconnect);
        });
    }

    fn handle_text(&mut self, text: String) {
        let message = match WireMessage::parse(&text) {
            Ok(message) => message,
            Err(e) => {
                let parse_error = TransportError::from(e);
                warn!(error = %parse_error, "failed to process inbound frame");
                self.shared
                    .with_registry(|registry| registry.broadcast_error(&parse_error));
                return;
            }
        };

        trace!("type" = message.kind.as_ref(), id = ?message.id, "received message");

        match message.kind {
            MessageKind::Data | MessageKind::Next | MessageKind::Error => match message.id {
                Some(id) => {
                    let result = match message.payload {
                        Some(payload) => Ok(payload),
                        None => Err(TransportError::NeitherErrorNorPayloadReceived),
                    };
                    self.shared
                        .with_registry(|registry| registry.dispatch(&id, result));
                }
                None => self.broadcast_unprocessed(text),
            },
            MessageKind::Complete => match message.id {
                Some(id) => self
                    .shared
                    .with_registry(|registry| registry.complete_if_one_shot(&id)),
                None => self.broadcast_unprocessed(text),
            },
            MessageKind::ConnectionAck => {
                debug!("connection acknowledged");
                self.shared.set_acked(true);
                self.drain_queue();
            }
            MessageKind::ConnectionKeepAlive | MessageKind::StartAck | MessageKind::Pong => {
                self.drain_queue()
            }
            MessageKind::Ping => {
                // the reply does not wait for the handshake ack
                match WireMessage::pong(None).to_text() {
                    Ok(pong) => self.socket.write(pong),
                    Err(e) => warn!(error = %e, "failed to serialize pong"),
                }
                self.drain_queue();
            }
            MessageKind::ConnectionInit
            | MessageKind::ConnectionTerminate
            | MessageKind::Subscribe
            | MessageKind::Start
            | MessageKind::Stop
            | MessageKind::ConnectionError => self.broadcast_unprocessed(text),
        }
    }

    fn broadcast_unprocessed(&self, raw: String) {
        let unprocessed = TransportError::UnprocessedMessage(raw);
        warn!(error = %unprocessed, "received a frame the transport cannot route");
        self.shared
            .with_registry(|registry| registry.broadcast_error(&unprocessed));
    }

    /// Writes directly once the server has acknowledged the connection;
    /// stages into the outbound queue otherwise.
    fn write_or_queue(&mut self, text: String) {
        if self.shared.acked() {
            self.socket.write(text);
        } else {
            let key = self.shared.with_queue(|queue| queue.enqueue(text, None));
            trace!(key, "message staged until connection_ack");
        }
    }

    fn drain_queue(&mut self) {
        let entries = self.shared.with_queue(|queue| queue.drain());
        if entries.is_empty() {
            return;
        }
        debug!(count = entries.len(), "flushing outbound queue");
        for (key, message) in entries {
            trace!(key, "writing staged message");
            self.socket.write(message);
        }
    }

    /// Re-issues the subscribe message of every live subscription after a
    /// reconnect. With `allow_sending_duplicates` disabled, a message still
    /// staged in the queue keeps its original key instead of being staged a
    /// second time.
    fn replay_subscriptions(&mut self) {
        let messages = self
            .shared
            .with_registry(|registry| registry.replay_messages());
        if messages.is_empty() {
            return;
        }
        debug!(count = messages.len(), "replaying subscriptions");
        for message in messages {
            if self.config.allow_sending_duplicates {
                self.write_or_queue(message);
            } else {
                match self.shared.with_queue(|queue| queue.key_of(&message)) {
                    Some(key) => {
                        self.shared.with_queue(|queue| {
                            queue.enqueue(message, Some(key));
                        });
                    }
                    None => self.write_or_queue(message),
                }
            }
        }
    }

    /// Close initiated by the caller: stop reconnecting, tell the server,
    /// drop staged traffic and retained subscriptions.
    fn close_connection(&mut self) {
        debug!("closing websocket connection");
        self.shared.set_reconnect(false);
        match WireMessage::terminate().to_text() {
            // best-effort bypass of the queue: the queue is cleared on the
            // next line, so a terminate staged there would never reach the
            // server
            Ok(text) => self.socket.write(text),
            Err(e) => warn!(error = %e, "failed to serialize connection_terminate"),
        }
        self.shared.with_queue(|queue| queue.clear());
        self.shared
            .with_registry(|registry| registry.clear_subscriptions());
    }

    /// Disconnect-and-connect used when a request mutation should apply
    /// immediately. The teardown itself must not schedule a retry, and the
    /// torn-down connection is retired up front so its remaining events
    /// cannot race the replacement's.
    fn reconnect_socket(&mut self) {
        let reconnect = self.shared.reconnect();
        self.shared.set_reconnect(false);
        self.install_fresh_listener();
        self.socket.disconnect(None);
        self.shared.set_reconnect(reconnect);
        self.socket.connect();
    }

    /// Bumps the connection generation and hands the socket a listener for
    /// it, retiring every listener of earlier connections.
    fn install_fresh_listener(&mut self) {
        self.generation += 1;
        self.socket.set_listener(Some(SocketListener::new(
            self.events_tx.clone(),
            self.generation,
        )));
    }

    fn connect_socket(&mut self) {
        self.install_fresh_listener();
        self.socket.connect();
    }

    /// Final teardown: disconnect, detach the socket back-reference, drop all
    /// staged messages and sinks without invoking them.
    fn teardown(&mut self) {
        self.socket.disconnect(None);
        self.socket.set_listener(None);
        self.shared.with_queue(|queue| queue.clear());
        self.shared.with_registry(|registry| registry.clear());
        debug!("transport torn down");
    }
}
