use std::time::Duration;

use http::{HeaderMap, Uri};
use tokio::sync::mpsc;

use graphql_ws_protocol::subprotocol::Subprotocol;

#[cfg(feature = "native-socket")]
pub mod native;

/// Callback invoked once a native ping frame has been written to the wire.
pub type PingCompletion = Box<dyn FnOnce() + Send>;

/// Mutable connection request: the endpoint plus the headers that will be
/// applied on the next (re)connection attempt.
#[derive(Debug, Clone)]
pub struct SocketRequest {
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl SocketRequest {
    pub fn new(uri: Uri) -> Self {
        Self {
            uri,
            headers: HeaderMap::new(),
        }
    }
}

/// Events a socket implementation reports back to the transport.
#[derive(Debug)]
pub enum SocketEvent {
    Connected,
    /// The connection dropped; carries an error message for abnormal closures.
    Disconnected(Option<String>),
    Text(String),
    Binary(Vec<u8>),
    ReceivedPing(Vec<u8>),
    ReceivedPong(Vec<u8>),
}

/// Back-reference from the socket to the transport's event loop. The
/// transport clears it during teardown so a lingering socket task cannot
/// call into a dropped transport.
///
/// Each listener is stamped with the connection generation it was installed
/// for. The transport installs a fresh listener before every connection
/// attempt it initiates and discards events stamped with an older
/// generation, so a connection that is still tearing down cannot interleave
/// its events with those of its replacement.
#[derive(Clone)]
pub struct SocketListener {
    events: mpsc::UnboundedSender<(u64, SocketEvent)>,
    generation: u64,
}

impl SocketListener {
    pub(crate) fn new(events: mpsc::UnboundedSender<(u64, SocketEvent)>, generation: u64) -> Self {
        Self { events, generation }
    }

    pub fn on_connect(&self) {
        let _ = self.events.send((self.generation, SocketEvent::Connected));
    }

    pub fn on_disconnect(&self, error: Option<String>) {
        let _ = self
            .events
            .send((self.generation, SocketEvent::Disconnected(error)));
    }

    pub fn on_text(&self, text: String) {
        let _ = self.events.send((self.generation, SocketEvent::Text(text)));
    }

    pub fn on_binary(&self, data: Vec<u8>) {
        let _ = self.events.send((self.generation, SocketEvent::Binary(data)));
    }

    pub fn on_received_ping(&self, data: Vec<u8>) {
        let _ = self
            .events
            .send((self.generation, SocketEvent::ReceivedPing(data)));
    }

    pub fn on_received_pong(&self, data: Vec<u8>) {
        let _ = self
            .events
            .send((self.generation, SocketEvent::ReceivedPong(data)));
    }
}

/// Abstract WebSocket client consumed by the transport. Implementations own
/// frame I/O, TLS and proxying; the transport drives them through this seam
/// and never blocks on the network itself.
pub trait WebSocketClient: Send {
    fn request(&self) -> &SocketRequest;
    fn request_mut(&mut self) -> &mut SocketRequest;
    /// Sub-protocol this socket was built for.
    fn subprotocol(&self) -> Subprotocol;
    /// Installs or clears the transport back-reference.
    fn set_listener(&mut self, listener: Option<SocketListener>);
    /// Opens a connection. Implementations must capture the currently
    /// installed listener here and report every event of this connection
    /// through that capture: the transport installs a fresh listener per
    /// connection attempt and drops events from superseded ones.
    fn connect(&mut self);
    /// `force_timeout` caps how long a graceful close may take before the
    /// connection is torn down.
    fn disconnect(&mut self, force_timeout: Option<Duration>);
    /// Writes a text frame. Must be a no-op when not connected.
    fn write(&mut self, text: String);
    /// Writes a native ping frame, invoking `completion` once written.
    fn write_ping(&mut self, data: Vec<u8>, completion: Option<PingCompletion>);
    /// SOCKS proxy capability is feature-detected: implementations without
    /// one keep these defaults.
    fn socks_proxy_enabled(&self) -> bool {
        false
    }
    fn set_socks_proxy_enabled(&mut self, _enabled: bool) {}
}
