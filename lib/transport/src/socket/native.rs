use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use graphql_ws_protocol::subprotocol::Subprotocol;

use super::{PingCompletion, SocketListener, SocketRequest, WebSocketClient};

enum WriterCommand {
    Text(String),
    Ping(Vec<u8>, Option<PingCompletion>),
    Close,
}

/// Default socket implementation on top of `tokio-tungstenite`.
///
/// `connect` spawns a connection task owning the (possibly TLS) stream;
/// writes are funneled through a channel so the trait surface stays
/// synchronous and the transport never holds the stream itself.
pub struct NativeWebSocket {
    request: SocketRequest,
    subprotocol: Subprotocol,
    listener: Option<SocketListener>,
    writer: Option<mpsc::UnboundedSender<WriterCommand>>,
    shutdown: Option<CancellationToken>,
}

impl NativeWebSocket {
    pub fn new(request: SocketRequest, subprotocol: Subprotocol) -> Self {
        Self {
            request,
            subprotocol,
            listener: None,
            writer: None,
            shutdown: None,
        }
    }

    fn handshake_request(&self) -> Result<http::Request<()>, String> {
        let mut handshake = self
            .request
            .uri
            .to_string()
            .into_client_request()
            .map_err(|e| e.to_string())?;
        for (name, value) in self.request.headers.iter() {
            handshake.headers_mut().insert(name.clone(), value.clone());
        }
        handshake.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(self.subprotocol.header_value()),
        );
        Ok(handshake)
    }
}

impl WebSocketClient for NativeWebSocket {
    fn request(&self) -> &SocketRequest {
        &self.request
    }

    fn request_mut(&mut self) -> &mut SocketRequest {
        &mut self.request
    }

    fn subprotocol(&self) -> Subprotocol {
        self.subprotocol
    }

    fn set_listener(&mut self, listener: Option<SocketListener>) {
        self.listener = listener;
    }

    fn connect(&mut self) {
        // a closed writer means the previous connection task has ended. A
        // task still draining its close handshake after `disconnect` may
        // overlap with the new one, but it only holds the listener captured
        // at its own `connect`, so its remaining events are dropped as
        // belonging to a superseded generation.
        let connection_running = self
            .writer
            .as_ref()
            .is_some_and(|writer| !writer.is_closed());
        if connection_running {
            debug!("connect requested while a connection task is already running");
            return;
        }
        let listener = match self.listener.clone() {
            Some(listener) => listener,
            None => {
                warn!("connect requested without a listener installed");
                return;
            }
        };
        let handshake = match self.handshake_request() {
            Ok(handshake) => handshake,
            Err(e) => {
                listener.on_disconnect(Some(e));
                return;
            }
        };

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        self.writer = Some(writer_tx);
        self.shutdown = Some(shutdown.clone());

        let expected_protocol = self.subprotocol.header_value();
        let endpoint = self.request.uri.to_string();

        tokio::spawn(async move {
            debug!(endpoint = %endpoint, "establishing websocket connection");

            let (stream, response) = match tokio_tungstenite::connect_async(handshake).await {
                Ok(connected) => connected,
                Err(e) => {
                    listener.on_disconnect(Some(e.to_string()));
                    return;
                }
            };

            let negotiated = response
                .headers()
                .get(SEC_WEBSOCKET_PROTOCOL)
                .and_then(|value| value.to_str().ok());
            if negotiated != Some(expected_protocol) {
                debug!(
                    negotiated = ?negotiated,
                    requested = %expected_protocol,
                    "server did not echo the requested sub-protocol"
                );
            }

            listener.on_connect();

            let (mut sink, mut source) = stream.split();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        listener.on_disconnect(None);
                        return;
                    }
                    command = writer_rx.recv() => match command {
                        Some(WriterCommand::Text(text)) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                listener.on_disconnect(Some(e.to_string()));
                                return;
                            }
                        }
                        Some(WriterCommand::Ping(data, completion)) => {
                            if let Err(e) = sink.send(Message::Ping(data)).await {
                                listener.on_disconnect(Some(e.to_string()));
                                return;
                            }
                            if let Some(completion) = completion {
                                completion();
                            }
                        }
                        Some(WriterCommand::Close) | None => {
                            let _ = sink.send(Message::Close(None)).await;
                            listener.on_disconnect(None);
                            return;
                        }
                    },
                    frame = source.next() => match frame {
                        Some(Ok(Message::Text(text))) => listener.on_text(text),
                        Some(Ok(Message::Binary(data))) => listener.on_binary(data),
                        Some(Ok(Message::Ping(data))) => listener.on_received_ping(data),
                        Some(Ok(Message::Pong(data))) => listener.on_received_pong(data),
                        Some(Ok(Message::Close(frame))) => {
                            listener.on_disconnect(close_error(frame));
                            return;
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            listener.on_disconnect(Some(e.to_string()));
                            return;
                        }
                        None => {
                            listener.on_disconnect(None);
                            return;
                        }
                    },
                }
            }
        });
    }

    fn disconnect(&mut self, force_timeout: Option<Duration>) {
        if let Some(writer) = self.writer.take() {
            let _ = writer.send(WriterCommand::Close);
        }
        if let Some(shutdown) = self.shutdown.take() {
            if let Some(timeout) = force_timeout {
                // backstop in case the close handshake stalls
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    shutdown.cancel();
                });
            }
        }
    }

    fn write(&mut self, text: String) {
        match &self.writer {
            Some(writer) => {
                let _ = writer.send(WriterCommand::Text(text));
            }
            None => warn!("dropping text frame written to a disconnected socket"),
        }
    }

    fn write_ping(&mut self, data: Vec<u8>, completion: Option<PingCompletion>) {
        match &self.writer {
            Some(writer) => {
                let _ = writer.send(WriterCommand::Ping(data, completion));
            }
            None => warn!("dropping ping written to a disconnected socket"),
        }
    }
}

impl Drop for NativeWebSocket {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
        }
    }
}

fn close_error(frame: Option<CloseFrame<'_>>) -> Option<String> {
    match frame {
        Some(frame) if frame.code != CloseCode::Normal => Some(format!(
            "connection closed with code {}: {}",
            frame.code, frame.reason
        )),
        _ => None,
    }
}
