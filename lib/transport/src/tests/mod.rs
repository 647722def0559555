use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::{HeaderMap, Uri};
use serde_json::json;
use tokio::sync::mpsc;

use graphql_ws_protocol::message::{MessageKind, WireMessage};
use graphql_ws_protocol::request::{GraphQLRequest, OperationKind};
use graphql_ws_protocol::subprotocol::Subprotocol;

use crate::config::WebSocketTransportConfig;
use crate::error::TransportError;
use crate::registry::{OperationResult, OperationSink};
use crate::socket::{PingCompletion, SocketListener, SocketRequest, WebSocketClient};
use crate::transport::{TransportDelegate, WebSocketTransport};

/// Test double for the socket collaborator. Records everything the transport
/// does to it and lets tests inject server activity through the installed
/// listener.
#[derive(Clone, Default)]
struct MockSocketHandle {
    listener: Arc<Mutex<Option<SocketListener>>>,
    writes: Arc<Mutex<Vec<String>>>,
    pings: Arc<Mutex<Vec<Vec<u8>>>>,
    connect_count: Arc<Mutex<usize>>,
    connect_headers: Arc<Mutex<Vec<HeaderMap>>>,
    disconnects: Arc<Mutex<Vec<Option<Duration>>>>,
}

impl MockSocketHandle {
    /// The listener the transport installed, used to play the server side.
    fn server(&self) -> SocketListener {
        self.listener
            .lock()
            .unwrap()
            .clone()
            .expect("transport has not installed a listener")
    }

    fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn parsed_writes(&self) -> Vec<WireMessage> {
        self.writes()
            .iter()
            .map(|text| WireMessage::parse(text).expect("transport wrote an unparsable frame"))
            .collect()
    }

    fn connect_count(&self) -> usize {
        *self.connect_count.lock().unwrap()
    }

    fn disconnects(&self) -> Vec<Option<Duration>> {
        self.disconnects.lock().unwrap().clone()
    }

    fn ack(&self) {
        self.server()
            .on_text(r#"{"type":"connection_ack"}"#.to_string());
    }
}

struct MockSocket {
    request: SocketRequest,
    subprotocol: Subprotocol,
    handle: MockSocketHandle,
}

impl MockSocket {
    fn new(subprotocol: Subprotocol) -> (Self, MockSocketHandle) {
        let handle = MockSocketHandle::default();
        let socket = Self {
            request: SocketRequest::new(Uri::from_static("ws://localhost:4000/graphql")),
            subprotocol,
            handle: handle.clone(),
        };
        (socket, handle)
    }
}

impl WebSocketClient for MockSocket {
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
        *self.handle.listener.lock().unwrap() = listener;
    }

    fn connect(&mut self) {
        *self.handle.connect_count.lock().unwrap() += 1;
        self.handle
            .connect_headers
            .lock()
            .unwrap()
            .push(self.request.headers.clone());
        if let Some(listener) = self.handle.listener.lock().unwrap().as_ref() {
            listener.on_connect();
        }
    }

    fn disconnect(&mut self, force_timeout: Option<Duration>) {
        self.handle.disconnects.lock().unwrap().push(force_timeout);
    }

    fn write(&mut self, text: String) {
        self.handle.writes.lock().unwrap().push(text);
    }

    fn write_ping(&mut self, data: Vec<u8>, completion: Option<PingCompletion>) {
        self.handle.pings.lock().unwrap().push(data);
        if let Some(completion) = completion {
            completion();
        }
    }
}

#[derive(Default)]
struct RecordingDelegate {
    events: Arc<Mutex<Vec<String>>>,
}

impl TransportDelegate for RecordingDelegate {
    fn did_connect(&self) {
        self.events.lock().unwrap().push("connect".to_string());
    }

    fn did_reconnect(&self) {
        self.events.lock().unwrap().push("reconnect".to_string());
    }

    fn did_disconnect(&self, error: Option<TransportError>) {
        self.events
            .lock()
            .unwrap()
            .push(format!("disconnect error={}", error.is_some()));
    }

    fn received_pong_data(&self, data: &[u8]) {
        self.events
            .lock()
            .unwrap()
            .push(format!("pong_data len={}", data.len()));
    }
}

fn test_config() -> WebSocketTransportConfig {
    WebSocketTransportConfig {
        reconnection_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

fn sink() -> (OperationSink, mpsc::UnboundedReceiver<OperationResult>) {
    mpsc::unbounded_channel()
}

fn subscription() -> GraphQLRequest {
    GraphQLRequest::new("subscription { tick }")
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn queues_operations_until_connection_ack() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.writes().len() == 1).await;
    let init = handle.parsed_writes()[0].clone();
    assert_eq!(init.kind, MessageKind::ConnectionInit);
    assert_eq!(init.payload, Some(json!({})));

    let (tx, _rx) = sink();
    let id = transport
        .send(&subscription(), OperationKind::Subscription, tx)
        .expect("send was rejected");
    assert_eq!(id, "1");

    // nothing but connection_init may hit the socket before the ack
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.writes().len(), 1);

    handle.ack();

    eventually(|| handle.writes().len() == 2).await;
    let subscribe = handle.parsed_writes()[1].clone();
    assert_eq!(subscribe.kind, MessageKind::Subscribe);
    assert_eq!(subscribe.id.as_deref(), Some("1"));
    assert!(transport.is_connected());
}

#[tokio::test]
async fn legacy_protocol_uses_start_and_stop_kinds() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.writes().len() == 1).await;
    handle.ack();

    let (tx, _rx) = sink();
    let id = transport
        .send(&subscription(), OperationKind::Subscription, tx)
        .unwrap();

    eventually(|| handle.writes().len() == 2).await;
    assert_eq!(handle.parsed_writes()[1].kind, MessageKind::Start);

    transport.unsubscribe(&id);

    eventually(|| handle.writes().len() == 3).await;
    let stop = handle.parsed_writes()[2].clone();
    assert_eq!(stop.kind, MessageKind::Stop);
    assert_eq!(stop.id.as_deref(), Some(id.as_str()));
}

#[tokio::test]
async fn preserves_submission_order_across_ack() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.writes().len() == 1).await;

    let mut receivers = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = sink();
        transport
            .send(&GraphQLRequest::new("{ __typename }"), OperationKind::Query, tx)
            .unwrap();
        receivers.push(rx);
    }

    handle.ack();

    eventually(|| handle.writes().len() == 4).await;
    let ids: Vec<_> = handle.parsed_writes()[1..]
        .iter()
        .map(|message| message.id.clone().unwrap())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn completes_one_shot_operations() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.writes().len() == 1).await;
    handle.ack();

    let (tx, mut rx) = sink();
    let id = transport
        .send(
            &GraphQLRequest::new("query { viewer { id } }"),
            OperationKind::Query,
            tx,
        )
        .unwrap();

    handle.server().on_text(format!(
        r#"{{"type":"next","id":"{id}","payload":{{"data":{{"viewer":{{"id":"u1"}}}}}}}}"#
    ));

    let result = rx.recv().await.unwrap().unwrap();
    assert_eq!(result, json!({"data": {"viewer": {"id": "u1"}}}));

    handle
        .server()
        .on_text(format!(r#"{{"type":"complete","id":"{id}"}}"#));

    eventually(|| !transport.has_subscriber(&id)).await;
}

#[tokio::test]
async fn complete_does_not_remove_subscriptions() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.writes().len() == 1).await;
    handle.ack();

    let (tx, mut rx) = sink();
    let id = transport
        .send(&subscription(), OperationKind::Subscription, tx)
        .unwrap();

    handle
        .server()
        .on_text(format!(r#"{{"type":"complete","id":"{id}"}}"#));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(transport.has_subscriber(&id));

    // and results keep flowing afterwards
    handle.server().on_text(format!(
        r#"{{"type":"next","id":"{id}","payload":{{"data":{{"tick":1}}}}}}"#
    ));
    let result = rx.recv().await.unwrap().unwrap();
    assert_eq!(result, json!({"data": {"tick": 1}}));
}

#[tokio::test]
async fn replays_subscriptions_after_a_failed_connection() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.writes().len() == 1).await;
    handle.ack();

    let (tx1, mut rx1) = sink();
    let (tx2, mut rx2) = sink();
    transport
        .send(&subscription(), OperationKind::Subscription, tx1)
        .unwrap();
    transport
        .send(&subscription(), OperationKind::Subscription, tx2)
        .unwrap();
    eventually(|| handle.writes().len() == 3).await;

    handle
        .server()
        .on_disconnect(Some("connection reset by peer".to_string()));

    // both sinks observe the network failure and stay registered
    assert!(matches!(
        rx1.recv().await.unwrap(),
        Err(TransportError::NetworkError(_))
    ));
    assert!(matches!(
        rx2.recv().await.unwrap(),
        Err(TransportError::NetworkError(_))
    ));

    // the retry fires after the configured interval
    eventually(|| handle.connect_count() == 2).await;
    eventually(|| handle.writes().len() == 4).await;
    assert_eq!(handle.parsed_writes()[3].kind, MessageKind::ConnectionInit);

    handle.ack();

    eventually(|| handle.writes().len() == 6).await;
    let replayed: Vec<_> = handle.parsed_writes()[4..]
        .iter()
        .map(|message| (message.kind, message.id.clone().unwrap()))
        .collect();
    assert_eq!(
        replayed,
        vec![
            (MessageKind::Subscribe, "1".to_string()),
            (MessageKind::Subscribe, "2".to_string())
        ]
    );
}

#[tokio::test]
async fn does_not_duplicate_queued_subscribes_on_replay() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let config = WebSocketTransportConfig {
        allow_sending_duplicates: false,
        ..test_config()
    };
    let transport = WebSocketTransport::new(Box::new(socket), config);

    eventually(|| handle.writes().len() == 1).await;

    // the ack never arrives, so the subscribe stays queued
    let (tx, mut rx) = sink();
    transport
        .send(&subscription(), OperationKind::Subscription, tx)
        .unwrap();

    handle.server().on_disconnect(Some("broken pipe".to_string()));
    assert!(rx.recv().await.unwrap().is_err());

    eventually(|| handle.connect_count() == 2).await;
    handle.ack();

    eventually(|| {
        handle
            .parsed_writes()
            .iter()
            .any(|message| message.kind == MessageKind::Subscribe)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let subscribes = handle
        .parsed_writes()
        .iter()
        .filter(|message| message.kind == MessageKind::Subscribe)
        .count();
    assert_eq!(subscribes, 1);
}

#[tokio::test]
async fn suppresses_redundant_disconnect_errors() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let config = WebSocketTransportConfig {
        reconnection_interval: Duration::from_millis(200),
        ..Default::default()
    };
    let transport = WebSocketTransport::new(Box::new(socket), config);

    eventually(|| handle.writes().len() == 1).await;
    handle.ack();

    let (tx, mut rx) = sink();
    transport
        .send(&subscription(), OperationKind::Subscription, tx)
        .unwrap();
    eventually(|| handle.writes().len() == 2).await;

    handle.server().on_disconnect(Some("first".to_string()));
    handle.server().on_disconnect(Some("second".to_string()));

    // exactly one failure reaches the sink, the later error is only captured
    assert_eq!(
        rx.recv().await.unwrap(),
        Err(TransportError::NetworkError("first".to_string()))
    );
    eventually(|| transport.error() == Some(TransportError::NetworkError("second".to_string())))
        .await;
    assert!(rx.try_recv().is_err());

    // only the first event scheduled a retry
    eventually(|| handle.connect_count() == 2).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(handle.connect_count(), 2);
}

#[tokio::test]
async fn replies_to_server_ping_before_ack() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.writes().len() == 1).await;

    let (tx, _rx) = sink();
    transport
        .send(&subscription(), OperationKind::Subscription, tx)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    handle.server().on_text(r#"{"type":"ping"}"#.to_string());

    eventually(|| handle.writes().len() == 3).await;
    let frames = handle.parsed_writes();
    assert_eq!(frames[1].kind, MessageKind::Pong);
    // the pending subscribe was flushed by the drain even without an ack
    assert_eq!(frames[2].kind, MessageKind::Subscribe);
}

#[tokio::test]
async fn sticky_errors_fail_new_operations_fast() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let config = WebSocketTransportConfig {
        reconnect: false,
        ..test_config()
    };
    let transport = WebSocketTransport::new(Box::new(socket), config);

    eventually(|| handle.writes().len() == 1).await;
    handle.ack();
    handle.server().on_disconnect(Some("gone".to_string()));

    eventually(|| transport.error().is_some()).await;

    let (tx, mut rx) = sink();
    let id = transport.send(&subscription(), OperationKind::Subscription, tx);
    assert_eq!(id, None);
    assert_eq!(
        rx.recv().await.unwrap(),
        Err(TransportError::NetworkError("gone".to_string()))
    );
}

#[tokio::test]
async fn unsubscribe_twice_writes_a_single_stop() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.writes().len() == 1).await;
    handle.ack();

    let (tx, _rx) = sink();
    let id = transport
        .send(&subscription(), OperationKind::Subscription, tx)
        .unwrap();
    eventually(|| handle.writes().len() == 2).await;

    transport.unsubscribe(&id);
    transport.unsubscribe(&id);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stops = handle
        .parsed_writes()
        .iter()
        .filter(|message| message.kind == MessageKind::Complete)
        .count();
    assert_eq!(stops, 1);
    assert!(!transport.has_subscriber(&id));
}

#[tokio::test]
async fn close_stops_reconnection_and_clears_subscriptions() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.writes().len() == 1).await;
    handle.ack();

    let (tx, _rx) = sink();
    transport
        .send(&subscription(), OperationKind::Subscription, tx)
        .unwrap();
    eventually(|| handle.writes().len() == 2).await;

    transport.close();

    eventually(|| {
        handle
            .parsed_writes()
            .iter()
            .any(|message| message.kind == MessageKind::ConnectionTerminate)
    })
    .await;

    // a disconnect after close must not schedule a retry
    handle.server().on_disconnect(None);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handle.connect_count(), 1);
}

#[tokio::test]
async fn ignores_disconnects_from_a_superseded_connection() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.connect_count() == 1).await;
    handle.ack();

    // hold on to the first connection's listener before an internal
    // reconnect replaces it
    let stale = handle.server();

    let mut headers = HashMap::new();
    headers.insert("authorization".to_string(), "Bearer rotated".to_string());
    transport.update_headers(headers, true);

    eventually(|| handle.connect_count() == 2).await;
    eventually(|| transport.is_connected()).await;

    // the old connection finishes tearing down only now; its late disconnect
    // must neither downgrade the fresh connection nor schedule a retry
    stale.on_disconnect(None);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(transport.is_connected());
    assert_eq!(handle.connect_count(), 2);
}

#[tokio::test]
async fn resume_supersedes_a_still_closing_connection() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.connect_count() == 1).await;
    handle.ack();

    let stale = handle.server();
    transport.pause();
    eventually(|| handle.disconnects().len() == 1).await;

    transport.resume(true);
    eventually(|| handle.connect_count() == 2).await;

    // the paused connection reports its teardown only after the resume
    stale.on_disconnect(None);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(transport.is_connected());
    assert_eq!(handle.connect_count(), 2);
}

#[tokio::test]
async fn close_before_ack_sends_terminate_and_drops_staged_messages() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.writes().len() == 1).await;

    let (tx, _rx) = sink();
    transport
        .send(&subscription(), OperationKind::Subscription, tx)
        .unwrap();

    transport.close();

    eventually(|| {
        handle
            .parsed_writes()
            .iter()
            .any(|message| message.kind == MessageKind::ConnectionTerminate)
    })
    .await;

    // a late ack finds nothing staged to flush
    handle.ack();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let kinds: Vec<_> = handle
        .parsed_writes()
        .iter()
        .map(|message| message.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![MessageKind::ConnectionInit, MessageKind::ConnectionTerminate]
    );
}

#[tokio::test]
async fn pause_and_resume_drive_the_socket() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.connect_count() == 1).await;

    transport.pause();
    eventually(|| handle.disconnects() == vec![Some(Duration::from_secs(2))]).await;

    transport.resume(true);
    eventually(|| handle.connect_count() == 2).await;
}

#[tokio::test]
async fn update_headers_applies_on_the_next_connection() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let config = WebSocketTransportConfig {
        client_name: Some("analytics-dashboard".to_string()),
        client_version: Some("1.4.2".to_string()),
        ..test_config()
    };
    let transport = WebSocketTransport::new(Box::new(socket), config);

    eventually(|| handle.connect_count() == 1).await;
    {
        let snapshots = handle.connect_headers.lock().unwrap();
        assert_eq!(snapshots[0].get("graphql-client-name").unwrap(), "analytics-dashboard");
        assert_eq!(snapshots[0].get("graphql-client-version").unwrap(), "1.4.2");
    }

    let mut headers = HashMap::new();
    headers.insert("authorization".to_string(), "Bearer refreshed".to_string());
    transport.update_headers(headers, true);

    eventually(|| handle.connect_count() == 2).await;
    let snapshots = handle.connect_headers.lock().unwrap();
    assert_eq!(snapshots[1].get("authorization").unwrap(), "Bearer refreshed");
    assert_eq!(snapshots[1].get("graphql-client-name").unwrap(), "analytics-dashboard");
}

#[tokio::test]
async fn notifies_the_delegate_across_the_lifecycle() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let delegate = Arc::new(RecordingDelegate::default());
    let events = delegate.events.clone();
    let _transport = WebSocketTransport::with_policies(
        Box::new(socket),
        test_config(),
        Some(delegate),
        Arc::new(crate::policies::DefaultBodyCreator),
        Arc::new(crate::policies::SequentialIdGenerator::new()),
    );

    eventually(|| events.lock().unwrap().contains(&"connect".to_string())).await;

    handle.server().on_disconnect(Some("reset".to_string()));
    eventually(|| {
        events
            .lock()
            .unwrap()
            .contains(&"disconnect error=true".to_string())
    })
    .await;

    eventually(|| events.lock().unwrap().contains(&"reconnect".to_string())).await;

    handle.server().on_received_pong(vec![1, 2, 3]);
    eventually(|| {
        events
            .lock()
            .unwrap()
            .contains(&"pong_data len=3".to_string())
    })
    .await;
}

#[tokio::test]
async fn broadcasts_unroutable_frames_to_every_sink() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.writes().len() == 1).await;
    handle.ack();

    let (tx1, mut rx1) = sink();
    let (tx2, mut rx2) = sink();
    transport
        .send(&subscription(), OperationKind::Subscription, tx1)
        .unwrap();
    transport
        .send(&subscription(), OperationKind::Subscription, tx2)
        .unwrap();

    // an echo of an outbound kind cannot be routed to an operation
    handle
        .server()
        .on_text(r#"{"type":"subscribe","id":"9"}"#.to_string());

    assert!(matches!(
        rx1.recv().await.unwrap(),
        Err(TransportError::UnprocessedMessage(_))
    ));
    assert!(matches!(
        rx2.recv().await.unwrap(),
        Err(TransportError::UnprocessedMessage(_))
    ));

    // malformed frames broadcast a parse failure
    handle.server().on_text("not json".to_string());
    assert!(matches!(
        rx1.recv().await.unwrap(),
        Err(TransportError::ParseError(_))
    ));
}

#[tokio::test]
async fn result_frames_without_payload_report_a_dedicated_error() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.writes().len() == 1).await;
    handle.ack();

    let (tx, mut rx) = sink();
    let id = transport
        .send(&subscription(), OperationKind::Subscription, tx)
        .unwrap();

    handle
        .server()
        .on_text(format!(r#"{{"type":"next","id":"{id}"}}"#));

    assert_eq!(
        rx.recv().await.unwrap(),
        Err(TransportError::NeitherErrorNorPayloadReceived)
    );
}

#[tokio::test]
async fn forwards_native_pings_to_the_socket() {
    let (socket, handle) = MockSocket::new(Subprotocol::GraphqlTransportWs);
    let transport = WebSocketTransport::new(Box::new(socket), test_config());

    eventually(|| handle.connect_count() == 1).await;

    let completed = Arc::new(AtomicBool::new(false));
    let flag = completed.clone();
    transport.ping(
        vec![0xde, 0xad],
        Some(Box::new(move || flag.store(true, Ordering::SeqCst))),
    );

    eventually(|| completed.load(Ordering::SeqCst)).await;
    assert_eq!(handle.pings.lock().unwrap().as_slice(), &[vec![0xde, 0xad]]);
}
