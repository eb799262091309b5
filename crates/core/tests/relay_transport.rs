//! WsRelayTransport against an in-process axum WebSocket relay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use amt_session::gateway::AuthToken;
use amt_session::hotkey::Encoding;
use amt_session::transport::{RelayTarget, RelayTransport, TransportStatus, WsRelayTransport, relay_url};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use url::Url;

const TOKEN: &str = "relay-jwt";

#[derive(Clone)]
struct Relay {
	/// Close right after the greeting instead of waiting for the client.
	hang_up: bool,
	protocols: Arc<Mutex<Vec<String>>>,
	queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl Relay {
	fn new(hang_up: bool) -> Self {
		Self {
			hang_up,
			protocols: Arc::default(),
			queries: Arc::default(),
		}
	}
}

async fn upgrade(State(relay): State<Relay>, headers: HeaderMap, Query(query): Query<HashMap<String, String>>, ws: WebSocketUpgrade) -> Response {
	if let Some(protocol) = headers.get("sec-websocket-protocol").and_then(|v| v.to_str().ok()) {
		relay.protocols.lock().push(protocol.to_string());
	}
	relay.queries.lock().push(query);
	let hang_up = relay.hang_up;
	ws.protocols([TOKEN]).on_upgrade(move |socket| session(socket, hang_up))
}

async fn session(mut socket: WebSocket, hang_up: bool) {
	if socket.send(Message::Binary(vec![0x01, 0x02, 0x03].into())).await.is_err() {
		return;
	}
	if hang_up {
		let _ = socket.send(Message::Close(None)).await;
		return;
	}
	while let Some(Ok(message)) = socket.recv().await {
		if matches!(message, Message::Close(_)) {
			break;
		}
	}
}

async fn serve(relay: Relay) -> Url {
	let app = Router::new().route("/relay/webrelay.ashx", get(upgrade)).with_state(relay);
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	Url::parse(&format!("http://{addr}/")).unwrap()
}

fn target(gateway: &Url) -> RelayTarget {
	RelayTarget {
		url: relay_url(gateway, "dev-7").unwrap(),
		token: AuthToken::new(TOKEN),
		device: "dev-7".into(),
		encoding: Encoding::Rle16,
	}
}

async fn next_status(rx: &mut mpsc::UnboundedReceiver<TransportStatus>) -> TransportStatus {
	tokio::time::timeout(Duration::from_secs(5), rx.recv())
		.await
		.expect("status in time")
		.expect("status channel open")
}

#[tokio::test]
async fn connects_with_token_subprotocol_and_relay_query() {
	let relay = Relay::new(false);
	let gateway = serve(relay.clone()).await;
	let transport = WsRelayTransport::new();
	let (tx, mut rx) = mpsc::unbounded_channel();

	transport.connect(target(&gateway), tx).await.unwrap();
	assert_eq!(next_status(&mut rx).await, TransportStatus::Connecting);
	assert_eq!(next_status(&mut rx).await, TransportStatus::Connected);
	assert!(transport.is_open());

	assert_eq!(relay.protocols.lock().clone(), vec![TOKEN.to_string()]);
	let query = relay.queries.lock()[0].clone();
	assert_eq!(query.get("host").map(String::as_str), Some("dev-7"));
	assert_eq!(query.get("port").map(String::as_str), Some("16994"));
	assert_eq!(query.get("mode").map(String::as_str), Some("kvm"));

	transport.disconnect().await;
	assert_eq!(next_status(&mut rx).await, TransportStatus::Disconnected);
	assert!(!transport.is_open());
}

#[tokio::test]
async fn server_hang_up_reports_disconnected() {
	let gateway = serve(Relay::new(true)).await;
	let transport = WsRelayTransport::new();
	let (tx, mut rx) = mpsc::unbounded_channel();

	transport.connect(target(&gateway), tx).await.unwrap();
	assert_eq!(next_status(&mut rx).await, TransportStatus::Connecting);
	assert_eq!(next_status(&mut rx).await, TransportStatus::Connected);
	assert_eq!(next_status(&mut rx).await, TransportStatus::Disconnected);
	assert_eq!(transport.bytes_received(), 3);
}

#[tokio::test]
async fn refused_connection_fails_after_connecting() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	drop(listener);

	let transport = WsRelayTransport::new();
	let (tx, mut rx) = mpsc::unbounded_channel();
	let gateway = Url::parse(&format!("http://{addr}/")).unwrap();

	let err = transport.connect(target(&gateway), tx).await.unwrap_err();
	assert!(matches!(err, amt_session::SessionError::Transport(_)));
	assert_eq!(next_status(&mut rx).await, TransportStatus::Connecting);
	assert_eq!(next_status(&mut rx).await, TransportStatus::Disconnected);
}
