//! Relay transport seam and the WebSocket implementation.
//!
//! The relay stream itself is opaque here: the transport opens it with the
//! session token, keeps it alive, and reports status changes on a channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, SessionError};
use crate::gateway::AuthToken;
use crate::hotkey::Encoding;

/// AMT redirection port the relay forwards to.
pub const REDIRECTION_PORT: u16 = 16994;

/// Relay connection status, numbered as the relay reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportStatus {
	Disconnected,
	Connecting,
	Connected,
}

impl TransportStatus {
	pub fn code(self) -> i32 {
		match self {
			TransportStatus::Disconnected => 0,
			TransportStatus::Connecting => 1,
			TransportStatus::Connected => 2,
		}
	}

	pub fn from_code(code: i32) -> Option<Self> {
		match code {
			0 => Some(TransportStatus::Disconnected),
			1 => Some(TransportStatus::Connecting),
			2 => Some(TransportStatus::Connected),
			_ => None,
		}
	}
}

/// Everything a transport needs to open one relay stream.
#[derive(Debug, Clone)]
pub struct RelayTarget {
	pub url: Url,
	pub token: AuthToken,
	pub device: String,
	pub encoding: Encoding,
}

/// Derives the relay endpoint for `device` from the gateway base URL.
///
/// `http(s)` becomes `ws(s)`; gateways routed through `/mps` expose the relay
/// at `/ws/relay`, others at `/relay`.
pub fn relay_url(gateway: &Url, device: &str) -> Result<Url> {
	let base = gateway.as_str().trim_end_matches('/');
	let ws_base = if let Some(rest) = base.strip_prefix("https") {
		format!("wss{rest}")
	} else if let Some(rest) = base.strip_prefix("http") {
		format!("ws{rest}")
	} else {
		return Err(SessionError::InvalidInput(format!("gateway URL must be http(s): {gateway}")));
	};
	let relay = if gateway.path().contains("/mps") { "/ws/relay" } else { "/relay" };

	let mut url = Url::parse(&format!("{ws_base}{relay}/webrelay.ashx"))
		.map_err(|e| SessionError::InvalidInput(format!("invalid relay URL derived from {gateway}: {e}")))?;
	url.set_query(None);
	url.query_pairs_mut()
		.append_pair("p", "2")
		.append_pair("host", device)
		.append_pair("port", &REDIRECTION_PORT.to_string())
		.append_pair("tls", "0")
		.append_pair("tls1only", "0")
		.append_pair("mode", "kvm");
	Ok(url)
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
	/// Opens the relay stream. Status changes, including the final
	/// `Disconnected`, are sent on `status`.
	async fn connect(&self, target: RelayTarget, status: mpsc::UnboundedSender<TransportStatus>) -> Result<()>;

	async fn disconnect(&self);
}

struct ActiveStream {
	shutdown: oneshot::Sender<()>,
	task: JoinHandle<()>,
}

/// [`RelayTransport`] over tokio-tungstenite, token in `Sec-WebSocket-Protocol`.
#[derive(Default)]
pub struct WsRelayTransport {
	active: Mutex<Option<ActiveStream>>,
	bytes_received: Arc<AtomicU64>,
}

impl WsRelayTransport {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn bytes_received(&self) -> u64 {
		self.bytes_received.load(Ordering::Relaxed)
	}

	pub fn is_open(&self) -> bool {
		self.active.lock().as_ref().is_some_and(|active| !active.task.is_finished())
	}
}

#[async_trait]
impl RelayTransport for WsRelayTransport {
	async fn connect(&self, target: RelayTarget, status: mpsc::UnboundedSender<TransportStatus>) -> Result<()> {
		self.disconnect().await;

		let mut request = target
			.url
			.as_str()
			.into_client_request()
			.map_err(|e| SessionError::Transport(e.to_string()))?;
		let protocol = HeaderValue::from_str(target.token.expose()).map_err(|e| SessionError::Transport(format!("invalid relay token: {e}")))?;
		request.headers_mut().insert("Sec-WebSocket-Protocol", protocol);

		let _ = status.send(TransportStatus::Connecting);
		info!(target = "amt.session", device = %target.device, url = %target.url, "opening relay stream");
		let (stream, _) = match tokio_tungstenite::connect_async(request).await {
			Ok(connected) => connected,
			Err(err) => {
				let _ = status.send(TransportStatus::Disconnected);
				return Err(SessionError::Transport(err.to_string()));
			}
		};
		let _ = status.send(TransportStatus::Connected);

		let (mut writer, mut reader) = stream.split();
		let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
		let bytes = Arc::clone(&self.bytes_received);
		let device = target.device.clone();

		let task = tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = &mut shutdown_rx => {
						let _ = writer.send(Message::Close(None)).await;
						break;
					}
					frame = reader.next() => match frame {
						Some(Ok(Message::Close(_))) | None => break,
						Some(Ok(message)) => {
							bytes.fetch_add(message.len() as u64, Ordering::Relaxed);
						}
						Some(Err(err)) => {
							warn!(target = "amt.session", device = %device, error = %err, "relay stream error");
							break;
						}
					},
				}
			}
			debug!(target = "amt.session", device = %device, "relay stream closed");
			let _ = status.send(TransportStatus::Disconnected);
		});

		*self.active.lock() = Some(ActiveStream { shutdown: shutdown_tx, task });
		Ok(())
	}

	async fn disconnect(&self) {
		let active = self.active.lock().take();
		if let Some(active) = active {
			let _ = active.shutdown.send(());
			let _ = active.task.await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn relay_url_swaps_scheme_and_adds_query() {
		let url = relay_url(&Url::parse("https://gw.example:8443").unwrap(), "dev-1").unwrap();
		assert_eq!(
			url.as_str(),
			"wss://gw.example:8443/relay/webrelay.ashx?p=2&host=dev-1&port=16994&tls=0&tls1only=0&mode=kvm"
		);
	}

	#[test]
	fn mps_route_uses_ws_relay() {
		let url = relay_url(&Url::parse("http://gw.example/mps/").unwrap(), "dev").unwrap();
		assert!(url.as_str().starts_with("ws://gw.example/mps/ws/relay/webrelay.ashx?"));
	}

	#[test]
	fn status_codes_follow_relay_numbering() {
		assert_eq!(TransportStatus::from_code(2), Some(TransportStatus::Connected));
		assert_eq!(TransportStatus::Disconnected.code(), 0);
		assert_eq!(TransportStatus::from_code(7), None);
	}
}
