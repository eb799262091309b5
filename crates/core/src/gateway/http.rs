//! reqwest-backed [`DeviceGateway`].

use std::time::Duration;

use amt_protocol::{
	ActionResponse, AmtFeatures, AmtFeaturesRequest, DisplayInfo, DisplaySelectionRequest, DisplaySelectionResponse, PowerActionRequest,
	PowerStateResponse, RedirectionStatus, TokenResponse, UserConsentCodeRequest,
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::{AuthToken, DeviceGateway};
use crate::error::{Result, SessionError};
use crate::power::{PowerAction, PowerState};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpGatewayBuilder {
	base_url: Url,
	bearer: Option<AuthToken>,
	timeout: Duration,
	accept_invalid_certs: bool,
}

impl HttpGatewayBuilder {
	pub fn new(base_url: Url) -> Self {
		Self {
			base_url,
			bearer: None,
			timeout: DEFAULT_TIMEOUT,
			accept_invalid_certs: false,
		}
	}

	/// Bearer token sent with every request.
	pub fn bearer(mut self, token: Option<AuthToken>) -> Self {
		self.bearer = token;
		self
	}

	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
		self.accept_invalid_certs = accept;
		self
	}

	pub fn build(self) -> Result<HttpGateway> {
		if self.base_url.cannot_be_a_base() {
			return Err(SessionError::InvalidInput(format!("gateway URL cannot be a base: {}", self.base_url)));
		}
		let client = reqwest::Client::builder()
			.timeout(self.timeout)
			.danger_accept_invalid_certs(self.accept_invalid_certs)
			.build()
			.map_err(|e| SessionError::remote("build HTTP client", e))?;
		Ok(HttpGateway {
			client,
			base_url: self.base_url,
			bearer: self.bearer,
		})
	}
}

/// Device gateway over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpGateway {
	client: reqwest::Client,
	base_url: Url,
	bearer: Option<AuthToken>,
}

impl HttpGateway {
	pub fn builder(base_url: Url) -> HttpGatewayBuilder {
		HttpGatewayBuilder::new(base_url)
	}

	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	fn endpoint(&self, device: &str, tail: &[&str]) -> Url {
		let mut url = self.base_url.clone();
		// checked in build()
		if let Ok(mut segments) = url.path_segments_mut() {
			segments.pop_if_empty().push("devices").push(device).extend(tail);
		}
		url
	}

	fn request(&self, method: Method, url: Url) -> RequestBuilder {
		let request = self.client.request(method, url);
		match &self.bearer {
			Some(token) => request.bearer_auth(token.expose()),
			None => request,
		}
	}

	async fn execute(&self, operation: &'static str, request: RequestBuilder) -> Result<reqwest::Response> {
		let response = request.send().await.map_err(|e| SessionError::remote(operation, e))?;
		let status = response.status();
		debug!(target = "amt.gateway", operation, status = status.as_u16(), url = %response.url(), "gateway response");
		if status.is_success() {
			return Ok(response);
		}
		let body = response.text().await.unwrap_or_default();
		Err(SessionError::from_status(operation, status.as_u16(), &body))
	}

	async fn fetch<T: DeserializeOwned>(&self, operation: &'static str, request: RequestBuilder) -> Result<T> {
		let response = self.execute(operation, request).await?;
		let bytes = response.bytes().await.map_err(|e| SessionError::remote(operation, e))?;
		Ok(serde_json::from_slice(&bytes)?)
	}
}

#[async_trait]
impl DeviceGateway for HttpGateway {
	async fn power_state(&self, device: &str) -> Result<PowerState> {
		let url = self.endpoint(device, &["power"]);
		let response: PowerStateResponse = self.fetch("power state", self.request(Method::GET, url)).await?;
		Ok(PowerState::from_gateway_code(response.powerstate))
	}

	async fn power_action(&self, device: &str, action: PowerAction) -> Result<ActionResponse> {
		let url = self.endpoint(device, &["power"]);
		let body = PowerActionRequest { action: action.code() };
		self.fetch("power action", self.request(Method::POST, url).json(&body)).await
	}

	async fn redirection_status(&self, device: &str) -> Result<RedirectionStatus> {
		let url = self.endpoint(device, &["redirection"]);
		self.fetch("redirection status", self.request(Method::GET, url)).await
	}

	async fn features(&self, device: &str) -> Result<AmtFeatures> {
		let url = self.endpoint(device, &["features"]);
		self.fetch("features", self.request(Method::GET, url)).await
	}

	async fn set_features(&self, device: &str, request: &AmtFeaturesRequest) -> Result<AmtFeatures> {
		let url = self.endpoint(device, &["features"]);
		self.fetch("set features", self.request(Method::POST, url).json(request)).await
	}

	async fn relay_token(&self, device: &str) -> Result<AuthToken> {
		let url = self.endpoint(device, &["token"]);
		let response: TokenResponse = self.fetch("relay token", self.request(Method::GET, url)).await?;
		Ok(AuthToken::new(response.token))
	}

	async fn displays(&self, device: &str) -> Result<Vec<DisplayInfo>> {
		let url = self.endpoint(device, &["displays"]);
		let response: DisplaySelectionResponse = self.fetch("displays", self.request(Method::GET, url)).await?;
		Ok(response.displays)
	}

	async fn select_display(&self, device: &str, index: u32) -> Result<()> {
		let url = self.endpoint(device, &["displays"]);
		let body = DisplaySelectionRequest { display_index: index };
		self.execute("select display", self.request(Method::POST, url).json(&body)).await?;
		Ok(())
	}

	async fn request_consent_code(&self, device: &str) -> Result<ActionResponse> {
		let url = self.endpoint(device, &["consent"]);
		self.fetch("request consent code", self.request(Method::POST, url)).await
	}

	async fn submit_consent_code(&self, device: &str, code: &str) -> Result<ActionResponse> {
		let url = self.endpoint(device, &["consent", "code"]);
		let body = UserConsentCodeRequest {
			consent_code: code.to_string(),
		};
		self.fetch("submit consent code", self.request(Method::POST, url).json(&body)).await
	}

	async fn cancel_consent_code(&self, device: &str) -> Result<()> {
		let url = self.endpoint(device, &["consent"]);
		self.execute("cancel consent code", self.request(Method::DELETE, url)).await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn endpoint_escapes_device_id_and_keeps_base_path() {
		let gateway = HttpGateway::builder(Url::parse("https://gw.example/mps/api/v1/amt/").unwrap())
			.build()
			.unwrap();
		let url = gateway.endpoint("a b/c", &["consent", "code"]);
		assert_eq!(url.as_str(), "https://gw.example/mps/api/v1/amt/devices/a%20b%2Fc/consent/code");
	}

	#[test]
	fn opaque_base_is_rejected() {
		let err = HttpGateway::builder(Url::parse("mailto:ops@example.com").unwrap()).build().unwrap_err();
		assert!(matches!(err, SessionError::InvalidInput(_)));
	}
}
