//! Redfish client for `ComputerSystem` power state and reset.
//!
//! Authenticates with HTTP Basic by default, or with a Redfish session
//! (`X-Auth-Token`) when configured. Error bodies in the standard
//! `{"error": {"@Message.ExtendedInfo": [...]}}` envelope surface as
//! [`SessionError::Validation`] details.

use std::time::Duration;

use amt_protocol::{AUTH_TOKEN_HEADER, ComputerSystem, ResetRequest, ResetType, SessionLoginRequest, Task};
use parking_lot::Mutex;
use reqwest::{Method, RequestBuilder, StatusCode, header};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, SessionError};
use crate::gateway::AuthToken;
use crate::power::PowerState;

const SESSIONS_PATH: &[&str] = &["redfish", "v1", "SessionService", "Sessions"];

#[derive(Clone)]
pub struct Credentials {
	pub username: String,
	pub password: String,
}

impl std::fmt::Debug for Credentials {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Credentials")
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.finish()
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
	#[default]
	Basic,
	Session,
}

#[derive(Debug)]
struct RedfishSession {
	token: AuthToken,
	location: Option<String>,
}

/// Result of an accepted `ComputerSystem.Reset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetAccepted {
	/// `Location` header, normally under `/redfish/v1/TaskService/Tasks/`.
	pub location: Option<String>,
	pub task: Option<Task>,
}

pub struct RedfishClientBuilder {
	base_url: Url,
	credentials: Option<Credentials>,
	auth_mode: AuthMode,
	timeout: Duration,
	accept_invalid_certs: bool,
}

impl RedfishClientBuilder {
	pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
		self.credentials = Some(Credentials {
			username: username.into(),
			password: password.into(),
		});
		self
	}

	pub fn auth_mode(mut self, mode: AuthMode) -> Self {
		self.auth_mode = mode;
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

	pub fn build(self) -> Result<RedfishClient> {
		if self.base_url.cannot_be_a_base() {
			return Err(SessionError::InvalidInput(format!("Redfish URL cannot be a base: {}", self.base_url)));
		}
		let client = reqwest::Client::builder()
			.timeout(self.timeout)
			.danger_accept_invalid_certs(self.accept_invalid_certs)
			.build()
			.map_err(|e| SessionError::remote("build HTTP client", e))?;
		Ok(RedfishClient {
			client,
			base_url: self.base_url,
			credentials: self.credentials,
			auth_mode: self.auth_mode,
			session: Mutex::new(None),
		})
	}
}

pub struct RedfishClient {
	client: reqwest::Client,
	base_url: Url,
	credentials: Option<Credentials>,
	auth_mode: AuthMode,
	session: Mutex<Option<RedfishSession>>,
}

impl RedfishClient {
	pub fn builder(base_url: Url) -> RedfishClientBuilder {
		RedfishClientBuilder {
			base_url,
			credentials: None,
			auth_mode: AuthMode::Basic,
			timeout: Duration::from_secs(30),
			accept_invalid_certs: false,
		}
	}

	pub fn auth_mode(&self) -> AuthMode {
		self.auth_mode
	}

	pub fn has_session(&self) -> bool {
		self.session.lock().is_some()
	}

	/// Opens a Redfish session and keeps its token for later requests.
	pub async fn login(&self) -> Result<()> {
		let credentials = self
			.credentials
			.as_ref()
			.ok_or_else(|| SessionError::InvalidInput("Redfish session login requires credentials".into()))?;
		let body = SessionLoginRequest {
			user_name: credentials.username.clone(),
			password: credentials.password.clone(),
		};
		let request = self.client.post(self.url(SESSIONS_PATH)).json(&body);
		let response = self.execute("session login", request).await?;

		let token = header_str(&response, AUTH_TOKEN_HEADER)
			.ok_or_else(|| SessionError::Auth {
				operation: "session login",
				message: format!("response carried no {AUTH_TOKEN_HEADER} header"),
			})?
			.to_string();
		let location = header_str(&response, header::LOCATION.as_str()).map(str::to_string);
		info!(target = "amt.redfish", location = location.as_deref().unwrap_or(""), "Redfish session opened");
		*self.session.lock() = Some(RedfishSession {
			token: AuthToken::new(token),
			location,
		});
		Ok(())
	}

	/// Deletes the current session, if any.
	pub async fn logout(&self) -> Result<()> {
		let session = self.session.lock().take();
		let Some(session) = session else {
			return Ok(());
		};
		let Some(location) = session.location else {
			debug!(target = "amt.redfish", "session had no Location; nothing to delete");
			return Ok(());
		};
		let url = self
			.base_url
			.join(&location)
			.map_err(|e| SessionError::InvalidInput(format!("invalid session location {location}: {e}")))?;
		let request = self.client.delete(url).header(AUTH_TOKEN_HEADER, session.token.expose());
		self.execute("session logout", request).await?;
		info!(target = "amt.redfish", "Redfish session closed");
		Ok(())
	}

	pub async fn system(&self, system_id: &str) -> Result<ComputerSystem> {
		validate_system_id(system_id)?;
		let url = self.url(&["redfish", "v1", "Systems", system_id]);
		self.fetch("get system", self.authorized(Method::GET, url)).await
	}

	pub async fn power_state(&self, system_id: &str) -> Result<PowerState> {
		let system = self.system(system_id).await?;
		let raw = system.power_state.ok_or_else(|| SessionError::RemoteCall {
			operation: "get system",
			status: None,
			message: "ComputerSystem has no PowerState".into(),
		})?;
		Ok(PowerState::from_redfish(&raw))
	}

	/// Issues `ComputerSystem.Reset`; success means the service accepted it.
	pub async fn reset(&self, system_id: &str, reset_type: ResetType) -> Result<ResetAccepted> {
		validate_system_id(system_id)?;
		let url = self.url(&["redfish", "v1", "Systems", system_id, "Actions", "ComputerSystem.Reset"]);
		let request = self.authorized(Method::POST, url).json(&ResetRequest { reset_type });
		let response = self.execute("reset", request).await?;

		let status = response.status();
		if status != StatusCode::ACCEPTED {
			warn!(target = "amt.redfish", system_id, %reset_type, status = status.as_u16(), "reset succeeded without 202 Accepted");
		}
		let location = header_str(&response, header::LOCATION.as_str()).map(str::to_string);
		let bytes = response.bytes().await.map_err(|e| SessionError::remote("reset", e))?;
		let task = serde_json::from_slice::<Task>(&bytes).ok();
		info!(target = "amt.redfish", system_id, %reset_type, location = location.as_deref().unwrap_or(""), "reset accepted");
		Ok(ResetAccepted { location, task })
	}

	fn url(&self, segments: &[&str]) -> Url {
		let mut url = self.base_url.clone();
		// checked in build()
		if let Ok(mut path) = url.path_segments_mut() {
			path.pop_if_empty().extend(segments);
		}
		url
	}

	fn authorized(&self, method: Method, url: Url) -> RequestBuilder {
		let request = self.client.request(method, url);
		if let Some(session) = self.session.lock().as_ref() {
			return request.header(AUTH_TOKEN_HEADER, session.token.expose());
		}
		match &self.credentials {
			Some(credentials) => request.basic_auth(&credentials.username, Some(&credentials.password)),
			None => request,
		}
	}

	async fn execute(&self, operation: &'static str, request: RequestBuilder) -> Result<reqwest::Response> {
		let response = request.send().await.map_err(|e| SessionError::remote(operation, e))?;
		let status = response.status();
		debug!(target = "amt.redfish", operation, status = status.as_u16(), "Redfish response");
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

fn header_str<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
	response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Rejects system ids that are not a hyphenated UUID.
pub fn validate_system_id(id: &str) -> Result<()> {
	let groups: Vec<&str> = id.split('-').collect();
	let lengths = [8, 4, 4, 4, 12];
	let valid = groups.len() == lengths.len()
		&& groups
			.iter()
			.zip(lengths)
			.all(|(group, len)| group.len() == len && group.chars().all(|c| c.is_ascii_hexdigit()));
	if valid {
		Ok(())
	} else {
		Err(SessionError::InvalidInput(format!("system id must be a UUID: {id}")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn system_ids_must_be_uuids() {
		assert!(validate_system_id("4c4c4544-0035-5910-8031-c2c04f4a4b33").is_ok());
		assert!(validate_system_id("4C4C4544-0035-5910-8031-C2C04F4A4B33").is_ok());
		assert!(validate_system_id("not-a-valid-uuid").is_err());
		assert!(validate_system_id("4c4c4544-0035-5910-8031-c2c04f4a4b3").is_err());
		assert!(validate_system_id("").is_err());
	}

	#[test]
	fn urls_are_rooted_at_base() {
		let client = RedfishClient::builder(Url::parse("https://bmc.example:8181/").unwrap()).build().unwrap();
		assert_eq!(
			client.url(&["redfish", "v1", "Systems", "x", "Actions", "ComputerSystem.Reset"]).as_str(),
			"https://bmc.example:8181/redfish/v1/Systems/x/Actions/ComputerSystem.Reset"
		);
	}

	#[test]
	fn credentials_debug_hides_password() {
		let credentials = Credentials {
			username: "standalone".into(),
			password: "hunter2".into(),
		};
		assert!(!format!("{credentials:?}").contains("hunter2"));
	}
}
