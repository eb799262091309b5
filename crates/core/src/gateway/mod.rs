//! Device gateway seam.
//!
//! [`DeviceGateway`] is the set of `/devices/{id}/...` calls the session layer
//! makes. [`HttpGateway`] talks to a real gateway; tests use
//! [`crate::fake::FakeGateway`].

mod http;

use amt_protocol::{ActionResponse, AmtFeatures, AmtFeaturesRequest, DisplayInfo, RedirectionStatus};
use async_trait::async_trait;

pub use http::{HttpGateway, HttpGatewayBuilder};

use crate::error::Result;
use crate::power::{PowerAction, PowerState};

/// Relay bearer token.
///
/// Held only in memory for the lifetime of one session; `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
	pub fn new(token: impl Into<String>) -> Self {
		Self(token.into())
	}

	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Debug for AuthToken {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("AuthToken(<redacted>)")
	}
}

#[async_trait]
pub trait DeviceGateway: Send + Sync {
	async fn power_state(&self, device: &str) -> Result<PowerState>;

	async fn power_action(&self, device: &str, action: PowerAction) -> Result<ActionResponse>;

	async fn redirection_status(&self, device: &str) -> Result<RedirectionStatus>;

	async fn features(&self, device: &str) -> Result<AmtFeatures>;

	/// Applies a feature change. The returned body is the gateway's
	/// acknowledgement and is not guaranteed to carry the full feature set.
	async fn set_features(&self, device: &str, request: &AmtFeaturesRequest) -> Result<AmtFeatures>;

	async fn relay_token(&self, device: &str) -> Result<AuthToken>;

	async fn displays(&self, device: &str) -> Result<Vec<DisplayInfo>>;

	async fn select_display(&self, device: &str, index: u32) -> Result<()>;

	/// Asks the device to show a user-consent code on its local screen.
	async fn request_consent_code(&self, device: &str) -> Result<ActionResponse>;

	async fn submit_consent_code(&self, device: &str, code: &str) -> Result<ActionResponse>;

	/// Withdraws an outstanding consent code.
	async fn cancel_consent_code(&self, device: &str) -> Result<()>;
}
