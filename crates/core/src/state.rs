//! Session lifecycle states.

use serde::Serialize;

/// Lifecycle of a redirection session.
///
/// Created `Idle`; the precondition steps move it through the `Checking*` and
/// `Awaiting*` states; it rests at `Connected` until closed or at `Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	#[default]
	Idle,
	CheckingPower,
	AwaitingPowerOnConsent,
	CheckingRedirectionConflict,
	CheckingFeatures,
	AwaitingEnableConsent,
	AwaitingUserConsent,
	Connecting,
	Connected,
	Disconnecting,
	Failed,
}

impl SessionState {
	/// States from which a new `open` may start.
	pub fn is_restartable(self) -> bool {
		matches!(self, SessionState::Idle | SessionState::Failed)
	}

	/// States in which the relay transport may hold a live stream.
	pub fn has_transport(self) -> bool {
		matches!(self, SessionState::Connecting | SessionState::Connected)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			SessionState::Idle => "idle",
			SessionState::CheckingPower => "checking_power",
			SessionState::AwaitingPowerOnConsent => "awaiting_power_on_consent",
			SessionState::CheckingRedirectionConflict => "checking_redirection_conflict",
			SessionState::CheckingFeatures => "checking_features",
			SessionState::AwaitingEnableConsent => "awaiting_enable_consent",
			SessionState::AwaitingUserConsent => "awaiting_user_consent",
			SessionState::Connecting => "connecting",
			SessionState::Connected => "connected",
			SessionState::Disconnecting => "disconnecting",
			SessionState::Failed => "failed",
		}
	}
}

impl std::fmt::Display for SessionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}
