//! Operator consent negotiation.
//!
//! All three confirmations the session needs (power up, enable KVM, enter the
//! code shown on the device) are asked through one [`ConsentPrompt`]. A prompt
//! that is closed without an answer, or that outlives the configured reply
//! timeout, resolves to [`ConsentReply::Dismissed`].

use std::sync::Arc;
use std::time::Duration;

use amt_protocol::{ActionResponse, AmtFeatures, AmtFeaturesRequest};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::gateway::DeviceGateway;
use crate::power::PowerAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentKind {
	PowerUp,
	EnableKvm,
	UserConsentCode,
}

impl std::fmt::Display for ConsentKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			ConsentKind::PowerUp => "power-up",
			ConsentKind::EnableKvm => "KVM enablement",
			ConsentKind::UserConsentCode => "user consent code",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentReply {
	Accepted,
	/// Code typed by the operator for [`ConsentKind::UserConsentCode`].
	Code(String),
	Dismissed,
}

impl ConsentReply {
	pub fn is_accepted(&self) -> bool {
		match self {
			ConsentReply::Accepted => true,
			ConsentReply::Code(code) => !code.trim().is_empty(),
			ConsentReply::Dismissed => false,
		}
	}
}

#[async_trait]
pub trait ConsentPrompt: Send + Sync {
	async fn ask(&self, kind: ConsentKind) -> ConsentReply;
}

/// Prompt for non-interactive use: every question is dismissed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DismissAll;

#[async_trait]
impl ConsentPrompt for DismissAll {
	async fn ask(&self, _kind: ConsentKind) -> ConsentReply {
		ConsentReply::Dismissed
	}
}

/// Runs the consent exchanges against a device.
#[derive(Clone)]
pub struct ConsentNegotiator {
	gateway: Arc<dyn DeviceGateway>,
	prompt: Arc<dyn ConsentPrompt>,
	reply_timeout: Option<Duration>,
}

impl ConsentNegotiator {
	pub fn new(gateway: Arc<dyn DeviceGateway>, prompt: Arc<dyn ConsentPrompt>) -> Self {
		Self {
			gateway,
			prompt,
			reply_timeout: None,
		}
	}

	pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.reply_timeout = timeout;
		self
	}

	pub async fn ask(&self, kind: ConsentKind) -> ConsentReply {
		let reply = match self.reply_timeout {
			Some(limit) => match tokio::time::timeout(limit, self.prompt.ask(kind)).await {
				Ok(reply) => reply,
				Err(_) => {
					debug!(target = "amt.session", %kind, ?limit, "consent prompt timed out");
					ConsentReply::Dismissed
				}
			},
			None => self.prompt.ask(kind).await,
		};
		debug!(target = "amt.session", %kind, accepted = reply.is_accepted(), "consent reply");
		reply
	}

	/// Asks to power the device up and, if accepted, sends `PowerUp`.
	pub async fn confirm_power_up(&self, device: &str) -> Result<()> {
		if !self.ask(ConsentKind::PowerUp).await.is_accepted() {
			return Err(SessionError::UserDeclined(ConsentKind::PowerUp));
		}
		let response = self.gateway.power_action(device, PowerAction::PowerUp).await?;
		check_return_value("power up", &response)?;
		info!(target = "amt.session", device, "power-up requested");
		Ok(())
	}

	/// Asks to enable KVM redirection and, if accepted, submits `request`.
	///
	/// Returns the device's feature set read back after the write; the write
	/// acknowledgement itself may be partial.
	///
	/// A decline withdraws any outstanding consent code before reporting
	/// [`SessionError::UserDeclined`]; a failed withdrawal is only logged.
	pub async fn confirm_enable_kvm(&self, device: &str, request: &AmtFeaturesRequest) -> Result<AmtFeatures> {
		if !self.ask(ConsentKind::EnableKvm).await.is_accepted() {
			self.withdraw_code(device).await;
			return Err(SessionError::UserDeclined(ConsentKind::EnableKvm));
		}
		self.gateway.set_features(device, request).await?;
		let features = self.gateway.features(device).await?;
		info!(target = "amt.session", device, kvm = features.kvm, "KVM redirection enabled");
		Ok(features)
	}

	/// Requests a consent code on the device screen, collects it from the
	/// operator and submits it.
	pub async fn negotiate_user_consent(&self, device: &str) -> Result<()> {
		let requested = self.gateway.request_consent_code(device).await?;
		check_return_value("request consent code", &requested)?;

		let code = match self.ask(ConsentKind::UserConsentCode).await {
			ConsentReply::Code(code) if !code.trim().is_empty() => code,
			_ => {
				self.withdraw_code(device).await;
				return Err(SessionError::UserDeclined(ConsentKind::UserConsentCode));
			}
		};

		let submitted = self.gateway.submit_consent_code(device, code.trim()).await?;
		if let Some(body) = submitted.body.as_ref().filter(|body| body.return_value != 0) {
			warn!(
				target = "amt.session",
				device,
				return_value = body.return_value,
				status = body.return_value_str.as_deref().unwrap_or(""),
				"consent code rejected"
			);
			self.withdraw_code(device).await;
			return Err(SessionError::UserDeclined(ConsentKind::UserConsentCode));
		}
		info!(target = "amt.session", device, "user consent granted");
		Ok(())
	}

	async fn withdraw_code(&self, device: &str) {
		if let Err(err) = self.gateway.cancel_consent_code(device).await {
			warn!(target = "amt.session", device, error = %err, "failed to cancel consent code");
		}
	}
}

fn check_return_value(operation: &'static str, response: &ActionResponse) -> Result<()> {
	match &response.body {
		Some(body) if body.return_value != 0 => Err(SessionError::rejected(operation, body)),
		_ => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fake::{FakeGateway, GatewayCall, ScriptedPrompt};

	fn negotiator(gateway: &Arc<FakeGateway>, prompt: ScriptedPrompt) -> ConsentNegotiator {
		ConsentNegotiator::new(gateway.clone(), Arc::new(prompt))
	}

	#[tokio::test]
	async fn power_up_accepted_sends_action_two() {
		let gateway = Arc::new(FakeGateway::new());
		let consent = negotiator(&gateway, ScriptedPrompt::new().reply(ConsentKind::PowerUp, ConsentReply::Accepted));

		consent.confirm_power_up("dev").await.unwrap();
		assert_eq!(gateway.calls(), vec![GatewayCall::PowerAction(2)]);
	}

	#[tokio::test]
	async fn enable_kvm_dismissed_cancels_consent_code() {
		let gateway = Arc::new(FakeGateway::new());
		let consent = negotiator(&gateway, ScriptedPrompt::new());

		let err = consent.confirm_enable_kvm("dev", &AmtFeaturesRequest::default()).await.unwrap_err();
		assert!(matches!(err, SessionError::UserDeclined(ConsentKind::EnableKvm)));
		assert_eq!(gateway.calls(), vec![GatewayCall::CancelConsentCode]);
	}

	#[tokio::test]
	async fn accepted_enablement_reads_features_back() {
		let gateway = Arc::new(
			FakeGateway::new()
				.with_features(AmtFeatures {
					kvm_available: true,
					user_consent: "none".into(),
					..AmtFeatures::default()
				})
				.with_features_ack(AmtFeatures::default()),
		);
		let consent = negotiator(&gateway, ScriptedPrompt::new().reply(ConsentKind::EnableKvm, ConsentReply::Accepted));
		let request = AmtFeaturesRequest {
			user_consent: "none".into(),
			enable_kvm: true,
			..AmtFeaturesRequest::default()
		};

		let features = consent.confirm_enable_kvm("dev", &request).await.unwrap();

		assert!(features.kvm && features.kvm_available);
		assert_eq!(features.user_consent, "none");
		assert_eq!(gateway.calls(), vec![GatewayCall::SetFeatures(request), GatewayCall::Features]);
	}

	#[tokio::test]
	async fn user_consent_code_is_submitted_trimmed() {
		let gateway = Arc::new(FakeGateway::new());
		let consent = negotiator(
			&gateway,
			ScriptedPrompt::new().reply(ConsentKind::UserConsentCode, ConsentReply::Code(" 123456 ".into())),
		);

		consent.negotiate_user_consent("dev").await.unwrap();
		assert_eq!(
			gateway.calls(),
			vec![GatewayCall::RequestConsentCode, GatewayCall::SubmitConsentCode("123456".into())]
		);
	}

	#[tokio::test]
	async fn rejected_consent_code_cancels_and_declines() {
		let gateway = Arc::new(FakeGateway::new().with_consent_return_value(2066));
		let consent = negotiator(&gateway, ScriptedPrompt::new().reply(ConsentKind::UserConsentCode, ConsentReply::Code("1".into())));

		let err = consent.negotiate_user_consent("dev").await.unwrap_err();
		assert!(matches!(err, SessionError::UserDeclined(ConsentKind::UserConsentCode)));
		assert_eq!(gateway.calls().last(), Some(&GatewayCall::CancelConsentCode));
	}

	#[tokio::test(start_paused = true)]
	async fn prompt_timeout_counts_as_dismissed() {
		let gateway = Arc::new(FakeGateway::new());
		let prompt = ScriptedPrompt::new().hang(ConsentKind::PowerUp);
		let consent = negotiator(&gateway, prompt).with_reply_timeout(Some(Duration::from_secs(30)));

		assert_eq!(consent.ask(ConsentKind::PowerUp).await, ConsentReply::Dismissed);
		assert!(gateway.calls().is_empty());
	}
}
