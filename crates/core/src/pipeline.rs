//! Session precondition pipeline.
//!
//! Before a relay stream may be opened the device must be powered on, free of
//! another KVM session, have KVM redirection enabled and, depending on its
//! consent policy, have the operator enter the code shown on its screen. The
//! steps run strictly in that order; any failure ends the run as
//! [`Outcome::Blocked`] after a notice has been sent.

use std::sync::Arc;

use amt_protocol::{AmtFeatures, AmtFeaturesRequest};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::consent::ConsentNegotiator;
use crate::error::SessionError;
use crate::gateway::DeviceGateway;
use crate::notice::{MessageKey, Notice, Notifier};
use crate::state::SessionState;

#[derive(Debug)]
pub enum Outcome {
	Proceed,
	Blocked(SessionError),
	NeedsConsent(ConsentRequest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentRequest {
	PowerUp,
	/// Enable KVM redirection with the carried feature set.
	EnableFeatures(AmtFeaturesRequest),
	UserConsent,
}

impl ConsentRequest {
	fn awaiting_state(&self) -> SessionState {
		match self {
			ConsentRequest::PowerUp => SessionState::AwaitingPowerOnConsent,
			ConsentRequest::EnableFeatures(_) => SessionState::AwaitingEnableConsent,
			ConsentRequest::UserConsent => SessionState::AwaitingUserConsent,
		}
	}
}

/// Receives the intermediate states of a run.
pub trait ProgressSink: Send + Sync {
	fn enter(&self, state: SessionState);
}

impl ProgressSink for watch::Sender<SessionState> {
	fn enter(&self, state: SessionState) {
		self.send_replace(state);
	}
}

/// Latest feature snapshot of the device, replaced wholesale on every fetch.
#[derive(Debug, Clone)]
pub struct FeatureCache {
	tx: Arc<watch::Sender<Option<Arc<AmtFeatures>>>>,
}

impl Default for FeatureCache {
	fn default() -> Self {
		Self {
			tx: Arc::new(watch::Sender::new(None)),
		}
	}
}

impl FeatureCache {
	pub fn get(&self) -> Option<Arc<AmtFeatures>> {
		self.tx.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<Option<Arc<AmtFeatures>>> {
		self.tx.subscribe()
	}

	pub fn store(&self, features: AmtFeatures) -> Arc<AmtFeatures> {
		let features = Arc::new(features);
		self.tx.send_replace(Some(Arc::clone(&features)));
		features
	}

	pub fn clear(&self) {
		self.tx.send_replace(None);
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Step {
	Power,
	Redirection,
	Features,
	UserConsent,
}

/// Builds the enablement request: KVM on, every other setting echoed back.
pub fn enable_kvm_request(features: &AmtFeatures) -> AmtFeaturesRequest {
	AmtFeaturesRequest {
		user_consent: features.user_consent.clone(),
		enable_kvm: true,
		enable_sol: features.sol,
		enable_ider: features.ider,
		ocr: features.ocr,
		remote_erase: features.remote_erase,
	}
}

/// `true` when the device's consent policy lets a session start without a code.
pub fn consent_satisfied(features: &AmtFeatures) -> bool {
	features.user_consent == "none" || matches!(features.opt_in_state, 3 | 4)
}

#[derive(Clone)]
pub struct PreconditionPipeline {
	gateway: Arc<dyn DeviceGateway>,
	negotiator: ConsentNegotiator,
	notifier: Arc<dyn Notifier>,
	features: FeatureCache,
	progress: Option<Arc<dyn ProgressSink>>,
}

impl PreconditionPipeline {
	pub fn new(gateway: Arc<dyn DeviceGateway>, negotiator: ConsentNegotiator, notifier: Arc<dyn Notifier>) -> Self {
		Self {
			gateway,
			negotiator,
			notifier,
			features: FeatureCache::default(),
			progress: None,
		}
	}

	/// Shares a feature cache with other observers.
	pub fn with_feature_cache(mut self, features: FeatureCache) -> Self {
		self.features = features;
		self
	}

	pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
		self.progress = Some(progress);
		self
	}

	pub fn features(&self) -> &FeatureCache {
		&self.features
	}

	/// Runs the checks from the top and stops at the first step that is not
	/// satisfied. No consent is asked and nothing is changed on the device.
	pub async fn evaluate(&self, device: &str) -> Outcome {
		self.evaluate_from(device, Step::Power).await.0
	}

	/// Carries out the action behind a consent request, asking the operator first.
	pub async fn resolve(&self, device: &str, request: &ConsentRequest) -> Result<(), SessionError> {
		self.enter(request.awaiting_state());
		match request {
			ConsentRequest::PowerUp => self.negotiator.confirm_power_up(device).await,
			ConsentRequest::EnableFeatures(enable) => {
				let features = self.negotiator.confirm_enable_kvm(device, enable).await?;
				self.features.store(features);
				Ok(())
			}
			ConsentRequest::UserConsent => self.negotiator.negotiate_user_consent(device).await,
		}
	}

	/// Evaluates and resolves until the device is ready (`Ok`) or blocked.
	///
	/// The returned error has already been reported through the notifier.
	pub async fn run(&self, device: &str) -> Result<(), SessionError> {
		let mut step = Step::Power;
		loop {
			let (outcome, at) = self.evaluate_from(device, step).await;
			match outcome {
				Outcome::Proceed => {
					debug!(target = "amt.pipeline", device, "preconditions satisfied");
					return Ok(());
				}
				Outcome::Blocked(err) => return Err(err),
				Outcome::NeedsConsent(request) => {
					if let Err(err) = self.resolve(device, &request).await {
						let key = match (&request, &err) {
							(ConsentRequest::PowerUp, SessionError::UserDeclined(_)) => err.message_key(),
							(ConsentRequest::PowerUp, _) => MessageKey::PowerUpFailed,
							_ => err.message_key(),
						};
						self.report(device, key, &err);
						return Err(err);
					}
					step = match at {
						Step::Power => Step::Redirection,
						Step::Redirection | Step::Features => Step::UserConsent,
						Step::UserConsent => return Ok(()),
					};
				}
			}
		}
	}

	async fn evaluate_from(&self, device: &str, from: Step) -> (Outcome, Step) {
		if from <= Step::Power {
			self.enter(SessionState::CheckingPower);
			self.notifier.status(Some(MessageKey::CheckingPowerState));
			match self.gateway.power_state(device).await {
				Ok(power) if power.is_on() => {}
				Ok(power) => {
					info!(target = "amt.pipeline", device, %power, "device is not powered on");
					return (Outcome::NeedsConsent(ConsentRequest::PowerUp), Step::Power);
				}
				Err(err) => return (self.blocked(device, err), Step::Power),
			}
		}

		if from <= Step::Redirection {
			self.enter(SessionState::CheckingRedirectionConflict);
			self.notifier.status(Some(MessageKey::CheckingRedirection));
			match self.gateway.redirection_status(device).await {
				Ok(status) => {
					// no snapshot yet counts as available
					let kvm_available = self.features.get().is_none_or(|f| f.kvm_available);
					if kvm_available && status.is_kvm_connected {
						let err = SessionError::Conflict(format!("device {device} already has an active KVM session"));
						return (self.blocked(device, err), Step::Redirection);
					}
				}
				Err(err) => return (self.blocked(device, err), Step::Redirection),
			}
		}

		if from <= Step::Features {
			self.enter(SessionState::CheckingFeatures);
			self.notifier.status(Some(MessageKey::CheckingFeatures));
			let features = match self.gateway.features(device).await {
				Ok(features) => self.features.store(features),
				Err(err) => return (self.blocked(device, err), Step::Features),
			};
			if !features.kvm_available {
				debug!(target = "amt.pipeline", device, "KVM not available; skipping enablement");
				return (Outcome::Proceed, Step::Features);
			}
			if !(features.redirection && features.kvm) {
				let request = enable_kvm_request(&features);
				return (Outcome::NeedsConsent(ConsentRequest::EnableFeatures(request)), Step::Features);
			}
		}

		self.notifier.status(Some(MessageKey::CheckingConsent));
		match self.features.get() {
			Some(features) if !consent_satisfied(&features) => (Outcome::NeedsConsent(ConsentRequest::UserConsent), Step::UserConsent),
			_ => (Outcome::Proceed, Step::UserConsent),
		}
	}

	fn blocked(&self, device: &str, err: SessionError) -> Outcome {
		self.report(device, err.message_key(), &err);
		Outcome::Blocked(err)
	}

	fn report(&self, device: &str, key: MessageKey, err: &SessionError) {
		warn!(target = "amt.pipeline", device, error = %err, "session precondition failed");
		self.notifier.status(None);
		self.notifier.notify(Notice::error(key).with_detail(err.to_string()));
	}

	fn enter(&self, state: SessionState) {
		if let Some(progress) = &self.progress {
			progress.enter(state);
		}
	}
}
