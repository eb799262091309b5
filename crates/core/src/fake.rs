//! In-memory collaborators for testing sessions without a device.
//!
//! Every fake records what it was asked to do so tests can assert on the
//! exact sequence of remote calls, prompts and notices.
//!
//! # Example
//!
//! ```ignore
//! let gateway = Arc::new(FakeGateway::new().with_power(PowerState::Off));
//! let prompt = ScriptedPrompt::new().reply(ConsentKind::PowerUp, ConsentReply::Accepted);
//! let controller = SessionController::builder("dev", gateway.clone(), Arc::new(FakeTransport::new()), &url)?
//!     .prompt(Arc::new(prompt))
//!     .build();
//! controller.open().await?;
//! assert!(gateway.calls().contains(&GatewayCall::PowerAction(2)));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use amt_protocol::{
	ActionResponse, AmtFeatures, AmtFeaturesRequest, DisplayInfo, RedirectionStatus, ResetType, ReturnBody,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::consent::{ConsentKind, ConsentPrompt, ConsentReply};
use crate::error::{Result, SessionError};
use crate::gateway::{AuthToken, DeviceGateway};
use crate::notice::{MessageKey, Notice, NoticeLevel, Notifier};
use crate::pipeline::ProgressSink;
use crate::power::{PowerAction, PowerState};
use crate::power_cycle::PowerControl;
use crate::state::SessionState;
use crate::transport::{RelayTarget, RelayTransport, TransportStatus};

/// One recorded [`DeviceGateway`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
	PowerState,
	PowerAction(i32),
	RedirectionStatus,
	Features,
	SetFeatures(AmtFeaturesRequest),
	RelayToken,
	Displays,
	SelectDisplay(u32),
	RequestConsentCode,
	SubmitConsentCode(String),
	CancelConsentCode,
}

struct GatewayState {
	power: PowerState,
	redirection: RedirectionStatus,
	features: AmtFeatures,
	displays: Vec<DisplayInfo>,
	consent_return_value: i32,
	power_return_value: i32,
	features_ack: Option<AmtFeatures>,
	failures: HashMap<&'static str, u16>,
	calls: Vec<GatewayCall>,
}

/// Scriptable [`DeviceGateway`].
///
/// Power actions change the reported power state; `set_features` applies the
/// request to the stored feature set and answers with it, unless another
/// acknowledgement was configured. Failures are injected per operation
/// name (the same names the HTTP gateway uses in its errors).
pub struct FakeGateway {
	state: Mutex<GatewayState>,
}

impl Default for FakeGateway {
	fn default() -> Self {
		Self::new()
	}
}

impl FakeGateway {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(GatewayState {
				power: PowerState::On,
				redirection: RedirectionStatus::default(),
				features: AmtFeatures::default(),
				displays: Vec::new(),
				consent_return_value: 0,
				power_return_value: 0,
				features_ack: None,
				failures: HashMap::new(),
				calls: Vec::new(),
			}),
		}
	}

	pub fn with_power(self, power: PowerState) -> Self {
		self.state.lock().power = power;
		self
	}

	pub fn with_redirection(self, redirection: RedirectionStatus) -> Self {
		self.state.lock().redirection = redirection;
		self
	}

	pub fn with_features(self, features: AmtFeatures) -> Self {
		self.state.lock().features = features;
		self
	}

	pub fn with_displays(self, displays: Vec<DisplayInfo>) -> Self {
		self.state.lock().displays = displays;
		self
	}

	/// `ReturnValue` reported for consent code submissions.
	pub fn with_consent_return_value(self, value: i32) -> Self {
		self.state.lock().consent_return_value = value;
		self
	}

	/// `ReturnValue` reported for power actions. A non-zero value leaves the
	/// power state unchanged.
	pub fn with_power_return_value(self, value: i32) -> Self {
		self.state.lock().power_return_value = value;
		self
	}

	/// Body returned by `set_features` in place of the updated feature set.
	pub fn with_features_ack(self, ack: AmtFeatures) -> Self {
		self.state.lock().features_ack = Some(ack);
		self
	}

	/// Makes `operation` fail with HTTP `status`.
	pub fn failing(self, operation: &'static str, status: u16) -> Self {
		self.state.lock().failures.insert(operation, status);
		self
	}

	pub fn set_power(&self, power: PowerState) {
		self.state.lock().power = power;
	}

	pub fn set_redirection(&self, redirection: RedirectionStatus) {
		self.state.lock().redirection = redirection;
	}

	pub fn calls(&self) -> Vec<GatewayCall> {
		self.state.lock().calls.clone()
	}

	fn record(&self, operation: &'static str, call: GatewayCall) -> Result<parking_lot::MutexGuard<'_, GatewayState>> {
		let mut state = self.state.lock();
		state.calls.push(call);
		let failure = state.failures.get(operation).copied();
		match failure {
			Some(status) => Err(SessionError::from_status(operation, status, "")),
			None => Ok(state),
		}
	}
}

fn ok_response(return_value: i32) -> ActionResponse {
	ActionResponse {
		body: Some(ReturnBody {
			return_value,
			return_value_str: (return_value != 0).then(|| "NOT_READY".to_string()),
		}),
	}
}

#[async_trait]
impl DeviceGateway for FakeGateway {
	async fn power_state(&self, _device: &str) -> Result<PowerState> {
		Ok(self.record("power state", GatewayCall::PowerState)?.power.clone())
	}

	async fn power_action(&self, _device: &str, action: PowerAction) -> Result<ActionResponse> {
		let mut state = self.record("power action", GatewayCall::PowerAction(action.code()))?;
		if state.power_return_value != 0 {
			return Ok(ok_response(state.power_return_value));
		}
		match action {
			PowerAction::PowerUp | PowerAction::PowerCycle | PowerAction::Reset | PowerAction::SoftReset => state.power = PowerState::On,
			PowerAction::PowerDown | PowerAction::SoftOff => state.power = PowerState::Off,
			PowerAction::Sleep | PowerAction::Hibernate => state.power = PowerState::Sleeping,
		}
		Ok(ok_response(0))
	}

	async fn redirection_status(&self, _device: &str) -> Result<RedirectionStatus> {
		Ok(self.record("redirection status", GatewayCall::RedirectionStatus)?.redirection)
	}

	async fn features(&self, _device: &str) -> Result<AmtFeatures> {
		Ok(self.record("features", GatewayCall::Features)?.features.clone())
	}

	async fn set_features(&self, _device: &str, request: &AmtFeaturesRequest) -> Result<AmtFeatures> {
		let mut state = self.record("set features", GatewayCall::SetFeatures(request.clone()))?;
		let features = &mut state.features;
		features.kvm = request.enable_kvm;
		features.sol = request.enable_sol;
		features.ider = request.enable_ider;
		features.redirection = request.enable_kvm || request.enable_sol || request.enable_ider;
		features.ocr = request.ocr;
		features.remote_erase = request.remote_erase;
		features.user_consent = request.user_consent.clone();
		let updated = features.clone();
		Ok(state.features_ack.clone().unwrap_or(updated))
	}

	async fn relay_token(&self, _device: &str) -> Result<AuthToken> {
		self.record("relay token", GatewayCall::RelayToken)?;
		Ok(AuthToken::new("fake-relay-token"))
	}

	async fn displays(&self, _device: &str) -> Result<Vec<DisplayInfo>> {
		Ok(self.record("displays", GatewayCall::Displays)?.displays.clone())
	}

	async fn select_display(&self, _device: &str, index: u32) -> Result<()> {
		self.record("select display", GatewayCall::SelectDisplay(index))?;
		Ok(())
	}

	async fn request_consent_code(&self, _device: &str) -> Result<ActionResponse> {
		self.record("request consent code", GatewayCall::RequestConsentCode)?;
		Ok(ok_response(0))
	}

	async fn submit_consent_code(&self, _device: &str, code: &str) -> Result<ActionResponse> {
		let state = self.record("submit consent code", GatewayCall::SubmitConsentCode(code.to_string()))?;
		Ok(ok_response(state.consent_return_value))
	}

	async fn cancel_consent_code(&self, _device: &str) -> Result<()> {
		self.record("cancel consent code", GatewayCall::CancelConsentCode)?;
		Ok(())
	}
}

#[derive(Default)]
struct PromptScript {
	replies: HashMap<ConsentKind, VecDeque<ConsentReply>>,
	hanging: Vec<ConsentKind>,
	asked: Vec<ConsentKind>,
}

/// [`ConsentPrompt`] answering from a script. Unscripted questions are dismissed.
#[derive(Clone, Default)]
pub struct ScriptedPrompt {
	script: Arc<Mutex<PromptScript>>,
}

impl ScriptedPrompt {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queues `reply` for the next question of `kind`.
	pub fn reply(self, kind: ConsentKind, reply: ConsentReply) -> Self {
		self.script.lock().replies.entry(kind).or_default().push_back(reply);
		self
	}

	/// Questions of `kind` are never answered.
	pub fn hang(self, kind: ConsentKind) -> Self {
		self.script.lock().hanging.push(kind);
		self
	}

	pub fn asked(&self) -> Vec<ConsentKind> {
		self.script.lock().asked.clone()
	}
}

#[async_trait]
impl ConsentPrompt for ScriptedPrompt {
	async fn ask(&self, kind: ConsentKind) -> ConsentReply {
		let reply = {
			let mut script = self.script.lock();
			script.asked.push(kind);
			if script.hanging.contains(&kind) {
				None
			} else {
				Some(script.replies.get_mut(&kind).and_then(VecDeque::pop_front).unwrap_or(ConsentReply::Dismissed))
			}
		};
		match reply {
			Some(reply) => reply,
			None => std::future::pending().await,
		}
	}
}

/// [`Notifier`] keeping every notice and status change.
#[derive(Default)]
pub struct RecordingNotifier {
	notices: Mutex<Vec<Notice>>,
	statuses: Mutex<Vec<Option<MessageKey>>>,
}

impl RecordingNotifier {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn notices(&self) -> Vec<Notice> {
		self.notices.lock().clone()
	}

	/// Keys of error-level notices, in order.
	pub fn errors(&self) -> Vec<MessageKey> {
		self.notices
			.lock()
			.iter()
			.filter(|notice| notice.level == NoticeLevel::Error)
			.map(|notice| notice.key)
			.collect()
	}

	pub fn statuses(&self) -> Vec<Option<MessageKey>> {
		self.statuses.lock().clone()
	}
}

impl Notifier for RecordingNotifier {
	fn notify(&self, notice: Notice) {
		self.notices.lock().push(notice);
	}

	fn status(&self, status: Option<MessageKey>) {
		self.statuses.lock().push(status);
	}
}

/// [`ProgressSink`] keeping every state entered.
#[derive(Default)]
pub struct RecordingProgress {
	states: Mutex<Vec<SessionState>>,
}

impl RecordingProgress {
	pub fn states(&self) -> Vec<SessionState> {
		self.states.lock().clone()
	}
}

impl ProgressSink for RecordingProgress {
	fn enter(&self, state: SessionState) {
		self.states.lock().push(state);
	}
}

/// [`RelayTransport`] that never touches the network.
///
/// By default a connect reports `Connected` straight away and a disconnect
/// reports `Disconnected`, as a relay would.
pub struct FakeTransport {
	auto_connect: bool,
	connect_error: Option<String>,
	connects: Mutex<Vec<RelayTarget>>,
	disconnects: AtomicUsize,
	status: Mutex<Option<mpsc::UnboundedSender<TransportStatus>>>,
}

impl Default for FakeTransport {
	fn default() -> Self {
		Self::new()
	}
}

impl FakeTransport {
	pub fn new() -> Self {
		Self {
			auto_connect: true,
			connect_error: None,
			connects: Mutex::new(Vec::new()),
			disconnects: AtomicUsize::new(0),
			status: Mutex::new(None),
		}
	}

	/// Statuses are only reported through [`emit`](Self::emit).
	pub fn manual() -> Self {
		Self {
			auto_connect: false,
			..Self::new()
		}
	}

	pub fn failing(message: impl Into<String>) -> Self {
		Self {
			connect_error: Some(message.into()),
			..Self::new()
		}
	}

	pub fn emit(&self, status: TransportStatus) {
		if let Some(tx) = self.status.lock().as_ref() {
			let _ = tx.send(status);
		}
	}

	pub fn connects(&self) -> Vec<RelayTarget> {
		self.connects.lock().clone()
	}

	pub fn disconnects(&self) -> usize {
		self.disconnects.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl RelayTransport for FakeTransport {
	async fn connect(&self, target: RelayTarget, status: mpsc::UnboundedSender<TransportStatus>) -> Result<()> {
		self.connects.lock().push(target);
		if let Some(message) = &self.connect_error {
			// the drop reaches the status receiver before the error returns
			let _ = status.send(TransportStatus::Disconnected);
			tokio::task::yield_now().await;
			return Err(SessionError::Transport(message.clone()));
		}
		if self.auto_connect {
			let _ = status.send(TransportStatus::Connected);
		}
		*self.status.lock() = Some(status);
		Ok(())
	}

	async fn disconnect(&self) {
		self.disconnects.fetch_add(1, Ordering::SeqCst);
		if let Some(tx) = self.status.lock().take() {
			let _ = tx.send(TransportStatus::Disconnected);
		}
	}
}

struct PowerScript {
	state: PowerState,
	transitions: HashMap<ResetType, (PowerState, Duration)>,
	pending: Option<(PowerState, Instant)>,
	state_failure: Option<u16>,
	resets: Vec<ResetType>,
}

/// [`PowerControl`] whose state follows scripted reset transitions over
/// (tokio) time. Resets without a transition are accepted and change nothing.
pub struct FakePowerControl {
	script: Mutex<PowerScript>,
}

impl FakePowerControl {
	pub fn new(state: PowerState) -> Self {
		Self {
			script: Mutex::new(PowerScript {
				state,
				transitions: HashMap::new(),
				pending: None,
				state_failure: None,
				resets: Vec::new(),
			}),
		}
	}

	/// After `reset`, the target reaches `state` once `after` has elapsed.
	pub fn transition(self, reset: ResetType, state: PowerState, after: Duration) -> Self {
		self.script.lock().transitions.insert(reset, (state, after));
		self
	}

	/// Power state queries fail with HTTP `status`.
	pub fn fail_state_with(self, status: u16) -> Self {
		self.script.lock().state_failure = Some(status);
		self
	}

	pub fn resets(&self) -> Vec<ResetType> {
		self.script.lock().resets.clone()
	}
}

#[async_trait]
impl PowerControl for FakePowerControl {
	fn target(&self) -> &str {
		"fake-system"
	}

	async fn power_state(&self) -> Result<PowerState> {
		let mut script = self.script.lock();
		if let Some(status) = script.state_failure {
			return Err(SessionError::from_status("power state", status, ""));
		}
		if let Some((state, at)) = script.pending.clone() {
			if Instant::now() >= at {
				script.state = state;
				script.pending = None;
			}
		}
		Ok(script.state.clone())
	}

	async fn reset(&self, reset: ResetType) -> Result<()> {
		let mut script = self.script.lock();
		script.resets.push(reset);
		if let Some((state, after)) = script.transitions.get(&reset).cloned() {
			script.pending = Some((state, Instant::now() + after));
		}
		Ok(())
	}
}
