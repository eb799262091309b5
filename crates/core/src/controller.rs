//! Session lifecycle controller.
//!
//! Owns everything that lives for the duration of one KVM session against a
//! device: the relay token, the keep-alive task, the input arbitration
//! listeners and the transport status pump. [`SessionController::open`]
//! runs the precondition pipeline and connects the transport;
//! [`SessionController::close`] releases all of it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::consent::{ConsentNegotiator, ConsentPrompt, DismissAll};
use crate::display::{DisplayOption, fallback_displays, resolve_displays};
use crate::error::{Result, SessionError};
use crate::gateway::{AuthToken, DeviceGateway};
use crate::hotkey::{Encoding, Hotkey};
use crate::input::{CaptureHub, InputArbitration, KeyEventHub};
use crate::notice::{MessageKey, Notice, Notifier, TracingNotifier};
use crate::pipeline::{FeatureCache, PreconditionPipeline, ProgressSink};
use crate::state::SessionState;
use crate::timings::SessionTimings;
use crate::transport::{RelayTarget, RelayTransport, TransportStatus, relay_url};

pub struct SessionControllerBuilder {
	device: String,
	gateway: Arc<dyn DeviceGateway>,
	transport: Arc<dyn RelayTransport>,
	relay_url: Url,
	prompt: Arc<dyn ConsentPrompt>,
	notifier: Arc<dyn Notifier>,
	hub: Arc<dyn KeyEventHub>,
	timings: SessionTimings,
	encoding: Encoding,
}

impl SessionControllerBuilder {
	pub fn prompt(mut self, prompt: Arc<dyn ConsentPrompt>) -> Self {
		self.prompt = prompt;
		self
	}

	pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
		self.notifier = notifier;
		self
	}

	pub fn key_hub(mut self, hub: Arc<dyn KeyEventHub>) -> Self {
		self.hub = hub;
		self
	}

	pub fn timings(mut self, timings: SessionTimings) -> Self {
		self.timings = timings;
		self
	}

	pub fn encoding(mut self, encoding: Encoding) -> Self {
		self.encoding = encoding;
		self
	}

	/// Overrides the relay endpoint derived from the gateway URL.
	pub fn relay_url(mut self, url: Url) -> Self {
		self.relay_url = url;
		self
	}

	pub fn build(self) -> SessionController {
		let (state, _) = watch::channel(SessionState::Idle);
		let (hotkey, _) = watch::channel(None);
		let (encoding, _) = watch::channel(self.encoding);
		SessionController {
			inner: Arc::new(Inner {
				device: self.device,
				gateway: self.gateway,
				transport: self.transport,
				relay_url: self.relay_url,
				prompt: self.prompt,
				notifier: self.notifier,
				hub: self.hub,
				timings: self.timings,
				features: FeatureCache::default(),
				state,
				hotkey: Arc::new(hotkey),
				hotkey_pulses: Arc::new(AtomicU64::new(0)),
				encoding,
				encoding_grace_until: Mutex::new(None),
				displays: Mutex::new(Displays::default()),
				resources: Mutex::new(Resources::default()),
				last_error: Mutex::new(None),
				generation: AtomicU64::new(0),
				disconnecting: AtomicBool::new(false),
				capturing: Arc::new(AtomicBool::new(false)),
				ider_active: AtomicBool::new(false),
			}),
		}
	}
}

#[derive(Debug, Default)]
struct Displays {
	options: Vec<DisplayOption>,
	selected: u32,
}

/// Per-session resources, released together on close or failure.
#[derive(Default)]
struct Resources {
	token: Option<AuthToken>,
	keep_alive: Option<JoinHandle<()>>,
	arbitration: Option<InputArbitration>,
	status_pump: Option<JoinHandle<()>>,
}

impl Resources {
	fn release(&mut self) {
		if let Some(task) = self.keep_alive.take() {
			task.abort();
		}
		if let Some(mut arbitration) = self.arbitration.take() {
			arbitration.detach();
		}
		if let Some(task) = self.status_pump.take() {
			task.abort();
		}
		self.token = None;
	}
}

struct Inner {
	device: String,
	gateway: Arc<dyn DeviceGateway>,
	transport: Arc<dyn RelayTransport>,
	relay_url: Url,
	prompt: Arc<dyn ConsentPrompt>,
	notifier: Arc<dyn Notifier>,
	hub: Arc<dyn KeyEventHub>,
	timings: SessionTimings,
	features: FeatureCache,
	state: watch::Sender<SessionState>,
	hotkey: Arc<watch::Sender<Option<Hotkey>>>,
	hotkey_pulses: Arc<AtomicU64>,
	encoding: watch::Sender<Encoding>,
	encoding_grace_until: Mutex<Option<Instant>>,
	displays: Mutex<Displays>,
	resources: Mutex<Resources>,
	last_error: Mutex<Option<String>>,
	/// Bumped by every `open` and `close`; stale work checks it and backs off.
	generation: AtomicU64,
	disconnecting: AtomicBool,
	/// Set while the transport owns the keyboard (Connecting/Connected).
	capturing: Arc<AtomicBool>,
	ider_active: AtomicBool,
}

/// Publishes pipeline progress only while its `open` is still current.
struct GenerationProgress {
	inner: Arc<Inner>,
	generation: u64,
}

impl ProgressSink for GenerationProgress {
	fn enter(&self, state: SessionState) {
		if self.inner.generation.load(Ordering::Acquire) == self.generation {
			self.inner.state.send_replace(state);
		}
	}
}

/// Drives one KVM session against one device. Cheap to clone.
#[derive(Clone)]
pub struct SessionController {
	inner: Arc<Inner>,
}

impl SessionController {
	/// Starts a builder; the relay endpoint is derived from `gateway_url`.
	pub fn builder(
		device: impl Into<String>,
		gateway: Arc<dyn DeviceGateway>,
		transport: Arc<dyn RelayTransport>,
		gateway_url: &Url,
	) -> Result<SessionControllerBuilder> {
		let device = device.into();
		let relay_url = relay_url(gateway_url, &device)?;
		Ok(SessionControllerBuilder {
			device,
			gateway,
			transport,
			relay_url,
			prompt: Arc::new(DismissAll),
			notifier: Arc::new(TracingNotifier::default()),
			hub: Arc::new(CaptureHub::new()),
			timings: SessionTimings::default(),
			encoding: Encoding::default(),
		})
	}

	pub fn device(&self) -> &str {
		&self.inner.device
	}

	pub fn relay_url(&self) -> &Url {
		&self.inner.relay_url
	}

	pub fn state(&self) -> SessionState {
		*self.inner.state.borrow()
	}

	pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
		self.inner.state.subscribe()
	}

	pub fn features(&self) -> &FeatureCache {
		&self.inner.features
	}

	pub fn last_error(&self) -> Option<String> {
		self.inner.last_error.lock().clone()
	}

	pub fn has_token(&self) -> bool {
		self.inner.resources.lock().token.is_some()
	}

	pub fn is_disconnecting(&self) -> bool {
		self.inner.disconnecting.load(Ordering::Acquire)
	}

	pub fn is_capturing_input(&self) -> bool {
		self.inner.capturing.load(Ordering::Acquire)
	}

	pub fn ider_active(&self) -> bool {
		self.inner.ider_active.load(Ordering::Acquire)
	}

	/// Opens the session: token, keep-alive, input arbitration, displays,
	/// preconditions, then the relay transport.
	///
	/// Returns once the transport has been asked to connect; the move to
	/// [`SessionState::Connected`] follows the transport's status report.
	pub async fn open(&self) -> Result<()> {
		let inner = &self.inner;
		let mut previous = SessionState::Idle;
		let claimed = inner.state.send_if_modified(|state| {
			previous = *state;
			if state.is_restartable() {
				*state = SessionState::CheckingPower;
				true
			} else {
				false
			}
		});
		if !claimed {
			return Err(SessionError::AlreadyActive(previous));
		}

		let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
		inner.disconnecting.store(false, Ordering::Release);
		*inner.last_error.lock() = None;
		info!(target = "amt.session", device = %inner.device, generation, "opening KVM session");

		let token = match inner.gateway.relay_token(&inner.device).await {
			Ok(token) => token,
			Err(err) => {
				let key = err.message_key();
				return self.fail(generation, err, Some(key));
			}
		};

		{
			let mut resources = inner.resources.lock();
			if inner.generation.load(Ordering::Acquire) != generation {
				return Err(SessionError::Cancelled);
			}
			resources.release();
			resources.token = Some(token.clone());
			resources.keep_alive = Some(self.spawn_keep_alive());
			resources.arbitration = Some(InputArbitration::attach(Arc::clone(&inner.hub), Arc::clone(&inner.capturing)));
		}

		self.load_displays().await;

		let negotiator = ConsentNegotiator::new(Arc::clone(&inner.gateway), Arc::clone(&inner.prompt))
			.with_reply_timeout(inner.timings.consent_reply_timeout);
		let pipeline = PreconditionPipeline::new(Arc::clone(&inner.gateway), negotiator, Arc::clone(&inner.notifier))
			.with_feature_cache(inner.features.clone())
			.with_progress(Arc::new(GenerationProgress {
				inner: Arc::clone(inner),
				generation,
			}));
		let outcome = pipeline.run(&inner.device).await;

		if inner.generation.load(Ordering::Acquire) != generation {
			return Err(SessionError::Cancelled);
		}
		if let Err(err) = outcome {
			// already reported by the pipeline
			return self.fail(generation, err, None);
		}
		if inner.features.get().is_some_and(|features| !features.kvm_available) {
			let err = SessionError::Unsupported(format!("KVM is not available on device {}", inner.device));
			return self.fail(generation, err, Some(MessageKey::KvmUnavailable));
		}

		self.connect(generation, token).await
	}

	async fn connect(&self, generation: u64, token: AuthToken) -> Result<()> {
		let inner = &self.inner;
		inner.state.send_replace(SessionState::Connecting);
		inner.capturing.store(true, Ordering::Release);
		inner.notifier.status(Some(MessageKey::ConnectingKvm));

		let (status_tx, mut status_rx) = mpsc::unbounded_channel();
		let pump = {
			let controller = self.clone();
			tokio::spawn(async move {
				while let Some(status) = status_rx.recv().await {
					controller.on_transport_status(generation, status);
				}
			})
		};
		{
			let mut resources = inner.resources.lock();
			if inner.generation.load(Ordering::Acquire) != generation {
				pump.abort();
				return Err(SessionError::Cancelled);
			}
			resources.status_pump = Some(pump);
		}

		let target = RelayTarget {
			url: inner.relay_url.clone(),
			token,
			device: inner.device.clone(),
			encoding: *inner.encoding.borrow(),
		};
		if let Err(err) = inner.transport.connect(target, status_tx).await {
			// the pump may be handling the transport's own Disconnected; only one side reports
			return self.fail(generation, err, Some(MessageKey::KvmConnection));
		}

		if inner.generation.load(Ordering::Acquire) != generation {
			// closed while the stream was opening
			inner.transport.disconnect().await;
			return Err(SessionError::Cancelled);
		}
		debug!(target = "amt.session", device = %inner.device, "relay transport connecting");
		Ok(())
	}

	/// Closes the session. Returns `false` when there was nothing to close.
	pub async fn close(&self) -> bool {
		let inner = &self.inner;
		let claimed = inner.state.send_if_modified(|state| match state {
			SessionState::Idle | SessionState::Disconnecting => false,
			_ => {
				*state = SessionState::Disconnecting;
				true
			}
		});
		if !claimed {
			return false;
		}

		inner.disconnecting.store(true, Ordering::Release);
		inner.capturing.store(false, Ordering::Release);
		inner.generation.fetch_add(1, Ordering::AcqRel);

		inner.transport.disconnect().await;
		inner.resources.lock().release();
		inner.notifier.status(None);
		inner.state.send_replace(SessionState::Idle);
		info!(target = "amt.session", device = %inner.device, "KVM session closed");
		true
	}

	/// Marks the session as being left on purpose, so the coming transport
	/// drop is not reported as an error.
	pub fn navigate_away(&self) {
		self.inner.disconnecting.store(true, Ordering::Release);
	}

	/// Applies a status reported by the relay transport.
	pub fn handle_transport_status(&self, status: TransportStatus) {
		let generation = self.inner.generation.load(Ordering::Acquire);
		self.on_transport_status(generation, status);
	}

	fn on_transport_status(&self, generation: u64, status: TransportStatus) {
		let inner = &self.inner;
		if inner.generation.load(Ordering::Acquire) != generation {
			return;
		}
		debug!(target = "amt.session", device = %inner.device, status = status.code(), "transport status");

		match status {
			TransportStatus::Connecting => {}
			TransportStatus::Connected => {
				inner.notifier.status(None);
				let connected = inner.state.send_if_modified(|state| {
					if *state == SessionState::Connecting {
						*state = SessionState::Connected;
						true
					} else {
						false
					}
				});
				if connected {
					info!(target = "amt.session", device = %inner.device, "KVM session connected");
				}
			}
			TransportStatus::Disconnected => {
				inner.notifier.status(None);
				let leaving = inner.disconnecting.swap(false, Ordering::AcqRel);
				let reencoding = self.in_encoding_window();
				let live = self.state().has_transport();

				if reencoding && !leaving {
					if live {
						inner.state.send_replace(SessionState::Connecting);
					}
					return;
				}
				if leaving {
					if live {
						inner.capturing.store(false, Ordering::Release);
						inner.resources.lock().release();
						inner.state.send_replace(SessionState::Idle);
					}
					return;
				}

				let err = SessionError::Transport("relay connection dropped".into());
				if live {
					let _ = self.fail(generation, err, Some(MessageKey::KvmConnection));
				} else if self.state() != SessionState::Failed {
					self.report(&err, MessageKey::KvmConnection);
				}
			}
		}
	}

	/// Sends `hotkey` as a pulse: the signal is set, then cleared after the
	/// configured pulse length so the same key can be sent again.
	///
	/// Returns once the signal is set; the clear runs on a spawned task.
	pub async fn send_hotkey(&self, hotkey: Hotkey) {
		let inner = &self.inner;
		let pulse = inner.hotkey_pulses.fetch_add(1, Ordering::AcqRel) + 1;
		inner.hotkey.send_replace(Some(hotkey));
		debug!(target = "amt.session", device = %inner.device, %hotkey, "hotkey");

		let signal = Arc::clone(&inner.hotkey);
		let pulses = Arc::clone(&inner.hotkey_pulses);
		let length = inner.timings.hotkey_pulse;
		tokio::spawn(async move {
			tokio::time::sleep(length).await;
			if pulses.load(Ordering::Acquire) == pulse {
				signal.send_replace(None);
			}
		});
	}

	pub fn subscribe_hotkey(&self) -> watch::Receiver<Option<Hotkey>> {
		self.inner.hotkey.subscribe()
	}

	/// Switches encoding. A transport drop within the grace window that follows
	/// is treated as the expected reconnect.
	pub fn change_encoding(&self, encoding: Encoding) {
		let inner = &self.inner;
		*inner.encoding_grace_until.lock() = Some(Instant::now() + inner.timings.encoding_grace);
		inner.encoding.send_replace(encoding);
		info!(target = "amt.session", device = %inner.device, encoding = encoding.label(), "encoding changed");
	}

	pub fn encoding(&self) -> Encoding {
		*self.inner.encoding.borrow()
	}

	pub fn subscribe_encoding(&self) -> watch::Receiver<Encoding> {
		self.inner.encoding.subscribe()
	}

	fn in_encoding_window(&self) -> bool {
		matches!(*self.inner.encoding_grace_until.lock(), Some(until) if Instant::now() < until)
	}

	pub fn displays(&self) -> (Vec<DisplayOption>, u32) {
		let displays = self.inner.displays.lock();
		(displays.options.clone(), displays.selected)
	}

	/// Refreshes the display list, falling back to the default four displays
	/// when the device does not answer.
	pub async fn load_displays(&self) {
		let inner = &self.inner;
		match inner.gateway.displays(&inner.device).await {
			Ok(infos) => {
				let mut displays = inner.displays.lock();
				let (options, selected) = resolve_displays(&infos, displays.selected);
				displays.options = options;
				displays.selected = selected;
			}
			Err(err) => {
				warn!(target = "amt.session", device = %inner.device, error = %err, "failed to load displays; using defaults");
				let mut displays = inner.displays.lock();
				displays.options = fallback_displays();
				displays.selected = 0;
			}
		}
	}

	/// Selects a display locally and tells the gateway; gateway failures are only logged.
	pub async fn select_display(&self, index: u32) -> Result<()> {
		let inner = &self.inner;
		{
			let mut displays = inner.displays.lock();
			let listed = displays.options.iter().find(|option| option.index == index);
			if !displays.options.is_empty() {
				match listed {
					None => return Err(SessionError::InvalidInput(format!("no display with index {index}"))),
					Some(option) if option.disabled => {
						return Err(SessionError::InvalidInput(format!("display {index} is not active")));
					}
					Some(_) => {}
				}
			}
			displays.selected = index;
		}
		if let Err(err) = inner.gateway.select_display(&inner.device, index).await {
			warn!(target = "amt.session", device = %inner.device, index, error = %err, "failed to report display selection");
		}
		Ok(())
	}

	/// Applies an IDER status code: `0` ended, `3` active.
	pub fn handle_ider_status(&self, code: i32) {
		let inner = &self.inner;
		let key = match code {
			0 => {
				inner.ider_active.store(false, Ordering::Release);
				MessageKey::IderEnded
			}
			3 => {
				inner.ider_active.store(true, Ordering::Release);
				MessageKey::IderActive
			}
			other => {
				debug!(target = "amt.session", device = %inner.device, code = other, "ignoring IDER status");
				return;
			}
		};
		inner.notifier.notify(Notice::warning(key));
	}

	fn spawn_keep_alive(&self) -> JoinHandle<()> {
		let gateway = Arc::clone(&self.inner.gateway);
		let device = self.inner.device.clone();
		let period = self.inner.timings.keep_alive.max(Duration::from_millis(1));
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				match gateway.power_state(&device).await {
					Ok(power) => debug!(target = "amt.session", device = %device, %power, "keep-alive"),
					Err(err) => warn!(target = "amt.session", device = %device, error = %err, "keep-alive request failed"),
				}
			}
		})
	}

	fn report(&self, err: &SessionError, key: MessageKey) {
		self.inner.notifier.status(None);
		self.inner.notifier.notify(Notice::error(key).with_detail(err.to_string()));
	}

	/// Tears the session down into `Failed` unless a newer open/close took over
	/// or the session already failed. Only the caller that makes the
	/// transition reports `key`, so one failure yields one error notice.
	fn fail(&self, generation: u64, err: SessionError, key: Option<MessageKey>) -> Result<()> {
		let inner = &self.inner;
		{
			let mut resources = inner.resources.lock();
			if inner.generation.load(Ordering::Acquire) != generation || *inner.state.borrow() == SessionState::Failed {
				return Err(err);
			}
			resources.release();
			inner.capturing.store(false, Ordering::Release);
			*inner.last_error.lock() = Some(err.to_string());
			inner.state.send_replace(SessionState::Failed);
		}
		if let Some(key) = key {
			self.report(&err, key);
		}
		warn!(target = "amt.session", device = %inner.device, error = %err, "KVM session failed");
		Err(err)
	}
}
