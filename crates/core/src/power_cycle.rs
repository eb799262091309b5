//! Power-cycle orchestration.
//!
//! A [`CyclePlan`] is a list of steps run in order against one
//! [`PowerControl`]: check a precondition, issue a reset, poll until a power
//! state is reached, or wait. Polling always runs against a [`Deadline`]
//! computed when the step starts.

use std::sync::Arc;
use std::time::Duration;

use amt_protocol::ResetType;
use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::gateway::DeviceGateway;
use crate::poll::{Deadline, PollError, until_or_timeout};
use crate::power::{PowerAction, PowerState};
use crate::redfish::RedfishClient;
use crate::timings::CycleTimings;

/// Power operations on one target system.
#[async_trait]
pub trait PowerControl: Send + Sync {
	/// Identifier used in logs and reports.
	fn target(&self) -> &str;

	async fn power_state(&self) -> Result<PowerState>;

	/// Requests a reset; returns once the service has accepted it.
	async fn reset(&self, reset: ResetType) -> Result<()>;
}

/// [`PowerControl`] over a Redfish `ComputerSystem`.
pub struct RedfishPower {
	client: Arc<RedfishClient>,
	system_id: String,
}

impl RedfishPower {
	pub fn new(client: Arc<RedfishClient>, system_id: impl Into<String>) -> Self {
		Self {
			client,
			system_id: system_id.into(),
		}
	}
}

#[async_trait]
impl PowerControl for RedfishPower {
	fn target(&self) -> &str {
		&self.system_id
	}

	async fn power_state(&self) -> Result<PowerState> {
		self.client.power_state(&self.system_id).await
	}

	async fn reset(&self, reset: ResetType) -> Result<()> {
		self.client.reset(&self.system_id, reset).await.map(|_| ())
	}
}

/// [`PowerControl`] over the device gateway's numeric power actions.
pub struct GatewayPower {
	gateway: Arc<dyn DeviceGateway>,
	device: String,
}

impl GatewayPower {
	pub fn new(gateway: Arc<dyn DeviceGateway>, device: impl Into<String>) -> Self {
		Self {
			gateway,
			device: device.into(),
		}
	}
}

/// Gateway action equivalent to a Redfish reset type, if there is one.
pub fn power_action_for(reset: ResetType) -> Option<PowerAction> {
	match reset {
		ResetType::On | ResetType::ForceOn => Some(PowerAction::PowerUp),
		ResetType::ForceOff => Some(PowerAction::PowerDown),
		ResetType::GracefulShutdown => Some(PowerAction::SoftOff),
		ResetType::ForceRestart => Some(PowerAction::Reset),
		ResetType::GracefulRestart => Some(PowerAction::SoftReset),
		ResetType::PowerCycle => Some(PowerAction::PowerCycle),
		ResetType::PushPowerButton | ResetType::Nmi => None,
	}
}

#[async_trait]
impl PowerControl for GatewayPower {
	fn target(&self) -> &str {
		&self.device
	}

	async fn power_state(&self) -> Result<PowerState> {
		self.gateway.power_state(&self.device).await
	}

	async fn reset(&self, reset: ResetType) -> Result<()> {
		let action = power_action_for(reset).ok_or_else(|| SessionError::Unsupported(format!("{reset} has no gateway power action")))?;
		let response = self.gateway.power_action(&self.device, action).await?;
		match response.body {
			Some(body) if body.return_value != 0 => Err(SessionError::rejected("power action", &body)),
			_ => Ok(()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CycleStep {
	/// Fail fast unless the target is already in this state.
	Expect { state: PowerState },
	Reset { reset: ResetType },
	/// Poll until the target reports this state.
	AwaitState { state: PowerState },
	Settle {
		#[serde(rename = "ms", serialize_with = "serialize_millis")]
		duration: Duration,
	},
}

impl std::fmt::Display for CycleStep {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			CycleStep::Expect { state } => write!(f, "expect {state}"),
			CycleStep::Reset { reset } => write!(f, "reset {reset}"),
			CycleStep::AwaitState { state } => write!(f, "await {state}"),
			CycleStep::Settle { duration } => write!(f, "settle {}s", duration.as_secs()),
		}
	}
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
	serializer.serialize_u64(value.as_millis() as u64)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePlan {
	pub steps: Vec<CycleStep>,
	pub poll_interval: Duration,
	pub state_timeout: Duration,
}

impl CyclePlan {
	pub fn new(timings: &CycleTimings) -> Self {
		Self {
			steps: Vec::new(),
			poll_interval: timings.poll_interval,
			state_timeout: timings.state_timeout,
		}
	}

	pub fn expect(mut self, state: PowerState) -> Self {
		self.steps.push(CycleStep::Expect { state });
		self
	}

	pub fn reset(mut self, reset: ResetType) -> Self {
		self.steps.push(CycleStep::Reset { reset });
		self
	}

	pub fn await_state(mut self, state: PowerState) -> Self {
		self.steps.push(CycleStep::AwaitState { state });
		self
	}

	pub fn settle(mut self, duration: Duration) -> Self {
		self.steps.push(CycleStep::Settle { duration });
		self
	}

	/// Full off/on cycle: On, force off, wait for Off, settle, power on,
	/// wait for boot, wait for On.
	pub fn off_on(timings: &CycleTimings) -> Self {
		Self::new(timings)
			.expect(PowerState::On)
			.reset(ResetType::ForceOff)
			.await_state(PowerState::Off)
			.settle(timings.settle)
			.reset(ResetType::On)
			.settle(timings.boot_wait)
			.await_state(PowerState::On)
	}

	/// One reset followed by polling for `expected`, when given.
	pub fn single(timings: &CycleTimings, reset: ResetType, expected: Option<PowerState>) -> Self {
		let plan = Self::new(timings).reset(reset);
		match expected {
			Some(state) => plan.await_state(state),
			None => plan,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CycleEvent {
	StepStarted { index: usize, step: CycleStep },
	StateObserved { index: usize, state: PowerState },
	StepFinished {
		index: usize,
		#[serde(rename = "elapsedMs", serialize_with = "serialize_millis")]
		elapsed: Duration,
	},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
	pub step: CycleStep,
	#[serde(rename = "elapsedMs", serialize_with = "serialize_millis")]
	pub elapsed: Duration,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub observed: Option<PowerState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
	pub target: String,
	pub steps: Vec<StepReport>,
	#[serde(rename = "totalMs", serialize_with = "serialize_millis")]
	pub total: Duration,
}

type Observer = Box<dyn Fn(&CycleEvent) + Send + Sync>;

pub struct PowerCycleOrchestrator<P: PowerControl + ?Sized> {
	control: Arc<P>,
	observer: Option<Observer>,
}

impl<P: PowerControl + ?Sized> PowerCycleOrchestrator<P> {
	pub fn new(control: Arc<P>) -> Self {
		Self { control, observer: None }
	}

	pub fn with_observer(mut self, observer: impl Fn(&CycleEvent) + Send + Sync + 'static) -> Self {
		self.observer = Some(Box::new(observer));
		self
	}

	pub async fn run(&self, plan: &CyclePlan) -> Result<CycleReport> {
		let started = Instant::now();
		let target = self.control.target().to_string();
		info!(target = "amt.power", %target, steps = plan.steps.len(), "starting power cycle");

		let mut steps = Vec::with_capacity(plan.steps.len());
		for (index, step) in plan.steps.iter().enumerate() {
			self.emit(CycleEvent::StepStarted { index, step: step.clone() });
			let step_started = Instant::now();
			let observed = self.run_step(index, step, plan).await.map_err(|err| {
				warn!(target = "amt.power", %target, %step, error = %err, "power cycle step failed");
				escalate(err)
			})?;
			let elapsed = step_started.elapsed();
			self.emit(CycleEvent::StepFinished { index, elapsed });
			debug!(target = "amt.power", %target, %step, ?elapsed, "step finished");
			steps.push(StepReport {
				step: step.clone(),
				elapsed,
				observed,
			});
		}

		let total = started.elapsed();
		info!(target = "amt.power", %target, ?total, "power cycle complete");
		Ok(CycleReport { target, steps, total })
	}

	async fn run_step(&self, index: usize, step: &CycleStep, plan: &CyclePlan) -> Result<Option<PowerState>> {
		match step {
			CycleStep::Expect { state } => {
				let actual = self.control.power_state().await?;
				self.emit(CycleEvent::StateObserved { index, state: actual.clone() });
				if &actual != state {
					return Err(SessionError::PreconditionFailed {
						expected: state.to_string(),
						actual: actual.to_string(),
					});
				}
				Ok(Some(actual))
			}
			CycleStep::Reset { reset } => {
				self.control.reset(*reset).await?;
				Ok(None)
			}
			CycleStep::AwaitState { state } => {
				let deadline = Deadline::after(plan.state_timeout);
				let control = Arc::clone(&self.control);
				let result = until_or_timeout(
					move || {
						let control = Arc::clone(&control);
						async move { control.power_state().await }
					},
					|observed| {
						self.emit(CycleEvent::StateObserved {
							index,
							state: observed.clone(),
						});
						observed == state
					},
					plan.poll_interval,
					deadline,
				)
				.await;
				match result {
					Ok(reached) => Ok(Some(reached)),
					Err(PollError::Probe(err)) => Err(err),
					Err(PollError::Timeout { last, waited }) => Err(SessionError::Timeout {
						target: state.to_string(),
						last_observed: last.map(|s| s.to_string()).unwrap_or_else(|| "nothing".into()),
						waited,
					}),
				}
			}
			CycleStep::Settle { duration } => {
				tokio::time::sleep(*duration).await;
				Ok(None)
			}
		}
	}

	fn emit(&self, event: CycleEvent) {
		if let Some(observer) = &self.observer {
			observer(&event);
		}
	}
}

/// 404, 5xx and network failures mean the target is gone, not slow.
fn escalate(err: SessionError) -> SessionError {
	match err {
		SessionError::DeviceUnavailable(_) => err,
		err if err.is_unavailable() => SessionError::DeviceUnavailable(Box::new(err)),
		err => err,
	}
}

#[cfg(test)]
mod tests {
	use parking_lot::Mutex;

	use super::*;
	use crate::fake::{FakeGateway, FakePowerControl, GatewayCall};

	fn timings() -> CycleTimings {
		CycleTimings::default()
	}

	#[tokio::test(start_paused = true)]
	async fn off_on_cycle_converges() {
		let control = Arc::new(
			FakePowerControl::new(PowerState::On)
				.transition(ResetType::ForceOff, PowerState::Off, Duration::from_secs(25))
				.transition(ResetType::On, PowerState::On, Duration::from_secs(60)),
		);
		let report = PowerCycleOrchestrator::new(control.clone())
			.run(&CyclePlan::off_on(&timings()))
			.await
			.unwrap();

		assert_eq!(report.steps.len(), 7);
		assert_eq!(control.resets(), vec![ResetType::ForceOff, ResetType::On]);
		assert_eq!(report.steps[2].observed, Some(PowerState::Off));
		assert_eq!(report.steps[2].elapsed, Duration::from_secs(30));
		assert_eq!(report.steps.last().and_then(|s| s.observed.clone()), Some(PowerState::On));
	}

	#[tokio::test(start_paused = true)]
	async fn unexpected_initial_state_fails_fast() {
		let control = Arc::new(FakePowerControl::new(PowerState::Off));
		let err = PowerCycleOrchestrator::new(control.clone())
			.run(&CyclePlan::off_on(&timings()))
			.await
			.unwrap_err();

		assert!(matches!(err, SessionError::PreconditionFailed { ref expected, ref actual } if expected == "On" && actual == "Off"));
		assert!(control.resets().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn force_off_that_never_converges_times_out_with_last_state() {
		let control = Arc::new(FakePowerControl::new(PowerState::On));
		let started = Instant::now();
		let err = PowerCycleOrchestrator::new(control)
			.run(&CyclePlan::off_on(&timings()))
			.await
			.unwrap_err();

		let elapsed = started.elapsed();
		assert!(elapsed >= Duration::from_secs(180) && elapsed <= Duration::from_secs(190), "{elapsed:?}");
		match err {
			SessionError::Timeout { target, last_observed, .. } => {
				assert_eq!(target, "Off");
				assert_eq!(last_observed, "On");
			}
			other => panic!("expected timeout, got {other:?}"),
		}
	}

	#[tokio::test(start_paused = true)]
	async fn missing_system_is_unavailable_not_timeout() {
		let control = Arc::new(FakePowerControl::new(PowerState::On).fail_state_with(404));
		let err = PowerCycleOrchestrator::new(control)
			.run(&CyclePlan::off_on(&timings()))
			.await
			.unwrap_err();

		assert!(matches!(err, SessionError::DeviceUnavailable(_)));
		assert!(!err.is_timeout());
	}

	#[tokio::test(start_paused = true)]
	async fn refused_gateway_action_is_not_unavailable() {
		let gateway = Arc::new(FakeGateway::new().with_power_return_value(2));
		let control = Arc::new(GatewayPower::new(gateway.clone(), "dev"));
		let err = PowerCycleOrchestrator::new(control)
			.run(&CyclePlan::off_on(&timings()))
			.await
			.unwrap_err();

		assert!(!err.is_unavailable(), "{err:?}");
		assert!(matches!(err, SessionError::Rejected { return_value: 2, .. }));
		assert_eq!(gateway.calls().last(), Some(&GatewayCall::PowerAction(PowerAction::PowerDown.code())));
	}

	#[tokio::test(start_paused = true)]
	async fn observer_sees_every_step() {
		let events = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&events);
		let control = Arc::new(FakePowerControl::new(PowerState::On).transition(ResetType::ForceOff, PowerState::Off, Duration::ZERO));
		let plan = CyclePlan::single(&timings(), ResetType::ForceOff, Some(PowerState::Off));

		PowerCycleOrchestrator::new(control)
			.with_observer(move |event| sink.lock().push(event.clone()))
			.run(&plan)
			.await
			.unwrap();

		let events = events.lock();
		assert!(matches!(events[0], CycleEvent::StepStarted { index: 0, .. }));
		assert!(events.contains(&CycleEvent::StateObserved {
			index: 1,
			state: PowerState::Off
		}));
		assert!(matches!(events.last(), Some(CycleEvent::StepFinished { index: 1, .. })));
	}

	#[test]
	fn gateway_actions_cover_power_resets() {
		assert_eq!(power_action_for(ResetType::ForceOff), Some(PowerAction::PowerDown));
		assert_eq!(power_action_for(ResetType::On), Some(PowerAction::PowerUp));
		assert_eq!(power_action_for(ResetType::Nmi), None);
	}
}
