//! `power state`, `power reset` and `power cycle`.

use std::sync::Arc;
use std::time::Duration;

use amt_protocol::ResetType;
use amt_session::redfish::{AuthMode, RedfishClient, validate_system_id};
use amt_session::{CycleEvent, CyclePlan, CycleReport, DeviceGateway, GatewayPower, HttpGateway, PowerControl, PowerCycleOrchestrator, PowerState, RedfishPower};
use colored::Colorize;
use serde_json::json;
use tracing::warn;

use super::{http_gateway, redfish_client};
use crate::cli::{PowerCommand, TargetArgs};
use crate::config::{Config, ENV_REDFISH_SYSTEM_ID};
use crate::error::{CliError, Result};

enum Backend {
	Redfish { client: Arc<RedfishClient>, system: String },
	Gateway { gateway: Arc<HttpGateway>, device: String },
}

impl Backend {
	async fn connect(config: &Config, target: &TargetArgs) -> Result<Self> {
		if let Some(device) = &target.device {
			return Ok(Backend::Gateway {
				gateway: Arc::new(http_gateway(config)?),
				device: device.clone(),
			});
		}

		let system = target.system.clone().or_else(|| config.redfish.system_id.clone()).ok_or_else(|| {
			CliError::InvalidInput(format!("no target: pass --device or --system, or set redfish.systemId ({ENV_REDFISH_SYSTEM_ID})"))
		})?;
		validate_system_id(&system)?;
		let client = Arc::new(redfish_client(config)?);
		if client.auth_mode() == AuthMode::Session {
			client.login().await?;
		}
		Ok(Backend::Redfish { client, system })
	}

	fn kind(&self) -> &'static str {
		match self {
			Backend::Redfish { .. } => "redfish",
			Backend::Gateway { .. } => "gateway",
		}
	}

	fn target(&self) -> &str {
		match self {
			Backend::Redfish { system, .. } => system,
			Backend::Gateway { device, .. } => device,
		}
	}

	fn control(&self) -> Arc<dyn PowerControl> {
		match self {
			Backend::Redfish { client, system } => Arc::new(RedfishPower::new(Arc::clone(client), system.clone())),
			Backend::Gateway { gateway, device } => {
				let gateway: Arc<dyn DeviceGateway> = gateway.clone();
				Arc::new(GatewayPower::new(gateway, device.clone()))
			}
		}
	}

	async fn release(&self) {
		if let Backend::Redfish { client, .. } = self {
			if client.has_session() {
				if let Err(err) = client.logout().await {
					warn!(target = "amtctl", error = %err, "Redfish logout failed");
				}
			}
		}
	}
}

pub async fn run(action: PowerCommand, config: &Config) -> Result<serde_json::Value> {
	let target = match &action {
		PowerCommand::State { target } | PowerCommand::Reset { target, .. } | PowerCommand::Cycle { target, .. } => target.clone(),
	};
	let backend = Backend::connect(config, &target).await?;
	let result = execute(action, config, &backend).await;
	backend.release().await;
	result
}

async fn execute(action: PowerCommand, config: &Config, backend: &Backend) -> Result<serde_json::Value> {
	match action {
		PowerCommand::State { .. } => {
			let state = backend.control().power_state().await?;
			Ok(json!({
				"target": backend.target(),
				"backend": backend.kind(),
				"state": state,
				"on": state.is_on(),
			}))
		}
		PowerCommand::Reset { reset, wait, .. } => {
			if wait {
				let plan = CyclePlan::single(&config.timings.cycle, reset, settled_state(reset));
				let report = orchestrate(backend, &plan).await?;
				return Ok(json!({
					"target": backend.target(),
					"backend": backend.kind(),
					"reset": reset,
					"report": report,
				}));
			}
			match backend {
				Backend::Redfish { client, system } => {
					let accepted = client.reset(system, reset).await?;
					Ok(json!({
						"target": system,
						"backend": backend.kind(),
						"reset": reset,
						"accepted": true,
						"location": accepted.location,
						"task": accepted.task,
					}))
				}
				Backend::Gateway { .. } => {
					backend.control().reset(reset).await?;
					Ok(json!({
						"target": backend.target(),
						"backend": backend.kind(),
						"reset": reset,
						"accepted": true,
					}))
				}
			}
		}
		PowerCommand::Cycle { poll_interval, timeout, .. } => {
			let mut timings = config.timings.cycle;
			if let Some(secs) = poll_interval {
				timings.poll_interval = Duration::from_secs(secs);
			}
			if let Some(secs) = timeout {
				timings.state_timeout = Duration::from_secs(secs);
			}
			let report = orchestrate(backend, &CyclePlan::off_on(&timings)).await?;
			Ok(serde_json::to_value(report)?)
		}
	}
}

async fn orchestrate(backend: &Backend, plan: &CyclePlan) -> Result<CycleReport> {
	let report = PowerCycleOrchestrator::new(backend.control())
		.with_observer(print_event)
		.run(plan)
		.await?;
	Ok(report)
}

fn print_event(event: &CycleEvent) {
	match event {
		CycleEvent::StepStarted { index, step } => eprintln!("{} {step}", format!("[{}]", index + 1).cyan()),
		CycleEvent::StateObserved { state, .. } => eprintln!("    {}", format!("observed {state}").dimmed()),
		CycleEvent::StepFinished { elapsed, .. } => eprintln!("    {}", format!("done in {:.1}s", elapsed.as_secs_f64()).green()),
	}
}

/// State a reset is expected to leave the machine in, if it changes one.
fn settled_state(reset: ResetType) -> Option<PowerState> {
	match reset {
		ResetType::On | ResetType::ForceOn => Some(PowerState::On),
		ResetType::ForceOff | ResetType::GracefulShutdown => Some(PowerState::Off),
		ResetType::ForceRestart | ResetType::GracefulRestart | ResetType::PowerCycle | ResetType::PushPowerButton | ResetType::Nmi => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_state_changing_resets_are_awaited() {
		assert_eq!(settled_state(ResetType::ForceOff), Some(PowerState::Off));
		assert_eq!(settled_state(ResetType::On), Some(PowerState::On));
		assert_eq!(settled_state(ResetType::ForceRestart), None);
		assert_eq!(settled_state(ResetType::Nmi), None);
	}
}
