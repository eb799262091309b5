//! `kvm check` and `kvm open`.

use std::sync::Arc;
use std::time::Duration;

use amt_session::{
	ConsentNegotiator, ConsentRequest, DeviceGateway, DismissAll, Notifier, Outcome, PreconditionPipeline, SessionController, SessionError, SessionState,
	WsRelayTransport,
};
use colored::Colorize;
use serde_json::json;
use tokio::sync::watch;
use tracing::info;

use super::http_gateway;
use crate::cli::{KvmCommand, KvmOpenArgs};
use crate::config::Config;
use crate::error::Result;
use crate::terminal::{TerminalNotifier, TerminalPrompt};

pub async fn run(action: KvmCommand, config: &Config, notifier: Arc<TerminalNotifier>) -> Result<serde_json::Value> {
	match action {
		KvmCommand::Check { device } => check(&device, config, notifier).await,
		KvmCommand::Open(args) => open(args, config, notifier).await,
	}
}

async fn check(device: &str, config: &Config, notifier: Arc<TerminalNotifier>) -> Result<serde_json::Value> {
	let gateway: Arc<dyn DeviceGateway> = Arc::new(http_gateway(config)?);
	let negotiator = ConsentNegotiator::new(Arc::clone(&gateway), Arc::new(DismissAll));
	let notifier: Arc<dyn Notifier> = notifier;
	let pipeline = PreconditionPipeline::new(gateway, negotiator, notifier);

	let outcome = pipeline.evaluate(device).await;
	let features = pipeline.features().get();
	let data = match outcome {
		Outcome::Proceed => json!({ "device": device, "outcome": "proceed", "features": features.as_deref() }),
		Outcome::NeedsConsent(request) => json!({
			"device": device,
			"outcome": "needs_consent",
			"consent": consent_name(&request),
			"features": features.as_deref(),
		}),
		Outcome::Blocked(err) => json!({
			"device": device,
			"outcome": "blocked",
			"reason": err.to_string(),
			"messageKey": err.message_key().key(),
			"features": features.as_deref(),
		}),
	};
	Ok(data)
}

fn consent_name(request: &ConsentRequest) -> &'static str {
	match request {
		ConsentRequest::PowerUp => "power_up",
		ConsentRequest::EnableFeatures(_) => "enable_features",
		ConsentRequest::UserConsent => "user_consent",
	}
}

async fn open(args: KvmOpenArgs, config: &Config, notifier: Arc<TerminalNotifier>) -> Result<serde_json::Value> {
	let gateway_url = config.gateway_url()?;
	let gateway: Arc<dyn DeviceGateway> = Arc::new(http_gateway(config)?);
	let transport = Arc::new(WsRelayTransport::new());
	let prompt = TerminalPrompt::new().assume_yes(args.yes).consent_code(args.consent_code);

	let mut builder = SessionController::builder(&args.device, gateway, transport.clone(), &gateway_url)?
		.prompt(Arc::new(prompt))
		.notifier(notifier)
		.timings(config.timings.session)
		.encoding(args.encoding);
	if let Some(url) = args.relay_url {
		builder = builder.relay_url(url);
	}
	let controller = builder.build();

	controller.open().await?;
	let mut states = controller.subscribe_state();
	let ended = hold(&mut states, args.hold.map(Duration::from_secs)).await;
	let reached = controller.state();

	let (displays, selected) = controller.displays();
	let summary = json!({
		"device": controller.device(),
		"relayUrl": controller.relay_url().as_str(),
		"state": reached,
		"ended": ended,
		"encoding": controller.encoding(),
		"displays": displays,
		"selectedDisplay": selected,
		"features": controller.features().get().as_deref(),
		"bytesReceived": transport.bytes_received(),
	});

	let last_error = controller.last_error();
	controller.close().await;
	if reached == SessionState::Failed {
		let message = last_error.unwrap_or_else(|| "KVM session failed".to_string());
		return Err(SessionError::Transport(message).into());
	}
	Ok(summary)
}

/// Waits until the session ends, the hold time elapses or Ctrl-C; returns which.
async fn hold(states: &mut watch::Receiver<SessionState>, limit: Option<Duration>) -> &'static str {
	let ended = async {
		let mut announced = false;
		loop {
			let state = *states.borrow_and_update();
			if state == SessionState::Connected && !announced {
				announced = true;
				eprintln!("{}", "KVM session connected; press Ctrl-C to close".green());
			}
			if matches!(state, SessionState::Failed | SessionState::Idle) {
				return;
			}
			if states.changed().await.is_err() {
				return;
			}
		}
	};
	let elapsed = async {
		match limit {
			Some(limit) => tokio::time::sleep(limit).await,
			None => std::future::pending().await,
		}
	};

	tokio::select! {
		_ = ended => "session_ended",
		_ = elapsed => {
			info!(target = "amtctl", "hold time elapsed; closing session");
			"hold_elapsed"
		}
		_ = tokio::signal::ctrl_c() => "interrupted",
	}
}
