mod config;
mod kvm;
mod power;

use std::sync::Arc;

use amt_session::redfish::RedfishClient;
use amt_session::{AuthToken, HttpGateway, MessageCatalog};
use tracing::warn;

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::error::Result;
use crate::output::{OutputFormat, ResultBuilder, print_error_stderr, print_result};
use crate::terminal::TerminalNotifier;

/// Runs the parsed command and prints its result envelope.
///
/// Returns whether the command succeeded.
pub async fn dispatch(cli: Cli) -> bool {
	let format = cli.format;
	let notifier = Arc::new(TerminalNotifier::new(MessageCatalog::default()));
	let mut builder = ResultBuilder::<serde_json::Value>::new(cli.command.name());
	if let Some(inputs) = cli.command.inputs() {
		builder = builder.inputs(inputs);
	}

	let outcome = run(cli, Arc::clone(&notifier)).await;
	let builder = builder.diagnostics(notifier.drain());
	let result = match outcome {
		Ok(data) => builder.data(data).build(),
		Err(err) => {
			warn!(target = "amtctl", error = %err, "command failed");
			match err.details() {
				Some(details) => builder.error_with_details(err.code(), err.to_string(), details),
				None => builder.error(err.code(), err.to_string()),
			}
			.build()
		}
	};

	print_result(&result, format);
	if format == OutputFormat::Json {
		if let Some(error) = &result.error {
			print_error_stderr(error);
		}
	}
	result.ok
}

async fn run(cli: Cli, notifier: Arc<TerminalNotifier>) -> Result<serde_json::Value> {
	let path = Config::resolve_path(cli.config.as_deref())?;
	match cli.command {
		Commands::Config(args) => config::run(args.action, &path),
		Commands::Power(args) => {
			let config = Config::load(&path)?;
			power::run(args.action, &config).await
		}
		Commands::Kvm(args) => {
			let config = Config::load(&path)?;
			kvm::run(args.action, &config, notifier).await
		}
	}
}

pub(crate) fn http_gateway(config: &Config) -> Result<HttpGateway> {
	let gateway = HttpGateway::builder(config.gateway_url()?)
		.bearer(config.gateway.token.clone().map(AuthToken::new))
		.accept_invalid_certs(config.gateway.accept_invalid_certs)
		.build()?;
	Ok(gateway)
}

pub(crate) fn redfish_client(config: &Config) -> Result<RedfishClient> {
	let mut builder = RedfishClient::builder(config.redfish_url()?)
		.auth_mode(config.redfish_auth_mode())
		.accept_invalid_certs(config.redfish.accept_invalid_certs);
	if let Some(username) = &config.redfish.username {
		builder = builder.credentials(username.clone(), config.redfish.password.clone().unwrap_or_default());
	}
	Ok(builder.build()?)
}
