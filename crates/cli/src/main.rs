use std::process::ExitCode;

use amt_cli::cli::Cli;
use amt_cli::{commands, logging};
use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if commands::dispatch(cli).await { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
