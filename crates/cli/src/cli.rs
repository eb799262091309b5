use std::path::PathBuf;

use amt_protocol::ResetType;
use amt_session::Encoding;
use clap::{ArgAction, Args, Parser, Subcommand};

use crate::output::{CommandInputs, OutputFormat};

/// Power control, power cycles and KVM sessions for AMT devices.
#[derive(Parser, Debug)]
#[command(name = "amtctl", version, about)]
pub struct Cli {
	/// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
	#[arg(short, long, action = ArgAction::Count, global = true)]
	pub verbose: u8,

	/// Output format
	#[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json, global = true)]
	pub format: OutputFormat,

	/// Config file (default: <config dir>/amtctl/config.json)
	#[arg(long, global = true, value_name = "PATH")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Power state, resets and full power cycles
	Power(PowerArgs),
	/// KVM precondition checks and sessions
	Kvm(KvmArgs),
	/// Show or create the config file
	Config(ConfigArgs),
}

impl Commands {
	/// Name reported in the result envelope.
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Power(args) => match args.action {
				PowerCommand::State { .. } => "power state",
				PowerCommand::Reset { .. } => "power reset",
				PowerCommand::Cycle { .. } => "power cycle",
			},
			Commands::Kvm(args) => match args.action {
				KvmCommand::Check { .. } => "kvm check",
				KvmCommand::Open(_) => "kvm open",
			},
			Commands::Config(args) => match args.action {
				ConfigCommand::Show => "config show",
				ConfigCommand::Init { .. } => "config init",
			},
		}
	}

	pub fn inputs(&self) -> Option<CommandInputs> {
		let target = match self {
			Commands::Power(args) => match &args.action {
				PowerCommand::State { target } | PowerCommand::Reset { target, .. } | PowerCommand::Cycle { target, .. } => target,
			},
			Commands::Kvm(args) => {
				let device = match &args.action {
					KvmCommand::Check { device } => device,
					KvmCommand::Open(open) => &open.device,
				};
				return Some(CommandInputs {
					device: Some(device.clone()),
					..Default::default()
				});
			}
			Commands::Config(_) => return None,
		};
		Some(CommandInputs {
			device: target.device.clone(),
			system: target.system.clone(),
			extra: None,
		})
	}
}

/// Which machine a power command acts on.
///
/// `--device` goes through the device gateway; otherwise the Redfish
/// system from `--system` or the config is used.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
	/// Device id on the gateway
	#[arg(long, conflicts_with = "system")]
	pub device: Option<String>,

	/// Redfish ComputerSystem id (UUID)
	#[arg(long)]
	pub system: Option<String>,
}

#[derive(Args, Debug)]
pub struct PowerArgs {
	#[command(subcommand)]
	pub action: PowerCommand,
}

#[derive(Subcommand, Debug)]
pub enum PowerCommand {
	/// Read the current power state
	State {
		#[command(flatten)]
		target: TargetArgs,
	},
	/// Issue a single reset
	Reset {
		/// Reset type (On, ForceOff, ForceRestart, GracefulShutdown, ...)
		reset: ResetType,

		#[command(flatten)]
		target: TargetArgs,

		/// Poll until the state the reset leads to is reached
		#[arg(long)]
		wait: bool,
	},
	/// Force off, wait for Off, power on, wait for On
	Cycle {
		#[command(flatten)]
		target: TargetArgs,

		/// Seconds between state polls (default from config)
		#[arg(long, value_name = "SECS")]
		poll_interval: Option<u64>,

		/// Seconds to wait for each state change (default from config)
		#[arg(long, value_name = "SECS")]
		timeout: Option<u64>,
	},
}

#[derive(Args, Debug)]
pub struct KvmArgs {
	#[command(subcommand)]
	pub action: KvmCommand,
}

#[derive(Subcommand, Debug)]
pub enum KvmCommand {
	/// Evaluate KVM preconditions without changing the device
	Check {
		/// Device id on the gateway
		device: String,
	},
	/// Negotiate consent and open a KVM relay session
	Open(KvmOpenArgs),
}

#[derive(Args, Debug)]
pub struct KvmOpenArgs {
	/// Device id on the gateway
	pub device: String,

	/// Relay encoding (rle8, rle16)
	#[arg(long, default_value = "rle16")]
	pub encoding: Encoding,

	/// Close the session after this many seconds (default: until Ctrl-C or drop)
	#[arg(long, value_name = "SECS")]
	pub hold: Option<u64>,

	/// Accept power-up and KVM enablement prompts
	#[arg(short, long)]
	pub yes: bool,

	/// Answer the user-consent prompt with this code
	#[arg(long, value_name = "CODE")]
	pub consent_code: Option<String>,

	/// Relay endpoint override (default: derived from the gateway URL)
	#[arg(long, value_name = "URL")]
	pub relay_url: Option<url::Url>,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
	#[command(subcommand)]
	pub action: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
	/// Print the effective config (file + environment, secrets redacted)
	Show,
	/// Write a default config file
	Init {
		/// Overwrite an existing file
		#[arg(long)]
		force: bool,
	},
}
