//! `amtctl` configuration: a JSON file plus environment overrides.
//!
//! Resolution order, later wins: built-in defaults, the config file
//! (`--config` or `<config dir>/amtctl/config.json`), then environment
//! variables. A missing file is not an error.

use std::path::{Path, PathBuf};

use amt_session::redfish::AuthMode;
use amt_session::{CycleTimings, SessionTimings};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{CliError, Result};

pub const ENV_REDFISH_BASEURL: &str = "REDFISH_BASEURL";
pub const ENV_REDFISH_USERNAME: &str = "REDFISH_USERNAME";
pub const ENV_REDFISH_PASSWORD: &str = "REDFISH_PASSWORD";
pub const ENV_REDFISH_SYSTEM_ID: &str = "REDFISH_SYSTEM_ID";
pub const ENV_GATEWAY_URL: &str = "AMT_GATEWAY_URL";

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	pub gateway: GatewayConfig,
	pub redfish: RedfishConfig,
	pub timings: Timings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
	/// Base URL of the device gateway API, e.g. `https://console.example/mps/api/v1/amt/`.
	pub url: Option<String>,
	/// Bearer token for the gateway.
	pub token: Option<String>,
	pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RedfishConfig {
	pub base_url: Option<String>,
	pub username: Option<String>,
	pub password: Option<String>,
	pub system_id: Option<String>,
	/// Use a Redfish session (`X-Auth-Token`) instead of HTTP Basic.
	pub session_auth: bool,
	pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Timings {
	pub session: SessionTimings,
	pub cycle: CycleTimings,
}

impl Config {
	/// `<config dir>/amtctl/config.json`, when the platform has a config dir.
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("amtctl").join("config.json"))
	}

	/// Resolves the config path from `--config` or the platform default.
	pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
		match explicit {
			Some(path) => Ok(path.to_path_buf()),
			None => Self::default_path().ok_or_else(|| CliError::Config("no config directory on this platform; pass --config".into())),
		}
	}

	/// Reads `path`; a missing file yields defaults.
	pub fn read(path: &Path) -> Result<Self> {
		match std::fs::read_to_string(path) {
			Ok(raw) => serde_json::from_str(&raw).map_err(|e| CliError::Config(format!("{}: {e}", path.display()))),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
				debug!(target = "amtctl", path = %path.display(), "no config file, using defaults");
				Ok(Self::default())
			}
			Err(err) => Err(err.into()),
		}
	}

	/// Reads the file at `path` and applies process environment overrides.
	pub fn load(path: &Path) -> Result<Self> {
		let mut config = Self::read(path)?;
		config.apply_env(|name| std::env::var(name).ok());
		Ok(config)
	}

	/// Applies overrides from `lookup`; empty values are ignored.
	pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
		let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
		if let Some(value) = get(ENV_REDFISH_BASEURL) {
			self.redfish.base_url = Some(value);
		}
		if let Some(value) = get(ENV_REDFISH_USERNAME) {
			self.redfish.username = Some(value);
		}
		if let Some(value) = get(ENV_REDFISH_PASSWORD) {
			self.redfish.password = Some(value);
		}
		if let Some(value) = get(ENV_REDFISH_SYSTEM_ID) {
			self.redfish.system_id = Some(value);
		}
		if let Some(value) = get(ENV_GATEWAY_URL) {
			self.gateway.url = Some(value);
		}
	}

	/// Writes the config as pretty JSON, creating parent directories.
	pub fn write(&self, path: &Path, force: bool) -> Result<()> {
		if path.exists() && !force {
			return Err(CliError::ConfigExists { path: path.to_path_buf() });
		}
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let json = serde_json::to_string_pretty(self)?;
		std::fs::write(path, format!("{json}\n"))?;
		Ok(())
	}

	/// Copy safe to print: secrets replaced.
	pub fn redacted(&self) -> Self {
		let mut copy = self.clone();
		if copy.gateway.token.is_some() {
			copy.gateway.token = Some(REDACTED.into());
		}
		if copy.redfish.password.is_some() {
			copy.redfish.password = Some(REDACTED.into());
		}
		copy
	}

	pub fn gateway_url(&self) -> Result<Url> {
		let raw = self
			.gateway
			.url
			.as_deref()
			.ok_or_else(|| CliError::Config(format!("gateway.url is not set (config file or {ENV_GATEWAY_URL})")))?;
		parse_url("gateway.url", raw)
	}

	pub fn redfish_url(&self) -> Result<Url> {
		let raw = self
			.redfish
			.base_url
			.as_deref()
			.ok_or_else(|| CliError::Config(format!("redfish.baseUrl is not set (config file or {ENV_REDFISH_BASEURL})")))?;
		parse_url("redfish.baseUrl", raw)
	}

	pub fn redfish_auth_mode(&self) -> AuthMode {
		if self.redfish.session_auth { AuthMode::Session } else { AuthMode::Basic }
	}
}

fn parse_url(field: &str, raw: &str) -> Result<Url> {
	Url::parse(raw).map_err(|e| CliError::Config(format!("{field} is not a valid URL ({raw}): {e}")))
}
