//! `config show` and `config init`.

use std::path::Path;

use serde_json::json;
use tracing::info;

use crate::cli::ConfigCommand;
use crate::config::Config;
use crate::error::Result;

pub fn run(action: ConfigCommand, path: &Path) -> Result<serde_json::Value> {
	match action {
		ConfigCommand::Show => {
			let config = Config::load(path)?;
			Ok(json!({
				"path": path,
				"exists": path.exists(),
				"config": config.redacted(),
			}))
		}
		ConfigCommand::Init { force } => {
			Config::default().write(path, force)?;
			info!(target = "amtctl", path = %path.display(), "wrote default config");
			Ok(json!({ "path": path, "written": true }))
		}
	}
}
