//! CLI error type and its mapping onto the output envelope.

use std::path::PathBuf;

use amt_session::SessionError;
use serde_json::json;
use thiserror::Error;

use crate::output::ErrorCode;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error(transparent)]
	Session(#[from] SessionError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("config error: {0}")]
	Config(String),

	#[error("config file {path} already exists (use --force to overwrite)")]
	ConfigExists { path: PathBuf },

	#[error("invalid input: {0}")]
	InvalidInput(String),
}

impl CliError {
	pub fn code(&self) -> ErrorCode {
		match self {
			CliError::Session(err) => session_code(err),
			CliError::Io(_) => ErrorCode::IoError,
			CliError::Json(_) => ErrorCode::InternalError,
			CliError::Config(_) | CliError::ConfigExists { .. } => ErrorCode::ConfigError,
			CliError::InvalidInput(_) => ErrorCode::InvalidInput,
		}
	}

	/// Structured details for the error envelope.
	pub fn details(&self) -> Option<serde_json::Value> {
		match self {
			CliError::Session(SessionError::Validation { details, .. }) if !details.is_empty() => Some(json!({ "messages": details })),
			CliError::Session(SessionError::Timeout {
				target, last_observed, waited, ..
			}) => Some(json!({
				"target": target,
				"lastObserved": last_observed,
				"waitedMs": waited.as_millis() as u64,
			})),
			CliError::Session(SessionError::Rejected { return_value, .. }) => Some(json!({ "returnValue": return_value })),
			CliError::Session(err) => err.status().map(|status| json!({ "status": status, "messageKey": err.message_key().key() })),
			_ => None,
		}
	}
}

fn session_code(err: &SessionError) -> ErrorCode {
	if err.is_unavailable() {
		return ErrorCode::DeviceUnavailable;
	}
	match err {
		SessionError::RemoteCall { .. } | SessionError::Rejected { .. } => ErrorCode::RemoteCallFailed,
		SessionError::Validation { .. } | SessionError::InvalidInput(_) => ErrorCode::InvalidInput,
		SessionError::Auth { .. } => ErrorCode::AuthError,
		SessionError::Conflict(_) => ErrorCode::Conflict,
		SessionError::Timeout { .. } => ErrorCode::Timeout,
		SessionError::UserDeclined(_) => ErrorCode::UserDeclined,
		SessionError::PreconditionFailed { .. } => ErrorCode::PreconditionFailed,
		SessionError::Unsupported(_) => ErrorCode::Unsupported,
		SessionError::Transport(_) => ErrorCode::TransportFailed,
		SessionError::Json(_) => ErrorCode::InternalError,
		_ => ErrorCode::SessionError,
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use amt_session::ConsentKind;

	use super::*;

	#[test]
	fn session_errors_map_to_codes() {
		let unavailable = CliError::from(SessionError::from_status("get system", 404, ""));
		assert_eq!(unavailable.code(), ErrorCode::DeviceUnavailable);

		let declined = CliError::from(SessionError::UserDeclined(ConsentKind::PowerUp));
		assert_eq!(declined.code(), ErrorCode::UserDeclined);

		let rejected = CliError::from(SessionError::from_status("reset", 400, "bad"));
		assert_eq!(rejected.code(), ErrorCode::InvalidInput);
	}

	#[test]
	fn refused_power_action_is_a_remote_failure() {
		let err = CliError::from(SessionError::Rejected {
			operation: "power action",
			return_value: 2,
			message: "NOT_READY".into(),
		});
		assert_eq!(err.code(), ErrorCode::RemoteCallFailed);
		assert_eq!(err.details().unwrap()["returnValue"], 2);
	}

	#[test]
	fn timeout_details_carry_last_observation() {
		let err = CliError::from(SessionError::Timeout {
			target: "Off".into(),
			last_observed: "On".into(),
			waited: Duration::from_secs(180),
		});
		assert_eq!(err.code(), ErrorCode::Timeout);
		let details = err.details().unwrap();
		assert_eq!(details["lastObserved"], "On");
		assert_eq!(details["waitedMs"], 180_000);
	}
}
