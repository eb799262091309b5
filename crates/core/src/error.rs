//! Error taxonomy shared by the pipeline, controller and power-cycle code.

use std::time::Duration;

use amt_protocol::{RedfishErrorEnvelope, ReturnBody};
use thiserror::Error;

use crate::consent::ConsentKind;
use crate::notice::MessageKey;
use crate::state::SessionState;

pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
	/// Network failure or 5xx from a remote endpoint.
	#[error("{operation} failed{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
	RemoteCall {
		operation: &'static str,
		status: Option<u16>,
		message: String,
	},

	/// The device answered but refused the action with a non-zero `ReturnValue`.
	#[error("{operation} refused by device: {message} (ReturnValue {return_value})")]
	Rejected {
		operation: &'static str,
		return_value: i32,
		message: String,
	},

	/// 400-class rejection, e.g. an invalid reset type or malformed body.
	#[error("{operation} rejected: {message}")]
	Validation {
		operation: &'static str,
		message: String,
		details: Vec<String>,
	},

	#[error("{operation} unauthorized: {message}")]
	Auth { operation: &'static str, message: String },

	#[error("{operation}: resource not found")]
	NotFound { operation: &'static str },

	/// Another client already holds the redirection session.
	#[error("conflict: {0}")]
	Conflict(String),

	#[error("timed out after {waited:?} waiting for {target}; last observed: {last_observed}")]
	Timeout {
		target: String,
		last_observed: String,
		waited: Duration,
	},

	#[error("operator declined {0}")]
	UserDeclined(ConsentKind),

	#[error("device unavailable: {0}")]
	DeviceUnavailable(Box<SessionError>),

	#[error("precondition failed: expected {expected}, found {actual}")]
	PreconditionFailed { expected: String, actual: String },

	#[error("session already active (state: {0})")]
	AlreadyActive(SessionState),

	#[error("unsupported: {0}")]
	Unsupported(String),

	#[error("invalid input: {0}")]
	InvalidInput(String),

	/// The session was closed before `open` finished.
	#[error("session closed while opening")]
	Cancelled,

	#[error("relay transport error: {0}")]
	Transport(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl SessionError {
	/// Builds an error from a non-success HTTP status and its response body.
	///
	/// Redfish error envelopes are unpacked into validation details when present.
	pub fn from_status(operation: &'static str, status: u16, body: &str) -> Self {
		let (message, details) = describe_body(body);
		match status {
			400 | 405 | 411 | 413 | 414 | 415 | 422 => SessionError::Validation {
				operation,
				message,
				details,
			},
			401 | 403 => SessionError::Auth { operation, message },
			404 => SessionError::NotFound { operation },
			409 => SessionError::Conflict(message),
			_ => SessionError::RemoteCall {
				operation,
				status: Some(status),
				message,
			},
		}
	}

	/// Wraps a transport-level `reqwest` failure.
	pub fn remote(operation: &'static str, err: reqwest::Error) -> Self {
		SessionError::RemoteCall {
			operation,
			status: err.status().map(|s| s.as_u16()),
			message: err.to_string(),
		}
	}

	/// HTTP status carried by the error, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			SessionError::RemoteCall { status, .. } => *status,
			SessionError::Validation { .. } => Some(400),
			SessionError::Auth { .. } => Some(401),
			SessionError::NotFound { .. } => Some(404),
			SessionError::Conflict(_) => Some(409),
			SessionError::DeviceUnavailable(inner) => inner.status(),
			_ => None,
		}
	}

	/// `true` for 404, 5xx and network failures: the device cannot be reached at all.
	pub fn is_unavailable(&self) -> bool {
		match self {
			SessionError::NotFound { .. } | SessionError::DeviceUnavailable(_) => true,
			SessionError::RemoteCall { status, .. } => status.is_none_or(|s| s >= 500),
			_ => false,
		}
	}

	/// Error for a 2xx AMT response whose body carries a non-zero `ReturnValue`.
	pub fn rejected(operation: &'static str, body: &ReturnBody) -> Self {
		SessionError::Rejected {
			operation,
			return_value: body.return_value,
			message: body
				.return_value_str
				.clone()
				.unwrap_or_else(|| format!("return value {}", body.return_value)),
		}
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, SessionError::Timeout { .. })
	}

	/// Message key shown to the operator for this failure.
	pub fn message_key(&self) -> MessageKey {
		match self {
			SessionError::Transport(_) => MessageKey::KvmConnection,
			SessionError::Conflict(_) => MessageKey::RedirectionConflict,
			SessionError::Unsupported(_) => MessageKey::KvmUnavailable,
			SessionError::UserDeclined(ConsentKind::UserConsentCode) => MessageKey::ConsentFailed,
			_ => MessageKey::ErrorRetrieve,
		}
	}
}

fn describe_body(body: &str) -> (String, Vec<String>) {
	if let Ok(envelope) = serde_json::from_str::<RedfishErrorEnvelope>(body) {
		let details: Vec<String> = envelope.error.extended_info.iter().filter_map(|info| info.message.clone()).collect();
		let message = envelope
			.error
			.message
			.clone()
			.or_else(|| details.first().cloned())
			.unwrap_or_else(|| "request failed".to_string());
		return (message, details);
	}

	let trimmed = body.trim();
	if trimmed.is_empty() {
		("empty response body".to_string(), Vec::new())
	} else {
		(trimmed.chars().take(200).collect(), Vec::new())
	}
}
