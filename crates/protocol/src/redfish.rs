//! Redfish payloads consumed by the power-cycle orchestration.
//!
//! Only the fields read or written by the client are modelled; everything
//! else in a `ComputerSystem` or `Task` resource is ignored on input.

use serde::{Deserialize, Serialize};

/// Value of the `OData-Version` header every Redfish response carries.
pub const ODATA_VERSION: &str = "4.0";

/// Header carrying the session token returned by session login.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Subset of `#ComputerSystem.v1_x.ComputerSystem`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerSystem {
	#[serde(rename = "@odata.id", default, skip_serializing_if = "Option::is_none")]
	pub odata_id: Option<String>,
	#[serde(rename = "Id", default)]
	pub id: String,
	#[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(rename = "PowerState", default, skip_serializing_if = "Option::is_none")]
	pub power_state: Option<String>,
}

/// Allowable values of `ComputerSystem.Reset` `ResetType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResetType {
	On,
	ForceOff,
	ForceOn,
	ForceRestart,
	GracefulRestart,
	GracefulShutdown,
	PowerCycle,
	PushPowerButton,
	Nmi,
}

impl ResetType {
	pub const ALL: [ResetType; 9] = [
		ResetType::On,
		ResetType::ForceOff,
		ResetType::ForceOn,
		ResetType::ForceRestart,
		ResetType::GracefulRestart,
		ResetType::GracefulShutdown,
		ResetType::PowerCycle,
		ResetType::PushPowerButton,
		ResetType::Nmi,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			ResetType::On => "On",
			ResetType::ForceOff => "ForceOff",
			ResetType::ForceOn => "ForceOn",
			ResetType::ForceRestart => "ForceRestart",
			ResetType::GracefulRestart => "GracefulRestart",
			ResetType::GracefulShutdown => "GracefulShutdown",
			ResetType::PowerCycle => "PowerCycle",
			ResetType::PushPowerButton => "PushPowerButton",
			ResetType::Nmi => "Nmi",
		}
	}
}

impl std::fmt::Display for ResetType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for ResetType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ResetType::ALL
			.into_iter()
			.find(|kind| kind.as_str().eq_ignore_ascii_case(s))
			.ok_or_else(|| format!("unknown reset type: {s}"))
	}
}

/// `POST .../Actions/ComputerSystem.Reset` request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetRequest {
	#[serde(rename = "ResetType")]
	pub reset_type: ResetType,
}

/// Task resource returned with `202 Accepted`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
	#[serde(rename = "@odata.type", default)]
	pub odata_type: String,
	#[serde(rename = "Id", default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(rename = "TaskState", default, skip_serializing_if = "Option::is_none")]
	pub task_state: Option<String>,
	#[serde(rename = "TaskStatus", default, skip_serializing_if = "Option::is_none")]
	pub task_status: Option<String>,
}

/// `POST /redfish/v1/SessionService/Sessions` request body.
///
/// Redfish uses capitalized `UserName`/`Password`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLoginRequest {
	#[serde(rename = "UserName")]
	pub user_name: String,
	#[serde(rename = "Password")]
	pub password: String,
}

impl std::fmt::Debug for SessionLoginRequest {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionLoginRequest")
			.field("user_name", &self.user_name)
			.field("password", &"<redacted>")
			.finish()
	}
}

/// Standard Redfish error envelope: `{"error": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedfishErrorEnvelope {
	pub error: RedfishError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedfishError {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(rename = "@Message.ExtendedInfo", default)]
	pub extended_info: Vec<MessageInfo>,
}

/// One `@Message.ExtendedInfo` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
	#[serde(rename = "MessageId", default, skip_serializing_if = "Option::is_none")]
	pub message_id: Option<String>,
	#[serde(rename = "Message", default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(rename = "Resolution", default, skip_serializing_if = "Option::is_none")]
	pub resolution: Option<String>,
	#[serde(rename = "Severity", default, skip_serializing_if = "Option::is_none")]
	pub severity: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reset_type_parses_case_insensitively() {
		assert_eq!("forceoff".parse::<ResetType>().unwrap(), ResetType::ForceOff);
		assert_eq!("On".parse::<ResetType>().unwrap(), ResetType::On);
		assert!("NotARealResetType".parse::<ResetType>().is_err());
	}

	#[test]
	fn reset_request_serializes_pascal_case() {
		let body = serde_json::to_value(ResetRequest {
			reset_type: ResetType::GracefulShutdown,
		})
		.unwrap();
		assert_eq!(body, serde_json::json!({ "ResetType": "GracefulShutdown" }));
	}

	#[test]
	fn error_envelope_reads_extended_info() {
		let raw = r#"{"error":{"code":"Base.1.0.GeneralError","message":"bad","@Message.ExtendedInfo":[{"MessageId":"Base.1.0.PropertyValueNotInList","Message":"NotARealResetType is not allowed"}]}}"#;
		let envelope: RedfishErrorEnvelope = serde_json::from_str(raw).unwrap();
		assert_eq!(envelope.error.extended_info.len(), 1);
		assert_eq!(
			envelope.error.extended_info[0].message.as_deref(),
			Some("NotARealResetType is not allowed")
		);
	}

	#[test]
	fn computer_system_ignores_unknown_fields() {
		let raw = r#"{"@odata.id":"/redfish/v1/Systems/abc","Id":"abc","PowerState":"On","SystemType":"Physical","MemorySummary":{}}"#;
		let system: ComputerSystem = serde_json::from_str(raw).unwrap();
		assert_eq!(system.power_state.as_deref(), Some("On"));
		assert_eq!(system.id, "abc");
	}
}
