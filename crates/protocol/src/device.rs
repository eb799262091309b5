//! Device gateway payloads (`/devices/{id}/...`).

use serde::{Deserialize, Serialize};

/// `GET /devices/{id}/power` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerStateResponse {
	pub powerstate: i32,
}

/// `POST /devices/{id}/power` request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerActionRequest {
	pub action: i32,
}

/// `Body` envelope returned by AMT action endpoints (power, consent code).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
	#[serde(rename = "Body", default, skip_serializing_if = "Option::is_none")]
	pub body: Option<ReturnBody>,
}

/// AMT method return value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnBody {
	#[serde(rename = "ReturnValue", default)]
	pub return_value: i32,
	#[serde(rename = "ReturnValueStr", default, skip_serializing_if = "Option::is_none")]
	pub return_value_str: Option<String>,
}

/// `GET /devices/{id}/redirection` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectionStatus {
	#[serde(rename = "isKVMConnected", default)]
	pub is_kvm_connected: bool,
	#[serde(rename = "isSOLConnected", default)]
	pub is_sol_connected: bool,
	#[serde(rename = "isIDERConnected", default)]
	pub is_ider_connected: bool,
}

/// `GET /devices/{id}/features` response.
///
/// `user_consent` is kept as the raw policy string so it can be echoed back
/// unchanged in [`AmtFeaturesRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmtFeatures {
	#[serde(rename = "KVM", default)]
	pub kvm: bool,
	#[serde(rename = "SOL", default)]
	pub sol: bool,
	#[serde(rename = "IDER", default)]
	pub ider: bool,
	#[serde(default)]
	pub redirection: bool,
	#[serde(default)]
	pub kvm_available: bool,
	#[serde(default)]
	pub user_consent: String,
	#[serde(default)]
	pub opt_in_state: i32,
	#[serde(default)]
	pub ocr: bool,
	#[serde(default)]
	pub remote_erase: bool,
	#[serde(default)]
	pub https_boot_supported: bool,
	#[serde(rename = "winREBootSupported", default)]
	pub win_re_boot_supported: bool,
	#[serde(rename = "localPBABootSupported", default)]
	pub local_pba_boot_supported: bool,
}

/// `POST /devices/{id}/features` request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmtFeaturesRequest {
	pub user_consent: String,
	#[serde(rename = "enableKVM")]
	pub enable_kvm: bool,
	#[serde(rename = "enableSOL")]
	pub enable_sol: bool,
	#[serde(rename = "enableIDER")]
	pub enable_ider: bool,
	pub ocr: bool,
	pub remote_erase: bool,
}

/// `GET /devices/{id}/token` response.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
	pub token: String,
}

impl std::fmt::Debug for TokenResponse {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TokenResponse").field("token", &"<redacted>").finish()
	}
}

/// One entry of `GET /devices/{id}/displays`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
	pub display_index: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub is_active: Option<bool>,
	#[serde(default)]
	pub is_default: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resolution_x: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resolution_y: Option<u32>,
}

/// `GET /devices/{id}/displays` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySelectionResponse {
	#[serde(default)]
	pub displays: Vec<DisplayInfo>,
}

/// `POST /devices/{id}/displays` request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySelectionRequest {
	pub display_index: u32,
}

/// `POST /devices/{id}/consent/code` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConsentCodeRequest {
	pub consent_code: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn features_parse_with_missing_fields() {
		let features: AmtFeatures = serde_json::from_str(r#"{"KVM":true,"kvmAvailable":true,"userConsent":"kvm","optInState":3}"#).unwrap();
		assert!(features.kvm);
		assert!(features.kvm_available);
		assert!(!features.redirection);
		assert_eq!(features.user_consent, "kvm");
		assert_eq!(features.opt_in_state, 3);
		assert!(!features.win_re_boot_supported);
	}

	#[test]
	fn features_request_uses_gateway_field_names() {
		let request = AmtFeaturesRequest {
			user_consent: "all".to_string(),
			enable_kvm: true,
			enable_sol: false,
			enable_ider: true,
			ocr: false,
			remote_erase: true,
		};
		let value = serde_json::to_value(&request).unwrap();
		assert_eq!(value["userConsent"], "all");
		assert_eq!(value["enableKVM"], true);
		assert_eq!(value["enableSOL"], false);
		assert_eq!(value["enableIDER"], true);
		assert_eq!(value["remoteErase"], true);
	}

	#[test]
	fn redirection_status_reads_uppercase_acronyms() {
		let status: RedirectionStatus = serde_json::from_str(r#"{"isKVMConnected":true,"isSOLConnected":false}"#).unwrap();
		assert!(status.is_kvm_connected);
		assert!(!status.is_sol_connected);
		assert!(!status.is_ider_connected);
	}

	#[test]
	fn token_debug_is_redacted() {
		let token = TokenResponse { token: "secret".to_string() };
		assert!(!format!("{token:?}").contains("secret"));
	}
}
