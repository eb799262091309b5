//! Operator-facing notices.
//!
//! Everything the session layer wants a human to see goes through a
//! [`Notifier`] as a [`Notice`] carrying a stable message key. Frontends
//! translate the key; [`MessageCatalog`] provides the English defaults.

use std::collections::HashMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
	Info,
	Warning,
	Error,
}

/// Stable message keys understood by frontends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageKey {
	ErrorRetrieve,
	KvmConnection,
	RedirectionConflict,
	KvmUnavailable,
	PowerUpFailed,
	ConsentFailed,
	IderEnded,
	IderActive,
	CheckingPowerState,
	CheckingRedirection,
	CheckingFeatures,
	CheckingConsent,
	ConnectingKvm,
}

impl MessageKey {
	pub const ALL: [MessageKey; 13] = [
		MessageKey::ErrorRetrieve,
		MessageKey::KvmConnection,
		MessageKey::RedirectionConflict,
		MessageKey::KvmUnavailable,
		MessageKey::PowerUpFailed,
		MessageKey::ConsentFailed,
		MessageKey::IderEnded,
		MessageKey::IderActive,
		MessageKey::CheckingPowerState,
		MessageKey::CheckingRedirection,
		MessageKey::CheckingFeatures,
		MessageKey::CheckingConsent,
		MessageKey::ConnectingKvm,
	];

	pub fn key(self) -> &'static str {
		match self {
			MessageKey::ErrorRetrieve => "kvm.errorRetrieve.value",
			MessageKey::KvmConnection => "errors.kvmConnection.value",
			MessageKey::RedirectionConflict => "errors.redirectionSession.value",
			MessageKey::KvmUnavailable => "kvm.unavailable.value",
			MessageKey::PowerUpFailed => "errors.powerUp.value",
			MessageKey::ConsentFailed => "errors.userConsent.value",
			MessageKey::IderEnded => "warning.iderEnded.value",
			MessageKey::IderActive => "warning.iderActive.value",
			MessageKey::CheckingPowerState => "kvm.status.checkingPowerState.value",
			MessageKey::CheckingRedirection => "kvm.status.checkingRedirection.value",
			MessageKey::CheckingFeatures => "kvm.status.checkingAMTFeatures.value",
			MessageKey::CheckingConsent => "kvm.status.checkingConsent.value",
			MessageKey::ConnectingKvm => "kvm.status.connectingKVM.value",
		}
	}

	pub fn default_text(self) -> &'static str {
		match self {
			MessageKey::ErrorRetrieve => "Error retrieving KVM status",
			MessageKey::KvmConnection => "Unable to connect to KVM session",
			MessageKey::RedirectionConflict => "Another redirection session is already active on this device",
			MessageKey::KvmUnavailable => "KVM is not available on this device",
			MessageKey::PowerUpFailed => "Error powering up the device",
			MessageKey::ConsentFailed => "User consent was not granted",
			MessageKey::IderEnded => "IDE-R session ended",
			MessageKey::IderActive => "IDE-R session is active",
			MessageKey::CheckingPowerState => "Checking power state...",
			MessageKey::CheckingRedirection => "Checking for active redirection sessions...",
			MessageKey::CheckingFeatures => "Checking AMT features...",
			MessageKey::CheckingConsent => "Checking user consent...",
			MessageKey::ConnectingKvm => "Connecting to KVM...",
		}
	}
}

impl std::fmt::Display for MessageKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.key())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
	pub level: NoticeLevel,
	pub key: MessageKey,
	/// Optional technical detail (error text) appended by frontends.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub detail: Option<String>,
}

impl Notice {
	pub fn info(key: MessageKey) -> Self {
		Self {
			level: NoticeLevel::Info,
			key,
			detail: None,
		}
	}

	pub fn warning(key: MessageKey) -> Self {
		Self {
			level: NoticeLevel::Warning,
			key,
			detail: None,
		}
	}

	pub fn error(key: MessageKey) -> Self {
		Self {
			level: NoticeLevel::Error,
			key,
			detail: None,
		}
	}

	pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
		self.detail = Some(detail.into());
		self
	}
}

/// Sink for operator notices and the loading status line.
pub trait Notifier: Send + Sync {
	fn notify(&self, notice: Notice);

	/// Replaces the loading status line; `None` clears it.
	fn status(&self, _status: Option<MessageKey>) {}
}

/// Forwards notices to `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier {
	catalog: MessageCatalog,
}

impl TracingNotifier {
	pub fn new(catalog: MessageCatalog) -> Self {
		Self { catalog }
	}
}

impl Notifier for TracingNotifier {
	fn notify(&self, notice: Notice) {
		let text = self.catalog.text(notice.key);
		let detail = notice.detail.as_deref().unwrap_or("");
		match notice.level {
			NoticeLevel::Info => tracing::info!(target = "amt.session", key = %notice.key, detail, "{text}"),
			NoticeLevel::Warning => tracing::warn!(target = "amt.session", key = %notice.key, detail, "{text}"),
			NoticeLevel::Error => tracing::error!(target = "amt.session", key = %notice.key, detail, "{text}"),
		}
	}

	fn status(&self, status: Option<MessageKey>) {
		if let Some(key) = status {
			tracing::debug!(target = "amt.session", key = %key, "{}", self.catalog.text(key));
		}
	}
}

/// Message texts, defaulting to the built-in English strings.
#[derive(Debug, Default, Clone)]
pub struct MessageCatalog {
	overrides: HashMap<String, String>,
}

impl MessageCatalog {
	pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
		Self { overrides }
	}

	pub fn text(&self, key: MessageKey) -> &str {
		self.overrides.get(key.key()).map(String::as_str).unwrap_or_else(|| key.default_text())
	}

	/// Renders a notice as one line, detail appended after a colon.
	pub fn render(&self, notice: &Notice) -> String {
		match &notice.detail {
			Some(detail) => format!("{}: {detail}", self.text(notice.key)),
			None => self.text(notice.key).to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys_are_unique() {
		let mut seen = std::collections::HashSet::new();
		for key in MessageKey::ALL {
			assert!(seen.insert(key.key()), "duplicate key {}", key.key());
		}
	}

	#[test]
	fn catalog_prefers_overrides() {
		let mut overrides = HashMap::new();
		overrides.insert("kvm.errorRetrieve.value".to_string(), "KVM-Status konnte nicht abgerufen werden".to_string());
		let catalog = MessageCatalog::with_overrides(overrides);

		assert_eq!(catalog.text(MessageKey::ErrorRetrieve), "KVM-Status konnte nicht abgerufen werden");
		assert_eq!(catalog.text(MessageKey::KvmConnection), "Unable to connect to KVM session");
		assert_eq!(
			catalog.render(&Notice::error(MessageKey::KvmConnection).with_detail("refused")),
			"Unable to connect to KVM session: refused"
		);
	}
}
