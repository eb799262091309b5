//! Terminal-side consent prompt and notice sink.

use amt_session::{ConsentKind, ConsentPrompt, ConsentReply, MessageCatalog, MessageKey, Notice, NoticeLevel, Notifier};
use async_trait::async_trait;
use colored::Colorize;
use parking_lot::Mutex;
use tracing::debug;

use crate::output::{Diagnostic, DiagnosticLevel};

/// Asks consent questions on stderr and reads answers from stdin.
///
/// End of input counts as a dismissal, so piping `/dev/null` declines everything.
#[derive(Debug, Clone, Default)]
pub struct TerminalPrompt {
	assume_yes: bool,
	consent_code: Option<String>,
}

impl TerminalPrompt {
	pub fn new() -> Self {
		Self::default()
	}

	/// Accept power-up and enablement questions without asking.
	pub fn assume_yes(mut self, yes: bool) -> Self {
		self.assume_yes = yes;
		self
	}

	/// Answer the user-consent code question with `code`.
	pub fn consent_code(mut self, code: Option<String>) -> Self {
		self.consent_code = code;
		self
	}
}

#[async_trait]
impl ConsentPrompt for TerminalPrompt {
	async fn ask(&self, kind: ConsentKind) -> ConsentReply {
		match kind {
			ConsentKind::UserConsentCode => {
				if let Some(code) = &self.consent_code {
					return ConsentReply::Code(code.clone());
				}
				match read_answer("Enter the consent code shown on the device:").await {
					Some(code) if !code.is_empty() => ConsentReply::Code(code),
					_ => ConsentReply::Dismissed,
				}
			}
			ConsentKind::PowerUp | ConsentKind::EnableKvm => {
				if self.assume_yes {
					debug!(target = "amtctl", %kind, "consent assumed");
					return ConsentReply::Accepted;
				}
				let question = match kind {
					ConsentKind::PowerUp => "The device is powered off. Power it on? [y/N]",
					_ => "KVM redirection is disabled on the device. Enable it? [y/N]",
				};
				match read_answer(question).await {
					Some(answer) if is_yes(&answer) => ConsentReply::Accepted,
					_ => ConsentReply::Dismissed,
				}
			}
		}
	}
}

async fn read_answer(question: &str) -> Option<String> {
	eprint!("{} ", question.bold());
	let line = tokio::task::spawn_blocking(|| {
		let mut input = String::new();
		match std::io::stdin().read_line(&mut input) {
			Ok(0) | Err(_) => None,
			Ok(_) => Some(input),
		}
	})
	.await
	.ok()
	.flatten();
	line.map(|answer| answer.trim().to_string())
}

fn is_yes(answer: &str) -> bool {
	matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Echoes notices to stderr and keeps them for the result envelope.
#[derive(Debug, Default)]
pub struct TerminalNotifier {
	catalog: MessageCatalog,
	collected: Mutex<Vec<Diagnostic>>,
}

impl TerminalNotifier {
	pub fn new(catalog: MessageCatalog) -> Self {
		Self {
			catalog,
			collected: Mutex::new(Vec::new()),
		}
	}

	/// Takes the notices collected so far.
	pub fn drain(&self) -> Vec<Diagnostic> {
		std::mem::take(&mut *self.collected.lock())
	}
}

impl Notifier for TerminalNotifier {
	fn notify(&self, notice: Notice) {
		let message = self.catalog.render(&notice);
		let (level, label) = match notice.level {
			NoticeLevel::Info => (DiagnosticLevel::Info, "info".normal()),
			NoticeLevel::Warning => (DiagnosticLevel::Warning, "warning".yellow()),
			NoticeLevel::Error => (DiagnosticLevel::Error, "error".red()),
		};
		eprintln!("[{label}] {message}");
		self.collected.lock().push(Diagnostic {
			level,
			message,
			source: Some(notice.key.key().to_string()),
		});
	}

	fn status(&self, status: Option<MessageKey>) {
		if let Some(key) = status {
			eprintln!("{}", self.catalog.text(key).dimmed());
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_explicit_yes_accepts() {
		assert!(is_yes("y"));
		assert!(is_yes(" YES \n"));
		assert!(!is_yes(""));
		assert!(!is_yes("no"));
		assert!(!is_yes("sure"));
	}

	#[tokio::test]
	async fn preset_answers_skip_the_terminal() {
		let prompt = TerminalPrompt::new().assume_yes(true).consent_code(Some("123456".into()));
		assert_eq!(prompt.ask(ConsentKind::PowerUp).await, ConsentReply::Accepted);
		assert_eq!(prompt.ask(ConsentKind::EnableKvm).await, ConsentReply::Accepted);
		assert_eq!(prompt.ask(ConsentKind::UserConsentCode).await, ConsentReply::Code("123456".into()));
	}

	#[test]
	fn notices_become_diagnostics_with_their_key() {
		let notifier = TerminalNotifier::default();
		notifier.notify(Notice::warning(MessageKey::IderActive));
		notifier.notify(Notice::error(MessageKey::KvmConnection).with_detail("relay closed"));

		let collected = notifier.drain();
		assert_eq!(collected.len(), 2);
		assert_eq!(collected[0].level, DiagnosticLevel::Warning);
		assert_eq!(collected[0].source.as_deref(), Some("warning.iderActive.value"));
		assert_eq!(collected[1].level, DiagnosticLevel::Error);
		assert!(notifier.drain().is_empty());
	}
}
