//! Hotkeys and KVM encodings offered to the operator.

use serde::{Deserialize, Serialize};

macro_rules! hotkeys {
	($($variant:ident => $id:literal, $label:literal;)*) => {
		/// Key combination the transport injects into the remote session.
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
		pub enum Hotkey {
			$(
				#[serde(rename = $id)]
				$variant,
			)*
		}

		impl Hotkey {
			pub const ALL: &'static [Hotkey] = &[$(Hotkey::$variant),*];

			pub fn id(self) -> &'static str {
				match self {
					$(Hotkey::$variant => $id,)*
				}
			}

			pub fn label(self) -> &'static str {
				match self {
					$(Hotkey::$variant => $label,)*
				}
			}
		}
	};
}

hotkeys! {
	CtrlAltDel => "ctrl-alt-del", "Ctrl + Alt + Del";
	AltTab => "alt-tab", "Alt + Tab";
	AltRelease => "alt-release", "Alt [Release]";
	Windows => "windows", "Windows Key";
	WindowsL => "windows-l", "Windows Key + L";
	WindowsR => "windows-r", "Windows Key + R";
	WindowsUp => "windows-up", "Windows Key + Up";
	WindowsDown => "windows-down", "Windows Key + Down";
	WindowsLeft => "windows-left", "Windows Key + Left";
	WindowsRight => "windows-right", "Windows Key + Right";
	CtrlW => "ctrl-w", "Ctrl + W";
	AltF1 => "alt-f1", "Alt + F1";
	AltF2 => "alt-f2", "Alt + F2";
	AltF3 => "alt-f3", "Alt + F3";
	AltF4 => "alt-f4", "Alt + F4";
	AltF5 => "alt-f5", "Alt + F5";
	AltF6 => "alt-f6", "Alt + F6";
	AltF7 => "alt-f7", "Alt + F7";
	AltF8 => "alt-f8", "Alt + F8";
	AltF9 => "alt-f9", "Alt + F9";
	AltF10 => "alt-f10", "Alt + F10";
	AltF11 => "alt-f11", "Alt + F11";
	AltF12 => "alt-f12", "Alt + F12";
	CtrlAltF1 => "ctrl-alt-f1", "Ctrl + Alt + F1";
	CtrlAltF2 => "ctrl-alt-f2", "Ctrl + Alt + F2";
	CtrlAltF3 => "ctrl-alt-f3", "Ctrl + Alt + F3";
	CtrlAltF4 => "ctrl-alt-f4", "Ctrl + Alt + F4";
	CtrlAltF5 => "ctrl-alt-f5", "Ctrl + Alt + F5";
	CtrlAltF6 => "ctrl-alt-f6", "Ctrl + Alt + F6";
	CtrlAltF7 => "ctrl-alt-f7", "Ctrl + Alt + F7";
	CtrlAltF8 => "ctrl-alt-f8", "Ctrl + Alt + F8";
	CtrlAltF9 => "ctrl-alt-f9", "Ctrl + Alt + F9";
	CtrlAltF10 => "ctrl-alt-f10", "Ctrl + Alt + F10";
	CtrlAltF11 => "ctrl-alt-f11", "Ctrl + Alt + F11";
	CtrlAltF12 => "ctrl-alt-f12", "Ctrl + Alt + F12";
}

impl std::fmt::Display for Hotkey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.id())
	}
}

impl std::str::FromStr for Hotkey {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let needle = s.trim().to_ascii_lowercase();
		Hotkey::ALL
			.iter()
			.copied()
			.find(|hotkey| hotkey.id() == needle)
			.ok_or_else(|| format!("unknown hotkey: {s}"))
	}
}

/// KVM frame encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
	#[default]
	Rle8,
	Rle16,
}

impl Encoding {
	pub fn code(self) -> u8 {
		match self {
			Encoding::Rle8 => 1,
			Encoding::Rle16 => 2,
		}
	}

	pub fn from_code(code: u8) -> Option<Self> {
		match code {
			1 => Some(Encoding::Rle8),
			2 => Some(Encoding::Rle16),
			_ => None,
		}
	}

	pub fn label(self) -> &'static str {
		match self {
			Encoding::Rle8 => "RLE 8",
			Encoding::Rle16 => "RLE 16",
		}
	}
}

impl std::str::FromStr for Encoding {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().replace(' ', "").as_str() {
			"1" | "rle8" => Ok(Encoding::Rle8),
			"2" | "rle16" => Ok(Encoding::Rle16),
			_ => Err(format!("unknown encoding: {s}")),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hotkey_table_has_every_combination() {
		assert_eq!(Hotkey::ALL.len(), 35);
		let ids: std::collections::HashSet<_> = Hotkey::ALL.iter().map(|h| h.id()).collect();
		assert_eq!(ids.len(), 35);
	}

	#[test]
	fn hotkeys_parse_from_ids() {
		assert_eq!("ctrl-alt-del".parse::<Hotkey>(), Ok(Hotkey::CtrlAltDel));
		assert_eq!("Ctrl-Alt-F12".parse::<Hotkey>(), Ok(Hotkey::CtrlAltF12));
		assert_eq!(Hotkey::WindowsL.label(), "Windows Key + L");
		assert!("ctrl-alt-f13".parse::<Hotkey>().is_err());
	}

	#[test]
	fn encodings_use_gateway_codes() {
		assert_eq!(Encoding::Rle16.code(), 2);
		assert_eq!(Encoding::from_code(1), Some(Encoding::Rle8));
		assert_eq!("RLE 16".parse::<Encoding>(), Ok(Encoding::Rle16));
	}
}
