//! Display selection for multi-monitor devices.

use amt_protocol::DisplayInfo;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayOption {
	pub index: u32,
	pub label: String,
	/// Inactive displays are listed but cannot be selected.
	pub disabled: bool,
}

impl DisplayOption {
	pub fn from_info(info: &DisplayInfo) -> Self {
		let label = match (info.resolution_x, info.resolution_y) {
			(Some(x), Some(y)) if x > 0 && y > 0 => format!("Display {} ({x} x {y})", info.display_index + 1),
			_ => format!("Display {}", info.display_index + 1),
		};
		Self {
			index: info.display_index,
			label,
			disabled: info.is_active == Some(false),
		}
	}
}

/// Four displays with only the first one enabled, used when the device does
/// not report its displays.
pub fn fallback_displays() -> Vec<DisplayOption> {
	(0..4)
		.map(|index| DisplayOption {
			index,
			label: format!("Display {}", index + 1),
			disabled: index != 0,
		})
		.collect()
}

/// Options plus the display that should be selected.
///
/// The device's default display wins; otherwise `current` is kept when it is
/// listed and enabled; otherwise the first enabled display is chosen.
pub fn resolve_displays(infos: &[DisplayInfo], current: u32) -> (Vec<DisplayOption>, u32) {
	let options: Vec<DisplayOption> = infos.iter().map(DisplayOption::from_info).collect();

	if let Some(default) = infos.iter().find(|d| d.is_default) {
		return (options, default.display_index);
	}

	let keep = options.iter().any(|o| o.index == current && !o.disabled);
	let selected = if keep {
		current
	} else {
		options.iter().find(|o| !o.disabled).map(|o| o.index).unwrap_or(current)
	};
	(options, selected)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn info(index: u32, active: Option<bool>, default: bool) -> DisplayInfo {
		DisplayInfo {
			display_index: index,
			is_active: active,
			is_default: default,
			resolution_x: None,
			resolution_y: None,
		}
	}

	#[test]
	fn label_includes_resolution_when_known() {
		let mut display = info(1, Some(true), false);
		display.resolution_x = Some(1920);
		display.resolution_y = Some(1080);
		assert_eq!(DisplayOption::from_info(&display).label, "Display 2 (1920 x 1080)");
		assert_eq!(DisplayOption::from_info(&info(0, None, false)).label, "Display 1");
	}

	#[test]
	fn default_display_wins() {
		let (_, selected) = resolve_displays(&[info(0, Some(true), false), info(2, Some(true), true)], 0);
		assert_eq!(selected, 2);
	}

	#[test]
	fn inactive_current_moves_to_first_active() {
		let infos = [info(0, Some(false), false), info(1, Some(true), false)];
		let (options, selected) = resolve_displays(&infos, 0);
		assert!(options[0].disabled);
		assert_eq!(selected, 1);
	}

	#[test]
	fn fallback_enables_only_first_display() {
		let displays = fallback_displays();
		assert_eq!(displays.len(), 4);
		assert!(!displays[0].disabled);
		assert!(displays[1..].iter().all(|d| d.disabled));
	}
}
