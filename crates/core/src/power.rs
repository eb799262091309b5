//! Power states and gateway power actions.

use serde::Serialize;

/// Device power state, normalized across the gateway's numeric codes and
/// Redfish's `PowerState` strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum PowerState {
	On,
	Off,
	PoweringOn,
	PoweringOff,
	Paused,
	Sleeping,
	Unknown(String),
}

impl PowerState {
	/// Maps a CIM power state code reported by the gateway.
	pub fn from_gateway_code(code: i32) -> Self {
		match code {
			2 => PowerState::On,
			3 | 4 => PowerState::Sleeping,
			0 | 6 | 7 | 8 | 12 | 13 => PowerState::Off,
			other => PowerState::Unknown(other.to_string()),
		}
	}

	/// Maps a Redfish `PowerState` value.
	pub fn from_redfish(value: &str) -> Self {
		match value {
			"On" => PowerState::On,
			"Off" => PowerState::Off,
			"PoweringOn" => PowerState::PoweringOn,
			"PoweringOff" => PowerState::PoweringOff,
			"Paused" => PowerState::Paused,
			other => PowerState::Unknown(other.to_string()),
		}
	}

	pub fn is_on(&self) -> bool {
		matches!(self, PowerState::On)
	}
}

impl std::fmt::Display for PowerState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			PowerState::On => write!(f, "On"),
			PowerState::Off => write!(f, "Off"),
			PowerState::PoweringOn => write!(f, "PoweringOn"),
			PowerState::PoweringOff => write!(f, "PoweringOff"),
			PowerState::Paused => write!(f, "Paused"),
			PowerState::Sleeping => write!(f, "Sleeping"),
			PowerState::Unknown(raw) => write!(f, "Unknown({raw})"),
		}
	}
}

impl std::str::FromStr for PowerState {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match PowerState::from_redfish(s) {
			PowerState::Unknown(_) if s.eq_ignore_ascii_case("sleeping") => Ok(PowerState::Sleeping),
			PowerState::Unknown(_) => Err(format!("unknown power state: {s}")),
			known => Ok(known),
		}
	}
}

/// Numeric power actions accepted by `POST /devices/{id}/power`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PowerAction {
	PowerUp,
	Sleep,
	PowerCycle,
	Hibernate,
	PowerDown,
	Reset,
	SoftOff,
	SoftReset,
}

impl PowerAction {
	pub fn code(self) -> i32 {
		match self {
			PowerAction::PowerUp => 2,
			PowerAction::Sleep => 4,
			PowerAction::PowerCycle => 5,
			PowerAction::Hibernate => 7,
			PowerAction::PowerDown => 8,
			PowerAction::Reset => 10,
			PowerAction::SoftOff => 12,
			PowerAction::SoftReset => 14,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn gateway_code_two_is_on() {
		assert!(PowerState::from_gateway_code(2).is_on());
		assert_eq!(PowerState::from_gateway_code(8), PowerState::Off);
		assert_eq!(PowerState::from_gateway_code(0), PowerState::Off);
		assert_eq!(PowerState::from_gateway_code(99), PowerState::Unknown("99".into()));
	}

	#[test]
	fn redfish_strings_round_trip_through_display() {
		for raw in ["On", "Off", "PoweringOn", "PoweringOff", "Paused"] {
			assert_eq!(PowerState::from_redfish(raw).to_string(), raw);
		}
		assert!("bogus".parse::<PowerState>().is_err());
	}
}
