//! Tunable intervals for sessions and power cycles.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Controller timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionTimings {
	/// Interval between keep-alive power-state requests.
	#[serde(with = "millis")]
	pub keep_alive: Duration,
	/// How long a hotkey signal stays set before it is cleared.
	#[serde(with = "millis")]
	pub hotkey_pulse: Duration,
	/// Window after an encoding change in which a transport drop is expected.
	#[serde(with = "millis")]
	pub encoding_grace: Duration,
	/// Upper bound on any single consent prompt; elapsed prompts count as dismissed.
	#[serde(with = "opt_millis")]
	pub consent_reply_timeout: Option<Duration>,
}

impl Default for SessionTimings {
	fn default() -> Self {
		Self {
			keep_alive: Duration::from_secs(15),
			hotkey_pulse: Duration::from_millis(100),
			encoding_grace: Duration::from_secs(6),
			consent_reply_timeout: None,
		}
	}
}

/// Power-cycle polling timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CycleTimings {
	#[serde(with = "millis")]
	pub poll_interval: Duration,
	#[serde(with = "millis")]
	pub state_timeout: Duration,
	/// Pause between the device reaching Off and powering it back on.
	#[serde(with = "millis")]
	pub settle: Duration,
	/// Wait after power-on before polling for On.
	#[serde(with = "millis")]
	pub boot_wait: Duration,
}

impl Default for CycleTimings {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(10),
			state_timeout: Duration::from_secs(180),
			settle: Duration::from_secs(10),
			boot_wait: Duration::from_secs(180),
		}
	}
}

mod millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(value.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

mod opt_millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
		match value {
			Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
		Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_fields_fall_back_to_defaults() {
		let timings: SessionTimings = serde_json::from_str(r#"{"keepAlive": 5000}"#).unwrap();
		assert_eq!(timings.keep_alive, Duration::from_secs(5));
		assert_eq!(timings.encoding_grace, Duration::from_secs(6));
		assert_eq!(timings.consent_reply_timeout, None);

		let cycle: CycleTimings = serde_json::from_str("{}").unwrap();
		assert_eq!(cycle, CycleTimings::default());
	}
}
