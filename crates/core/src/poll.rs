//! Deadline-bounded polling.
//!
//! A [`Deadline`] is computed once from the moment polling starts and passed by
//! value into every attempt, so the total wait is bounded by
//! `start + timeout` plus at most one poll interval.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Absolute point in time after which polling stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
	started: Instant,
	at: Instant,
}

impl Deadline {
	pub fn after(timeout: Duration) -> Self {
		let started = Instant::now();
		Self {
			started,
			at: started + timeout,
		}
	}

	pub fn instant(self) -> Instant {
		self.at
	}

	pub fn is_expired(self) -> bool {
		Instant::now() >= self.at
	}

	pub fn remaining(self) -> Duration {
		self.at.saturating_duration_since(Instant::now())
	}

	pub fn elapsed(self) -> Duration {
		Instant::now().saturating_duration_since(self.started)
	}
}

#[derive(Debug)]
pub enum PollError<T, E> {
	/// Deadline passed; carries the last observed value, if any probe succeeded.
	Timeout { last: Option<T>, waited: Duration },
	/// A probe failed; polling stops immediately.
	Probe(E),
}

/// Calls `probe` every `interval` until `done` accepts its value or `deadline` passes.
///
/// The first probe runs immediately. Probe errors are not retried.
pub async fn until_or_timeout<T, E, P, Fut, D>(mut probe: P, mut done: D, interval: Duration, deadline: Deadline) -> Result<T, PollError<T, E>>
where
	P: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
	D: FnMut(&T) -> bool,
{
	let mut last = None;
	loop {
		let value = probe().await.map_err(PollError::Probe)?;
		if done(&value) {
			return Ok(value);
		}
		last = Some(value);

		if deadline.is_expired() {
			break;
		}
		let next = Instant::now() + interval;
		if next > deadline.instant() {
			// one final probe at the deadline
			tokio::time::sleep_until(deadline.instant()).await;
			let value = probe().await.map_err(PollError::Probe)?;
			if done(&value) {
				return Ok(value);
			}
			last = Some(value);
			break;
		}
		tokio::time::sleep_until(next).await;
	}

	Err(PollError::Timeout {
		last,
		waited: deadline.elapsed(),
	})
}
