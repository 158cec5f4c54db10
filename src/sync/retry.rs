use log::warn;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::Settings;
use crate::service::ServiceError;
use crate::sync::error::SyncError;

/// Limits applied around the convergence loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Push attempts (CAS writes) allowed per run.
	pub max_attempts: u32,
	/// Consecutive retryable transport failures tolerated.
	pub max_transport_retries: u32,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
	/// Wall-clock limit for a whole run.
	pub deadline: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 10,
			max_transport_retries: 3,
			initial_backoff: Duration::from_millis(100),
			max_backoff: Duration::from_millis(5000),
			deadline: Duration::from_secs(300),
		}
	}
}

impl RetryPolicy {
	pub fn from_settings(settings: &Settings) -> Self {
		Self {
			max_attempts: settings.max_attempts.max(1),
			max_transport_retries: settings.max_transport_retries,
			initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
			max_backoff: Duration::from_millis(settings.max_backoff_ms.max(settings.initial_backoff_ms)),
			deadline: Duration::from_secs(settings.deadline_secs),
		}
	}

	pub fn backoff(&self) -> Backoff {
		Backoff::new(self.initial_backoff, self.max_backoff)
	}
}

/// Exponential backoff with up to 25% random jitter on top of each step.
#[derive(Debug, Clone)]
pub struct Backoff {
	next: Duration,
	max: Duration,
}

impl Backoff {
	pub fn new(initial: Duration, max: Duration) -> Self {
		Self { next: initial, max }
	}

	pub fn next_delay(&mut self) -> Duration {
		let base = self.next;
		self.next = self.next.checked_mul(2).unwrap_or(self.max).min(self.max);
		let max_jitter = base.as_millis() as u64 / 4;
		let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter);
		base.saturating_add(Duration::from_millis(jitter_ms))
	}

	pub fn reset(&mut self, initial: Duration) {
		self.next = initial;
	}
}

/// Tracks consecutive transport failures for one run.
#[derive(Debug)]
pub(crate) struct TransportRetries {
	failures: u32,
	max: u32,
	initial: Duration,
	backoff: Backoff,
}

impl TransportRetries {
	pub(crate) fn new(policy: &RetryPolicy) -> Self {
		Self {
			failures: 0,
			max: policy.max_transport_retries,
			initial: policy.initial_backoff,
			backoff: policy.backoff(),
		}
	}

	pub(crate) fn succeeded(&mut self) {
		self.failures = 0;
		self.backoff.reset(self.initial);
	}

	/// Sleep before the next try if `err` may go away on its own; otherwise
	/// hand it back as the run's error.
	pub(crate) async fn absorb(&mut self, what: &str, err: ServiceError) -> Result<(), SyncError> {
		if !err.is_retryable() || self.failures >= self.max {
			return Err(err.into());
		}
		self.failures += 1;
		let delay = self.backoff.next_delay();
		warn!(
			"{} failed ({}), retry {}/{} in {:?}",
			what, err, self.failures, self.max, delay
		);
		sleep(delay).await;
		Ok(())
	}
}
