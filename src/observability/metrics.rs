use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Global sync metrics instance
static GLOBAL_SYNC_METRICS: Lazy<Arc<SyncMetrics>> = Lazy::new(|| Arc::new(SyncMetrics::new()));

/// Get a handle to the global sync metrics
pub fn global_sync_metrics() -> Arc<SyncMetrics> {
	Arc::clone(&GLOBAL_SYNC_METRICS)
}

/// Prometheus metrics for the convergence loop
pub struct SyncMetrics {
	registry: Registry,

	pub runs_total: IntCounter,
	pub run_failures_total: IntCounter,
	pub push_attempts_total: IntCounter,
	pub cas_rejections_total: IntCounter,
	pub snapshots_applied_total: IntCounter,
	pub transport_retries_total: IntCounter,
	pub bookmark_forks_total: IntCounter,
	pub missing_targets_total: IntCounter,
	pub markers_sent_total: IntCounter,
	pub markers_received_total: IntCounter,
	pub run_duration_seconds: Histogram,
}

fn counter(name: &str, help: &str) -> IntCounter {
	IntCounter::with_opts(Opts::new(name, help).namespace("cloudsync"))
		.expect("metric options are static and valid")
}

impl SyncMetrics {
	pub fn new() -> Self {
		let registry = Registry::new();

		let runs_total = counter("runs_total", "Sync runs started");
		let run_failures_total = counter("run_failures_total", "Sync runs that ended in an error");
		let push_attempts_total = counter("push_attempts_total", "Compare-and-swap pushes sent");
		let cas_rejections_total = counter(
			"cas_rejections_total",
			"Pushes rejected because the service moved on",
		);
		let snapshots_applied_total = counter(
			"snapshots_applied_total",
			"Cloud snapshots applied to the local repository",
		);
		let transport_retries_total = counter(
			"transport_retries_total",
			"Service calls retried after a transport failure",
		);
		let bookmark_forks_total = counter(
			"bookmark_forks_total",
			"Local bookmarks renamed after a conflicting remote move",
		);
		let missing_targets_total = counter(
			"missing_targets_total",
			"Remote bookmarks skipped because their commit is unknown",
		);
		let markers_sent_total = counter("markers_sent_total", "Obsolescence markers pushed");
		let markers_received_total = counter(
			"markers_received_total",
			"Obsolescence markers merged from the cloud",
		);

		let run_duration_seconds = Histogram::with_opts(
			HistogramOpts::new("run_duration_seconds", "Duration of sync runs in seconds")
				.namespace("cloudsync")
				.buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0, 300.0]),
		)
		.expect("metric options are static and valid");

		let metrics = Self {
			registry,
			runs_total,
			run_failures_total,
			push_attempts_total,
			cas_rejections_total,
			snapshots_applied_total,
			transport_retries_total,
			bookmark_forks_total,
			missing_targets_total,
			markers_sent_total,
			markers_received_total,
			run_duration_seconds,
		};
		metrics.register_all();
		metrics
	}

	fn register_all(&self) {
		let counters = [
			&self.runs_total,
			&self.run_failures_total,
			&self.push_attempts_total,
			&self.cas_rejections_total,
			&self.snapshots_applied_total,
			&self.transport_retries_total,
			&self.bookmark_forks_total,
			&self.missing_targets_total,
			&self.markers_sent_total,
			&self.markers_received_total,
		];
		for c in counters {
			let _ = self.registry.register(Box::new(c.clone()));
		}
		let _ = self
			.registry
			.register(Box::new(self.run_duration_seconds.clone()));
	}

	/// Render all metrics in the Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::error!("failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

impl Default for SyncMetrics {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn test_metrics_are_registered_under_namespace() {
		let metrics = SyncMetrics::new();
		metrics.runs_total.inc();
		metrics.cas_rejections_total.inc_by(2);
		metrics.run_duration_seconds.observe(0.2);

		let text = metrics.encode();
		assert!(text.contains("cloudsync_runs_total 1"));
		assert!(text.contains("cloudsync_cas_rejections_total 2"));
		assert!(text.contains("cloudsync_run_duration_seconds_count 1"));
	}

	#[test]
	fn test_global_metrics_are_shared() {
		let a = global_sync_metrics();
		let b = global_sync_metrics();
		assert!(Arc::ptr_eq(&a, &b));
	}
}
