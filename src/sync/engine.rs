use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::observability::{SyncMetrics, global_sync_metrics};
use crate::repo::LocalRepo;
use crate::service::{CloudService, ReferencesUpdate};
use crate::sync::apply::{ApplyOutcome, CloudChangeApplier};
use crate::sync::bookmarks::{BookmarkReconciler, BookmarkWarning};
use crate::sync::error::SyncError;
use crate::sync::forkname::ForkNamer;
use crate::sync::obsmarkers::PendingMarkers;
use crate::sync::retry::{RetryPolicy, TransportRetries};
use crate::sync::state::SyncStateStore;
use crate::sync::types::{CloudRefs, Version};

/// Summary of one successful sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
	/// Version this host is synced to.
	pub version: Version,
	pub attempts: u32,
	pub cas_rejections: u32,
	pub snapshots_applied: u32,
	pub transport_retries: u32,
	pub markers_sent: usize,
	pub markers_received: usize,
	pub warnings: Vec<BookmarkWarning>,
	pub elapsed: Duration,
}

impl SyncReport {
	/// Nothing was pulled in and nothing was pushed.
	pub fn is_no_op(&self) -> bool {
		self.snapshots_applied == 0 && self.attempts == 0
	}

	fn record_apply(&mut self, outcome: ApplyOutcome) {
		self.snapshots_applied += 1;
		self.markers_received += outcome.markers_merged;
		self.warnings.extend(outcome.bookmarks.warnings);
	}
}

/// Drives one repository to agreement with the reference service.
///
/// Each run fetches the service state, applies it when the service has
/// moved on, and pushes the local heads and bookmarks with a
/// compare-and-swap on the last synced version. A rejected push carries the
/// service's current state, which is applied before trying again.
pub struct CloudSync {
	repo: Arc<dyn LocalRepo>,
	service: Arc<dyn CloudService>,
	reconciler: BookmarkReconciler,
	policy: RetryPolicy,
	metrics: Arc<SyncMetrics>,
}

impl CloudSync {
	pub fn new(
		repo: Arc<dyn LocalRepo>,
		service: Arc<dyn CloudService>,
		hostname: &str,
		policy: RetryPolicy,
	) -> Self {
		Self {
			repo,
			service,
			reconciler: BookmarkReconciler::new(ForkNamer::new(hostname)),
			policy,
			metrics: global_sync_metrics(),
		}
	}

	pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
		self.metrics = metrics;
		self
	}

	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Run until local and remote agree, `cancel` fires, or the policy's
	/// limits are hit. Dropping the work in progress releases any held
	/// repository lock without committing.
	pub async fn run(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
		let started = Instant::now();
		self.metrics.runs_total.inc();
		let timer = self.metrics.run_duration_seconds.start_timer();

		let result = tokio::select! {
			biased;
			_ = cancel.cancelled() => Err(SyncError::Cancelled),
			r = timeout(self.policy.deadline, self.converge()) => match r {
				Ok(r) => r,
				Err(_) => Err(SyncError::DeadlineExceeded(self.policy.deadline)),
			},
		};
		timer.observe_duration();

		match result {
			Ok(mut report) => {
				report.elapsed = started.elapsed();
				if report.is_no_op() {
					info!("already in sync at version {}", report.version);
				} else {
					info!(
						"synced to version {} in {:?} ({} push attempt(s), {} snapshot(s) applied)",
						report.version, report.elapsed, report.attempts, report.snapshots_applied
					);
				}
				Ok(report)
			}
			Err(e) => {
				self.metrics.run_failures_total.inc();
				error!("sync failed after {:?}: {}", started.elapsed(), e);
				Err(e)
			}
		}
	}

	async fn converge(&self) -> Result<SyncReport, SyncError> {
		let store = self.repo.store_dir();
		let states = SyncStateStore::in_dir(store);
		let pending = PendingMarkers::in_dir(store);
		let applier = CloudChangeApplier::new(self.repo.as_ref(), &self.reconciler, &states);

		let mut state = states.load()?;
		let mut report = SyncReport {
			version: state.version,
			..SyncReport::default()
		};
		let mut transport = TransportRetries::new(&self.policy);
		let mut backoff = self.policy.backoff();
		let mut refs: Option<CloudRefs> = None;

		loop {
			let current = match refs.take() {
				Some(r) => r,
				None => self.fetch(state.version, &mut transport, &mut report).await?,
			};

			if current.version != state.version {
				let outcome = applier.apply(&mut state, &current).await?;
				self.metrics.snapshots_applied_total.inc();
				self.metrics
					.bookmark_forks_total
					.inc_by(outcome.bookmarks.forks() as u64);
				self.metrics
					.missing_targets_total
					.inc_by(outcome.bookmarks.missing_targets() as u64);
				self.metrics
					.markers_received_total
					.inc_by(outcome.markers_merged as u64);
				report.record_apply(outcome);
			}

			let local_heads = self.repo.heads()?;
			let local_bookmarks = self.repo.bookmarks()?;
			if state.is_converged_with(&local_heads, &local_bookmarks) {
				report.version = state.version;
				return Ok(report);
			}

			if report.attempts >= self.policy.max_attempts {
				return Err(SyncError::AttemptsExhausted {
					attempts: report.attempts,
				});
			}

			let markers = pending.read()?;
			let update = ReferencesUpdate {
				base_version: state.version,
				base_heads: state.heads.clone(),
				new_heads: local_heads,
				base_bookmarks: state.bookmarks.clone(),
				new_bookmarks: local_bookmarks,
				obsmarkers: markers,
			};
			report.attempts += 1;
			self.metrics.push_attempts_total.inc();
			debug!(
				"pushing {} head(s), {} bookmark(s), {} marker(s) on top of version {}",
				update.new_heads.len(),
				update.new_bookmarks.len(),
				update.obsmarkers.len(),
				update.base_version
			);

			let outcome = match self.service.update_references(&update).await {
				Ok(outcome) => {
					transport.succeeded();
					outcome
				}
				Err(e) => {
					// The push may or may not have landed; re-read and compare.
					transport.absorb("update_references", e).await?;
					report.transport_retries += 1;
					self.metrics.transport_retries_total.inc();
					continue;
				}
			};

			if outcome.accepted {
				let sent = update.obsmarkers.len();
				{
					let _lock = self.repo.lock()?;
					let mut next = state.clone();
					next.update(outcome.refs.version, update.new_heads, update.new_bookmarks);
					states.save(&next)?;
					pending.remove_sent(&update.obsmarkers)?;
					state = next;
				}
				report.markers_sent += sent;
				report.version = state.version;
				self.metrics.markers_sent_total.inc_by(sent as u64);
				return Ok(report);
			}

			report.cas_rejections += 1;
			self.metrics.cas_rejections_total.inc();
			let delay = backoff.next_delay();
			warn!(
				"push based on version {} was rejected, service is at version {}; retrying in {:?}",
				update.base_version, outcome.refs.version, delay
			);
			sleep(delay).await;
			refs = Some(outcome.refs);
		}
	}

	async fn fetch(
		&self,
		version: Version,
		transport: &mut TransportRetries,
		report: &mut SyncReport,
	) -> Result<CloudRefs, SyncError> {
		loop {
			match self.service.get_references(version).await {
				Ok(refs) => {
					transport.succeeded();
					debug!("service is at version {} (local {})", refs.version, version);
					return Ok(refs);
				}
				Err(e) => {
					transport.absorb("get_references", e).await?;
					report.transport_retries += 1;
					self.metrics.transport_retries_total.inc();
				}
			}
		}
	}
}
