//! Common fixtures for the sync integration tests: hosts with file-backed
//! repositories and scripted reference services.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use cloudsync::observability::SyncMetrics;
use cloudsync::repo::FileRepo;
use cloudsync::service::{CloudService, LocalService, ReferencesUpdate, ServiceError, UpdateOutcome};
use cloudsync::sync::{CloudRefs, CloudSync, RetryPolicy, SyncError, SyncReport, Version};

/// Retry policy without sleeps.
pub fn fast_policy() -> RetryPolicy {
	RetryPolicy {
		initial_backoff: Duration::ZERO,
		max_backoff: Duration::ZERO,
		deadline: Duration::from_secs(30),
		..RetryPolicy::default()
	}
}

/// Directory shared by every host's `LocalService`.
pub struct Cloud {
	pub dir: TempDir,
}

impl Cloud {
	pub fn new() -> Self {
		Self {
			dir: tempfile::tempdir().expect("create cloud dir"),
		}
	}

	pub fn service(&self) -> LocalService {
		LocalService::new(self.dir.path(), "repo", "user/test")
	}

	pub async fn refs(&self) -> CloudRefs {
		self.service()
			.get_references(Version(0))
			.await
			.expect("read cloud refs")
	}
}

/// One clone of the repository on a named host.
pub struct Host {
	pub name: String,
	pub dir: TempDir,
	pub repo: FileRepo,
}

impl Host {
	pub fn new(name: &str) -> Self {
		let dir = tempfile::tempdir().expect("create host dir");
		let repo = FileRepo::open(dir.path()).expect("open repo");
		Self {
			name: name.to_string(),
			dir,
			repo,
		}
	}

	/// Pull missing commits from `other`.
	pub fn pull_from(&mut self, other: &Host) {
		self.repo = self.repo.clone().with_pull_source(other.dir.path());
	}

	pub fn engine(&self, service: Arc<dyn CloudService>, policy: RetryPolicy) -> CloudSync {
		CloudSync::new(Arc::new(self.repo.clone()), service, &self.name, policy)
			.with_metrics(Arc::new(SyncMetrics::new()))
	}

	pub async fn sync_with(&self, service: Arc<dyn CloudService>) -> Result<SyncReport, SyncError> {
		self.engine(service, fast_policy())
			.run(&CancellationToken::new())
			.await
	}

	pub async fn sync(&self, cloud: &Cloud) -> Result<SyncReport, SyncError> {
		self.sync_with(Arc::new(cloud.service())).await
	}
}

/// Wire two hosts so each can pull from the other.
pub fn linked_hosts(a: &str, b: &str) -> (Host, Host) {
	let mut first = Host::new(a);
	let mut second = Host::new(b);
	first.pull_from(&second);
	second.pull_from(&first);
	(first, second)
}

/// Lets another writer land `competitor` on the service right before the
/// first push, so that push loses the race. Counts calls.
pub struct RacingService {
	pub inner: LocalService,
	competitor: Mutex<Option<ReferencesUpdate>>,
	pub gets: AtomicU32,
	pub updates: AtomicU32,
}

impl RacingService {
	pub fn new(inner: LocalService, competitor: ReferencesUpdate) -> Self {
		Self {
			inner,
			competitor: Mutex::new(Some(competitor)),
			gets: AtomicU32::new(0),
			updates: AtomicU32::new(0),
		}
	}
}

#[async_trait]
impl CloudService for RacingService {
	async fn get_references(&self, base_version: Version) -> Result<CloudRefs, ServiceError> {
		self.gets.fetch_add(1, Ordering::SeqCst);
		self.inner.get_references(base_version).await
	}

	async fn update_references(
		&self,
		update: &ReferencesUpdate,
	) -> Result<UpdateOutcome, ServiceError> {
		self.updates.fetch_add(1, Ordering::SeqCst);
		let competitor = self.competitor.lock().expect("competitor lock").take();
		if let Some(competitor) = competitor {
			let landed = self.inner.update_references(&competitor).await?;
			assert!(landed.accepted, "competing update should land");
		}
		self.inner.update_references(update).await
	}
}

/// Rejects every push and moves its version forward each time, as if
/// another host always wins.
pub struct AlwaysRejecting {
	version: AtomicU64,
	pub updates: AtomicU32,
}

impl AlwaysRejecting {
	pub fn new() -> Self {
		Self {
			version: AtomicU64::new(1),
			updates: AtomicU32::new(0),
		}
	}
}

#[async_trait]
impl CloudService for AlwaysRejecting {
	async fn get_references(&self, _: Version) -> Result<CloudRefs, ServiceError> {
		Ok(CloudRefs {
			version: Version(self.version.load(Ordering::SeqCst)),
			..CloudRefs::default()
		})
	}

	async fn update_references(
		&self,
		_: &ReferencesUpdate,
	) -> Result<UpdateOutcome, ServiceError> {
		self.updates.fetch_add(1, Ordering::SeqCst);
		let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
		Ok(UpdateOutcome {
			accepted: false,
			refs: CloudRefs {
				version: Version(version),
				..CloudRefs::default()
			},
		})
	}
}

/// Fails the first `failures` calls with a transport error.
pub struct FlakyService {
	pub inner: LocalService,
	remaining: AtomicU32,
	pub calls: AtomicU32,
}

impl FlakyService {
	pub fn new(inner: LocalService, failures: u32) -> Self {
		Self {
			inner,
			remaining: AtomicU32::new(failures),
			calls: AtomicU32::new(0),
		}
	}

	fn fail(&self) -> Result<(), ServiceError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let left = self.remaining.load(Ordering::SeqCst);
		if left > 0 {
			self.remaining.store(left - 1, Ordering::SeqCst);
			return Err(ServiceError::Transport("connection reset by peer".to_string()));
		}
		Ok(())
	}
}

#[async_trait]
impl CloudService for FlakyService {
	async fn get_references(&self, base_version: Version) -> Result<CloudRefs, ServiceError> {
		self.fail()?;
		self.inner.get_references(base_version).await
	}

	async fn update_references(
		&self,
		update: &ReferencesUpdate,
	) -> Result<UpdateOutcome, ServiceError> {
		self.fail()?;
		self.inner.update_references(update).await
	}
}
