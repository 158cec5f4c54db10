pub mod config;
pub mod observability;
pub mod repo;
pub mod service;
pub mod sync;

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::repo::FileRepo;
use crate::sync::{CloudSync, RetryPolicy, SyncError, SyncReport};

/// Open the repository at `repo_dir`, connect to the configured reference
/// service and run one convergence loop.
pub async fn run_sync(
	settings: &Settings,
	repo_dir: &Path,
	cancel: &CancellationToken,
) -> Result<SyncReport, SyncError> {
	let mut repo = FileRepo::open(repo_dir)?;
	if let Some(source) = &settings.pull_source {
		repo = repo.with_pull_source(source.clone());
	}
	let service = service::connect(settings)?;

	log::debug!(
		"syncing {} as {} with {} service for workspace {}",
		repo_dir.display(),
		settings.hostname,
		settings.service_type,
		settings.workspace
	);

	let sync = CloudSync::new(
		Arc::new(repo),
		Arc::from(service),
		&settings.hostname,
		RetryPolicy::from_settings(settings),
	);
	sync.run(cancel).await
}
