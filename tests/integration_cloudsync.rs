mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use cloudsync::config::Settings;
use cloudsync::repo::{LocalRepo, RepoError};
use cloudsync::service::{CloudService, ReferencesUpdate};
use cloudsync::sync::{
	BookmarkWarning, CommitId, PendingMarkers, RetryPolicy, SyncError, SyncStateStore, Version,
};
use common::{AlwaysRejecting, Cloud, FlakyService, Host, RacingService, fast_policy, linked_hosts};

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_second_run_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
	let cloud = Cloud::new();
	let host = Host::new("alpha");
	let c1 = host.repo.commit(&[], "first")?;
	host.repo.set_bookmark("main", &c1)?;

	let first = host.sync(&cloud).await?;
	assert_eq!(first.attempts, 1);
	assert_eq!(first.version, Version(1));

	let second = host.sync(&cloud).await?;
	assert!(second.is_no_op());
	assert_eq!(second.attempts, 0);
	assert_eq!(cloud.refs().await.version, Version(1));

	let refs = cloud.refs().await;
	assert!(refs.heads.contains(&c1));
	assert_eq!(refs.bookmarks.get("main"), Some(&c1));
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_two_hosts_converge() -> Result<(), Box<dyn std::error::Error>> {
	let cloud = Cloud::new();
	let (alpha, beta) = linked_hosts("alpha", "beta");

	let a1 = alpha.repo.commit(&[], "alpha work")?;
	alpha.repo.set_bookmark("feature", &a1)?;
	let b1 = beta.repo.commit(&[], "beta work")?;

	alpha.sync(&cloud).await?;
	let report = beta.sync(&cloud).await?;
	assert_eq!(report.snapshots_applied, 1);
	assert_eq!(report.attempts, 1);

	alpha.sync(&cloud).await?;

	let expected_heads = [a1.clone(), b1.clone()].into_iter().collect();
	assert_eq!(alpha.repo.heads()?, expected_heads);
	assert_eq!(beta.repo.heads()?, expected_heads);
	assert_eq!(alpha.repo.bookmarks()?, beta.repo.bookmarks()?);
	assert_eq!(cloud.refs().await.heads, expected_heads);

	// Both hosts now agree with the service and with each other.
	assert!(alpha.sync(&cloud).await?.is_no_op());
	assert!(beta.sync(&cloud).await?.is_no_op());
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_conflicting_moves_fork_the_local_bookmark() -> Result<(), Box<dyn std::error::Error>> {
	let cloud = Cloud::new();
	let (alpha, beta) = linked_hosts("alpha", "beta");

	let base = alpha.repo.commit(&[], "base")?;
	alpha.repo.set_bookmark("foo", &base)?;
	alpha.sync(&cloud).await?;
	beta.sync(&cloud).await?;
	assert_eq!(beta.repo.bookmarks()?.get("foo"), Some(&base));

	let b = alpha.repo.commit(&[base.clone()], "alpha moves foo")?;
	alpha.repo.set_bookmark("foo", &b)?;
	alpha.sync(&cloud).await?;

	let c = beta.repo.commit(&[base.clone()], "beta moves foo")?;
	beta.repo.set_bookmark("foo", &c)?;
	let report = beta.sync(&cloud).await?;

	assert_eq!(
		report.warnings,
		vec![BookmarkWarning::Forked {
			name: "foo".to_string(),
			fork: "foo-beta".to_string(),
			target: c.clone(),
		}]
	);
	let marks = beta.repo.bookmarks()?;
	assert_eq!(marks.get("foo"), Some(&b));
	assert_eq!(marks.get("foo-beta"), Some(&c));

	// The fork reaches the other host on its next sync.
	alpha.sync(&cloud).await?;
	assert_eq!(alpha.repo.bookmarks()?, marks);
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_remote_delete_and_local_resurrection() -> Result<(), Box<dyn std::error::Error>> {
	let cloud = Cloud::new();
	let (alpha, beta) = linked_hosts("alpha", "beta");

	let x = alpha.repo.commit(&[], "x")?;
	alpha.repo.set_bookmark("bar", &x)?;
	alpha.repo.set_bookmark("baz", &x)?;
	alpha.sync(&cloud).await?;
	beta.sync(&cloud).await?;

	alpha.repo.delete_bookmark("bar")?;
	alpha.repo.delete_bookmark("baz")?;
	alpha.sync(&cloud).await?;

	// beta left `bar` alone but moved `baz`.
	let y = beta.repo.commit(&[x.clone()], "y")?;
	beta.repo.set_bookmark("baz", &y)?;
	let report = beta.sync(&cloud).await?;
	assert!(report.warnings.is_empty());

	let marks = beta.repo.bookmarks()?;
	assert!(!marks.contains_key("bar"));
	assert_eq!(marks.get("baz"), Some(&y));
	assert_eq!(cloud.refs().await.bookmarks, marks);
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_bookmark_to_unknown_commit_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
	let cloud = Cloud::new();
	let host = Host::new("alpha");
	let known = host.repo.commit(&[], "known")?;
	host.sync(&cloud).await?;

	// Another writer publishes a bookmark to a commit nobody can pull.
	let service = cloud.service();
	let current = cloud.refs().await;
	let ghost = CommitId::new("0123456789abcdef0123456789abcdef01234567");
	let landed = service
		.update_references(&ReferencesUpdate {
			base_version: current.version,
			base_heads: current.heads.clone(),
			new_heads: current.heads.clone(),
			base_bookmarks: current.bookmarks.clone(),
			new_bookmarks: [
				("main".to_string(), known.clone()),
				("ghost".to_string(), ghost.clone()),
			]
			.into_iter()
			.collect(),
			obsmarkers: Vec::new(),
		})
		.await?;
	assert!(landed.accepted);

	let report = host.sync(&cloud).await?;
	assert_eq!(
		report.warnings,
		vec![BookmarkWarning::MissingTarget {
			name: "ghost".to_string(),
			target: ghost,
		}]
	);
	let marks = host.repo.bookmarks()?;
	assert_eq!(marks.get("main"), Some(&known));
	assert!(!marks.contains_key("ghost"));
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_rejected_push_rebases_without_extra_read() -> Result<(), Box<dyn std::error::Error>> {
	let cloud = Cloud::new();
	let host = Host::new("alpha");
	let c1 = host.repo.commit(&[], "mine")?;

	let racing = Arc::new(RacingService::new(cloud.service(), ReferencesUpdate::default()));
	let report = host.sync_with(racing.clone()).await?;

	assert_eq!(report.cas_rejections, 1);
	assert_eq!(report.attempts, 2);
	assert_eq!(report.snapshots_applied, 1);
	assert_eq!(report.version, Version(2));
	assert_eq!(racing.gets.load(Ordering::SeqCst), 1);
	assert_eq!(racing.updates.load(Ordering::SeqCst), 2);
	assert!(cloud.refs().await.heads.contains(&c1));
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_pending_markers_survive_rejection_and_clear_on_accept()
-> Result<(), Box<dyn std::error::Error>> {
	let cloud = Cloud::new();
	let host = Host::new("alpha");
	let old = host.repo.commit(&[], "draft")?;
	let new = host.repo.commit(&[], "amended draft")?;
	let marker = host.repo.obsolete(&old, std::slice::from_ref(&new))?;

	let pending = PendingMarkers::in_dir(host.repo.store_dir());
	assert_eq!(pending.read()?, vec![marker.clone()]);

	let policy = RetryPolicy {
		max_attempts: 2,
		..fast_policy()
	};
	let rejecting = Arc::new(AlwaysRejecting::new());
	let err = host
		.engine(rejecting.clone(), policy)
		.run(&CancellationToken::new())
		.await
		.unwrap_err();
	assert!(matches!(err, SyncError::AttemptsExhausted { attempts: 2 }));
	assert_eq!(rejecting.updates.load(Ordering::SeqCst), 2);
	assert_eq!(pending.read()?, vec![marker.clone()]);

	let report = host.sync(&cloud).await?;
	assert_eq!(report.markers_sent, 1);
	assert!(!pending.exists());
	assert_eq!(cloud.refs().await.obsmarkers, vec![marker]);
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_cloud_markers_are_not_sent_back() -> Result<(), Box<dyn std::error::Error>> {
	let cloud = Cloud::new();
	let (alpha, beta) = linked_hosts("alpha", "beta");

	let old = alpha.repo.commit(&[], "draft")?;
	alpha.sync(&cloud).await?;
	beta.sync(&cloud).await?;

	let new = alpha.repo.commit(&[], "rewritten")?;
	let marker = alpha.repo.obsolete(&old, std::slice::from_ref(&new))?;
	alpha.sync(&cloud).await?;

	let report = beta.sync(&cloud).await?;
	assert_eq!(report.markers_received, 1);
	assert_eq!(beta.repo.obsmarkers()?, vec![marker]);
	assert!(!beta.repo.heads()?.contains(&old));
	assert!(PendingMarkers::in_dir(beta.repo.store_dir()).read()?.is_empty());
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_pull_failure_leaves_repo_and_state_untouched() -> Result<(), Box<dyn std::error::Error>>
{
	let cloud = Cloud::new();
	let alpha = Host::new("alpha");
	// No pull source: beta cannot fetch alpha's commits.
	let beta = Host::new("beta");

	let a1 = alpha.repo.commit(&[], "alpha work")?;
	alpha.repo.set_bookmark("main", &a1)?;
	alpha.sync(&cloud).await?;

	let b1 = beta.repo.commit(&[], "beta work")?;
	beta.repo.set_bookmark("mine", &b1)?;
	let before = beta.repo.bookmarks()?;

	let err = beta.sync(&cloud).await.unwrap_err();
	match err {
		SyncError::Repo(RepoError::PullFailed { missing, .. }) => assert_eq!(missing, vec![a1]),
		other => panic!("expected PullFailed, got {}", other),
	}
	assert_eq!(beta.repo.bookmarks()?, before);
	assert_eq!(
		SyncStateStore::in_dir(beta.repo.store_dir()).load()?.version,
		Version(0)
	);
	assert_eq!(cloud.refs().await.version, Version(1));
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_non_ascii_cloud_head_reports_cleanly() -> Result<(), Box<dyn std::error::Error>> {
	let cloud = Cloud::new();
	let path = cloud.service().path().to_path_buf();
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	std::fs::write(
		&path,
		r#"{"version":3,"heads":["aéééééééééééé"],"bookmarks":{}}"#,
	)?;

	let host = Host::new("alpha");
	let err = host.sync(&cloud).await.unwrap_err();
	assert!(matches!(err, SyncError::Repo(RepoError::PullFailed { .. })));
	let message = err.to_string();
	assert!(message.contains("aéééééééééé"), "{}", message);
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_transport_failures_are_retried_then_surface() -> Result<(), Box<dyn std::error::Error>> {
	let cloud = Cloud::new();
	let host = Host::new("alpha");
	host.repo.commit(&[], "work")?;

	let flaky = Arc::new(FlakyService::new(cloud.service(), 2));
	let report = host.sync_with(flaky.clone()).await?;
	assert_eq!(report.transport_retries, 2);
	assert_eq!(report.version, Version(1));

	let broken = Arc::new(FlakyService::new(cloud.service(), 100));
	let err = host.sync_with(broken.clone()).await.unwrap_err();
	assert!(err.is_retryable());
	// One call plus the default three retries.
	assert_eq!(broken.calls.load(Ordering::SeqCst), 4);
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_held_repository_lock_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
	let cloud = Cloud::new();
	let host = Host::new("alpha");
	host.repo.commit(&[], "work")?;

	let _held = host.repo.transaction()?;
	let err = host.sync(&cloud).await.unwrap_err();
	assert!(matches!(err, SyncError::Repo(RepoError::Locked(_))));
	Ok(())
}

#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_run_sync_with_local_service() -> Result<(), Box<dyn std::error::Error>> {
	let cloud = Cloud::new();
	let host = Host::new("alpha");
	let c1 = host.repo.commit(&[], "work")?;

	let settings = Settings {
		service_type: "local".to_string(),
		hostname: "alpha".to_string(),
		repo_name: "repo".to_string(),
		workspace: "user/test".to_string(),
		local_service_path: cloud.dir.path().to_path_buf(),
		..Settings::default()
	};
	let report = cloudsync::run_sync(&settings, host.dir.path(), &CancellationToken::new()).await?;
	assert_eq!(report.version, Version(1));
	assert!(cloud.refs().await.heads.contains(&c1));

	// Runs through the library entry point count towards the shared registry.
	let metrics = cloudsync::observability::global_sync_metrics();
	assert!(metrics.runs_total.get() >= 1);
	assert!(metrics.encode().contains("cloudsync_push_attempts_total"));

	let bogus = Settings {
		service_type: "carrier-pigeon".to_string(),
		..settings
	};
	let err = cloudsync::run_sync(&bogus, host.dir.path(), &CancellationToken::new())
		.await
		.unwrap_err();
	assert!(matches!(err, SyncError::InvalidService(_)));
	Ok(())
}
