//! Local repository seam.
//!
//! The sync engine only talks to the local clone through [`LocalRepo`] and
//! the scoped [`RepoTransaction`] it hands out. [`FileRepo`] is the
//! file-backed implementation used by the binary and the tests.

pub mod file;
pub mod lock;

pub use file::{CommitRecord, FileRepo, FileTransaction, Phase};
pub use lock::{LockError, LockFile, LockHolder};

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::sync::types::{BookmarkChange, Bookmarks, CommitId, Heads, ObsMarker};

/// Where a batch of obsolescence markers came from. Markers created on this
/// host must reach the service on the next push; markers received from the
/// service must not be sent back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOrigin {
	Local,
	Cloud,
}

#[derive(Debug, Error)]
pub enum RepoError {
	#[error(transparent)]
	Locked(#[from] LockError),

	#[error("repository I/O error: {0}")]
	Io(#[from] io::Error),

	#[error("repository file {} is corrupt: {source}", .path.display())]
	Corrupt {
		path: PathBuf,
		source: serde_json::Error,
	},

	#[error("could not pull {} commit(s) from {from}: {}", .missing.len(), format_ids(.missing))]
	PullFailed { from: String, missing: Vec<CommitId> },

	#[error("unknown commit {0}")]
	UnknownCommit(CommitId),
}

fn format_ids(ids: &[CommitId]) -> String {
	ids.iter().map(|id| id.short()).collect::<Vec<_>>().join(", ")
}

/// Read access to a local clone plus the pull and lock collaborators.
#[async_trait]
pub trait LocalRepo: Send + Sync {
	/// Directory holding the sync state and the pending marker buffer.
	fn store_dir(&self) -> &Path;

	/// Non-obsolete draft heads.
	fn heads(&self) -> Result<Heads, RepoError>;

	fn bookmarks(&self) -> Result<Bookmarks, RepoError>;

	fn contains(&self, commit: &CommitId) -> Result<bool, RepoError>;

	/// Make sure every listed commit exists locally.
	async fn pull(&self, commits: &[CommitId]) -> Result<(), RepoError>;

	/// Take the exclusive repository lock. Fails immediately if another
	/// process holds it.
	fn lock(&self) -> Result<Box<dyn RepoTransaction + '_>, RepoError>;
}

/// Staged changes under the repository lock. Nothing is visible to other
/// readers until `commit`; dropping the transaction discards whatever was
/// staged since the last commit and releases the lock.
pub trait RepoTransaction: Send {
	/// Bookmarks as staged in this transaction.
	fn bookmarks(&self) -> Bookmarks;

	fn contains(&self, commit: &CommitId) -> bool;

	fn apply_bookmark_changes(&mut self, changes: &[BookmarkChange]) -> Result<(), RepoError>;

	/// Add markers to the obsolescence store. Returns how many were new.
	fn add_obsmarkers(
		&mut self,
		markers: &[ObsMarker],
		origin: MarkerOrigin,
	) -> Result<usize, RepoError>;

	/// Write all staged changes at once. The lock stays held.
	fn commit(&mut self) -> Result<(), RepoError>;
}
