use log::{debug, info};

use crate::repo::LocalRepo;
use crate::sync::bookmarks::{BookmarkMerge, BookmarkReconciler};
use crate::sync::error::SyncError;
use crate::sync::obsmarkers::merge_cloud_markers;
use crate::sync::state::{SyncState, SyncStateStore};
use crate::sync::types::{CloudRefs, CommitId};

/// What applying one cloud snapshot changed locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
	pub pulled: usize,
	pub bookmarks: BookmarkMerge,
	pub markers_merged: usize,
}

/// Applies a cloud snapshot to the local repository and advances the sync
/// state to it.
///
/// Missing heads are pulled first, without the repository lock. The
/// bookmark merge, the marker merge and the sync state update then happen
/// under one lock acquisition; if any step fails nothing is committed and
/// the sync state keeps its old baseline.
pub struct CloudChangeApplier<'a> {
	repo: &'a dyn LocalRepo,
	reconciler: &'a BookmarkReconciler,
	states: &'a SyncStateStore,
}

impl<'a> CloudChangeApplier<'a> {
	pub fn new(
		repo: &'a dyn LocalRepo,
		reconciler: &'a BookmarkReconciler,
		states: &'a SyncStateStore,
	) -> Self {
		Self {
			repo,
			reconciler,
			states,
		}
	}

	pub async fn apply(
		&self,
		state: &mut SyncState,
		refs: &CloudRefs,
	) -> Result<ApplyOutcome, SyncError> {
		debug!(
			"applying cloud version {} over local baseline {}",
			refs.version, state.version
		);

		let mut missing: Vec<CommitId> = Vec::new();
		for head in &refs.heads {
			if !self.repo.contains(head)? {
				missing.push(head.clone());
			}
		}
		if !missing.is_empty() {
			debug!("pulling {} missing head(s)", missing.len());
			self.repo.pull(&missing).await?;
		}

		let mut tx = self.repo.lock()?;
		let local = tx.bookmarks();
		let merge = self.reconciler.reconcile(
			&local,
			&refs.bookmarks,
			&state.bookmarks,
			|commit| tx.contains(commit),
		);
		tx.apply_bookmark_changes(&merge.changes)?;
		let markers_merged = merge_cloud_markers(&mut *tx, &refs.obsmarkers)?;
		tx.commit()?;

		let mut next = state.clone();
		next.update(refs.version, refs.heads.clone(), refs.bookmarks.clone());
		self.states.save(&next)?;
		drop(tx);
		*state = next;

		info!(
			"applied cloud version {}: {} bookmark change(s), {} new marker(s), {} commit(s) pulled",
			refs.version,
			merge.changes.len(),
			markers_merged,
			missing.len()
		);
		Ok(ApplyOutcome {
			pulled: missing.len(),
			bookmarks: merge,
			markers_merged,
		})
	}
}
