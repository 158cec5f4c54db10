//! Commit cloud synchronization.
//!
//! [`CloudSync`] is the convergence loop. It uses [`CloudChangeApplier`] to
//! fold newer cloud snapshots into the local repository, which in turn runs
//! the [`BookmarkReconciler`] and merges obsolescence markers.

pub mod apply;
pub mod bookmarks;
pub mod engine;
pub mod error;
pub mod forkname;
pub mod obsmarkers;
pub mod retry;
pub mod state;
pub mod types;

pub use apply::{ApplyOutcome, CloudChangeApplier};
pub use bookmarks::{BookmarkMerge, BookmarkReconciler, BookmarkWarning};
pub use engine::{CloudSync, SyncReport};
pub use error::SyncError;
pub use forkname::ForkNamer;
pub use obsmarkers::{PendingMarkers, merge_cloud_markers};
pub use retry::{Backoff, RetryPolicy};
pub use state::{StateError, SyncState, SyncStateStore};
pub use types::{BookmarkChange, Bookmarks, CloudRefs, CommitId, Heads, ObsMarker, Version};
