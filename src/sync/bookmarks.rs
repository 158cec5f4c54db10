use log::{debug, warn};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::sync::forkname::ForkNamer;
use crate::sync::types::{BookmarkChange, Bookmarks, CommitId};

/// Something the user should hear about after a bookmark merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookmarkWarning {
	/// Both sides moved `name`; the local position was kept as `fork`.
	Forked {
		name: String,
		fork: String,
		target: CommitId,
	},
	/// The service moved `name` to a commit this host does not have.
	MissingTarget { name: String, target: CommitId },
}

impl fmt::Display for BookmarkWarning {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BookmarkWarning::Forked { name, fork, .. } => write!(
				f,
				"{} changed locally and remotely, local bookmark renamed to {}",
				name, fork
			),
			BookmarkWarning::MissingTarget { name, target } => {
				write!(f, "{} not found, not creating {} bookmark", target, name)
			}
		}
	}
}

/// Outcome of a three-way bookmark merge: one batch of assignments to apply
/// atomically, plus warnings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookmarkMerge {
	pub changes: Vec<BookmarkChange>,
	pub warnings: Vec<BookmarkWarning>,
}

impl BookmarkMerge {
	pub fn is_empty(&self) -> bool {
		self.changes.is_empty()
	}

	pub fn forks(&self) -> usize {
		self.warnings
			.iter()
			.filter(|w| matches!(w, BookmarkWarning::Forked { .. }))
			.count()
	}

	pub fn missing_targets(&self) -> usize {
		self.warnings
			.iter()
			.filter(|w| matches!(w, BookmarkWarning::MissingTarget { .. }))
			.count()
	}
}

/// Three-way merge of bookmark maps against the last synced baseline.
///
/// Remote wins for every name the service changed since the baseline,
/// except that:
/// - a local move that conflicts with a remote move is preserved under a
///   fork name before the remote position is taken;
/// - a remote deletion does not remove a bookmark the local side moved;
/// - a remote position pointing at an unknown commit is skipped with a
///   warning.
///
/// Names are visited in sorted order, so the result depends only on the
/// inputs.
#[derive(Debug, Clone)]
pub struct BookmarkReconciler {
	namer: ForkNamer,
}

impl BookmarkReconciler {
	pub fn new(namer: ForkNamer) -> Self {
		Self { namer }
	}

	pub fn reconcile(
		&self,
		local: &Bookmarks,
		remote: &Bookmarks,
		baseline: &Bookmarks,
		is_known: impl Fn(&CommitId) -> bool,
	) -> BookmarkMerge {
		let all_names: BTreeSet<&str> = local
			.keys()
			.chain(remote.keys())
			.map(String::as_str)
			.collect();
		let mut allocated: HashSet<String> = HashSet::new();
		let mut merge = BookmarkMerge::default();

		for &name in &all_names {
			let l = local.get(name);
			let r = remote.get(name);
			let b = baseline.get(name);

			if r == l {
				continue;
			}

			if let (Some(local_target), Some(_)) = (l, r) {
				if l != b && r != b {
					let fork = self.namer.fork_name(name, |candidate| {
						all_names.contains(candidate) || allocated.contains(candidate)
					});
					allocated.insert(fork.clone());
					merge
						.changes
						.push(BookmarkChange::set(fork.clone(), local_target.clone()));
					let warning = BookmarkWarning::Forked {
						name: name.to_string(),
						fork,
						target: local_target.clone(),
					};
					warn!("{}", warning);
					merge.warnings.push(warning);
				}
			}

			if r == b {
				continue;
			}

			match r {
				Some(remote_target) => {
					if is_known(remote_target) {
						merge
							.changes
							.push(BookmarkChange::set(name, remote_target.clone()));
					} else {
						let warning = BookmarkWarning::MissingTarget {
							name: name.to_string(),
							target: remote_target.clone(),
						};
						warn!("{}", warning);
						merge.warnings.push(warning);
					}
				}
				None if l != b => {
					debug!("{} moved locally and deleted remotely, keeping it", name);
				}
				None => merge.changes.push(BookmarkChange::delete(name)),
			}
		}

		merge
	}
}
