use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::lock::{LockFile, write_atomic};
use super::{LocalRepo, MarkerOrigin, RepoError, RepoTransaction};
use crate::sync::obsmarkers::PendingMarkers;
use crate::sync::types::{BookmarkChange, Bookmarks, CommitId, Heads, ObsMarker};

/// Name of the per-repository store directory.
pub const STORE_DIR: &str = ".cloudsync";
const DATA_FILE: &str = "repo.json";
const LOCK_FILE: &str = "lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
	Public,
	Draft,
}

/// Metadata of one commit. Content is out of scope; only the graph shape and
/// phase matter for sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
	#[serde(default)]
	pub parents: Vec<CommitId>,
	pub phase: Phase,
	#[serde(default)]
	pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct RepoData {
	#[serde(default)]
	commits: BTreeMap<CommitId, CommitRecord>,
	#[serde(default)]
	bookmarks: Bookmarks,
	/// Obsolescence store keyed by marker identity.
	#[serde(default)]
	obsstore: BTreeMap<String, ObsMarker>,
}

impl RepoData {
	fn load(path: &Path) -> Result<Self, RepoError> {
		let bytes = match fs::read(path) {
			Ok(b) => b,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
			Err(e) => return Err(RepoError::Io(e)),
		};
		serde_json::from_slice(&bytes).map_err(|source| RepoError::Corrupt {
			path: path.to_path_buf(),
			source,
		})
	}

	fn save(&self, path: &Path) -> Result<(), RepoError> {
		let bytes = serde_json::to_vec_pretty(self).map_err(|source| RepoError::Corrupt {
			path: path.to_path_buf(),
			source,
		})?;
		write_atomic(path, &bytes)?;
		Ok(())
	}

	fn obsolete(&self) -> BTreeSet<&CommitId> {
		self.obsstore.values().map(|m| &m.predecessor).collect()
	}

	/// `heads(draft()) - obsolete()`: draft commits without a draft child,
	/// minus the ones some marker made obsolete.
	fn heads(&self) -> Heads {
		let mut has_draft_child: BTreeSet<&CommitId> = BTreeSet::new();
		for record in self.commits.values().filter(|r| r.phase == Phase::Draft) {
			for parent in &record.parents {
				has_draft_child.insert(parent);
			}
		}
		let obsolete = self.obsolete();

		self.commits
			.iter()
			.filter(|(id, record)| {
				record.phase == Phase::Draft
					&& !has_draft_child.contains(id)
					&& !obsolete.contains(id)
			})
			.map(|(id, _)| id.clone())
			.collect()
	}
}

/// Repository metadata stored as JSON under `<root>/.cloudsync/`.
///
/// Writers take the lock file and replace `repo.json` atomically, so
/// lock-free readers always see a complete snapshot.
#[derive(Debug, Clone)]
pub struct FileRepo {
	root: PathBuf,
	store: PathBuf,
	pull_source: Option<PathBuf>,
}

impl FileRepo {
	/// Open the repository at `root`, creating an empty store if needed.
	pub fn open(root: impl AsRef<Path>) -> Result<Self, RepoError> {
		let root = root.as_ref().to_path_buf();
		let store = root.join(STORE_DIR);
		fs::create_dir_all(&store)?;
		Ok(Self {
			root,
			store,
			pull_source: None,
		})
	}

	/// Pull missing commits from the repository rooted at `source`.
	pub fn with_pull_source(mut self, source: impl Into<PathBuf>) -> Self {
		self.pull_source = Some(source.into());
		self
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn data_path(&self) -> PathBuf {
		self.store.join(DATA_FILE)
	}

	fn load(&self) -> Result<RepoData, RepoError> {
		RepoData::load(&self.data_path())
	}

	/// Lock the repository and stage changes against a fresh snapshot.
	pub fn transaction(&self) -> Result<FileTransaction<'_>, RepoError> {
		let lock = LockFile::acquire(self.store.join(LOCK_FILE))?;
		let data = self.load()?;
		Ok(FileTransaction {
			repo: self,
			_lock: lock,
			staged: data,
			outgoing: Vec::new(),
		})
	}

	pub fn commit_record(&self, id: &CommitId) -> Result<Option<CommitRecord>, RepoError> {
		Ok(self.load()?.commits.get(id).cloned())
	}

	pub fn obsmarkers(&self) -> Result<Vec<ObsMarker>, RepoError> {
		Ok(self.load()?.obsstore.into_values().collect())
	}

	/// Create a draft commit on top of `parents` and return its identifier.
	pub fn commit(&self, parents: &[CommitId], message: &str) -> Result<CommitId, RepoError> {
		let mut tx = self.transaction()?;
		let id = tx.add_commit(parents, Phase::Draft, message)?;
		tx.commit()?;
		Ok(id)
	}

	pub fn set_bookmark(&self, name: &str, target: &CommitId) -> Result<(), RepoError> {
		let mut tx = self.transaction()?;
		tx.apply_bookmark_changes(&[BookmarkChange::set(name, target.clone())])?;
		tx.commit()
	}

	pub fn delete_bookmark(&self, name: &str) -> Result<(), RepoError> {
		let mut tx = self.transaction()?;
		tx.apply_bookmark_changes(&[BookmarkChange::delete(name)])?;
		tx.commit()
	}

	/// Record locally that `predecessor` was replaced by `successors` (or
	/// pruned). The marker is queued for the next push.
	pub fn obsolete(
		&self,
		predecessor: &CommitId,
		successors: &[CommitId],
	) -> Result<ObsMarker, RepoError> {
		let mut tx = self.transaction()?;
		if !tx.contains(predecessor) {
			return Err(RepoError::UnknownCommit(predecessor.clone()));
		}
		let marker = ObsMarker::new(predecessor.clone(), successors.to_vec(), Utc::now());
		tx.add_obsmarkers(std::slice::from_ref(&marker), MarkerOrigin::Local)?;
		tx.commit()?;
		Ok(marker)
	}

	/// Copy `wanted` and every ancestor missing here from the source store.
	fn pull_from(&self, source_root: &Path, wanted: &[CommitId]) -> Result<usize, RepoError> {
		let source = RepoData::load(&source_root.join(STORE_DIR).join(DATA_FILE))?;
		let local = self.load()?;

		let mut fetched: BTreeMap<CommitId, CommitRecord> = BTreeMap::new();
		let mut missing = Vec::new();
		let mut stack: Vec<CommitId> = wanted.to_vec();
		while let Some(id) = stack.pop() {
			if local.commits.contains_key(&id) || fetched.contains_key(&id) {
				continue;
			}
			match source.commits.get(&id) {
				Some(record) => {
					stack.extend(record.parents.iter().cloned());
					fetched.insert(id, record.clone());
				}
				None => missing.push(id),
			}
		}

		if !missing.is_empty() {
			missing.sort();
			missing.dedup();
			return Err(RepoError::PullFailed {
				from: source_root.display().to_string(),
				missing,
			});
		}

		let count = fetched.len();
		let mut tx = self.transaction()?;
		for (id, record) in fetched {
			tx.staged.commits.entry(id).or_insert(record);
		}
		tx.commit()?;
		Ok(count)
	}
}

#[async_trait]
impl LocalRepo for FileRepo {
	fn store_dir(&self) -> &Path {
		&self.store
	}

	fn heads(&self) -> Result<Heads, RepoError> {
		Ok(self.load()?.heads())
	}

	fn bookmarks(&self) -> Result<Bookmarks, RepoError> {
		Ok(self.load()?.bookmarks)
	}

	fn contains(&self, commit: &CommitId) -> Result<bool, RepoError> {
		Ok(self.load()?.commits.contains_key(commit))
	}

	async fn pull(&self, commits: &[CommitId]) -> Result<(), RepoError> {
		let local = self.load()?;
		let wanted: Vec<CommitId> = commits
			.iter()
			.filter(|c| !local.commits.contains_key(*c))
			.cloned()
			.collect();
		if wanted.is_empty() {
			return Ok(());
		}

		let Some(source) = self.pull_source.as_deref() else {
			return Err(RepoError::PullFailed {
				from: "<no pull source configured>".to_string(),
				missing: wanted,
			});
		};

		let count = self.pull_from(source, &wanted)?;
		info!("pulled {} commit(s) from {}", count, source.display());
		Ok(())
	}

	fn lock(&self) -> Result<Box<dyn RepoTransaction + '_>, RepoError> {
		Ok(Box::new(self.transaction()?))
	}
}

/// Staged repository changes. Holds the lock file until dropped.
pub struct FileTransaction<'a> {
	repo: &'a FileRepo,
	_lock: LockFile,
	staged: RepoData,
	outgoing: Vec<ObsMarker>,
}

impl FileTransaction<'_> {
	/// Stage a new commit. Its identifier is derived from the parents, the
	/// message, the phase and the current time.
	pub fn add_commit(
		&mut self,
		parents: &[CommitId],
		phase: Phase,
		message: &str,
	) -> Result<CommitId, RepoError> {
		for parent in parents {
			if !self.staged.commits.contains_key(parent) {
				return Err(RepoError::UnknownCommit(parent.clone()));
			}
		}

		let mut hasher = Sha256::new();
		for parent in parents {
			hasher.update(parent.as_str().as_bytes());
		}
		hasher.update(message.as_bytes());
		hasher.update(format!("{:?}", phase).as_bytes());
		hasher.update(Utc::now().to_rfc3339().as_bytes());
		hasher.update(self.staged.commits.len().to_le_bytes());
		let digest = hasher.finalize();
		let hex: String = digest.iter().take(20).map(|b| format!("{:02x}", b)).collect();
		let id = CommitId::new(hex);

		self.staged.commits.insert(
			id.clone(),
			CommitRecord {
				parents: parents.to_vec(),
				phase,
				message: message.to_string(),
			},
		);
		Ok(id)
	}

	/// Mark a commit and all its ancestors public.
	pub fn publish(&mut self, commit: &CommitId) -> Result<(), RepoError> {
		if !self.staged.commits.contains_key(commit) {
			return Err(RepoError::UnknownCommit(commit.clone()));
		}
		let mut stack = vec![commit.clone()];
		while let Some(id) = stack.pop() {
			if let Some(record) = self.staged.commits.get_mut(&id) {
				if record.phase == Phase::Draft {
					record.phase = Phase::Public;
					stack.extend(record.parents.iter().cloned());
				}
			}
		}
		Ok(())
	}
}

impl RepoTransaction for FileTransaction<'_> {
	fn bookmarks(&self) -> Bookmarks {
		self.staged.bookmarks.clone()
	}

	fn contains(&self, commit: &CommitId) -> bool {
		self.staged.commits.contains_key(commit)
	}

	fn apply_bookmark_changes(&mut self, changes: &[BookmarkChange]) -> Result<(), RepoError> {
		for change in changes {
			match &change.target {
				Some(target) => {
					if !self.staged.commits.contains_key(target) {
						return Err(RepoError::UnknownCommit(target.clone()));
					}
					self.staged.bookmarks.insert(change.name.clone(), target.clone());
				}
				None => {
					self.staged.bookmarks.remove(&change.name);
				}
			}
		}
		Ok(())
	}

	fn add_obsmarkers(
		&mut self,
		markers: &[ObsMarker],
		origin: MarkerOrigin,
	) -> Result<usize, RepoError> {
		let mut added = 0;
		for marker in markers {
			let id = marker.id();
			if self.staged.obsstore.contains_key(&id) {
				continue;
			}
			self.staged.obsstore.insert(id, marker.clone());
			if origin == MarkerOrigin::Local {
				self.outgoing.push(marker.clone());
			}
			added += 1;
		}
		Ok(added)
	}

	fn commit(&mut self) -> Result<(), RepoError> {
		// Outgoing markers must be queued before the store references them.
		if !self.outgoing.is_empty() {
			PendingMarkers::in_dir(&self.repo.store).append(&self.outgoing)?;
			self.outgoing.clear();
		}
		self.staged.save(&self.repo.data_path())?;
		debug!("committed repository transaction in {}", self.repo.root.display());
		Ok(())
	}
}
