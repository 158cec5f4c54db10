use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::wire::UpdateReferencesRequest;
use super::{CloudService, ReferencesUpdate, ServiceError, UpdateOutcome};
use crate::repo::lock::{LockFile, write_atomic};
use crate::sync::types::{Bookmarks, CloudRefs, Heads, ObsMarker, Version};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RecordedMarker {
	version: Version,
	marker: ObsMarker,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct WorkspaceDb {
	version: Version,
	#[serde(default)]
	heads: Heads,
	#[serde(default)]
	bookmarks: Bookmarks,
	#[serde(default)]
	obsmarkers: Vec<RecordedMarker>,
}

impl WorkspaceDb {
	fn snapshot(&self, since: Version) -> CloudRefs {
		CloudRefs {
			version: self.version,
			heads: self.heads.clone(),
			bookmarks: self.bookmarks.clone(),
			obsmarkers: self
				.obsmarkers
				.iter()
				.filter(|m| m.version > since)
				.map(|m| m.marker.clone())
				.collect(),
		}
	}
}

/// Reference service backed by one JSON document per workspace on a local
/// or shared filesystem. Hosts pointing at the same directory sync with
/// each other.
#[derive(Debug, Clone)]
pub struct LocalService {
	path: PathBuf,
}

impl LocalService {
	pub fn new(root: &Path, repo_name: &str, workspace: &str) -> Self {
		let path = root
			.join(sanitize(repo_name))
			.join(format!("{}.json", sanitize(workspace)));
		Self { path }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn lock_path(&self) -> PathBuf {
		self.path.with_extension("lock")
	}

	fn load(&self) -> Result<WorkspaceDb, ServiceError> {
		let bytes = match fs::read(&self.path) {
			Ok(b) => b,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(WorkspaceDb::default()),
			Err(e) => return Err(ServiceError::Io(e)),
		};
		serde_json::from_slice(&bytes).map_err(|source| ServiceError::Corrupt {
			path: self.path.clone(),
			source,
		})
	}

	fn save(&self, db: &WorkspaceDb) -> Result<(), ServiceError> {
		let bytes = serde_json::to_vec_pretty(db).map_err(|source| ServiceError::Corrupt {
			path: self.path.clone(),
			source,
		})?;
		write_atomic(&self.path, &bytes)?;
		Ok(())
	}
}

/// Keep workspace names like `user/alice` inside one directory level.
fn sanitize(name: &str) -> String {
	let out: String = name
		.chars()
		.map(|c| {
			if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
				c
			} else {
				'_'
			}
		})
		.collect();
	if out.is_empty() || out.chars().all(|c| c == '.') {
		"default".to_string()
	} else {
		out
	}
}

#[async_trait]
impl CloudService for LocalService {
	async fn get_references(&self, base_version: Version) -> Result<CloudRefs, ServiceError> {
		let refs = self.load()?.snapshot(base_version);
		debug!(
			"local service at version {} ({} new marker(s) since {})",
			refs.version,
			refs.obsmarkers.len(),
			base_version
		);
		Ok(refs)
	}

	async fn update_references(
		&self,
		update: &ReferencesUpdate,
	) -> Result<UpdateOutcome, ServiceError> {
		let _lock = LockFile::acquire(self.lock_path())?;
		let mut db = self.load()?;

		if db.version != update.base_version {
			debug!(
				"local service rejected update based on version {} (current {})",
				update.base_version, db.version
			);
			return Ok(UpdateOutcome {
				accepted: false,
				refs: db.snapshot(update.base_version),
			});
		}

		let delta = UpdateReferencesRequest::from_update("", "", update);
		delta.apply_to(&mut db.heads, &mut db.bookmarks);

		let version = db.version.next();
		let mut known: HashSet<String> = db.obsmarkers.iter().map(|m| m.marker.id()).collect();
		for marker in &update.obsmarkers {
			if known.insert(marker.id()) {
				db.obsmarkers.push(RecordedMarker {
					version,
					marker: marker.clone(),
				});
			}
		}
		db.version = version;
		self.save(&db)?;

		info!(
			"local service accepted update, now at version {} ({} heads, {} bookmarks)",
			db.version,
			db.heads.len(),
			db.bookmarks.len()
		);
		Ok(UpdateOutcome {
			accepted: true,
			refs: CloudRefs {
				version: db.version,
				heads: db.heads.clone(),
				bookmarks: db.bookmarks.clone(),
				obsmarkers: Vec::new(),
			},
		})
	}
}
