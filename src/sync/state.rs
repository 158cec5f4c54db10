use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::repo::lock::write_atomic;
use crate::sync::types::{Bookmarks, Heads, Version};

#[derive(Debug, Error)]
pub enum StateError {
	#[error("sync state I/O error: {0}")]
	Io(#[from] io::Error),

	#[error("sync state file {} is corrupt: {source}", .path.display())]
	Corrupt {
		path: PathBuf,
		source: serde_json::Error,
	},
}

/// Last snapshot this host believes it shares with the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
	pub version: Version,
	#[serde(default)]
	pub heads: Heads,
	#[serde(default)]
	pub bookmarks: Bookmarks,
	#[serde(default)]
	pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncState {
	pub fn update(&mut self, version: Version, heads: Heads, bookmarks: Bookmarks) {
		self.version = version;
		self.heads = heads;
		self.bookmarks = bookmarks;
		self.last_synced_at = Some(Utc::now());
	}

	/// True when the local repository shows exactly this snapshot and at
	/// least one round has completed.
	pub fn is_converged_with(&self, heads: &Heads, bookmarks: &Bookmarks) -> bool {
		!self.version.is_never_synced() && &self.heads == heads && &self.bookmarks == bookmarks
	}
}

/// JSON file holding the [`SyncState`] of one repository.
#[derive(Debug, Clone)]
pub struct SyncStateStore {
	path: PathBuf,
}

impl SyncStateStore {
	pub const FILE_NAME: &'static str = "syncstate.json";

	pub fn in_dir(dir: &Path) -> Self {
		Self {
			path: dir.join(Self::FILE_NAME),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Load the state; a host that never synced gets version 0.
	pub fn load(&self) -> Result<SyncState, StateError> {
		let bytes = match fs::read(&self.path) {
			Ok(b) => b,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				debug!("no sync state at {}, starting from version 0", self.path.display());
				return Ok(SyncState::default());
			}
			Err(e) => return Err(StateError::Io(e)),
		};
		serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
			path: self.path.clone(),
			source,
		})
	}

	/// Callers hold the repository lock.
	pub fn save(&self, state: &SyncState) -> Result<(), StateError> {
		let bytes = serde_json::to_vec_pretty(state).map_err(|source| StateError::Corrupt {
			path: self.path.clone(),
			source,
		})?;
		write_atomic(&self.path, &bytes)?;
		Ok(())
	}
}
