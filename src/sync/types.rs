use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Version of a reference snapshot held by the service.
///
/// Versions are only ever compared for equality with the local baseline.
/// `Version::NEVER_SYNCED` (zero) marks a host that has not completed a
/// round yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
	pub const NEVER_SYNCED: Version = Version(0);

	pub fn is_never_synced(self) -> bool {
		self == Self::NEVER_SYNCED
	}

	/// The version following this one. Only the service that owns the
	/// counter calls this.
	pub fn next(self) -> Version {
		Version(self.0 + 1)
	}
}

impl fmt::Display for Version {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Hex identifier of a commit. Stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into().to_ascii_lowercase())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Twelve-character prefix used in log messages.
	pub fn short(&self) -> &str {
		match self.0.char_indices().nth(12) {
			Some((end, _)) => &self.0[..end],
			None => &self.0,
		}
	}
}

impl fmt::Display for CommitId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for CommitId {
	fn from(s: &str) -> Self {
		CommitId::new(s)
	}
}

impl From<String> for CommitId {
	fn from(s: String) -> Self {
		CommitId::new(s)
	}
}

/// Non-obsolete draft heads.
pub type Heads = BTreeSet<CommitId>;

/// Bookmark name to commit.
pub type Bookmarks = BTreeMap<String, CommitId>;

/// A single assignment produced by a bookmark merge. `target: None` deletes
/// the bookmark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookmarkChange {
	pub name: String,
	pub target: Option<CommitId>,
}

impl BookmarkChange {
	pub fn set(name: impl Into<String>, target: CommitId) -> Self {
		Self {
			name: name.into(),
			target: Some(target),
		}
	}

	pub fn delete(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			target: None,
		}
	}
}

/// Obsolescence marker: `predecessor` was rewritten into `successors`, or
/// pruned when `successors` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObsMarker {
	pub predecessor: CommitId,
	#[serde(default)]
	pub successors: Vec<CommitId>,
	#[serde(default)]
	pub flags: u32,
	pub date: DateTime<Utc>,
	#[serde(default)]
	pub metadata: BTreeMap<String, String>,
}

impl ObsMarker {
	pub fn new(predecessor: CommitId, successors: Vec<CommitId>, date: DateTime<Utc>) -> Self {
		Self {
			predecessor,
			successors,
			flags: 0,
			date,
			metadata: BTreeMap::new(),
		}
	}

	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.metadata.insert(key.into(), value.into());
		self
	}

	pub fn is_prune(&self) -> bool {
		self.successors.is_empty()
	}

	/// Content identity of the marker: hex SHA-256 of its JSON encoding.
	/// Field order is fixed by the struct and metadata is a sorted map, so
	/// the encoding is canonical.
	pub fn id(&self) -> String {
		let mut hasher = Sha256::new();
		// Serializing plain strings, integers and a sorted map cannot fail.
		if let Ok(bytes) = serde_json::to_vec(self) {
			hasher.update(&bytes);
		}
		let digest = hasher.finalize();
		digest.iter().map(|b| format!("{:02x}", b)).collect()
	}
}

/// Snapshot of the service's references, returned by every service call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudRefs {
	pub version: Version,
	#[serde(default)]
	pub heads: Heads,
	#[serde(default)]
	pub bookmarks: Bookmarks,
	/// Markers recorded by the service after the version the caller asked
	/// about.
	#[serde(default)]
	pub obsmarkers: Vec<ObsMarker>,
}
