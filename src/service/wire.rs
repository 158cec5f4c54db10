//! JSON bodies exchanged with the remote reference service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ReferencesUpdate;
use crate::sync::types::{Bookmarks, CloudRefs, CommitId, Heads, ObsMarker, Version};

pub const GET_REFERENCES_PATH: &str = "/commit_cloud/get_references";
pub const UPDATE_REFERENCES_PATH: &str = "/commit_cloud/update_references";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetReferencesRequest {
	pub repo_name: String,
	pub workspace: String,
	pub version: Version,
}

/// Update expressed as a delta against the base snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReferencesRequest {
	pub repo_name: String,
	pub workspace: String,
	pub version: Version,
	#[serde(default)]
	pub removed_heads: Vec<CommitId>,
	#[serde(default)]
	pub new_heads: Vec<CommitId>,
	#[serde(default)]
	pub removed_bookmarks: Vec<String>,
	#[serde(default)]
	pub updated_bookmarks: BTreeMap<String, CommitId>,
	#[serde(default)]
	pub new_obsmarkers: Vec<ObsMarker>,
}

impl UpdateReferencesRequest {
	pub fn from_update(repo_name: &str, workspace: &str, update: &ReferencesUpdate) -> Self {
		let removed_heads = update
			.base_heads
			.difference(&update.new_heads)
			.cloned()
			.collect();
		let new_heads = update
			.new_heads
			.difference(&update.base_heads)
			.cloned()
			.collect();
		let removed_bookmarks = update
			.base_bookmarks
			.keys()
			.filter(|name| !update.new_bookmarks.contains_key(*name))
			.cloned()
			.collect();
		let updated_bookmarks = update
			.new_bookmarks
			.iter()
			.filter(|(name, target)| update.base_bookmarks.get(*name) != Some(*target))
			.map(|(name, target)| (name.clone(), target.clone()))
			.collect();

		Self {
			repo_name: repo_name.to_string(),
			workspace: workspace.to_string(),
			version: update.base_version,
			removed_heads,
			new_heads,
			removed_bookmarks,
			updated_bookmarks,
			new_obsmarkers: update.obsmarkers.clone(),
		}
	}

	/// Apply the delta to the state the service holds at `version`.
	pub fn apply_to(&self, heads: &mut Heads, bookmarks: &mut Bookmarks) {
		for head in &self.removed_heads {
			heads.remove(head);
		}
		heads.extend(self.new_heads.iter().cloned());
		for name in &self.removed_bookmarks {
			bookmarks.remove(name);
		}
		for (name, target) in &self.updated_bookmarks {
			bookmarks.insert(name.clone(), target.clone());
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencesData {
	pub version: Version,
	#[serde(default)]
	pub heads: Vec<CommitId>,
	#[serde(default)]
	pub bookmarks: BTreeMap<String, CommitId>,
	#[serde(default)]
	pub new_obsmarkers: Vec<ObsMarker>,
}

impl From<CloudRefs> for ReferencesData {
	fn from(refs: CloudRefs) -> Self {
		Self {
			version: refs.version,
			heads: refs.heads.into_iter().collect(),
			bookmarks: refs.bookmarks,
			new_obsmarkers: refs.obsmarkers,
		}
	}
}

impl From<ReferencesData> for CloudRefs {
	fn from(data: ReferencesData) -> Self {
		Self {
			version: data.version,
			heads: data.heads.into_iter().collect(),
			bookmarks: data.bookmarks,
			obsmarkers: data.new_obsmarkers,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReferencesResponse {
	pub accepted: bool,
	pub refs: ReferencesData,
}
