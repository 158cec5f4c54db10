use log::debug;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::repo::lock::write_atomic;
use crate::repo::{MarkerOrigin, RepoError, RepoTransaction};
use crate::sync::types::ObsMarker;

/// Persisted buffer of markers created locally that the service has not
/// acknowledged yet.
#[derive(Debug, Clone)]
pub struct PendingMarkers {
	path: PathBuf,
}

impl PendingMarkers {
	pub const FILE_NAME: &'static str = "pendingobsmarkers.json";

	pub fn in_dir(dir: &Path) -> Self {
		Self {
			path: dir.join(Self::FILE_NAME),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn exists(&self) -> bool {
		self.path.exists()
	}

	/// Full buffer contents; empty when the buffer does not exist.
	pub fn read(&self) -> Result<Vec<ObsMarker>, RepoError> {
		let bytes = match fs::read(&self.path) {
			Ok(b) => b,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(RepoError::Io(e)),
		};
		serde_json::from_slice(&bytes).map_err(|source| RepoError::Corrupt {
			path: self.path.clone(),
			source,
		})
	}

	/// Append markers not already buffered. Returns how many were added.
	/// Callers hold the repository lock.
	pub fn append(&self, markers: &[ObsMarker]) -> Result<usize, RepoError> {
		if markers.is_empty() {
			return Ok(0);
		}
		let mut buffered = self.read()?;
		let mut seen: HashSet<String> = buffered.iter().map(ObsMarker::id).collect();
		let before = buffered.len();
		for marker in markers {
			if seen.insert(marker.id()) {
				buffered.push(marker.clone());
			}
		}
		let added = buffered.len() - before;
		if added > 0 {
			self.write(&buffered)?;
			debug!("queued {} obsolescence marker(s) for the next push", added);
		}
		Ok(added)
	}

	/// Drop the markers a successful push carried. Markers appended after
	/// the buffer was read for that push are kept. Callers hold the
	/// repository lock.
	pub fn remove_sent(&self, sent: &[ObsMarker]) -> Result<(), RepoError> {
		if sent.is_empty() {
			return Ok(());
		}
		let sent_ids: HashSet<String> = sent.iter().map(ObsMarker::id).collect();
		let remaining: Vec<ObsMarker> = self
			.read()?
			.into_iter()
			.filter(|m| !sent_ids.contains(&m.id()))
			.collect();
		if remaining.is_empty() {
			self.clear()
		} else {
			self.write(&remaining)
		}
	}

	pub fn clear(&self) -> Result<(), RepoError> {
		match fs::remove_file(&self.path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(RepoError::Io(e)),
		}
	}

	fn write(&self, markers: &[ObsMarker]) -> Result<(), RepoError> {
		let bytes = serde_json::to_vec_pretty(markers).map_err(|source| RepoError::Corrupt {
			path: self.path.clone(),
			source,
		})?;
		write_atomic(&self.path, &bytes)?;
		Ok(())
	}
}

/// Merge markers received from the service into the local obsolescence
/// store. Runs inside the caller's transaction and tags the batch as cloud
/// origin so it is not queued for sending back.
pub fn merge_cloud_markers(
	tx: &mut dyn RepoTransaction,
	markers: &[ObsMarker],
) -> Result<usize, RepoError> {
	if markers.is_empty() {
		return Ok(0);
	}
	let added = tx.add_obsmarkers(markers, MarkerOrigin::Cloud)?;
	debug!(
		"merged {} of {} obsolescence marker(s) from the cloud",
		added,
		markers.len()
	);
	Ok(added)
}
