use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Who holds a lock file. Written into the file as JSON so a failed
/// acquisition can say who is in the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
	pub pid: u32,
	pub hostname: String,
	pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
	fn current() -> Self {
		let hostname = hostname::get()
			.ok()
			.and_then(|s| s.into_string().ok())
			.unwrap_or_else(|| "localhost".to_string());
		Self {
			pid: std::process::id(),
			hostname,
			acquired_at: Utc::now(),
		}
	}
}

#[derive(Debug, Error)]
pub enum LockError {
	#[error("lock {} is held by {}", .path.display(), describe_holder(.holder))]
	Held {
		path: PathBuf,
		holder: Option<LockHolder>,
	},
	#[error("lock file error: {0}")]
	Io(#[from] io::Error),
}

fn describe_holder(holder: &Option<LockHolder>) -> String {
	match holder {
		Some(h) => format!("pid {} on {} since {}", h.pid, h.hostname, h.acquired_at.to_rfc3339()),
		None => "an unknown process".to_string(),
	}
}

/// Exclusive lock represented by the existence of a file. The file is
/// removed when the guard is dropped.
#[derive(Debug)]
pub struct LockFile {
	path: PathBuf,
}

impl LockFile {
	/// Try to take the lock once. An existing lock file is reported as
	/// `LockError::Held`; callers decide whether that is worth retrying.
	pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
		let path = path.as_ref().to_path_buf();
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}

		let mut file = match open_new_lock_file(&path) {
			Ok(f) => f,
			Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
				return Err(LockError::Held {
					holder: read_holder(&path),
					path,
				});
			}
			Err(e) => return Err(LockError::Io(e)),
		};

		let holder = LockHolder::current();
		let write_result = serde_json::to_vec(&holder)
			.map_err(io::Error::from)
			.and_then(|bytes| file.write_all(&bytes))
			.and_then(|_| file.sync_all());
		if let Err(e) = write_result {
			let _ = fs::remove_file(&path);
			return Err(LockError::Io(e));
		}

		debug!("acquired lock {}", path.display());
		Ok(Self { path })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl Drop for LockFile {
	fn drop(&mut self) {
		match fs::remove_file(&self.path) {
			Ok(()) => debug!("released lock {}", self.path.display()),
			Err(e) => log::warn!("failed to remove lock {}: {}", self.path.display(), e),
		}
	}
}

fn read_holder(path: &Path) -> Option<LockHolder> {
	let bytes = fs::read(path).ok()?;
	serde_json::from_slice(&bytes).ok()
}

fn open_new_lock_file(path: &Path) -> io::Result<fs::File> {
	#[cfg(unix)]
	{
		use std::os::unix::fs::OpenOptionsExt;
		let mut options = fs::OpenOptions::new();
		options.write(true).create_new(true).mode(0o600);
		options.open(path)
	}
	#[cfg(not(unix))]
	{
		fs::OpenOptions::new().write(true).create_new(true).open(path)
	}
}

/// Replace `path` with `bytes` by writing a sibling temporary file and
/// renaming it over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	let tmp_path = path.with_extension("tmp");
	{
		let mut file = fs::File::create(&tmp_path)?;
		file.write_all(bytes)?;
		file.sync_all()?;
	}
	fs::rename(&tmp_path, path)
}
