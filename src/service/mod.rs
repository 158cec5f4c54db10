//! Reference service clients.
//!
//! The sync engine depends only on [`CloudService`]. `service_type` in the
//! settings picks the implementation: `local` stores references in a JSON
//! file per workspace, `remote` talks to an HTTPS endpoint.

pub mod local;
pub mod remote;
pub mod wire;

pub use local::LocalService;
pub use remote::RemoteService;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::config::Settings;
use crate::repo::LockError;
use crate::sync::error::SyncError;
use crate::sync::types::{Bookmarks, CloudRefs, Heads, ObsMarker, Version};

#[derive(Debug, Error)]
pub enum ServiceError {
	#[error("transport error: {0}")]
	Transport(String),

	#[error("request timed out")]
	Timeout,

	#[error("service returned HTTP {status}: {body}")]
	Status { status: StatusCode, body: String },

	#[error("malformed service response: {0}")]
	Decode(String),

	#[error("service store I/O error: {0}")]
	Io(#[from] io::Error),

	#[error("service store {} is corrupt: {source}", .path.display())]
	Corrupt {
		path: PathBuf,
		source: serde_json::Error,
	},

	#[error("service store is busy: {0}")]
	Busy(#[from] LockError),
}

impl ServiceError {
	/// Whether repeating the same call later may succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			ServiceError::Transport(_) | ServiceError::Timeout => true,
			ServiceError::Status { status, .. } => {
				status.is_server_error()
					|| *status == StatusCode::TOO_MANY_REQUESTS
					|| *status == StatusCode::REQUEST_TIMEOUT
			}
			ServiceError::Busy(LockError::Held { .. }) => true,
			_ => false,
		}
	}
}

/// Arguments of a compare-and-swap update. `base_*` is what the caller
/// last synced, `new_*` what it wants the service to hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferencesUpdate {
	pub base_version: Version,
	pub base_heads: Heads,
	pub new_heads: Heads,
	pub base_bookmarks: Bookmarks,
	pub new_bookmarks: Bookmarks,
	pub obsmarkers: Vec<ObsMarker>,
}

/// Result of an update. When `accepted` is false, `refs` is the service's
/// current state for the caller to re-base on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
	pub accepted: bool,
	pub refs: CloudRefs,
}

#[async_trait]
pub trait CloudService: Send + Sync {
	/// Current references, with the markers recorded after `base_version`.
	async fn get_references(&self, base_version: Version) -> Result<CloudRefs, ServiceError>;

	/// Atomically replace the references if the service is still at
	/// `update.base_version`.
	async fn update_references(
		&self,
		update: &ReferencesUpdate,
	) -> Result<UpdateOutcome, ServiceError>;
}

/// Build the service selected by `settings.service_type`.
pub fn connect(settings: &Settings) -> Result<Box<dyn CloudService>, SyncError> {
	match settings.service_type.as_str() {
		"local" => Ok(Box::new(LocalService::new(
			&settings.local_service_path,
			&settings.repo_name,
			&settings.workspace,
		))),
		"remote" => {
			let Some(url) = settings.remote_url.clone() else {
				return Err(SyncError::InvalidService(
					"service_type is \"remote\" but remote_url is not set".to_string(),
				));
			};
			let service = RemoteService::new(
				url,
				&settings.repo_name,
				&settings.workspace,
				settings.remote_token.clone(),
				Duration::from_millis(settings.remote_timeout_ms),
			)
			.map_err(|e| SyncError::InvalidService(e.to_string()))?;
			Ok(Box::new(service))
		}
		other => Err(SyncError::InvalidService(format!(
			"unrecognized service_type: {:?}",
			other
		))),
	}
}
