use std::time::Duration;
use thiserror::Error;

use crate::repo::RepoError;
use crate::service::ServiceError;
use crate::sync::state::StateError;

#[derive(Debug, Error)]
pub enum SyncError {
	#[error("reference service error: {0}")]
	Service(#[from] ServiceError),

	#[error(transparent)]
	Repo(#[from] RepoError),

	#[error("sync state error: {0}")]
	State(#[from] StateError),

	#[error("invalid service configuration: {0}")]
	InvalidService(String),

	#[error("gave up after {attempts} push attempt(s) without converging")]
	AttemptsExhausted { attempts: u32 },

	#[error("sync did not finish within {0:?}")]
	DeadlineExceeded(Duration),

	#[error("sync cancelled")]
	Cancelled,
}

impl SyncError {
	/// Whether the convergence loop may retry after this error.
	pub fn is_retryable(&self) -> bool {
		match self {
			SyncError::Service(e) => e.is_retryable(),
			_ => false,
		}
	}
}
