use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use super::wire::{
	GET_REFERENCES_PATH, GetReferencesRequest, ReferencesData, UPDATE_REFERENCES_PATH,
	UpdateReferencesRequest, UpdateReferencesResponse,
};
use super::{CloudService, ReferencesUpdate, ServiceError, UpdateOutcome};
use crate::sync::types::{CloudRefs, Version};

const MAX_ERROR_BODY: usize = 512;

/// Client for an HTTPS reference service. Updates are sent as deltas
/// against the caller's base snapshot.
#[derive(Debug, Clone)]
pub struct RemoteService {
	client: Client,
	base_url: Url,
	repo_name: String,
	workspace: String,
	token: Option<String>,
}

impl RemoteService {
	pub fn new(
		mut base_url: Url,
		repo_name: &str,
		workspace: &str,
		token: Option<String>,
		timeout: Duration,
	) -> Result<Self, ServiceError> {
		let client = Client::builder()
			.timeout(timeout)
			.user_agent(concat!("cloudsync/", env!("CARGO_PKG_VERSION")))
			.build()
			.map_err(|e| ServiceError::Transport(e.to_string()))?;
		// Endpoints resolve relative to the base path, which must be a directory.
		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());
			base_url.set_path(&path);
		}
		Ok(Self {
			client,
			base_url,
			repo_name: repo_name.to_string(),
			workspace: workspace.to_string(),
			token,
		})
	}

	fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
		self.base_url
			.join(path.trim_start_matches('/'))
			.map_err(|e| ServiceError::Transport(format!("invalid endpoint {}: {}", path, e)))
	}

	async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
		&self,
		path: &str,
		body: &B,
	) -> Result<R, ServiceError> {
		let url = self.endpoint(path)?;
		debug!("POST {}", url);

		let mut request = self.client.post(url).json(body);
		if let Some(token) = &self.token {
			request = request.bearer_auth(token);
		}

		let resp = request.send().await.map_err(map_reqwest_error)?;
		let status = resp.status();
		if !status.is_success() {
			let text = resp.text().await.unwrap_or_default();
			return Err(ServiceError::Status {
				status,
				body: truncate(text, MAX_ERROR_BODY),
			});
		}

		let bytes = resp.bytes().await.map_err(map_reqwest_error)?;
		serde_json::from_slice(&bytes).map_err(|e| ServiceError::Decode(e.to_string()))
	}
}

fn map_reqwest_error(err: reqwest::Error) -> ServiceError {
	if err.is_timeout() {
		ServiceError::Timeout
	} else {
		ServiceError::Transport(err.to_string())
	}
}

fn truncate(mut text: String, max: usize) -> String {
	if text.len() > max {
		let mut end = max;
		while !text.is_char_boundary(end) {
			end -= 1;
		}
		text.truncate(end);
	}
	text
}

#[async_trait]
impl CloudService for RemoteService {
	async fn get_references(&self, base_version: Version) -> Result<CloudRefs, ServiceError> {
		let body = GetReferencesRequest {
			repo_name: self.repo_name.clone(),
			workspace: self.workspace.clone(),
			version: base_version,
		};
		let data: ReferencesData = self.post(GET_REFERENCES_PATH, &body).await?;
		Ok(data.into())
	}

	async fn update_references(
		&self,
		update: &ReferencesUpdate,
	) -> Result<UpdateOutcome, ServiceError> {
		let body = UpdateReferencesRequest::from_update(&self.repo_name, &self.workspace, update);
		let resp: UpdateReferencesResponse = self.post(UPDATE_REFERENCES_PATH, &body).await?;
		Ok(UpdateOutcome {
			accepted: resp.accepted,
			refs: resp.refs.into(),
		})
	}
}
