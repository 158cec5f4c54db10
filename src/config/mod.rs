use log::Level;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Runtime configuration for cloudsync.
///
/// Values are loaded from (in order): `/etc/cloudsync/cloudsync.json`, the
/// user config folder (both optional), an explicit file passed with
/// `--config`, and environment variables prefixed with `CLOUDSYNC_`
/// (e.g. `CLOUDSYNC_WORKSPACE`).
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Settings {
	/// `local` or `remote`.
	pub service_type: String,
	/// Host identifier used in fork names.
	pub hostname: String,
	pub repo_name: String,
	pub workspace: String,
	pub local_service_path: PathBuf,
	pub remote_url: Option<Url>,
	pub remote_token: Option<String>,
	pub remote_timeout_ms: u64,
	/// Repository to pull missing commits from.
	pub pull_source: Option<PathBuf>,
	pub max_attempts: u32,
	pub max_transport_retries: u32,
	pub initial_backoff_ms: u64,
	pub max_backoff_ms: u64,
	pub deadline_secs: u64,
	pub log_level: Level,
}

impl Default for Settings {
	fn default() -> Self {
		let hostname = hostname::get()
			.ok()
			.and_then(|s| s.into_string().ok())
			.unwrap_or_else(|| "localhost".to_string());

		let local_service_path = dirs::data_local_dir()
			.unwrap_or_else(|| PathBuf::from("."))
			.join("cloudsync")
			.join("service");

		Self {
			service_type: "local".to_string(),
			hostname,
			repo_name: "default".to_string(),
			workspace: "user/default".to_string(),
			local_service_path,
			remote_url: None,
			remote_token: None,
			remote_timeout_ms: 30_000,
			pull_source: None,
			max_attempts: 10,
			max_transport_retries: 3,
			initial_backoff_ms: 100,
			max_backoff_ms: 5_000,
			deadline_secs: 300,
			log_level: Level::Info,
		}
	}
}

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("configuration error: {0}")]
	Config(#[from] config::ConfigError),
}

pub fn load(extra: Option<&Path>) -> Result<Settings, SettingsError> {
	let mut builder = config::Config::builder()
		.add_source(config::File::with_name("/etc/cloudsync/cloudsync.json").required(false));

	if let Some(folder) = dirs::config_dir() {
		let user_config_path = folder.join("cloudsync").join("cloudsync.json");
		builder = builder.add_source(config::File::from(user_config_path).required(false));
	}
	if let Some(path) = extra {
		builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
	}

	builder = builder.add_source(config::Environment::with_prefix("CLOUDSYNC").separator("__"));

	let cfg = builder.build()?;

	let mut s: Settings = cfg.try_deserialize()?;

	// Direct environment variables win over everything else, including
	// names the `config` crate would split on underscores.
	if let Ok(t) = std::env::var("CLOUDSYNC_SERVICE_TYPE") {
		if !t.is_empty() {
			s.service_type = t;
		}
	}
	if let Ok(h) = std::env::var("CLOUDSYNC_HOSTNAME") {
		if !h.is_empty() {
			s.hostname = h;
		}
	}
	if let Ok(r) = std::env::var("CLOUDSYNC_REPO_NAME") {
		if !r.is_empty() {
			s.repo_name = r;
		}
	}
	if let Ok(w) = std::env::var("CLOUDSYNC_WORKSPACE") {
		if !w.is_empty() {
			s.workspace = w;
		}
	}
	if let Ok(p) = std::env::var("CLOUDSYNC_LOCAL_SERVICE_PATH") {
		if !p.is_empty() {
			s.local_service_path = PathBuf::from(p);
		}
	}
	if let Ok(u) = std::env::var("CLOUDSYNC_REMOTE_URL") {
		if !u.is_empty() {
			if let Ok(parsed) = Url::parse(&u) {
				s.remote_url = Some(parsed);
			}
		}
	}
	if let Ok(t) = std::env::var("CLOUDSYNC_REMOTE_TOKEN") {
		if !t.is_empty() {
			s.remote_token = Some(t);
		}
	}
	if let Ok(p) = std::env::var("CLOUDSYNC_PULL_SOURCE") {
		if !p.is_empty() {
			s.pull_source = Some(PathBuf::from(p));
		}
	}
	if let Ok(l) = std::env::var("CLOUDSYNC_LOG_LEVEL") {
		if !l.is_empty() {
			if let Ok(parsed) = l.parse::<Level>() {
				s.log_level = parsed;
			}
		}
	}

	Ok(s)
}
