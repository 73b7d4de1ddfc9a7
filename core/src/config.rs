use std::{io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::{concurrency::JobConcurrencyPolicy, job::JobCategory};

pub const CONFIG_FILE_NAME: &str = "orchestrator.json";

const DEFAULT_SCAN_JOB_TIMEOUT_SECS: u64 = 10 * 60;
const DEFAULT_OPT_OUT_JOB_TIMEOUT_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
	pub scan_job_timeout_secs: u64,
	pub opt_out_job_timeout_secs: u64,
}

impl Default for ExecutionConfig {
	fn default() -> Self {
		Self {
			scan_job_timeout_secs: DEFAULT_SCAN_JOB_TIMEOUT_SECS,
			opt_out_job_timeout_secs: DEFAULT_OPT_OUT_JOB_TIMEOUT_SECS,
		}
	}
}

impl ExecutionConfig {
	/// Time a single broker job of `category` may take before it is reported as timed out.
	///
	/// Full runs do both scans and opt-outs, so they get the longest of both.
	#[must_use]
	pub fn job_timeout(&self, category: JobCategory) -> Duration {
		let secs = match category {
			JobCategory::ManualScanOnly | JobCategory::ScheduledScanOnly => {
				self.scan_job_timeout_secs
			}
			JobCategory::OptOutOnly => self.opt_out_job_timeout_secs,
			JobCategory::All => self
				.scan_job_timeout_secs
				.max(self.opt_out_job_timeout_secs),
		};

		Duration::from_secs(secs)
	}
}

/// Settings of the orchestrator, stored as JSON on disk.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
	#[serde(default)]
	pub concurrency: JobConcurrencyPolicy,
	#[serde(default)]
	pub execution: ExecutionConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file '{}': {source}", .path.display())]
	Read {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("failed to write config file '{}': {source}", .path.display())]
	Write {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("invalid config file '{}': {source}", .path.display())]
	Parse {
		path: Box<Path>,
		#[source]
		source: serde_json::Error,
	},
	#[error("failed to serialize config: {0}")]
	Serialize(#[from] serde_json::Error),
}

impl OrchestratorConfig {
	pub async fn load(path: impl AsRef<Path> + Send) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		let data = fs::read(path).await.map_err(|source| ConfigError::Read {
			path: path.into(),
			source,
		})?;

		serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
			path: path.into(),
			source,
		})
	}

	pub async fn save(&self, path: impl AsRef<Path> + Send) -> Result<(), ConfigError> {
		let path = path.as_ref();

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|source| ConfigError::Write {
					path: parent.into(),
					source,
				})?;
		}

		fs::write(path, serde_json::to_vec_pretty(self)?)
			.await
			.map_err(|source| ConfigError::Write {
				path: path.into(),
				source,
			})
	}

	/// Loads the config at `path`, writing the defaults there first if the file doesn't exist.
	pub async fn load_or_create(path: impl AsRef<Path> + Send) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		match fs::metadata(path).await {
			Ok(_) => {
				debug!(path = %path.display(), "Loading orchestrator config");
				Self::load(path).await
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				info!(path = %path.display(), "No orchestrator config found, creating default one");
				let config = Self::default();
				config.save(path).await?;
				Ok(config)
			}
			Err(source) => Err(ConfigError::Read {
				path: path.into(),
				source,
			}),
		}
	}
}
