//! Runtime configuration for the `note-sync` binary.
//!
//! Read from the JSON file named by `NOTE_SYNC_CONFIG`; every key is optional except the
//! note registry address and its event topics. `NOTE_SYNC_RPC_URL` overrides the node URL.

use crate::chain::Account;
use crate::notes::NoteEventTopics;
use crate::retry::RetryPolicy;
use crate::sync::{Environment, SyncConfig};

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "NOTE_SYNC_CONFIG";
pub const RPC_URL_ENV: &str = "NOTE_SYNC_RPC_URL";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
	pub rpc_url: String,
	pub request_timeout_ms: u64,
	pub note_registry_address: String,
	pub note_event_topics: NoteEventTopics,
	pub sync: SyncConfig,
	pub environment: Environment,
	/// Retries for head and range queries within one cycle.
	pub sync_retry: RetryPolicy,
	/// Where watermarks are persisted.
	pub data_dir: PathBuf,
	/// Accounts to sync on startup.
	pub accounts: Vec<Account>,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			rpc_url: "http://127.0.0.1:8545".to_string(),
			request_timeout_ms: 30_000,
			note_registry_address: String::new(),
			note_event_topics: NoteEventTopics {
				create_note: String::new(),
				update_note: String::new(),
				destroy_note: String::new(),
			},
			sync: SyncConfig::default(),
			environment: Environment::default(),
			sync_retry: RetryPolicy::single_attempt(),
			data_dir: PathBuf::from("data"),
			accounts: Vec::new(),
		}
	}
}

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Failed to read {path:?}: {source}")]
	Io {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("Failed to parse configuration: {0}")]
	Parse(#[from] serde_json::Error),

	#[error("Invalid configuration: {0}")]
	Invalid(String),
}

impl AppConfig {
	/// Loads the file named by `NOTE_SYNC_CONFIG` (defaults when unset), then applies
	/// environment overrides and validates the result.
	pub async fn load() -> Result<Self, ConfigError> {
		let config = match std::env::var(CONFIG_PATH_ENV) {
			Ok(path) => {
				let path = PathBuf::from(path);
				let contents = tokio::fs::read_to_string(&path)
					.await
					.map_err(|source| ConfigError::Io {
						path: path.clone(),
						source,
					})?;
				Self::from_json(&contents)?
			}
			Err(_) => Self::default(),
		};
		let config = config.with_overrides(|key| std::env::var(key).ok());
		config.validate()?;
		Ok(config)
	}

	pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
		Ok(serde_json::from_str(contents)?)
	}

	/// Applies overrides looked up by environment variable name.
	pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
		if let Some(rpc_url) = lookup(RPC_URL_ENV).filter(|url| !url.trim().is_empty()) {
			self.rpc_url = rpc_url;
		}
		self
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		self.sync
			.validate()
			.map_err(|e| ConfigError::Invalid(e.to_string()))?;
		if self.note_registry_address.is_empty() {
			return Err(ConfigError::Invalid(
				"noteRegistryAddress is required".to_string(),
			));
		}
		let topics = &self.note_event_topics;
		if [&topics.create_note, &topics.update_note, &topics.destroy_note]
			.iter()
			.any(|topic| topic.is_empty())
		{
			return Err(ConfigError::Invalid(
				"noteEventTopics needs createNote, updateNote and destroyNote".to_string(),
			));
		}
		Ok(())
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const CONFIG: &str = r#"{
		"noteRegistryAddress": "0x00000000000000000000000000000000000000aa",
		"noteEventTopics": {
			"createNote": "0x01",
			"updateNote": "0x02",
			"destroyNote": "0x03"
		},
		"sync": { "blockSpanPerRequest": 1000 },
		"environment": "development",
		"syncRetry": { "max_attempts": 3, "initial_interval": 250 },
		"accounts": ["0xABC"]
	}"#;

	#[test]
	fn test_from_json_fills_defaults() {
		let config = AppConfig::from_json(CONFIG).unwrap();
		assert!(config.validate().is_ok());
		assert_eq!(config.rpc_url, "http://127.0.0.1:8545");
		assert_eq!(config.sync.block_span_per_request, 1000);
		assert_eq!(config.sync.poll_interval_ms, 5000);
		assert_eq!(config.environment, Environment::Development);
		assert_eq!(config.sync_retry.max_attempts, 3);
		assert_eq!(config.sync_retry.initial_interval, Duration::from_millis(250));
		assert_eq!(config.sync_retry.deadline, None);
		assert_eq!(config.accounts, vec![Account::new("0xabc")]);
	}

	#[test]
	fn test_rpc_url_override() {
		let config = AppConfig::from_json(CONFIG)
			.unwrap()
			.with_overrides(|key| (key == RPC_URL_ENV).then(|| "http://node:8545".to_string()));
		assert_eq!(config.rpc_url, "http://node:8545");
	}

	#[test]
	fn test_validate_requires_registry() {
		let config = AppConfig::default();
		assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
	}
}
