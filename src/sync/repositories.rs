use crate::chain::Account;
use crate::sync::types::SyncError;

use std::path::PathBuf;
use tracing::{debug, info};

/// Repository for per-account sync watermarks
#[async_trait::async_trait]
pub trait WatermarkRepository: Send + Sync {
	async fn save(&self, account: &Account, block: u64) -> Result<(), SyncError>;
	async fn load(&self, account: &Account) -> Result<Option<u64>, SyncError>;
}

/// File-based implementation of WatermarkRepository
///
/// Writes one small JSON metadata file per account into `data_dir`.
pub struct FileWatermarkRepository {
	data_dir: PathBuf,
}

impl FileWatermarkRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_metadata_filename(&self, account: &Account) -> PathBuf {
		self.data_dir
			.join(format!("watermark_{}.meta.json", account.as_str()))
	}
}

#[async_trait::async_trait]
impl WatermarkRepository for FileWatermarkRepository {
	async fn save(&self, account: &Account, block: u64) -> Result<(), SyncError> {
		tokio::fs::create_dir_all(&self.data_dir)
			.await
			.map_err(|e| {
				SyncError::Persistence(format!("Failed to create data directory: {}", e))
			})?;

		let metadata = serde_json::json!({
			"account": account.as_str(),
			"sync_height": block,
			"timestamp": chrono::Utc::now().to_rfc3339(),
		});
		let contents = serde_json::to_string_pretty(&metadata).map_err(|e| {
			SyncError::Persistence(format!("Failed to encode watermark metadata: {}", e))
		})?;

		// Write to a sibling file first so a crash never leaves a truncated watermark
		let filename = self.get_metadata_filename(account);
		let tmp_filename = filename.with_extension("json.tmp");
		tokio::fs::write(&tmp_filename, contents)
			.await
			.map_err(|e| {
				SyncError::Persistence(format!("Failed to write watermark metadata: {}", e))
			})?;
		tokio::fs::rename(&tmp_filename, &filename)
			.await
			.map_err(|e| {
				SyncError::Persistence(format!("Failed to replace watermark metadata: {}", e))
			})?;

		debug!("Saved watermark {} for {} to {:?}", block, account, filename);
		Ok(())
	}

	async fn load(&self, account: &Account) -> Result<Option<u64>, SyncError> {
		let filename = self.get_metadata_filename(account);
		if !tokio::fs::try_exists(&filename).await.unwrap_or(false) {
			return Ok(None);
		}

		let meta_content = tokio::fs::read_to_string(&filename).await.map_err(|e| {
			SyncError::Persistence(format!("Failed to read watermark metadata: {}", e))
		})?;
		let metadata: serde_json::Value = serde_json::from_str(&meta_content).map_err(|e| {
			SyncError::Persistence(format!("Failed to parse watermark metadata: {}", e))
		})?;
		let height = metadata
			.get("sync_height")
			.and_then(|h| h.as_u64())
			.ok_or_else(|| {
				SyncError::Persistence(format!("{:?} has no sync_height", filename))
			})?;

		info!("Loaded watermark {} for {} from {:?}", height, account, filename);
		Ok(Some(height))
	}
}
