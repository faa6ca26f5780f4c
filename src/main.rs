use note_sync::chain::JsonRpcClient;
use note_sync::config::AppConfig;
use note_sync::notes::{InMemoryNoteLedger, LogNoteSource};
use note_sync::sync::{
	FileWatermarkRepository, SyncNotification, SyncScheduler, WatermarkRepository,
};

use std::sync::Arc;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	if let Err(e) = run().await {
		error!("note-sync failed: {}", e);
		std::process::exit(1);
	}
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
	let config = AppConfig::load().await?;
	info!("Starting note sync against {}", config.rpc_url);

	let client = JsonRpcClient::new(config.rpc_url.clone(), config.request_timeout())?;
	let source = Arc::new(LogNoteSource::new(
		client,
		config.note_registry_address.clone(),
		config.note_event_topics.clone(),
	));
	let ledger = Arc::new(InMemoryNoteLedger::new());
	let watermarks = Arc::new(FileWatermarkRepository::new(config.data_dir.clone()));

	let scheduler = SyncScheduler::builder(source, ledger.clone())
		.config(config.sync.clone())
		.retry_policy(config.sync_retry.clone())
		.environment(config.environment)
		.watermarks(watermarks.clone())
		.spawn()?;

	let mut notifications = scheduler.subscribe();
	tokio::spawn(async move {
		while let Ok(notification) = notifications.recv().await {
			if let SyncNotification::BatchApplied { account, report } = notification {
				if report.total() > 0 {
					info!(
						"{}: {} created, {} updated, {} destroyed",
						account, report.created, report.updated, report.destroyed
					);
				}
			}
		}
	});

	for account in &config.accounts {
		let last_synced_block = watermarks.load(account).await?.unwrap_or_default();
		info!("Syncing {} from block {}", account, last_synced_block);
		scheduler.sync(account.clone(), last_synced_block)?;
	}

	tokio::signal::ctrl_c().await?;
	info!("Shutting down");
	scheduler.shutdown().await?;
	info!("{} notes in the local ledger", ledger.len());
	Ok(())
}
