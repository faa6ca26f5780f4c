use async_trait::async_trait;
use note_sync::chain::{Account, BlockRange, ChainError};
use note_sync::notes::{
	ChainEventSource, InMemoryNoteLedger, LedgerError, Note, NoteBatch, NoteEvent, NoteEventKind,
	NoteKey, NoteLedgerWriter,
};
use note_sync::sync::{
	CircuitBreaker, Environment, FileWatermarkRepository, SyncConfig, SyncConfigUpdate, SyncError,
	SyncNotification, SyncPhase, SyncRequest, SyncScheduler, SyncSchedulerBuilder,
	WatermarkRepository,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio::time::Instant;

const ACCOUNT: &str = "0x00000000000000000000000000000000000000a1";

#[derive(Default)]
struct FakeSource {
	head: AtomicU64,
	events: Mutex<Vec<NoteEvent>>,
	fetches: Mutex<Vec<(BlockRange, Instant)>>,
	head_queries: AtomicUsize,
	failures_left: AtomicU32,
	gate: Option<Semaphore>,
}

impl FakeSource {
	fn with_head(head: u64) -> Self {
		Self {
			head: AtomicU64::new(head),
			..Default::default()
		}
	}

	fn fetched_ranges(&self) -> Vec<BlockRange> {
		self.fetches
			.lock()
			.unwrap()
			.iter()
			.map(|(range, _)| *range)
			.collect()
	}
}

#[async_trait]
impl ChainEventSource for FakeSource {
	async fn current_head(&self) -> Result<u64, ChainError> {
		self.head_queries.fetch_add(1, Ordering::SeqCst);
		Ok(self.head.load(Ordering::SeqCst))
	}

	async fn fetch_range(
		&self,
		account: &Account,
		range: BlockRange,
	) -> Result<NoteBatch, ChainError> {
		self.fetches.lock().unwrap().push((range, Instant::now()));
		if let Some(gate) = &self.gate {
			let _permit = gate.acquire().await.unwrap();
		}
		if self.failures_left.load(Ordering::SeqCst) > 0 {
			self.failures_left.fetch_sub(1, Ordering::SeqCst);
			return Err(ChainError::InvalidResponse("node unavailable".to_string()));
		}

		let mut batch = NoteBatch::default();
		for event in self.events.lock().unwrap().iter() {
			let note = event.note();
			if &note.owner == account && (range.from..=range.to).contains(&note.block_number) {
				batch.push(event.clone());
			}
		}
		Ok(batch)
	}
}

#[derive(Default)]
struct RecordingLedger {
	inner: InMemoryNoteLedger,
	writes: Mutex<Vec<(NoteEventKind, NoteKey)>>,
	fail: AtomicBool,
}

impl RecordingLedger {
	fn record(&self, kind: NoteEventKind, note: &Note) -> Result<(), LedgerError> {
		if self.fail.load(Ordering::SeqCst) {
			return Err(LedgerError::Storage("disk full".to_string()));
		}
		self.writes.lock().unwrap().push((kind, note.key.clone()));
		Ok(())
	}

	fn write_log(&self) -> Vec<(NoteEventKind, NoteKey)> {
		self.writes.lock().unwrap().clone()
	}
}

#[async_trait]
impl NoteLedgerWriter for RecordingLedger {
	async fn create(&self, account: &Account, note: &Note) -> Result<(), LedgerError> {
		self.record(NoteEventKind::Create, note)?;
		self.inner.create(account, note).await
	}

	async fn update(&self, account: &Account, note: &Note) -> Result<(), LedgerError> {
		self.record(NoteEventKind::Update, note)?;
		self.inner.update(account, note).await
	}

	async fn destroy(&self, account: &Account, note: &Note) -> Result<(), LedgerError> {
		self.record(NoteEventKind::Destroy, note)?;
		self.inner.destroy(account, note).await
	}
}

fn note(key: &str, block_number: u64, log_index: u64) -> Note {
	Note {
		key: NoteKey::new(key),
		owner: Account::new(ACCOUNT),
		block_number,
		log_index,
		payload: vec![0xab],
	}
}

fn config(span: u64) -> SyncConfig {
	SyncConfig {
		poll_interval_ms: 5000,
		block_span_per_request: span,
		catch_up_threshold: 10,
	}
}

fn builder(source: &Arc<FakeSource>, ledger: &Arc<RecordingLedger>) -> SyncSchedulerBuilder {
	SyncScheduler::builder(source.clone(), ledger.clone())
}

async fn wait_for<F>(
	notifications: &mut broadcast::Receiver<SyncNotification>,
	mut matches: F,
) -> SyncNotification
where
	F: FnMut(&SyncNotification) -> bool,
{
	loop {
		let notification = notifications
			.recv()
			.await
			.expect("notification stream closed");
		if matches(&notification) {
			return notification;
		}
	}
}

fn is_scheduled(notification: &SyncNotification) -> bool {
	matches!(notification, SyncNotification::Scheduled { .. })
}

#[tokio::test(start_paused = true)]
async fn test_catches_up_without_delay_then_waits() {
	let source = Arc::new(FakeSource::with_head(250));
	let ledger = Arc::new(RecordingLedger::default());
	let scheduler = builder(&source, &ledger).config(config(100)).spawn().unwrap();
	let mut notifications = scheduler.subscribe();

	let started = Instant::now();
	scheduler.sync(ACCOUNT, 0).unwrap();

	let scheduled = wait_for(&mut notifications, is_scheduled).await;
	assert_eq!(
		scheduled,
		SyncNotification::Scheduled {
			account: Account::new(ACCOUNT),
			last_synced_block: 250,
			delay: Duration::from_millis(5000),
		}
	);

	let fetches = source.fetches.lock().unwrap().clone();
	assert_eq!(
		fetches.iter().map(|(range, _)| *range).collect::<Vec<_>>(),
		vec![
			BlockRange::new(1, 100),
			BlockRange::new(101, 200),
			BlockRange::new(201, 250)
		]
	);
	assert!(fetches.iter().all(|(_, at)| *at == started));

	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert_eq!(status.last_synced_block, 250);
	assert_eq!(status.phase, SyncPhase::Waiting);
	assert!(!status.is_syncing);
	assert_eq!(status.stats.batches_applied, 3);

	// The next cycle only runs after the poll interval and finds nothing new.
	let next = wait_for(&mut notifications, |n| {
		matches!(n, SyncNotification::CycleStarted(_))
	})
	.await;
	assert_eq!(
		next,
		SyncNotification::CycleStarted(SyncRequest::new(ACCOUNT, 250))
	);
	let waited = started.elapsed();
	assert!(waited >= Duration::from_millis(5000) && waited < Duration::from_millis(5010));
	wait_for(&mut notifications, |n| {
		matches!(n, SyncNotification::UpToDate { head: 250, .. })
	})
	.await;
	assert_eq!(source.fetched_ranges().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_applies_creates_then_updates_then_destroys() {
	let source = Arc::new(FakeSource::with_head(10));
	source.events.lock().unwrap().extend([
		NoteEvent::Destroy(note("0xa", 3, 0)),
		NoteEvent::Update(note("0xa", 2, 0)),
		NoteEvent::Create(note("0xb", 2, 1)),
		NoteEvent::Create(note("0xa", 1, 0)),
	]);
	let ledger = Arc::new(RecordingLedger::default());
	let scheduler = builder(&source, &ledger).spawn().unwrap();
	let mut notifications = scheduler.subscribe();

	scheduler.sync(ACCOUNT, 0).unwrap();
	let applied = wait_for(&mut notifications, |n| {
		matches!(n, SyncNotification::BatchApplied { .. })
	})
	.await;

	let SyncNotification::BatchApplied { report, .. } = applied else {
		unreachable!()
	};
	assert_eq!(report.range, Some(BlockRange::new(1, 10)));
	assert_eq!((report.created, report.updated, report.destroyed), (2, 1, 1));
	assert_eq!(
		ledger.write_log(),
		vec![
			(NoteEventKind::Create, NoteKey::new("0xa")),
			(NoteEventKind::Create, NoteKey::new("0xb")),
			(NoteEventKind::Update, NoteKey::new("0xa")),
			(NoteEventKind::Destroy, NoteKey::new("0xa")),
		]
	);
	assert_eq!(ledger.inner.live_notes(&Account::new(ACCOUNT)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_failure_recovers_on_next_cycle() {
	let source = Arc::new(FakeSource::with_head(100));
	source.failures_left.store(1, Ordering::SeqCst);
	let ledger = Arc::new(RecordingLedger::default());
	let errors = Arc::new(AtomicUsize::new(0));
	let counter = errors.clone();

	let scheduler = builder(&source, &ledger)
		.environment(Environment::Production)
		.error_handler(move |_: &Account, error: &SyncError| {
			assert!(matches!(error, SyncError::Fetch(_)));
			counter.fetch_add(1, Ordering::SeqCst);
		})
		.spawn()
		.unwrap();
	let mut notifications = scheduler.subscribe();

	scheduler.sync(ACCOUNT, 0).unwrap();
	let failed = wait_for(&mut notifications, |n| {
		matches!(n, SyncNotification::FetchFailed { .. })
	})
	.await;
	assert!(matches!(
		failed,
		SyncNotification::FetchFailed { range: Some(range), .. } if range == BlockRange::new(1, 100)
	));

	let scheduled = wait_for(&mut notifications, is_scheduled).await;
	assert!(matches!(
		scheduled,
		SyncNotification::Scheduled { last_synced_block: 0, .. }
	));
	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert_eq!(status.last_synced_block, 0);
	assert_eq!(status.stats.consecutive_failures, 1);
	assert!(!scheduler.circuit_breaker().is_tripped());

	wait_for(&mut notifications, |n| {
		matches!(n, SyncNotification::BatchApplied { .. })
	})
	.await;
	assert_eq!(errors.load(Ordering::SeqCst), 1);
	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert_eq!(status.last_synced_block, 100);
	assert_eq!(status.stats.consecutive_failures, 0);
	assert_eq!(
		source.fetched_ranges(),
		vec![BlockRange::new(1, 100), BlockRange::new(1, 100)]
	);
}

#[tokio::test(start_paused = true)]
async fn test_development_failure_trips_breaker_until_cleared() {
	let source = Arc::new(FakeSource::with_head(100));
	source.failures_left.store(1, Ordering::SeqCst);
	let ledger = Arc::new(RecordingLedger::default());
	let breaker = CircuitBreaker::new();
	let scheduler = builder(&source, &ledger)
		.environment(Environment::Development)
		.circuit_breaker(breaker.clone())
		.error_handler(|_: &Account, _: &SyncError| {})
		.spawn()
		.unwrap();
	let mut notifications = scheduler.subscribe();

	scheduler.sync(ACCOUNT, 0).unwrap();
	let paused = wait_for(&mut notifications, |n| {
		matches!(n, SyncNotification::Paused(_))
	})
	.await;
	assert_eq!(paused, SyncNotification::Paused(SyncRequest::new(ACCOUNT, 0)));
	assert!(breaker.is_tripped());

	// Nothing runs while the breaker is tripped, not even a new sync call.
	tokio::time::sleep(Duration::from_secs(60)).await;
	scheduler.sync(ACCOUNT, 0).unwrap();
	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert_eq!(status.phase, SyncPhase::Paused);
	assert_eq!(status.paused_continuation, Some(SyncRequest::new(ACCOUNT, 0)));
	assert_eq!(source.fetched_ranges().len(), 1);

	breaker.clear();
	scheduler.resume_all().unwrap();
	wait_for(&mut notifications, |n| {
		matches!(n, SyncNotification::BatchApplied { .. })
	})
	.await;
	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert_eq!(status.last_synced_block, 100);
	assert_eq!(status.paused_continuation, None);
}

#[tokio::test(start_paused = true)]
async fn test_pause_then_resume_runs_one_cycle_from_stored_watermark() {
	let source = Arc::new(FakeSource::with_head(100));
	let ledger = Arc::new(RecordingLedger::default());
	let scheduler = builder(&source, &ledger).config(config(100)).spawn().unwrap();
	let mut notifications = scheduler.subscribe();

	scheduler.sync(ACCOUNT, 0).unwrap();
	wait_for(&mut notifications, is_scheduled).await;

	scheduler.pause(ACCOUNT).unwrap();
	let paused = wait_for(&mut notifications, |n| {
		matches!(n, SyncNotification::Paused(_))
	})
	.await;
	assert_eq!(paused, SyncNotification::Paused(SyncRequest::new(ACCOUNT, 100)));

	// A second pause is only a diagnostic.
	scheduler.pause(ACCOUNT).unwrap();
	tokio::time::sleep(Duration::from_secs(30)).await;
	assert_eq!(source.head_queries.load(Ordering::SeqCst), 1);

	source.head.store(150, Ordering::SeqCst);
	scheduler.resume(ACCOUNT).unwrap();
	let resumed = wait_for(&mut notifications, |n| {
		matches!(n, SyncNotification::CycleStarted(_))
	})
	.await;
	assert_eq!(
		resumed,
		SyncNotification::CycleStarted(SyncRequest::new(ACCOUNT, 100))
	);
	wait_for(&mut notifications, is_scheduled).await;

	assert_eq!(
		source.fetched_ranges(),
		vec![BlockRange::new(1, 100), BlockRange::new(101, 150)]
	);
	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert_eq!(status.last_synced_block, 150);
	assert_eq!(status.phase, SyncPhase::Waiting);
	assert_eq!(status.next_cycle_in, Some(Duration::from_millis(5000)));
}

#[tokio::test(start_paused = true)]
async fn test_pause_during_cycle_parks_with_new_watermark() {
	let source = Arc::new(FakeSource {
		head: AtomicU64::new(100),
		gate: Some(Semaphore::new(0)),
		..Default::default()
	});
	let ledger = Arc::new(RecordingLedger::default());
	let scheduler = builder(&source, &ledger).spawn().unwrap();
	let mut notifications = scheduler.subscribe();

	scheduler.sync(ACCOUNT, 0).unwrap();
	scheduler.pause(ACCOUNT).unwrap();
	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert!(status.is_syncing);

	source.gate.as_ref().unwrap().add_permits(1);
	let paused = wait_for(&mut notifications, |n| {
		matches!(n, SyncNotification::Paused(_))
	})
	.await;
	assert_eq!(paused, SyncNotification::Paused(SyncRequest::new(ACCOUNT, 100)));
	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert_eq!(status.phase, SyncPhase::Paused);
	assert_eq!(status.next_cycle_in, None);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_sync_never_overlaps_fetches() {
	let source = Arc::new(FakeSource {
		head: AtomicU64::new(100),
		gate: Some(Semaphore::new(0)),
		..Default::default()
	});
	let ledger = Arc::new(RecordingLedger::default());
	let scheduler = builder(&source, &ledger).spawn().unwrap();
	let mut notifications = scheduler.subscribe();

	for _ in 0..3 {
		scheduler.sync(ACCOUNT, 0).unwrap();
	}
	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert!(status.is_syncing);
	assert_eq!(status.phase, SyncPhase::Fetching);

	source.gate.as_ref().unwrap().add_permits(1);
	wait_for(&mut notifications, is_scheduled).await;

	assert_eq!(source.head_queries.load(Ordering::SeqCst), 1);
	assert_eq!(source.fetched_ranges(), vec![BlockRange::new(1, 100)]);
}

#[tokio::test(start_paused = true)]
async fn test_sync_during_cycle_leaves_watermark_alone() {
	let source = Arc::new(FakeSource {
		head: AtomicU64::new(2000),
		gate: Some(Semaphore::new(0)),
		..Default::default()
	});
	let ledger = Arc::new(RecordingLedger::default());
	let scheduler = builder(&source, &ledger).config(config(100)).spawn().unwrap();
	let mut notifications = scheduler.subscribe();

	scheduler.sync(ACCOUNT, 0).unwrap();
	scheduler.sync(ACCOUNT, 1000).unwrap();
	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert!(status.is_syncing);
	assert_eq!(status.last_synced_block, 0);

	source.gate.as_ref().unwrap().add_permits(1);
	wait_for(&mut notifications, is_scheduled).await;

	let ranges = source.fetched_ranges();
	assert_eq!(ranges.len(), 20);
	assert_eq!(ranges[0], BlockRange::new(1, 100));
	assert_eq!(ranges[1], BlockRange::new(101, 200));
	assert_eq!(ranges[19], BlockRange::new(1901, 2000));
	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert_eq!(status.last_synced_block, 2000);
}

#[tokio::test(start_paused = true)]
async fn test_resume_before_cycle_completes_cancels_pause() {
	let source = Arc::new(FakeSource {
		head: AtomicU64::new(100),
		gate: Some(Semaphore::new(0)),
		..Default::default()
	});
	let ledger = Arc::new(RecordingLedger::default());
	let scheduler = builder(&source, &ledger).spawn().unwrap();
	let mut notifications = scheduler.subscribe();

	scheduler.sync(ACCOUNT, 0).unwrap();
	scheduler.pause(ACCOUNT).unwrap();
	scheduler.resume(ACCOUNT).unwrap();
	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert!(status.is_syncing);
	assert_eq!(status.paused_continuation, None);

	source.gate.as_ref().unwrap().add_permits(1);
	let mut saw_paused = false;
	let scheduled = wait_for(&mut notifications, |n| {
		saw_paused |= matches!(n, SyncNotification::Paused(_));
		is_scheduled(n)
	})
	.await;

	assert!(!saw_paused);
	assert_eq!(
		scheduled,
		SyncNotification::Scheduled {
			account: Account::new(ACCOUNT),
			last_synced_block: 100,
			delay: Duration::from_millis(5000),
		}
	);
	assert_eq!(source.head_queries.load(Ordering::SeqCst), 1);
	assert_eq!(source.fetched_ranges(), vec![BlockRange::new(1, 100)]);
	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert_eq!(status.phase, SyncPhase::Waiting);
}

#[tokio::test(start_paused = true)]
async fn test_watermark_never_regresses() {
	let source = Arc::new(FakeSource::with_head(200));
	let ledger = Arc::new(RecordingLedger::default());
	let scheduler = builder(&source, &ledger).spawn().unwrap();
	let mut notifications = scheduler.subscribe();

	scheduler.sync(ACCOUNT, 200).unwrap();
	wait_for(&mut notifications, is_scheduled).await;

	scheduler.sync(ACCOUNT, 50).unwrap();
	let started = wait_for(&mut notifications, |n| {
		matches!(n, SyncNotification::CycleStarted(_))
	})
	.await;
	assert_eq!(
		started,
		SyncNotification::CycleStarted(SyncRequest::new(ACCOUNT, 200))
	);
	assert!(source.fetched_ranges().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_writer_failure_keeps_watermark() {
	let source = Arc::new(FakeSource::with_head(10));
	source
		.events
		.lock()
		.unwrap()
		.push(NoteEvent::Create(note("0xa", 5, 0)));
	let ledger = Arc::new(RecordingLedger::default());
	ledger.fail.store(true, Ordering::SeqCst);
	let errors = Arc::new(Mutex::new(Vec::new()));
	let seen = errors.clone();
	let scheduler = builder(&source, &ledger)
		.error_handler(move |_: &Account, error: &SyncError| {
			seen.lock().unwrap().push(error.to_string());
		})
		.spawn()
		.unwrap();
	let mut notifications = scheduler.subscribe();

	scheduler.sync(ACCOUNT, 0).unwrap();
	wait_for(&mut notifications, is_scheduled).await;

	let status = scheduler.status(ACCOUNT).await.unwrap().unwrap();
	assert_eq!(status.last_synced_block, 0);
	assert_eq!(errors.lock().unwrap().len(), 1);
	assert!(errors.lock().unwrap()[0].contains("disk full"));
}

#[tokio::test(start_paused = true)]
async fn test_configure_changes_block_span() {
	let source = Arc::new(FakeSource::with_head(60));
	let ledger = Arc::new(RecordingLedger::default());
	let scheduler = builder(&source, &ledger).spawn().unwrap();
	let mut notifications = scheduler.subscribe();

	assert!(matches!(
		scheduler.configure(SyncConfigUpdate {
			poll_interval_ms: Some(0),
			..Default::default()
		}),
		Err(SyncError::InvalidConfig(_))
	));
	scheduler
		.configure(SyncConfigUpdate {
			block_span_per_request: Some(50),
			..Default::default()
		})
		.unwrap();

	scheduler.sync(ACCOUNT, 0).unwrap();
	let scheduled = wait_for(&mut notifications, is_scheduled).await;
	assert!(matches!(
		scheduled,
		SyncNotification::Scheduled { last_synced_block: 50, delay, .. }
			if delay == Duration::from_millis(5000)
	));
	assert_eq!(source.fetched_ranges(), vec![BlockRange::new(1, 50)]);
}

#[tokio::test(start_paused = true)]
async fn test_persists_watermark_after_apply() {
	let dir = tempfile::tempdir().unwrap();
	let watermarks = Arc::new(FileWatermarkRepository::new(dir.path().to_path_buf()));
	let source = Arc::new(FakeSource::with_head(42));
	let ledger = Arc::new(RecordingLedger::default());
	let scheduler = builder(&source, &ledger)
		.watermarks(watermarks.clone())
		.spawn()
		.unwrap();
	let mut notifications = scheduler.subscribe();

	scheduler.sync(ACCOUNT, 0).unwrap();
	wait_for(&mut notifications, is_scheduled).await;

	assert_eq!(
		watermarks.load(&Account::new(ACCOUNT)).await.unwrap(),
		Some(42)
	);
}

#[tokio::test(start_paused = true)]
async fn test_untracked_pause_and_resume_are_ignored() {
	let source = Arc::new(FakeSource::with_head(10));
	let ledger = Arc::new(RecordingLedger::default());
	let scheduler = builder(&source, &ledger).spawn().unwrap();

	scheduler.pause("0xdead").unwrap();
	scheduler.resume("0xdead").unwrap();
	assert!(scheduler.status("0xdead").await.unwrap().is_none());
	assert_eq!(source.head_queries.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_worker() {
	let source = Arc::new(FakeSource::with_head(10));
	let ledger = Arc::new(RecordingLedger::default());
	let scheduler = builder(&source, &ledger).spawn().unwrap();
	let mut notifications = scheduler.subscribe();

	scheduler.sync(ACCOUNT, 0).unwrap();
	wait_for(&mut notifications, is_scheduled).await;
	scheduler.shutdown().await.unwrap();

	tokio::time::sleep(Duration::from_secs(30)).await;
	assert_eq!(source.head_queries.load(Ordering::SeqCst), 1);
	assert!(matches!(
		scheduler.sync(ACCOUNT, 0),
		Err(SyncError::SchedulerStopped)
	));
}
