//! The sync scheduler: a cloneable handle in front of a single worker task.
//!
//! The worker owns every account's `SyncState`. Host calls arrive as `Command`s on an
//! unbounded channel, and the remote I/O of each running cycle is a future in the worker's
//! `FuturesUnordered`, so several accounts make progress concurrently while their state is
//! only ever touched by the worker. Timed cycles are spawned sleeps that post
//! `TimerFired` back through a weak sender, tagged with a generation so a cancelled timer
//! that fires anyway is ignored.

use crate::chain::{Account, BlockRange, ChainError};
use crate::notes::{ApplyReport, ChainEventSource, NoteBatch, NoteEvent, NoteLedgerWriter};
use crate::retry::{RetryError, RetryPolicy};
use crate::sync::breaker::CircuitBreaker;
use crate::sync::config::{Environment, SyncConfig, SyncConfigUpdate};
use crate::sync::events::{LogErrorHandler, SyncErrorHandler, SyncNotification};
use crate::sync::repositories::WatermarkRepository;
use crate::sync::state::{NextStep, PendingTimer, SyncPhase, SyncState, SyncTrigger, SyncWindow};
use crate::sync::state::{next_step, plan_window};
use crate::sync::types::{SyncError, SyncRequest, SyncStatus};

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

enum Command {
	Sync(SyncRequest),
	Pause(Account),
	Resume(Account),
	ResumeAll,
	Configure(SyncConfigUpdate),
	TimerFired { account: Account, generation: u64 },
	Status {
		account: Account,
		reply: oneshot::Sender<Option<SyncStatus>>,
	},
	Shutdown(oneshot::Sender<()>),
}

/// Handle to a running sync scheduler.
///
/// Every method only enqueues a command, so calls never block on an in-flight cycle.
/// The worker stops on `shutdown` or once every handle has been dropped.
#[derive(Clone)]
pub struct SyncScheduler {
	commands: mpsc::UnboundedSender<Command>,
	notifications: broadcast::Sender<SyncNotification>,
	breaker: CircuitBreaker,
}

impl SyncScheduler {
	pub fn builder(
		source: Arc<dyn ChainEventSource>,
		writer: Arc<dyn NoteLedgerWriter>,
	) -> SyncSchedulerBuilder {
		SyncSchedulerBuilder {
			source,
			writer,
			config: SyncConfig::default(),
			retry_policy: RetryPolicy::single_attempt(),
			environment: Environment::default(),
			error_handler: Arc::new(LogErrorHandler),
			watermarks: None,
			breaker: CircuitBreaker::new(),
			notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
		}
	}

	/// Starts syncing `account` after `last_synced_block`, or nudges an account that is
	/// already tracked. A call for an account that is mid-cycle is a no-op.
	pub fn sync(
		&self,
		account: impl Into<Account>,
		last_synced_block: u64,
	) -> Result<(), SyncError> {
		self.send(Command::Sync(SyncRequest::new(account, last_synced_block)))
	}

	/// Parks the account. A running cycle finishes its current step first.
	pub fn pause(&self, account: impl Into<Account>) -> Result<(), SyncError> {
		self.send(Command::Pause(account.into()))
	}

	pub fn resume(&self, account: impl Into<Account>) -> Result<(), SyncError> {
		self.send(Command::Resume(account.into()))
	}

	/// Resumes every paused account. Clear the circuit breaker first, otherwise the
	/// accounts park again immediately.
	pub fn resume_all(&self) -> Result<(), SyncError> {
		self.send(Command::ResumeAll)
	}

	pub fn configure(&self, update: SyncConfigUpdate) -> Result<(), SyncError> {
		update.validate()?;
		self.send(Command::Configure(update))
	}

	/// Snapshot of one account, or `None` if it is not tracked.
	pub async fn status(
		&self,
		account: impl Into<Account>,
	) -> Result<Option<SyncStatus>, SyncError> {
		let (reply, response) = oneshot::channel();
		self.send(Command::Status {
			account: account.into(),
			reply,
		})?;
		response.await.map_err(|_| SyncError::SchedulerStopped)
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
		self.notifications.subscribe()
	}

	pub fn circuit_breaker(&self) -> &CircuitBreaker {
		&self.breaker
	}

	/// Stops the worker and cancels every pending timer.
	pub async fn shutdown(&self) -> Result<(), SyncError> {
		let (done, stopped) = oneshot::channel();
		self.send(Command::Shutdown(done))?;
		stopped.await.map_err(|_| SyncError::SchedulerStopped)
	}

	fn send(&self, command: Command) -> Result<(), SyncError> {
		self.commands
			.send(command)
			.map_err(|_| SyncError::SchedulerStopped)
	}
}

/// Builder for [`SyncScheduler`].
pub struct SyncSchedulerBuilder {
	source: Arc<dyn ChainEventSource>,
	writer: Arc<dyn NoteLedgerWriter>,
	config: SyncConfig,
	retry_policy: RetryPolicy,
	environment: Environment,
	error_handler: Arc<dyn SyncErrorHandler>,
	watermarks: Option<Arc<dyn WatermarkRepository>>,
	breaker: CircuitBreaker,
	notification_capacity: usize,
}

impl SyncSchedulerBuilder {
	pub fn config(mut self, config: SyncConfig) -> Self {
		self.config = config;
		self
	}

	/// Policy for head and range queries within one cycle. Defaults to a single attempt,
	/// leaving retries to the next timed cycle.
	pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = policy;
		self
	}

	pub fn environment(mut self, environment: Environment) -> Self {
		self.environment = environment;
		self
	}

	pub fn error_handler(mut self, handler: impl SyncErrorHandler + 'static) -> Self {
		self.error_handler = Arc::new(handler);
		self
	}

	pub fn watermarks(mut self, repository: Arc<dyn WatermarkRepository>) -> Self {
		self.watermarks = Some(repository);
		self
	}

	pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
		self.breaker = breaker;
		self
	}

	pub fn notification_capacity(mut self, capacity: usize) -> Self {
		self.notification_capacity = capacity.max(1);
		self
	}

	/// Spawns the worker on the current tokio runtime.
	pub fn spawn(self) -> Result<SyncScheduler, SyncError> {
		self.config.validate()?;

		let (commands, receiver) = mpsc::unbounded_channel();
		let (notifications, _) = broadcast::channel(self.notification_capacity);

		let worker = SyncWorker {
			source: self.source,
			writer: self.writer,
			watermarks: self.watermarks,
			config: self.config,
			retry_policy: self.retry_policy,
			environment: self.environment,
			error_handler: self.error_handler,
			breaker: self.breaker.clone(),
			notifications: notifications.clone(),
			commands: receiver,
			timer_sender: commands.downgrade(),
			accounts: HashMap::new(),
			in_flight: FuturesUnordered::new(),
		};
		tokio::spawn(worker.run());

		Ok(SyncScheduler {
			commands,
			notifications,
			breaker: self.breaker,
		})
	}
}

struct StepResult {
	request: SyncRequest,
	outcome: StepOutcome,
}

enum StepOutcome {
	Fetched { window: SyncWindow, batch: NoteBatch },
	UpToDate { head: u64 },
	Applied { window: SyncWindow, report: ApplyReport },
	Failed { range: Option<BlockRange>, error: SyncError },
}

struct SyncWorker {
	source: Arc<dyn ChainEventSource>,
	writer: Arc<dyn NoteLedgerWriter>,
	watermarks: Option<Arc<dyn WatermarkRepository>>,
	config: SyncConfig,
	retry_policy: RetryPolicy,
	environment: Environment,
	error_handler: Arc<dyn SyncErrorHandler>,
	breaker: CircuitBreaker,
	notifications: broadcast::Sender<SyncNotification>,
	commands: mpsc::UnboundedReceiver<Command>,
	timer_sender: mpsc::WeakUnboundedSender<Command>,
	accounts: HashMap<Account, SyncState>,
	in_flight: FuturesUnordered<BoxFuture<'static, StepResult>>,
}

impl SyncWorker {
	async fn run(mut self) {
		info!("Sync scheduler started");
		let done = loop {
			tokio::select! {
				command = self.commands.recv() => match command {
					Some(Command::Shutdown(done)) => break Some(done),
					Some(command) => self.handle(command),
					None => break None,
				},
				Some(result) = self.in_flight.next(), if !self.in_flight.is_empty() => {
					self.on_step(result);
				}
			}
		};

		self.stop();
		// Close the command channel before acknowledging so later calls fail fast.
		drop(self);
		info!("Sync scheduler stopped");
		if let Some(done) = done {
			let _ = done.send(());
		}
	}

	fn handle(&mut self, command: Command) {
		match command {
			Command::Sync(request) => self.start_cycle(request),
			Command::Pause(account) => self.pause(&account),
			Command::Resume(account) => self.resume(&account),
			Command::ResumeAll => self.resume_all(),
			Command::Configure(update) => match self.config.merged(&update) {
				Ok(config) => {
					info!("Sync configuration updated: {:?}", config);
					self.config = config;
				}
				Err(e) => warn!("Ignoring sync configuration update: {}", e),
			},
			Command::TimerFired {
				account,
				generation,
			} => {
				let timer = self
					.accounts
					.get_mut(&account)
					.and_then(|state| state.take_timer(generation));
				match timer {
					Some(timer) => self.start_cycle(timer.request),
					None => debug!("Ignoring stale timer {} for {}", generation, account),
				}
			}
			Command::Status { account, reply } => {
				let _ = reply.send(self.accounts.get(&account).map(SyncState::status));
			}
			Command::Shutdown(_) => {}
		}
	}

	fn start_cycle(&mut self, request: SyncRequest) {
		let state = self
			.accounts
			.entry(request.account.clone())
			.or_insert_with(|| {
				info!(
					"Tracking {} from block {}",
					request.account, request.last_synced_block
				);
				SyncState::new(request.account.clone(), request.last_synced_block)
			});

		if state.paused_continuation.is_some() {
			debug!("{} is paused, not starting a cycle", state.account);
			return;
		}
		if state.is_syncing() {
			debug!("{} is already syncing", state.account);
			return;
		}
		state.advance_to(request.last_synced_block);
		if self.breaker.is_tripped() {
			warn!("Circuit breaker is tripped, parking {}", state.account);
			park(state, &self.notifications);
			return;
		}

		state.cancel_timer();
		if let Err(e) = state.apply(SyncTrigger::CycleStarted) {
			warn!("Cannot start a cycle for {}: {}", state.account, e);
			return;
		}
		state.progress.record_cycle_started();
		let request = state.request();
		debug!(
			"Starting cycle for {} after block {}",
			request.account, request.last_synced_block
		);
		notify(
			&self.notifications,
			SyncNotification::CycleStarted(request.clone()),
		);
		self.in_flight.push(fetch_step(
			self.source.clone(),
			self.retry_policy.clone(),
			self.config.clone(),
			request,
		));
	}

	fn on_step(&mut self, result: StepResult) {
		let StepResult { request, outcome } = result;
		let Some(state) = self.accounts.get_mut(&request.account) else {
			warn!("Dropping cycle result for untracked {}", request.account);
			return;
		};

		let (next, remaining_gap) = match outcome {
			StepOutcome::Fetched { window, batch } => {
				if let Err(e) = state.apply(SyncTrigger::EventsFetched) {
					warn!("Dropping fetched batch for {}: {}", state.account, e);
					return;
				}
				debug!(
					"Applying {} note events for {} in {}",
					batch.len(),
					state.account,
					window.range
				);
				self.in_flight.push(apply_step(
					self.writer.clone(),
					self.watermarks.clone(),
					request,
					window,
					batch,
				));
				return;
			}
			StepOutcome::UpToDate { head } => {
				debug!("{} is up to date at block {}", state.account, head);
				state.progress.record_up_to_date();
				notify(
					&self.notifications,
					SyncNotification::UpToDate {
						account: state.account.clone(),
						head,
					},
				);
				(next_step(&self.config, 0), 0)
			}
			StepOutcome::Applied { window, report } => {
				state.advance_to(window.range.to);
				state.progress.record_applied(&report);
				state.progress.log_progress(&state.account, false);
				notify(
					&self.notifications,
					SyncNotification::BatchApplied {
						account: state.account.clone(),
						report,
					},
				);
				(
					next_step(&self.config, window.remaining_gap),
					window.remaining_gap,
				)
			}
			StepOutcome::Failed { range, error } => {
				self.error_handler.on_error(&state.account, &error);
				state.progress.record_failure(&error);
				notify(
					&self.notifications,
					SyncNotification::FetchFailed {
						account: state.account.clone(),
						range,
						error: error.to_string(),
					},
				);
				if let Err(e) = state.apply(SyncTrigger::FetchFailed) {
					warn!("{}: {}", state.account, e);
				}
				if self.environment == Environment::Development {
					warn!("Tripping the circuit breaker after a failed cycle");
					self.breaker.trip();
				}
				(NextStep::Wait(self.config.poll_interval()), 0)
			}
		};

		if state.paused_continuation.is_some() || self.breaker.is_tripped() {
			park(state, &self.notifications);
			return;
		}

		match next {
			NextStep::CatchUp => {
				if let Err(e) = state.apply(SyncTrigger::CatchUp) {
					warn!("Cannot continue {}: {}", state.account, e);
					return;
				}
				state.progress.record_cycle_started();
				let request = state.request();
				debug!(
					"{} is {} blocks behind head, continuing from block {}",
					request.account,
					remaining_gap,
					request.last_synced_block + 1
				);
				notify(
					&self.notifications,
					SyncNotification::CatchingUp {
						account: request.account.clone(),
						next_range_from: request.last_synced_block + 1,
						remaining_gap,
					},
				);
				notify(
					&self.notifications,
					SyncNotification::CycleStarted(request.clone()),
				);
				self.in_flight.push(fetch_step(
					self.source.clone(),
					self.retry_policy.clone(),
					self.config.clone(),
					request,
				));
			}
			NextStep::Wait(delay) => {
				schedule_timer(state, delay, &self.timer_sender);
				if let Err(e) = state.apply(SyncTrigger::Rescheduled) {
					warn!("{}: {}", state.account, e);
				}
				notify(
					&self.notifications,
					SyncNotification::Scheduled {
						account: state.account.clone(),
						last_synced_block: state.last_synced_block,
						delay,
					},
				);
			}
		}
	}

	fn pause(&mut self, account: &Account) {
		let Some(state) = self.accounts.get_mut(account) else {
			warn!("{}", SyncError::UntrackedAccount(account.clone()));
			return;
		};
		if state.paused_continuation.is_some() {
			warn!("{}", SyncError::AlreadyPaused(account.clone()));
			return;
		}

		if state.is_syncing() {
			// The running cycle parks itself with its post-cycle watermark.
			info!("Pausing {} after the running cycle", account);
			state.paused_continuation = Some(state.request());
		} else {
			info!("Pausing {}", account);
			park(state, &self.notifications);
		}
	}

	fn resume(&mut self, account: &Account) {
		let Some(state) = self.accounts.get_mut(account) else {
			warn!("{}", SyncError::UntrackedAccount(account.clone()));
			return;
		};
		let Some(continuation) = state.paused_continuation.take() else {
			warn!("{}", SyncError::NotPaused(account.clone()));
			return;
		};

		if state.phase == SyncPhase::Paused {
			if let Err(e) = state.apply(SyncTrigger::Resumed) {
				warn!("{}: {}", account, e);
			}
		}
		info!(
			"Resuming {} from block {}",
			account, continuation.last_synced_block
		);
		notify(
			&self.notifications,
			SyncNotification::Resumed(continuation.clone()),
		);
		self.start_cycle(continuation);
	}

	fn resume_all(&mut self) {
		let paused: Vec<Account> = self
			.accounts
			.values()
			.filter(|state| state.paused_continuation.is_some())
			.map(|state| state.account.clone())
			.collect();
		if self.breaker.is_tripped() && !paused.is_empty() {
			warn!("Resuming {} accounts while the circuit breaker is tripped", paused.len());
		}
		for account in paused {
			self.resume(&account);
		}
	}

	fn stop(&mut self) {
		for state in self.accounts.values_mut() {
			state.cancel_timer();
		}
		self.in_flight = FuturesUnordered::new();
	}
}

fn notify(notifications: &broadcast::Sender<SyncNotification>, notification: SyncNotification) {
	// No subscribers is fine.
	let _ = notifications.send(notification);
}

/// Stores the account's current request as its paused continuation.
fn park(state: &mut SyncState, notifications: &broadcast::Sender<SyncNotification>) {
	state.cancel_timer();
	let continuation = state.request();
	state.paused_continuation = Some(continuation.clone());
	if state.phase != SyncPhase::Paused {
		if let Err(e) = state.apply(SyncTrigger::PauseRequested) {
			warn!("{}: {}", state.account, e);
		}
	}
	notify(notifications, SyncNotification::Paused(continuation));
}

fn schedule_timer(
	state: &mut SyncState,
	delay: Duration,
	sender: &mpsc::WeakUnboundedSender<Command>,
) {
	state.cancel_timer();
	let generation = state.next_generation();
	let account = state.account.clone();
	let sender = sender.clone();
	let handle = tokio::spawn(async move {
		tokio::time::sleep(delay).await;
		if let Some(sender) = sender.upgrade() {
			let _ = sender.send(Command::TimerFired {
				account,
				generation,
			});
		}
	})
	.abort_handle();

	state.pending_timer = Some(PendingTimer {
		generation,
		request: state.request(),
		handle,
		due: Instant::now() + delay,
	});
}

fn fetch_step(
	source: Arc<dyn ChainEventSource>,
	policy: RetryPolicy,
	config: SyncConfig,
	request: SyncRequest,
) -> BoxFuture<'static, StepResult> {
	async move {
		let outcome = fetch(source.as_ref(), &policy, &config, &request).await;
		StepResult { request, outcome }
	}
	.boxed()
}

async fn fetch(
	source: &dyn ChainEventSource,
	policy: &RetryPolicy,
	config: &SyncConfig,
	request: &SyncRequest,
) -> StepOutcome {
	let head = policy
		.retry(|| async move { source.current_head().await.map_err(backoff::Error::transient) })
		.await;
	let head = match head {
		Ok(head) => head,
		Err(e) => {
			return StepOutcome::Failed {
				range: None,
				error: fetch_error(e),
			};
		}
	};

	let Some(window) = plan_window(config, request.last_synced_block, head) else {
		return StepOutcome::UpToDate { head };
	};

	let account = &request.account;
	let range = window.range;
	debug!("Fetching {} for {} (head {})", range, account, head);
	let batch = policy
		.retry(|| async move {
			source
				.fetch_range(account, range)
				.await
				.map_err(backoff::Error::transient)
		})
		.await;
	match batch {
		Ok(batch) => StepOutcome::Fetched { window, batch },
		Err(e) => StepOutcome::Failed {
			range: Some(range),
			error: fetch_error(e),
		},
	}
}

fn fetch_error(error: RetryError<ChainError>) -> SyncError {
	match error {
		RetryError::Permanent(e) => SyncError::Fetch(e),
		RetryError::Exhausted { attempts: 1, last } => SyncError::Fetch(last),
		RetryError::Exhausted { attempts, last }
		| RetryError::DeadlineElapsed { attempts, last, .. } => {
			SyncError::FetchRetriesExhausted { attempts, last }
		}
	}
}

fn apply_step(
	writer: Arc<dyn NoteLedgerWriter>,
	watermarks: Option<Arc<dyn WatermarkRepository>>,
	request: SyncRequest,
	window: SyncWindow,
	batch: NoteBatch,
) -> BoxFuture<'static, StepResult> {
	async move {
		let outcome = match apply(writer.as_ref(), &request.account, window.range, batch).await {
			Ok(report) => {
				if let Some(watermarks) = &watermarks {
					if let Err(e) = watermarks.save(&request.account, window.range.to).await {
						warn!(
							"Failed to persist watermark {} for {}: {}",
							window.range.to, request.account, e
						);
					}
				}
				StepOutcome::Applied { window, report }
			}
			Err(error) => StepOutcome::Failed {
				range: Some(window.range),
				error,
			},
		};
		StepResult { request, outcome }
	}
	.boxed()
}

/// Writes the batch in create, update, destroy order, one event at a time.
async fn apply(
	writer: &dyn NoteLedgerWriter,
	account: &Account,
	range: BlockRange,
	batch: NoteBatch,
) -> Result<ApplyReport, SyncError> {
	let mut report = ApplyReport {
		range: Some(range),
		..Default::default()
	};
	for event in batch.into_ordered_events() {
		match &event {
			NoteEvent::Create(note) => writer.create(account, note).await?,
			NoteEvent::Update(note) => writer.update(account, note).await?,
			NoteEvent::Destroy(note) => writer.destroy(account, note).await?,
		}
		report.record(event.kind());
	}
	Ok(report)
}
