//! Decides when runs start, which run wins when two overlap, and reports how
//! each run ended.
//!
//! There is at most one active run. A run is finished by a completion barrier
//! added to the job queue right after its jobs, so the run ends only once all
//! of its jobs did, even if the queue is much longer than the concurrency
//! limit. An interrupted run ends right away with
//! [`OrchestratorError::Interrupted`], and its completion barrier turns into a
//! no-op by the time it fires.

use crate::{
	catalog::BrokerCatalog,
	config::OrchestratorConfig,
	error::{ErrorCollection, ErrorReport, OrchestratorError},
	job::{BrokerJobRunner, CatalogJobProvider, JobCategory, JobDependencies, JobProvider},
	queue::JobQueue,
	telemetry::{NoopTelemetry, TelemetrySink},
};

use dbp_task_system::QueueStats;

use std::{
	mem,
	sync::{Arc, PoisonError, RwLock, Weak},
};

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, trace, warn};

mod mode;
mod sink;

pub use mode::{RunCallbacks, RunKind, RunState};

use mode::RunMode;
use sink::RunErrorSink;

/// Gets told right before the jobs of a new run are added to the queue, once
/// everything queued before them is finished.
pub trait OrchestratorObserver: Send + Sync + 'static {
	fn will_enqueue_jobs(&self);
}

#[derive(Debug, Default)]
struct ActiveRun {
	mode: RunMode,
	run_id: u64,
	errors: Arc<ErrorCollection>,
}

impl ActiveRun {
	/// Ends the current run, if any, handing `one_time_error` and every job error
	/// collected so far to its callbacks.
	fn finish(&mut self, one_time_error: Option<OrchestratorError>) {
		let Some(callbacks) = mem::take(&mut self.mode).into_callbacks() else {
			return;
		};

		let report = self.errors.flush(one_time_error);
		callbacks.finish(report);
	}
}

pub struct Orchestrator {
	queue: Arc<dyn JobQueue>,
	provider: Arc<dyn JobProvider>,
	telemetry: Arc<dyn TelemetrySink>,
	dependencies: JobDependencies,
	observer: RwLock<Option<Weak<dyn OrchestratorObserver>>>,
	active: Arc<Mutex<ActiveRun>>,
}

impl Orchestrator {
	pub fn new(queue: Arc<dyn JobQueue>, dependencies: JobDependencies) -> Self {
		Self {
			queue,
			provider: Arc::new(CatalogJobProvider),
			telemetry: Arc::new(NoopTelemetry),
			dependencies,
			observer: RwLock::new(None),
			active: Arc::new(Mutex::new(ActiveRun::default())),
		}
	}

	pub fn from_config(
		queue: Arc<dyn JobQueue>,
		catalog: Arc<dyn BrokerCatalog>,
		runner: Arc<dyn BrokerJobRunner>,
		config: &OrchestratorConfig,
	) -> Self {
		Self::new(
			queue,
			JobDependencies {
				catalog,
				runner,
				concurrency: config.concurrency,
				execution: config.execution,
			},
		)
	}

	#[must_use]
	pub fn with_provider(mut self, provider: Arc<dyn JobProvider>) -> Self {
		self.provider = provider;
		self
	}

	#[must_use]
	pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
		self.telemetry = telemetry;
		self
	}

	/// Only a weak reference is kept, dropping the observer is enough to unregister it.
	pub fn set_observer(&self, observer: &Arc<dyn OrchestratorObserver>) {
		*self
			.observer
			.write()
			.unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(observer));
	}

	pub fn clear_observer(&self) {
		self.observer
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
	}

	pub async fn state(&self) -> RunState {
		self.active.lock().await.mode.state()
	}

	pub async fn queue_stats(&self) -> Result<QueueStats, OrchestratorError> {
		self.queue.stats().await
	}

	/// User initiated scan of every broker. Interrupts whatever is running.
	pub async fn run_immediate_scan(
		&self,
		show_progress: bool,
		on_error: impl FnOnce(Option<ErrorReport>) + Send + 'static,
		on_complete: impl FnOnce() + Send + 'static,
	) {
		self.start_run(
			RunKind::Immediate,
			JobCategory::ManualScanOnly,
			show_progress,
			RunCallbacks::new(on_error, on_complete),
		)
		.await;
	}

	/// Background run of scans and opt-outs. Refused while another run is active.
	pub async fn run_scheduled_all(
		&self,
		show_progress: bool,
		on_error: impl FnOnce(Option<ErrorReport>) + Send + 'static,
		on_complete: impl FnOnce() + Send + 'static,
	) {
		self.start_run(
			RunKind::Scheduled,
			JobCategory::All,
			show_progress,
			RunCallbacks::new(on_error, on_complete),
		)
		.await;
	}

	/// Background scan only run. Refused while another run is active.
	pub async fn run_scheduled_scan_only(
		&self,
		show_progress: bool,
		on_error: impl FnOnce(Option<ErrorReport>) + Send + 'static,
		on_complete: impl FnOnce() + Send + 'static,
	) {
		self.start_run(
			RunKind::Scheduled,
			JobCategory::ScheduledScanOnly,
			show_progress,
			RunCallbacks::new(on_error, on_complete),
		)
		.await;
	}

	/// Debug tooling: stops whatever is running and starts an opt-out only run.
	///
	/// Runs as an immediate run, so a later immediate request interrupts it.
	pub async fn run_debug_opt_out(
		&self,
		show_progress: bool,
		on_error: impl FnOnce(Option<ErrorReport>) + Send + 'static,
		on_complete: impl FnOnce() + Send + 'static,
	) {
		self.start_run(
			RunKind::Immediate,
			JobCategory::OptOutOnly,
			show_progress,
			RunCallbacks::new(on_error, on_complete),
		)
		.await;
	}

	/// Interrupts the active run, if any. Its callbacks get [`OrchestratorError::Interrupted`].
	#[instrument(skip(self))]
	pub async fn stop(&self) {
		let mut active = self.active.lock().await;
		self.interrupt(&mut active).await;
	}

	/// Stops the active run and shuts the job queue down.
	pub async fn shutdown(&self) {
		self.stop().await;
		self.queue.shutdown().await;
		info!("Orchestrator shutdown");
	}

	#[instrument(skip(self, callbacks), fields(run_id = tracing::field::Empty))]
	async fn start_run(
		&self,
		kind: RunKind,
		category: JobCategory,
		show_progress: bool,
		callbacks: RunCallbacks,
	) {
		let mut active = self.active.lock().await;

		if !active.mode.can_be_preempted_by(kind) {
			info!(current = ?active.mode.state(), "Refusing run, another run is in progress");
			drop(active);
			callbacks.finish(Some(ErrorReport::one_time(
				OrchestratorError::CannotInterrupt,
			)));
			return;
		}

		self.interrupt(&mut active).await;

		active.run_id += 1;
		let run_id = active.run_id;
		tracing::Span::current().record("run_id", run_id);

		active.errors = Arc::new(ErrorCollection::default());
		active.mode = RunMode::new(kind, Utc::now(), callbacks);
		let priority_date = active.mode.priority_date();

		if let Err(e) = self.prepare_queue(category).await {
			active.finish(Some(e));
			return;
		}

		let error_sink = Arc::new(RunErrorSink::new(
			run_id,
			category,
			Arc::clone(&active.errors),
			Arc::clone(&self.telemetry),
		));

		let jobs = match self
			.provider
			.create_jobs(
				category,
				priority_date,
				show_progress,
				error_sink,
				&self.dependencies,
			)
			.await
		{
			Ok(jobs) => jobs,
			Err(e) => {
				error!(?e, "Failed to build jobs");
				active.finish(Some(e.into()));
				return;
			}
		};

		let jobs_count = jobs.len();

		if let Err(e) = self.queue.enqueue(jobs).await {
			active.finish(Some(e));
			return;
		}

		if let Err(e) = self
			.queue
			.add_barrier(Self::completion_barrier(Arc::clone(&self.active), run_id))
			.await
		{
			active.finish(Some(e));
			return;
		}

		info!(jobs_count, "Run started");
	}

	async fn prepare_queue(&self, category: JobCategory) -> Result<(), OrchestratorError> {
		self.queue
			.set_concurrency_limit(self.dependencies.concurrency.concurrency(category))
			.await?;

		let maybe_observer = self
			.observer
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone();

		if let Some(observer) = maybe_observer {
			self.queue
				.add_barrier(Box::pin(async move {
					if let Some(observer) = observer.upgrade() {
						observer.will_enqueue_jobs();
					} else {
						trace!("Observer dropped, skipping notification");
					}
				}))
				.await?;
		}

		Ok(())
	}

	async fn interrupt(&self, active: &mut ActiveRun) {
		if matches!(active.mode, RunMode::Idle) {
			debug!("No active run to interrupt");
			return;
		}

		if let Err(e) = self.queue.cancel_all().await {
			warn!(?e, "Failed to cancel jobs of the interrupted run");
		}

		info!(run_id = active.run_id, "Run interrupted");
		active.finish(Some(OrchestratorError::Interrupted));
	}

	fn completion_barrier(active: Arc<Mutex<ActiveRun>>, run_id: u64) -> BoxFuture<'static, ()> {
		Box::pin(async move {
			let mut active = active.lock().await;

			if active.run_id != run_id {
				debug!(run_id, current_run_id = active.run_id, "Stale completion barrier");
				return;
			}

			let Some(callbacks) = mem::take(&mut active.mode).into_callbacks() else {
				debug!(run_id, "Run already finished");
				return;
			};

			let report = active.errors.flush(None);
			drop(active);

			info!(
				run_id,
				job_errors = report.as_ref().map_or(0, |report| report.job_errors.len()),
				"Run finished"
			);

			callbacks.finish(report);
		})
	}
}
