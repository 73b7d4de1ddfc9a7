#![allow(dead_code)]

use dbp_core::{
	BrokerCatalog, BrokerId, BrokerJobRunner, BrokerQueryRecord, CatalogError, ErrorReport,
	JobConcurrencyPolicy, JobContext, JobDependencies, JobError, JobFailure, JobQueue,
	Orchestrator, OrchestratorConfig, OrchestratorObserver, StaticCatalog, TelemetryEvent,
	TelemetrySink,
};
use dbp_task_system::TaskSystem;

use std::{
	collections::{HashMap, HashSet},
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_trait::async_trait;
use tokio::{
	sync::{mpsc, watch},
	time::{sleep, timeout},
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn records(broker_ids: impl IntoIterator<Item = BrokerId>) -> Vec<BrokerQueryRecord> {
	broker_ids
		.into_iter()
		.enumerate()
		.map(|(idx, broker_id)| BrokerQueryRecord {
			broker_id,
			profile_query_id: idx as i64,
			broker_name: format!("broker-{broker_id}"),
		})
		.collect()
}

pub fn sorted_brokers(failures: &[JobFailure]) -> Vec<BrokerId> {
	let mut brokers = failures
		.iter()
		.map(|failure| failure.broker_id)
		.collect::<Vec<_>>();
	brokers.sort_unstable();
	brokers
}

pub struct FailingCatalog;

#[async_trait]
impl BrokerCatalog for FailingCatalog {
	async fn fetch_all_records(&self) -> Result<Vec<BrokerQueryRecord>, CatalogError> {
		Err(CatalogError::Read("database is locked".to_string()))
	}
}

/// Runner whose jobs wait on a shared gate, recording what they were asked to do.
pub struct GatedRunner {
	gate: watch::Sender<bool>,
	started: Mutex<Vec<JobContext>>,
	running: AtomicUsize,
	max_running: AtomicUsize,
	finished: AtomicUsize,
	http_failures: Mutex<HashMap<BrokerId, u16>>,
	panics: Mutex<HashSet<BrokerId>>,
}

struct RunningGuard<'runner>(&'runner AtomicUsize);

impl Drop for RunningGuard<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}

impl GatedRunner {
	pub fn new(open: bool) -> Self {
		Self {
			gate: watch::Sender::new(open),
			started: Mutex::default(),
			running: AtomicUsize::new(0),
			max_running: AtomicUsize::new(0),
			finished: AtomicUsize::new(0),
			http_failures: Mutex::default(),
			panics: Mutex::default(),
		}
	}

	pub fn open(&self) {
		self.gate.send_replace(true);
	}

	pub fn close(&self) {
		self.gate.send_replace(false);
	}

	/// Jobs for `broker_id` fail right away, without waiting on the gate.
	pub fn fail_with_http(&self, broker_id: BrokerId, status: u16) {
		self.http_failures.lock().unwrap().insert(broker_id, status);
	}

	/// Jobs for `broker_id` panic right away.
	pub fn panic_for(&self, broker_id: BrokerId) {
		self.panics.lock().unwrap().insert(broker_id);
	}

	pub fn started(&self) -> Vec<JobContext> {
		self.started.lock().unwrap().clone()
	}

	pub fn started_brokers(&self) -> Vec<BrokerId> {
		self.started().iter().map(|ctx| ctx.broker_id).collect()
	}

	pub fn max_running(&self) -> usize {
		self.max_running.load(Ordering::SeqCst)
	}

	pub fn reset_max_running(&self) {
		self.max_running.store(0, Ordering::SeqCst);
	}

	pub fn finished(&self) -> usize {
		self.finished.load(Ordering::SeqCst)
	}

	pub async fn wait_started(&self, count: usize) {
		timeout(WAIT, async {
			while self.started.lock().unwrap().len() < count {
				sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("jobs didn't start in time");
	}
}

#[async_trait]
impl BrokerJobRunner for GatedRunner {
	async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
		self.started.lock().unwrap().push(ctx.clone());

		let maybe_status = self
			.http_failures
			.lock()
			.unwrap()
			.get(&ctx.broker_id)
			.copied();
		if let Some(status) = maybe_status {
			return Err(JobError::Http { status });
		}

		let should_panic = self.panics.lock().unwrap().contains(&ctx.broker_id);
		assert!(!should_panic, "runner for broker {} blew up", ctx.broker_id);

		let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
		let _guard = RunningGuard(&self.running);
		self.max_running.fetch_max(running, Ordering::SeqCst);

		let mut gate_rx = self.gate.subscribe();
		gate_rx
			.wait_for(|open| *open)
			.await
			.map_err(|e| JobError::Other(e.to_string()))?;

		self.finished.fetch_add(1, Ordering::SeqCst);

		Ok(())
	}
}

#[derive(Default)]
pub struct RecordingTelemetry(Mutex<Vec<TelemetryEvent>>);

impl RecordingTelemetry {
	pub fn events(&self) -> Vec<TelemetryEvent> {
		self.0.lock().unwrap().clone()
	}

	pub async fn wait_events(&self, count: usize) {
		timeout(WAIT, async {
			while self.0.lock().unwrap().len() < count {
				sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("telemetry events didn't arrive in time");
	}
}

impl TelemetrySink for RecordingTelemetry {
	fn emit(&self, event: TelemetryEvent) {
		self.0.lock().unwrap().push(event);
	}
}

/// Records how many jobs had started by the time it was notified.
pub struct StartedAtNotify {
	runner: Arc<GatedRunner>,
	pub notifications: Arc<Mutex<Vec<usize>>>,
}

impl StartedAtNotify {
	pub fn new(runner: &Arc<GatedRunner>) -> Self {
		Self {
			runner: Arc::clone(runner),
			notifications: Arc::default(),
		}
	}
}

impl OrchestratorObserver for StartedAtNotify {
	fn will_enqueue_jobs(&self) {
		self.notifications
			.lock()
			.unwrap()
			.push(self.runner.started().len());
	}
}

/// Receiving side of a run's callbacks.
pub struct RunWatcher {
	reports_rx: mpsc::UnboundedReceiver<Option<ErrorReport>>,
	completions_rx: mpsc::UnboundedReceiver<()>,
	received: Option<Option<ErrorReport>>,
}

pub fn watch_run() -> (
	impl FnOnce(Option<ErrorReport>) + Send + 'static,
	impl FnOnce() + Send + 'static,
	RunWatcher,
) {
	let (reports_tx, reports_rx) = mpsc::unbounded_channel();
	let (completions_tx, completions_rx) = mpsc::unbounded_channel();

	(
		move |report: Option<ErrorReport>| reports_tx.send(report).unwrap(),
		move || completions_tx.send(()).unwrap(),
		RunWatcher {
			reports_rx,
			completions_rx,
			received: None,
		},
	)
}

impl RunWatcher {
	/// Waits for the error callback and then the completion callback.
	pub async fn finished(&mut self) -> Option<ErrorReport> {
		let report = match self.received.take() {
			Some(report) => report,
			None => timeout(WAIT, self.reports_rx.recv())
				.await
				.expect("run didn't finish in time")
				.expect("error callback dropped without being called"),
		};

		timeout(WAIT, self.completions_rx.recv())
			.await
			.expect("completion callback wasn't called in time")
			.expect("completion callback dropped without being called");

		report
	}

	pub fn is_running(&mut self) -> bool {
		if self.received.is_some() {
			return false;
		}

		match self.reports_rx.try_recv() {
			Ok(report) => {
				self.received = Some(report);
				false
			}
			Err(mpsc::error::TryRecvError::Empty) => true,
			Err(mpsc::error::TryRecvError::Disconnected) => false,
		}
	}

	/// Callbacks are consumed once called, so both channels must be closed now.
	pub async fn assert_no_more_callbacks(&mut self) {
		assert!(self.reports_rx.recv().await.is_none());
		assert!(self.completions_rx.recv().await.is_none());
	}
}

pub struct Harness {
	pub orchestrator: Orchestrator,
	pub system: Arc<TaskSystem<JobError>>,
	pub runner: Arc<GatedRunner>,
	pub telemetry: Arc<RecordingTelemetry>,
}

impl Harness {
	pub fn new(broker_ids: impl IntoIterator<Item = BrokerId>, gate_open: bool) -> Self {
		Self::with_config(
			Arc::new(StaticCatalog::new(records(broker_ids))),
			gate_open,
			&OrchestratorConfig::default(),
		)
	}

	pub fn with_config(
		catalog: Arc<dyn BrokerCatalog>,
		gate_open: bool,
		config: &OrchestratorConfig,
	) -> Self {
		let system = Arc::new(TaskSystem::<JobError>::new());
		let runner = Arc::new(GatedRunner::new(gate_open));
		let telemetry = Arc::new(RecordingTelemetry::default());

		let orchestrator = Orchestrator::from_config(
			Arc::clone(&system) as Arc<dyn JobQueue>,
			catalog,
			Arc::clone(&runner) as Arc<dyn BrokerJobRunner>,
			config,
		)
		.with_telemetry(Arc::clone(&telemetry) as Arc<dyn TelemetrySink>);

		Self {
			orchestrator,
			system,
			runner,
			telemetry,
		}
	}

	pub fn with_policy(
		broker_ids: impl IntoIterator<Item = BrokerId>,
		gate_open: bool,
		policy: JobConcurrencyPolicy,
	) -> Self {
		let system = Arc::new(TaskSystem::<JobError>::new());
		let runner = Arc::new(GatedRunner::new(gate_open));
		let telemetry = Arc::new(RecordingTelemetry::default());

		let orchestrator = Orchestrator::new(
			Arc::clone(&system) as Arc<dyn JobQueue>,
			JobDependencies {
				catalog: Arc::new(StaticCatalog::new(records(broker_ids))),
				runner: Arc::clone(&runner) as Arc<dyn BrokerJobRunner>,
				concurrency: policy,
				execution: OrchestratorConfig::default().execution,
			},
		)
		.with_telemetry(Arc::clone(&telemetry) as Arc<dyn TelemetrySink>);

		Self {
			orchestrator,
			system,
			runner,
			telemetry,
		}
	}

	pub async fn wait_queue_idle(&self) {
		timeout(WAIT, async {
			loop {
				let stats = self.system.stats().await.unwrap();
				if stats.running_tasks == 0
					&& stats.pending_tasks == 0
					&& stats.pending_barriers == 0
				{
					break;
				}
				sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("queue didn't drain in time");
	}
}
