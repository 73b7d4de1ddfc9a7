use crate::{
	catalog::{BrokerCatalog, BrokerId},
	concurrency::JobConcurrencyPolicy,
	config::ExecutionConfig,
	error::{JobError, JobFailure},
};

use dbp_task_system::{ExecStatus, Interrupter, InterruptionKind, Task, TaskId};

use std::{fmt, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures_concurrency::future::Race;
use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::{debug, error, trace, warn};

pub mod provider;

pub use provider::{CatalogJobProvider, JobProvider};

/// Which broker operations a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
	All,
	OptOutOnly,
	ScheduledScanOnly,
	ManualScanOnly,
}

impl fmt::Display for JobCategory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::All => "all",
			Self::OptOutOnly => "opt_out_only",
			Self::ScheduledScanOnly => "scheduled_scan_only",
			Self::ManualScanOnly => "manual_scan_only",
		};

		f.write_str(name)
	}
}

/// Everything a [`BrokerJobRunner`] gets to know about the job it is running.
#[derive(Clone)]
pub struct JobContext {
	pub broker_id: BrokerId,
	pub category: JobCategory,
	pub priority_date: Option<DateTime<Utc>>,
	pub show_progress: bool,
	pub concurrency: JobConcurrencyPolicy,
	pub execution: ExecutionConfig,
	pub catalog: Arc<dyn BrokerCatalog>,
}

impl fmt::Debug for JobContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("JobContext")
			.field("broker_id", &self.broker_id)
			.field("category", &self.category)
			.field("priority_date", &self.priority_date)
			.field("show_progress", &self.show_progress)
			.field("concurrency", &self.concurrency)
			.field("execution", &self.execution)
			.finish_non_exhaustive()
	}
}

/// Performs the actual broker work: scanning result pages, submitting opt-out forms.
#[async_trait]
pub trait BrokerJobRunner: Send + Sync + 'static {
	async fn run(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// Where a job reports its failures, the run it belongs to.
pub trait JobErrorSink: Send + Sync + 'static {
	fn report(&self, failure: JobFailure);
}

/// Collaborators handed to every job the orchestrator builds.
#[derive(Clone)]
pub struct JobDependencies {
	pub catalog: Arc<dyn BrokerCatalog>,
	pub runner: Arc<dyn BrokerJobRunner>,
	pub concurrency: JobConcurrencyPolicy,
	pub execution: ExecutionConfig,
}

impl fmt::Debug for JobDependencies {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("JobDependencies")
			.field("concurrency", &self.concurrency)
			.field("execution", &self.execution)
			.finish_non_exhaustive()
	}
}

/// All the work of a single run for a single broker.
///
/// A failing job never fails on the queue: the error goes to its [`JobErrorSink`]
/// and the task finishes as done, so the rest of the run keeps going.
pub struct BrokerJob {
	id: TaskId,
	ctx: JobContext,
	runner: Arc<dyn BrokerJobRunner>,
	error_sink: Arc<dyn JobErrorSink>,
}

impl fmt::Debug for BrokerJob {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BrokerJob")
			.field("id", &self.id)
			.field("ctx", &self.ctx)
			.finish_non_exhaustive()
	}
}

impl BrokerJob {
	#[must_use]
	pub fn new(
		broker_id: BrokerId,
		category: JobCategory,
		priority_date: Option<DateTime<Utc>>,
		show_progress: bool,
		error_sink: Arc<dyn JobErrorSink>,
		dependencies: &JobDependencies,
	) -> Self {
		Self {
			id: TaskId::new_v4(),
			ctx: JobContext {
				broker_id,
				category,
				priority_date,
				show_progress,
				concurrency: dependencies.concurrency,
				execution: dependencies.execution,
				catalog: Arc::clone(&dependencies.catalog),
			},
			runner: Arc::clone(&dependencies.runner),
			error_sink,
		}
	}

	#[must_use]
	pub const fn broker_id(&self) -> BrokerId {
		self.ctx.broker_id
	}

	#[must_use]
	pub const fn category(&self) -> JobCategory {
		self.ctx.category
	}

	#[must_use]
	pub const fn priority_date(&self) -> Option<DateTime<Utc>> {
		self.ctx.priority_date
	}

	#[must_use]
	pub const fn show_progress(&self) -> bool {
		self.ctx.show_progress
	}
}

enum RaceOutput {
	Finished(Result<(), JobError>),
	Interrupted(InterruptionKind),
}

#[async_trait]
impl Task<JobError> for BrokerJob {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, JobError> {
		let Self {
			id,
			ctx,
			runner,
			error_sink,
		} = &*self;

		let broker_id = ctx.broker_id;
		let timeout = ctx.execution.job_timeout(ctx.category);

		trace!(task_id = %id, broker_id, category = %ctx.category, "Broker job starting");

		// A panicking runner must still count as a failure of this broker
		let work = async {
			let guarded = AssertUnwindSafe(runner.run(ctx)).catch_unwind();

			let res = match time::timeout(timeout, guarded).await {
				Ok(Ok(res)) => res,
				Ok(Err(_)) => {
					error!(task_id = %id, broker_id, "Broker job runner panicked");
					Err(JobError::Panicked)
				}
				Err(_) => Err(JobError::TimedOut(timeout)),
			};

			RaceOutput::Finished(res)
		};

		let interrupted = async { RaceOutput::Interrupted(interrupter.await) };

		match (work, interrupted).race().await {
			RaceOutput::Finished(Ok(())) => {
				trace!(task_id = %id, broker_id, "Broker job done");
			}
			RaceOutput::Finished(Err(error)) => {
				warn!(task_id = %id, broker_id, %error, "Broker job failed");
				error_sink.report(JobFailure { broker_id, error });
			}
			RaceOutput::Interrupted(kind) => {
				debug!(task_id = %id, broker_id, ?kind, "Broker job interrupted");
				return Ok(ExecStatus::Canceled);
			}
		}

		Ok(ExecStatus::Done)
	}
}
