use crate::{
	error::{JobError, OrchestratorError},
	job::BrokerJob,
};

use dbp_task_system::{DispatcherShutdownError, QueueStats, TaskSystem, TaskSystemError};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{error, trace};

/// The bounded job queue driven by the orchestrator.
///
/// Barriers run only once everything added before them is finished, even when
/// that work was cancelled, and they are never dropped by [`JobQueue::cancel_all`].
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
	async fn set_concurrency_limit(&self, limit: usize) -> Result<(), OrchestratorError>;

	async fn cancel_all(&self) -> Result<(), OrchestratorError>;

	async fn enqueue(&self, jobs: Vec<BrokerJob>) -> Result<(), OrchestratorError>;

	async fn add_barrier(&self, barrier: BoxFuture<'static, ()>) -> Result<(), OrchestratorError>;

	async fn stats(&self) -> Result<QueueStats, OrchestratorError>;

	async fn shutdown(&self);
}

impl From<TaskSystemError> for OrchestratorError {
	fn from(e: TaskSystemError) -> Self {
		trace!(?e, "Job queue refused request");
		Self::QueueShutdown
	}
}

impl From<DispatcherShutdownError<JobError>> for OrchestratorError {
	fn from(DispatcherShutdownError(jobs): DispatcherShutdownError<JobError>) -> Self {
		error!(jobs_count = jobs.len(), "Job queue is shutdown, dropping jobs");
		Self::QueueShutdown
	}
}

#[async_trait]
impl JobQueue for TaskSystem<JobError> {
	async fn set_concurrency_limit(&self, limit: usize) -> Result<(), OrchestratorError> {
		Self::set_concurrency_limit(self, limit)
			.await
			.map_err(Into::into)
	}

	async fn cancel_all(&self) -> Result<(), OrchestratorError> {
		Self::cancel_all(self).await.map_err(Into::into)
	}

	async fn enqueue(&self, jobs: Vec<BrokerJob>) -> Result<(), OrchestratorError> {
		// Job failures go through the run's error sink, the handles have nothing else to say
		self.dispatch_many(jobs).await?;
		Ok(())
	}

	async fn add_barrier(&self, barrier: BoxFuture<'static, ()>) -> Result<(), OrchestratorError> {
		Self::add_barrier(self, barrier).await.map_err(Into::into)
	}

	async fn stats(&self) -> Result<QueueStats, OrchestratorError> {
		Self::stats(self).await.map_err(Into::into)
	}

	async fn shutdown(&self) {
		Self::shutdown(self).await;
	}
}
