use std::{future::Future, pin::Pin};

use tokio::sync::oneshot;

use super::{
	error::{RunError, SystemError},
	system::QueueStats,
	task::{TaskId, TaskWorkState},
};

pub(crate) type BarrierFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug)]
pub(crate) enum SystemMessage<E: RunError> {
	NewTasks(Vec<TaskWorkState<E>>),
	NewBarrier(Barrier),
	SetConcurrencyLimit {
		limit: usize,
		ack: oneshot::Sender<()>,
	},
	CancelTask {
		task_id: TaskId,
		ack: oneshot::Sender<Result<(), SystemError>>,
	},
	CancelAll(oneshot::Sender<()>),
	StatsRequest(oneshot::Sender<QueueStats>),
	ShutdownRequest(oneshot::Sender<()>),
}

#[derive(Debug)]
pub(crate) enum RunnerOutput {
	TaskFinished(TaskId),
	BarrierFinished,
}

pub(crate) struct Barrier(pub(crate) BarrierFuture);

impl std::fmt::Debug for Barrier {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "<Barrier>")
	}
}
