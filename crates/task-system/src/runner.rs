use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use async_channel as chan;
use tokio::spawn;
use tracing::{error, trace, warn, Instrument};

use super::{
	error::{RunError, SystemError},
	message::{Barrier, RunnerOutput},
	task::{ExecStatus, TaskStatus, TaskWorkState},
};

pub(crate) fn spawn_task_runner<E: RunError>(
	TaskWorkState {
		mut task,
		status_tx,
		interrupter,
		..
	}: TaskWorkState<E>,
	shutting_down: Arc<AtomicBool>,
	runner_tx: chan::Sender<RunnerOutput>,
) {
	let task_id = task.id();

	spawn(
		async move {
			trace!(%task_id, "Task runner starting");

			// The task runs on its own tokio task so a panic in user code only costs us this task
			let status = match spawn(
				async move {
					let res = task.run(&interrupter).await;
					(task, res)
				}
				.in_current_span(),
			)
			.await
			{
				Ok((_, Ok(ExecStatus::Done))) => Ok(TaskStatus::Done(task_id)),
				Ok((task, Ok(ExecStatus::Canceled))) => {
					if shutting_down.load(Ordering::Acquire) {
						Ok(TaskStatus::Shutdown(task))
					} else {
						Ok(TaskStatus::Canceled)
					}
				}
				Ok((_, Err(e))) => Ok(TaskStatus::Error(e)),
				Err(e) => {
					if e.is_panic() {
						error!(%task_id, ?e, "Task panicked");
					} else {
						error!(%task_id, ?e, "Task failed to join");
					}
					Err(SystemError::TaskJoin(task_id))
				}
			};

			status_tx.deliver(status);

			if runner_tx
				.send(RunnerOutput::TaskFinished(task_id))
				.await
				.is_err()
			{
				warn!(%task_id, "Task system closed before task runner could report completion");
			}
		}
		.in_current_span(),
	);
}

pub(crate) fn spawn_barrier(
	Barrier(fut): Barrier,
	runner_tx: chan::Sender<RunnerOutput>,
) {
	spawn(
		async move {
			trace!("Running barrier");

			if let Err(e) = spawn(fut.in_current_span()).await {
				if e.is_panic() {
					error!(?e, "Barrier callback panicked");
				}
			}

			if runner_tx.send(RunnerOutput::BarrierFinished).await.is_err() {
				warn!("Task system closed before barrier could report completion");
			}
		}
		.in_current_span(),
	);
}
