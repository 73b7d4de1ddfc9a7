use std::{
	fmt,
	future::{Future, IntoFuture},
	pin::Pin,
	task::{ready, Context, Poll},
};

use async_channel as chan;
use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};
use tokio::sync::oneshot;
use tracing::trace;
use uuid::Uuid;

use super::{
	error::{RunError, SystemError},
	message::SystemMessage,
};

pub type TaskId = Uuid;

pub(crate) type StatusResult<E> = Result<TaskStatus<E>, SystemError>;

/// How a dispatched task ended, delivered through its [`TaskHandle`].
#[derive(Debug)]
pub enum TaskStatus<E: RunError> {
	Done(TaskId),
	/// Cancelled before it started, or it stopped after noticing its [`Interrupter`].
	Canceled,
	/// The system shut down before the task could finish. Downcast the box to get the
	/// concrete task back and dispatch it somewhere else.
	Shutdown(Box<dyn Task<E>>),
	Error(E),
}

/// What [`Task::run`] returns when it didn't fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
	Done,
	Canceled,
}

/// A unit of work for the task system. Every task of a system shares the error type `E`.
#[async_trait]
pub trait Task<E: RunError>: Downcast + Send + Sync + 'static {
	fn id(&self) -> TaskId;

	/// Called at most once, as soon as a slot is free under the concurrency limit.
	///
	/// Long running work should race `interrupter` (or check it between steps) so a
	/// cancellation takes effect quickly.
	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, E>;
}

impl_downcast!(Task<E> where E: RunError);

impl<E: RunError> fmt::Debug for dyn Task<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Task").field(&self.id()).finish()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionKind {
	Cancel,
	/// The task will be handed back as [`TaskStatus::Shutdown`] once it stops.
	Shutdown,
}

pin_project_lite::pin_project! {
	/// Resolves once the task is asked to stop.
	#[must_use = "futures do nothing unless polled"]
	pub struct Interrupted<'recv> {
		#[pin]
		recv: chan::Recv<'recv, InterruptionKind>,
	}
}

impl Future for Interrupted<'_> {
	type Output = InterruptionKind;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		if let Ok(kind) = ready!(self.project().recv.poll(cx)) {
			trace!(?kind, "Task received interruption");
			Poll::Ready(kind)
		} else {
			// Scheduler is gone, nobody can interrupt this task anymore
			Poll::Pending
		}
	}
}

impl<'recv> IntoFuture for &'recv Interrupter {
	type Output = InterruptionKind;

	type IntoFuture = Interrupted<'recv>;

	fn into_future(self) -> Self::IntoFuture {
		self.interrupted()
	}
}

/// Lets a running task observe cancellation. Await it (or [`Interrupter::interrupted`])
/// to wait for one, or poll it with [`Interrupter::try_interruption`].
#[derive(Debug)]
pub struct Interrupter {
	interrupt_rx: chan::Receiver<InterruptionKind>,
}

impl Interrupter {
	pub(crate) const fn new(interrupt_rx: chan::Receiver<InterruptionKind>) -> Self {
		Self { interrupt_rx }
	}

	pub fn interrupted(&self) -> Interrupted<'_> {
		Interrupted {
			recv: self.interrupt_rx.recv(),
		}
	}

	#[must_use]
	pub fn try_interruption(&self) -> Option<InterruptionKind> {
		self.interrupt_rx.try_recv().ok()
	}
}

/// Returns `Ok(ExecStatus::Canceled)` from the enclosing [`Task::run`] if an
/// interruption is waiting.
#[macro_export]
macro_rules! check_interruption {
	($interrupter:ident) => {
		if let Some(kind) = $crate::Interrupter::try_interruption($interrupter) {
			::tracing::trace!(?kind, "Stopping task at interruption check");
			return Ok($crate::ExecStatus::Canceled);
		}
	};
}

/// Await it to get the [`TaskStatus`] of a dispatched task. Dropping it doesn't cancel the task.
#[derive(Debug)]
pub struct TaskHandle<E: RunError> {
	pub(crate) status_rx: oneshot::Receiver<StatusResult<E>>,
	pub(crate) msgs_tx: chan::Sender<SystemMessage<E>>,
	pub(crate) task_id: TaskId,
}

impl<E: RunError> Future for TaskHandle<E> {
	type Output = StatusResult<E>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match ready!(Pin::new(&mut self.status_rx).poll(cx)) {
			Ok(status) => Poll::Ready(status),
			Err(_) => Poll::Ready(Err(SystemError::Shutdown)),
		}
	}
}

impl<E: RunError> TaskHandle<E> {
	#[must_use]
	pub const fn task_id(&self) -> TaskId {
		self.task_id
	}

	/// Cancels this task only: a pending task never starts, a running one gets
	/// [`InterruptionKind::Cancel`].
	pub async fn cancel(&self) -> Result<(), SystemError> {
		let (ack_tx, ack_rx) = oneshot::channel();

		self.msgs_tx
			.send(SystemMessage::CancelTask {
				task_id: self.task_id,
				ack: ack_tx,
			})
			.await
			.map_err(|_| SystemError::Shutdown)?;

		ack_rx.await.unwrap_or(Err(SystemError::Shutdown))
	}
}

/// A dispatched task together with the channels the scheduler drives it with.
pub(crate) struct TaskWorkState<E: RunError> {
	pub(crate) task: Box<dyn Task<E>>,
	pub(crate) status_tx: StatusSender<E>,
	pub(crate) interrupter: Interrupter,
	pub(crate) interrupt_tx: chan::Sender<InterruptionKind>,
}

impl<E: RunError> fmt::Debug for TaskWorkState<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TaskWorkState")
			.field("task", &self.task)
			.finish_non_exhaustive()
	}
}

impl<E: RunError> TaskWorkState<E> {
	pub(crate) fn new(task: Box<dyn Task<E>>) -> (Self, oneshot::Receiver<StatusResult<E>>) {
		let (status_tx, status_rx) = oneshot::channel();
		// One slot is enough, a second interruption tells the task nothing new
		let (interrupt_tx, interrupt_rx) = chan::bounded(1);

		let task_id = task.id();

		(
			Self {
				task,
				status_tx: StatusSender::new(task_id, status_tx),
				interrupter: Interrupter::new(interrupt_rx),
				interrupt_tx,
			},
			status_rx,
		)
	}

	pub(crate) fn id(&self) -> TaskId {
		self.task.id()
	}

	/// Resolve a task that never got to run.
	pub(crate) fn resolve_without_running(self, status: StatusResult<E>) {
		self.status_tx.deliver(status);
	}

	/// Takes the task back from a dispatch the system refused.
	pub(crate) fn reclaim(self) -> Box<dyn Task<E>> {
		let Self {
			task, status_tx, ..
		} = self;
		status_tx.deliver(Err(SystemError::Shutdown));
		task
	}
}

/// Delivers the status of a task to its handle, exactly once.
///
/// Dropping it undelivered means the scheduler lost track of a task, which is a bug.
#[derive(Debug)]
pub(crate) struct StatusSender<E: RunError> {
	task_id: TaskId,
	maybe_tx: Option<oneshot::Sender<StatusResult<E>>>,
}

impl<E: RunError> StatusSender<E> {
	const fn new(task_id: TaskId, tx: oneshot::Sender<StatusResult<E>>) -> Self {
		Self {
			task_id,
			maybe_tx: Some(tx),
		}
	}

	pub(crate) fn deliver(mut self, status: StatusResult<E>) {
		if let Some(tx) = self.maybe_tx.take() {
			if tx.send(status).is_err() {
				trace!(task_id = %self.task_id, "Task handle dropped before receiving its status");
			}
		}
	}
}

impl<E: RunError> Drop for StatusSender<E> {
	fn drop(&mut self) {
		assert!(
			self.maybe_tx.is_none(),
			"status of task <id='{}'> was never delivered",
			self.task_id
		);
	}
}
