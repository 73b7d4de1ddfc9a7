use std::{
	collections::{HashMap, VecDeque},
	future::Future,
	pin::pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex, PoisonError,
	},
};

use async_channel as chan;
use futures::{
	future::ready,
	stream::{self, StreamExt},
};
use futures_concurrency::stream::Merge;
use tokio::{spawn, sync::oneshot, task::JoinHandle};
use tracing::{debug, error, instrument, trace, warn, Instrument};

use super::{
	error::{DispatcherShutdownError, RunError, SystemError},
	message::{Barrier, RunnerOutput, SystemMessage},
	runner::{spawn_barrier, spawn_task_runner},
	task::{InterruptionKind, Task, TaskHandle, TaskId, TaskStatus, TaskWorkState},
};

/// A snapshot of the queue, mostly useful for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
	pub concurrency_limit: usize,
	pub pending_tasks: usize,
	pub running_tasks: usize,
	pub pending_barriers: usize,
}

/// A bounded pool of tasks with a mutable concurrency limit and barriers.
pub struct System<E: RunError> {
	dispatcher: Dispatcher<E>,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl<E: RunError> System<E> {
	/// Creates a system whose concurrency limit follows the available CPU cores.
	#[must_use]
	pub fn new() -> Self {
		let limit = std::thread::available_parallelism().map_or_else(
			|e| {
				error!("Failed to get available parallelism in the task system: {e:#?}");
				1
			},
			std::num::NonZeroUsize::get,
		);

		Self::with_concurrency_limit(limit)
	}

	#[must_use]
	pub fn with_concurrency_limit(limit: usize) -> Self {
		let (msgs_tx, msgs_rx) = chan::bounded(8);

		let handle = spawn(
			async move {
				let (runner_tx, runner_rx) = chan::unbounded();
				Scheduler::new(limit, runner_tx).run(msgs_rx, runner_rx).await;
			}
			.in_current_span(),
		);

		Self {
			dispatcher: Dispatcher { msgs_tx },
			handle: Mutex::new(Some(handle)),
		}
	}

	pub async fn dispatch(
		&self,
		task: impl Task<E>,
	) -> Result<TaskHandle<E>, DispatcherShutdownError<E>> {
		self.dispatcher.dispatch(task).await
	}

	pub async fn dispatch_many<T: Task<E>>(
		&self,
		tasks: impl IntoIterator<Item = T> + Send,
	) -> Result<Vec<TaskHandle<E>>, DispatcherShutdownError<E>> {
		self.dispatcher.dispatch_many(tasks).await
	}

	pub async fn add_barrier(
		&self,
		barrier: impl Future<Output = ()> + Send + 'static,
	) -> Result<(), SystemError> {
		self.dispatcher.add_barrier(barrier).await
	}

	pub async fn set_concurrency_limit(&self, limit: usize) -> Result<(), SystemError> {
		self.dispatcher.set_concurrency_limit(limit).await
	}

	pub async fn cancel_all(&self) -> Result<(), SystemError> {
		self.dispatcher.cancel_all().await
	}

	pub async fn stats(&self) -> Result<QueueStats, SystemError> {
		self.dispatcher.stats().await
	}

	#[must_use]
	pub fn get_dispatcher(&self) -> Dispatcher<E> {
		self.dispatcher.clone()
	}

	/// Interrupts every running task, gives pending tasks back as [`TaskStatus::Shutdown`],
	/// runs every barrier still waiting and then stops the system.
	pub async fn shutdown(&self) {
		let maybe_handle = self
			.handle
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();

		if let Some(handle) = maybe_handle {
			let (tx, rx) = oneshot::channel();

			if self
				.dispatcher
				.msgs_tx
				.send(SystemMessage::ShutdownRequest(tx))
				.await
				.is_err()
			{
				error!("Task system channel closed trying to shutdown");
			} else if rx.await.is_err() {
				error!("Task system dropped the shutdown ack");
			}

			if let Err(e) = handle.await {
				error!("Task system failed to shutdown on handle await: {e:#?}");
			}
		} else {
			warn!("Trying to shutdown the tasks system that was already shutdown");
		}
	}
}

impl<E: RunError> Default for System<E> {
	fn default() -> Self {
		Self::new()
	}
}

/// A cheap cloneable handle to submit work to a [`System`].
#[derive(Debug)]
pub struct Dispatcher<E: RunError> {
	msgs_tx: chan::Sender<SystemMessage<E>>,
}

impl<E: RunError> Clone for Dispatcher<E> {
	fn clone(&self) -> Self {
		Self {
			msgs_tx: self.msgs_tx.clone(),
		}
	}
}

impl<E: RunError> Dispatcher<E> {
	pub async fn dispatch(
		&self,
		task: impl Task<E>,
	) -> Result<TaskHandle<E>, DispatcherShutdownError<E>> {
		self.dispatch_many([task]).await.map(|mut handles| {
			handles
				.pop()
				.expect("we dispatched exactly one task, so we must receive one handle")
		})
	}

	pub async fn dispatch_many<T: Task<E>>(
		&self,
		tasks: impl IntoIterator<Item = T> + Send,
	) -> Result<Vec<TaskHandle<E>>, DispatcherShutdownError<E>> {
		let (work_states, handles) = tasks
			.into_iter()
			.map(|task| {
				let (work_state, status_rx) = TaskWorkState::new(Box::new(task));
				let task_id = work_state.id();

				(
					work_state,
					TaskHandle {
						status_rx,
						msgs_tx: self.msgs_tx.clone(),
						task_id,
					},
				)
			})
			.unzip::<_, _, Vec<_>, Vec<_>>();

		if work_states.is_empty() {
			return Ok(handles);
		}

		match self.msgs_tx.send(SystemMessage::NewTasks(work_states)).await {
			Ok(()) => Ok(handles),
			Err(chan::SendError(SystemMessage::NewTasks(work_states))) => Err(
				DispatcherShutdownError(
					work_states
						.into_iter()
						.map(TaskWorkState::reclaim)
						.collect(),
				),
			),
			Err(_) => unreachable!("we only sent a NewTasks message"),
		}
	}

	/// The barrier future is polled only after every unit submitted before it has
	/// finished, and nothing submitted after it starts before it completes.
	pub async fn add_barrier(
		&self,
		barrier: impl Future<Output = ()> + Send + 'static,
	) -> Result<(), SystemError> {
		self.msgs_tx
			.send(SystemMessage::NewBarrier(Barrier(Box::pin(barrier))))
			.await
			.map_err(|_| SystemError::Shutdown)
	}

	pub async fn set_concurrency_limit(&self, limit: usize) -> Result<(), SystemError> {
		let (tx, rx) = oneshot::channel();

		self.msgs_tx
			.send(SystemMessage::SetConcurrencyLimit { limit, ack: tx })
			.await
			.map_err(|_| SystemError::Shutdown)?;

		rx.await.map_err(|_| SystemError::Shutdown)
	}

	pub async fn cancel_all(&self) -> Result<(), SystemError> {
		let (tx, rx) = oneshot::channel();

		self.msgs_tx
			.send(SystemMessage::CancelAll(tx))
			.await
			.map_err(|_| SystemError::Shutdown)?;

		rx.await.map_err(|_| SystemError::Shutdown)
	}

	pub async fn stats(&self) -> Result<QueueStats, SystemError> {
		let (tx, rx) = oneshot::channel();

		self.msgs_tx
			.send(SystemMessage::StatsRequest(tx))
			.await
			.map_err(|_| SystemError::Shutdown)?;

		rx.await.map_err(|_| SystemError::Shutdown)
	}
}

enum PendingEntry<E: RunError> {
	Task(TaskWorkState<E>),
	Barrier(Barrier),
}

enum StreamMessage<E: RunError> {
	Commands(SystemMessage<E>),
	CommandsClosed,
	RunnerOutput(RunnerOutput),
}

struct Scheduler<E: RunError> {
	limit: usize,
	pending: VecDeque<PendingEntry<E>>,
	running: HashMap<TaskId, chan::Sender<InterruptionKind>>,
	barrier_in_flight: bool,
	shutting_down: Arc<AtomicBool>,
	shutdown_ack: Option<oneshot::Sender<()>>,
	orphaned: bool,
	runner_tx: chan::Sender<RunnerOutput>,
}

impl<E: RunError> Scheduler<E> {
	fn new(limit: usize, runner_tx: chan::Sender<RunnerOutput>) -> Self {
		Self {
			limit: sanitize_limit(limit),
			pending: VecDeque::new(),
			running: HashMap::new(),
			barrier_in_flight: false,
			shutting_down: Arc::new(AtomicBool::new(false)),
			shutdown_ack: None,
			orphaned: false,
			runner_tx,
		}
	}

	#[instrument(name = "task_system", skip_all)]
	async fn run(
		mut self,
		msgs_rx: chan::Receiver<SystemMessage<E>>,
		runner_rx: chan::Receiver<RunnerOutput>,
	) {
		let mut msg_stream = pin!((
			msgs_rx
				.map(StreamMessage::Commands)
				.chain(stream::once(ready(StreamMessage::CommandsClosed))),
			runner_rx.map(StreamMessage::RunnerOutput),
		)
			.merge());

		while let Some(msg) = msg_stream.next().await {
			match msg {
				StreamMessage::Commands(cmd) => self.handle_command(cmd),
				StreamMessage::CommandsClosed => {
					debug!("Every dispatcher was dropped, winding down");
					self.shutting_down.store(true, Ordering::Release);
					self.cancel_all(InterruptionKind::Shutdown);
					self.orphaned = true;
				}
				StreamMessage::RunnerOutput(RunnerOutput::TaskFinished(task_id)) => {
					if self.running.remove(&task_id).is_none() {
						warn!(%task_id, "Received completion for a task that wasn't running");
					}
				}
				StreamMessage::RunnerOutput(RunnerOutput::BarrierFinished) => {
					self.barrier_in_flight = false;
				}
			}

			self.schedule();

			if self.is_drained() {
				if let Some(ack) = self.shutdown_ack.take() {
					if ack.send(()).is_err() {
						warn!("Shutdown requester dropped before receiving ack");
					}
					debug!("Task system shutdown");
					break;
				}

				if self.orphaned {
					break;
				}
			}
		}
	}

	fn handle_command(&mut self, cmd: SystemMessage<E>) {
		match cmd {
			SystemMessage::NewTasks(work_states) => {
				if self.shutting_down.load(Ordering::Acquire) {
					for work_state in work_states {
						let task_id = work_state.id();
						trace!(%task_id, "Rejecting task dispatched during shutdown");
						give_back_on_shutdown(work_state);
					}
				} else {
					trace!(count = work_states.len(), "Enqueueing tasks");
					self.pending
						.extend(work_states.into_iter().map(PendingEntry::Task));
				}
			}

			SystemMessage::NewBarrier(barrier) => {
				self.pending.push_back(PendingEntry::Barrier(barrier));
			}

			SystemMessage::SetConcurrencyLimit { limit, ack } => {
				self.limit = sanitize_limit(limit);
				trace!(limit = self.limit, "Concurrency limit updated");
				if ack.send(()).is_err() {
					warn!("Concurrency limit requester dropped before receiving ack");
				}
			}

			SystemMessage::CancelTask { task_id, ack } => {
				let res = self.cancel_task(task_id);
				if ack.send(res).is_err() {
					warn!("Cancel task requester dropped before receiving ack");
				}
			}

			SystemMessage::CancelAll(ack) => {
				self.cancel_all(InterruptionKind::Cancel);
				if ack.send(()).is_err() {
					warn!("Cancel all requester dropped before receiving ack");
				}
			}

			SystemMessage::StatsRequest(tx) => {
				if tx.send(self.stats()).is_err() {
					warn!("Stats requester dropped before receiving stats");
				}
			}

			SystemMessage::ShutdownRequest(ack) => {
				self.shutting_down.store(true, Ordering::Release);
				self.cancel_all(InterruptionKind::Shutdown);
				self.shutdown_ack = Some(ack);
			}
		}
	}

	/// Starts everything allowed by the concurrency limit, stopping at the first barrier
	/// that still has running work in front of it.
	fn schedule(&mut self) {
		while !self.barrier_in_flight {
			let can_start = match self.pending.front() {
				None => false,
				Some(PendingEntry::Barrier(_)) => self.running.is_empty(),
				Some(PendingEntry::Task(_)) => self.running.len() < self.limit,
			};

			if !can_start {
				break;
			}

			match self.pending.pop_front() {
				Some(PendingEntry::Task(work_state)) => {
					let task_id = work_state.id();
					let interrupt_tx = work_state.interrupt_tx.clone();
					spawn_task_runner(
						work_state,
						Arc::clone(&self.shutting_down),
						self.runner_tx.clone(),
					);
					self.running.insert(task_id, interrupt_tx);
				}
				Some(PendingEntry::Barrier(barrier)) => {
					self.barrier_in_flight = true;
					spawn_barrier(barrier, self.runner_tx.clone());
				}
				None => break,
			}
		}
	}

	fn cancel_task(&mut self, task_id: TaskId) -> Result<(), SystemError> {
		if let Some(interrupt_tx) = self.running.get(&task_id) {
			interrupt(task_id, interrupt_tx, InterruptionKind::Cancel);
			return Ok(());
		}

		let maybe_idx = self.pending.iter().position(
			|entry| matches!(entry, PendingEntry::Task(work_state) if work_state.id() == task_id),
		);

		match maybe_idx.and_then(|idx| self.pending.remove(idx)) {
			Some(PendingEntry::Task(work_state)) => {
				work_state.resolve_without_running(Ok(TaskStatus::Canceled));
				Ok(())
			}
			_ => Err(SystemError::TaskNotFound(task_id)),
		}
	}

	/// Pending tasks are resolved without running, running tasks are interrupted and
	/// barriers stay in place so each one still fires exactly once.
	fn cancel_all(&mut self, kind: InterruptionKind) {
		let mut canceled = 0;

		self.pending = self
			.pending
			.drain(..)
			.filter_map(|entry| match entry {
				PendingEntry::Task(work_state) => {
					canceled += 1;
					match kind {
						InterruptionKind::Cancel => {
							work_state.resolve_without_running(Ok(TaskStatus::Canceled));
						}
						InterruptionKind::Shutdown => give_back_on_shutdown(work_state),
					}
					None
				}
				barrier @ PendingEntry::Barrier(_) => Some(barrier),
			})
			.collect();

		for (task_id, interrupt_tx) in &self.running {
			interrupt(*task_id, interrupt_tx, kind);
		}

		debug!(
			?kind,
			pending = canceled,
			running = self.running.len(),
			"Interrupted all tasks"
		);
	}

	fn stats(&self) -> QueueStats {
		let pending_barriers = self
			.pending
			.iter()
			.filter(|entry| matches!(entry, PendingEntry::Barrier(_)))
			.count();

		QueueStats {
			concurrency_limit: self.limit,
			pending_tasks: self.pending.len() - pending_barriers,
			running_tasks: self.running.len(),
			pending_barriers,
		}
	}

	fn is_drained(&self) -> bool {
		self.pending.is_empty() && self.running.is_empty() && !self.barrier_in_flight
	}
}

fn interrupt(
	task_id: TaskId,
	interrupt_tx: &chan::Sender<InterruptionKind>,
	kind: InterruptionKind,
) {
	if let Err(e) = interrupt_tx.try_send(kind) {
		// A full channel means the task already has an interruption waiting
		trace!(%task_id, ?e, "Task interruption not delivered");
	}
}

fn give_back_on_shutdown<E: RunError>(work_state: TaskWorkState<E>) {
	let TaskWorkState {
		task, status_tx, ..
	} = work_state;
	status_tx.deliver(Ok(TaskStatus::Shutdown(task)));
}

fn sanitize_limit(limit: usize) -> usize {
	if limit == 0 {
		warn!("Concurrency limit of 0 would stall the queue, using 1 instead");
		1
	} else {
		limit
	}
}
