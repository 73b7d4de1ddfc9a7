use dbp_task_system::{check_interruption, ExecStatus, Interrupter, InterruptionKind, Task, TaskId};

use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use thiserror::Error;
use tokio::{sync::oneshot, time::sleep};
use tracing::info;

#[derive(Debug, Error)]
pub enum SampleError {
	#[error("Sample error")]
	SampleError,
}

#[derive(Debug)]
pub struct ReadyTask {
	id: TaskId,
}

impl Default for ReadyTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for ReadyTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		Ok(ExecStatus::Done)
	}
}

#[derive(Debug)]
pub struct NeverTask {
	id: TaskId,
}

impl Default for NeverTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for NeverTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		match interrupter.await {
			InterruptionKind::Cancel => {
				info!("Canceling NeverTask <id='{}'>", self.id);
			}
			InterruptionKind::Shutdown => {
				info!("Shutting down NeverTask <id='{}'>", self.id);
			}
		}
		Ok(ExecStatus::Canceled)
	}
}

#[derive(Debug)]
pub struct BogusTask {
	id: TaskId,
}

impl Default for BogusTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for BogusTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		Err(SampleError::SampleError)
	}
}

#[derive(Debug)]
pub struct PanicTask {
	id: TaskId,
}

impl Default for PanicTask {
	fn default() -> Self {
		Self {
			id: TaskId::new_v4(),
		}
	}
}

#[async_trait]
impl Task<SampleError> for PanicTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		panic!("PanicTask always panics");
	}
}

/// Signals when it begins and waits for an external signal, honoring interruptions.
#[derive(Debug)]
pub struct WaitSignalTask {
	id: TaskId,
	began_tx: Option<oneshot::Sender<()>>,
	signal_rx: chan::Receiver<()>,
}

impl WaitSignalTask {
	pub fn new() -> (Self, oneshot::Receiver<()>, chan::Sender<()>) {
		let (began_tx, began_rx) = oneshot::channel();
		let (signal_tx, signal_rx) = chan::bounded(1);

		(
			Self {
				id: TaskId::new_v4(),
				began_tx: Some(began_tx),
				signal_rx,
			},
			began_rx,
			signal_tx,
		)
	}
}

#[async_trait]
impl Task<SampleError> for WaitSignalTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		if let Some(began_tx) = self.began_tx.take() {
			began_tx.send(()).ok();
		}

		loop {
			check_interruption!(interrupter);

			if self.signal_rx.try_recv().is_ok() {
				return Ok(ExecStatus::Done);
			}

			sleep(Duration::from_millis(5)).await;
		}
	}
}

/// Tracks how many instances run at the same time.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
	current: Arc<AtomicUsize>,
	max: Arc<AtomicUsize>,
	finished: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
	pub fn max(&self) -> usize {
		self.max.load(Ordering::SeqCst)
	}

	pub fn finished(&self) -> usize {
		self.finished.load(Ordering::SeqCst)
	}
}

#[derive(Debug)]
pub struct ProbeTask {
	id: TaskId,
	probe: ConcurrencyProbe,
	duration: Duration,
}

impl ProbeTask {
	pub fn new(probe: &ConcurrencyProbe, duration: Duration) -> Self {
		Self {
			id: TaskId::new_v4(),
			probe: probe.clone(),
			duration,
		}
	}
}

#[async_trait]
impl Task<SampleError> for ProbeTask {
	fn id(&self) -> TaskId {
		self.id
	}

	async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, SampleError> {
		let now_running = self.probe.current.fetch_add(1, Ordering::SeqCst) + 1;
		self.probe.max.fetch_max(now_running, Ordering::SeqCst);

		sleep(self.duration).await;

		self.probe.current.fetch_sub(1, Ordering::SeqCst);
		self.probe.finished.fetch_add(1, Ordering::SeqCst);

		Ok(ExecStatus::Done)
	}
}
