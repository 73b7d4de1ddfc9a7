//! # Task System
//!
//! A bounded FIFO queue of async tasks, sharing one error type.
//!
//! On top of plain dispatching it offers:
//! - a concurrency limit that can be changed at any time, raising it starts waiting tasks;
//! - cancellation of a single task or of everything queued and running;
//! - barriers, futures that run once everything dispatched before them ended and that
//!   hold back everything dispatched after them, fired exactly once even across
//!   cancellation and shutdown;
//! - graceful shutdown, handing tasks that didn't finish back to their dispatchers.
//!
//! ## Basic example
//!
//! ```
//! use dbp_task_system::{ExecStatus, Interrupter, Task, TaskId, TaskStatus, TaskSystem};
//! use async_trait::async_trait;
//! use thiserror::Error;
//!
//! #[derive(Debug, Error)]
//! #[error("ping failed")]
//! pub struct PingError;
//!
//! pub struct Ping(TaskId);
//!
//! #[async_trait]
//! impl Task<PingError> for Ping {
//!     fn id(&self) -> TaskId {
//!         self.0
//!     }
//!
//!     async fn run(&mut self, _interrupter: &Interrupter) -> Result<ExecStatus, PingError> {
//!         Ok(ExecStatus::Done)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let system = TaskSystem::<PingError>::with_concurrency_limit(2);
//!
//!     let handles = system
//!         .dispatch_many((0..4).map(|_| Ping(TaskId::new_v4())))
//!         .await
//!         .unwrap();
//!
//!     // Runs once the four pings are done
//!     system.add_barrier(async { println!("all pings answered") }).await.unwrap();
//!
//!     for handle in handles {
//!         assert!(matches!(handle.await, Ok(TaskStatus::Done(_))));
//!     }
//!
//!     system.shutdown().await;
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod message;
mod runner;
mod system;
mod task;

pub use error::{DispatcherShutdownError, RunError, SystemError as TaskSystemError};
pub use system::{Dispatcher as TaskDispatcher, QueueStats, System as TaskSystem};
pub use task::{
	ExecStatus, Interrupted, Interrupter, InterruptionKind, Task, TaskHandle, TaskId, TaskStatus,
};
