use std::fmt;

use thiserror::Error;

use super::task::{Task, TaskId};

/// Blanket trait for the error type that every task in a [`System`](crate::TaskSystem) returns.
pub trait RunError: std::error::Error + fmt::Debug + Send + Sync + 'static {}

impl<T: std::error::Error + fmt::Debug + Send + Sync + 'static> RunError for T {}

#[derive(Debug, Error)]
pub enum SystemError {
	#[error("task not found <id='{0}'>")]
	TaskNotFound(TaskId),
	#[error("task join error <id='{0}'>")]
	TaskJoin(TaskId),
	#[error("task system is shutdown")]
	Shutdown,
}

/// Returned when dispatching to a system that was already shutdown, giving back the tasks
/// so the caller can store them or dispatch them somewhere else.
#[derive(Debug, Error)]
#[error("task system is shutdown, rejected {} task(s)", .0.len())]
pub struct DispatcherShutdownError<E: RunError>(pub Vec<Box<dyn Task<E>>>);
