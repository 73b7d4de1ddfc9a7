use std::{
	mem,
	sync::{
		atomic::{AtomicBool, Ordering},
		Mutex, PoisonError,
	},
	time::Duration,
};

use thiserror::Error;
use tracing::debug;

use crate::catalog::{BrokerId, CatalogError};

/// Failure of a single broker job. Reported to the run, never to the queue.
#[derive(Debug, Error)]
pub enum JobError {
	#[error("broker responded with HTTP status {status}")]
	Http { status: u16 },
	#[error("action <id='{action_id}'> failed: {reason}")]
	ActionFailed { action_id: String, reason: String },
	#[error("job timed out after {0:?}")]
	TimedOut(Duration),
	#[error("job panicked")]
	Panicked,
	#[error("{0}")]
	Other(String),
}

#[derive(Debug)]
pub struct JobFailure {
	pub broker_id: BrokerId,
	pub error: JobError,
}

/// Failures that concern a whole run instead of a single broker.
#[derive(Debug, Error)]
pub enum OrchestratorError {
	#[error("a run is in progress and cannot be interrupted")]
	CannotInterrupt,
	#[error("the run was interrupted by another run")]
	Interrupted,
	#[error(transparent)]
	CatalogUnavailable(#[from] CatalogError),
	#[error("job queue was shutdown")]
	QueueShutdown,
}

/// What the error callback of a run receives.
#[derive(Debug, Default)]
pub struct ErrorReport {
	pub one_time_error: Option<OrchestratorError>,
	pub job_errors: Vec<JobFailure>,
}

impl ErrorReport {
	#[must_use]
	pub const fn one_time(error: OrchestratorError) -> Self {
		Self {
			one_time_error: Some(error),
			job_errors: Vec::new(),
		}
	}

	#[must_use]
	pub const fn is_empty(&self) -> bool {
		self.one_time_error.is_none() && self.job_errors.is_empty()
	}
}

/// Per run accumulator of job failures.
///
/// Jobs may keep reporting after the run was flushed, those late failures are
/// kept out of any report.
#[derive(Debug, Default)]
pub struct ErrorCollection {
	job_errors: Mutex<Vec<JobFailure>>,
	flushed: AtomicBool,
}

impl ErrorCollection {
	pub fn push(&self, failure: JobFailure) {
		let mut job_errors = self
			.job_errors
			.lock()
			.unwrap_or_else(PoisonError::into_inner);

		// Checked under the lock, so a push racing a flush can't sneak in after it
		if self.flushed.load(Ordering::Acquire) {
			debug!(
				broker_id = failure.broker_id,
				error = %failure.error,
				"Dropping job error reported after its run finished"
			);
			return;
		}

		job_errors.push(failure);
	}

	pub fn len(&self) -> usize {
		self.job_errors
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Takes every accumulated job error together with the run level error, if any.
	///
	/// Returns `None` when there is nothing to report.
	pub fn flush(&self, one_time_error: Option<OrchestratorError>) -> Option<ErrorReport> {
		let job_errors = {
			let mut job_errors = self
				.job_errors
				.lock()
				.unwrap_or_else(PoisonError::into_inner);
			self.flushed.store(true, Ordering::Release);
			mem::take(&mut *job_errors)
		};

		let report = ErrorReport {
			one_time_error,
			job_errors,
		};

		(!report.is_empty()).then_some(report)
	}
}
