use crate::{
	error::{ErrorCollection, JobFailure},
	job::{JobCategory, JobErrorSink},
	telemetry::{TelemetryEvent, TelemetrySink},
};

use std::sync::Arc;

use tracing::debug;

/// Error sink of a single run: accumulates failures for the run's report and
/// forwards the interesting ones to telemetry.
pub(crate) struct RunErrorSink {
	run_id: u64,
	category: JobCategory,
	errors: Arc<ErrorCollection>,
	telemetry: Arc<dyn TelemetrySink>,
}

impl RunErrorSink {
	pub(crate) fn new(
		run_id: u64,
		category: JobCategory,
		errors: Arc<ErrorCollection>,
		telemetry: Arc<dyn TelemetrySink>,
	) -> Self {
		Self {
			run_id,
			category,
			errors,
			telemetry,
		}
	}
}

impl JobErrorSink for RunErrorSink {
	fn report(&self, failure: JobFailure) {
		debug!(
			run_id = self.run_id,
			broker_id = failure.broker_id,
			error = %failure.error,
			"Job reported error",
		);

		let maybe_event =
			TelemetryEvent::from_job_error(failure.broker_id, self.category, &failure.error);

		self.errors.push(failure);

		if let Some(event) = maybe_event {
			self.telemetry.emit(event);
		}
	}
}
