use tracing::trace;

use crate::{catalog::BrokerId, error::JobError, job::JobCategory};

/// Events forwarded to the telemetry backend while a run is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
	HttpError {
		broker_id: BrokerId,
		category: JobCategory,
		status: u16,
	},
	ActionFailed {
		broker_id: BrokerId,
		category: JobCategory,
		action_id: String,
		reason: String,
	},
}

impl TelemetryEvent {
	/// Only HTTP and action failures are worth a telemetry event.
	#[must_use]
	pub fn from_job_error(
		broker_id: BrokerId,
		category: JobCategory,
		error: &JobError,
	) -> Option<Self> {
		match error {
			JobError::Http { status } => Some(Self::HttpError {
				broker_id,
				category,
				status: *status,
			}),
			JobError::ActionFailed { action_id, reason } => Some(Self::ActionFailed {
				broker_id,
				category,
				action_id: action_id.clone(),
				reason: reason.clone(),
			}),
			JobError::TimedOut(_) | JobError::Panicked | JobError::Other(_) => None,
		}
	}
}

pub trait TelemetrySink: Send + Sync + 'static {
	fn emit(&self, event: TelemetryEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
	fn emit(&self, event: TelemetryEvent) {
		trace!(?event, "Discarding telemetry event");
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[test]
	fn only_http_and_action_failures_become_events() {
		assert_eq!(
			TelemetryEvent::from_job_error(
				7,
				JobCategory::ManualScanOnly,
				&JobError::Http { status: 503 }
			),
			Some(TelemetryEvent::HttpError {
				broker_id: 7,
				category: JobCategory::ManualScanOnly,
				status: 503,
			})
		);

		assert!(matches!(
			TelemetryEvent::from_job_error(
				7,
				JobCategory::OptOutOnly,
				&JobError::ActionFailed {
					action_id: "fill-form".to_string(),
					reason: "captcha".to_string(),
				}
			),
			Some(TelemetryEvent::ActionFailed { broker_id: 7, .. })
		));

		assert!(TelemetryEvent::from_job_error(
			7,
			JobCategory::All,
			&JobError::TimedOut(Duration::from_secs(1))
		)
		.is_none());
		assert!(TelemetryEvent::from_job_error(
			7,
			JobCategory::All,
			&JobError::Other("nope".to_string())
		)
		.is_none());
		assert!(
			TelemetryEvent::from_job_error(7, JobCategory::All, &JobError::Panicked).is_none()
		);
	}
}
