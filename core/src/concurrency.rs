use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::job::JobCategory;

pub const DEFAULT_MANUAL_SCAN_CONCURRENCY: usize = 6;
pub const DEFAULT_BACKGROUND_CONCURRENCY: usize = 2;

/// How many broker jobs may run at the same time for each run category.
///
/// Manual scans are user facing and get a wider slot count, everything else
/// runs in the background and must stay light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConcurrencyPolicy {
	pub manual_scan: usize,
	pub background: usize,
}

impl Default for JobConcurrencyPolicy {
	fn default() -> Self {
		Self {
			manual_scan: DEFAULT_MANUAL_SCAN_CONCURRENCY,
			background: DEFAULT_BACKGROUND_CONCURRENCY,
		}
	}
}

impl JobConcurrencyPolicy {
	/// Concurrency limit for a run of `category`, never less than 1.
	#[must_use]
	pub fn concurrency(&self, category: JobCategory) -> usize {
		let limit = match category {
			JobCategory::ManualScanOnly => self.manual_scan,
			JobCategory::All | JobCategory::OptOutOnly | JobCategory::ScheduledScanOnly => {
				self.background
			}
		};

		if limit == 0 {
			warn!(%category, "Configured concurrency of 0, clamping to 1");
			1
		} else {
			limit
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_limits() {
		let policy = JobConcurrencyPolicy::default();

		assert_eq!(policy.concurrency(JobCategory::ManualScanOnly), 6);
		assert_eq!(policy.concurrency(JobCategory::All), 2);
		assert_eq!(policy.concurrency(JobCategory::OptOutOnly), 2);
		assert_eq!(policy.concurrency(JobCategory::ScheduledScanOnly), 2);
	}

	#[test]
	fn zero_is_clamped() {
		let policy = JobConcurrencyPolicy {
			manual_scan: 0,
			background: 0,
		};

		assert_eq!(policy.concurrency(JobCategory::ManualScanOnly), 1);
		assert_eq!(policy.concurrency(JobCategory::All), 1);
	}

	#[test]
	fn custom_limits() {
		let policy = JobConcurrencyPolicy {
			manual_scan: 10,
			background: 3,
		};

		assert_eq!(policy.concurrency(JobCategory::ManualScanOnly), 10);
		assert_eq!(policy.concurrency(JobCategory::ScheduledScanOnly), 3);
	}
}
