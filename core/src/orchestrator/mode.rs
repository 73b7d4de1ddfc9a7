use crate::error::ErrorReport;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What asked for a run. Immediate runs are user initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
	Immediate,
	Scheduled,
}

/// Public view of what the orchestrator is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
	Idle,
	RunningImmediate,
	RunningScheduled,
}

type ErrorCallback = Box<dyn FnOnce(Option<ErrorReport>) + Send>;
type CompletionCallback = Box<dyn FnOnce() + Send>;

/// The pair of callbacks of a run, consumed when the run ends.
pub struct RunCallbacks {
	on_error: ErrorCallback,
	on_complete: CompletionCallback,
}

impl fmt::Debug for RunCallbacks {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RunCallbacks").finish_non_exhaustive()
	}
}

impl RunCallbacks {
	pub fn new(
		on_error: impl FnOnce(Option<ErrorReport>) + Send + 'static,
		on_complete: impl FnOnce() + Send + 'static,
	) -> Self {
		Self {
			on_error: Box::new(on_error),
			on_complete: Box::new(on_complete),
		}
	}

	/// Error callback first, then completion.
	pub(crate) fn finish(self, report: Option<ErrorReport>) {
		(self.on_error)(report);
		(self.on_complete)();
	}
}

#[derive(Debug, Default)]
pub(crate) enum RunMode {
	#[default]
	Idle,
	Immediate(RunCallbacks),
	Scheduled {
		priority_date: DateTime<Utc>,
		callbacks: RunCallbacks,
	},
}

impl RunMode {
	pub(crate) fn new(kind: RunKind, now: DateTime<Utc>, callbacks: RunCallbacks) -> Self {
		match kind {
			RunKind::Immediate => Self::Immediate(callbacks),
			RunKind::Scheduled => Self::Scheduled {
				priority_date: now,
				callbacks,
			},
		}
	}

	pub(crate) const fn state(&self) -> RunState {
		match self {
			Self::Idle => RunState::Idle,
			Self::Immediate(_) => RunState::RunningImmediate,
			Self::Scheduled { .. } => RunState::RunningScheduled,
		}
	}

	pub(crate) const fn priority_date(&self) -> Option<DateTime<Utc>> {
		match self {
			Self::Scheduled { priority_date, .. } => Some(*priority_date),
			Self::Idle | Self::Immediate(_) => None,
		}
	}

	/// Scheduled runs never preempt an active run, immediate ones always do.
	pub(crate) const fn can_be_preempted_by(&self, kind: RunKind) -> bool {
		matches!((self, kind), (Self::Idle, _) | (_, RunKind::Immediate))
	}

	pub(crate) fn into_callbacks(self) -> Option<RunCallbacks> {
		match self {
			Self::Idle => None,
			Self::Immediate(callbacks) | Self::Scheduled { callbacks, .. } => Some(callbacks),
		}
	}
}
