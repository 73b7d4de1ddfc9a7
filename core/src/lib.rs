//! Broker job orchestration for the data broker protection agent.
//!
//! The [`Orchestrator`] turns run requests (user initiated scans, scheduled
//! background runs, debug opt-outs) into one job per broker on a bounded
//! [`JobQueue`], decides which run wins when requests overlap and reports
//! how each run ended through its callbacks.

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

pub mod catalog;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod orchestrator;
pub mod queue;
pub mod telemetry;

pub use catalog::{BrokerCatalog, BrokerId, BrokerQueryRecord, CatalogError, StaticCatalog};
pub use concurrency::JobConcurrencyPolicy;
pub use config::{ConfigError, ExecutionConfig, OrchestratorConfig};
pub use error::{ErrorCollection, ErrorReport, JobError, JobFailure, OrchestratorError};
pub use job::{
	BrokerJob, BrokerJobRunner, CatalogJobProvider, JobCategory, JobContext, JobDependencies,
	JobErrorSink, JobProvider,
};
pub use logging::{init_logger, LoggerError};
pub use orchestrator::{Orchestrator, OrchestratorObserver, RunCallbacks, RunKind, RunState};
pub use queue::JobQueue;
pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetrySink};
