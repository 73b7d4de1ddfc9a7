use std::{io, path::Path};

use thiserror::Error;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
	filter::{LevelFilter, ParseError},
	fmt::{self, Layer},
	prelude::*,
	util::TryInitError,
	EnvFilter,
};

pub const LOG_FILE_PREFIX: &str = "dbp.log";

const DEFAULT_LOG_DIRECTIVES: &str = "warn,dbp_core=debug,dbp_task_system=info";

#[cfg(debug_assertions)]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::DEBUG;

#[cfg(not(debug_assertions))]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::INFO;

#[derive(Debug, Error)]
pub enum LoggerError {
	#[error("failed to create log directory '{}': {source}", .path.display())]
	LogDir {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("invalid log directive: {0}")]
	Directive(#[from] ParseError),
	#[error("a global logger is already installed: {0}")]
	Init(#[from] TryInitError),
}

/// Installs the global subscriber: console output plus a daily rolling file in `log_dir`.
///
/// `RUST_LOG` overrides the default directives. Keep the returned guard alive for
/// as long as logs must reach the file.
pub fn init_logger(log_dir: impl AsRef<Path>) -> Result<WorkerGuard, LoggerError> {
	let log_dir = log_dir.as_ref();

	std::fs::create_dir_all(log_dir).map_err(|source| LoggerError::LogDir {
		path: log_dir.into(),
		source,
	})?;

	let (non_blocking, guard) =
		tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));

	let env_filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(DEFAULT_LOG_DIRECTIVES))?;

	tracing_subscriber::registry()
		.with(env_filter)
		.with(fmt::layer().with_filter(CONSOLE_LOG_FILTER))
		.with(
			Layer::default()
				.with_writer(non_blocking)
				.with_ansi(false)
				.with_filter(LevelFilter::DEBUG),
		)
		.try_init()?;

	Ok(guard)
}
