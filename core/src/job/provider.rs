use crate::catalog::CatalogError;

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{BrokerJob, JobCategory, JobDependencies, JobErrorSink};

/// Builds the jobs of a run.
#[async_trait]
pub trait JobProvider: Send + Sync + 'static {
	async fn create_jobs(
		&self,
		category: JobCategory,
		priority_date: Option<DateTime<Utc>>,
		show_progress: bool,
		error_sink: Arc<dyn JobErrorSink>,
		dependencies: &JobDependencies,
	) -> Result<Vec<BrokerJob>, CatalogError>;
}

/// One job per distinct broker in the catalog, in the order brokers first show up.
#[derive(Debug, Default, Clone, Copy)]
pub struct CatalogJobProvider;

#[async_trait]
impl JobProvider for CatalogJobProvider {
	async fn create_jobs(
		&self,
		category: JobCategory,
		priority_date: Option<DateTime<Utc>>,
		show_progress: bool,
		error_sink: Arc<dyn JobErrorSink>,
		dependencies: &JobDependencies,
	) -> Result<Vec<BrokerJob>, CatalogError> {
		let records = dependencies.catalog.fetch_all_records().await?;
		let records_count = records.len();

		let mut seen = HashSet::with_capacity(records_count);

		let jobs = records
			.into_iter()
			.filter(|record| seen.insert(record.broker_id))
			.map(|record| {
				BrokerJob::new(
					record.broker_id,
					category,
					priority_date,
					show_progress,
					Arc::clone(&error_sink),
					dependencies,
				)
			})
			.collect::<Vec<_>>();

		debug!(%category, records_count, jobs_count = jobs.len(), "Built broker jobs");

		Ok(jobs)
	}
}
