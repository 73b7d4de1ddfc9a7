use std::error::Error as StdError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type BrokerId = i64;
pub type ProfileQueryId = i64;

/// One scan target: a broker paired with one of the user's profile queries.
///
/// A broker usually shows up once per profile query, jobs are built per broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerQueryRecord {
	pub broker_id: BrokerId,
	pub profile_query_id: ProfileQueryId,
	pub broker_name: String,
}

#[derive(Debug, Error)]
pub enum CatalogError {
	#[error("failed to read broker catalog: {0}")]
	Read(String),
	#[error("broker catalog backend failure: {0}")]
	Backend(#[source] Box<dyn StdError + Send + Sync>),
}

/// Read access to the broker and profile query records of the user.
#[async_trait]
pub trait BrokerCatalog: Send + Sync + 'static {
	async fn fetch_all_records(&self) -> Result<Vec<BrokerQueryRecord>, CatalogError>;
}

/// A catalog backed by a fixed set of records, kept in memory.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
	records: Vec<BrokerQueryRecord>,
}

impl StaticCatalog {
	#[must_use]
	pub const fn new(records: Vec<BrokerQueryRecord>) -> Self {
		Self { records }
	}
}

#[async_trait]
impl BrokerCatalog for StaticCatalog {
	async fn fetch_all_records(&self) -> Result<Vec<BrokerQueryRecord>, CatalogError> {
		Ok(self.records.clone())
	}
}
