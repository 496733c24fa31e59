//! Container fixtures
//!
//! A fixture is one JSON document describing a container, the query to run
//! against it and the options to run it with. Used by `crossquery run` and
//! the integration tests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::QueryOptions;
use crate::error::QueryResult;
use crate::query::{QueryInfo, QuerySpec};
use crate::routing::FeedRange;

use super::memory::InMemoryContainer;

fn default_collection() -> String {
    "fixture".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureDocument {
    pub partition_key: Value,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureQuery {
    pub text: String,
    #[serde(default)]
    pub info: QueryInfo,
    /// Expression a `SELECT VALUE` aggregate folds, e.g. `c.n`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_input: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerFixture {
    /// Collection id (default: "fixture")
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Physical ranges; the whole key space when empty
    #[serde(default)]
    pub ranges: Vec<FeedRange>,

    #[serde(default)]
    pub documents: Vec<FixtureDocument>,

    /// Query shapes known to the plan provider
    #[serde(default)]
    pub queries: Vec<FixtureQuery>,

    /// Query to run
    pub query: QuerySpec,

    #[serde(default)]
    pub options: QueryOptions,
}

impl ContainerFixture {
    /// Build the container the fixture describes
    pub fn build(&self) -> QueryResult<InMemoryContainer> {
        let ranges = if self.ranges.is_empty() {
            vec![FeedRange::full()]
        } else {
            self.ranges.clone()
        };
        let container = InMemoryContainer::new(self.collection.clone(), ranges)?;
        for query in &self.queries {
            container.register_query(query.text.clone(), query.info.clone())?;
            if let Some(expression) = &query.aggregate_input {
                container.register_aggregate(query.text.clone(), expression.clone())?;
            }
        }
        for doc in &self.documents {
            container.insert(doc.partition_key.clone(), doc.body.clone())?;
        }
        Ok(container)
    }
}
