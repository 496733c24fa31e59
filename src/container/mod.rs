//! In-memory partitioned container
//!
//! [`InMemoryContainer`] plays all three collaborators of the coordinator:
//! page fetcher, range router and query-plan provider. Topology changes
//! (`split`, `merge`) and failure injection make it the backend of the
//! integration tests and of `crossquery run`.

mod fixture;
mod memory;

pub use fixture::{ContainerFixture, FixtureDocument, FixtureQuery};
pub use memory::{InMemoryContainer, StoredDocument};

use std::sync::Arc;

use crate::config::QueryOptions;
use crate::pipeline::PipelineContext;
use crate::query::QuerySpec;

impl InMemoryContainer {
    /// Pipeline context that reads from, routes with and plans by this container
    pub fn pipeline_context(&self, query: QuerySpec, options: QueryOptions) -> PipelineContext {
        let shared = Arc::new(self.clone());
        PipelineContext::new(
            self.id().to_string(),
            query,
            options,
            shared.clone(),
            shared.clone(),
            shared,
        )
    }
}
