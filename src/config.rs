//! Query options
//!
//! Options supplied by the caller for one query execution. All fields have
//! defaults so that a partial JSON document deserializes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::observability::Severity;

/// Per-query options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Documents per page handed to the caller (default: 100)
    #[serde(default = "default_max_item_count")]
    pub max_item_count: usize,

    /// Concurrent range fetches (default: 4)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Buffered items across all producers before prefetch pauses (default: 1000)
    #[serde(default = "default_max_buffered_item_count")]
    pub max_buffered_item_count: usize,

    /// Always forward pages without merging (default: false)
    #[serde(default)]
    pub force_passthrough: bool,

    /// Try single-range direct execution first (default: true)
    #[serde(default = "default_enable_direct_execution")]
    pub enable_direct_execution: bool,

    /// Logical partition key, if the query targets one partition
    #[serde(default)]
    pub partition_key: Option<Value>,

    /// Token from a previous page
    #[serde(default)]
    pub continuation: Option<String>,

    /// Log threshold name (default: "warn")
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_item_count() -> usize {
    100
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_buffered_item_count() -> usize {
    1000
}

fn default_enable_direct_execution() -> bool {
    true
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_item_count: default_max_item_count(),
            max_concurrency: default_max_concurrency(),
            max_buffered_item_count: default_max_buffered_item_count(),
            force_passthrough: false,
            enable_direct_execution: default_enable_direct_execution(),
            partition_key: None,
            continuation: None,
            log_level: default_log_level(),
        }
    }
}

impl QueryOptions {
    pub fn with_max_item_count(mut self, n: usize) -> Self {
        self.max_item_count = n;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_max_buffered_item_count(mut self, n: usize) -> Self {
        self.max_buffered_item_count = n;
        self
    }

    pub fn with_force_passthrough(mut self, on: bool) -> Self {
        self.force_passthrough = on;
        self
    }

    pub fn with_direct_execution(mut self, on: bool) -> Self {
        self.enable_direct_execution = on;
        self
    }

    pub fn with_partition_key(mut self, key: Value) -> Self {
        self.partition_key = Some(key);
        self
    }

    pub fn with_continuation(mut self, token: Option<String>) -> Self {
        self.continuation = token;
        self
    }

    /// Parsed log threshold
    pub fn log_severity(&self) -> QueryResult<Severity> {
        Severity::parse(&self.log_level).ok_or_else(|| {
            QueryError::InvalidArgument(format!("unknown log level '{}'", self.log_level))
        })
    }

    /// Reject option combinations the pipeline cannot run with
    pub fn validate(&self) -> QueryResult<()> {
        if self.max_item_count == 0 {
            return Err(QueryError::InvalidArgument(
                "max_item_count must be positive".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(QueryError::InvalidArgument(
                "max_concurrency must be positive".into(),
            ));
        }
        if self.max_buffered_item_count == 0 {
            return Err(QueryError::InvalidArgument(
                "max_buffered_item_count must be positive".into(),
            ));
        }
        self.log_severity()?;
        Ok(())
    }
}
