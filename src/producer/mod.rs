//! Per-range producers and their split-aware composition
//!
//! # Layers
//!
//! 1. [`PageFetcher`]: the backend, one page of one range per call
//! 2. [`ItemProducer`]: buffers pages of one range; one fetch in flight
//! 3. [`ItemProducerTree`]: one range's producers, re-routed on splits
//!
//! Stages above this module only talk to trees.

mod comparer;
mod fetch;
mod filter;
mod item_producer;
mod page;
mod tree;

pub use comparer::{DeterministicComparer, OrderByComparer, ProducerComparer};
pub use fetch::{FetchFailure, FetchRequest, FetchResult, PageFetcher};
pub use filter::{ItemFilter, OrderByResume};
pub use item_producer::{ItemProducer, PageMove, ProducerContext, ResumePoint};
pub use page::{BufferedPage, FetchedPage, PageCharges, PageDiagnostics, QueryItem};
pub use tree::{ItemProducerTree, LeafState, TreePage};
