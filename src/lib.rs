//! vecscan: batched exact embedding similarity search.
//!
//! A single flat table of fixed-dimension f32 vectors is scanned brute-force
//! against each query with SIMD-accelerated distance kernels, and the best k
//! hits come back in deterministic order. Per-query scratch memory is rented
//! from a size-classed [`BufferPool`] so the hot path does not allocate.
//!
//! This crate is a library, not a service: loading embeddings and exposing
//! queries over a transport belong to the hosting process.

pub mod engine;
pub mod kernel;
pub mod pool;
pub mod table;
pub mod topk;

pub use engine::{EngineStats, SearchEngine, SearchError, SearchResult, SearchStats};
pub use kernel::{kernel_for, DistanceKernel, Metric};
pub use pool::{BufferPool, PoolError, PoolStats, ScratchBuffer, ScratchGuard};
pub use table::{EmbeddingTable, InsertError, LookupError, RowId};
pub use topk::{ScoredCandidate, ScoreOrdering, TopKSelector};
