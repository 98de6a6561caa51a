//! Query orchestration: gather, score, select, release.
//!
//! [`SearchEngine`] is the only surface callers interact with. Each query
//! runs synchronously on the caller's thread: validate, rent pooled scratch,
//! gather all live rows, run the distance kernel, select top-k, and return.
//! Scratch buffers go back to the pool on every exit path because they are
//! held through drop guards.

use crate::kernel::{kernel_for, DistanceKernel, Metric};
use crate::pool::{BufferPool, PoolError, PoolStats};
use crate::table::{EmbeddingTable, LookupError};
use crate::topk::{ScoredCandidate, TopKSelector};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Errors surfaced by [`SearchEngine::query`].
#[derive(Debug, PartialEq)]
pub enum SearchError {
    /// Query vector length does not match the table dimension.
    DimensionMismatch { expected: usize, got: usize },
    /// The pool could not provide scratch memory for this query.
    Pool(PoolError),
    /// A row-level gather hit an unknown or tombstoned id. The engine's own
    /// scans copy live rows only, so seeing this from `query` indicates a
    /// consistency bug; hosts driving `EmbeddingTable::gather` with their own
    /// id lists surface it here.
    Lookup(LookupError),
}

impl std::fmt::Display for SearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchError::DimensionMismatch { expected, got } => {
                write!(f, "query dimension mismatch: expected {}, got {}", expected, got)
            }
            SearchError::Pool(e) => write!(f, "scratch pool failure: {}", e),
            SearchError::Lookup(e) => write!(f, "gather failure: {}", e),
        }
    }
}

impl std::error::Error for SearchError {}

impl From<PoolError> for SearchError {
    fn from(e: PoolError) -> Self {
        SearchError::Pool(e)
    }
}

impl From<LookupError> for SearchError {
    fn from(e: LookupError) -> Self {
        SearchError::Lookup(e)
    }
}

/// Ranked result of one query: at most k candidates, best first, ties broken
/// by ascending row id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub candidates: Vec<ScoredCandidate>,
}

impl SearchResult {
    fn empty() -> Self {
        Self { candidates: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredCandidate> {
        self.candidates.iter()
    }
}

/// Timing and volume of the most recent scan.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SearchStats {
    pub duration_micros: u64,
    pub rows_scanned: usize,
    pub k: usize,
    pub metric: Metric,
}

/// Point-in-time view of the engine and its pool.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub rows: usize,
    pub live_rows: usize,
    pub dimension: usize,
    pub pool: PoolStats,
    pub last_search: Option<SearchStats>,
}

/// Brute-force similarity search over one embedding table.
pub struct SearchEngine {
    table: Arc<RwLock<EmbeddingTable>>,
    pool: BufferPool,
    /// Kernels are dispatched once at construction, not boxed per query.
    cosine: Box<dyn DistanceKernel>,
    euclidean: Box<dyn DistanceKernel>,
    last_search: Mutex<Option<SearchStats>>,
}

impl SearchEngine {
    pub fn new(table: Arc<RwLock<EmbeddingTable>>, pool: BufferPool) -> Self {
        Self {
            table,
            pool,
            cosine: kernel_for(Metric::Cosine),
            euclidean: kernel_for(Metric::Euclidean),
            last_search: Mutex::new(None),
        }
    }

    fn kernel(&self, metric: Metric) -> &dyn DistanceKernel {
        match metric {
            Metric::Cosine => self.cosine.as_ref(),
            Metric::Euclidean => self.euclidean.as_ref(),
        }
    }

    /// Shared handle to the underlying table, for inserts and tombstones.
    /// Writers take the write lock; in-flight queries hold read locks for
    /// the duration of their scan.
    pub fn table(&self) -> Arc<RwLock<EmbeddingTable>> {
        Arc::clone(&self.table)
    }

    /// Score `vector` against every live row and return the best `k`.
    ///
    /// `k == 0` yields an empty result; `k` beyond the live row count is
    /// clamped rather than rejected.
    pub fn query(
        &self,
        vector: &[f32],
        k: usize,
        metric: Metric,
    ) -> Result<SearchResult, SearchError> {
        let started = Instant::now();
        let table = self.table.read();
        let dim = table.dim();

        if vector.len() != dim {
            return Err(SearchError::DimensionMismatch {
                expected: dim,
                got: vector.len(),
            });
        }
        if k == 0 {
            return Ok(SearchResult::empty());
        }

        let live = table.live_len();
        if live == 0 {
            return Ok(SearchResult::empty());
        }
        let k = if k > live {
            warn!(requested = k, live, "k clamped to live row count");
            live
        } else {
            k
        };

        // Both regions come from the pool; the guards return them even if
        // gather or the kernel bails out early.
        let mut scratch = self.pool.rent(live * dim)?;
        let mut scores = self.pool.rent(live)?;

        let copied = table.gather_live(&mut scratch);
        debug_assert_eq!(copied, live);

        let kernel = self.kernel(metric);
        let out = &mut scores.space()[..live];
        kernel.score_batch(vector, scratch.filled(), dim, out);

        // Scores are positional in gather order, which matches live_ids, so
        // the scan needs no materialized id list.
        let mut selector = TopKSelector::new(k, metric.ordering());
        for (id, &score) in table.live_ids().zip(out.iter()) {
            selector.offer(id, score);
        }
        let candidates = selector.into_sorted();

        let stats = SearchStats {
            duration_micros: started.elapsed().as_micros() as u64,
            rows_scanned: live,
            k,
            metric,
        };
        debug!(
            rows = stats.rows_scanned,
            k = stats.k,
            ?metric,
            micros = stats.duration_micros,
            "scan complete"
        );
        *self.last_search.lock() = Some(stats);

        Ok(SearchResult { candidates })
    }

    /// Offload a query to the blocking thread pool. The scan is CPU-bound,
    /// so async callers should not run it on a reactor thread.
    pub async fn query_owned(
        self: Arc<Self>,
        vector: Vec<f32>,
        k: usize,
        metric: Metric,
    ) -> Result<SearchResult, SearchError> {
        tokio::task::spawn_blocking(move || self.query(&vector, k, metric))
            .await
            .expect("scan task panicked")
    }

    pub fn stats(&self) -> EngineStats {
        let table = self.table.read();
        EngineStats {
            rows: table.len(),
            live_rows: table.live_len(),
            dimension: table.dim(),
            pool: self.pool.stats(),
            last_search: *self.last_search.lock(),
        }
    }
}
