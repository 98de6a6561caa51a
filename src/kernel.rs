//! SIMD-optimized batch distance computation.
//!
//! Scores one query vector against N candidate rows stored contiguously in a
//! scratch buffer, using 8-wide SIMD lanes when available with fallback to
//! scalar implementations. Tail elements (`dim % 8`) are always handled by a
//! scalar loop.

use serde::{Deserialize, Serialize};
#[cfg(feature = "simd-optimized")]
use wide::f32x8;

use crate::topk::ScoreOrdering;

/// Distance/similarity metric for a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Cosine similarity; higher scores are better.
    Cosine,
    /// Euclidean (L2) distance; lower scores are better.
    Euclidean,
}

impl Metric {
    /// Ranking direction for scores produced under this metric.
    pub fn ordering(self) -> ScoreOrdering {
        match self {
            Metric::Cosine => ScoreOrdering::HigherIsBetter,
            Metric::Euclidean => ScoreOrdering::LowerIsBetter,
        }
    }
}

/// Trait for batched distance computation between a query and candidate rows.
pub trait DistanceKernel: Send + Sync {
    /// Compute one score per candidate row.
    ///
    /// `candidates` holds N rows of `dim` floats back to back; `out` receives
    /// exactly N scores.
    ///
    /// # Panics
    /// Panics if `query.len() != dim`, `candidates.len()` is not a multiple
    /// of `dim`, or `out.len()` does not match the row count. These are
    /// contract violations, not runtime-recoverable conditions.
    fn score_batch(&self, query: &[f32], candidates: &[f32], dim: usize, out: &mut [f32]);

    /// Metric this kernel computes.
    fn metric(&self) -> Metric;

    /// Whether this implementation uses SIMD lanes.
    fn is_simd(&self) -> bool {
        false
    }
}

/// Create the most optimized kernel available for the given metric.
pub fn kernel_for(metric: Metric) -> Box<dyn DistanceKernel> {
    #[cfg(all(
        feature = "simd-optimized",
        any(target_arch = "x86", target_arch = "x86_64")
    ))]
    {
        if std::is_x86_feature_detected!("avx2") {
            return match metric {
                Metric::Cosine => Box::new(CosineSimd),
                Metric::Euclidean => Box::new(EuclideanSimd),
            };
        }
    }

    match metric {
        Metric::Cosine => Box::new(CosineScalar),
        Metric::Euclidean => Box::new(EuclideanScalar),
    }
}

fn check_batch_contract(query: &[f32], candidates: &[f32], dim: usize, out: &[f32]) {
    assert!(dim > 0, "dimension must be non-zero");
    assert_eq!(
        query.len(),
        dim,
        "query length {} does not match dimension {}",
        query.len(),
        dim
    );
    assert_eq!(
        candidates.len() % dim,
        0,
        "candidate buffer length {} is not a multiple of dimension {}",
        candidates.len(),
        dim
    );
    assert_eq!(
        out.len(),
        candidates.len() / dim,
        "output slice length {} does not match candidate row count {}",
        out.len(),
        candidates.len() / dim
    );
}

/// Cosine score from the three accumulated sums, with the zero-vector
/// convention: a degenerate norm yields 0.0, never NaN.
#[inline]
fn finish_cosine(dot: f32, norm_q: f32, norm_r: f32) -> f32 {
    if norm_q <= 0.0 || norm_r <= 0.0 {
        return 0.0;
    }
    let denom = norm_q.sqrt() * norm_r.sqrt();
    if !denom.is_finite() || denom == 0.0 {
        return 0.0;
    }
    let result = dot / denom;
    if !result.is_finite() {
        return 0.0;
    }
    result.clamp(-1.0, 1.0)
}

// =============================================================================
// SIMD implementations
// =============================================================================

#[cfg(feature = "simd-optimized")]
pub struct CosineSimd;

#[cfg(feature = "simd-optimized")]
impl DistanceKernel for CosineSimd {
    fn score_batch(&self, query: &[f32], candidates: &[f32], dim: usize, out: &mut [f32]) {
        check_batch_contract(query, candidates, dim, out);

        for (row, slot) in candidates.chunks_exact(dim).zip(out.iter_mut()) {
            let mut dot = f32x8::ZERO;
            let mut norm_q = f32x8::ZERO;
            let mut norm_r = f32x8::ZERO;
            let chunks = dim / 8;

            for i in 0..chunks {
                let base = i * 8;
                let vq = f32x8::new([
                    query[base],
                    query[base + 1],
                    query[base + 2],
                    query[base + 3],
                    query[base + 4],
                    query[base + 5],
                    query[base + 6],
                    query[base + 7],
                ]);
                let vr = f32x8::new([
                    row[base],
                    row[base + 1],
                    row[base + 2],
                    row[base + 3],
                    row[base + 4],
                    row[base + 5],
                    row[base + 6],
                    row[base + 7],
                ]);

                dot += vq * vr;
                norm_q += vq * vq;
                norm_r += vr * vr;
            }

            // Horizontal reduction, then the scalar tail.
            let mut dot_sum = dot.reduce_add();
            let mut norm_q_sum = norm_q.reduce_add();
            let mut norm_r_sum = norm_r.reduce_add();

            for i in (chunks * 8)..dim {
                dot_sum += query[i] * row[i];
                norm_q_sum += query[i] * query[i];
                norm_r_sum += row[i] * row[i];
            }

            *slot = finish_cosine(dot_sum, norm_q_sum, norm_r_sum);
        }
    }

    fn metric(&self) -> Metric {
        Metric::Cosine
    }

    fn is_simd(&self) -> bool {
        true
    }
}

#[cfg(feature = "simd-optimized")]
pub struct EuclideanSimd;

#[cfg(feature = "simd-optimized")]
impl DistanceKernel for EuclideanSimd {
    fn score_batch(&self, query: &[f32], candidates: &[f32], dim: usize, out: &mut [f32]) {
        check_batch_contract(query, candidates, dim, out);

        for (row, slot) in candidates.chunks_exact(dim).zip(out.iter_mut()) {
            let mut sum = f32x8::ZERO;
            let chunks = dim / 8;

            for i in 0..chunks {
                let base = i * 8;
                let vq = f32x8::new([
                    query[base],
                    query[base + 1],
                    query[base + 2],
                    query[base + 3],
                    query[base + 4],
                    query[base + 5],
                    query[base + 6],
                    query[base + 7],
                ]);
                let vr = f32x8::new([
                    row[base],
                    row[base + 1],
                    row[base + 2],
                    row[base + 3],
                    row[base + 4],
                    row[base + 5],
                    row[base + 6],
                    row[base + 7],
                ]);

                let diff = vq - vr;
                sum += diff * diff;
            }

            let mut scalar_sum = sum.reduce_add();
            for i in (chunks * 8)..dim {
                let diff = query[i] - row[i];
                scalar_sum += diff * diff;
            }

            *slot = scalar_sum.sqrt();
        }
    }

    fn metric(&self) -> Metric {
        Metric::Euclidean
    }

    fn is_simd(&self) -> bool {
        true
    }
}

// =============================================================================
// Scalar implementations (fallback)
// =============================================================================

pub struct CosineScalar;

impl DistanceKernel for CosineScalar {
    fn score_batch(&self, query: &[f32], candidates: &[f32], dim: usize, out: &mut [f32]) {
        check_batch_contract(query, candidates, dim, out);

        for (row, slot) in candidates.chunks_exact(dim).zip(out.iter_mut()) {
            let mut dot = 0.0f32;
            let mut norm_q = 0.0f32;
            let mut norm_r = 0.0f32;
            for (&q, &r) in query.iter().zip(row.iter()) {
                dot += q * r;
                norm_q += q * q;
                norm_r += r * r;
            }
            *slot = finish_cosine(dot, norm_q, norm_r);
        }
    }

    fn metric(&self) -> Metric {
        Metric::Cosine
    }
}

pub struct EuclideanScalar;

impl DistanceKernel for EuclideanScalar {
    fn score_batch(&self, query: &[f32], candidates: &[f32], dim: usize, out: &mut [f32]) {
        check_batch_contract(query, candidates, dim, out);

        for (row, slot) in candidates.chunks_exact(dim).zip(out.iter_mut()) {
            let sum: f32 = query
                .iter()
                .zip(row.iter())
                .map(|(q, r)| (q - r) * (q - r))
                .sum();
            *slot = sum.sqrt();
        }
    }

    fn metric(&self) -> Metric {
        Metric::Euclidean
    }
}
