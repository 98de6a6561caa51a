//! Property tests: dispatched kernels against a double-precision scalar
//! reference across dimensions that exercise full lanes and scalar tails.

use proptest::prelude::*;
use vecscan::{kernel_for, Metric};

const DIMS: &[usize] = &[1, 3, 7, 8, 15, 16, 127, 128];

fn cosine_reference_f64(query: &[f32], row: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_q = 0.0f64;
    let mut norm_r = 0.0f64;
    for (&q, &r) in query.iter().zip(row.iter()) {
        dot += q as f64 * r as f64;
        norm_q += q as f64 * q as f64;
        norm_r += r as f64 * r as f64;
    }
    if norm_q <= 0.0 || norm_r <= 0.0 {
        return 0.0;
    }
    ((dot / (norm_q.sqrt() * norm_r.sqrt())).clamp(-1.0, 1.0)) as f32
}

fn euclidean_reference_f64(query: &[f32], row: &[f32]) -> f32 {
    let sum: f64 = query
        .iter()
        .zip(row.iter())
        .map(|(&q, &r)| (q as f64 - r as f64) * (q as f64 - r as f64))
        .sum();
    sum.sqrt() as f32
}

/// (dim, query, candidate batch) over the dimension set above.
fn dim_and_batch() -> impl Strategy<Value = (usize, Vec<f32>, Vec<f32>)> {
    (0..DIMS.len(), 1usize..6).prop_flat_map(|(dim_index, rows)| {
        let dim = DIMS[dim_index];
        (
            Just(dim),
            proptest::collection::vec(-10.0f32..10.0, dim),
            proptest::collection::vec(-10.0f32..10.0, dim * rows),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cosine_matches_f64_reference((dim, query, candidates) in dim_and_batch()) {
        let kernel = kernel_for(Metric::Cosine);
        let rows = candidates.len() / dim;
        let mut out = vec![0.0f32; rows];
        kernel.score_batch(&query, &candidates, dim, &mut out);

        for (row, &got) in candidates.chunks_exact(dim).zip(out.iter()) {
            let expected = cosine_reference_f64(&query, row);
            prop_assert!(
                (got - expected).abs() < 1e-4,
                "dim={} got={} expected={}", dim, got, expected
            );
        }
    }

    #[test]
    fn euclidean_matches_f64_reference((dim, query, candidates) in dim_and_batch()) {
        let kernel = kernel_for(Metric::Euclidean);
        let rows = candidates.len() / dim;
        let mut out = vec![0.0f32; rows];
        kernel.score_batch(&query, &candidates, dim, &mut out);

        for (row, &got) in candidates.chunks_exact(dim).zip(out.iter()) {
            let expected = euclidean_reference_f64(&query, row);
            prop_assert!(
                (got - expected).abs() < 1e-4 * (1.0 + expected.abs()),
                "dim={} got={} expected={}", dim, got, expected
            );
        }
    }

    #[test]
    fn cosine_is_symmetric((dim, a, b_batch) in dim_and_batch()) {
        let b = &b_batch[..dim];
        let kernel = kernel_for(Metric::Cosine);
        let mut ab = [0.0f32];
        let mut ba = [0.0f32];
        kernel.score_batch(&a, b, dim, &mut ab);
        kernel.score_batch(b, &a, dim, &mut ba);
        prop_assert_eq!(ab[0], ba[0]);
    }
}
