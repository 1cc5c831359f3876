//! Reciprocal rank fusion of vector and fulltext result lists.
//!
//! RRF is score-agnostic: each list contributes `1 / (rank + k)` with
//! 1-based ranks, and a chunk's fused score is the sum over the lists that
//! returned it. Ordering is fully deterministic: ties on the fused score
//! fall back to the raw vector score when both candidates carry one, then
//! to the lexicographically lower chunk hash.

use std::collections::HashMap;

use lexgraph_store::ScoredChunk;

/// A chunk after fusion, with its per-source raw scores.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub chunk: ScoredChunk,
    pub fused_score: f32,
    pub vector_score: Option<f32>,
    pub fulltext_score: Option<f32>,
}

/// Fuse ranked vector and fulltext lists, keeping the top `k`.
pub fn fuse(
    vector_hits: Vec<ScoredChunk>,
    fulltext_hits: Vec<ScoredChunk>,
    rrf_k: u32,
    k: usize,
) -> Vec<FusedHit> {
    let rrf_k = rrf_k as f32;
    let mut fused: HashMap<String, FusedHit> = HashMap::new();

    for (rank, hit) in vector_hits.into_iter().enumerate() {
        let contribution = 1.0 / (rank as f32 + 1.0 + rrf_k);
        let score = hit.score;
        let entry = fused
            .entry(hit.chunk_hash.clone())
            .or_insert_with(|| FusedHit {
                chunk: hit,
                fused_score: 0.0,
                vector_score: None,
                fulltext_score: None,
            });
        entry.fused_score += contribution;
        entry.vector_score = Some(score);
    }

    for (rank, hit) in fulltext_hits.into_iter().enumerate() {
        let contribution = 1.0 / (rank as f32 + 1.0 + rrf_k);
        let score = hit.score;
        let entry = fused
            .entry(hit.chunk_hash.clone())
            .or_insert_with(|| FusedHit {
                chunk: hit,
                fused_score: 0.0,
                vector_score: None,
                fulltext_score: None,
            });
        entry.fused_score += contribution;
        entry.fulltext_score = Some(score);
    }

    let mut hits: Vec<FusedHit> = fused.into_values().collect();
    hits.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| match (a.vector_score, b.vector_score) {
                (Some(va), Some(vb)) => vb
                    .partial_cmp(&va)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.chunk.chunk_hash.cmp(&b.chunk.chunk_hash)),
                _ => a.chunk.chunk_hash.cmp(&b.chunk.chunk_hash),
            })
    });
    hits.truncate(k);
    hits
}
