//! Maximal Marginal Relevance reranking.
//!
//! MMR greedily balances relevance against redundancy:
//! `score(c) = λ·sim(query, c) − (1−λ)·max_{s ∈ selected} sim(c, s)`
//! with λ = 1.0 pure relevance and λ = 0.0 pure diversity. Similarity is
//! cosine throughout, computed from the candidate vectors themselves, so
//! the result is independent of which index metric produced the
//! candidate ordering.

use crate::vector::math::{cosine_similarity, magnitude};

/// Greedily selects up to `k` diverse candidates, returning their indices
/// into `candidates` in selection order.
///
/// `candidates` must be ordered by relevance (ascending distance to the
/// query): score ties resolve to the earlier index, so the candidate
/// closer to the query wins. `k` larger than the candidate count clamps;
/// an empty candidate set yields an empty selection. Runs in
/// O(k × n) similarity evaluations by keeping, per remaining candidate,
/// its maximum similarity to the selected set and folding in one new
/// column per selection.
pub fn mmr_select(query: &[f32], candidates: &[Vec<f32>], k: usize, lambda: f32) -> Vec<usize> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }
    let k = k.min(candidates.len());

    let query_mag = magnitude(query);
    let mags: Vec<f32> = candidates.iter().map(|v| magnitude(v)).collect();
    let relevance: Vec<f32> = candidates
        .iter()
        .zip(&mags)
        .map(|(v, &m)| cosine_similarity(query, v, Some(query_mag), Some(m)))
        .collect();

    let mut max_to_selected = vec![f32::NEG_INFINITY; candidates.len()];
    let mut picked = vec![false; candidates.len()];
    let mut selected = Vec::with_capacity(k);

    for _ in 0..k {
        let mut best: Option<usize> = None;
        let mut best_score = f32::NEG_INFINITY;
        for idx in 0..candidates.len() {
            if picked[idx] {
                continue;
            }
            let redundancy = if selected.is_empty() {
                0.0
            } else {
                max_to_selected[idx]
            };
            let score = lambda * relevance[idx] - (1.0 - lambda) * redundancy;
            // Strictly greater keeps the earlier-ranked candidate on ties.
            if score > best_score {
                best_score = score;
                best = Some(idx);
            }
        }
        let Some(chosen) = best else { break };
        picked[chosen] = true;
        selected.push(chosen);

        for idx in 0..candidates.len() {
            if picked[idx] {
                continue;
            }
            let sim = cosine_similarity(
                &candidates[chosen],
                &candidates[idx],
                Some(mags[chosen]),
                Some(mags[idx]),
            );
            if sim > max_to_selected[idx] {
                max_to_selected[idx] = sim;
            }
        }
    }

    selected
}
