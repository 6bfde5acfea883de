use std::cmp::Ordering;

use rayon::prelude::*;

use crate::memory::{EmbeddingRecord, Role};

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for i in 0..a.len().min(b.len()) {
        let x = a[i];
        let y = b[i];
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Score every stored user record that carries an embedding of the query's
/// width. Returns (index, score) for scores strictly above `min_score`, best
/// first, at most `top_k`.
pub fn search_user_records(records: &[EmbeddingRecord], query: &[f32], top_k: usize, min_score: f32) -> Vec<(usize, f32)> {
    let mut hits: Vec<(usize, f32)> = records
        .par_iter()
        .enumerate()
        .filter_map(|(i, rec)| {
            if rec.kind != Role::User {
                return None;
            }
            let emb = rec.embedding.as_deref()?;
            // Vectors from a different model are not comparable.
            if emb.len() != query.len() {
                return None;
            }
            Some((i, cosine_similarity(query, emb)))
        })
        .collect();
    // stable sort keeps earlier turns first on equal scores
    hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    hits.truncate(top_k);
    hits.retain(|(_, s)| *s > min_score);
    hits
}
