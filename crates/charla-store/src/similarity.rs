//! Cosine similarity over embedding vectors stored as JSON arrays.

/// Cosine similarity in [-1, 1]. Returns 0 for mismatched or zero-norm
/// vectors so degenerate rows sort last instead of poisoning the ranking.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Rank `items` by similarity to `query` (descending) and keep the top `k`.
/// Ties break by the caller-supplied priority, highest first.
pub fn top_k<T>(
    items: Vec<T>,
    query: &[f32],
    k: usize,
    embedding_of: impl Fn(&T) -> &[f32],
    priority_of: impl Fn(&T) -> i64,
) -> Vec<(T, f32)> {
    let mut scored: Vec<(T, f32)> = items
        .into_iter()
        .map(|item| {
            let score = cosine(query, embedding_of(&item));
            (item, score)
        })
        .collect();
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| priority_of(b).cmp(&priority_of(a)))
    });
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![0.5, -0.25, 1.0];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn mismatched_or_zero_vectors_score_zero() {
        assert_eq!(cosine(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine(&[], &[]), 0.0);
    }

    #[test]
    fn top_k_ranks_and_breaks_ties_by_priority() {
        let items = vec![
            ("far", vec![0.0f32, 1.0], 5),
            ("near_low", vec![1.0f32, 0.0], 1),
            ("near_high", vec![1.0f32, 0.0], 9),
        ];
        let ranked = top_k(items, &[1.0, 0.0], 2, |i| &i.1, |i| i.2);
        assert_eq!(ranked[0].0 .0, "near_high");
        assert_eq!(ranked[1].0 .0, "near_low");
    }
}
