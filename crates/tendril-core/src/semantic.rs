//! Semantic similarity utilities for embeddings and affect vectors.

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1], or `None` if the vectors have different
/// lengths or are empty/zero-norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&ai, &bi) in a.iter().zip(b.iter()) {
        dot += ai as f64 * bi as f64;
        norm_a += (ai as f64) * (ai as f64);
        norm_b += (bi as f64) * (bi as f64);
    }

    let norm = (norm_a * norm_b).sqrt();
    if norm == 0.0 {
        return None;
    }

    Some(dot / norm)
}

/// Element-wise mean of equally sized vectors.
///
/// Vectors whose length differs from the first one are skipped.
pub fn centroid<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum: Vec<f64> = Vec::new();
    let mut n = 0usize;
    for v in vectors {
        if n == 0 {
            if v.is_empty() {
                continue;
            }
            sum = v.iter().map(|&x| x as f64).collect();
            n = 1;
        } else if v.len() == sum.len() {
            for (s, &x) in sum.iter_mut().zip(v) {
                *s += x as f64;
            }
            n += 1;
        }
    }
    if n == 0 {
        return None;
    }
    Some(sum.into_iter().map(|s| (s / n as f64) as f32).collect())
}

/// Mean affect of a set of (valence, arousal) pairs.
pub fn affect_centroid<'a, I>(affects: I) -> Option<[f64; 2]>
where
    I: IntoIterator<Item = &'a [f32; 2]>,
{
    let mut sum = [0.0f64; 2];
    let mut n = 0usize;
    for a in affects {
        sum[0] += a[0] as f64;
        sum[1] += a[1] as f64;
        n += 1;
    }
    if n == 0 {
        return None;
    }
    Some([sum[0] / n as f64, sum[1] / n as f64])
}
