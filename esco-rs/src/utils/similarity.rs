//! Vector helpers for stored embeddings.

use ndarray::ArrayView1;

/// Cosine similarity between two vectors.
///
/// Returns `0.0` when either side is empty or all-zero, or when lengths
/// differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (a, b) = (ArrayView1::from(a), ArrayView1::from(b));
    let denom = a.dot(&a).sqrt() * b.dot(&b).sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    a.dot(&b) / denom
}

/// Scale `v` to unit L2 length in place. Zero vectors are left untouched.
pub fn normalize_l2(v: &mut [f32]) {
    let norm = ArrayView1::from(&*v).dot(&ArrayView1::from(&*v)).sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return;
    }
    v.iter_mut().for_each(|x| *x /= norm);
}
