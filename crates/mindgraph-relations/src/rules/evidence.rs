//! Named cosine-threshold tests over per-field embeddings.
//!
//! A missing field embedding is simply "no evidence"; it never raises.

use mindgraph_core::{Field, HasEmbeddingFields};

/// One fired evidence pattern and the similarity that cleared it.
#[derive(Debug, Clone, PartialEq)]
pub struct Evidence {
    pub name: String,
    pub similarity: f64,
}

impl Evidence {
    pub fn new(name: impl Into<String>, similarity: f64) -> Self {
        Self {
            name: name.into(),
            similarity,
        }
    }
}

/// Cosine similarity; `None` for mismatched lengths or zero vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some(dot / (na.sqrt() * nb.sqrt()))
}

pub fn field_similarity<A, B>(a: &A, field_a: Field, b: &B, field_b: Field) -> Option<f64>
where
    A: HasEmbeddingFields + ?Sized,
    B: HasEmbeddingFields + ?Sized,
{
    cosine(a.field_embedding(field_a)?, b.field_embedding(field_b)?)
}

/// `action→theme`
pub fn pattern_name(field_a: Field, field_b: Field) -> String {
    format!("{}→{}", field_a, field_b)
}

/// Fires when `cos(a.field_a, b.field_b) >= threshold`.
pub fn check<A, B>(a: &A, field_a: Field, b: &B, field_b: Field, threshold: f64) -> Option<Evidence>
where
    A: HasEmbeddingFields + ?Sized,
    B: HasEmbeddingFields + ?Sized,
{
    let similarity = field_similarity(a, field_a, b, field_b)?;
    (similarity >= threshold).then(|| Evidence::new(pattern_name(field_a, field_b), similarity))
}

/// Fires when `cos(a.field_a, b.field_b) > threshold`.
pub fn check_strict<A, B>(
    a: &A,
    field_a: Field,
    b: &B,
    field_b: Field,
    threshold: f64,
) -> Option<Evidence>
where
    A: HasEmbeddingFields + ?Sized,
    B: HasEmbeddingFields + ?Sized,
{
    let similarity = field_similarity(a, field_a, b, field_b)?;
    (similarity > threshold).then(|| Evidence::new(pattern_name(field_a, field_b), similarity))
}

/// `action→theme=0.850, target→subject=0.731`
pub fn format_reason(evidence: &[Evidence]) -> String {
    evidence
        .iter()
        .map(|e| format!("{}={:.3}", e.name, e.similarity))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn mean_similarity(evidence: &[Evidence]) -> f64 {
    if evidence.is_empty() {
        return 0.0;
    }
    evidence.iter().map(|e| e.similarity).sum::<f64>() / evidence.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mindgraph_core::Goal;

    #[test]
    fn test_cosine_edge_cases() {
        assert_relative_eq!(cosine(&[1.0, 0.0], &[2.0, 0.0]).unwrap(), 1.0);
        assert!(cosine(&[0.0, 0.0], &[1.0, 0.0]).is_none());
        assert!(cosine(&[1.0], &[1.0, 0.0]).is_none());
        assert!(cosine(&[], &[]).is_none());
    }

    #[test]
    fn test_missing_embedding_is_no_evidence() {
        let a = Goal::new("a", "x", 1).with_field_embedding(Field::Action, vec![1.0, 0.0]);
        let b = Goal::new("b", "y", 2);
        assert!(check(&a, Field::Action, &b, Field::Theme, 0.0).is_none());
    }

    #[test]
    fn test_threshold_inclusive_vs_strict() {
        let a = Goal::new("a", "x", 1).with_field_embedding(Field::Theme, vec![1.0, 0.0]);
        let b = Goal::new("b", "y", 2).with_field_embedding(Field::Theme, vec![1.0, 0.0]);
        assert!(check(&a, Field::Theme, &b, Field::Theme, 1.0).is_some());
        assert!(check_strict(&a, Field::Theme, &b, Field::Theme, 1.0).is_none());
    }

    #[test]
    fn test_reason_format() {
        let evidence = vec![
            Evidence::new("action→theme", 0.85),
            Evidence::new("action→subject", 0.7512),
        ];
        assert_eq!(
            format_reason(&evidence),
            "action→theme=0.850, action→subject=0.751"
        );
        assert_relative_eq!(mean_similarity(&evidence), 0.8006);
    }
}
