use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::threshold::ParseError;

#[derive(Debug, Error, PartialEq)]
pub enum DistanceError {
    #[error("Embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("Cannot compare a zero-norm embedding")]
    ZeroNorm,
}

/// Face embedding as produced by a recognition model
pub type Embedding = Array1<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    #[serde(rename = "euclidean_l2")]
    EuclideanL2,
}

impl DistanceMetric {
    pub const ALL: [DistanceMetric; 3] = [
        DistanceMetric::Cosine,
        DistanceMetric::Euclidean,
        DistanceMetric::EuclideanL2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|metric| metric.as_str() == s)
            .ok_or_else(|| ParseError::Metric(s.to_string()))
    }
}

fn check_dimensions(a: &Embedding, b: &Embedding) -> Result<(), DistanceError> {
    if a.len() != b.len() {
        return Err(DistanceError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}

/// Cosine distance `1 - a·b / (|a||b|)`, in `[0, 2]`
pub fn cosine_distance(a: &Embedding, b: &Embedding) -> Result<f64, DistanceError> {
    check_dimensions(a, b)?;

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(DistanceError::ZeroNorm);
    }

    let distance = 1.0 - dot / (norm_a * norm_b).sqrt();
    Ok(distance.clamp(0.0, 2.0))
}

/// Euclidean (L2) distance between two embeddings
pub fn euclidean_distance(a: &Embedding, b: &Embedding) -> Result<f64, DistanceError> {
    check_dimensions(a, b)?;

    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum();
    Ok(sum.sqrt())
}

fn l2_norm(embedding: &Embedding) -> f64 {
    embedding
        .iter()
        .map(|&x| (x as f64) * (x as f64))
        .sum::<f64>()
        .sqrt()
}

/// L2 normalize an embedding vector. A zero vector is returned unchanged.
pub fn l2_normalize(embedding: &Embedding) -> Embedding {
    let norm = l2_norm(embedding);
    if norm > 0.0 {
        embedding.mapv(|x| (x as f64 / norm) as f32)
    } else {
        embedding.clone()
    }
}

/// Euclidean distance after L2 normalization, in `[0, 2]`
///
/// A zero-norm embedding has no direction and is rejected, as for cosine.
pub fn euclidean_l2_distance(a: &Embedding, b: &Embedding) -> Result<f64, DistanceError> {
    check_dimensions(a, b)?;
    if l2_norm(a) == 0.0 || l2_norm(b) == 0.0 {
        return Err(DistanceError::ZeroNorm);
    }
    euclidean_distance(&l2_normalize(a), &l2_normalize(b))
}

/// Distance between two embeddings under the given metric
pub fn find_distance(
    a: &Embedding,
    b: &Embedding,
    metric: DistanceMetric,
) -> Result<f64, DistanceError> {
    match metric {
        DistanceMetric::Cosine => cosine_distance(a, b),
        DistanceMetric::Euclidean => euclidean_distance(a, b),
        DistanceMetric::EuclideanL2 => euclidean_l2_distance(a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn norm(v: &Embedding) -> f64 {
        v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt()
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let vectors = [
            arr1(&[1.0, 0.0, 0.0]),
            arr1(&[0.3, -2.5, 7.25, 11.0]),
            arr1(&[1e-3, 4e3, -17.0]),
        ];
        for v in &vectors {
            assert!(cosine_distance(v, v).unwrap().abs() < 1e-12);
            assert_eq!(euclidean_distance(v, v).unwrap(), 0.0);
            assert!(find_distance(v, v, DistanceMetric::EuclideanL2).unwrap() < 1e-6);
        }
    }

    #[test]
    fn test_cosine_distance_range() {
        let a = arr1(&[1.0, 2.0, 3.0]);
        let opposite = arr1(&[-1.0, -2.0, -3.0]);
        let orthogonal = arr1(&[0.0, 3.0, -2.0]);

        let d = cosine_distance(&a, &opposite).unwrap();
        assert!((d - 2.0).abs() < 1e-9);
        assert!(d <= 2.0);

        let d = cosine_distance(&a, &orthogonal).unwrap();
        assert!((d - 1.0).abs() < 1e-9);

        let pairs = [
            (arr1(&[0.1, 0.9]), arr1(&[0.8, -0.2])),
            (arr1(&[5.0, 5.0]), arr1(&[4.0, 6.0])),
            (arr1(&[-3.0, 1.0]), arr1(&[2.0, 2.0])),
        ];
        for (x, y) in &pairs {
            let d = cosine_distance(x, y).unwrap();
            assert!((0.0..=2.0).contains(&d), "cosine distance {} out of range", d);
        }
    }

    #[test]
    fn test_euclidean_distance() {
        let a = arr1(&[0.0, 0.0]);
        let b = arr1(&[3.0, 4.0]);
        assert!((euclidean_distance(&a, &b).unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = arr1(&[1.0, 2.0, 3.0]);
        let b = arr1(&[1.0, 2.0]);
        assert_eq!(
            cosine_distance(&a, &b),
            Err(DistanceError::DimensionMismatch { left: 3, right: 2 })
        );
        assert_eq!(
            euclidean_distance(&a, &b),
            Err(DistanceError::DimensionMismatch { left: 3, right: 2 })
        );
        assert!(find_distance(&a, &b, DistanceMetric::EuclideanL2).is_err());
    }

    #[test]
    fn test_cosine_zero_norm() {
        let a = arr1(&[0.0, 0.0]);
        let b = arr1(&[1.0, 0.0]);
        assert_eq!(cosine_distance(&a, &b), Err(DistanceError::ZeroNorm));
    }

    #[test]
    fn test_euclidean_l2_zero_norm() {
        let zero = Embedding::zeros(4);
        let unit = arr1(&[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(
            find_distance(&zero, &zero, DistanceMetric::EuclideanL2),
            Err(DistanceError::ZeroNorm)
        );
        assert_eq!(
            euclidean_l2_distance(&unit, &zero),
            Err(DistanceError::ZeroNorm)
        );
        // Plain euclidean has no direction requirement
        assert_eq!(find_distance(&zero, &zero, DistanceMetric::Euclidean), Ok(0.0));
    }

    #[test]
    fn test_l2_normalize_unit_norm_and_idempotent() {
        let v = arr1(&[3.0, 4.0]);
        let normalized = l2_normalize(&v);
        assert!((norm(&normalized) - 1.0).abs() < 1e-6);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);

        let twice = l2_normalize(&normalized);
        for (x, y) in normalized.iter().zip(twice.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let v = Embedding::zeros(128);
        let normalized = l2_normalize(&v);
        assert!(normalized.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_euclidean_l2_matches_normalized_euclidean() {
        let a = arr1(&[2.0, 0.0]);
        let b = arr1(&[0.0, 5.0]);
        let d = find_distance(&a, &b, DistanceMetric::EuclideanL2).unwrap();
        assert!((d - 2.0f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_metric_names() {
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!(
            "euclidean_l2".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::EuclideanL2
        );
        assert!("manhattan".parse::<DistanceMetric>().is_err());
        assert_eq!(DistanceMetric::Euclidean.to_string(), "euclidean");
    }
}
