use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// A fixed-length embedding vector.
///
/// Arithmetic is element-wise and only defined between vectors of the same
/// dimension; a mismatch is reported as inconsistent data rather than padded
/// or truncated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f64>);

impl EmbeddingVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(dimensions: usize) -> Self {
        Self(vec![0.0; dimensions])
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    pub fn ensure_dimensions(&self, expected: usize) -> Result<(), DomainError> {
        if self.dimensions() != expected {
            return Err(DomainError::inconsistent(format!(
                "Expected embedding dimension {}, got {}",
                expected,
                self.dimensions()
            )));
        }
        Ok(())
    }

    /// Adds `other` into `self` element by element.
    pub fn accumulate(&mut self, other: &EmbeddingVector) -> Result<(), DomainError> {
        other.ensure_dimensions(self.dimensions())?;
        for (acc, v) in self.0.iter_mut().zip(other.0.iter()) {
            *acc += v;
        }
        Ok(())
    }

    pub fn scale(&mut self, factor: f64) {
        for v in self.0.iter_mut() {
            *v *= factor;
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        let mut out = self.clone();
        out.scale(factor);
        out
    }

    /// Returns `a * weight_a + b * weight_b`.
    pub fn weighted_sum(
        a: &EmbeddingVector,
        weight_a: f64,
        b: &EmbeddingVector,
        weight_b: f64,
    ) -> Result<Self, DomainError> {
        b.ensure_dimensions(a.dimensions())?;
        Ok(Self(
            a.0.iter()
                .zip(b.0.iter())
                .map(|(x, y)| x * weight_a + y * weight_b)
                .collect(),
        ))
    }

    /// Element-wise comparison with an absolute tolerance.
    pub fn approx_eq(&self, other: &EmbeddingVector, tolerance: f64) -> bool {
        self.dimensions() == other.dimensions()
            && self
                .0
                .iter()
                .zip(other.0.iter())
                .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

impl From<Vec<f64>> for EmbeddingVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}
