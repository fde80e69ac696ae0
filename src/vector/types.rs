//! Hypervector type and the algebra used across the engine.
//!
//! Vectors are immutable and reference counted: cloning a memory (which the
//! consolidation working copies do for every stage) shares the underlying
//! components instead of copying ten thousand floats.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A fixed-length, real-valued hypervector.
///
/// # Example
///
/// ```ignore
/// let a = Hypervector::new(vec![1.0, 0.0, 0.0]);
/// let b = Hypervector::new(vec![0.9, 0.1, 0.0]);
/// let similarity = a.cosine_similarity(&b);
/// ```
#[derive(Debug, Clone)]
pub struct Hypervector {
    data: Arc<[f32]>,
}

impl Serialize for Hypervector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.data.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Hypervector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let data = Vec::<f32>::deserialize(deserializer)?;
        Ok(Hypervector::new(data))
    }
}

impl Hypervector {
    /// Wrap raw components.
    pub fn new(data: Vec<f32>) -> Self {
        Self {
            data: Arc::from(data.into_boxed_slice()),
        }
    }

    /// All-zero vector of the given length.
    pub fn zeros(dimensions: usize) -> Self {
        Self::new(vec![0.0; dimensions])
    }

    /// Get the components as a slice.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Get the number of dimensions.
    pub fn dimensions(&self) -> usize {
        self.data.len()
    }

    /// L2 norm.
    pub fn magnitude(&self) -> f32 {
        self.data.iter().map(|&x| x * x).sum::<f32>().sqrt()
    }

    /// Whether every component is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Compute cosine similarity with another vector.
    ///
    /// Returns None if dimensions don't match, and 0.0 when either vector is
    /// all zeros.
    pub fn cosine_similarity(&self, other: &Hypervector) -> Option<f32> {
        if self.dimensions() != other.dimensions() {
            return None;
        }

        let dot_product: f32 = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum();

        let mag_a = self.magnitude();
        let mag_b = other.magnitude();

        if mag_a == 0.0 || mag_b == 0.0 {
            return Some(0.0);
        }

        Some(dot_product / (mag_a * mag_b))
    }

    /// Cosine similarity, treating incomparable vectors as unrelated.
    pub fn similarity(&self, other: &Hypervector) -> f32 {
        self.cosine_similarity(other).unwrap_or(0.0)
    }

    /// Compute Euclidean distance to another vector.
    ///
    /// Returns None if dimensions don't match.
    pub fn euclidean_distance(&self, other: &Hypervector) -> Option<f32> {
        if self.dimensions() != other.dimensions() {
            return None;
        }

        let sum_sq_diff: f32 = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| {
                let diff = a - b;
                diff * diff
            })
            .sum();

        Some(sum_sq_diff.sqrt())
    }

    /// Unit-length copy; a zero vector stays zero.
    pub fn normalized(&self) -> Hypervector {
        let mut data = self.data.to_vec();
        normalize(&mut data);
        Hypervector::new(data)
    }

    /// Copy with every component multiplied by `factor`.
    pub fn scaled(&self, factor: f32) -> Hypervector {
        Hypervector::new(self.data.iter().map(|x| x * factor).collect())
    }

    /// Binding ⊗: element-wise product.
    pub fn bind(&self, other: &Hypervector) -> Option<Hypervector> {
        if self.dimensions() != other.dimensions() {
            return None;
        }
        Some(Hypervector::new(
            self.data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| a * b)
                .collect(),
        ))
    }

    /// Bundling ⊕: element-wise superposition, normalized.
    ///
    /// Vectors whose length differs from the first are skipped. Returns None
    /// for an empty input.
    pub fn bundle<'a, I>(vectors: I) -> Option<Hypervector>
    where
        I: IntoIterator<Item = &'a Hypervector>,
    {
        let mut iter = vectors.into_iter();
        let first = iter.next()?;
        let mut sum = first.data.to_vec();
        let dims = sum.len();
        for v in iter.filter(|v| v.dimensions() == dims) {
            for (acc, x) in sum.iter_mut().zip(v.data.iter()) {
                *acc += x;
            }
        }
        normalize(&mut sum);
        Some(Hypervector::new(sum))
    }

    /// Permutation Π: cyclic shift of coordinates by `shifts`.
    pub fn permute(&self, shifts: usize) -> Hypervector {
        let n = self.dimensions();
        if n == 0 {
            return self.clone();
        }
        let shifts = shifts % n;
        let mut data = vec![0.0f32; n];
        for (i, &x) in self.data.iter().enumerate() {
            data[(i + shifts) % n] = x;
        }
        Hypervector::new(data)
    }

    /// Compress to `dims` components by summing contiguous blocks, normalized.
    pub fn block_pool(&self, dims: usize) -> Hypervector {
        let n = self.dimensions();
        if dims == 0 || n == 0 {
            return Hypervector::zeros(0);
        }
        let dims = dims.min(n);
        let mut pooled = vec![0.0f32; dims];
        for (i, &x) in self.data.iter().enumerate() {
            pooled[i * dims / n] += x;
        }
        normalize(&mut pooled);
        Hypervector::new(pooled)
    }
}

/// Normalize a vector to unit length in place; zero vectors are left alone.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

impl PartialEq for Hypervector {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl From<Vec<f32>> for Hypervector {
    fn from(data: Vec<f32>) -> Self {
        Hypervector::new(data)
    }
}

impl fmt::Display for Hypervector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hypervector(dims={})", self.dimensions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let v1 = Hypervector::new(vec![1.0, 0.0, 0.0]);
        let v2 = Hypervector::new(vec![1.0, 0.0, 0.0]);
        let sim = v1.cosine_similarity(&v2).unwrap();
        assert!(
            (sim - 1.0).abs() < 1e-6,
            "Identical vectors should have similarity 1.0"
        );
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let v1 = Hypervector::new(vec![1.0, 0.0]);
        let v2 = Hypervector::new(vec![-1.0, 0.0]);
        let sim = v1.cosine_similarity(&v2).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_dims() {
        let v1 = Hypervector::new(vec![1.0, 0.0]);
        let v2 = Hypervector::new(vec![1.0, 0.0, 0.0]);
        assert!(v1.cosine_similarity(&v2).is_none());
        assert_eq!(v1.similarity(&v2), 0.0);
    }

    #[test]
    fn test_zero_vector() {
        let v1 = Hypervector::new(vec![1.0, 0.0]);
        let v2 = Hypervector::zeros(2);
        assert_eq!(v1.cosine_similarity(&v2), Some(0.0));
        assert_eq!(v2.normalized(), v2);
    }

    #[test]
    fn test_euclidean_distance() {
        let v1 = Hypervector::new(vec![0.0, 0.0]);
        let v2 = Hypervector::new(vec![3.0, 4.0]);
        let dist = v1.euclidean_distance(&v2).unwrap();
        assert!((dist - 5.0).abs() < 1e-6, "Distance should be 5.0");
    }

    #[test]
    fn test_scaling_preserves_direction() {
        let v = Hypervector::new(vec![1.0, 2.0, 3.0]);
        let scaled = v.scaled(2.5);
        assert_eq!(scaled.dimensions(), 3);
        assert!((v.similarity(&scaled) - 1.0).abs() < 1e-6);
        assert!((scaled.magnitude() - 2.5 * v.magnitude()).abs() < 1e-4);
    }

    #[test]
    fn test_bundle_is_similar_to_components() {
        let a = Hypervector::new(vec![1.0, 0.0, 0.0, 0.0]);
        let b = Hypervector::new(vec![0.0, 1.0, 0.0, 0.0]);
        let bundled = Hypervector::bundle([&a, &b]).unwrap();
        assert!((bundled.magnitude() - 1.0).abs() < 1e-6);
        assert!(bundled.similarity(&a) > 0.7);
        assert!(bundled.similarity(&b) > 0.7);
        assert!(Hypervector::bundle(std::iter::empty()).is_none());
    }

    #[test]
    fn test_bundle_skips_mismatched_lengths() {
        let a = Hypervector::new(vec![1.0, 0.0, 0.0]);
        let short = Hypervector::new(vec![0.0, 1.0]);
        let b = Hypervector::new(vec![0.0, 1.0, 0.0]);
        let bundled = Hypervector::bundle([&a, &short, &b]).unwrap();
        assert_eq!(bundled.dimensions(), 3);
        let expected = Hypervector::bundle([&a, &b]).unwrap();
        assert_eq!(bundled, expected);
    }

    #[test]
    fn test_bind_and_permute() {
        let a = Hypervector::new(vec![1.0, 2.0, 3.0]);
        let b = Hypervector::new(vec![2.0, 0.5, -1.0]);
        assert_eq!(a.bind(&b).unwrap().as_slice(), &[2.0, 1.0, -3.0]);
        assert_eq!(a.permute(1).as_slice(), &[3.0, 1.0, 2.0]);
        assert_eq!(a.permute(3), a);
    }

    #[test]
    fn test_block_pool_compresses() {
        let v = Hypervector::new(vec![1.0; 8]);
        let pooled = v.block_pool(4);
        assert_eq!(pooled.dimensions(), 4);
        assert!((pooled.magnitude() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_serde_as_plain_sequence() {
        let v = Hypervector::new(vec![0.5, -0.25]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "[0.5,-0.25]");
        let back: Hypervector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
