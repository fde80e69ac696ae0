/// Random projection codebook.
///
/// A fixed Gaussian projection from the embedding space into hypervector
/// space. The matrix is never stored in snapshots: it is regenerated
/// bit-identically from `(seed, input_dim, output_dim)`, which is what
/// [`CodebookSpec`] records.
use crate::error::EncodingError;
use crate::vector::{Hypervector, normalize};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fmt;

/// Parameters that fully determine a codebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebookSpec {
    pub seed: u64,
    pub input_dim: usize,
    pub output_dim: usize,
}

impl fmt::Display for CodebookSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seed={} {}->{}",
            self.seed, self.input_dim, self.output_dim
        )
    }
}

/// Seeded projection matrix, row-major `input_dim × output_dim`.
pub struct Codebook {
    matrix: Vec<f32>,
    spec: CodebookSpec,
}

impl Codebook {
    /// Generate the projection for the given parameters.
    ///
    /// Entries are standard normal samples (Box-Muller over ChaCha8) scaled
    /// by `1/√output_dim`.
    pub fn new(input_dim: usize, output_dim: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let scale = 1.0 / (output_dim.max(1) as f32).sqrt();
        let len = input_dim * output_dim;
        let mut matrix = Vec::with_capacity(len);
        for _ in 0..len {
            let u1: f32 = rng.gen_range(f32::MIN_POSITIVE..1.0);
            let u2: f32 = rng.gen_range(0.0..1.0);
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
            matrix.push(z * scale);
        }
        Self {
            matrix,
            spec: CodebookSpec {
                seed,
                input_dim,
                output_dim,
            },
        }
    }

    /// Regenerate a codebook from persisted parameters.
    pub fn from_spec(spec: CodebookSpec) -> Self {
        Self::new(spec.input_dim, spec.output_dim, spec.seed)
    }

    pub fn spec(&self) -> CodebookSpec {
        self.spec
    }

    pub fn input_dim(&self) -> usize {
        self.spec.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.spec.output_dim
    }

    /// Project an embedding to a unit-length hypervector.
    pub fn project(&self, embedding: &[f32]) -> Result<Hypervector, EncodingError> {
        if embedding.is_empty() {
            return Err(EncodingError::EmptyEmbedding);
        }
        if embedding.len() != self.spec.input_dim {
            return Err(EncodingError::DimensionMismatch {
                expected: self.spec.input_dim,
                got: embedding.len(),
            });
        }

        let d = self.spec.output_dim;
        let mut out = vec![0.0f32; d];
        for (row, &val) in self.matrix.chunks_exact(d).zip(embedding) {
            if val == 0.0 {
                continue;
            }
            for (acc, &w) in out.iter_mut().zip(row) {
                *acc += val * w;
            }
        }
        normalize(&mut out);
        Ok(Hypervector::new(out))
    }
}

impl fmt::Debug for Codebook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codebook").field("spec", &self.spec).finish()
    }
}
