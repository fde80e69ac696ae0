/// Ξ differentiation operator.
///
/// On each dimension pair `(x, y)` two fixed linear maps act:
///
/// ```text
/// R(x, y) = (−y, x)              rotation by 90°
/// G(x, y) = (φ/2 · x, 1/φ · y)   golden anisotropic scaling
/// ```
///
/// They do not commute, and `Ξ(v) = normalize(R(G(v)) − G(R(v)))` is the
/// residue. Memories that are similar in content but whose residues differ
/// feel a repulsive force during retrieval and consolidation.
use crate::vector::{Hypervector, normalize};

/// Golden ratio φ.
pub const PHI: f32 = 1.618_034;
/// Scale of the first component of each pair, φ/2.
pub const ALPHA: f32 = PHI / 2.0;
/// Scale of the second component of each pair, 1/φ.
pub const BETA: f32 = 1.0 / PHI;

/// Apply R to consecutive pairs; a trailing odd component is left unchanged.
pub fn rotate(v: &[f32]) -> Vec<f32> {
    let mut out = v.to_vec();
    for (i, pair) in v.chunks_exact(2).enumerate() {
        out[2 * i] = -pair[1];
        out[2 * i + 1] = pair[0];
    }
    out
}

/// Apply G to consecutive pairs; a trailing odd component is scaled by φ/2.
pub fn golden_scale(v: &[f32]) -> Vec<f32> {
    v.iter()
        .enumerate()
        .map(|(i, &x)| if i % 2 == 0 { ALPHA * x } else { BETA * x })
        .collect()
}

/// Ξ signature of a vector, unit length (zero if the residue vanishes).
pub fn xi_signature(vector: &Hypervector) -> Hypervector {
    let v = vector.as_slice();
    let rg = rotate(&golden_scale(v));
    let gr = golden_scale(&rotate(v));
    let mut xi: Vec<f32> = rg.iter().zip(&gr).map(|(a, b)| a - b).collect();
    normalize(&mut xi);
    Hypervector::new(xi)
}

/// Distance between two signatures, `‖Ξa − Ξb‖`; 0 when incomparable.
pub fn xi_distance(xi_a: &Hypervector, xi_b: &Hypervector) -> f32 {
    xi_a.euclidean_distance(xi_b).unwrap_or(0.0)
}

/// Repulsive force between two memories with the given signatures.
pub fn repulsive_force(xi_a: &Hypervector, xi_b: &Hypervector) -> f32 {
    xi_distance(xi_a, xi_b)
}

/// `base + k · force`.
pub fn diversity_boost(base_similarity: f32, force: f32, diversity_weight: f32) -> f32 {
    base_similarity + diversity_weight * force
}
