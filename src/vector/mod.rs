//! Hypervector storage and algebra.
//!
//! This module provides the vector primitives every other layer builds on:
//! - Cosine similarity and Euclidean distance
//! - Binding (⊗), bundling (⊕) and permutation (Π)
//! - Block pooling for compact resonance keys
//!
//! Vectors are reference counted, so copies of a memory share components.

mod types;

pub use types::{Hypervector, normalize};
