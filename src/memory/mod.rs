/// Memory records and the arena that owns them.
///
/// A [`Memory`] is one encoded observation: its hypervector, the oscillator
/// that drives its retrieval strength, its Ξ signature and its outgoing skip
/// links. Memories are never removed from a [`MemoryStore`]; forgetting is an
/// amplitude at or below the configured floor.
///
/// ## Lifecycle
///
/// ```text
/// remember → depth 0, episodic
///     ↓ consolidation: strengthen / prune / synchronize / differentiate
///     ↓ transfer: depth + 1 once old enough
///     ↓ bundle: clusters summarized into compound memories
/// faded (amplitude ≤ floor), still counted, never recalled
/// ```
pub mod category;
pub mod store;

pub use category::Category;
pub use store::MemoryStore;

use crate::differentiation::xi_signature;
use crate::topology::SkipLink;
use crate::vector::Hypervector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable memory identifier, allocated monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub u64);

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id source shared by encoding and the bundle stage.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Allocator whose first id is `next`.
    pub fn starting_at(next: u64) -> Self {
        Self {
            next: AtomicU64::new(next.max(1)),
        }
    }

    pub fn allocate(&self) -> MemoryId {
        MemoryId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// The id the next allocation will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

/// How a memory came to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryKind {
    /// Encoded directly from an observation
    Episodic,
    /// Summary of a cluster, produced by the bundle stage
    Compound {
        /// Member memories, ascending
        members: Vec<MemoryId>,
    },
}

/// One memory in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub vector: Hypervector,
    pub amplitude: f32,
    /// Oscillation frequency in cycles per wave time unit
    pub frequency: f32,
    /// Phase offset in radians
    pub phase: f32,
    /// Exponential decay rate λ per wave time unit
    pub decay_rate: f32,
    pub category: Category,
    /// Ξ(vector), kept in step with `vector`
    pub differentiation_signature: Hypervector,
    pub layer_depth: u32,
    pub connections: Vec<SkipLink>,
    pub created_at: DateTime<Utc>,
    pub kind: MemoryKind,
    /// Opaque caller reference (document id, text, ...)
    pub content_ref: Option<String>,
    pub access_count: u64,
    pub last_accessed: Option<DateTime<Utc>>,
}

impl Memory {
    /// Build a fresh episodic memory at depth 0 with no links.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: MemoryId,
        vector: Hypervector,
        amplitude: f32,
        frequency: f32,
        phase: f32,
        decay_rate: f32,
        category: Category,
        created_at: DateTime<Utc>,
    ) -> Self {
        let differentiation_signature = xi_signature(&vector);
        Self {
            id,
            vector,
            amplitude,
            frequency,
            phase,
            decay_rate,
            category,
            differentiation_signature,
            layer_depth: 0,
            connections: Vec::new(),
            created_at,
            kind: MemoryKind::Episodic,
            content_ref: None,
            access_count: 0,
            last_accessed: None,
        }
    }

    /// Replace the vector and recompute the Ξ signature.
    pub fn replace_vector(&mut self, vector: Hypervector) {
        self.differentiation_signature = xi_signature(&vector);
        self.vector = vector;
    }

    /// Whether the memory has faded below retrievability.
    pub fn is_faded(&self, floor: f32) -> bool {
        self.amplitude <= floor
    }

    pub fn is_compound(&self) -> bool {
        matches!(self.kind, MemoryKind::Compound { .. })
    }

    /// Members of a compound memory, empty for episodic ones.
    pub fn members(&self) -> &[MemoryId] {
        match &self.kind {
            MemoryKind::Compound { members } => members,
            MemoryKind::Episodic => &[],
        }
    }

    /// Outgoing link to `target`, if any.
    pub fn link_to(&self, target: MemoryId) -> Option<&SkipLink> {
        self.connections.iter().find(|l| l.target_id == target)
    }

    pub fn link_to_mut(&mut self, target: MemoryId) -> Option<&mut SkipLink> {
        self.connections.iter_mut().find(|l| l.target_id == target)
    }

    /// Age in seconds at `now`, zero for timestamps in the future.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.created_at).num_milliseconds().max(0);
        millis as f64 / 1_000.0
    }

    /// Record a retrieval hit.
    pub fn record_access(&mut self, boost: f32, max_amplitude: f32, now: DateTime<Utc>) {
        self.amplitude = (self.amplitude + boost).min(max_amplitude);
        self.access_count += 1;
        self.last_accessed = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(vector: Vec<f32>) -> Memory {
        Memory::new(
            MemoryId(1),
            Hypervector::new(vector),
            1.0,
            0.01,
            0.0,
            0.05,
            Category::Knowledge,
            Utc::now(),
        )
    }

    #[test]
    fn test_new_memory_defaults() {
        let m = memory(vec![0.6, 0.8, 0.0, 0.0]);
        assert_eq!(m.layer_depth, 0);
        assert!(m.connections.is_empty());
        assert!(!m.is_compound());
        assert!(m.members().is_empty());
        assert_eq!(m.differentiation_signature.dimensions(), 4);
    }

    #[test]
    fn test_replace_vector_recomputes_signature() {
        let mut m = memory(vec![1.0, 0.0, 0.0, 0.0]);
        let before = m.differentiation_signature.clone();
        m.replace_vector(Hypervector::new(vec![0.0, 0.0, 1.0, 0.0]));
        assert_ne!(before, m.differentiation_signature);
        assert_eq!(m.differentiation_signature, xi_signature(&m.vector));
    }

    #[test]
    fn test_faded_at_floor() {
        let mut m = memory(vec![1.0, 0.0]);
        assert!(!m.is_faded(0.05));
        m.amplitude = 0.05;
        assert!(m.is_faded(0.05));
    }

    #[test]
    fn test_record_access_caps_amplitude() {
        let mut m = memory(vec![1.0, 0.0]);
        let now = Utc::now();
        m.record_access(0.5, 1.2, now);
        assert!((m.amplitude - 1.2).abs() < 1e-6);
        assert_eq!(m.access_count, 1);
        assert_eq!(m.last_accessed, Some(now));
    }

    #[test]
    fn test_ids_are_monotonic() {
        let ids = IdAllocator::starting_at(5);
        assert_eq!(ids.allocate(), MemoryId(5));
        assert_eq!(ids.allocate(), MemoryId(6));
        assert_eq!(ids.peek(), 7);
        assert_eq!(IdAllocator::default().allocate(), MemoryId(1));
    }

    #[test]
    fn test_memory_id_display() {
        assert_eq!(MemoryId(7).to_string(), "#7");
    }
}
