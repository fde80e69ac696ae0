/// HyperConnection topology.
///
/// Skip links are directed, weighted shortcuts between memories that may sit
/// many consolidation layers apart. They are created three ways:
///
/// - **Similarity**: at encoding, toward deeper memories that look alike
/// - **Consolidation**: the wire stage links constructive cross-depth pairs
/// - **Retrieval**: recurring recall traversals get a direct link
///
/// Link strength decays on its own clock, independent of the memories it
/// joins, and links below the floor are removed during consolidation.
///
/// ## Golden spans
///
/// Similarity candidates are bucketed by depth gap using spans
/// `round(φ^k)` for k = 1, 2, 3, … (2, 3, 4, 7, 11, 18, …). Only the best
/// candidate per bucket is kept, so a memory carries a few well-chosen long
/// jumps instead of many short ones.
use crate::config::{TopologyConfig, WaveConfig};
use crate::differentiation::PHI;
use crate::memory::{Memory, MemoryId};
use crate::vector::Hypervector;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::trace;

/// Why a link exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkOrigin {
    Similarity,
    Consolidation,
    Retrieval,
}

/// A directed skip link to another memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipLink {
    pub target_id: MemoryId,
    /// Current strength, decays independently
    pub strength: f32,
    /// Compressed shared pattern of the two endpoints
    pub resonance_key: Hypervector,
    /// Layer-depth levels bridged
    pub span: u32,
    pub origin: LinkOrigin,
    pub last_reinforced: DateTime<Utc>,
}

impl SkipLink {
    /// Link from `source` to `target` with the given strength.
    pub fn between(
        source: &Memory,
        target: &Memory,
        strength: f32,
        origin: LinkOrigin,
        config: &TopologyConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            target_id: target.id,
            strength: strength.clamp(0.0, config.max_link_strength),
            resonance_key: resonance_key(&source.vector, &target.vector, config.resonance_key_dims),
            span: source.layer_depth.abs_diff(target.layer_depth),
            origin,
            last_reinforced: now,
        }
    }

    /// Whether recall may follow this link.
    pub fn is_traversable(&self, config: &TopologyConfig) -> bool {
        self.strength >= config.link_floor
    }

    /// Strengthen a rediscovered link and restart its decay clock.
    pub fn reinforce(&mut self, config: &TopologyConfig, now: DateTime<Utc>) {
        self.strength = (self.strength + config.reinforce_step).min(config.max_link_strength);
        self.last_reinforced = now;
    }

    /// Apply decay for the time since the last reinforcement.
    pub fn decay(&mut self, config: &TopologyConfig, wave: &WaveConfig, now: DateTime<Utc>) {
        let elapsed = crate::wave::age_units(self.last_reinforced, now, wave);
        if elapsed > 0.0 {
            let factor = (-(config.link_decay_rate as f64) * elapsed).exp();
            self.strength = (self.strength as f64 * factor) as f32;
            self.last_reinforced = now;
        }
    }
}

/// Resonance key: block-pooled binding of the two vectors, unit length.
pub fn resonance_key(a: &Hypervector, b: &Hypervector, dims: usize) -> Hypervector {
    match a.bind(b) {
        Some(bound) => bound.block_pool(dims),
        None => Hypervector::zeros(0),
    }
}

/// Golden spans `round(φ^k)` for k = 1.. up to and including the first ≥ `max_gap`.
pub fn golden_spans(max_gap: u32) -> Vec<u32> {
    let mut spans = Vec::new();
    let mut power = PHI as f64;
    loop {
        let span = power.round() as u32;
        spans.push(span);
        if span >= max_gap || spans.len() >= 48 {
            break;
        }
        power *= PHI as f64;
    }
    spans
}

/// Bucket index of a depth gap: the first golden span that covers it.
pub fn span_bucket(gap: u32) -> usize {
    golden_spans(gap.max(1)).len() - 1
}

/// Add a link, or reinforce the existing one to the same target.
///
/// Returns true when a new link was created.
pub fn link_or_reinforce(
    source: &mut Memory,
    link: SkipLink,
    config: &TopologyConfig,
    now: DateTime<Utc>,
) -> bool {
    if let Some(existing) = source.link_to_mut(link.target_id) {
        existing.reinforce(config, now);
        return false;
    }
    trace!(
        source = %source.id,
        target = %link.target_id,
        strength = link.strength,
        origin = ?link.origin,
        "skip link created"
    );
    source.connections.push(link);
    true
}

/// Similarity-triggered links for a freshly encoded memory.
///
/// Candidates are committed memories deeper than `source` with cosine above
/// the threshold. The best candidate per golden-span bucket is kept, strongest
/// buckets first, up to `max_links_per_memory`.
pub fn similarity_links<'a>(
    source: &Memory,
    candidates: impl IntoIterator<Item = &'a Memory>,
    config: &TopologyConfig,
    now: DateTime<Utc>,
) -> Vec<SkipLink> {
    let mut best: Vec<Option<(f32, &Memory)>> = Vec::new();
    for candidate in candidates {
        if candidate.id == source.id || candidate.layer_depth <= source.layer_depth {
            continue;
        }
        let sim = source.vector.similarity(&candidate.vector);
        if sim <= config.similarity_link_threshold {
            continue;
        }
        let bucket = span_bucket(candidate.layer_depth - source.layer_depth);
        if best.len() <= bucket {
            best.resize(bucket + 1, None);
        }
        let replace = match best[bucket] {
            None => true,
            Some((s, m)) => sim > s || (sim == s && candidate.id < m.id),
        };
        if replace {
            best[bucket] = Some((sim, candidate));
        }
    }

    let mut chosen: Vec<(f32, &Memory)> = best.into_iter().flatten().collect();
    chosen.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.id.cmp(&b.1.id)));
    chosen.truncate(config.max_links_per_memory);
    chosen
        .into_iter()
        .map(|(sim, target)| {
            SkipLink::between(
                source,
                target,
                sim * config.link_strength_scale,
                LinkOrigin::Similarity,
                config,
                now,
            )
        })
        .collect()
}

/// Decay every link of a memory and drop those below the floor.
///
/// Returns the number of links removed.
pub fn decay_and_prune(
    memory: &mut Memory,
    config: &TopologyConfig,
    wave: &WaveConfig,
    now: DateTime<Utc>,
) -> usize {
    let before = memory.connections.len();
    for link in memory.connections.iter_mut() {
        link.decay(config, wave, now);
    }
    memory.connections.retain(|l| l.strength >= config.link_floor);
    let pruned = before - memory.connections.len();
    if pruned > 0 {
        trace!(memory = %memory.id, pruned, "sub-floor links removed");
    }
    pruned
}

/// Recurring recall traversals, keyed by (anchor, target).
///
/// Shared between the engine and the wire stage; cloning shares the log.
#[derive(Debug, Clone, Default)]
pub struct TraversalLog {
    counts: Arc<DashMap<(MemoryId, MemoryId), u32>>,
}

impl TraversalLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one traversal and return the running total.
    pub fn record(&self, anchor: MemoryId, target: MemoryId) -> u32 {
        let mut entry = self.counts.entry((anchor, target)).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn count(&self, anchor: MemoryId, target: MemoryId) -> u32 {
        self.counts.get(&(anchor, target)).map(|c| *c).unwrap_or(0)
    }

    /// Traversals seen at least `threshold` times, in a stable order.
    pub fn due(&self, threshold: u32) -> Vec<(MemoryId, MemoryId)> {
        let mut due: Vec<_> = self
            .counts
            .iter()
            .filter(|e| *e.value() >= threshold)
            .map(|e| *e.key())
            .collect();
        due.sort();
        due
    }

    /// Forget a traversal once it has been wired.
    pub fn clear(&self, anchor: MemoryId, target: MemoryId) {
        self.counts.remove(&(anchor, target));
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Connected components of an undirected edge list, each sorted, in order of
/// their smallest id.
pub fn connected_components(edges: &[(MemoryId, MemoryId)]) -> Vec<Vec<MemoryId>> {
    let mut adjacency: BTreeMap<MemoryId, Vec<MemoryId>> = BTreeMap::new();
    for &(a, b) in edges {
        adjacency.entry(a).or_default().push(b);
        adjacency.entry(b).or_default().push(a);
    }

    let mut seen = BTreeSet::new();
    let mut components = Vec::new();
    for &start in adjacency.keys() {
        if !seen.insert(start) {
            continue;
        }
        let mut component = vec![start];
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &next in adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
                if seen.insert(next) {
                    component.push(next);
                    stack.push(next);
                }
            }
        }
        component.sort();
        components.push(component);
    }
    components
}
