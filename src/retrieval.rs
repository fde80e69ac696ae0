/// Retrieval: similarity search expanded through skip links.
///
/// ```text
/// query ──cosine──▶ direct candidates (top_k × multiplier, above threshold)
///                        │
///                        └─ traversable links ──▶ linked candidates
///                                                 sim = max(own, src_sim × strength)
/// score = S(now) × (sim + k · ‖Ξq − Ξm‖)
/// ```
///
/// Only memories above the amplitude floor are ever returned. Retrieval is a
/// pure read of a committed store; the caller applies access reinforcement
/// and records the traversals this module reports.
use crate::config::EngineConfig;
use crate::differentiation::{diversity_boost, repulsive_force, xi_signature};
use crate::error::RetrievalError;
use crate::memory::{Category, Memory, MemoryId, MemoryStore};
use crate::vector::Hypervector;
use crate::wave::effective_strength;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options for a recall.
#[derive(Debug, Clone, PartialEq)]
pub struct RecallOptions {
    /// Number of results to return
    pub top_k: usize,
    /// Minimum cosine similarity for direct candidates; the configured default when unset
    pub threshold: Option<f32>,
    /// Expand direct candidates through their skip links
    pub follow_links: bool,
}

impl RecallOptions {
    /// Defaults: configured threshold, links followed.
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            threshold: None,
            follow_links: true,
        }
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Plain similarity search without link expansion.
    pub fn direct_only(mut self) -> Self {
        self.follow_links = false;
        self
    }
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self::new(10)
    }
}

/// How a hit was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Cosine similarity to the query
    Direct,
    /// Through a skip link of a direct candidate
    Linked { from: MemoryId },
}

/// One recalled memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallHit {
    pub id: MemoryId,
    /// Ranking score, `S(now) × boosted similarity`
    pub score: f32,
    /// Similarity before the diversity boost
    pub similarity: f32,
    /// Wave strength at recall time
    pub strength: f32,
    pub category: Category,
    pub layer_depth: u32,
    pub content_ref: Option<String>,
    pub via: Provenance,
}

/// Hits plus the anchor→target traversals worth remembering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecallOutcome {
    pub hits: Vec<RecallHit>,
    pub traversals: Vec<(MemoryId, MemoryId)>,
}

/// Run a recall against a committed store.
pub fn recall(
    store: &MemoryStore,
    query: &Hypervector,
    options: &RecallOptions,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<RecallOutcome, RetrievalError> {
    if store.is_empty() {
        return Err(RetrievalError::EmptyStore);
    }
    if options.top_k == 0 {
        return Ok(RecallOutcome::default());
    }

    let floor = config.wave.amplitude_floor;
    let threshold = options.threshold.unwrap_or(config.retrieval.min_similarity);

    let mut direct: Vec<(MemoryId, f32)> = store
        .active(floor)
        .map(|m| (m.id, query.similarity(&m.vector)))
        .filter(|(_, sim)| *sim >= threshold)
        .collect();
    direct.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    direct.truncate(options.top_k.saturating_mul(config.retrieval.candidate_multiplier));

    let mut candidates: BTreeMap<MemoryId, (f32, Provenance)> = direct
        .iter()
        .map(|&(id, sim)| (id, (sim, Provenance::Direct)))
        .collect();

    if options.follow_links {
        for &(source_id, source_sim) in &direct {
            let Some(source) = store.get(source_id) else {
                continue;
            };
            for link in source.connections.iter().filter(|l| l.is_traversable(&config.topology)) {
                let Some(target) = store.get(link.target_id).filter(|t| !t.is_faded(floor)) else {
                    continue;
                };
                let via_link = source_sim * link.strength;
                let linked = Provenance::Linked { from: source_id };
                match candidates.get_mut(&target.id) {
                    Some(entry) => {
                        if via_link > entry.0 {
                            *entry = (via_link, linked);
                        }
                    }
                    None => {
                        let own = query.similarity(&target.vector);
                        candidates.insert(target.id, (own.max(via_link), linked));
                    }
                }
            }
        }
    }

    let query_xi = xi_signature(query);
    let weight = config.differentiation.diversity_weight;
    let mut hits: Vec<RecallHit> = candidates
        .into_iter()
        .filter_map(|(id, (similarity, via))| {
            let m = store.get(id)?;
            let strength = effective_strength(m, now, &config.wave);
            let force = repulsive_force(&query_xi, &m.differentiation_signature);
            Some(hit(m, strength * diversity_boost(similarity, force, weight), similarity, strength, via))
        })
        .collect();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
    hits.truncate(options.top_k);

    let traversals = anchor_traversals(store, &direct, &hits, config);
    Ok(RecallOutcome { hits, traversals })
}

fn hit(m: &Memory, score: f32, similarity: f32, strength: f32, via: Provenance) -> RecallHit {
    RecallHit {
        id: m.id,
        score,
        similarity,
        strength,
        category: m.category,
        layer_depth: m.layer_depth,
        content_ref: m.content_ref.clone(),
        via,
    }
}

/// Direct hits far from the anchor's depth that no link covers yet.
fn anchor_traversals(
    store: &MemoryStore,
    direct: &[(MemoryId, f32)],
    hits: &[RecallHit],
    config: &EngineConfig,
) -> Vec<(MemoryId, MemoryId)> {
    let Some(anchor) = direct.first().and_then(|(id, _)| store.get(*id)) else {
        return Vec::new();
    };
    hits.iter()
        .filter(|h| h.via == Provenance::Direct && h.id != anchor.id)
        .filter(|h| h.layer_depth.abs_diff(anchor.layer_depth) >= config.topology.min_traversal_span)
        .filter(|h| anchor.link_to(h.id).is_none())
        .map(|h| (anchor.id, h.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{LinkOrigin, SkipLink};

    fn memory(id: u64, vector: Vec<f32>, amplitude: f32) -> Memory {
        Memory::new(
            MemoryId(id),
            Hypervector::new(vector).normalized(),
            amplitude,
            0.007,
            0.0,
            0.05,
            Category::Knowledge,
            Utc::now(),
        )
    }

    fn query(v: Vec<f32>) -> Hypervector {
        Hypervector::new(v).normalized()
    }

    #[test]
    fn test_empty_store_is_an_error() {
        let result = recall(
            &MemoryStore::new(),
            &query(vec![1.0, 0.0]),
            &RecallOptions::new(5),
            &EngineConfig::default(),
            Utc::now(),
        );
        assert_eq!(result, Err(RetrievalError::EmptyStore));
    }

    #[test]
    fn test_ranks_by_similarity() {
        let store = MemoryStore::from_memories([
            memory(1, vec![0.0, 1.0, 0.0, 0.0], 1.0),
            memory(2, vec![1.0, 0.1, 0.0, 0.0], 1.0),
            memory(3, vec![1.0, 0.5, 0.0, 0.0], 1.0),
        ]);
        let outcome = recall(
            &store,
            &query(vec![1.0, 0.0, 0.0, 0.0]),
            &RecallOptions::new(2).threshold(0.5),
            &EngineConfig::default(),
            Utc::now(),
        )
        .unwrap();

        let ids: Vec<_> = outcome.hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![MemoryId(2), MemoryId(3)]);
        assert!(outcome.hits.iter().all(|h| h.via == Provenance::Direct));
    }

    #[test]
    fn test_faded_memories_are_not_recalled() {
        let store = MemoryStore::from_memories([memory(1, vec![1.0, 0.0], 0.0)]);
        let outcome = recall(
            &store,
            &query(vec![1.0, 0.0]),
            &RecallOptions::new(3),
            &EngineConfig::default(),
            Utc::now(),
        )
        .unwrap();
        assert!(outcome.hits.is_empty());
    }

    #[test]
    fn test_link_reaches_dissimilar_memory() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let mut near = memory(1, vec![1.0, 0.0, 0.0, 0.0], 1.0);
        let mut far = memory(2, vec![0.0, 0.0, 1.0, 0.0], 1.0);
        far.layer_depth = 3;
        let link = SkipLink::between(&near, &far, 0.9, LinkOrigin::Consolidation, &config.topology, now);
        near.connections.push(link);
        let store = MemoryStore::from_memories([near, far]);

        let q = query(vec![1.0, 0.0, 0.0, 0.0]);
        let outcome = recall(&store, &q, &RecallOptions::new(5).threshold(0.5), &config, now).unwrap();
        let linked = outcome.hits.iter().find(|h| h.id == MemoryId(2)).unwrap();
        assert_eq!(linked.via, Provenance::Linked { from: MemoryId(1) });
        assert!((linked.similarity - 0.9).abs() < 1e-5);

        let plain = recall(&store, &q, &RecallOptions::new(5).threshold(0.5).direct_only(), &config, now).unwrap();
        assert_eq!(plain.hits.len(), 1);
    }

    #[test]
    fn test_equal_scores_prefer_lower_id() {
        let store = MemoryStore::from_memories([
            memory(7, vec![1.0, 0.0], 1.0),
            memory(3, vec![1.0, 0.0], 1.0),
        ]);
        let outcome = recall(
            &store,
            &query(vec![1.0, 0.0]),
            &RecallOptions::new(2),
            &EngineConfig::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(outcome.hits[0].id, MemoryId(3));
        assert_eq!(outcome.hits[1].id, MemoryId(7));
    }

    #[test]
    fn test_cross_depth_hits_become_traversals() {
        let mut deep = memory(2, vec![0.9, 0.3, 0.0, 0.0], 1.0);
        deep.layer_depth = 4;
        let store = MemoryStore::from_memories([memory(1, vec![1.0, 0.0, 0.0, 0.0], 1.0), deep]);

        let outcome = recall(
            &store,
            &query(vec![1.0, 0.0, 0.0, 0.0]),
            &RecallOptions::new(5),
            &EngineConfig::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(outcome.traversals, vec![(MemoryId(1), MemoryId(2))]);
    }

    #[test]
    fn test_zero_top_k_returns_nothing() {
        let store = MemoryStore::from_memories([memory(1, vec![1.0, 0.0], 1.0)]);
        let outcome = recall(
            &store,
            &query(vec![1.0, 0.0]),
            &RecallOptions::new(0),
            &EngineConfig::default(),
            Utc::now(),
        )
        .unwrap();
        assert!(outcome.hits.is_empty());
    }
}
