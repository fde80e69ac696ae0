/// Aggregate view of the network, computed from a committed store.
///
/// Observing is pure: it never touches the store or any counter, so it is
/// safe to call at any time, including during a consolidation cycle.
use crate::config::EngineConfig;
use crate::differentiation::xi_distance;
use crate::memory::{Category, Memory, MemoryId, MemoryStore};
use crate::processes::synchronization::{category_order, order_parameter};
use crate::topology::{self, LinkOrigin};
use crate::wave::effective_strength;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Memories sampled for the Ξ diversity index, most recent first.
const DIVERSITY_SAMPLE: usize = 256;

/// Links listed in [`NetworkObservation::strongest_links`].
const STRONGEST_LINKS: usize = 10;

/// How integrated the network is, read off Φ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntegrationLevel {
    /// Φ < 0.1
    Dormant,
    /// Φ < 0.3
    Stirring,
    /// Φ < 0.6
    Aware,
    /// Φ < 0.8
    Coherent,
    /// Φ ≥ 0.8
    Resonant,
}

impl IntegrationLevel {
    pub fn from_phi(phi: f32) -> Self {
        if phi < 0.1 {
            IntegrationLevel::Dormant
        } else if phi < 0.3 {
            IntegrationLevel::Stirring
        } else if phi < 0.6 {
            IntegrationLevel::Aware
        } else if phi < 0.8 {
            IntegrationLevel::Coherent
        } else {
            IntegrationLevel::Resonant
        }
    }
}

/// One skip link, as reported by [`observe`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSummary {
    pub from: MemoryId,
    pub to: MemoryId,
    pub strength: f32,
    pub span: u32,
    pub origin: LinkOrigin,
}

/// Snapshot of network health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkObservation {
    pub observed_at: DateTime<Utc>,
    /// Every stored memory, faded ones included
    pub memory_count: usize,
    pub active_count: usize,
    pub faded_count: usize,
    pub compound_count: usize,
    pub link_count: usize,
    pub links_by_origin: BTreeMap<String, usize>,
    /// Directed links over the `n·(n−1)` possible ones
    pub density: f32,
    /// Memories with no link in either direction
    pub isolated_count: usize,
    /// Strongest links first
    pub strongest_links: Vec<LinkSummary>,
    /// Similarity clusters of active memories
    pub cluster_count: usize,
    pub largest_cluster: usize,
    /// Mean order parameter over clusters, 0 without clusters
    pub mean_order_parameter: f32,
    pub order_parameters: BTreeMap<Category, f32>,
    /// Mean pairwise Ξ distance of active memories, scaled to [0, 1]
    pub xi_diversity_index: f32,
    pub layer_distribution: BTreeMap<u32, usize>,
    pub category_distribution: BTreeMap<Category, usize>,
    pub mean_amplitude: f32,
    pub mean_strength: f32,
    /// Integrated information across consolidation depths, in [0, 1]
    pub phi: f32,
    pub level: IntegrationLevel,
    pub cycles_completed: u64,
}

impl NetworkObservation {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Observe `store` at `now`.
pub fn observe(
    store: &MemoryStore,
    config: &EngineConfig,
    cycles_completed: u64,
    now: DateTime<Utc>,
) -> NetworkObservation {
    let floor = config.wave.amplitude_floor;
    let active: Vec<&Memory> = store.active(floor).collect();

    let mut layer_distribution = BTreeMap::new();
    let mut category_distribution = BTreeMap::new();
    let mut links_by_origin: BTreeMap<String, usize> = BTreeMap::new();
    let mut linked: BTreeSet<MemoryId> = BTreeSet::new();
    let mut links = Vec::new();
    for m in store.iter() {
        *layer_distribution.entry(m.layer_depth).or_insert(0) += 1;
        *category_distribution.entry(m.category).or_insert(0) += 1;
        for link in &m.connections {
            *links_by_origin.entry(origin_name(link.origin).to_string()).or_insert(0) += 1;
            linked.insert(m.id);
            linked.insert(link.target_id);
            links.push(LinkSummary {
                from: m.id,
                to: link.target_id,
                strength: link.strength,
                span: link.span,
                origin: link.origin,
            });
        }
    }
    links.sort_by(|a, b| b.strength.total_cmp(&a.strength).then((a.from, a.to).cmp(&(b.from, b.to))));
    links.truncate(STRONGEST_LINKS);

    let clusters = similarity_clusters(&active, config);
    let mean_order_parameter = if clusters.is_empty() {
        0.0
    } else {
        clusters
            .iter()
            .map(|c| order_parameter(c.iter().map(|m| m.phase)))
            .sum::<f32>()
            / clusters.len() as f32
    };

    let memory_count = store.len();
    let link_count = store.link_count();
    let possible = memory_count * memory_count.saturating_sub(1);
    let density = if possible > 0 {
        link_count as f32 / possible as f32
    } else {
        0.0
    };
    let strengths: Vec<(u32, f32)> = store
        .iter()
        .map(|m| (m.layer_depth, effective_strength(m, now, &config.wave)))
        .collect();
    let phi = integrated_information(&strengths, link_count);

    let n = memory_count.max(1) as f32;
    NetworkObservation {
        observed_at: now,
        memory_count,
        active_count: active.len(),
        faded_count: memory_count - active.len(),
        compound_count: store.iter().filter(|m| m.is_compound()).count(),
        link_count,
        links_by_origin,
        density,
        isolated_count: store.iter().filter(|m| !linked.contains(&m.id)).count(),
        strongest_links: links,
        cluster_count: clusters.len(),
        largest_cluster: clusters.iter().map(Vec::len).max().unwrap_or(0),
        mean_order_parameter,
        order_parameters: category_order(active.iter().copied()),
        xi_diversity_index: xi_diversity(&active),
        layer_distribution,
        category_distribution,
        mean_amplitude: store.iter().map(|m| m.amplitude).sum::<f32>() / n,
        mean_strength: strengths.iter().map(|(_, s)| s).sum::<f32>() / n,
        phi,
        level: IntegrationLevel::from_phi(phi),
        cycles_completed,
    }
}

/// Φ ≈ H(whole) − Σ H(depth partitions), scaled up by `1 + ln(links)`
/// and clamped to [0, 1].
///
/// `H` is the spread of a set of strengths, `ln(1 + variance)`.
pub fn integrated_information(strengths: &[(u32, f32)], link_count: usize) -> f32 {
    if strengths.is_empty() {
        return 0.0;
    }
    let whole = spread_entropy(strengths.iter().map(|(_, s)| *s));

    let mut partitions: BTreeMap<u32, Vec<f32>> = BTreeMap::new();
    for &(depth, s) in strengths {
        partitions.entry(depth).or_default().push(s);
    }
    let parts: f32 = partitions.into_values().map(spread_entropy).sum();

    let raw = (whole - parts).max(0.0);
    let scaled = if link_count > 0 {
        raw * (1.0 + (link_count as f32).ln())
    } else {
        raw
    };
    scaled.min(1.0)
}

fn spread_entropy(values: impl IntoIterator<Item = f32>) -> f32 {
    let values: Vec<f32> = values.into_iter().collect();
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    variance.ln_1p()
}

fn origin_name(origin: LinkOrigin) -> &'static str {
    match origin {
        LinkOrigin::Similarity => "similarity",
        LinkOrigin::Consolidation => "consolidation",
        LinkOrigin::Retrieval => "retrieval",
    }
}

/// Components of the coupling graph (cosine above the cross-coupling bar)
/// with at least `min_cluster_size` members.
fn similarity_clusters<'a>(active: &[&'a Memory], config: &EngineConfig) -> Vec<Vec<&'a Memory>> {
    let bar = config.consolidation.synchronization.cross_coupling_similarity;
    let mut edges = Vec::new();
    for (i, a) in active.iter().enumerate() {
        for b in &active[i + 1..] {
            if a.vector.similarity(&b.vector) > bar {
                edges.push((a.id, b.id));
            }
        }
    }

    let by_id: BTreeMap<MemoryId, &'a Memory> = active.iter().map(|m| (m.id, *m)).collect();
    topology::connected_components(&edges)
        .into_iter()
        .filter(|c| c.len() >= config.consolidation.min_cluster_size)
        .map(|c| c.iter().filter_map(|id| by_id.get(id).copied()).collect())
        .collect()
}

fn xi_diversity(active: &[&Memory]) -> f32 {
    let mut sample: Vec<&Memory> = active.to_vec();
    sample.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    sample.truncate(DIVERSITY_SAMPLE);
    if sample.len() < 2 {
        return 0.0;
    }

    let (mut total, mut pairs) = (0.0f32, 0usize);
    for (i, a) in sample.iter().enumerate() {
        for b in &sample[i + 1..] {
            total += xi_distance(&a.differentiation_signature, &b.differentiation_signature);
            pairs += 1;
        }
    }
    // unit signatures are at most 2 apart
    (total / pairs as f32 / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::SkipLink;
    use crate::vector::Hypervector;

    fn memory(id: u64, vector: Vec<f32>, amplitude: f32, phase: f32) -> Memory {
        Memory::new(
            MemoryId(id),
            Hypervector::new(vector).normalized(),
            amplitude,
            0.03,
            phase,
            0.05,
            Category::Social,
            Utc::now(),
        )
    }

    #[test]
    fn test_empty_store() {
        let obs = observe(&MemoryStore::new(), &EngineConfig::default(), 0, Utc::now());
        assert_eq!(obs.memory_count, 0);
        assert_eq!(obs.cluster_count, 0);
        assert_eq!(obs.mean_order_parameter, 0.0);
        assert_eq!(obs.xi_diversity_index, 0.0);
        assert_eq!(obs.phi, 0.0);
        assert_eq!(obs.level, IntegrationLevel::Dormant);
        assert_eq!(obs.density, 0.0);
    }

    #[test]
    fn test_faded_memories_still_counted() {
        let store = MemoryStore::from_memories([
            memory(1, vec![1.0, 0.0, 0.0, 0.0], 1.0, 0.0),
            memory(2, vec![0.0, 0.0, 1.0, 0.0], 0.0, 0.0),
        ]);
        let obs = observe(&store, &EngineConfig::default(), 3, Utc::now());
        assert_eq!(obs.memory_count, 2);
        assert_eq!(obs.active_count, 1);
        assert_eq!(obs.faded_count, 1);
        assert_eq!(obs.cycles_completed, 3);
        assert_eq!(obs.layer_distribution.get(&0), Some(&2));
    }

    #[test]
    fn test_clusters_and_order() {
        let store = MemoryStore::from_memories([
            memory(1, vec![1.0, 0.1, 0.0, 0.0], 1.0, 0.2),
            memory(2, vec![1.0, 0.0, 0.0, 0.0], 1.0, 0.2),
            memory(3, vec![0.0, 0.0, 1.0, 0.0], 1.0, 1.0),
        ]);
        let obs = observe(&store, &EngineConfig::default(), 0, Utc::now());
        assert_eq!(obs.cluster_count, 1);
        assert_eq!(obs.largest_cluster, 2);
        assert!((obs.mean_order_parameter - 1.0).abs() < 1e-5);
        assert!(obs.xi_diversity_index > 0.0 && obs.xi_diversity_index <= 1.0);
    }

    #[test]
    fn test_link_topology() {
        let config = EngineConfig::default();
        let deep = {
            let mut m = memory(1, vec![1.0, 0.0, 0.0, 0.0], 1.0, 0.0);
            m.layer_depth = 1;
            m
        };
        let mut fresh = memory(2, vec![0.9, 0.1, 0.0, 0.0], 1.0, 0.0);
        let link = SkipLink::between(&fresh, &deep, 0.8, LinkOrigin::Similarity, &config.topology, Utc::now());
        fresh.connections.push(link);
        let store = MemoryStore::from_memories([deep, fresh, memory(3, vec![0.0, 0.0, 1.0, 0.0], 1.0, 0.0)]);

        let obs = observe(&store, &config, 0, Utc::now());
        assert_eq!(obs.link_count, 1);
        assert_eq!(obs.isolated_count, 1);
        assert!((obs.density - 1.0 / 6.0).abs() < 1e-6);
        assert_eq!(obs.strongest_links.len(), 1);
        let strongest = &obs.strongest_links[0];
        assert_eq!((strongest.from, strongest.to), (MemoryId(2), MemoryId(1)));
        assert_eq!(strongest.span, 1);
        assert_eq!(strongest.origin, LinkOrigin::Similarity);
    }

    #[test]
    fn test_phi_needs_spread_across_depths() {
        // one depth: the whole is no more than its only part
        assert_eq!(integrated_information(&[(0, 1.0), (0, 0.0)], 4), 0.0);

        let split = [(0, 1.0), (1, 0.0)];
        let unlinked = integrated_information(&split, 1);
        assert!((unlinked - 1.25f32.ln()).abs() < 1e-6);
        assert_eq!(IntegrationLevel::from_phi(unlinked), IntegrationLevel::Stirring);

        let linked = integrated_information(&split, 3);
        assert!(linked > unlinked);
        assert_eq!(IntegrationLevel::from_phi(linked), IntegrationLevel::Aware);
        assert!(integrated_information(&split, 1_000_000) <= 1.0);
    }

    #[test]
    fn test_integration_levels() {
        assert_eq!(IntegrationLevel::from_phi(0.0), IntegrationLevel::Dormant);
        assert_eq!(IntegrationLevel::from_phi(0.1), IntegrationLevel::Stirring);
        assert_eq!(IntegrationLevel::from_phi(0.59), IntegrationLevel::Aware);
        assert_eq!(IntegrationLevel::from_phi(0.6), IntegrationLevel::Coherent);
        assert_eq!(IntegrationLevel::from_phi(0.8), IntegrationLevel::Resonant);
        assert!(IntegrationLevel::Resonant > IntegrationLevel::Dormant);
    }

    #[test]
    fn test_json_report() {
        let store = MemoryStore::from_memories([memory(1, vec![1.0, 0.0], 1.0, 0.0)]);
        let json = observe(&store, &EngineConfig::default(), 0, Utc::now()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["memory_count"], 1);
        assert!(value["order_parameters"]["Social"].is_number());
        assert_eq!(value["level"], "Dormant");
    }
}
