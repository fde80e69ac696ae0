/// Engine configuration.
///
/// Every threshold, floor and coupling constant of the engine lives here with
/// its reference value as the default. All sections deserialize with
/// `#[serde(default)]`, so a JSON file only needs the keys it overrides:
///
/// ```ignore
/// let config = EngineConfig::from_json(r#"{ "dimensions": 4096,
///     "consolidation": { "interference_threshold": 0.55 } }"#)?;
/// ```
use crate::error::{MemoryError, MemoryResult};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Root configuration for a [`crate::MemoryEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Working hypervector dimensionality `d`
    pub dimensions: usize,
    /// Dimensionality of the external embeddings fed to the codebook
    pub embedding_dimensions: usize,
    /// Seed of the random projection codebook
    pub codebook_seed: u64,
    pub wave: WaveConfig,
    pub encoding: EncodingConfig,
    pub topology: TopologyConfig,
    pub differentiation: DifferentiationConfig,
    pub consolidation: ConsolidationConfig,
    pub retrieval: RetrievalConfig,
    pub persistence: PersistenceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimensions: 10_000,
            embedding_dimensions: 384,
            codebook_seed: 42,
            wave: WaveConfig::default(),
            encoding: EncodingConfig::default(),
            topology: TopologyConfig::default(),
            differentiation: DifferentiationConfig::default(),
            consolidation: ConsolidationConfig::default(),
            retrieval: RetrievalConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Wave dynamics: time base, decay and amplitude bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    /// Seconds per wave time unit (frequencies are cycles per unit)
    pub time_unit_secs: f64,
    /// Decay rate λ assigned to new memories (per time unit)
    pub default_decay_rate: f32,
    /// Amplitude at or below which a memory counts as faded
    pub amplitude_floor: f32,
    /// Ceiling for reinforced amplitude
    pub max_amplitude: f32,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            time_unit_secs: 86_400.0, // one day
            default_decay_rate: 0.05,
            amplitude_floor: 0.05,
            max_amplitude: 10.0,
        }
    }
}

/// Encoding pipeline parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Importance used when the caller gives no hint
    pub default_importance: f32,
    /// amplitude = importance × importance_scale
    pub importance_scale: f32,
    /// Width of the initial phase window centred on 0 (radians)
    pub initial_phase_spread: f32,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            default_importance: 0.5,
            importance_scale: 2.0,
            initial_phase_spread: PI / 8.0,
        }
    }
}

/// HyperConnection (skip link) parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Cosine similarity above which encoding links to a deeper memory
    pub similarity_link_threshold: f32,
    /// Link strength = similarity × this scale at encoding time
    pub link_strength_scale: f32,
    /// Links created per new memory at most
    pub max_links_per_memory: usize,
    /// Links weaker than this are ignored by recall and pruned
    pub link_floor: f32,
    /// Independent exponential decay rate of link strength (per time unit)
    pub link_decay_rate: f32,
    /// Strength added when a link is rediscovered
    pub reinforce_step: f32,
    /// Ceiling for link strength
    pub max_link_strength: f32,
    /// Dimensionality of the compressed resonance key
    pub resonance_key_dims: usize,
    /// Link strength = similarity × this scale for consolidation links
    pub wire_strength_scale: f32,
    /// Depth gap a recall traversal must cross to be recorded
    pub min_traversal_span: u32,
    /// Recurrences of a traversal before a direct link is wired
    pub reinforce_after: u32,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            similarity_link_threshold: 0.7,
            link_strength_scale: 1.0,
            max_links_per_memory: 8,
            link_floor: 0.05,
            link_decay_rate: 0.02,
            reinforce_step: 0.1,
            max_link_strength: 1.0,
            resonance_key_dims: 64,
            wire_strength_scale: 0.8,
            min_traversal_span: 2,
            reinforce_after: 2,
        }
    }
}

/// Differentiation operator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferentiationConfig {
    /// k in boosted_similarity = base + k · force
    pub diversity_weight: f32,
    /// Minimum cosine similarity for a pair to be differentiated; only
    /// detected pairs are candidates, so it may not sit below
    /// `consolidation.interference_threshold`
    pub differentiation_similarity: f32,
    /// Minimum Ξ distance for a pair to be differentiated
    pub xi_distance_threshold: f32,
    /// Phase separation enforced between differentiated pairs (radians)
    pub separation: f32,
    /// Fraction of amplitude removed from both members
    pub amplitude_damping: f32,
    /// Ξ distances below this count as identical signatures
    pub xi_epsilon: f32,
}

impl Default for DifferentiationConfig {
    fn default() -> Self {
        Self {
            diversity_weight: 0.05,
            differentiation_similarity: 0.9,
            xi_distance_threshold: 0.3,
            separation: PI / 2.0,
            amplitude_damping: 0.05,
            xi_epsilon: 1e-4,
        }
    }
}

/// Kuramoto phase synchronization parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynchronizationConfig {
    /// Coupling K within a category
    pub intra_coupling: f32,
    /// Coupling K across categories
    pub inter_coupling: f32,
    /// Similarity required for cross-category coupling
    pub cross_coupling_similarity: f32,
    /// Euler integration step
    pub dt: f32,
    /// Integration steps per cycle
    pub steps: usize,
    /// Order parameter above which phase noise is injected
    pub high_order_bound: f32,
    /// Order parameter below which phases are nudged toward the mean
    pub low_order_bound: f32,
    /// Maximum magnitude of injected noise (radians)
    pub noise_strength: f32,
    /// Fraction of the distance to the mean phase covered by a nudge
    pub nudge_rate: f32,
}

impl Default for SynchronizationConfig {
    fn default() -> Self {
        Self {
            intra_coupling: 1.8,
            inter_coupling: 0.3,
            cross_coupling_similarity: 0.5,
            dt: 0.1,
            steps: 10,
            high_order_bound: 0.92,
            low_order_bound: 0.40,
            noise_strength: 0.3,
            nudge_rate: 0.5,
        }
    }
}

/// Consolidation cycle parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Largest working set replayed per cycle
    pub replay_limit: usize,
    /// Cosine similarity above which a pair interferes
    pub interference_threshold: f32,
    /// Phase difference bound for constructive (and π minus it for destructive)
    pub phase_alignment: f32,
    /// Smallest cluster bundled into a compound memory, at least 2
    pub min_cluster_size: usize,
    /// Amplitude added to both members of a constructive pair
    pub constructive_boost: f32,
    /// Amplitude removed from the weaker member of a destructive pair
    pub destructive_penalty: f32,
    /// Minimum age (seconds) to leave depth 0, 1, 2, ...
    pub transfer_tiers_secs: Vec<u64>,
    /// Growth factor for tiers beyond the listed ones
    pub tier_growth: u64,
    /// Interval of the background scheduler (seconds)
    pub interval_secs: u64,
    pub synchronization: SynchronizationConfig,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            replay_limit: 512,
            interference_threshold: 0.6,
            phase_alignment: PI / 4.0,
            min_cluster_size: 2,
            constructive_boost: 0.1,
            destructive_penalty: 0.4,
            transfer_tiers_secs: vec![3_600, 86_400, 604_800], // hour, day, week
            tier_growth: 4,
            interval_secs: 300,
            synchronization: SynchronizationConfig::default(),
        }
    }
}

impl ConsolidationConfig {
    /// Minimum age in seconds for a memory at `depth` to move one level deeper.
    pub fn transfer_age_secs(&self, depth: u32) -> u64 {
        let depth = depth as usize;
        match self.transfer_tiers_secs.get(depth) {
            Some(secs) => *secs,
            None => {
                let last = self.transfer_tiers_secs.last().copied().unwrap_or(3_600);
                let extra = depth + 1 - self.transfer_tiers_secs.len().max(1);
                (0..extra).fold(last, |age, _| age.saturating_mul(self.tier_growth))
            }
        }
    }
}

/// Retrieval parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Similarity candidates gathered per requested result
    pub candidate_multiplier: usize,
    /// Default minimum cosine similarity for direct candidates
    pub min_similarity: f32,
    /// Amplitude added to each returned memory
    pub access_boost: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: 3,
            min_similarity: 0.0,
            access_boost: 0.05,
        }
    }
}

/// Persistence parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Delay before the single retry of a transient I/O failure
    pub retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { retry_backoff_ms: 50 }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON configuration and validate it.
    pub fn from_json(json: &str) -> MemoryResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> MemoryResult<()> {
        fn invalid(reason: impl Into<String>) -> MemoryResult<()> {
            Err(MemoryError::InvalidConfig {
                reason: reason.into(),
            })
        }

        if self.dimensions < 2 {
            return invalid("dimensions must be at least 2");
        }
        if self.embedding_dimensions == 0 {
            return invalid("embedding_dimensions must be positive");
        }
        if !(self.wave.time_unit_secs > 0.0) {
            return invalid("wave.time_unit_secs must be positive");
        }
        if self.wave.amplitude_floor < 0.0 || self.topology.link_floor < 0.0 {
            return invalid("floors must be non-negative");
        }
        if self.wave.max_amplitude <= self.wave.amplitude_floor {
            return invalid("wave.max_amplitude must exceed the amplitude floor");
        }
        for (name, value) in [
            ("topology.similarity_link_threshold", self.topology.similarity_link_threshold),
            ("consolidation.interference_threshold", self.consolidation.interference_threshold),
            ("differentiation.differentiation_similarity", self.differentiation.differentiation_similarity),
            ("retrieval.min_similarity", self.retrieval.min_similarity),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be a cosine similarity in [-1, 1]"));
            }
        }
        if self.differentiation.differentiation_similarity < self.consolidation.interference_threshold {
            return invalid(
                "differentiation.differentiation_similarity must not be below consolidation.interference_threshold",
            );
        }
        if self.consolidation.min_cluster_size < 2 {
            return invalid("consolidation.min_cluster_size must be at least 2");
        }
        if self.retrieval.candidate_multiplier == 0 {
            return invalid("retrieval.candidate_multiplier must be positive");
        }
        if self.topology.resonance_key_dims == 0 {
            return invalid("topology.resonance_key_dims must be positive");
        }
        let sync = &self.consolidation.synchronization;
        if sync.steps == 0 || !(sync.dt > 0.0) {
            return invalid("synchronization needs positive steps and dt");
        }
        if sync.low_order_bound >= sync.high_order_bound {
            return invalid("synchronization.low_order_bound must be below high_order_bound");
        }
        let tiers = &self.consolidation.transfer_tiers_secs;
        if tiers.is_empty() || tiers.windows(2).any(|w| w[0] > w[1]) {
            return invalid("consolidation.transfer_tiers_secs must be non-empty and ascending");
        }
        if self.consolidation.tier_growth == 0 {
            return invalid("consolidation.tier_growth must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(
            r#"{ "dimensions": 2048, "consolidation": { "interference_threshold": 0.5 } }"#,
        )
        .unwrap();

        assert_eq!(config.dimensions, 2048);
        assert_eq!(config.embedding_dimensions, 384);
        assert!((config.consolidation.interference_threshold - 0.5).abs() < 1e-6);
        assert!((config.consolidation.synchronization.intra_coupling - 1.8).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let mut config = EngineConfig::default();
        config.consolidation.synchronization.low_order_bound = 0.95;
        assert!(matches!(
            config.validate(),
            Err(MemoryError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_differentiation_bar_below_detection_rejected() {
        let mut config = EngineConfig::default();
        config.consolidation.interference_threshold = 0.8;
        config.differentiation.differentiation_similarity = 0.7;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("differentiation_similarity"), "{err}");

        config.differentiation.differentiation_similarity = 0.8;
        assert!(config.validate().is_ok());

        let json = r#"{ "consolidation": { "interference_threshold": 0.95 } }"#;
        assert!(matches!(
            EngineConfig::from_json(json),
            Err(MemoryError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_single_member_clusters_rejected() {
        let mut config = EngineConfig::default();
        config.consolidation.min_cluster_size = 1;
        assert!(matches!(
            config.validate(),
            Err(MemoryError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_transfer_tiers_extend_geometrically() {
        let config = ConsolidationConfig::default();
        assert_eq!(config.transfer_age_secs(0), 3_600);
        assert_eq!(config.transfer_age_secs(2), 604_800);
        assert_eq!(config.transfer_age_secs(3), 604_800 * 4);
        assert_eq!(config.transfer_age_secs(4), 604_800 * 16);
    }
}
