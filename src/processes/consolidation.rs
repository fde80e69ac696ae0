/// Consolidation Process: the sleep cycle of memory.
///
/// One cycle runs nine ordered stages over the store:
///
/// ```text
/// replay → detect → bundle → strengthen → synchronize
///        → differentiate → prune → transfer → wire
/// ```
///
/// Every mutating stage works on a private copy of the last committed store
/// and is published as a whole once its output passes the numeric checks. A
/// failing stage abandons the rest of the cycle; whatever earlier stages
/// published stays committed.
use crate::config::EngineConfig;
use crate::differentiation::xi_distance;
use crate::error::ConsolidationError;
use crate::memory::{Category, IdAllocator, Memory, MemoryId, MemoryKind, MemoryStore};
use crate::processes::synchronization::{self, mean_phase};
use crate::topology::{self, LinkOrigin, SkipLink, TraversalLog};
use crate::vector::Hypervector;
use crate::wave::{phase_difference, wrap_phase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Consolidation stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Replay,
    Detect,
    Bundle,
    Strengthen,
    Synchronize,
    Differentiate,
    Prune,
    Transfer,
    Wire,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Replay,
        Stage::Detect,
        Stage::Bundle,
        Stage::Strengthen,
        Stage::Synchronize,
        Stage::Differentiate,
        Stage::Prune,
        Stage::Transfer,
        Stage::Wire,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Replay => "replay",
            Stage::Detect => "detect",
            Stage::Bundle => "bundle",
            Stage::Strengthen => "strengthen",
            Stage::Synchronize => "synchronize",
            Stage::Differentiate => "differentiate",
            Stage::Prune => "prune",
            Stage::Transfer => "transfer",
            Stage::Wire => "wire",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a detected pair interferes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interference {
    Constructive,
    Destructive,
    Neutral,
}

/// A pair of similar memories found by the detect stage.
#[derive(Debug, Clone, PartialEq)]
pub struct InterferencePair {
    pub a: MemoryId,
    pub b: MemoryId,
    pub similarity: f32,
    /// Phase difference normalized to [0, π]
    pub phase_difference: f32,
    pub xi_distance: f32,
    pub kind: Interference,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    /// 1-based cycle number
    pub cycle: u64,
    pub stages_run: Vec<Stage>,
    /// A stop request cut the cycle short
    pub cancelled: bool,
    pub replayed: usize,
    pub pairs_detected: usize,
    pub constructive_pairs: usize,
    pub destructive_pairs: usize,
    pub bundles_created: usize,
    pub bundles_updated: usize,
    pub memories_strengthened: usize,
    pub memories_differentiated: usize,
    pub memories_faded: usize,
    pub memories_transferred: usize,
    pub links_created: usize,
    pub links_pruned: usize,
    /// Distinct memories modified by any stage
    pub memories_touched: usize,
    /// Order parameter per category after synchronization
    pub order_parameters: BTreeMap<Category, f32>,
}

impl ConsolidationReport {
    /// Whether every stage ran.
    pub fn is_complete(&self) -> bool {
        self.stages_run.len() == Stage::ALL.len()
    }
}

/// Shared handles a cycle needs besides the store.
pub struct CycleContext<'a> {
    pub now: DateTime<Utc>,
    pub ids: &'a IdAllocator,
    pub traversals: &'a TraversalLog,
    pub stop: &'a AtomicBool,
}

/// Data handed from one stage to the next; never published.
#[derive(Default)]
struct CycleScratch {
    working_set: Vec<MemoryId>,
    pairs: Vec<InterferencePair>,
    touched: BTreeSet<MemoryId>,
    wired_traversals: Vec<(MemoryId, MemoryId)>,
}

/// Consolidation statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsolidationStats {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub cycles_cancelled: u64,
}

/// Consolidation Process - runs cycles against a committed store.
pub struct ConsolidationProcess {
    config: EngineConfig,
    cycle_count: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl ConsolidationProcess {
    /// Create with the engine's configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::resuming(config, 0)
    }

    /// Continue numbering after `cycles_completed` earlier cycles.
    pub fn resuming(config: EngineConfig, cycles_completed: u64) -> Self {
        Self {
            config,
            cycle_count: AtomicU64::new(cycles_completed),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    /// Get the number of completed cycles.
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ConsolidationStats {
        ConsolidationStats {
            cycles_completed: self.cycle_count(),
            cycles_failed: self.failed.load(Ordering::Relaxed),
            cycles_cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Get interval.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.consolidation.interval_secs)
    }

    /// Run one cycle starting from `committed`.
    ///
    /// `publish` receives each committed stage result in order. On error the
    /// last published store is the state to keep.
    pub fn run_cycle<F>(
        &self,
        mut committed: Arc<MemoryStore>,
        ctx: &CycleContext<'_>,
        mut publish: F,
    ) -> Result<ConsolidationReport, ConsolidationError>
    where
        F: FnMut(Stage, &Arc<MemoryStore>),
    {
        let cycle = self.cycle_count() + 1;
        let mut report = ConsolidationReport {
            cycle,
            ..ConsolidationReport::default()
        };
        let mut scratch = CycleScratch::default();

        for stage in Stage::ALL {
            if ctx.stop.load(Ordering::SeqCst) {
                debug!(cycle, next = %stage, "stop requested, skipping remaining stages");
                report.cancelled = true;
                break;
            }

            match stage {
                Stage::Replay => self.replay(&committed, &mut scratch, &mut report),
                Stage::Detect => self.detect(&committed, &mut scratch, &mut report),
                _ => {
                    let mut working = MemoryStore::clone(&committed);
                    self.apply(stage, &mut working, &mut scratch, ctx, &mut report);
                    if let Err(error) = check_numerics(stage, &working) {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(cycle, stage = %stage, %error, "consolidation cycle aborted");
                        return Err(error);
                    }
                    committed = Arc::new(working);
                    publish(stage, &committed);
                }
            }
            report.stages_run.push(stage);

            if stage == Stage::Wire {
                for (anchor, target) in scratch.wired_traversals.drain(..) {
                    ctx.traversals.clear(anchor, target);
                }
            }
        }

        report.memories_touched = scratch.touched.len();
        if report.cancelled {
            self.cancelled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cycle_count.fetch_add(1, Ordering::Relaxed);
        }
        info!(
            cycle,
            stages = report.stages_run.len(),
            touched = report.memories_touched,
            links_created = report.links_created,
            links_pruned = report.links_pruned,
            "consolidation cycle finished"
        );
        Ok(report)
    }

    /// Run a mutating stage against the working copy.
    fn apply(
        &self,
        stage: Stage,
        store: &mut MemoryStore,
        scratch: &mut CycleScratch,
        ctx: &CycleContext<'_>,
        report: &mut ConsolidationReport,
    ) {
        match stage {
            Stage::Replay | Stage::Detect => {}
            Stage::Bundle => self.bundle(store, scratch, ctx, report),
            Stage::Strengthen => self.strengthen(store, scratch, report),
            Stage::Synchronize => self.synchronize(store, scratch, report),
            Stage::Differentiate => self.differentiate(store, scratch, report),
            Stage::Prune => self.prune(store, scratch, ctx, report),
            Stage::Transfer => self.transfer(store, scratch, ctx, report),
            Stage::Wire => self.wire(store, scratch, ctx, report),
        }
    }

    /// Working set: active episodic memories, most recent first.
    fn replay(&self, store: &MemoryStore, scratch: &mut CycleScratch, report: &mut ConsolidationReport) {
        let floor = self.config.wave.amplitude_floor;
        let mut active: Vec<&Memory> = store.active(floor).filter(|m| !m.is_compound()).collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        active.truncate(self.config.consolidation.replay_limit);

        scratch.working_set = active.iter().map(|m| m.id).collect();
        report.replayed = scratch.working_set.len();
        debug!(replayed = report.replayed, "replay");
    }

    /// Similar pairs, classified by phase difference.
    fn detect(&self, store: &MemoryStore, scratch: &mut CycleScratch, report: &mut ConsolidationReport) {
        let cfg = &self.config.consolidation;
        let members: Vec<&Memory> = scratch.working_set.iter().filter_map(|id| store.get(*id)).collect();

        let mut pairs = Vec::new();
        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                let similarity = a.vector.similarity(&b.vector);
                if similarity <= cfg.interference_threshold {
                    continue;
                }
                let diff = phase_difference(a.phase, b.phase);
                let kind = if diff < cfg.phase_alignment {
                    Interference::Constructive
                } else if diff > PI - cfg.phase_alignment {
                    Interference::Destructive
                } else {
                    Interference::Neutral
                };
                let (a_id, b_id) = if a.id < b.id { (a.id, b.id) } else { (b.id, a.id) };
                pairs.push(InterferencePair {
                    a: a_id,
                    b: b_id,
                    similarity,
                    phase_difference: diff,
                    xi_distance: xi_distance(&a.differentiation_signature, &b.differentiation_signature),
                    kind,
                });
            }
        }
        pairs.sort_by(|x, y| (x.a, x.b).cmp(&(y.a, y.b)));

        report.pairs_detected = pairs.len();
        report.constructive_pairs = pairs.iter().filter(|p| p.kind == Interference::Constructive).count();
        report.destructive_pairs = pairs.iter().filter(|p| p.kind == Interference::Destructive).count();
        scratch.pairs = pairs;
        debug!(
            pairs = report.pairs_detected,
            constructive = report.constructive_pairs,
            destructive = report.destructive_pairs,
            "detect"
        );
    }

    /// Clusters of detected pairs become (or refresh) compound memories,
    /// whatever their interference kind.
    fn bundle(
        &self,
        store: &mut MemoryStore,
        scratch: &mut CycleScratch,
        ctx: &CycleContext<'_>,
        report: &mut ConsolidationReport,
    ) {
        let edges: Vec<(MemoryId, MemoryId)> = scratch.pairs.iter().map(|p| (p.a, p.b)).collect();

        for cluster in topology::connected_components(&edges) {
            if cluster.len() < self.config.consolidation.min_cluster_size {
                continue;
            }

            let existing = store
                .iter()
                .filter(|m| m.members().iter().any(|id| cluster.contains(id)))
                .map(|m| m.id)
                .next();

            match existing {
                Some(compound_id) => {
                    if self.refresh_compound(store, compound_id, &cluster) {
                        scratch.touched.insert(compound_id);
                        report.bundles_updated += 1;
                    }
                }
                None => {
                    if let Some(compound) = self.new_compound(store, &cluster, ctx) {
                        debug!(compound = %compound.id, members = cluster.len(), "compound memory created");
                        scratch.touched.insert(compound.id);
                        store.insert(compound);
                        report.bundles_created += 1;
                    }
                }
            }
        }
        debug!(created = report.bundles_created, updated = report.bundles_updated, "bundle");
    }

    fn new_compound(&self, store: &MemoryStore, cluster: &[MemoryId], ctx: &CycleContext<'_>) -> Option<Memory> {
        let members: Vec<&Memory> = cluster.iter().filter_map(|id| store.get(*id)).collect();
        let vector = Hypervector::bundle(members.iter().map(|m| &m.vector))?;

        // majority category, ties to the first in declaration order
        let mut votes: BTreeMap<Category, usize> = BTreeMap::new();
        for m in &members {
            *votes.entry(m.category).or_default() += 1;
        }
        let top = votes.values().copied().max().unwrap_or(0);
        let category = votes
            .iter()
            .find(|(_, n)| **n == top)
            .map(|(c, _)| *c)
            .unwrap_or(Category::Experience);

        let in_category: Vec<f32> = members
            .iter()
            .filter(|m| m.category == category)
            .map(|m| m.frequency)
            .collect();
        let frequency = if in_category.is_empty() {
            category.frequency_at(0.5)
        } else {
            in_category.iter().sum::<f32>() / in_category.len() as f32
        };
        let amplitude = (members.iter().map(|m| m.amplitude).sum::<f32>() / members.len() as f32)
            .min(self.config.wave.max_amplitude);
        let phase = mean_phase(members.iter().map(|m| m.phase)).unwrap_or(0.0);
        let decay_rate = members
            .iter()
            .map(|m| m.decay_rate)
            .fold(f32::INFINITY, f32::min);
        let depth = members.iter().map(|m| m.layer_depth).max().unwrap_or(0) + 1;

        let mut compound = Memory::new(
            ctx.ids.allocate(),
            vector,
            amplitude,
            frequency,
            phase,
            decay_rate,
            category,
            ctx.now,
        );
        compound.layer_depth = depth;
        compound.kind = MemoryKind::Compound {
            members: cluster.to_vec(),
        };
        Some(compound)
    }

    /// Grow an existing compound to cover `cluster`; false if nothing changed.
    fn refresh_compound(&self, store: &mut MemoryStore, compound_id: MemoryId, cluster: &[MemoryId]) -> bool {
        let Some(compound) = store.get(compound_id) else {
            return false;
        };
        let mut union: BTreeSet<MemoryId> = compound.members().iter().copied().collect();
        let before = union.len();
        union.extend(cluster.iter().copied());
        if union.len() == before {
            return false;
        }

        let members: Vec<MemoryId> = union.into_iter().collect();
        let vector = Hypervector::bundle(members.iter().filter_map(|id| store.get(*id)).map(|m| &m.vector));
        let depth = members
            .iter()
            .filter_map(|id| store.get(*id))
            .map(|m| m.layer_depth + 1)
            .max()
            .unwrap_or(1);

        let Some(compound) = store.get_mut(compound_id) else {
            return false;
        };
        if let Some(vector) = vector {
            compound.replace_vector(vector);
        }
        compound.layer_depth = compound.layer_depth.max(depth);
        compound.kind = MemoryKind::Compound { members };
        true
    }

    /// Constructive pairs gain amplitude.
    fn strengthen(&self, store: &mut MemoryStore, scratch: &mut CycleScratch, report: &mut ConsolidationReport) {
        let boost = self.config.consolidation.constructive_boost;
        let max = self.config.wave.max_amplitude;
        let mut strengthened = BTreeSet::new();
        for pair in scratch.pairs.iter().filter(|p| p.kind == Interference::Constructive) {
            for id in [pair.a, pair.b] {
                if let Some(m) = store.get_mut(id) {
                    m.amplitude = (m.amplitude + boost).min(max);
                    strengthened.insert(id);
                }
            }
        }
        report.memories_strengthened = strengthened.len();
        scratch.touched.extend(strengthened);
        debug!(strengthened = report.memories_strengthened, "strengthen");
    }

    /// Every active memory takes part, compounds and unreplayed ones included.
    fn synchronize(&self, store: &mut MemoryStore, scratch: &mut CycleScratch, report: &mut ConsolidationReport) {
        let active: Vec<MemoryId> = store.active(self.config.wave.amplitude_floor).map(|m| m.id).collect();
        let sync = synchronization::synchronize(
            store,
            &active,
            &self.config.consolidation.synchronization,
            report.cycle,
        );
        if sync.oscillators > 1 {
            scratch.touched.extend(active);
        }
        debug!(
            oscillators = sync.oscillators,
            noised = sync.noised.len(),
            nudged = sync.nudged.len(),
            "synchronize"
        );
        report.order_parameters = sync.order_after;
    }

    /// Similar memories with distinct Ξ signatures are pushed out of phase.
    fn differentiate(&self, store: &mut MemoryStore, scratch: &mut CycleScratch, report: &mut ConsolidationReport) {
        let cfg = &self.config.differentiation;
        let mut differentiated = BTreeSet::new();

        for pair in &scratch.pairs {
            if pair.similarity <= cfg.differentiation_similarity
                || pair.xi_distance <= cfg.xi_distance_threshold
                || pair.xi_distance < cfg.xi_epsilon
            {
                continue;
            }
            let Some((a, b)) = store.pair_mut(pair.a, pair.b) else {
                continue;
            };

            let diff = wrap_phase(b.phase - a.phase);
            if diff.abs() < cfg.separation {
                let push = (cfg.separation - diff.abs()) / 2.0;
                let direction = if diff >= 0.0 { 1.0 } else { -1.0 };
                a.phase = wrap_phase(a.phase - direction * push);
                b.phase = wrap_phase(b.phase + direction * push);
            }
            a.amplitude *= 1.0 - cfg.amplitude_damping;
            b.amplitude *= 1.0 - cfg.amplitude_damping;
            differentiated.insert(pair.a);
            differentiated.insert(pair.b);
        }

        report.memories_differentiated = differentiated.len();
        scratch.touched.extend(differentiated);
        debug!(differentiated = report.memories_differentiated, "differentiate");
    }

    /// Destructive pairs lose amplitude; links decay and sub-floor links go.
    fn prune(
        &self,
        store: &mut MemoryStore,
        scratch: &mut CycleScratch,
        ctx: &CycleContext<'_>,
        report: &mut ConsolidationReport,
    ) {
        let penalty = self.config.consolidation.destructive_penalty;
        let floor = self.config.wave.amplitude_floor;
        let mut faded = BTreeSet::new();

        for pair in scratch.pairs.iter().filter(|p| p.kind == Interference::Destructive) {
            let Some((a, b)) = store.pair_mut(pair.a, pair.b) else {
                continue;
            };
            // equal amplitudes: the later memory counts as weaker
            let (weaker, stronger) = if a.amplitude < b.amplitude { (a, b) } else { (b, a) };
            weaker.amplitude = (weaker.amplitude - penalty).max(0.0);
            stronger.amplitude = (stronger.amplitude - penalty / 2.0).max(0.0);
            for m in [weaker, stronger] {
                scratch.touched.insert(m.id);
                if m.is_faded(floor) {
                    m.amplitude = 0.0;
                    faded.insert(m.id);
                }
            }
        }

        let mut links_pruned = 0;
        for m in store.iter_mut() {
            let removed = topology::decay_and_prune(m, &self.config.topology, &self.config.wave, ctx.now);
            if removed > 0 {
                scratch.touched.insert(m.id);
                links_pruned += removed;
            }
        }

        report.memories_faded = faded.len();
        report.links_pruned = links_pruned;
        debug!(faded = report.memories_faded, links_pruned, "prune");
    }

    /// Old enough survivors move one layer deeper.
    fn transfer(
        &self,
        store: &mut MemoryStore,
        scratch: &mut CycleScratch,
        ctx: &CycleContext<'_>,
        report: &mut ConsolidationReport,
    ) {
        let floor = self.config.wave.amplitude_floor;
        let mut transferred = 0;
        for m in store.iter_mut().filter(|m| !m.is_faded(floor)) {
            let required = self.config.consolidation.transfer_age_secs(m.layer_depth);
            if m.age_secs(ctx.now) >= required as f64 {
                m.layer_depth += 1;
                scratch.touched.insert(m.id);
                transferred += 1;
            }
        }
        report.memories_transferred = transferred;
        debug!(transferred, "transfer");
    }

    /// Links for cross-depth constructive pairs and recurring traversals.
    fn wire(
        &self,
        store: &mut MemoryStore,
        scratch: &mut CycleScratch,
        ctx: &CycleContext<'_>,
        report: &mut ConsolidationReport,
    ) {
        let topo = &self.config.topology;
        let mut planned: Vec<(MemoryId, SkipLink)> = Vec::new();

        for pair in scratch.pairs.iter().filter(|p| p.kind == Interference::Constructive) {
            let (Some(a), Some(b)) = (store.get(pair.a), store.get(pair.b)) else {
                continue;
            };
            if a.layer_depth == b.layer_depth {
                continue;
            }
            let strength = pair.similarity * topo.wire_strength_scale;
            planned.push((a.id, SkipLink::between(a, b, strength, LinkOrigin::Consolidation, topo, ctx.now)));
            planned.push((b.id, SkipLink::between(b, a, strength, LinkOrigin::Consolidation, topo, ctx.now)));
        }

        for (anchor, target) in ctx.traversals.due(topo.reinforce_after) {
            let (Some(a), Some(t)) = (store.get(anchor), store.get(target)) else {
                continue;
            };
            // recurring paths stay traversable even between dissimilar memories
            let strength = (a.vector.similarity(&t.vector) * topo.wire_strength_scale)
                .max(topo.link_floor + topo.reinforce_step);
            planned.push((anchor, SkipLink::between(a, t, strength, LinkOrigin::Retrieval, topo, ctx.now)));
            scratch.wired_traversals.push((anchor, target));
        }

        let mut created = 0;
        for (source, link) in planned {
            if let Some(m) = store.get_mut(source) {
                if topology::link_or_reinforce(m, link, topo, ctx.now) {
                    created += 1;
                }
                scratch.touched.insert(source);
            }
        }
        report.links_created = created;
        debug!(created, traversals = scratch.wired_traversals.len(), "wire");
    }
}

/// Reject a stage result with non-finite or negative values.
fn check_numerics(stage: Stage, store: &MemoryStore) -> Result<(), ConsolidationError> {
    for m in store.iter() {
        let bad_field = if !m.amplitude.is_finite() || m.amplitude < 0.0 {
            Some("amplitude")
        } else if !m.phase.is_finite() {
            Some("phase")
        } else if m.connections.iter().any(|l| !l.strength.is_finite()) {
            Some("link strength")
        } else {
            None
        };
        if let Some(field) = bad_field {
            return Err(ConsolidationError::NumericalInstability {
                stage: stage.name(),
                memory: m.id,
                field,
            });
        }
    }
    Ok(())
}
