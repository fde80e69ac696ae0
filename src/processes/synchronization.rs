/// Kuramoto phase synchronization.
///
/// Each memory is an oscillator with natural frequency `2πf`. Within a
/// category every pair is coupled with `K_intra`; across categories only
/// pairs above the similarity bar are coupled, with the weaker `K_inter`.
/// Integration runs in the rotating frame of each category's mean frequency,
/// so only detuning and coupling move the stored phase offsets.
///
/// After integration the order parameter `r = |⟨e^{iφ}⟩|` of each category is
/// kept away from both extremes: a category locked above the high bound gets
/// deterministic noise, one scattered below the low bound is nudged toward its
/// mean phase.
use crate::config::SynchronizationConfig;
use crate::memory::{Category, MemoryId, MemoryStore};
use crate::wave::wrap_phase;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::f32::consts::TAU;

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub oscillators: usize,
    pub order_before: BTreeMap<Category, f32>,
    pub order_after: BTreeMap<Category, f32>,
    /// Categories that received phase noise
    pub noised: Vec<Category>,
    /// Categories nudged toward their mean phase
    pub nudged: Vec<Category>,
}

/// Kuramoto order parameter of a set of phases, 0 for an empty set.
pub fn order_parameter(phases: impl IntoIterator<Item = f32>) -> f32 {
    let (mut sum_cos, mut sum_sin, mut n) = (0.0f32, 0.0f32, 0usize);
    for phase in phases {
        sum_cos += phase.cos();
        sum_sin += phase.sin();
        n += 1;
    }
    if n == 0 {
        return 0.0;
    }
    let n = n as f32;
    ((sum_cos / n).powi(2) + (sum_sin / n).powi(2)).sqrt()
}

/// Circular mean of a set of phases; `None` when they cancel out.
pub fn mean_phase(phases: impl IntoIterator<Item = f32>) -> Option<f32> {
    let (mut sum_cos, mut sum_sin) = (0.0f32, 0.0f32);
    for phase in phases {
        sum_cos += phase.cos();
        sum_sin += phase.sin();
    }
    if sum_cos.hypot(sum_sin) < 1e-6 {
        return None;
    }
    Some(sum_sin.atan2(sum_cos))
}

/// Order parameter per category over the given memories.
pub fn category_order<'a>(
    memories: impl IntoIterator<Item = &'a crate::memory::Memory>,
) -> BTreeMap<Category, f32> {
    let mut phases: BTreeMap<Category, Vec<f32>> = BTreeMap::new();
    for m in memories {
        phases.entry(m.category).or_default().push(m.phase);
    }
    phases
        .into_iter()
        .map(|(category, p)| (category, order_parameter(p)))
        .collect()
}

struct Oscillator {
    id: MemoryId,
    category: Category,
    detuning: f32,
    phase: f32,
}

/// Synchronize the phases of `ids` in place.
///
/// `seed` drives the noise generator, so a given store and seed always
/// produce the same phases.
pub fn synchronize(
    store: &mut MemoryStore,
    ids: &[MemoryId],
    config: &SynchronizationConfig,
    seed: u64,
) -> SyncReport {
    let members: Vec<&crate::memory::Memory> = ids.iter().filter_map(|id| store.get(*id)).collect();
    let n = members.len();
    let mut report = SyncReport {
        oscillators: n,
        order_before: category_order(members.iter().copied()),
        ..SyncReport::default()
    };
    if n == 0 {
        return report;
    }

    // rotating frame: subtract each category's mean natural frequency
    let mut mean_omega: BTreeMap<Category, (f32, usize)> = BTreeMap::new();
    for m in &members {
        let entry = mean_omega.entry(m.category).or_insert((0.0, 0));
        entry.0 += TAU * m.frequency;
        entry.1 += 1;
    }
    let group_size = |c: Category| mean_omega.get(&c).map(|(_, k)| *k).unwrap_or(1).max(1);

    let mut oscillators: Vec<Oscillator> = members
        .iter()
        .map(|m| {
            let (sum, count) = mean_omega[&m.category];
            Oscillator {
                id: m.id,
                category: m.category,
                detuning: TAU * m.frequency - sum / count as f32,
                phase: m.phase,
            }
        })
        .collect();

    // coupling lists: all pairs within a category, similar pairs across
    let mut coupling: Vec<Vec<(usize, f32)>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in (i + 1)..n {
            let k = if members[i].category == members[j].category {
                config.intra_coupling
            } else if members[i].vector.similarity(&members[j].vector)
                > config.cross_coupling_similarity
            {
                config.inter_coupling
            } else {
                continue;
            };
            coupling[i].push((j, k));
            coupling[j].push((i, k));
        }
    }

    for _ in 0..config.steps {
        let phases: Vec<f32> = oscillators.iter().map(|o| o.phase).collect();
        for (i, osc) in oscillators.iter_mut().enumerate() {
            let pull: f32 = coupling[i]
                .iter()
                .map(|&(j, k)| k * (phases[j] - phases[i]).sin())
                .sum();
            let dphi = osc.detuning + pull / group_size(osc.category) as f32;
            osc.phase += dphi * config.dt;
        }
    }
    for osc in oscillators.iter_mut() {
        osc.phase = wrap_phase(osc.phase);
    }

    // keep each category between the order bounds
    let categories: Vec<Category> = mean_omega.keys().copied().collect();
    for category in categories {
        let idx: Vec<usize> = (0..n).filter(|&i| oscillators[i].category == category).collect();
        if idx.len() < 2 {
            continue;
        }
        let r = order_parameter(idx.iter().map(|&i| oscillators[i].phase));
        if r > config.high_order_bound && config.noise_strength > 0.0 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed ^ ((category as u64) << 32));
            for &i in &idx {
                let noise = rng.gen_range(-config.noise_strength..=config.noise_strength);
                oscillators[i].phase = wrap_phase(oscillators[i].phase + noise);
            }
            report.noised.push(category);
        } else if r < config.low_order_bound {
            if let Some(mean) = mean_phase(idx.iter().map(|&i| oscillators[i].phase)) {
                for &i in &idx {
                    let delta = wrap_phase(mean - oscillators[i].phase);
                    oscillators[i].phase = wrap_phase(oscillators[i].phase + config.nudge_rate * delta);
                }
                report.nudged.push(category);
            }
        }
    }

    for osc in &oscillators {
        if let Some(m) = store.get_mut(osc.id) {
            m.phase = osc.phase;
        }
    }
    report.order_after = category_order(ids.iter().filter_map(|id| store.get(*id)));
    report
}
