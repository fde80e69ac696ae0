/// Core engine implementation.
///
/// [`MemoryEngine`] ties the pieces together: the encoding pipeline writes
/// new memories, retrieval reads the last committed store, and consolidation
/// replaces that store one stage at a time.
///
/// # Concurrency
///
/// - The committed store is an `Arc<MemoryStore>` behind a lock that is only
///   held to swap or patch the pointer. Readers clone the `Arc` and work on an
///   immutable snapshot, so they never see half of a stage.
/// - Consolidation is the single structural writer and holds the cycle lock
///   for the whole cycle.
/// - While a cycle runs, new memories, access reinforcement and traversal
///   records are staged and merged when the cycle ends.
/// - Lock order: staging, then committed.
use crate::codebook::{Codebook, CodebookSpec};
use crate::config::EngineConfig;
use crate::encoding::{EncodingPipeline, Observation};
use crate::error::{MemoryError, MemoryResult, PersistenceError};
use crate::memory::{IdAllocator, Memory, MemoryId, MemoryStore};
use crate::observe::{self, NetworkObservation};
use crate::persistence::{Snapshot, SnapshotMetadata, SnapshotStore};
use crate::processes::{ConsolidationProcess, ConsolidationReport, ConsolidationStats, CycleContext};
use crate::retrieval::{self, RecallHit, RecallOptions};
use crate::topology::{self, TraversalLog};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// The memory engine.
///
/// Cloning is cheap and every clone shares the same store.
///
/// # Example
///
/// ```ignore
/// use holomem::{EngineConfig, MemoryEngine, Observation};
///
/// let engine = MemoryEngine::new(EngineConfig::default())?;
/// let id = engine.remember(Observation::new(embedding).with_category("fact"))?;
///
/// let hits = engine.recall(&query, 5)?;
/// let report = engine.consolidate()?;
/// println!("{} stages, {} links", report.stages_run.len(), report.links_created);
/// ```
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    pipeline: EncodingPipeline,
    committed: RwLock<Arc<MemoryStore>>,
    staging: Mutex<Staging>,
    cycle_lock: Mutex<()>,
    ids: IdAllocator,
    traversals: TraversalLog,
    consolidation: ConsolidationProcess,
    stop: AtomicBool,
    created_at: DateTime<Utc>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
}

/// Writes that arrive while a cycle owns the store.
#[derive(Default)]
struct Staging {
    cycle_active: bool,
    memories: Vec<Memory>,
    accesses: Vec<(MemoryId, DateTime<Utc>)>,
    traversals: Vec<(MemoryId, MemoryId)>,
}

/// Ends the staging window when a cycle finishes, even by unwinding.
struct CycleWindow<'a> {
    inner: &'a EngineInner,
}

impl Drop for CycleWindow<'_> {
    fn drop(&mut self) {
        self.inner.merge_staged();
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("memories", &self.len())
            .field("cycles", &self.inner.consolidation.cycle_count())
            .field("codebook", &self.codebook_spec())
            .finish()
    }
}

impl MemoryEngine {
    /// Create an engine with an empty store and no snapshot store.
    pub fn new(config: EngineConfig) -> MemoryResult<Self> {
        config.validate()?;
        let engine = Self::assemble(config, MemoryStore::new(), 1, 0, Utc::now(), None);
        info!(codebook = %engine.codebook_spec(), "memory engine started");
        Ok(engine)
    }

    /// Open an engine backed by `snapshots`, restoring the saved store if any.
    ///
    /// Older snapshot formats are upgraded; a snapshot produced by a
    /// different codebook is refused.
    pub async fn open(config: EngineConfig, snapshots: Arc<dyn SnapshotStore>) -> MemoryResult<Self> {
        config.validate()?;
        let configured = codebook_spec(&config);

        let engine = match snapshots.load().await? {
            Some(snapshot) => {
                if snapshot.metadata.codebook != configured {
                    return Err(PersistenceError::CodebookMismatch {
                        found: snapshot.metadata.codebook.to_string(),
                        configured: configured.to_string(),
                    }
                    .into());
                }
                let meta = snapshot.metadata;
                let store = MemoryStore::from_memories(snapshot.memories);
                let next_id = store.max_id().map(|id| id.0 + 1).unwrap_or(1).max(meta.next_id);
                info!(
                    memories = store.len(),
                    cycles = meta.cycles_completed,
                    "memory engine restored from snapshot"
                );
                Self::assemble(
                    config,
                    store,
                    next_id,
                    meta.cycles_completed,
                    meta.created_at,
                    Some(snapshots),
                )
            }
            None => {
                info!(codebook = %configured, "no snapshot found, starting empty");
                Self::assemble(config, MemoryStore::new(), 1, 0, Utc::now(), Some(snapshots))
            }
        };
        Ok(engine)
    }

    fn assemble(
        config: EngineConfig,
        store: MemoryStore,
        next_id: u64,
        cycles_completed: u64,
        created_at: DateTime<Utc>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    ) -> Self {
        let codebook = Arc::new(Codebook::from_spec(codebook_spec(&config)));
        let pipeline = EncodingPipeline::new(codebook, config.encoding.clone(), config.wave.clone());
        Self {
            inner: Arc::new(EngineInner {
                pipeline,
                committed: RwLock::new(Arc::new(store)),
                staging: Mutex::new(Staging::default()),
                cycle_lock: Mutex::new(()),
                ids: IdAllocator::starting_at(next_id),
                traversals: TraversalLog::new(),
                consolidation: ConsolidationProcess::resuming(config.clone(), cycles_completed),
                stop: AtomicBool::new(false),
                created_at,
                snapshots,
                config,
            }),
        }
    }

    /// Save the current state to the attached snapshot store.
    pub async fn checkpoint(&self) -> MemoryResult<()> {
        let Some(snapshots) = self.inner.snapshots.clone() else {
            return Err(MemoryError::InvalidConfig {
                reason: "no snapshot store attached".into(),
            });
        };
        self.checkpoint_to(snapshots.as_ref()).await
    }

    /// Save the current state to `snapshots`.
    pub async fn checkpoint_to(&self, snapshots: &dyn SnapshotStore) -> MemoryResult<()> {
        let snapshot = self.snapshot_at(Utc::now());
        let count = snapshot.memories.len();
        snapshots.save(&snapshot).await?;
        info!(memories = count, cycles = snapshot.metadata.cycles_completed, "checkpoint saved");
        Ok(())
    }

    /// Build a snapshot of the committed store plus anything staged.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Snapshot {
        let staged = self.inner.lock_staging().memories.clone();
        let store = self.store();
        let mut memories: Vec<Memory> = store.iter().cloned().collect();
        memories.extend(staged);
        Snapshot {
            metadata: SnapshotMetadata {
                created_at: self.inner.created_at,
                saved_at: now,
                cycles_completed: self.inner.consolidation.cycle_count(),
                next_id: self.inner.ids.peek(),
                codebook: self.codebook_spec(),
            },
            memories,
        }
    }

    /// Encode and store an observation.
    pub fn remember(&self, observation: Observation) -> MemoryResult<MemoryId> {
        self.remember_at(observation, Utc::now())
    }

    /// Encode and store an observation as of `now`.
    pub fn remember_at(&self, observation: Observation, now: DateTime<Utc>) -> MemoryResult<MemoryId> {
        let inner = &self.inner;
        let id = inner.ids.allocate();
        let mut memory = inner.pipeline.encode(id, &observation, now)?;

        // the snapshot must be released before the insert below, or make_mut copies the store
        memory.connections = {
            let committed = self.store();
            topology::similarity_links(&memory, committed.iter(), &inner.config.topology, now)
        };
        debug!(
            id = %id,
            category = %memory.category,
            links = memory.connections.len(),
            "memory encoded"
        );

        let mut staging = inner.lock_staging();
        if staging.cycle_active {
            staging.memories.push(memory);
        } else {
            let mut store = inner.write_committed();
            Arc::make_mut(&mut store).insert(memory);
        }
        Ok(id)
    }

    /// Recall the `top_k` best memories for a query embedding.
    pub fn recall(&self, embedding: &[f32], top_k: usize) -> MemoryResult<Vec<RecallHit>> {
        self.recall_with(embedding, &RecallOptions::new(top_k))
    }

    pub fn recall_with(&self, embedding: &[f32], options: &RecallOptions) -> MemoryResult<Vec<RecallHit>> {
        self.recall_at(embedding, options, Utc::now())
    }

    /// Recall as of `now`.
    ///
    /// Returned memories are reinforced and cross-depth traversals recorded;
    /// both are deferred while a consolidation cycle runs.
    pub fn recall_at(
        &self,
        embedding: &[f32],
        options: &RecallOptions,
        now: DateTime<Utc>,
    ) -> MemoryResult<Vec<RecallHit>> {
        let inner = &self.inner;
        let query = inner.pipeline.project(embedding)?;
        let outcome = retrieval::recall(&self.store(), &query, options, &inner.config, now)?;
        trace!(hits = outcome.hits.len(), traversals = outcome.traversals.len(), "recall");

        let mut staging = inner.lock_staging();
        if staging.cycle_active {
            staging.accesses.extend(outcome.hits.iter().map(|h| (h.id, now)));
            staging.traversals.extend(outcome.traversals.iter().copied());
        } else {
            if !outcome.hits.is_empty() {
                let mut store = inner.write_committed();
                let store = Arc::make_mut(&mut store);
                for hit in &outcome.hits {
                    inner.reinforce_access(store, hit.id, now);
                }
            }
            for &(anchor, target) in &outcome.traversals {
                inner.traversals.record(anchor, target);
            }
        }
        Ok(outcome.hits)
    }

    /// Run one consolidation cycle now.
    pub fn consolidate(&self) -> MemoryResult<ConsolidationReport> {
        self.consolidate_at(Utc::now())
    }

    /// Run one consolidation cycle as of `now`.
    ///
    /// A failing stage aborts the cycle and is returned as an error; the
    /// store keeps every stage committed before it.
    pub fn consolidate_at(&self, now: DateTime<Utc>) -> MemoryResult<ConsolidationReport> {
        let inner = &self.inner;
        let _cycle = inner.cycle_lock.lock().unwrap_or_else(PoisonError::into_inner);

        inner.lock_staging().cycle_active = true;
        let _window = CycleWindow { inner: inner.as_ref() };

        let ctx = CycleContext {
            now,
            ids: &inner.ids,
            traversals: &inner.traversals,
            stop: &inner.stop,
        };
        let report = inner.consolidation.run_cycle(self.store(), &ctx, |stage, store| {
            *inner.write_committed() = Arc::clone(store);
            trace!(stage = %stage, "stage published");
        })?;
        Ok(report)
    }

    /// Run up to `cycles` consolidation cycles back to back.
    ///
    /// Stops early once a stop is requested; the cancelled cycle's report is
    /// the last one returned.
    pub fn consolidate_cycles(&self, cycles: usize) -> MemoryResult<Vec<ConsolidationReport>> {
        let mut reports = Vec::with_capacity(cycles);
        for _ in 0..cycles {
            let report = self.consolidate()?;
            let cancelled = report.cancelled;
            reports.push(report);
            if cancelled {
                break;
            }
        }
        debug!(requested = cycles, ran = reports.len(), "consolidation cycles finished");
        Ok(reports)
    }

    /// Observe aggregate network state.
    pub fn observe(&self) -> NetworkObservation {
        self.observe_at(Utc::now())
    }

    pub fn observe_at(&self, now: DateTime<Utc>) -> NetworkObservation {
        observe::observe(
            &self.store(),
            &self.inner.config,
            self.inner.consolidation.cycle_count(),
            now,
        )
    }

    /// Stop consolidation: no further stage starts until [`resume`](Self::resume).
    pub fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        info!("consolidation stop requested");
    }

    pub fn resume(&self) {
        self.inner.stop.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    /// Run consolidation in the background at the configured interval.
    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        let period = self.inner.consolidation.interval().max(Duration::from_millis(1));
        self.spawn_scheduler_every(period)
    }

    /// Run consolidation every `period` until a stop is requested.
    ///
    /// Cycles run on the blocking pool; a stop request lets the running
    /// stage finish and ends the task at the next tick.
    pub fn spawn_scheduler_every(&self, period: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if engine.is_stopped() {
                    break;
                }
                let worker = engine.clone();
                match tokio::task::spawn_blocking(move || worker.consolidate()).await {
                    Ok(Ok(report)) => debug!(cycle = report.cycle, "scheduled consolidation finished"),
                    Ok(Err(error)) => warn!(%error, "scheduled consolidation failed"),
                    Err(error) => {
                        error!(%error, "consolidation task panicked");
                        break;
                    }
                }
            }
            info!("consolidation scheduler stopped");
        })
    }

    /// The last committed store.
    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.inner.read_committed())
    }

    /// A copy of one memory, staged ones included.
    pub fn get(&self, id: MemoryId) -> Option<Memory> {
        if let Some(m) = self.store().get(id) {
            return Some(m.clone());
        }
        self.inner
            .lock_staging()
            .memories
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    /// Number of stored memories, faded and staged ones included.
    pub fn len(&self) -> usize {
        let staged = self.inner.lock_staging().memories.len();
        self.store().len() + staged
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn codebook_spec(&self) -> CodebookSpec {
        codebook_spec(&self.inner.config)
    }

    pub fn consolidation_stats(&self) -> ConsolidationStats {
        self.inner.consolidation.stats()
    }

    /// Traversals recorded but not yet wired.
    pub fn pending_traversals(&self) -> usize {
        self.inner.traversals.len()
    }
}

impl EngineInner {
    fn read_committed(&self) -> std::sync::RwLockReadGuard<'_, Arc<MemoryStore>> {
        self.committed.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_committed(&self) -> std::sync::RwLockWriteGuard<'_, Arc<MemoryStore>> {
        self.committed.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_staging(&self) -> MutexGuard<'_, Staging> {
        self.staging.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reinforce_access(&self, store: &mut MemoryStore, id: MemoryId, now: DateTime<Utc>) {
        if let Some(m) = store.get_mut(id) {
            m.record_access(self.config.retrieval.access_boost, self.config.wave.max_amplitude, now);
        }
    }

    /// Close the staging window and apply everything deferred during it.
    fn merge_staged(&self) {
        let mut staging = self.lock_staging();
        staging.cycle_active = false;
        let memories = std::mem::take(&mut staging.memories);
        let accesses = std::mem::take(&mut staging.accesses);
        let traversals = std::mem::take(&mut staging.traversals);

        if !memories.is_empty() || !accesses.is_empty() {
            let mut committed = self.write_committed();
            let store = Arc::make_mut(&mut committed);
            let staged = memories.len();
            for memory in memories {
                store.insert(memory);
            }
            for (id, at) in accesses {
                self.reinforce_access(store, id, at);
            }
            debug!(staged, "staged writes merged");
        }
        for (anchor, target) in traversals {
            self.traversals.record(anchor, target);
        }
    }
}

fn codebook_spec(config: &EngineConfig) -> CodebookSpec {
    CodebookSpec {
        seed: config.codebook_seed,
        input_dim: config.embedding_dimensions,
        output_dim: config.dimensions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemorySnapshotStore;

    fn config() -> EngineConfig {
        EngineConfig {
            dimensions: 512,
            embedding_dimensions: 16,
            ..EngineConfig::default()
        }
    }

    fn embedding(seed: f32) -> Vec<f32> {
        (0..16).map(|i| ((i as f32 + 1.0) * seed).sin()).collect()
    }

    #[test]
    fn test_remember_and_recall() {
        let engine = MemoryEngine::new(config()).unwrap();
        let id = engine
            .remember(Observation::new(embedding(0.7)).with_content("doc:1"))
            .unwrap();
        engine.remember(Observation::new(embedding(2.3))).unwrap();

        let hits = engine.recall(&embedding(0.7), 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        assert_eq!(hits[0].content_ref.as_deref(), Some("doc:1"));
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn test_recall_reinforces_access() {
        let engine = MemoryEngine::new(config()).unwrap();
        let id = engine.remember(Observation::new(embedding(0.7))).unwrap();
        let before = engine.get(id).unwrap().amplitude;

        engine.recall(&embedding(0.7), 1).unwrap();
        let after = engine.get(id).unwrap();
        assert!(after.amplitude > before);
        assert_eq!(after.access_count, 1);
    }

    #[test]
    fn test_empty_store_recall_fails() {
        let engine = MemoryEngine::new(config()).unwrap();
        let err = engine.recall(&embedding(0.7), 3).unwrap_err();
        assert!(matches!(err, MemoryError::Retrieval(_)));
    }

    #[test]
    fn test_encoding_errors_surface() {
        let engine = MemoryEngine::new(config()).unwrap();
        let err = engine.remember(Observation::new(vec![1.0; 3])).unwrap_err();
        assert!(matches!(err, MemoryError::Encoding(_)));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = EngineConfig {
            dimensions: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(MemoryEngine::new(bad), Err(MemoryError::InvalidConfig { .. })));
    }

    #[test]
    fn test_stop_and_resume() {
        let engine = MemoryEngine::new(config()).unwrap();
        engine.remember(Observation::new(embedding(0.7))).unwrap();

        engine.request_stop();
        let report = engine.consolidate().unwrap();
        assert!(report.cancelled);
        assert!(report.stages_run.is_empty());

        engine.resume();
        let report = engine.consolidate().unwrap();
        assert!(report.is_complete());
        assert_eq!(engine.consolidation_stats().cycles_completed, 1);
    }

    #[test]
    fn test_consolidate_cycles_runs_back_to_back() {
        let engine = MemoryEngine::new(config()).unwrap();
        engine.remember(Observation::new(embedding(0.7))).unwrap();

        let reports = engine.consolidate_cycles(3).unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.is_complete()));
        assert_eq!(engine.consolidation_stats().cycles_completed, 3);

        engine.request_stop();
        let reports = engine.consolidate_cycles(3).unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].cancelled);
    }

    #[test]
    fn test_staging_window_closes_after_cycle() {
        let engine = MemoryEngine::new(config()).unwrap();
        engine.remember(Observation::new(embedding(0.7))).unwrap();
        engine.consolidate().unwrap();
        assert!(!engine.inner.lock_staging().cycle_active);

        let id = engine.remember(Observation::new(embedding(1.9))).unwrap();
        assert!(engine.store().contains(id), "writes commit directly outside a cycle");
    }

    #[tokio::test]
    async fn test_checkpoint_and_reopen() {
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let engine = MemoryEngine::open(config(), snapshots.clone()).await.unwrap();
        let id = engine.remember(Observation::new(embedding(0.7))).unwrap();
        engine.consolidate().unwrap();
        engine.checkpoint().await.unwrap();

        let reopened = MemoryEngine::open(config(), snapshots).await.unwrap();
        assert!(reopened.get(id).is_some());
        assert_eq!(reopened.consolidation_stats().cycles_completed, 1);
        let next = reopened.remember(Observation::new(embedding(1.1))).unwrap();
        assert!(next > id);
    }

    #[tokio::test]
    async fn test_codebook_mismatch_refused() {
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let engine = MemoryEngine::open(config(), snapshots.clone()).await.unwrap();
        engine.remember(Observation::new(embedding(0.7))).unwrap();
        engine.checkpoint().await.unwrap();

        let other = EngineConfig {
            codebook_seed: 7,
            ..config()
        };
        let err = MemoryEngine::open(other, snapshots).await.unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Persistence(PersistenceError::CodebookMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_checkpoint_without_store() {
        let engine = MemoryEngine::new(config()).unwrap();
        assert!(engine.checkpoint().await.is_err());
    }
}
