//! # holomem: Hypervector Memory Network
//!
//! **Tagline:** *"Remember. Resonate. Consolidate."*
//!
//! holomem is an associative memory engine built on high-dimensional vectors:
//! - **Hypervector encoding** - External embeddings projected through a seeded codebook
//! - **Wave dynamics** - Every memory is an oscillator whose strength decays over time
//! - **HyperConnections** - Skip links across consolidation depths, reinforced by use
//! - **Background consolidation** - Replay, interference, bundling and differentiation
//!
//! ## Quick Start
//!
//! ```ignore
//! use holomem::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let snapshots = Arc::new(FileSnapshotStore::new("memory.hvmn"));
//!     let engine = MemoryEngine::open(EngineConfig::default(), snapshots).await?;
//!
//!     // Store an observation
//!     let id = engine.remember(
//!         Observation::new(embedding)
//!             .with_category("fact")
//!             .with_content("doc:42"),
//!     )?;
//!
//!     // Recall the closest memories
//!     for hit in engine.recall(&query, 5)? {
//!         println!("{} {:.3} {:?}", hit.id, hit.score, hit.content_ref);
//!     }
//!
//!     // Consolidate in the background, checkpoint on the way out
//!     let scheduler = engine.spawn_scheduler();
//!     engine.request_stop();
//!     scheduler.await?;
//!     engine.checkpoint().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Core API
//!
//! - [`MemoryEngine::remember()`] - Encode and store an observation
//! - [`MemoryEngine::recall()`] - Similarity search expanded through skip links
//! - [`MemoryEngine::consolidate()`] - Run one consolidation cycle
//! - [`MemoryEngine::consolidate_cycles()`] - Run several cycles back to back
//! - [`MemoryEngine::observe()`] - Aggregate network health, Φ included
//! - [`MemoryEngine::checkpoint()`] - Save a snapshot
//!
//! ## Architecture
//!
//! 1. **Engine** (`core`) - Facade, concurrency and scheduling
//! 2. **Encoding and retrieval** (`encoding`, `retrieval`) - The read/write paths
//! 3. **Processes** (`processes`) - Consolidation stages and phase synchronization
//! 4. **Primitives** (`vector`, `wave`, `differentiation`, `topology`) - The math
//! 5. **Persistence** (`persistence`) - Versioned, checksummed snapshots
//!
//! ## Thread Safety
//!
//! A `MemoryEngine` is a cheap handle over shared state. Clones can remember
//! and recall from any thread while a consolidation cycle runs; readers see
//! the store as of the last committed stage.

mod core;
mod error;

pub mod codebook;
pub mod config;
pub mod differentiation;
pub mod encoding;
pub mod memory;
pub mod observe;
pub mod persistence;
pub mod processes;
pub mod retrieval;
pub mod topology;
pub mod vector;
pub mod wave;

pub use crate::core::MemoryEngine;
pub use codebook::{Codebook, CodebookSpec};
pub use config::EngineConfig;
pub use encoding::{EncodingPipeline, Observation};
pub use error::{
    ConsolidationError, EncodingError, MemoryError, MemoryResult, MigrationError,
    PersistenceError, PersistenceResult, RetrievalError,
};
pub use memory::{Category, Memory, MemoryId, MemoryKind, MemoryStore};
pub use observe::{IntegrationLevel, LinkSummary, NetworkObservation};
pub use persistence::{FileSnapshotStore, InMemorySnapshotStore, Snapshot, SnapshotStore};
pub use processes::{ConsolidationReport, ConsolidationStats, Stage};
pub use retrieval::{Provenance, RecallHit, RecallOptions};
pub use topology::{LinkOrigin, SkipLink};
pub use vector::Hypervector;

pub use chrono::{DateTime, Utc};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use holomem::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::core::MemoryEngine;
    pub use crate::encoding::Observation;
    pub use crate::error::{MemoryError, MemoryResult};
    pub use crate::memory::{Category, MemoryId};
    pub use crate::persistence::{FileSnapshotStore, InMemorySnapshotStore, SnapshotStore};
    pub use crate::processes::ConsolidationReport;
    pub use crate::retrieval::{Provenance, RecallHit, RecallOptions};
    pub use chrono::{DateTime, Utc};
    pub use std::sync::Arc;
}
