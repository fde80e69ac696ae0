/// Background processes that reshape the store between recalls.
///
/// - Consolidation: the nine-stage cycle (replay through wire)
/// - Synchronization: Kuramoto phase coupling, run as one of its stages
pub mod consolidation;
pub mod synchronization;

pub use consolidation::{
    ConsolidationProcess, ConsolidationReport, ConsolidationStats, CycleContext, Interference,
    InterferencePair, Stage,
};
pub use synchronization::{SyncReport, order_parameter};
