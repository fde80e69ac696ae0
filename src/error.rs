/// Error types for holomem operations.
///
/// Each failure family of the engine has its own enum so callers can match
/// precisely on what went wrong, and [`MemoryError`] unifies them for the
/// facade API. Encoding and retrieval errors are always recoverable, a
/// consolidation error only aborts the current cycle, and persistence or
/// migration errors are fatal for startup.
use crate::memory::MemoryId;
use thiserror::Error;

/// Malformed input to the encoding pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    /// The embedding had no components
    #[error("embedding is empty")]
    EmptyEmbedding,

    /// The embedding length does not match the codebook input dimensionality
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Codebook input dimensionality
        expected: usize,
        /// Length of the supplied embedding
        got: usize,
    },

    /// The embedding contained NaN or an infinity
    #[error("embedding component {index} is not finite")]
    NonFiniteComponent {
        /// Offending component index
        index: usize,
    },

    /// The importance hint was NaN
    #[error("importance hint {0} is not a finite number")]
    InvalidImportance(f32),

    /// No codebook is attached, so the projection is undefined
    #[error("codebook not initialized")]
    CodebookUninitialized,
}

/// Failure of a recall.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    /// The store holds no memories at all
    #[error("memory store is empty")]
    EmptyStore,
}

/// Failure of a consolidation cycle.
///
/// The cycle is abandoned and the store keeps the state committed by the last
/// successful stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsolidationError {
    /// A stage produced a non-finite amplitude or phase
    #[error("numerical instability in stage {stage}: memory {memory} has non-finite {field}")]
    NumericalInstability {
        /// Stage that produced the value
        stage: &'static str,
        /// Memory carrying the value
        memory: MemoryId,
        /// Field name
        field: &'static str,
    },

    /// A stage failed for another reason
    #[error("stage {stage} failed: {reason}")]
    StageFailed {
        /// Stage that failed
        stage: &'static str,
        /// Description of the failure
        reason: String,
    },
}

/// A snapshot from an older format is missing data that cannot be derived.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MigrationError {
    /// A field has no safe default for this record
    #[error("cannot migrate memory {memory} from v{from_version}: field '{field}' has no safe default")]
    NoSafeDefault {
        /// Version of the snapshot being migrated
        from_version: u32,
        /// Memory whose field is missing
        memory: MemoryId,
        /// Name of the missing field
        field: &'static str,
    },
}

/// Snapshot load/save failures.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The file is not a snapshot or is truncated
    #[error("corrupted snapshot: {0}")]
    Corrupted(String),

    /// Payload checksum does not match the header
    #[error("snapshot checksum mismatch: header {expected:#010x}, payload {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum recorded in the header
        expected: u32,
        /// Checksum of the payload read
        actual: u32,
    },

    /// Snapshot written by a newer version of the engine
    #[error("snapshot version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version found in the header
        found: u32,
        /// Highest version this build reads
        supported: u32,
    },

    /// Snapshot vectors were produced by a different codebook
    #[error("codebook mismatch: snapshot {found}, configured {configured}")]
    CodebookMismatch {
        /// Codebook parameters in the snapshot
        found: String,
        /// Codebook parameters in the configuration
        configured: String,
    },

    /// An older snapshot could not be upgraded
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl PersistenceError {
    /// Whether the error is an I/O hiccup worth one retry.
    pub fn is_transient(&self) -> bool {
        match self {
            PersistenceError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

impl From<bincode::Error> for PersistenceError {
    fn from(e: bincode::Error) -> Self {
        PersistenceError::Serialization(e.to_string())
    }
}

/// The main error type for holomem operations.
///
/// All fallible operations on [`crate::MemoryEngine`] return
/// `Result<T, MemoryError>`.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Encoding failure
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Retrieval failure
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// Consolidation failure
    #[error(transparent)]
    Consolidation(#[from] ConsolidationError),

    /// Persistence failure
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Migration failure
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Configuration rejected by validation
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration is invalid
        reason: String,
    },

    /// Configuration could not be parsed
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

/// Result type alias for holomem operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Result type alias for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;
