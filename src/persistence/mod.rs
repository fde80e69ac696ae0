/// Snapshot persistence.
///
/// The engine saves and loads one opaque snapshot through the
/// [`SnapshotStore`] trait. Two providers ship with the crate: a file-backed
/// store and an in-memory store for tests and embedding.
///
/// # File Format
///
/// ```text
/// offset  size  field
/// 0       4     magic  b"HVMN"
/// 4       4     format version (u32 LE)
/// 8       4     crc32 of payload (u32 LE)
/// 12      8     payload length (u64 LE)
/// 20      ..    bincode payload
/// ```
///
/// Snapshots from older format versions are upgraded on load (see
/// [`migration`]); snapshots from newer versions are refused.
pub mod migration;

use crate::codebook::CodebookSpec;
use crate::config::PersistenceConfig;
use crate::error::{PersistenceError, PersistenceResult};
use crate::memory::Memory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 2;

const MAGIC: &[u8; 4] = b"HVMN";
const HEADER_LEN: usize = 20;

/// Everything needed to reopen an engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub memories: Vec<Memory>,
}

/// Snapshot bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// When the store was first created
    pub created_at: DateTime<Utc>,
    /// When this snapshot was taken
    pub saved_at: DateTime<Utc>,
    pub cycles_completed: u64,
    /// Next id the allocator hands out
    pub next_id: u64,
    /// Projection that produced every stored vector
    pub codebook: CodebookSpec,
}

/// Serialize a snapshot with the current header.
pub fn encode(snapshot: &Snapshot) -> PersistenceResult<Vec<u8>> {
    let payload = bincode::serialize(snapshot)?;
    Ok(frame(SNAPSHOT_VERSION, &payload))
}

/// Parse and verify a snapshot, upgrading older formats.
pub fn decode(bytes: &[u8]) -> PersistenceResult<Snapshot> {
    if bytes.len() < HEADER_LEN {
        return Err(PersistenceError::Corrupted(format!(
            "{} bytes is shorter than the header",
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC {
        return Err(PersistenceError::Corrupted("bad magic".into()));
    }
    let version = read_u32(&bytes[4..8]);
    let expected = read_u32(&bytes[8..12]);
    let len = read_u64(&bytes[12..20]);

    if version > SNAPSHOT_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            found: version,
            supported: SNAPSHOT_VERSION,
        });
    }
    let payload = &bytes[HEADER_LEN..];
    if payload.len() as u64 != len {
        return Err(PersistenceError::Corrupted(format!(
            "payload is {} bytes, header says {len}",
            payload.len()
        )));
    }
    let actual = crc32fast::hash(payload);
    if actual != expected {
        return Err(PersistenceError::ChecksumMismatch { expected, actual });
    }

    match version {
        SNAPSHOT_VERSION => Ok(bincode::deserialize(payload)?),
        1 => {
            let legacy: migration::SnapshotV1 = bincode::deserialize(payload)?;
            Ok(migration::upgrade_v1(legacy)?)
        }
        other => Err(PersistenceError::Corrupted(format!("unknown format version {other}"))),
    }
}

fn frame(version: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

fn read_u32(b: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(b);
    u32::from_le_bytes(word)
}

fn read_u64(b: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(b);
    u64::from_le_bytes(word)
}

/// Where snapshots live.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// The stored snapshot, or `None` if nothing was saved yet.
    async fn load(&self) -> PersistenceResult<Option<Snapshot>>;

    /// Replace the stored snapshot.
    async fn save(&self, snapshot: &Snapshot) -> PersistenceResult<()>;
}

/// Run `op`, retrying once after `backoff` if it fails transiently.
async fn with_retry<T, F, Fut>(what: &'static str, backoff: Duration, mut op: F) -> PersistenceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PersistenceResult<T>>,
{
    match op().await {
        Err(error) if error.is_transient() => {
            warn!(operation = what, %error, "transient persistence failure, retrying once");
            tokio::time::sleep(backoff).await;
            op().await
        }
        result => result,
    }
}

/// Single-file snapshot store.
///
/// Saves write a temporary sibling file and rename it over the target, so a
/// crash mid-save leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
    retry_backoff: Duration,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, &PersistenceConfig::default())
    }

    pub fn with_config(path: impl Into<PathBuf>, config: &PersistenceConfig) -> Self {
        Self {
            path: path.into(),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether a snapshot file exists.
    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> PersistenceResult<Option<Snapshot>> {
        if !self.exists().await {
            return Ok(None);
        }
        let path = &self.path;
        let bytes = with_retry("load", self.retry_backoff, || async move {
            Ok::<_, PersistenceError>(fs::read(path).await?)
        })
        .await?;
        debug!(path = %path.display(), bytes = bytes.len(), "snapshot read");
        decode(&bytes).map(Some)
    }

    async fn save(&self, snapshot: &Snapshot) -> PersistenceResult<()> {
        let bytes = encode(snapshot)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let temp = self.path.with_extension("tmp");
        let (path, temp, payload) = (&self.path, &temp, &bytes);
        with_retry("save", self.retry_backoff, || async move {
            fs::write(temp, payload).await?;
            fs::rename(temp, path).await?;
            Ok::<_, PersistenceError>(())
        })
        .await?;
        debug!(path = %path.display(), bytes = bytes.len(), "snapshot written");
        Ok(())
    }
}

/// Snapshot store that keeps the encoded bytes in memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-encoded bytes, e.g. a snapshot from another format version.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes)),
        }
    }

    /// Encoded bytes of the last save.
    pub async fn bytes(&self) -> Option<Vec<u8>> {
        self.bytes.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self) -> PersistenceResult<Option<Snapshot>> {
        match self.bytes.lock().await.as_deref() {
            Some(bytes) => decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &Snapshot) -> PersistenceResult<()> {
        let encoded = encode(snapshot)?;
        *self.bytes.lock().await = Some(encoded);
        Ok(())
    }
}
