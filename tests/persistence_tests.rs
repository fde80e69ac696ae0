/// Persistence tests against the file-backed snapshot store.
use holomem::persistence::{SNAPSHOT_VERSION, decode};
use holomem::prelude::*;
use holomem::PersistenceError;
use tempfile::TempDir;

fn config() -> EngineConfig {
    EngineConfig {
        dimensions: 512,
        embedding_dimensions: 8,
        ..EngineConfig::default()
    }
}

fn embedding(i: usize) -> Vec<f32> {
    let mut v = vec![0.1; 8];
    v[i % 8] = 1.0;
    v
}

#[tokio::test]
async fn test_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("memory.hvmn");
    let snapshots = Arc::new(FileSnapshotStore::new(&path));

    let engine = MemoryEngine::open(config(), snapshots.clone()).await.unwrap();
    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(
            engine
                .remember(Observation::new(embedding(i)).with_content(format!("doc:{i}")))
                .unwrap(),
        );
    }
    engine.consolidate().unwrap();
    engine.checkpoint().await.unwrap();
    assert!(snapshots.exists().await);
    assert!(!path.with_extension("tmp").exists());

    let reopened = MemoryEngine::open(config(), snapshots).await.unwrap();
    assert_eq!(reopened.len(), engine.len());
    for (i, id) in ids.iter().enumerate() {
        let before = engine.get(*id).unwrap();
        let after = reopened.get(*id).unwrap();
        assert_eq!(after.content_ref, Some(format!("doc:{i}")));
        assert_eq!(after.amplitude, before.amplitude);
        assert_eq!(after.phase, before.phase);
        assert_eq!(after.layer_depth, before.layer_depth);
        assert_eq!(after.vector, before.vector);
    }
    assert_eq!(reopened.observe().cycles_completed, 1);
}

#[tokio::test]
async fn test_missing_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let snapshots = Arc::new(FileSnapshotStore::new(dir.path().join("absent.hvmn")));
    let engine = MemoryEngine::open(config(), snapshots).await.unwrap();
    assert!(engine.is_empty());
}

#[tokio::test]
async fn test_written_file_carries_current_header() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.hvmn");
    let engine = MemoryEngine::new(config()).unwrap();
    engine.remember(Observation::new(embedding(0))).unwrap();
    engine.checkpoint_to(&FileSnapshotStore::new(&path)).await.unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[0..4], b"HVMN");
    assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), SNAPSHOT_VERSION);
    assert_eq!(decode(&bytes).unwrap().memories.len(), 1);
}

#[tokio::test]
async fn test_corrupted_file_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.hvmn");
    let engine = MemoryEngine::new(config()).unwrap();
    engine.remember(Observation::new(embedding(1))).unwrap();
    engine.checkpoint_to(&FileSnapshotStore::new(&path)).await.unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let err = MemoryEngine::open(config(), Arc::new(FileSnapshotStore::new(&path)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MemoryError::Persistence(PersistenceError::ChecksumMismatch { .. })
    ));

    std::fs::write(&path, &bytes[..10]).unwrap();
    let err = MemoryEngine::open(config(), Arc::new(FileSnapshotStore::new(&path)))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Persistence(PersistenceError::Corrupted(_))));
}

#[tokio::test]
async fn test_codebook_change_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.hvmn");
    let snapshots = Arc::new(FileSnapshotStore::new(&path));
    let engine = MemoryEngine::open(config(), snapshots.clone()).await.unwrap();
    engine.remember(Observation::new(embedding(2))).unwrap();
    engine.checkpoint().await.unwrap();

    let wider = EngineConfig {
        dimensions: 1024,
        ..config()
    };
    let err = MemoryEngine::open(wider, snapshots).await.unwrap_err();
    assert!(matches!(
        err,
        MemoryError::Persistence(PersistenceError::CodebookMismatch { .. })
    ));
}

#[tokio::test]
async fn test_store_built_from_engine_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.hvmn");
    let mut config = config();
    config.persistence.retry_backoff_ms = 1;
    let snapshots = Arc::new(FileSnapshotStore::with_config(&path, &config.persistence));
    assert_eq!(snapshots.path(), path.as_path());

    let engine = MemoryEngine::open(config.clone(), snapshots.clone()).await.unwrap();
    engine.remember(Observation::new(embedding(3))).unwrap();
    engine.checkpoint().await.unwrap();

    let reopened = MemoryEngine::open(config, snapshots).await.unwrap();
    assert_eq!(reopened.len(), 1);
}
