/// Upgrades from older snapshot formats.
///
/// Format 1 predates categories, Ξ signatures, compound memories, link
/// provenance and access bookkeeping. Each missing field is either derived
/// from what the record does carry or given a fixed default:
///
/// | field                       | v2 value                                  |
/// |-----------------------------|-------------------------------------------|
/// | `category`                  | the band containing `frequency`, required |
/// | `differentiation_signature` | recomputed from the vector                |
/// | `kind`                      | `Episodic`                                |
/// | link `origin`               | `Similarity`                              |
/// | link `last_reinforced`      | snapshot creation time                    |
/// | `access_count`              | 0, never accessed                         |
///
/// A frequency outside every band has no safe category and fails the whole
/// migration.
use super::{Snapshot, SnapshotMetadata};
use crate::codebook::CodebookSpec;
use crate::error::MigrationError;
use crate::memory::{Category, Memory, MemoryId};
use crate::topology::{LinkOrigin, SkipLink};
use crate::vector::Hypervector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Format-1 snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotV1 {
    pub created_at: DateTime<Utc>,
    pub codebook: CodebookSpec,
    pub memories: Vec<MemoryV1>,
}

/// Format-1 memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryV1 {
    pub id: MemoryId,
    pub vector: Vec<f32>,
    pub amplitude: f32,
    pub frequency: f32,
    pub phase: f32,
    pub decay_rate: f32,
    pub layer_depth: u32,
    pub connections: Vec<SkipLinkV1>,
    pub created_at: DateTime<Utc>,
    pub content_ref: Option<String>,
}

/// Format-1 skip link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipLinkV1 {
    pub target_id: MemoryId,
    pub strength: f32,
    pub resonance_key: Vec<f32>,
    pub span: u32,
}

/// Upgrade a format-1 snapshot to the current layout.
pub fn upgrade_v1(legacy: SnapshotV1) -> Result<Snapshot, MigrationError> {
    let snapshot_time = legacy.created_at;
    let next_id = legacy.memories.iter().map(|m| m.id.0 + 1).max().unwrap_or(1);

    let memories = legacy
        .memories
        .into_iter()
        .map(|m| upgrade_memory(m, snapshot_time))
        .collect::<Result<Vec<_>, _>>()?;

    info!(memories = memories.len(), "snapshot upgraded from format 1");
    Ok(Snapshot {
        metadata: SnapshotMetadata {
            created_at: snapshot_time,
            saved_at: snapshot_time,
            cycles_completed: 0,
            next_id,
            codebook: legacy.codebook,
        },
        memories,
    })
}

fn upgrade_memory(old: MemoryV1, snapshot_time: DateTime<Utc>) -> Result<Memory, MigrationError> {
    let category = Category::from_frequency(old.frequency).ok_or(MigrationError::NoSafeDefault {
        from_version: 1,
        memory: old.id,
        field: "category",
    })?;

    let mut memory = Memory::new(
        old.id,
        Hypervector::new(old.vector),
        old.amplitude.max(0.0),
        old.frequency,
        old.phase,
        old.decay_rate,
        category,
        old.created_at,
    );
    memory.layer_depth = old.layer_depth;
    memory.content_ref = old.content_ref;
    memory.connections = old
        .connections
        .into_iter()
        .map(|l| SkipLink {
            target_id: l.target_id,
            strength: l.strength.max(0.0),
            resonance_key: Hypervector::new(l.resonance_key),
            span: l.span,
            origin: LinkOrigin::Similarity,
            last_reinforced: snapshot_time,
        })
        .collect();
    Ok(memory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differentiation::xi_signature;
    use crate::error::PersistenceError;
    use crate::memory::MemoryKind;
    use crate::persistence::{decode, frame};

    fn legacy(frequency: f32) -> SnapshotV1 {
        let created_at = Utc::now();
        SnapshotV1 {
            created_at,
            codebook: CodebookSpec {
                seed: 7,
                input_dim: 4,
                output_dim: 16,
            },
            memories: vec![
                MemoryV1 {
                    id: MemoryId(3),
                    vector: vec![0.6, 0.8, 0.0, 0.0],
                    amplitude: 1.2,
                    frequency,
                    phase: 0.1,
                    decay_rate: 0.05,
                    layer_depth: 2,
                    connections: vec![SkipLinkV1 {
                        target_id: MemoryId(9),
                        strength: 0.4,
                        resonance_key: vec![1.0, 0.0],
                        span: 2,
                    }],
                    created_at,
                    content_ref: Some("doc:3".into()),
                },
                MemoryV1 {
                    id: MemoryId(9),
                    vector: vec![0.0, 0.0, 1.0, 0.0],
                    amplitude: 0.7,
                    frequency: 0.1,
                    phase: -0.2,
                    decay_rate: 0.05,
                    layer_depth: 0,
                    connections: vec![],
                    created_at,
                    content_ref: None,
                },
            ],
        }
    }

    #[test]
    fn test_upgrade_derives_missing_fields() {
        let old = legacy(0.007);
        let created_at = old.created_at;
        let snapshot = upgrade_v1(old).unwrap();

        assert_eq!(snapshot.metadata.next_id, 10);
        assert_eq!(snapshot.metadata.codebook.seed, 7);

        let m = &snapshot.memories[0];
        assert_eq!(m.category, Category::Knowledge);
        assert_eq!(m.kind, MemoryKind::Episodic);
        assert_eq!(m.layer_depth, 2);
        assert_eq!(m.differentiation_signature, xi_signature(&m.vector));
        assert_eq!(m.connections[0].origin, LinkOrigin::Similarity);
        assert_eq!(m.connections[0].last_reinforced, created_at);
        assert_eq!(snapshot.memories[1].category, Category::Experience);
    }

    #[test]
    fn test_out_of_band_frequency_fails() {
        let err = upgrade_v1(legacy(0.5)).unwrap_err();
        assert_eq!(
            err,
            MigrationError::NoSafeDefault {
                from_version: 1,
                memory: MemoryId(3),
                field: "category",
            }
        );
    }

    #[test]
    fn test_decode_upgrades_format_one() {
        let payload = bincode::serialize(&legacy(0.03)).unwrap();
        let snapshot = decode(&frame(1, &payload)).unwrap();
        assert_eq!(snapshot.memories[0].category, Category::Social);

        let payload = bincode::serialize(&legacy(0.5)).unwrap();
        assert!(matches!(
            decode(&frame(1, &payload)),
            Err(PersistenceError::Migration(_))
        ));
    }
}
