/// Encoding pipeline: external embedding + metadata → [`Memory`].
///
/// ```text
/// embedding ──project──▶ hypervector ──Ξ──▶ signature
///     │
///     ├─ hint / content ──classify──▶ category ──band──▶ frequency
///     ├─ blake3(embedding, content) ──▶ frequency offset, initial phase
///     └─ importance ──scale──▶ amplitude
/// ```
///
/// The pipeline is deterministic: the same observation always encodes to the
/// same vector, frequency and phase.
use crate::codebook::Codebook;
use crate::config::{EncodingConfig, WaveConfig};
use crate::error::EncodingError;
use crate::memory::{Category, Memory, MemoryId};
use crate::vector::Hypervector;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One observation to remember.
///
/// # Example
///
/// ```ignore
/// let obs = Observation::new(embedding)
///     .with_category("fact")
///     .with_importance(0.9)
///     .with_content("doc:42");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub embedding: Vec<f32>,
    pub category_hint: Option<String>,
    pub importance: Option<f32>,
    pub content_ref: Option<String>,
}

impl Observation {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            category_hint: None,
            importance: None,
            content_ref: None,
        }
    }

    /// Free-text category hint: a category name, a synonym, or descriptive text.
    pub fn with_category(mut self, hint: impl Into<String>) -> Self {
        self.category_hint = Some(hint.into());
        self
    }

    /// Importance in [0, 1]; values outside are clamped.
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn with_content(mut self, content_ref: impl Into<String>) -> Self {
        self.content_ref = Some(content_ref.into());
        self
    }
}

/// Turns observations into memories.
#[derive(Debug, Clone)]
pub struct EncodingPipeline {
    codebook: Option<Arc<Codebook>>,
    encoding: EncodingConfig,
    wave: WaveConfig,
}

impl EncodingPipeline {
    pub fn new(codebook: Arc<Codebook>, encoding: EncodingConfig, wave: WaveConfig) -> Self {
        Self {
            codebook: Some(codebook),
            encoding,
            wave,
        }
    }

    /// Pipeline with no codebook; every encode fails.
    pub fn without_codebook(encoding: EncodingConfig, wave: WaveConfig) -> Self {
        Self {
            codebook: None,
            encoding,
            wave,
        }
    }

    /// Validate an embedding and project it to a unit hypervector.
    pub fn project(&self, embedding: &[f32]) -> Result<Hypervector, EncodingError> {
        if embedding.is_empty() {
            return Err(EncodingError::EmptyEmbedding);
        }
        if let Some(index) = embedding.iter().position(|x| !x.is_finite()) {
            return Err(EncodingError::NonFiniteComponent { index });
        }
        let codebook = self
            .codebook
            .as_ref()
            .ok_or(EncodingError::CodebookUninitialized)?;
        codebook.project(embedding)
    }

    /// Encode an observation into a depth-0 episodic memory.
    pub fn encode(
        &self,
        id: MemoryId,
        observation: &Observation,
        now: DateTime<Utc>,
    ) -> Result<Memory, EncodingError> {
        let importance = match observation.importance {
            Some(i) if i.is_nan() => return Err(EncodingError::InvalidImportance(i)),
            Some(i) => i.clamp(0.0, 1.0),
            None => self.encoding.default_importance,
        };
        let vector = self.project(&observation.embedding)?;

        let category = Category::classify(
            observation.category_hint.as_deref(),
            observation.content_ref.as_deref(),
        );
        let (freq_t, phase_t) = content_hash(&observation.embedding, observation.content_ref.as_deref());
        let frequency = category.frequency_at(freq_t);
        let phase = (phase_t - 0.5) * self.encoding.initial_phase_spread;
        let amplitude = importance * self.encoding.importance_scale;

        let mut memory = Memory::new(
            id,
            vector,
            amplitude,
            frequency,
            phase,
            self.wave.default_decay_rate,
            category,
            now,
        );
        memory.content_ref = observation.content_ref.clone();
        Ok(memory)
    }
}

/// Two uniform fractions in [0, 1) derived from the embedding bits and content.
fn content_hash(embedding: &[f32], content: Option<&str>) -> (f32, f32) {
    let mut hasher = blake3::Hasher::new();
    for x in embedding {
        hasher.update(&x.to_le_bytes());
    }
    if let Some(content) = content {
        hasher.update(content.as_bytes());
    }
    let hash = hasher.finalize();
    let bytes = hash.as_bytes();
    let fraction = |chunk: &[u8]| {
        let mut word = [0u8; 4];
        word.copy_from_slice(chunk);
        // 24 bits keep the value exactly representable and strictly below 1
        (u32::from_le_bytes(word) >> 8) as f32 / (1u32 << 24) as f32
    };
    (fraction(&bytes[0..4]), fraction(&bytes[4..8]))
}
