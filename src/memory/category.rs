/// Memory categories and their oscillator bands.
///
/// Each category owns a disjoint band of frequencies (cycles per wave time
/// unit). Together the bands cover `[0.005, 0.16)` without gaps, so any
/// frequency in that range maps back to exactly one category.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of memory categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Experience,
    Emotion,
    Social,
    Skill,
    Knowledge,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Experience,
        Category::Emotion,
        Category::Social,
        Category::Skill,
        Category::Knowledge,
    ];

    /// Half-open frequency band `[low, high)` for this category.
    ///
    /// Fast oscillators for raw experience, slow ones for durable knowledge.
    pub const fn band(self) -> (f32, f32) {
        match self {
            Category::Experience => (0.08, 0.16),
            Category::Emotion => (0.04, 0.08),
            Category::Social => (0.02, 0.04),
            Category::Skill => (0.01, 0.02),
            Category::Knowledge => (0.005, 0.01),
        }
    }

    /// Frequency at fraction `t ∈ [0, 1)` of the band.
    pub fn frequency_at(self, t: f32) -> f32 {
        let (low, high) = self.band();
        let f = low + (high - low) * t.clamp(0.0, 1.0);
        // keep the result strictly inside the half-open band
        if f >= high { low } else { f }
    }

    /// The category whose band contains `frequency`.
    pub fn from_frequency(frequency: f32) -> Option<Category> {
        Category::ALL.into_iter().find(|c| {
            let (low, high) = c.band();
            frequency >= low && frequency < high
        })
    }

    /// Parse an explicit category name or synonym.
    pub fn parse_hint(hint: &str) -> Option<Category> {
        let normalized = hint.trim().to_ascii_lowercase();
        let category = match normalized.as_str() {
            "experience" | "event" | "episode" | "episodic" | "observation" => {
                Category::Experience
            }
            "emotion" | "emotional" | "feeling" | "mood" | "affect" => Category::Emotion,
            "social" | "relationship" | "person" | "people" | "conversation" => Category::Social,
            "skill" | "procedure" | "procedural" | "howto" | "how-to" | "technique" => {
                Category::Skill
            }
            "knowledge" | "fact" | "semantic" | "concept" | "definition" => Category::Knowledge,
            _ => return None,
        };
        Some(category)
    }

    /// Keyword heuristics over free text; `None` when no keyword matches.
    pub fn from_keywords(text: &str) -> Option<Category> {
        const KEYWORDS: [(Category, &[&str]); 4] = [
            (
                Category::Emotion,
                &["feel", "felt", "happy", "sad", "angry", "afraid", "love", "anxious", "excited"],
            ),
            (
                Category::Social,
                &["friend", "team", "met", "meeting", "family", "colleague", "talked", "said"],
            ),
            (
                Category::Skill,
                &["how to", "learned to", "practice", "step", "technique", "method", "recipe"],
            ),
            (
                Category::Knowledge,
                &["is a", "are a", "means", "defined", "fact", "theorem", "consists of", "known as"],
            ),
        ];

        // whole-word matching: " met " must not fire on "method"
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_ascii_lowercase())
            .collect();
        let padded = format!(" {} ", words.join(" "));

        let mut best: Option<(Category, usize)> = None;
        for (category, keywords) in KEYWORDS {
            let hits = keywords
                .iter()
                .filter(|k| padded.contains(&format!(" {k} ")))
                .count();
            if hits > 0 && best.is_none_or(|(_, n)| hits > n) {
                best = Some((category, hits));
            }
        }
        best.map(|(category, _)| category)
    }

    /// Classify from an optional hint and optional content text.
    ///
    /// An explicit name wins, then keywords in the hint, then keywords in the
    /// content, then [`Category::Experience`].
    pub fn classify(hint: Option<&str>, content: Option<&str>) -> Category {
        hint.and_then(Category::parse_hint)
            .or_else(|| hint.and_then(Category::from_keywords))
            .or_else(|| content.and_then(Category::from_keywords))
            .unwrap_or(Category::Experience)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Experience => "experience",
            Category::Emotion => "emotion",
            Category::Social => "social",
            Category::Skill => "skill",
            Category::Knowledge => "knowledge",
        };
        f.write_str(name)
    }
}
