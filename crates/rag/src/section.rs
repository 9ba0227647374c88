use chrono::{DateTime, Utc};
use grantdraft_core::{split_into_paragraphs, ParagraphLocks, Result, TextStats};
use serde::{Deserialize, Serialize};

use crate::citations::resolve_citations;
use crate::retriever::CitationCandidate;
use crate::synthesizer::{default_format_hint, SectionConstraints};

/// Share of a limit, in percent, inside which a section is flagged as close
/// to the limit.
pub const DEFAULT_LIMIT_THRESHOLD_PERCENT: f64 = 10.0;

/// How a section's length compares with its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitStatus {
    Ok,
    Warning,
    Exceeded,
}

impl LimitStatus {
    /// Status of one count against an optional limit. `Warning` starts at
    /// `limit * (1 - threshold_percent / 100)`.
    pub fn classify(count: usize, limit: Option<usize>, threshold_percent: f64) -> Self {
        let Some(limit) = limit else {
            return LimitStatus::Ok;
        };
        if count > limit {
            LimitStatus::Exceeded
        } else if count as f64 >= limit as f64 * (1.0 - threshold_percent / 100.0) {
            LimitStatus::Warning
        } else {
            LimitStatus::Ok
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LimitStatus::Ok => "ok",
            LimitStatus::Warning => "warning",
            LimitStatus::Exceeded => "exceeded",
        }
    }
}

/// Current draft of one funding-call section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSection {
    pub section_name: String,
    /// Requirements the section was drafted against; reused on regeneration.
    #[serde(default)]
    pub requirements: String,
    #[serde(default = "default_format_hint")]
    pub format_hint: String,
    pub text: String,
    pub word_count: usize,
    pub char_count: usize,
    /// Candidates actually referenced by a marker in `text`.
    pub citations: Vec<CitationCandidate>,
    pub locks: ParagraphLocks,
    pub word_limit: Option<usize>,
    pub char_limit: Option<usize>,
    pub warning: Option<String>,
    #[serde(default)]
    pub unresolved_markers: Vec<String>,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub regeneration_count: u32,
}

impl GeneratedSection {
    pub fn paragraphs(&self) -> Vec<&str> {
        split_into_paragraphs(&self.text)
    }

    pub fn locked_paragraph_indices(&self) -> Vec<usize> {
        self.locks.indices()
    }

    pub fn lock_paragraph(&mut self, index: usize) -> Result<()> {
        self.locks.lock(&self.text, index)
    }

    pub fn unlock_paragraph(&mut self, index: usize) -> Result<bool> {
        self.locks.unlock(&self.text, index)
    }

    /// Replaces the text with a user edit and re-locks `locked_indices`
    /// against it. Any invalid index rejects the whole edit.
    pub fn apply_edit(&mut self, text: impl Into<String>, locked_indices: &[usize]) -> Result<()> {
        let text = text.into();
        let locks = ParagraphLocks::from_indices(&text, locked_indices)?;
        let pool = self.citations.clone();
        self.text = text;
        self.locks = locks;
        self.refresh_citations(&pool);
        self.refresh_metrics();
        Ok(())
    }

    /// Re-resolves markers in the current text against `pool`.
    pub fn refresh_citations(&mut self, pool: &[CitationCandidate]) {
        let resolution = resolve_citations(&self.text, pool);
        self.citations = resolution.citations;
        self.unresolved_markers = resolution.unresolved;
    }

    /// Recomputes counts and the length warning from the current text.
    pub fn refresh_metrics(&mut self) {
        let stats = TextStats::measure(&self.text);
        self.word_count = stats.words;
        self.char_count = stats.chars;
        self.warning = length_warning(stats, self.word_limit, self.char_limit);
    }

    pub fn exceeds_limit(&self) -> bool {
        self.warning.is_some()
    }

    /// Worst status across the word and character limits, flagging counts
    /// within 10% of a limit.
    pub fn limit_status(&self) -> LimitStatus {
        self.limit_status_within(DEFAULT_LIMIT_THRESHOLD_PERCENT)
    }

    pub fn limit_status_within(&self, threshold_percent: f64) -> LimitStatus {
        let words = LimitStatus::classify(self.word_count, self.word_limit, threshold_percent);
        let chars = LimitStatus::classify(self.char_count, self.char_limit, threshold_percent);
        words.max(chars)
    }

    /// The constraints this section was generated under, for regenerating it.
    pub fn constraints(&self) -> SectionConstraints {
        SectionConstraints {
            name: self.section_name.clone(),
            requirements: self.requirements.clone(),
            word_limit: self.word_limit,
            char_limit: self.char_limit,
            format_hint: self.format_hint.clone(),
        }
    }
}

/// One sentence per exceeded limit; `None` when everything fits.
pub fn length_warning(
    stats: TextStats,
    word_limit: Option<usize>,
    char_limit: Option<usize>,
) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(limit) = word_limit {
        if stats.words > limit {
            parts.push(format!(
                "Section exceeds word limit by {} words ({}/{}).",
                stats.words - limit,
                stats.words,
                limit
            ));
        }
    }
    if let Some(limit) = char_limit {
        if stats.chars > limit {
            parts.push(format!(
                "Section exceeds character limit by {} characters ({}/{}).",
                stats.chars - limit,
                stats.chars,
                limit
            ));
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}
