use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Utc;
use grantdraft_core::{merge, DraftError, ParagraphLocks, Result};
use grantdraft_llm::{LlmRequest, TextGenerator, SOURCES_END, SOURCES_START};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::citations::resolve_citations;
use crate::config::GenerationConfig;
use crate::error::from_llm;
use crate::retriever::CitationCandidate;
use crate::section::GeneratedSection;

const SYSTEM_PROMPT: &str = "You are an expert grant writer. You draft funding application \
sections that are specific, persuasive and grounded only in the source material you are given.";

pub(crate) fn default_format_hint() -> String {
    "narrative".to_string()
}

/// Per-section input from the requirements-extraction layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionConstraints {
    pub name: String,
    #[serde(default)]
    pub requirements: String,
    #[serde(default)]
    pub word_limit: Option<usize>,
    #[serde(default)]
    pub char_limit: Option<usize>,
    #[serde(default = "default_format_hint")]
    pub format_hint: String,
}

impl SectionConstraints {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requirements: String::new(),
            word_limit: None,
            char_limit: None,
            format_hint: default_format_hint(),
        }
    }

    pub fn with_requirements(mut self, requirements: impl Into<String>) -> Self {
        self.requirements = requirements.into();
        self
    }

    pub fn with_word_limit(mut self, limit: usize) -> Self {
        self.word_limit = Some(limit);
        self
    }

    pub fn with_char_limit(mut self, limit: usize) -> Self {
        self.char_limit = Some(limit);
        self
    }

    pub fn with_format(mut self, format_hint: impl Into<String>) -> Self {
        self.format_hint = format_hint.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DraftError::InvalidInput("section name is empty".into()));
        }
        if self.word_limit == Some(0) || self.char_limit == Some(0) {
            return Err(DraftError::InvalidInput(format!(
                "section {:?} has a zero length limit",
                self.name
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

impl From<&GenerationConfig> for GenerationSettings {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

pub struct Synthesizer {
    generator: Arc<dyn TextGenerator>,
    settings: GenerationSettings,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: GenerationSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    /// One generation call, then marker resolution and length checks. The
    /// text is never truncated; an exceeded limit only sets the warning.
    pub fn synthesize(
        &self,
        constraints: &SectionConstraints,
        candidates: &[CitationCandidate],
    ) -> Result<GeneratedSection> {
        constraints.validate()?;
        let request = LlmRequest {
            system: Some(SYSTEM_PROMPT.to_string()),
            user: build_prompt(constraints, candidates),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let response = self.generator.generate(&request).map_err(from_llm)?;
        let text = response.content.trim();
        if text.is_empty() {
            return Err(DraftError::GenerationFailed(format!(
                "model returned no text for section {:?}",
                constraints.name
            )));
        }
        let resolution = resolve_citations(text, candidates);
        let mut section = GeneratedSection {
            section_name: constraints.name.clone(),
            requirements: constraints.requirements.clone(),
            format_hint: constraints.format_hint.clone(),
            text: text.to_string(),
            word_count: 0,
            char_count: 0,
            citations: resolution.citations,
            locks: ParagraphLocks::new(),
            word_limit: constraints.word_limit,
            char_limit: constraints.char_limit,
            warning: None,
            unresolved_markers: resolution.unresolved,
            model: self.generator.model_name().to_string(),
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
            generated_at: Utc::now(),
            regeneration_count: 0,
        };
        section.refresh_metrics();
        if let Some(warning) = &section.warning {
            warn!(section = %section.section_name, %warning, "length limit exceeded");
        }
        info!(
            section = %section.section_name,
            candidates = candidates.len(),
            citations = section.citations.len(),
            words = section.word_count,
            "synthesized section"
        );
        Ok(section)
    }

    /// Synthesizes afresh, then splices the locked paragraphs back in.
    pub fn regenerate(
        &self,
        constraints: &SectionConstraints,
        candidates: &[CitationCandidate],
        existing_locks: &ParagraphLocks,
    ) -> Result<GeneratedSection> {
        let mut section = self.synthesize(constraints, candidates)?;
        if existing_locks.is_empty() {
            return Ok(section);
        }
        let outcome = merge(&section.text, existing_locks);
        if outcome.appended > 0 {
            warn!(
                section = %section.section_name,
                appended = outcome.appended,
                "locked paragraphs appended past the regenerated text"
            );
        }
        section.text = outcome.text;
        section.locks = outcome.locks;
        section.refresh_citations(candidates);
        section.refresh_metrics();
        Ok(section)
    }
}

/// Grounded prompt when candidates exist, otherwise the insufficient
/// material prompt.
pub fn build_prompt(constraints: &SectionConstraints, candidates: &[CitationCandidate]) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Section: {}", constraints.name.trim());
    prompt.push('\n');
    prompt.push_str(&requirements_block(constraints));
    prompt.push('\n');
    if candidates.is_empty() {
        prompt.push_str(
            "No supporting documents relevant to this section were found.\n\n\
             RULES\n\
             - In under 100 words, state plainly that the uploaded material does not yet contain \
             enough information to draft this section, and name the kind of documents that would help.\n\
             - Do not write placeholder text or bracketed blanks standing in for real facts.\n\
             - Do not invent statistics, names, dates, budgets or outcomes.\n\
             - Do not draw on outside knowledge.\n",
        );
        return prompt;
    }

    let _ = writeln!(prompt, "{SOURCES_START}");
    for (position, candidate) in candidates.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "[Source {}] {}, Page {}:",
            position + 1,
            candidate.document_title,
            candidate.page_label()
        );
        let _ = writeln!(prompt, "{}", candidate.snippet.trim());
        prompt.push('\n');
    }
    let _ = writeln!(prompt, "{SOURCES_END}");
    prompt.push('\n');

    let example = candidates
        .iter()
        .find(|candidate| candidate.page_number.is_some())
        .unwrap_or(&candidates[0]);
    prompt.push_str("CITATION RULES\n");
    prompt.push_str(
        "- Immediately after any claim drawn from a source, insert a marker of the exact form \
         [Document Title, p.N] using the title and page number listed for that source.\n",
    );
    prompt.push_str("- Never invent titles, page numbers or sources that are not listed above.\n");
    prompt.push_str("- Sources listed with Page ? may inform the text but cannot be cited.\n");
    let _ = writeln!(
        prompt,
        "- Example: \"The community has grown steadily {}.\"",
        example.inline_marker()
    );
    prompt.push_str("- Separate paragraphs with a blank line.\n\n");
    let _ = writeln!(
        prompt,
        "Write the {} section now, using only the sources above.",
        constraints.name.trim()
    );
    prompt
}

fn requirements_block(constraints: &SectionConstraints) -> String {
    let mut block = String::from("REQUIREMENTS\n");
    let requirements = constraints.requirements.trim();
    let _ = writeln!(
        block,
        "- Additional requirements: {}",
        if requirements.is_empty() { "none" } else { requirements }
    );
    if let Some(limit) = constraints.word_limit {
        let _ = writeln!(block, "- Word limit: {limit} words");
    }
    if let Some(limit) = constraints.char_limit {
        let _ = writeln!(block, "- Character limit: {limit} characters");
    }
    let _ = writeln!(block, "- Format: {}", constraints.format_hint.trim());
    block
}
