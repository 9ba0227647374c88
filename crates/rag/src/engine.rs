use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use grantdraft_core::{Chunker, DraftError, PageText, ParagraphLocks, Result, SourceDocument};
use grantdraft_index::{export_jsonl, ChunkRecord, MemoryIndex, VectorIndex};
use grantdraft_llm::{LlmClient, TextGenerator};
use tracing::info;

use crate::config::EngineConfig;
use crate::embedding::{Embedder, EmbeddingClient};
use crate::error::{from_index, from_llm};
use crate::retriever::{CitationCandidate, Retriever};
use crate::section::GeneratedSection;
use crate::store::SectionStore;
use crate::synthesizer::{GenerationSettings, SectionConstraints, Synthesizer};

/// Entry point for the orchestration layer. Every collaborator is injected;
/// the engine itself holds no per-session state outside the index and the
/// section store.
///
/// Regenerating the same section concurrently is not guarded here; callers
/// serialise those calls.
pub struct DraftEngine {
    config: EngineConfig,
    chunker: Chunker,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    retriever: Retriever,
    synthesizer: Synthesizer,
    sections: Arc<SectionStore>,
}

impl DraftEngine {
    pub fn new(
        config: EngineConfig,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
        sections: Arc<SectionStore>,
    ) -> Result<Self> {
        config.validate()?;
        let chunker = Chunker::new(config.chunking)?;
        let retriever = Retriever::new(index.clone(), embedder.clone(), config.retrieval.clone());
        let synthesizer = Synthesizer::new(generator, GenerationSettings::from(&config.generation));
        Ok(Self {
            config,
            chunker,
            index,
            embedder,
            retriever,
            synthesizer,
            sections,
        })
    }

    /// In-memory index and store, with the embedding and generation backends
    /// named by `config`.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let embedder = EmbeddingClient::from_config(&config.embedding)?;
        let generator = LlmClient::with_options(
            config.generation.llm_provider()?,
            config.generation.model.clone(),
            config.generation.client_options(),
        )
        .map_err(from_llm)?;
        Self::new(
            config,
            Arc::new(MemoryIndex::new()),
            Arc::new(embedder),
            Arc::new(generator),
            Arc::new(SectionStore::new()),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Chunks, embeds and upserts one document. Re-indexing a document id
    /// swaps its earlier chunks for the new ones in a single index write.
    /// Returns the number of chunks stored.
    pub fn index_document(
        &self,
        session: &str,
        document_id: &str,
        title: &str,
        pages: Vec<PageText>,
    ) -> Result<usize> {
        if document_id.trim().is_empty() {
            return Err(DraftError::InvalidInput("document id is empty".into()));
        }
        if title.trim().is_empty() {
            return Err(DraftError::InvalidInput(format!(
                "document {document_id:?} has an empty title"
            )));
        }
        let document = SourceDocument::new(document_id, title.trim(), pages);
        let chunked = self.chunker.chunk_document(&document);
        let texts: Vec<String> = chunked.chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embedder.embed(&texts)?;
        let stats = chunked.stats;
        let records = chunked
            .chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| ChunkRecord::new(chunk, vector))
            .collect();
        let (replaced, written) = self
            .index
            .replace_document(session, document_id, records)
            .map_err(from_index)?;
        if written == 0 {
            info!(session, document = document_id, replaced, "document has no text to index");
            return Ok(0);
        }
        info!(
            session,
            document = document_id,
            chunks = written,
            replaced,
            hard_splits = stats.hard_splits,
            "indexed document"
        );
        Ok(written)
    }

    /// `top_k` falls back to the configured default.
    pub fn retrieve(
        &self,
        session: &str,
        section_name: &str,
        requirements: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<CitationCandidate>> {
        let top_k = top_k.unwrap_or(self.config.retrieval.top_k);
        self.retriever
            .retrieve(session, section_name, requirements, top_k)
    }

    pub fn synthesize_section(
        &self,
        constraints: &SectionConstraints,
        candidates: &[CitationCandidate],
    ) -> Result<GeneratedSection> {
        self.synthesizer.synthesize(constraints, candidates)
    }

    pub fn lock_paragraph(&self, section: &mut GeneratedSection, index: usize) -> Result<()> {
        section.lock_paragraph(index)
    }

    pub fn unlock_paragraph(&self, section: &mut GeneratedSection, index: usize) -> Result<bool> {
        section.unlock_paragraph(index)
    }

    pub fn regenerate_section(
        &self,
        constraints: &SectionConstraints,
        candidates: &[CitationCandidate],
        existing_locks: &ParagraphLocks,
    ) -> Result<GeneratedSection> {
        self.synthesizer
            .regenerate(constraints, candidates, existing_locks)
    }

    pub fn delete_session_index(&self, session: &str) -> bool {
        self.index.delete_session(session)
    }

    /// Retrieve, synthesize and store.
    pub fn draft_section(
        &self,
        session: &str,
        constraints: &SectionConstraints,
    ) -> Result<GeneratedSection> {
        let candidates = self.retrieve(session, &constraints.name, &constraints.requirements, None)?;
        let section = self.synthesize_section(constraints, &candidates)?;
        self.sections.put(session, section.clone());
        Ok(section)
    }

    /// Retrieve, synthesize, merge with the stored locks and store. The
    /// stored section is only replaced once every step has succeeded.
    pub fn regenerate_stored_section(
        &self,
        session: &str,
        constraints: &SectionConstraints,
    ) -> Result<GeneratedSection> {
        let previous = self.stored(session, &constraints.name)?;
        let candidates = self.retrieve(session, &constraints.name, &constraints.requirements, None)?;
        let section = self.regenerate_section(constraints, &candidates, &previous.locks)?;
        let section = carry_over(section, &previous, candidates);
        self.sections.put(session, section.clone());
        Ok(section)
    }

    pub fn edit_section(
        &self,
        session: &str,
        section_name: &str,
        text: &str,
        locked_indices: &[usize],
    ) -> Result<GeneratedSection> {
        let (_, section) = self.sections.update(session, section_name, |section| {
            section.apply_edit(text, locked_indices)
        })?;
        Ok(section)
    }

    pub fn lock_stored_paragraph(
        &self,
        session: &str,
        section_name: &str,
        index: usize,
    ) -> Result<GeneratedSection> {
        let (_, section) = self
            .sections
            .update(session, section_name, |section| section.lock_paragraph(index))?;
        Ok(section)
    }

    pub fn unlock_stored_paragraph(
        &self,
        session: &str,
        section_name: &str,
        index: usize,
    ) -> Result<GeneratedSection> {
        let (_, section) = self
            .sections
            .update(session, section_name, |section| section.unlock_paragraph(index))?;
        Ok(section)
    }

    /// Puts a previously saved section back into the store, e.g. one read
    /// from disk, so the stored flows can act on it.
    pub fn restore_section(&self, session: &str, section: GeneratedSection) -> Result<()> {
        section.locks.verify(&section.text)?;
        self.sections.put(session, section);
        Ok(())
    }

    pub fn section(&self, session: &str, section_name: &str) -> Option<GeneratedSection> {
        self.sections.get(session, section_name)
    }

    pub fn sections(&self, session: &str) -> Vec<GeneratedSection> {
        self.sections.list(session)
    }

    /// Drops the session's index collection and every generated section.
    pub fn delete_session(&self, session: &str) -> bool {
        let had_index = self.delete_session_index(session);
        let dropped = self.sections.delete_session(session);
        info!(session, had_index, sections = dropped, "deleted session");
        had_index || dropped > 0
    }

    /// Writes the session's chunks as JSON lines.
    pub fn export_session<W: Write>(&self, session: &str, writer: W) -> Result<usize> {
        export_jsonl(self.index.as_ref(), session, writer).map_err(from_index)
    }

    fn stored(&self, session: &str, section_name: &str) -> Result<GeneratedSection> {
        self.sections
            .get(session, section_name)
            .ok_or_else(|| DraftError::UnknownSection {
                session: session.to_string(),
                section: section_name.to_string(),
            })
    }
}

/// Locked paragraphs may cite chunks the new retrieval did not return, so
/// markers are resolved against the new candidates and the previous
/// citations together.
fn carry_over(
    mut section: GeneratedSection,
    previous: &GeneratedSection,
    candidates: Vec<CitationCandidate>,
) -> GeneratedSection {
    let mut seen: HashSet<String> = candidates.iter().map(|c| c.chunk_id.clone()).collect();
    let mut pool = candidates;
    for citation in &previous.citations {
        if seen.insert(citation.chunk_id.clone()) {
            pool.push(citation.clone());
        }
    }
    section.refresh_citations(&pool);
    section.regeneration_count = previous.regeneration_count + 1;
    section
}
