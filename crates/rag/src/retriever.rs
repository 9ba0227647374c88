use std::cmp::Ordering;
use std::sync::Arc;

use grantdraft_core::{format_marker, Result};
use grantdraft_index::{Neighbor, VectorIndex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::from_index;

/// Maps an unbounded, non-negative distance into (0, 1]; strictly
/// decreasing, and 1.0 only at distance zero.
pub fn relevance_from_distance(raw_distance: f32) -> f32 {
    1.0 / (1.0 + raw_distance.max(0.0))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationCandidate {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub page_number: Option<u32>,
    pub ordinal: usize,
    pub snippet: String,
    pub relevance_score: f32,
    pub raw_distance: f32,
}

impl CitationCandidate {
    pub fn from_neighbor(neighbor: Neighbor, snippet_chars: usize) -> Self {
        let chunk = neighbor.chunk;
        Self {
            snippet: truncate_chars(&chunk.text, snippet_chars).to_string(),
            chunk_id: chunk.chunk_id,
            document_id: chunk.document_id,
            document_title: chunk.document_title,
            page_number: chunk.page_number,
            ordinal: chunk.ordinal,
            relevance_score: relevance_from_distance(neighbor.raw_distance),
            raw_distance: neighbor.raw_distance,
        }
    }

    /// `[Title, p.N]`, the marker the synthesizer asks the model to emit.
    pub fn inline_marker(&self) -> String {
        format_marker(&self.document_title, self.page_number)
    }

    pub fn short_marker(&self) -> String {
        format!("[{}]", self.document_title)
    }

    pub fn page_label(&self) -> String {
        self.page_number
            .map(|page| page.to_string())
            .unwrap_or_else(|| "?".to_string())
    }

    pub fn snippet_preview(&self, max_chars: usize) -> String {
        let preview = truncate_chars(&self.snippet, max_chars);
        if preview.len() < self.snippet.len() {
            format!("{}...", preview.trim_end())
        } else {
            preview.to_string()
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Section name and requirements, concatenated.
pub fn build_query(section_name: &str, requirements: &str) -> String {
    let name = section_name.trim();
    let requirements = requirements.trim();
    if requirements.is_empty() {
        name.to_string()
    } else {
        format!("{name}\n{requirements}")
    }
}

pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Ranked candidates at or above the relevance floor. An empty session,
    /// or one where nothing clears the floor, yields an empty list.
    pub fn retrieve(
        &self,
        session: &str,
        section_name: &str,
        requirements: &str,
        top_k: usize,
    ) -> Result<Vec<CitationCandidate>> {
        if top_k == 0 || self.index.count(session) == 0 {
            debug!(session, top_k, "nothing to retrieve");
            return Ok(Vec::new());
        }
        let query = build_query(section_name, requirements);
        let vector = self.embedder.embed_query(&query)?;
        let neighbors = self
            .index
            .query(session, &vector, top_k)
            .map_err(from_index)?;
        let fetched = neighbors.len();
        let candidates = rank_candidates(
            neighbors,
            self.config.min_relevance,
            self.config.snippet_chars,
        );
        if candidates.is_empty() {
            warn!(
                session,
                section = section_name,
                fetched,
                floor = self.config.min_relevance,
                "no candidate cleared the relevance floor"
            );
        } else {
            info!(
                session,
                section = section_name,
                fetched,
                kept = candidates.len(),
                "retrieved citation candidates"
            );
        }
        Ok(candidates)
    }
}

/// Converts neighbors to candidates, drops those under `floor`, and orders
/// by relevance with ties broken by chunk ordinal.
pub fn rank_candidates(
    neighbors: Vec<Neighbor>,
    floor: f32,
    snippet_chars: usize,
) -> Vec<CitationCandidate> {
    let mut candidates: Vec<CitationCandidate> = neighbors
        .into_iter()
        .map(|neighbor| CitationCandidate::from_neighbor(neighbor, snippet_chars))
        .filter(|candidate| {
            let keep = candidate.relevance_score >= floor;
            debug!(
                chunk = %candidate.chunk_id,
                distance = candidate.raw_distance,
                relevance = candidate.relevance_score,
                keep,
                "relevance decision"
            );
            keep
        })
        .collect();
    candidates.sort_by(|left, right| {
        right
            .relevance_score
            .partial_cmp(&left.relevance_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.ordinal.cmp(&right.ordinal))
            .then_with(|| left.document_id.cmp(&right.document_id))
    });
    candidates
}
