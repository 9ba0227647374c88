use std::collections::HashSet;

use grantdraft_core::{find_markers, match_title, TitleMatch};
use tracing::warn;

use crate::retriever::CitationCandidate;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Referenced candidates, each once, in order of first appearance.
    pub citations: Vec<CitationCandidate>,
    /// Marker strings that matched no candidate; they stay in the text.
    pub unresolved: Vec<String>,
}

/// Resolves every `[Title, p.N]` marker in `text` against `candidates`.
///
/// The page must match exactly. An exact (case-insensitive) title beats a
/// substring match; among equals the earlier, higher-ranked candidate wins.
pub fn resolve_citations(text: &str, candidates: &[CitationCandidate]) -> Resolution {
    let mut resolution = Resolution::default();
    let mut cited = HashSet::new();
    let mut missed = HashSet::new();
    for marker in find_markers(text) {
        let mut best: Option<(TitleMatch, &CitationCandidate)> = None;
        for candidate in candidates {
            if candidate.page_number != Some(marker.page) {
                continue;
            }
            let level = match_title(&marker.title, &candidate.document_title);
            if level == TitleMatch::None {
                continue;
            }
            if best.map_or(true, |(current, _)| level > current) {
                best = Some((level, candidate));
            }
        }
        match best {
            Some((_, candidate)) => {
                if cited.insert(candidate.chunk_id.clone()) {
                    resolution.citations.push(candidate.clone());
                }
            }
            None => {
                if missed.insert(marker.raw.clone()) {
                    resolution.unresolved.push(marker.raw);
                }
            }
        }
    }
    if !resolution.unresolved.is_empty() {
        warn!(
            unresolved = resolution.unresolved.len(),
            markers = ?resolution.unresolved,
            "citation markers did not match any candidate"
        );
    }
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, title: &str, page: Option<u32>) -> CitationCandidate {
        CitationCandidate {
            chunk_id: id.to_string(),
            document_id: format!("doc-{title}"),
            document_title: title.to_string(),
            page_number: page,
            ordinal: 0,
            snippet: String::new(),
            relevance_score: 0.8,
            raw_distance: 0.25,
        }
    }

    #[test]
    fn resolves_exact_and_substring_titles() {
        let candidates = vec![
            candidate("a", "Pond Inlet Report", Some(3)),
            candidate("b", "Housing Survey 2022", Some(12)),
        ];
        let text = "Residents number 1,555 [pond inlet report, p.3]. \
                    Housing is short [Housing Survey, p. 12].";
        let resolution = resolve_citations(text, &candidates);
        let ids: Vec<&str> = resolution.citations.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(resolution.unresolved.is_empty());
    }

    #[test]
    fn page_must_match_exactly() {
        let candidates = vec![candidate("a", "Pond Inlet Report", Some(3))];
        let resolution = resolve_citations("Claim [Pond Inlet Report, p.4].", &candidates);
        assert!(resolution.citations.is_empty());
        assert_eq!(resolution.unresolved, vec!["[Pond Inlet Report, p.4]"]);
    }

    #[test]
    fn exact_title_beats_earlier_partial_match() {
        let candidates = vec![
            candidate("partial", "Pond Inlet Report Appendix", Some(2)),
            candidate("exact", "Pond Inlet Report", Some(2)),
        ];
        let resolution = resolve_citations("[Pond Inlet Report, p.2]", &candidates);
        assert_eq!(resolution.citations[0].chunk_id, "exact");
    }

    #[test]
    fn higher_ranked_candidate_wins_ties() {
        let candidates = vec![
            candidate("first", "Pond Inlet Report", Some(2)),
            candidate("second", "Pond Inlet Report", Some(2)),
        ];
        let resolution = resolve_citations("[Pond Inlet Report, p.2]", &candidates);
        assert_eq!(resolution.citations.len(), 1);
        assert_eq!(resolution.citations[0].chunk_id, "first");
    }

    #[test]
    fn repeated_markers_are_listed_once() {
        let candidates = vec![candidate("a", "Plan", Some(1))];
        let text = "One [Plan, p.1]. Two [Plan, p.1]. Three [Ghost, p.9]. Four [Ghost, p.9].";
        let resolution = resolve_citations(text, &candidates);
        assert_eq!(resolution.citations.len(), 1);
        assert_eq!(resolution.unresolved, vec!["[Ghost, p.9]"]);
    }

    #[test]
    fn unknown_pages_never_resolve() {
        let candidates = vec![candidate("a", "Notes", None)];
        let resolution = resolve_citations("See [Notes, p.1].", &candidates);
        assert!(resolution.citations.is_empty());
    }
}
