use std::sync::Arc;

use grantdraft_core::split_into_paragraphs;
use grantdraft_llm::{LlmError, LlmRequest, LlmResponse, TextGenerator};
use grantdraft_rag::{
    relevance_from_distance, resolve_citations, CitationCandidate, DraftEngine, DraftError,
    EmbeddingClient, EngineConfig, MemoryIndex, PageText, SectionConstraints, SectionStore,
};
use parking_lot::Mutex;
use proptest::prelude::*;

/// Replays canned replies in order.
struct Scripted {
    replies: Mutex<Vec<Result<String, LlmError>>>,
}

impl Scripted {
    fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
        })
    }
}

impl TextGenerator for Scripted {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, _request: &LlmRequest) -> grantdraft_llm::Result<LlmResponse> {
        let mut replies = self.replies.lock();
        if replies.is_empty() {
            return Err(LlmError::EmptyResponse("scripted"));
        }
        let content = replies.remove(0)?;
        Ok(LlmResponse {
            content,
            prompt_tokens: 100,
            completion_tokens: 50,
        })
    }
}

fn engine_with(generator: Arc<dyn TextGenerator>) -> DraftEngine {
    DraftEngine::new(
        EngineConfig::default(),
        Arc::new(MemoryIndex::new()),
        Arc::new(EmbeddingClient::hash()),
        generator,
        Arc::new(SectionStore::new()),
    )
    .unwrap()
}

fn local_engine() -> DraftEngine {
    let mut config = EngineConfig::default();
    config.generation.provider = "local".to_string();
    DraftEngine::from_config(config).unwrap()
}

fn index_pond_inlet(engine: &DraftEngine, session: &str) {
    let written = engine
        .index_document(
            session,
            "pond-inlet",
            "Pond Inlet Report",
            vec![PageText::new(1, "The hamlet has 1,555 residents.")],
        )
        .unwrap();
    assert_eq!(written, 1);
}

#[test]
fn pond_inlet_report_is_retrieved_and_cited() {
    let engine = local_engine();
    index_pond_inlet(&engine, "session-a");

    let candidates = engine
        .retrieve(
            "session-a",
            "Community Demographics",
            "The hamlet has 1,555 residents",
            None,
        )
        .unwrap();
    assert!(!candidates.is_empty());
    assert_eq!(candidates[0].document_title, "Pond Inlet Report");
    assert_eq!(candidates[0].page_number, Some(1));
    assert!(candidates[0].relevance_score > 0.25);

    let constraints = SectionConstraints::new("Community Demographics")
        .with_requirements("The hamlet has 1,555 residents");
    let section = engine.draft_section("session-a", &constraints).unwrap();
    assert!(section.text.contains("[Pond Inlet Report, p.1]"));
    assert_eq!(section.citations.len(), 1);
    assert_eq!(section.citations[0].document_title, "Pond Inlet Report");
    assert!(section.unresolved_markers.is_empty());
    assert_eq!(engine.section("session-a", "Community Demographics"), Some(section));
}

#[test]
fn sessions_do_not_see_each_other() {
    let engine = local_engine();
    index_pond_inlet(&engine, "session-a");
    let candidates = engine
        .retrieve("session-b", "Community Demographics", "The hamlet has 1,555 residents", None)
        .unwrap();
    assert!(candidates.is_empty());
}

#[test]
fn empty_session_yields_no_candidates_and_a_gap_notice() {
    let engine = local_engine();
    let candidates = engine
        .retrieve("fresh", "Community Demographics", "", None)
        .unwrap();
    assert!(candidates.is_empty());

    let section = engine
        .draft_section("fresh", &SectionConstraints::new("Community Demographics"))
        .unwrap();
    assert!(section.citations.is_empty());
    assert!(section.text.contains("do not contain enough material"));
}

#[test]
fn locked_paragraph_survives_shorter_regeneration() {
    let generator = Scripted::new(vec![
        Ok("Opening draft.\n\nApproved middle paragraph.\n\nClosing draft.".to_string()),
        Ok("New opening.\n\nNew closing.".to_string()),
    ]);
    let engine = engine_with(generator);
    let constraints = SectionConstraints::new("Project Description");

    engine.draft_section("s1", &constraints).unwrap();
    let locked = engine.lock_stored_paragraph("s1", "Project Description", 1).unwrap();
    assert_eq!(locked.locks.snapshot(1), Some("Approved middle paragraph."));

    let section = engine.regenerate_stored_section("s1", &constraints).unwrap();
    assert_eq!(
        section.paragraphs(),
        vec!["New opening.", "Approved middle paragraph.", "New closing."]
    );
    assert_eq!(section.locked_paragraph_indices(), vec![1]);
    assert_eq!(section.regeneration_count, 1);
    assert_eq!(section.word_count, 7);
}

#[test]
fn locks_beyond_new_text_are_appended() {
    let generator = Scripted::new(vec![
        Ok("One.\n\nTwo.\n\nThree kept.".to_string()),
        Ok("Only one.".to_string()),
    ]);
    let engine = engine_with(generator);
    let constraints = SectionConstraints::new("Timeline");
    engine.draft_section("s1", &constraints).unwrap();
    engine.lock_stored_paragraph("s1", "Timeline", 2).unwrap();

    let section = engine.regenerate_stored_section("s1", &constraints).unwrap();
    assert_eq!(section.paragraphs(), vec!["Only one.", "Three kept."]);
    assert_eq!(section.locked_paragraph_indices(), vec![1]);
    section.locks.verify(&section.text).unwrap();
}

#[test]
fn exceeded_word_limit_warns_without_truncating() {
    let long = vec!["word"; 620].join(" ");
    let engine = engine_with(Scripted::new(vec![Ok(long)]));
    let constraints = SectionConstraints::new("Project Description").with_word_limit(500);
    let section = engine.draft_section("s1", &constraints).unwrap();
    assert_eq!(section.word_count, 620);
    let warning = section.warning.as_deref().unwrap();
    assert!(warning.contains("word limit by 120 words (620/500)"));
}

#[test]
fn failed_regeneration_keeps_previous_section() {
    let generator = Scripted::new(vec![
        Ok("First paragraph.\n\nSecond paragraph.".to_string()),
        Ok("   ".to_string()),
        Err(LlmError::Transient {
            provider: "openai",
            attempts: 4,
            reason: "status 429".to_string(),
        }),
    ]);
    let engine = engine_with(generator);
    let constraints = SectionConstraints::new("Budget");
    let original = engine.draft_section("s1", &constraints).unwrap();

    let err = engine.regenerate_stored_section("s1", &constraints).unwrap_err();
    assert!(matches!(err, DraftError::GenerationFailed(_)));
    assert_eq!(engine.section("s1", "Budget"), Some(original.clone()));

    let err = engine.regenerate_stored_section("s1", &constraints).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(engine.section("s1", "Budget"), Some(original));
}

#[test]
fn edits_are_validated_as_a_whole() {
    let engine = engine_with(Scripted::new(vec![Ok("Alpha.\n\nBeta.".to_string())]));
    let constraints = SectionConstraints::new("Budget");
    let original = engine.draft_section("s1", &constraints).unwrap();

    let err = engine
        .edit_section("s1", "Budget", "Alpha edited.\n\nBeta.\n\nGamma.", &[0, 4])
        .unwrap_err();
    assert!(matches!(err, DraftError::Validation(_)));
    assert_eq!(engine.section("s1", "Budget"), Some(original));

    let edited = engine
        .edit_section("s1", "Budget", "Alpha edited.\n\nBeta.\n\nGamma.", &[0, 2])
        .unwrap();
    assert_eq!(edited.locked_paragraph_indices(), vec![0, 2]);
    assert_eq!(edited.word_count, 4);

    let unlocked = engine.unlock_stored_paragraph("s1", "Budget", 0).unwrap();
    assert_eq!(unlocked.locked_paragraph_indices(), vec![2]);
    assert!(engine.unlock_stored_paragraph("s1", "Budget", 9).is_err());
}

#[test]
fn direct_regenerate_merges_with_supplied_locks() {
    let engine = engine_with(Scripted::new(vec![Ok("Fresh A.\n\nFresh B.".to_string())]));
    let old = "Kept A.\n\nOld B.\n\nOld C.";
    let locks = grantdraft_rag::ParagraphLocks::from_indices(old, &[0]).unwrap();
    let section = engine
        .regenerate_section(&SectionConstraints::new("Outcomes"), &[], &locks)
        .unwrap();
    assert_eq!(split_into_paragraphs(&section.text), vec!["Kept A.", "Fresh A.", "Fresh B."]);
}

#[test]
fn export_lists_indexed_chunks() {
    let engine = local_engine();
    index_pond_inlet(&engine, "s1");
    let mut buf = Vec::new();
    let written = engine.export_session("s1", &mut buf).unwrap();
    assert_eq!(written, 1);
    let line = String::from_utf8(buf).unwrap();
    assert!(line.contains("\"document_title\":\"Pond Inlet Report\""));
}

fn candidate(title: &str, page: u32) -> CitationCandidate {
    CitationCandidate {
        chunk_id: format!("{title}#{page}"),
        document_id: title.to_lowercase(),
        document_title: title.to_string(),
        page_number: Some(page),
        ordinal: 0,
        snippet: String::new(),
        relevance_score: 0.5,
        raw_distance: 1.0,
    }
}

proptest! {
    #[test]
    fn relevance_is_bounded_and_strictly_decreasing(d in 0.0f32..1000.0, delta in 0.01f32..100.0) {
        let near = relevance_from_distance(d);
        let far = relevance_from_distance(d + delta);
        prop_assert!(near > 0.0 && near <= 1.0);
        prop_assert!(far > 0.0 && far <= 1.0);
        prop_assert!(far < near);
    }

    #[test]
    fn matching_marker_resolves_to_one_citation(
        title in "[A-Z][a-z]{2,10}( [A-Z][a-z]{2,10}){0,3}",
        page in 1u32..500,
    ) {
        let target = candidate(&title, page);
        let distractor = candidate(&title, page + 1000);
        let text = format!("A grounded claim {}.", target.inline_marker());
        let resolution = resolve_citations(&text, &[distractor, target.clone()]);
        prop_assert_eq!(resolution.citations.len(), 1);
        prop_assert_eq!(&resolution.citations[0], &target);
        prop_assert!(resolution.unresolved.is_empty());
    }

    #[test]
    fn unmatched_marker_stays_visible_only(
        title in "[A-Z][a-z]{2,10}( [A-Z][a-z]{2,10}){0,3}",
        page in 1u32..500,
    ) {
        let text = format!("An unsupported claim [{title}, p.{}].", page + 1000);
        let resolution = resolve_citations(&text, &[candidate(&title, page)]);
        prop_assert!(resolution.citations.is_empty());
        prop_assert_eq!(resolution.unresolved.len(), 1);
        prop_assert!(text.contains(&resolution.unresolved[0]));
    }
}
