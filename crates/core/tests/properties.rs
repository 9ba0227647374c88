use proptest::prelude::*;
use grantdraft_core::{
    count_tokens, find_markers, format_marker, join_paragraphs, merge, split_into_paragraphs,
    split_text, Chunker, ChunkConfig, ParagraphLocks,
};

proptest! {
    #[test]
    fn chunks_never_exceed_budget(
        words in prop::collection::vec("[a-z]{1,12}", 1..400),
        target in 20usize..120,
        overlap_pct in 0usize..50,
    ) {
        let overlap = target * overlap_pct / 100;
        let text = words.join(" ");
        let chunks = split_text(&text, target, overlap).unwrap();
        prop_assert!(!chunks.is_empty());
        for chunk in &chunks {
            prop_assert!(count_tokens(chunk) <= target);
        }
    }

    #[test]
    fn consecutive_chunks_share_overlap(
        sentences in prop::collection::vec("[A-Z][a-z]{2,6}( [a-z]{2,6}){2,5}", 10..60),
    ) {
        let text = sentences.join(". ");
        let chunker = Chunker::new(ChunkConfig { target_tokens: 80, overlap_tokens: 20 }).unwrap();
        let (chunks, stats) = chunker.split_with_stats(&text);
        prop_assume!(stats.reduced_overlaps == 0 && stats.hard_splits == 0);
        for pair in chunks.windows(2) {
            let shared = longest_shared(&pair[0], &pair[1]);
            prop_assert!(count_tokens(shared) >= 20);
        }
    }

    #[test]
    fn paragraph_split_join_roundtrip(paragraphs in prop::collection::vec(paragraph(), 0..8)) {
        let text = paragraphs.join("\n\n");
        let split = split_into_paragraphs(&text);
        prop_assert_eq!(join_paragraphs(&split), text.as_str());
        prop_assert_eq!(split.len(), paragraphs.len());
    }

    #[test]
    fn merge_preserves_locks_and_fills_with_new_content(
        old in prop::collection::vec(paragraph(), 1..8),
        fresh in prop::collection::vec(paragraph(), 0..8),
        lock_mask in prop::collection::vec(any::<bool>(), 8),
    ) {
        let old_text = old.join("\n\n");
        let indices: Vec<usize> = (0..old.len()).filter(|i| lock_mask[*i]).collect();
        let locks = ParagraphLocks::from_indices(&old_text, &indices).unwrap();
        let outcome = merge(&fresh.join("\n\n"), &locks);
        let merged = split_into_paragraphs(&outcome.text);

        prop_assert_eq!(merged.len(), fresh.len() + locks.len());
        outcome.locks.verify(&outcome.text).unwrap();
        for (index, snapshot) in locks.iter() {
            if outcome.appended == 0 {
                prop_assert_eq!(merged[index], snapshot);
            }
        }
        let unlocked: Vec<&str> = merged
            .iter()
            .enumerate()
            .filter(|(i, _)| !outcome.locks.contains(*i))
            .map(|(_, p)| *p)
            .collect();
        let fresh_refs: Vec<&str> = fresh.iter().map(String::as_str).collect();
        prop_assert_eq!(unlocked, fresh_refs);
    }

    #[test]
    fn formatted_markers_parse_back(title in "[A-Z][A-Za-z0-9 ]{0,30}[a-z0-9]", page in 1u32..2000) {
        let text = format!("A claim drawn from the source {}.", format_marker(&title, Some(page)));
        let markers = find_markers(&text);
        prop_assert_eq!(markers.len(), 1);
        prop_assert_eq!(&markers[0].title, &title);
        prop_assert_eq!(markers[0].page, page);
    }
}

fn paragraph() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9 ,.]{0,40}[a-z.]".prop_map(|s| s.to_string())
}

fn longest_shared<'a>(left: &'a str, right: &str) -> &'a str {
    (0..left.len())
        .filter(|start| left.is_char_boundary(*start))
        .map(|start| &left[start..])
        .find(|suffix| right.starts_with(suffix))
        .unwrap_or("")
}
