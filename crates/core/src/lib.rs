mod chunk;
mod citation;
mod document;
mod embedding;
mod error;
mod paragraph;
mod stats;

pub use chunk::{split_text, ChunkConfig, ChunkStats, ChunkedDocument, Chunker};
pub use citation::{find_markers, format_marker, match_title, CitationMarker, TitleMatch};
pub use document::{PageText, SourceDocument, TextChunk};
pub use embedding::{HashEmbedder, HashEmbedderConfig};
pub use error::{DraftError, Result};
pub use paragraph::{
    join_paragraphs, merge, paragraph_at_offset, paragraph_count, paragraph_span,
    paragraph_spans, split_into_paragraphs, MergeOutcome, ParagraphLocks, PARAGRAPH_SEPARATOR,
};
pub use stats::{count_chars, count_tokens, count_words, TextStats};
