use serde::{Deserialize, Serialize};

/// One page of text as extracted by the upstream parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageText {
    /// 1-indexed; `None` when the parser could not tell.
    pub page_number: Option<u32>,
    pub text: String,
}

impl PageText {
    pub fn new(page_number: u32, text: impl Into<String>) -> Self {
        Self {
            page_number: Some(page_number),
            text: text.into(),
        }
    }

    pub fn unnumbered(text: impl Into<String>) -> Self {
        Self {
            page_number: None,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub document_id: String,
    pub title: String,
    pub pages: Vec<PageText>,
}

impl SourceDocument {
    pub fn new(
        document_id: impl Into<String>,
        title: impl Into<String>,
        pages: Vec<PageText>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            title: title.into(),
            pages,
        }
    }

    /// Splits raw text on form feeds, numbering pages from 1.
    pub fn from_form_feed_text(
        document_id: impl Into<String>,
        title: impl Into<String>,
        text: &str,
    ) -> Self {
        let pages = text
            .split('\u{c}')
            .enumerate()
            .map(|(idx, page)| PageText::new(idx as u32 + 1, page))
            .collect();
        Self::new(document_id, title, pages)
    }

    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|page| page.text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub page_number: Option<u32>,
    pub ordinal: usize,
    pub text: String,
    pub token_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_feed_text_becomes_numbered_pages() {
        let doc = SourceDocument::from_form_feed_text("doc-1", "Report", "one\u{c}two\u{c}three");
        assert_eq!(doc.pages.len(), 3);
        assert_eq!(doc.pages[0], PageText::new(1, "one"));
        assert_eq!(doc.pages[2].page_number, Some(3));
    }

    #[test]
    fn blank_document_detection() {
        let doc = SourceDocument::new("d", "t", vec![PageText::new(1, "  \n"), PageText::unnumbered("")]);
        assert!(doc.is_blank());
        let doc = SourceDocument::new("d", "t", vec![PageText::new(1, "text")]);
        assert!(!doc.is_blank());
    }
}
