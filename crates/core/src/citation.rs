use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// `[<title>, p.<page>]`, tolerating whitespace after the comma and after `p.`.
static MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\[\]]+?),\s*p\.\s*(\d+)\]").expect("citation marker pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationMarker {
    pub raw: String,
    pub title: String,
    pub page: u32,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TitleMatch {
    None,
    Partial,
    Exact,
}

/// Inline marker in the stable wire format, e.g. `[Strategic Plan 2024, p.5]`.
pub fn format_marker(title: &str, page: Option<u32>) -> String {
    match page {
        Some(page) => format!("[{}, p.{}]", title, page),
        None => format!("[{}, p.?]", title),
    }
}

pub fn find_markers(text: &str) -> Vec<CitationMarker> {
    MARKER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let title = caps.get(1)?.as_str().trim();
            let page = caps.get(2)?.as_str().parse::<u32>().ok()?;
            if title.is_empty() {
                return None;
            }
            Some(CitationMarker {
                raw: whole.as_str().to_string(),
                title: title.to_string(),
                page,
                span: whole.range(),
            })
        })
        .collect()
}

/// Case-insensitive title comparison; a substring in either direction is a
/// partial match.
pub fn match_title(marker_title: &str, candidate_title: &str) -> TitleMatch {
    let marker = marker_title.trim().to_lowercase();
    let candidate = candidate_title.trim().to_lowercase();
    if marker.is_empty() || candidate.is_empty() {
        return TitleMatch::None;
    }
    if marker == candidate {
        TitleMatch::Exact
    } else if candidate.contains(&marker) || marker.contains(&candidate) {
        TitleMatch::Partial
    } else {
        TitleMatch::None
    }
}
