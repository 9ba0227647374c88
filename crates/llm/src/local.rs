//! Offline provider. Drafts deterministically from the numbered sources in
//! the prompt so the whole pipeline runs without credentials.

use crate::{LlmRequest, LlmResponse};

pub const SOURCES_START: &str = "=== SOURCES START ===";
pub const SOURCES_END: &str = "=== SOURCES END ===";

const SECTION_PREFIX: &str = "Section:";
const WORDS_PER_SOURCE: usize = 40;

struct PromptSource {
    title: String,
    page: Option<u32>,
    body: String,
}

pub(crate) fn draft(req: &LlmRequest) -> LlmResponse {
    let sources = parse_sources(&req.user);
    let section = section_name(&req.user).unwrap_or("this section");
    let content = if sources.is_empty() {
        format!(
            "The supporting documents provided so far do not contain enough material to draft \
             the {section} section. Add documents that describe this topic and regenerate."
        )
    } else {
        sources
            .iter()
            .filter_map(paragraph_for)
            .collect::<Vec<String>>()
            .join("\n\n")
    };
    LlmResponse {
        content,
        prompt_tokens: 0,
        completion_tokens: 0,
    }
}

fn paragraph_for(source: &PromptSource) -> Option<String> {
    let summary = summarize_text(&source.body, WORDS_PER_SOURCE);
    if summary.is_empty() {
        return None;
    }
    let summary = summary.trim_end_matches(['.', ',', ';', ':']);
    Some(match source.page {
        Some(page) => format!("{summary} [{}, p.{page}].", source.title),
        None => format!("{summary}."),
    })
}

fn section_name(prompt: &str) -> Option<&str> {
    prompt
        .lines()
        .find_map(|line| line.trim().strip_prefix(SECTION_PREFIX))
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

fn parse_sources(prompt: &str) -> Vec<PromptSource> {
    let Some(start) = prompt.find(SOURCES_START) else {
        return Vec::new();
    };
    let block = &prompt[start + SOURCES_START.len()..];
    let block = block.find(SOURCES_END).map_or(block, |end| &block[..end]);

    let mut sources: Vec<PromptSource> = Vec::new();
    for line in block.lines() {
        if let Some((title, page)) = parse_header(line) {
            sources.push(PromptSource {
                title,
                page,
                body: String::new(),
            });
        } else if let Some(current) = sources.last_mut() {
            current.body.push_str(line);
            current.body.push('\n');
        }
    }
    sources
}

/// `[Source 2] Housing Survey, Page 12:` -> `("Housing Survey", Some(12))`.
fn parse_header(line: &str) -> Option<(String, Option<u32>)> {
    let rest = line.trim().strip_prefix("[Source ")?;
    let (_, rest) = rest.split_once(']')?;
    let rest = rest.trim().strip_suffix(':')?;
    let (title, page) = rest.rsplit_once(", Page ")?;
    Some((title.trim().to_string(), page.trim().parse().ok()))
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}
