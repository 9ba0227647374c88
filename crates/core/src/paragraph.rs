//! Paragraph boundaries, locks, and merge-on-regenerate.
//!
//! A paragraph is a blank-line (`"\n\n"`) delimited segment, trimmed, with
//! empty segments dropped. Every paragraph index in the system refers to
//! this split. Deleting a blank line therefore merges two paragraphs.

use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{DraftError, Result};

pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

pub fn paragraph_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut offset = 0usize;
    for segment in text.split(PARAGRAPH_SEPARATOR) {
        let trimmed = segment.trim();
        if !trimmed.is_empty() {
            let lead = segment.len() - segment.trim_start().len();
            let start = offset + lead;
            spans.push(start..start + trimmed.len());
        }
        offset += segment.len() + PARAGRAPH_SEPARATOR.len();
    }
    spans
}

pub fn split_into_paragraphs(text: &str) -> Vec<&str> {
    paragraph_spans(text)
        .into_iter()
        .map(|span| &text[span])
        .collect()
}

pub fn join_paragraphs<S: AsRef<str>>(paragraphs: &[S]) -> String {
    paragraphs
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join(PARAGRAPH_SEPARATOR)
}

pub fn paragraph_count(text: &str) -> usize {
    paragraph_spans(text).len()
}

/// Byte range of paragraph `index` inside `text`.
pub fn paragraph_span(text: &str, index: usize) -> Option<Range<usize>> {
    paragraph_spans(text).into_iter().nth(index)
}

/// Paragraph containing the byte offset, inclusive of both ends so a cursor
/// placed right after the last character still resolves.
pub fn paragraph_at_offset(text: &str, offset: usize) -> Option<(usize, &str)> {
    paragraph_spans(text)
        .into_iter()
        .enumerate()
        .find(|(_, span)| span.start <= offset && offset <= span.end)
        .map(|(index, span)| (index, &text[span]))
}

/// Locked paragraphs keyed by index, each with the exact text captured when
/// it was locked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParagraphLocks {
    snapshots: BTreeMap<usize, String>,
}

impl ParagraphLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks every index in `indices` against `text`. Any invalid index
    /// rejects the whole set.
    pub fn from_indices(text: &str, indices: &[usize]) -> Result<Self> {
        let mut locks = Self::new();
        for &index in indices {
            locks.lock(text, index)?;
        }
        Ok(locks)
    }

    pub fn from_snapshots<I>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = (usize, String)>,
    {
        Self {
            snapshots: snapshots.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.snapshots.contains_key(&index)
    }

    pub fn indices(&self) -> Vec<usize> {
        self.snapshots.keys().copied().collect()
    }

    pub fn snapshot(&self, index: usize) -> Option<&str> {
        self.snapshots.get(&index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.snapshots
            .iter()
            .map(|(index, text)| (*index, text.as_str()))
    }

    /// Locking an already locked paragraph refreshes its snapshot.
    pub fn lock(&mut self, text: &str, index: usize) -> Result<()> {
        let paragraphs = split_into_paragraphs(text);
        let paragraph = paragraphs
            .get(index)
            .ok_or_else(|| out_of_range(index, paragraphs.len()))?;
        self.snapshots.insert(index, (*paragraph).to_string());
        Ok(())
    }

    /// Returns whether the paragraph had been locked.
    pub fn unlock(&mut self, text: &str, index: usize) -> Result<bool> {
        let count = paragraph_count(text);
        if index >= count {
            return Err(out_of_range(index, count));
        }
        Ok(self.snapshots.remove(&index).is_some())
    }

    /// Checks that every lock points at a paragraph of `text` holding its
    /// snapshot verbatim.
    pub fn verify(&self, text: &str) -> Result<()> {
        let paragraphs = split_into_paragraphs(text);
        for (index, snapshot) in self.iter() {
            match paragraphs.get(index) {
                Some(paragraph) if *paragraph == snapshot => {}
                Some(_) => {
                    return Err(DraftError::Validation(format!(
                        "locked paragraph {index} no longer matches its snapshot"
                    )))
                }
                None => return Err(out_of_range(index, paragraphs.len())),
            }
        }
        Ok(())
    }
}

fn out_of_range(index: usize, count: usize) -> DraftError {
    DraftError::Validation(format!(
        "paragraph index {index} is out of range (section has {count} paragraphs)"
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub text: String,
    /// Locks re-keyed to the positions their snapshots occupy in `text`.
    pub locks: ParagraphLocks,
    /// Locks that pointed past the available positions and were appended.
    pub appended: usize,
}

/// Splices freshly generated paragraphs into the unlocked positions.
///
/// Walking positions from 0, a locked position takes its snapshot and any
/// other position takes the next paragraph of `new_text`. Once `new_text`
/// runs out, the remaining locked snapshots are appended in index order
/// rather than dropped; once the locks run out, the remaining new
/// paragraphs follow.
pub fn merge(new_text: &str, locks: &ParagraphLocks) -> MergeOutcome {
    let mut fresh = split_into_paragraphs(new_text).into_iter();
    let mut pending = locks.snapshots.iter().peekable();
    let mut merged: Vec<&str> = Vec::new();
    let mut relocked = BTreeMap::new();
    loop {
        let position = merged.len();
        match pending.peek() {
            Some(&(&index, snapshot)) if index <= position => {
                relocked.insert(position, snapshot.to_string());
                merged.push(snapshot.as_str());
                pending.next();
            }
            _ => match fresh.next() {
                Some(paragraph) => merged.push(paragraph),
                None => break,
            },
        }
    }
    let mut appended = 0usize;
    for (_, snapshot) in pending {
        relocked.insert(merged.len(), snapshot.clone());
        merged.push(snapshot.as_str());
        appended += 1;
    }
    MergeOutcome {
        text: join_paragraphs(&merged),
        locks: ParagraphLocks {
            snapshots: relocked,
        },
        appended,
    }
}
