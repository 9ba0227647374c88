use std::collections::{BTreeMap, HashMap};

use grantdraft_core::{DraftError, Result};
use parking_lot::RwLock;

use crate::section::GeneratedSection;

/// Generated sections keyed by session, then by section name.
#[derive(Debug, Default)]
pub struct SectionStore {
    sessions: RwLock<HashMap<String, BTreeMap<String, GeneratedSection>>>,
}

impl SectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session: &str, section_name: &str) -> Option<GeneratedSection> {
        self.sessions
            .read()
            .get(session)
            .and_then(|sections| sections.get(section_name))
            .cloned()
    }

    /// Sections of one session ordered by name.
    pub fn list(&self, session: &str) -> Vec<GeneratedSection> {
        self.sessions
            .read()
            .get(session)
            .map(|sections| sections.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn put(&self, session: &str, section: GeneratedSection) {
        self.sessions
            .write()
            .entry(session.to_string())
            .or_default()
            .insert(section.section_name.clone(), section);
    }

    /// Applies `change` to a copy of the stored section and commits the copy
    /// only if `change` succeeds.
    pub fn update<F, T>(&self, session: &str, section_name: &str, change: F) -> Result<(T, GeneratedSection)>
    where
        F: FnOnce(&mut GeneratedSection) -> Result<T>,
    {
        let mut sessions = self.sessions.write();
        let stored = sessions
            .get_mut(session)
            .and_then(|sections| sections.get_mut(section_name))
            .ok_or_else(|| DraftError::UnknownSection {
                session: session.to_string(),
                section: section_name.to_string(),
            })?;
        let mut draft = stored.clone();
        let value = change(&mut draft)?;
        *stored = draft.clone();
        Ok((value, draft))
    }

    /// Returns how many sections were dropped.
    pub fn delete_session(&self, session: &str) -> usize {
        self.sessions
            .write()
            .remove(session)
            .map(|sections| sections.len())
            .unwrap_or(0)
    }
}
