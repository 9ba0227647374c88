use std::cmp::Ordering;
use std::collections::HashMap;

use grantdraft_core::TextChunk;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{ChunkRecord, IndexError, Neighbor, Result, VectorIndex};

#[derive(Debug, Default)]
struct Collection {
    dimensions: Option<usize>,
    records: Vec<ChunkRecord>,
    positions: HashMap<String, usize>,
}

impl Collection {
    fn insert(&mut self, record: ChunkRecord) {
        match self.positions.get(&record.chunk.chunk_id) {
            Some(&position) => self.records[position] = record,
            None => {
                self.positions
                    .insert(record.chunk.chunk_id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn remove_document(&mut self, document_id: &str) -> usize {
        let before = self.records.len();
        self.records
            .retain(|record| record.chunk.document_id != document_id);
        self.positions = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| (record.chunk.chunk_id.clone(), position))
            .collect();
        before - self.records.len()
    }
}

/// In-process index: one collection per session behind a single
/// reader-writer lock. Queries share the read lock; writes are serialised,
/// and a document replacement happens inside one write.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    sessions: RwLock<HashMap<String, Collection>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl VectorIndex for MemoryIndex {
    fn upsert(&self, session: &str, records: Vec<ChunkRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut sessions = self.sessions.write();
        let dimensions = batch_dimensions(sessions.get(session), &records)?;
        let collection = sessions.entry(session.to_string()).or_default();
        collection.dimensions = dimensions;
        let written = records.len();
        for record in records {
            collection.insert(record);
        }
        info!(
            session,
            written,
            total = collection.records.len(),
            "upserted chunks"
        );
        Ok(written)
    }

    fn replace_document(
        &self,
        session: &str,
        document_id: &str,
        records: Vec<ChunkRecord>,
    ) -> Result<(usize, usize)> {
        let mut sessions = self.sessions.write();
        let dimensions = batch_dimensions(sessions.get(session), &records)?;
        if records.is_empty() && !sessions.contains_key(session) {
            return Ok((0, 0));
        }
        let collection = sessions.entry(session.to_string()).or_default();
        let removed = collection.remove_document(document_id);
        collection.dimensions = dimensions;
        let written = records.len();
        for record in records {
            collection.insert(record);
        }
        info!(
            session,
            document_id,
            removed,
            written,
            total = collection.records.len(),
            "replaced document chunks"
        );
        Ok((removed, written))
    }

    fn query(&self, session: &str, vector: &[f32], top_k: usize) -> Result<Vec<Neighbor>> {
        let sessions = self.sessions.read();
        let Some(collection) = sessions.get(session) else {
            debug!(session, "query against unknown session");
            return Ok(Vec::new());
        };
        if top_k == 0 || collection.records.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = collection.dimensions {
            if expected != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        let mut scored: Vec<(f32, &ChunkRecord)> = collection
            .records
            .iter()
            .map(|record| (squared_euclidean(&record.embedding, vector), record))
            .collect();
        scored.sort_by(|(left_distance, left), (right_distance, right)| {
            left_distance
                .partial_cmp(right_distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.chunk.ordinal.cmp(&right.chunk.ordinal))
                .then_with(|| left.chunk.document_id.cmp(&right.chunk.document_id))
        });
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(raw_distance, record)| Neighbor {
                chunk: record.chunk.clone(),
                raw_distance,
            })
            .collect())
    }

    fn delete_document(&self, session: &str, document_id: &str) -> usize {
        let mut sessions = self.sessions.write();
        let Some(collection) = sessions.get_mut(session) else {
            return 0;
        };
        let removed = collection.remove_document(document_id);
        if removed > 0 {
            debug!(session, document_id, removed, "removed document chunks");
        }
        removed
    }

    fn delete_session(&self, session: &str) -> bool {
        let removed = self.sessions.write().remove(session).is_some();
        if removed {
            info!(session, "deleted session index");
        }
        removed
    }

    fn count(&self, session: &str) -> usize {
        self.sessions
            .read()
            .get(session)
            .map(|collection| collection.records.len())
            .unwrap_or(0)
    }

    fn chunks(&self, session: &str) -> Vec<TextChunk> {
        self.sessions
            .read()
            .get(session)
            .map(|collection| {
                collection
                    .records
                    .iter()
                    .map(|record| record.chunk.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Validates a whole batch against the collection before anything is
/// touched; returns the dimensionality the collection holds afterwards.
fn batch_dimensions(
    collection: Option<&Collection>,
    records: &[ChunkRecord],
) -> Result<Option<usize>> {
    let mut dimensions = collection.and_then(|collection| collection.dimensions);
    for record in records {
        dimensions = Some(check_dimensions(dimensions, record)?);
    }
    Ok(dimensions)
}

fn check_dimensions(expected: Option<usize>, record: &ChunkRecord) -> Result<usize> {
    let actual = record.embedding.len();
    if actual == 0 {
        return Err(IndexError::EmptyEmbedding(record.chunk.chunk_id.clone()));
    }
    match expected {
        Some(expected) if expected != actual => {
            Err(IndexError::DimensionMismatch { expected, actual })
        }
        _ => Ok(actual),
    }
}

fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
