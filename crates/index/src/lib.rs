mod memory;

use std::io::Write;

use grantdraft_core::TextChunk;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryIndex;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("embedding dimension mismatch: collection holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("chunk {0} has an empty embedding")]
    EmptyEmbedding(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// A chunk together with the vector it was indexed under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk: TextChunk,
    pub embedding: Vec<f32>,
}

impl ChunkRecord {
    pub fn new(chunk: TextChunk, embedding: Vec<f32>) -> Self {
        Self { chunk, embedding }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub chunk: TextChunk,
    /// Native metric of the index (squared Euclidean for [`MemoryIndex`]);
    /// unbounded, smaller is closer.
    pub raw_distance: f32,
}

/// One logical collection per working session. Queries never cross
/// sessions, and a session with nothing indexed answers with no neighbors.
pub trait VectorIndex: Send + Sync {
    /// Inserts or replaces records by `chunk_id`. Returns how many records
    /// were written.
    fn upsert(&self, session: &str, records: Vec<ChunkRecord>) -> Result<usize>;

    /// Nearest neighbors first.
    fn query(&self, session: &str, vector: &[f32], top_k: usize) -> Result<Vec<Neighbor>>;

    /// Removes the document's previous chunks and inserts `records` as one
    /// step, so readers see either the old or the new version. The batch is
    /// validated first; a rejected batch leaves the previous chunks in place.
    /// Returns `(removed, written)`.
    fn replace_document(
        &self,
        session: &str,
        document_id: &str,
        records: Vec<ChunkRecord>,
    ) -> Result<(usize, usize)>;

    /// Removes every chunk of one document; returns how many were removed.
    fn delete_document(&self, session: &str, document_id: &str) -> usize;

    /// Drops the whole collection; returns whether one existed.
    fn delete_session(&self, session: &str) -> bool;

    fn count(&self, session: &str) -> usize;

    /// Snapshot of the session's chunks in insertion order.
    fn chunks(&self, session: &str) -> Vec<TextChunk>;
}

pub struct JsonlWriter<W> {
    writer: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Writes the session's chunks (without vectors) as JSON lines. Returns the
/// number of lines written.
pub fn export_jsonl<W: Write>(index: &dyn VectorIndex, session: &str, writer: W) -> Result<usize> {
    let mut out = JsonlWriter::new(writer);
    let chunks = index.chunks(session);
    for chunk in &chunks {
        out.write_record(chunk)?;
    }
    out.into_inner().flush()?;
    Ok(chunks.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn chunk(id: &str, ordinal: usize, text: &str) -> TextChunk {
        TextChunk {
            chunk_id: id.to_string(),
            document_id: "doc-1".to_string(),
            document_title: "Pond Inlet Report".to_string(),
            page_number: Some(1),
            ordinal,
            text: text.to_string(),
            token_count: text.split_whitespace().count(),
        }
    }

    #[test]
    fn jsonl_writer_appends_newline_per_record() {
        let mut writer = JsonlWriter::new(Vec::new());
        writer.write_record(&chunk("c0", 0, "The hamlet has 1,555 residents.")).unwrap();
        let buf = writer.into_inner();
        assert!(buf.ends_with(b"\n"));
        let parsed: TextChunk = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed.document_title, "Pond Inlet Report");
        assert_eq!(parsed.page_number, Some(1));
    }

    #[test]
    fn export_writes_session_chunks_without_vectors() {
        let index = MemoryIndex::new();
        index
            .upsert(
                "s1",
                vec![
                    ChunkRecord::new(chunk("c0", 0, "first"), vec![1.0, 0.0]),
                    ChunkRecord::new(chunk("c1", 1, "second"), vec![0.0, 1.0]),
                ],
            )
            .unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        let written = export_jsonl(&index, "s1", fs::File::create(&path).unwrap()).unwrap();
        assert_eq!(written, 2);

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(!lines[0].contains("embedding"));
        let second: TextChunk = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.chunk_id, "c1");
    }

    #[test]
    fn export_of_unknown_session_is_empty() {
        let index = MemoryIndex::new();
        let written = export_jsonl(&index, "nobody", Vec::new()).unwrap();
        assert_eq!(written, 0);
    }
}
