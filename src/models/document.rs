use serde::{Deserialize, Serialize};

/// Per-file record owned by the metadata store. Identified by absolute path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
    pub size_bytes: u64,
    pub modified_ms: i64,
    pub chunk_count: u32,
    pub content_hash: String,
    pub indexed_at: String,
}

impl Document {
    pub fn new(path: impl Into<String>, size_bytes: u64, modified_ms: i64, content_hash: String) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            modified_ms,
            chunk_count: 0,
            content_hash,
            indexed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn id(&self) -> &str {
        &self.path
    }

    pub fn filename(&self) -> String {
        std::path::Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.clone())
    }

    /// True when the file on disk still matches this record's size and mtime.
    pub fn is_unchanged(&self, size_bytes: u64, modified_ms: i64) -> bool {
        self.size_bytes == size_bytes && self.modified_ms == modified_ms
    }
}

/// Identifies a chunk: owning document plus sequence index.
///
/// Ordering is (document id, sequence), which is also the search tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkKey {
    pub document_id: String,
    pub sequence: u32,
}

impl ChunkKey {
    pub fn new(document_id: impl Into<String>, sequence: u32) -> Self {
        Self {
            document_id: document_id.into(),
            sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub sequence: u32,
    pub text: String,
    pub start_offset: u64,
    pub end_offset: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn generate_id(document_id: &str, sequence: u32) -> String {
        use uuid::Uuid;
        let name = format!("{}:{}", document_id, sequence);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    pub fn new(
        document_id: &str,
        sequence: u32,
        text: String,
        start_offset: u64,
        end_offset: u64,
    ) -> Self {
        Self {
            id: Self::generate_id(document_id, sequence),
            document_id: document_id.to_string(),
            sequence,
            text,
            start_offset,
            end_offset,
            tags: Vec::new(),
            embedding: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.document_id.clone(), self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_generate_id_is_stable() {
        let id = Chunk::generate_id("/docs/a.txt", 5);
        assert_eq!(id.len(), 36);
        assert_eq!(id, Chunk::generate_id("/docs/a.txt", 5));
        assert_ne!(id, Chunk::generate_id("/docs/a.txt", 6));
    }

    #[test]
    fn test_chunk_key_ordering() {
        let mut keys = vec![
            ChunkKey::new("/b", 0),
            ChunkKey::new("/a", 2),
            ChunkKey::new("/a", 1),
        ];
        keys.sort();
        assert_eq!(keys[0], ChunkKey::new("/a", 1));
        assert_eq!(keys[2], ChunkKey::new("/b", 0));
    }

    #[test]
    fn test_document_change_detection() {
        let doc = Document::new("/docs/a.txt", 10, 1_700_000_000_000, "hash".into());
        assert!(doc.is_unchanged(10, 1_700_000_000_000));
        assert!(!doc.is_unchanged(11, 1_700_000_000_000));
        assert!(!doc.is_unchanged(10, 1_700_000_000_001));
        assert_eq!(doc.filename(), "a.txt");
    }
}
