//! SQLite snapshot of the index and metadata store.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rusqlite::{Connection, OpenFlags, params};

use super::IndexState;
use super::flat::{DistanceMetric, FlatIndex};
use crate::error::IndexError;
use crate::models::{Chunk, ChunkKey, Document};
use crate::services::embedding::ProviderSignature;
use crate::utils::temp_sibling;

/// Snapshots written with another version are ignored on load.
pub const FORMAT_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE documents (
    path TEXT PRIMARY KEY,
    size_bytes INTEGER NOT NULL,
    modified_ms INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    indexed_at TEXT NOT NULL
);

CREATE TABLE chunks (
    document_path TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    id TEXT NOT NULL,
    text TEXT NOT NULL,
    start_offset INTEGER NOT NULL,
    end_offset INTEGER NOT NULL,
    tags TEXT NOT NULL,
    embedding BLOB NOT NULL,
    PRIMARY KEY (document_path, sequence)
);
"#;

fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, IndexError> {
    if bytes.len() % 4 != 0 {
        return Err(IndexError::Corrupt(format!(
            "vector blob of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Write `state` to a temporary sibling, then rename it over `path`.
pub(super) fn write(state: &IndexState, path: &Path) -> Result<(), IndexError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }

    {
        let mut conn = Connection::open(&tmp)?;
        conn.execute_batch(SCHEMA)?;
        let tx = conn.transaction()?;
        {
            let mut meta = tx.prepare("INSERT INTO meta (key, value) VALUES (?1, ?2)")?;
            meta.execute(params!["format_version", FORMAT_VERSION.to_string()])?;
            meta.execute(params!["metric", state.index.metric().to_string()])?;
            if let Some(sig) = &state.signature {
                meta.execute(params!["provider", sig.provider])?;
                meta.execute(params!["dimension", sig.dimension.to_string()])?;
            }

            let mut docs = tx.prepare(
                "INSERT INTO documents (path, size_bytes, modified_ms, chunk_count, content_hash, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for doc in state.documents.values() {
                docs.execute(params![
                    doc.path,
                    doc.size_bytes as i64,
                    doc.modified_ms,
                    doc.chunk_count as i64,
                    doc.content_hash,
                    doc.indexed_at,
                ])?;
            }

            let mut chunks = tx.prepare(
                "INSERT INTO chunks (document_path, sequence, id, text, start_offset, end_offset, tags, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (key, chunk) in &state.chunks {
                let vector = state.index.get(key).ok_or_else(|| {
                    IndexError::Corrupt(format!(
                        "chunk {}#{} has no index entry",
                        key.document_id, key.sequence
                    ))
                })?;
                chunks.execute(params![
                    chunk.document_id,
                    chunk.sequence as i64,
                    chunk.id,
                    chunk.text,
                    chunk.start_offset as i64,
                    chunk.end_offset as i64,
                    chunk.tags.join("\u{1f}"),
                    encode_vector(vector),
                ])?;
            }
        }
        tx.commit()?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

fn meta_value(conn: &Connection, key: &str) -> Result<Option<String>, IndexError> {
    let mut stmt = conn.prepare("SELECT value FROM meta WHERE key = ?1")?;
    let mut rows = stmt.query(params![key])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// Read a snapshot back. Any inconsistency is reported as `Corrupt`.
pub(super) fn read(path: &Path) -> Result<IndexState, IndexError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    let version = meta_value(&conn, "format_version")?
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| IndexError::Corrupt("missing format version".to_string()))?;
    if version != FORMAT_VERSION {
        return Err(IndexError::Corrupt(format!(
            "format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }

    let metric: DistanceMetric = meta_value(&conn, "metric")?
        .ok_or_else(|| IndexError::Corrupt("missing metric".to_string()))?
        .parse()
        .map_err(IndexError::Corrupt)?;

    let signature = match (
        meta_value(&conn, "provider")?,
        meta_value(&conn, "dimension")?,
    ) {
        (Some(provider), Some(dimension)) => Some(ProviderSignature {
            provider,
            dimension: dimension
                .parse()
                .map_err(|_| IndexError::Corrupt(format!("bad dimension {:?}", dimension)))?,
        }),
        _ => None,
    };

    let mut documents = BTreeMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT path, size_bytes, modified_ms, chunk_count, content_hash, indexed_at FROM documents",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Document {
                path: row.get(0)?,
                size_bytes: row.get::<_, i64>(1)? as u64,
                modified_ms: row.get(2)?,
                chunk_count: row.get::<_, i64>(3)? as u32,
                content_hash: row.get(4)?,
                indexed_at: row.get(5)?,
            })
        })?;
        for doc in rows {
            let doc = doc?;
            documents.insert(doc.path.clone(), doc);
        }
    }

    let mut index = FlatIndex::new(metric);
    let mut chunks = BTreeMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT document_path, sequence, id, text, start_offset, end_offset, tags, embedding FROM chunks",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let tags: String = row.get(6)?;
            let chunk = Chunk {
                document_id: row.get(0)?,
                sequence: row.get::<_, i64>(1)? as u32,
                id: row.get(2)?,
                text: row.get(3)?,
                start_offset: row.get::<_, i64>(4)? as u64,
                end_offset: row.get::<_, i64>(5)? as u64,
                tags: tags
                    .split('\u{1f}')
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
                embedding: Vec::new(),
            };
            let blob: Vec<u8> = row.get(7)?;
            let vector = decode_vector(&blob)?;

            if !documents.contains_key(&chunk.document_id) {
                return Err(IndexError::Corrupt(format!(
                    "chunk for unknown document {}",
                    chunk.document_id
                )));
            }
            if index.dimension().is_some_and(|dim| dim != vector.len()) {
                return Err(IndexError::Corrupt("mixed vector dimensions".to_string()));
            }

            let key = ChunkKey::new(chunk.document_id.clone(), chunk.sequence);
            index.insert(key.clone(), vector);
            chunks.insert(key, chunk);
        }
    }

    for doc in documents.values() {
        let stored = chunks
            .range(ChunkKey::new(doc.path.clone(), 0)..=ChunkKey::new(doc.path.clone(), u32::MAX))
            .count();
        if stored != doc.chunk_count as usize {
            return Err(IndexError::Corrupt(format!(
                "{} records {} chunks, found {}",
                doc.path, doc.chunk_count, stored
            )));
        }
    }

    if let (Some(sig), Some(dim)) = (&signature, index.dimension()) {
        if sig.dimension != dim {
            return Err(IndexError::Corrupt(format!(
                "signature dimension {} does not match stored vectors ({})",
                sig.dimension, dim
            )));
        }
    }

    Ok(IndexState {
        index,
        documents,
        chunks,
        signature,
    })
}
