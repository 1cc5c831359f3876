//! Node, edge, and query result types for the property graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Relationship type names used in the graph.
pub mod rel {
    /// Chunk elaborates on an intent
    pub const DETAILS: &str = "DETAILS";
    /// Intent or phase ordering edge
    pub const LEADS_TO: &str = "LEADS_TO";
    /// Session collects intents
    pub const CONTAINS: &str = "CONTAINS";
    /// User owns a session
    pub const HAS_SESSION: &str = "HAS_SESSION";
}

/// Separator between the language tag and content inside node keys and
/// chunk fingerprints.
pub const KEY_SEPARATOR: char = '\x1f';

/// Typed reference to a graph node.
///
/// The in-memory model carries ids only, never object references; cycles
/// (Intent LEADS_TO Intent) live entirely inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// Context chunk, keyed by its content hash
    Chunk(String),
    /// Intent, keyed by the (name, lang) pair
    Intent { name: String, lang: String },
    /// Workflow phase, keyed by name
    Phase(String),
    /// Opaque session id
    Session(String),
    /// Opaque user id
    User(String),
}

impl NodeRef {
    /// Stable string key stored in the edges table.
    pub fn key(&self) -> String {
        match self {
            NodeRef::Chunk(hash) => format!("chunk:{hash}"),
            NodeRef::Intent { name, lang } => {
                format!("intent:{name}{KEY_SEPARATOR}{lang}")
            }
            NodeRef::Phase(name) => format!("phase:{name}"),
            NodeRef::Session(id) => format!("session:{id}"),
            NodeRef::User(id) => format!("user:{id}"),
        }
    }

    /// Parse a stored key back into a typed reference.
    pub fn parse(key: &str) -> Result<Self> {
        let (tag, rest) = key
            .split_once(':')
            .ok_or_else(|| StoreError::permanent(format!("malformed node key '{key}'")))?;
        match tag {
            "chunk" => Ok(NodeRef::Chunk(rest.to_string())),
            "intent" => {
                let (name, lang) = rest.split_once(KEY_SEPARATOR).ok_or_else(|| {
                    StoreError::permanent(format!("malformed intent key '{key}'"))
                })?;
                Ok(NodeRef::Intent {
                    name: name.to_string(),
                    lang: lang.to_string(),
                })
            }
            "phase" => Ok(NodeRef::Phase(rest.to_string())),
            "session" => Ok(NodeRef::Session(rest.to_string())),
            "user" => Ok(NodeRef::User(rest.to_string())),
            _ => Err(StoreError::permanent(format!(
                "unknown node kind in key '{key}'"
            ))),
        }
    }

    /// Node kind tag ("chunk", "intent", ...).
    pub fn kind(&self) -> &'static str {
        match self {
            NodeRef::Chunk(_) => "chunk",
            NodeRef::Intent { .. } => "intent",
            NodeRef::Phase(_) => "phase",
            NodeRef::Session(_) => "session",
            NodeRef::User(_) => "user",
        }
    }
}

/// A unit of indexed content with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextChunk {
    /// Stable hash of the normalized content (primary key)
    pub chunk_hash: String,
    /// Normalized chunk text
    pub content: String,
    /// BCP-47-ish language code ("uk", "en", "und")
    pub language: String,
    /// Source document identifier
    pub source_doc: String,
    /// Position of the chunk within the source document
    pub position: u32,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// L2-normalized embedding of dimension D
    pub embedding: Vec<f32>,
    /// Free-form metadata map
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContextChunk {
    /// Node reference for this chunk.
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::Chunk(self.chunk_hash.clone())
    }
}

/// A named user intention; a retrieval anchor in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    pub lang: String,
    pub description: String,
    pub confidence: f32,
    pub category: String,
    /// Ingest counter; increments on every upsert of the same (name, lang)
    pub frequency: u64,
    pub success_rate: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Intent {
    /// Node reference for this intent.
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::Intent {
            name: self.name.clone(),
            lang: self.lang.clone(),
        }
    }
}

/// Fields supplied when upserting an intent. The store owns `frequency`
/// and the timestamps.
#[derive(Debug, Clone)]
pub struct IntentSpec {
    pub name: String,
    pub lang: String,
    pub description: String,
    pub confidence: f32,
    pub category: String,
    pub success_rate: f32,
}

impl IntentSpec {
    /// Minimal spec with just the unique key; remaining fields default.
    pub fn named(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
            description: String::new(),
            confidence: 1.0,
            category: String::new(),
            success_rate: 0.0,
        }
    }
}

/// An ordered step in a workflow. Static catalog, admin-maintained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    pub order: u32,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    pub timeout_seconds: u32,
}

/// Whether an upsert created a node or matched an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Matched,
}

/// Filter predicates accepted by vector and fulltext queries.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub language: Option<String>,
    pub source_doc: Option<String>,
    pub min_confidence: Option<f32>,
}

impl ChunkFilter {
    pub fn is_empty(&self) -> bool {
        self.language.is_none() && self.source_doc.is_none() && self.min_confidence.is_none()
    }
}

/// A chunk returned from a vector or fulltext query, with its score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_hash: String,
    pub content: String,
    pub language: String,
    pub source_doc: String,
    pub position: u32,
    pub confidence: f32,
    /// Cosine similarity in [-1, 1] for vector queries; (0, 1] BM25-derived
    /// for fulltext queries
    pub score: f32,
}

/// A node in an expanded subgraph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedNode {
    /// Tagged node key ("intent:...", "chunk:...")
    pub id: String,
    /// Node kind tag
    pub kind: String,
    /// Human-readable label (intent name, chunk hash prefix, ...)
    pub label: String,
    /// Distance from the expansion origin (1-based)
    pub depth: usize,
}

/// A typed edge in an expanded subgraph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgraphEdge {
    pub src: String,
    pub rel_type: String,
    pub dst: String,
}

/// Result of a bounded breadth-first expansion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subgraph {
    pub nodes: Vec<RelatedNode>,
    pub edges: Vec<SubgraphEdge>,
}

/// Node and edge counts, used by status reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCounts {
    pub chunks: u64,
    pub intents: u64,
    pub phases: u64,
    pub edges: u64,
}

/// Serialize an embedding as little-endian f32 bytes for BLOB storage.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Deserialize a BLOB back into an embedding.
pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two vectors.
///
/// On L2-normalized vectors this equals the inner product; the norm terms
/// guard against denormalized input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ref_roundtrip() {
        let refs = vec![
            NodeRef::Chunk("abc123".into()),
            NodeRef::Intent {
                name: "python_help".into(),
                lang: "en".into(),
            },
            NodeRef::Phase("analyze".into()),
            NodeRef::Session("s-1".into()),
            NodeRef::User("u-1".into()),
        ];
        for r in refs {
            assert_eq!(NodeRef::parse(&r.key()).unwrap(), r);
        }
    }

    #[test]
    fn test_node_ref_parse_rejects_garbage() {
        assert!(NodeRef::parse("no-colon").is_err());
        assert!(NodeRef::parse("widget:x").is_err());
        assert!(NodeRef::parse("intent:missing-separator").is_err());
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let embedding = vec![0.25f32, -1.5, 3.0, 0.0];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob), embedding);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        let c = vec![1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert!((cosine_similarity(&a, &c) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
