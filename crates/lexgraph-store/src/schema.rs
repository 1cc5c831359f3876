//! SQLite schema definitions for the property graph.
//!
//! Nodes live in typed tables (chunks, intents, phases, users, sessions);
//! relationships live in a single edges table keyed by tagged node ids.
//! Full-text search runs over trigger-synced FTS5 virtual tables.

/// Schema version recorded in `schema_meta`.
pub const SCHEMA_VERSION: &str = "1";

/// Keys used in the `schema_meta` table.
pub mod meta_keys {
    pub const SCHEMA_VERSION: &str = "schema_version";
    /// Embedding dimension the store was bootstrapped with. A mismatch
    /// against the configured model dimension is a schema error.
    pub const EMBEDDING_DIM: &str = "embedding_dim";
}

/// SQL to create the context chunk table.
///
/// `embedding` is little-endian f32 bytes; its byte length must equal
/// 4 * embedding_dim for every row.
pub const SCHEMA_CREATE_CHUNKS: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    chunk_hash TEXT PRIMARY KEY NOT NULL,
    content TEXT NOT NULL,
    language TEXT NOT NULL,
    source_doc TEXT NOT NULL,
    position INTEGER NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0,
    embedding BLOB NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the intent table.
pub const SCHEMA_CREATE_INTENTS: &str = r#"
CREATE TABLE IF NOT EXISTS intents (
    name TEXT NOT NULL,
    lang TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    confidence REAL NOT NULL DEFAULT 1.0,
    category TEXT NOT NULL DEFAULT '',
    frequency INTEGER NOT NULL DEFAULT 1,
    success_rate REAL NOT NULL DEFAULT 0.0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (name, lang)
)
"#;

/// SQL to create the phase catalog table.
pub const SCHEMA_CREATE_PHASES: &str = r#"
CREATE TABLE IF NOT EXISTS phases (
    name TEXT PRIMARY KEY NOT NULL,
    ord INTEGER NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    input_schema TEXT NOT NULL DEFAULT '{}',
    output_schema TEXT NOT NULL DEFAULT '{}',
    timeout_seconds INTEGER NOT NULL DEFAULT 0
)
"#;

/// SQL to create the user and session tables.
///
/// Created by external callers; the core only reads them.
pub const SCHEMA_CREATE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY NOT NULL
)
"#;

pub const SCHEMA_CREATE_SESSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT
)
"#;

/// SQL to create the edges table.
///
/// `src` and `dst` are tagged node keys ("chunk:<hash>", "intent:<name>/<lang>").
pub const SCHEMA_CREATE_EDGES: &str = r#"
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    src TEXT NOT NULL,
    rel_type TEXT NOT NULL,
    dst TEXT NOT NULL,
    props_json TEXT NOT NULL DEFAULT '{}',
    UNIQUE(src, rel_type, dst)
)
"#;

/// SQL to create B-tree indexes for filtered queries and traversal.
pub const SCHEMA_CREATE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_chunks_language ON chunks(language);
CREATE INDEX IF NOT EXISTS idx_chunks_source_doc ON chunks(source_doc);
CREATE INDEX IF NOT EXISTS idx_chunks_position ON chunks(position);
CREATE INDEX IF NOT EXISTS idx_chunks_confidence ON chunks(confidence);
CREATE INDEX IF NOT EXISTS idx_intents_frequency ON intents(frequency);
CREATE INDEX IF NOT EXISTS idx_edges_src ON edges(src);
CREATE INDEX IF NOT EXISTS idx_edges_dst ON edges(dst);
CREATE INDEX IF NOT EXISTS idx_edges_src_type ON edges(src, rel_type);
CREATE INDEX IF NOT EXISTS idx_edges_dst_type ON edges(dst, rel_type)
"#;

/// SQL to create the FTS5 index over chunk content with sync triggers.
pub const SCHEMA_CREATE_CHUNKS_FTS: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    content='chunks',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS chunks_fts_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, content) VALUES (new.rowid, new.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content)
    VALUES ('delete', old.rowid, old.content);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content)
    VALUES ('delete', old.rowid, old.content);
    INSERT INTO chunks_fts(rowid, content) VALUES (new.rowid, new.content);
END
"#;

/// SQL to create the FTS5 index over intent names with sync triggers.
///
/// Serves intent resolution and prefix suggestions.
pub const SCHEMA_CREATE_INTENTS_FTS: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS intents_fts USING fts5(
    name,
    content='intents',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS intents_fts_ai AFTER INSERT ON intents BEGIN
    INSERT INTO intents_fts(rowid, name) VALUES (new.rowid, new.name);
END;

CREATE TRIGGER IF NOT EXISTS intents_fts_ad AFTER DELETE ON intents BEGIN
    INSERT INTO intents_fts(intents_fts, rowid, name)
    VALUES ('delete', old.rowid, old.name);
END;

CREATE TRIGGER IF NOT EXISTS intents_fts_au AFTER UPDATE ON intents BEGIN
    INSERT INTO intents_fts(intents_fts, rowid, name)
    VALUES ('delete', old.rowid, old.name);
    INSERT INTO intents_fts(rowid, name) VALUES (new.rowid, new.name);
END
"#;

/// SQL to create the schema metadata table.
pub const SCHEMA_CREATE_META: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

/// All DDL batches in creation order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    SCHEMA_CREATE_CHUNKS,
    SCHEMA_CREATE_INTENTS,
    SCHEMA_CREATE_PHASES,
    SCHEMA_CREATE_USERS,
    SCHEMA_CREATE_SESSIONS,
    SCHEMA_CREATE_EDGES,
    SCHEMA_CREATE_INDEXES,
    SCHEMA_CREATE_CHUNKS_FTS,
    SCHEMA_CREATE_INTENTS_FTS,
    SCHEMA_CREATE_META,
];

/// Kind of a required schema object, for verification reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaObjectKind {
    Table,
    Index,
    FtsIndex,
    UniqueConstraint,
    Meta,
}

impl std::fmt::Display for SchemaObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaObjectKind::Table => write!(f, "table"),
            SchemaObjectKind::Index => write!(f, "index"),
            SchemaObjectKind::FtsIndex => write!(f, "fulltext-index"),
            SchemaObjectKind::UniqueConstraint => write!(f, "unique-constraint"),
            SchemaObjectKind::Meta => write!(f, "metadata"),
        }
    }
}

/// A schema object that must exist before search is served.
#[derive(Debug, Clone, Copy)]
pub struct RequiredObject {
    pub name: &'static str,
    pub kind: SchemaObjectKind,
    /// Object name as it appears in sqlite_master (None for meta checks)
    pub master_name: Option<&'static str>,
}

/// Catalog of required objects checked by `verify()`.
///
/// The uniqueness constraints on chunk_hash, (name, lang), and user_id are
/// realized as primary keys of their tables, so their presence check is the
/// table itself.
pub const REQUIRED_OBJECTS: &[RequiredObject] = &[
    RequiredObject {
        name: "chunks",
        kind: SchemaObjectKind::Table,
        master_name: Some("chunks"),
    },
    RequiredObject {
        name: "intents",
        kind: SchemaObjectKind::Table,
        master_name: Some("intents"),
    },
    RequiredObject {
        name: "phases",
        kind: SchemaObjectKind::Table,
        master_name: Some("phases"),
    },
    RequiredObject {
        name: "edges",
        kind: SchemaObjectKind::Table,
        master_name: Some("edges"),
    },
    RequiredObject {
        name: "chunk_hash uniqueness",
        kind: SchemaObjectKind::UniqueConstraint,
        master_name: Some("chunks"),
    },
    RequiredObject {
        name: "intent (name, lang) uniqueness",
        kind: SchemaObjectKind::UniqueConstraint,
        master_name: Some("intents"),
    },
    RequiredObject {
        name: "user_id uniqueness",
        kind: SchemaObjectKind::UniqueConstraint,
        master_name: Some("users"),
    },
    RequiredObject {
        name: "chunks_fts",
        kind: SchemaObjectKind::FtsIndex,
        master_name: Some("chunks_fts"),
    },
    RequiredObject {
        name: "intents_fts",
        kind: SchemaObjectKind::FtsIndex,
        master_name: Some("intents_fts"),
    },
    RequiredObject {
        name: "idx_chunks_language",
        kind: SchemaObjectKind::Index,
        master_name: Some("idx_chunks_language"),
    },
    RequiredObject {
        name: "idx_chunks_source_doc",
        kind: SchemaObjectKind::Index,
        master_name: Some("idx_chunks_source_doc"),
    },
    RequiredObject {
        name: "idx_chunks_position",
        kind: SchemaObjectKind::Index,
        master_name: Some("idx_chunks_position"),
    },
    RequiredObject {
        name: "idx_chunks_confidence",
        kind: SchemaObjectKind::Index,
        master_name: Some("idx_chunks_confidence"),
    },
    RequiredObject {
        name: "vector index (embedding dimension)",
        kind: SchemaObjectKind::Meta,
        master_name: None,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_batches_are_nonempty() {
        for stmt in SCHEMA_STATEMENTS {
            assert!(stmt.contains("CREATE"));
        }
    }

    #[test]
    fn test_required_objects_cover_fts_and_btree() {
        let fts = REQUIRED_OBJECTS
            .iter()
            .filter(|o| o.kind == SchemaObjectKind::FtsIndex)
            .count();
        assert_eq!(fts, 2);

        let btree = REQUIRED_OBJECTS
            .iter()
            .filter(|o| o.kind == SchemaObjectKind::Index)
            .count();
        assert_eq!(btree, 4);
    }
}
