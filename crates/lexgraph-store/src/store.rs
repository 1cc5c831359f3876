//! Graph store adapter.
//!
//! Typed, pooled, parameterized access to the property graph. The
//! [`GraphStore`] trait is the capability boundary between the engine and
//! the storage backend; [`SqliteGraphStore`] is the production
//! implementation, and tests provide mocks over the same contract.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, QueryBuilder, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use tracing::{debug, warn};

use lexgraph_config::StoreConfig;

use crate::error::{Result, StoreError};
use crate::pool;
use crate::retry::{with_retry, RetryPolicy};
use crate::types::{
    blob_to_embedding, cosine_similarity, embedding_to_blob, ChunkFilter, ContextChunk, Intent,
    IntentSpec, NodeRef, Phase, RelatedNode, ScoredChunk, StoreCounts, Subgraph, SubgraphEdge,
    UpsertOutcome,
};

/// A parameter bound into a raw query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Blob(Vec<u8>),
    Null,
}

/// A raw query result row: column names paired with decoded values.
#[derive(Debug, Clone)]
pub struct SqlRow {
    pub columns: Vec<String>,
    pub values: Vec<SqlValue>,
}

impl SqlRow {
    /// Look up a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }
}

/// Capability interface over the property graph.
///
/// Ingestion and search depend on this trait only; swapping the backend
/// (or mocking it in tests) never touches the callers.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Execute a raw parameterized read query.
    async fn execute_read(&self, query: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;

    /// Execute a raw parameterized write query, returning any rows it
    /// produces (RETURNING clauses yield rows, plain writes none).
    async fn execute_write(&self, query: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;

    /// MERGE a chunk by `chunk_hash`. On create all properties are set; on
    /// match only `updated_at` is refreshed and `metadata` merged.
    async fn upsert_chunk(&self, chunk: &ContextChunk) -> Result<UpsertOutcome>;

    /// Upsert a group of chunks inside one write transaction. Any failure
    /// rolls back the whole group.
    async fn upsert_chunk_group(&self, chunks: &[ContextChunk]) -> Result<Vec<UpsertOutcome>>;

    /// MERGE an intent by `(name, lang)`; increments `frequency` on match.
    async fn upsert_intent(&self, intent: &IntentSpec) -> Result<UpsertOutcome>;

    /// MERGE a phase by name (admin catalog maintenance).
    async fn upsert_phase(&self, phase: &Phase) -> Result<UpsertOutcome>;

    /// MERGE a relationship with additive property merge.
    async fn link(
        &self,
        src: &NodeRef,
        rel_type: &str,
        dst: &NodeRef,
        props: serde_json::Value,
    ) -> Result<()>;

    /// Nearest chunks by cosine similarity against the stored embeddings.
    async fn vector_query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>>;

    /// Chunks matching the full-text index, best first.
    async fn fulltext_query(
        &self,
        text: &str,
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>>;

    /// Bounded breadth-first expansion around a node.
    async fn neighbors(
        &self,
        origin: &NodeRef,
        depth: usize,
        rel_types: &[&str],
    ) -> Result<Subgraph>;

    /// Fetch a chunk by hash; `NotFound` on miss.
    async fn chunk_by_hash(&self, chunk_hash: &str) -> Result<ContextChunk>;

    /// Fetch an intent by its unique key; `NotFound` on miss.
    async fn intent_by_name(&self, name: &str, lang: &str) -> Result<Intent>;

    /// Intents whose names match the full-text index, best first.
    async fn intent_fulltext(&self, text: &str, k: usize) -> Result<Vec<Intent>>;

    /// Chunks connected to an intent via a `DETAILS` edge (embeddings
    /// included, for re-scoring).
    async fn chunks_detailing(&self, intent: &NodeRef) -> Result<Vec<ContextChunk>>;

    /// Intent names starting with `prefix`, by frequency then name.
    async fn suggest_intents(&self, prefix: &str, limit: usize) -> Result<Vec<String>>;

    /// Node and edge counts.
    async fn counts(&self) -> Result<StoreCounts>;

    /// Connectivity probe.
    async fn ping(&self) -> Result<()>;
}

/// SQLite-backed graph store.
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
    query_timeout: Duration,
    embedding_dim: usize,
    retry: RetryPolicy,
}

impl SqliteGraphStore {
    /// Connect using store configuration.
    pub async fn connect(config: &StoreConfig, embedding_dim: usize) -> Result<Self> {
        let pool = pool::create_pool(config).await?;
        Ok(Self::from_pool(pool, config.store_query_timeout_ms, embedding_dim))
    }

    /// Build from an existing pool (tests use the in-memory pool).
    pub fn from_pool(pool: SqlitePool, query_timeout_ms: u64, embedding_dim: usize) -> Self {
        Self {
            pool,
            query_timeout: Duration::from_millis(query_timeout_ms),
            embedding_dim,
            retry: RetryPolicy::default(),
        }
    }

    /// The underlying pool, for schema management.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The embedding dimension enforced on writes.
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    async fn timed<T>(
        &self,
        op: &'static str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.query_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout { op })?
    }

    fn check_dim(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.embedding_dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.embedding_dim,
                actual: embedding.len(),
            });
        }
        Ok(())
    }
}

/// Upsert one chunk inside an open transaction.
async fn upsert_chunk_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    chunk: &ContextChunk,
) -> Result<UpsertOutcome> {
    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM chunks WHERE chunk_hash = ?")
            .bind(&chunk.chunk_hash)
            .fetch_optional(&mut **tx)
            .await?;

    let now = Utc::now().to_rfc3339();
    let metadata = serde_json::to_string(&chunk.metadata)?;

    sqlx::query(
        r#"
        INSERT INTO chunks
            (chunk_hash, content, language, source_doc, position, confidence,
             embedding, metadata_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(chunk_hash) DO UPDATE SET
            updated_at = excluded.updated_at,
            metadata_json = json_patch(chunks.metadata_json, excluded.metadata_json)
        "#,
    )
    .bind(&chunk.chunk_hash)
    .bind(&chunk.content)
    .bind(&chunk.language)
    .bind(&chunk.source_doc)
    .bind(i64::from(chunk.position))
    .bind(f64::from(chunk.confidence))
    .bind(embedding_to_blob(&chunk.embedding))
    .bind(metadata)
    .bind(&now)
    .bind(&now)
    .execute(&mut **tx)
    .await?;

    Ok(if existing.is_some() {
        UpsertOutcome::Matched
    } else {
        UpsertOutcome::Created
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn chunk_from_row(row: &SqliteRow) -> Result<ContextChunk> {
    let metadata: String = row.try_get("metadata_json")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let blob: Vec<u8> = row.try_get("embedding")?;
    Ok(ContextChunk {
        chunk_hash: row.try_get("chunk_hash")?,
        content: row.try_get("content")?,
        language: row.try_get("language")?,
        source_doc: row.try_get("source_doc")?,
        position: row.try_get::<i64, _>("position")? as u32,
        confidence: row.try_get::<f64, _>("confidence")? as f32,
        embedding: blob_to_embedding(&blob),
        metadata: serde_json::from_str(&metadata)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn intent_from_row(row: &SqliteRow) -> Result<Intent> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Intent {
        name: row.try_get("name")?,
        lang: row.try_get("lang")?,
        description: row.try_get("description")?,
        confidence: row.try_get::<f64, _>("confidence")? as f32,
        category: row.try_get("category")?,
        frequency: row.try_get::<i64, _>("frequency")? as u64,
        success_rate: row.try_get::<f64, _>("success_rate")? as f32,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn scored_chunk_from_row(row: &SqliteRow, score: f32) -> Result<ScoredChunk> {
    Ok(ScoredChunk {
        chunk_hash: row.try_get("chunk_hash")?,
        content: row.try_get("content")?,
        language: row.try_get("language")?,
        source_doc: row.try_get("source_doc")?,
        position: row.try_get::<i64, _>("position")? as u32,
        confidence: row.try_get::<f64, _>("confidence")? as f32,
        score,
    })
}

fn decode_row(row: &SqliteRow) -> SqlRow {
    let mut columns = Vec::with_capacity(row.columns().len());
    let mut values = Vec::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        columns.push(col.name().to_string());
        let value = match row.try_get_raw(i) {
            Ok(raw) if raw.is_null() => SqlValue::Null,
            Ok(raw) => match raw.type_info().name() {
                "INTEGER" => row
                    .try_get::<i64, _>(i)
                    .map(SqlValue::Integer)
                    .unwrap_or(SqlValue::Null),
                "REAL" => row
                    .try_get::<f64, _>(i)
                    .map(SqlValue::Real)
                    .unwrap_or(SqlValue::Null),
                "BLOB" => row
                    .try_get::<Vec<u8>, _>(i)
                    .map(SqlValue::Blob)
                    .unwrap_or(SqlValue::Null),
                _ => row
                    .try_get::<String, _>(i)
                    .map(SqlValue::Text)
                    .unwrap_or(SqlValue::Null),
            },
            Err(_) => SqlValue::Null,
        };
        values.push(value);
    }
    SqlRow { columns, values }
}

fn bind_params<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    params: &'q [SqlValue],
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    let mut query = query;
    for param in params {
        query = match param {
            SqlValue::Text(s) => query.bind(s),
            SqlValue::Integer(i) => query.bind(i),
            SqlValue::Real(r) => query.bind(r),
            SqlValue::Blob(b) => query.bind(b),
            SqlValue::Null => query.bind(Option::<String>::None),
        };
    }
    query
}

/// Build an FTS5 MATCH expression from free text.
///
/// Tokens are double-quoted and OR-joined so user input cannot inject FTS
/// query syntax. Returns None when the text has no indexable tokens.
fn fts_match_expression(text: &str) -> Option<String> {
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

fn push_chunk_filter(qb: &mut QueryBuilder<'_, Sqlite>, alias: &str, filter: &ChunkFilter) {
    if let Some(language) = &filter.language {
        qb.push(format!(" AND {alias}.language = "));
        qb.push_bind(language.clone());
    }
    if let Some(source_doc) = &filter.source_doc {
        qb.push(format!(" AND {alias}.source_doc = "));
        qb.push_bind(source_doc.clone());
    }
    if let Some(min_confidence) = filter.min_confidence {
        qb.push(format!(" AND {alias}.confidence >= "));
        qb.push_bind(f64::from(min_confidence));
    }
}

fn node_label(node: &NodeRef) -> String {
    match node {
        NodeRef::Chunk(hash) => hash.chars().take(12).collect(),
        NodeRef::Intent { name, .. } => name.clone(),
        NodeRef::Phase(name) => name.clone(),
        NodeRef::Session(id) => id.clone(),
        NodeRef::User(id) => id.clone(),
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn execute_read(&self, query: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let pool = self.pool.clone();
        let query = query.to_string();
        let params = params.to_vec();
        self.timed("execute_read", async move {
            let rows = bind_params(sqlx::query(&query), &params)
                .fetch_all(&pool)
                .await?;
            Ok(rows.iter().map(decode_row).collect())
        })
        .await
    }

    async fn execute_write(&self, query: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        let pool = self.pool.clone();
        let query = query.to_string();
        let params = params.to_vec();
        self.timed("execute_write", async move {
            let rows = bind_params(sqlx::query(&query), &params)
                .fetch_all(&pool)
                .await?;
            Ok(rows.iter().map(decode_row).collect())
        })
        .await
    }

    async fn upsert_chunk(&self, chunk: &ContextChunk) -> Result<UpsertOutcome> {
        self.check_dim(&chunk.embedding)?;
        with_retry("upsert_chunk", self.retry, || {
            let pool = self.pool.clone();
            let chunk = chunk.clone();
            let timeout = self.query_timeout;
            async move {
                tokio::time::timeout(timeout, async {
                    let mut tx = pool.begin().await?;
                    let outcome = upsert_chunk_tx(&mut tx, &chunk).await?;
                    tx.commit().await?;
                    Ok(outcome)
                })
                .await
                .map_err(|_| StoreError::Timeout { op: "upsert_chunk" })?
            }
        })
        .await
    }

    async fn upsert_chunk_group(&self, chunks: &[ContextChunk]) -> Result<Vec<UpsertOutcome>> {
        for chunk in chunks {
            self.check_dim(&chunk.embedding)?;
        }
        with_retry("upsert_chunk_group", self.retry, || {
            let pool = self.pool.clone();
            let chunks = chunks.to_vec();
            async move {
                let mut tx = pool.begin().await?;
                let mut outcomes = Vec::with_capacity(chunks.len());
                for chunk in &chunks {
                    outcomes.push(upsert_chunk_tx(&mut tx, chunk).await?);
                }
                tx.commit().await?;
                Ok(outcomes)
            }
        })
        .await
    }

    async fn upsert_intent(&self, intent: &IntentSpec) -> Result<UpsertOutcome> {
        with_retry("upsert_intent", self.retry, || {
            let pool = self.pool.clone();
            let intent = intent.clone();
            async move {
                let existing: Option<(i64,)> =
                    sqlx::query_as("SELECT 1 FROM intents WHERE name = ? AND lang = ?")
                        .bind(&intent.name)
                        .bind(&intent.lang)
                        .fetch_optional(&pool)
                        .await?;

                let now = Utc::now().to_rfc3339();
                sqlx::query(
                    r#"
                    INSERT INTO intents
                        (name, lang, description, confidence, category, frequency,
                         success_rate, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
                    ON CONFLICT(name, lang) DO UPDATE SET
                        frequency = intents.frequency + 1,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&intent.name)
                .bind(&intent.lang)
                .bind(&intent.description)
                .bind(f64::from(intent.confidence))
                .bind(&intent.category)
                .bind(f64::from(intent.success_rate))
                .bind(&now)
                .bind(&now)
                .execute(&pool)
                .await?;

                Ok(if existing.is_some() {
                    UpsertOutcome::Matched
                } else {
                    UpsertOutcome::Created
                })
            }
        })
        .await
    }

    async fn upsert_phase(&self, phase: &Phase) -> Result<UpsertOutcome> {
        with_retry("upsert_phase", self.retry, || {
            let pool = self.pool.clone();
            let phase = phase.clone();
            async move {
                let existing: Option<(i64,)> =
                    sqlx::query_as("SELECT 1 FROM phases WHERE name = ?")
                        .bind(&phase.name)
                        .fetch_optional(&pool)
                        .await?;

                sqlx::query(
                    r#"
                    INSERT INTO phases
                        (name, ord, description, input_schema, output_schema, timeout_seconds)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(name) DO UPDATE SET
                        ord = excluded.ord,
                        description = excluded.description,
                        input_schema = excluded.input_schema,
                        output_schema = excluded.output_schema,
                        timeout_seconds = excluded.timeout_seconds
                    "#,
                )
                .bind(&phase.name)
                .bind(i64::from(phase.order))
                .bind(&phase.description)
                .bind(serde_json::to_string(&phase.input_schema)?)
                .bind(serde_json::to_string(&phase.output_schema)?)
                .bind(i64::from(phase.timeout_seconds))
                .execute(&pool)
                .await?;

                Ok(if existing.is_some() {
                    UpsertOutcome::Matched
                } else {
                    UpsertOutcome::Created
                })
            }
        })
        .await
    }

    async fn link(
        &self,
        src: &NodeRef,
        rel_type: &str,
        dst: &NodeRef,
        props: serde_json::Value,
    ) -> Result<()> {
        let props_json = serde_json::to_string(&props)?;
        with_retry("link", self.retry, || {
            let pool = self.pool.clone();
            let src = src.key();
            let dst = dst.key();
            let rel_type = rel_type.to_string();
            let props_json = props_json.clone();
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO edges (src, rel_type, dst, props_json)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(src, rel_type, dst) DO UPDATE SET
                        props_json = json_patch(edges.props_json, excluded.props_json)
                    "#,
                )
                .bind(&src)
                .bind(&rel_type)
                .bind(&dst)
                .bind(&props_json)
                .execute(&pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn vector_query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>> {
        self.check_dim(embedding)?;
        let pool = self.pool.clone();
        let filter = filter.clone();
        let query_vec = embedding.to_vec();
        let dim = self.embedding_dim;
        self.timed("vector_query", async move {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT chunk_hash, content, language, source_doc, position, confidence, \
                 embedding FROM chunks WHERE 1=1",
            );
            push_chunk_filter(&mut qb, "chunks", &filter);
            let rows = qb.build().fetch_all(&pool).await?;

            let mut scored = Vec::with_capacity(rows.len());
            for row in &rows {
                let blob: Vec<u8> = row.try_get("embedding")?;
                let stored = blob_to_embedding(&blob);
                if stored.len() != dim {
                    warn!(
                        "chunk {} has embedding of dimension {} (expected {}), skipping",
                        row.try_get::<String, _>("chunk_hash").unwrap_or_default(),
                        stored.len(),
                        dim
                    );
                    continue;
                }
                let score = cosine_similarity(&query_vec, &stored);
                scored.push(scored_chunk_from_row(row, score)?);
            }

            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.chunk_hash.cmp(&b.chunk_hash))
            });
            scored.truncate(k);
            Ok(scored)
        })
        .await
    }

    async fn fulltext_query(
        &self,
        text: &str,
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let Some(match_expr) = fts_match_expression(text) else {
            return Ok(Vec::new());
        };
        let pool = self.pool.clone();
        let filter = filter.clone();
        self.timed("fulltext_query", async move {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT c.chunk_hash, c.content, c.language, c.source_doc, c.position, \
                 c.confidence, rank FROM chunks c \
                 JOIN chunks_fts f ON c.rowid = f.rowid \
                 WHERE chunks_fts MATCH ",
            );
            qb.push_bind(match_expr);
            push_chunk_filter(&mut qb, "c", &filter);
            qb.push(" ORDER BY rank, c.chunk_hash LIMIT ");
            qb.push_bind(k as i64);

            let rows = qb.build().fetch_all(&pool).await?;
            let mut hits = Vec::with_capacity(rows.len());
            for row in &rows {
                let rank: f64 = row.try_get("rank")?;
                // BM25 rank is negative; closer to zero is better.
                let score = (1.0 / (1.0 + rank.abs())) as f32;
                hits.push(scored_chunk_from_row(row, score)?);
            }
            Ok(hits)
        })
        .await
    }

    async fn neighbors(
        &self,
        origin: &NodeRef,
        depth: usize,
        rel_types: &[&str],
    ) -> Result<Subgraph> {
        if rel_types.is_empty() || depth == 0 {
            return Ok(Subgraph::default());
        }
        let pool = self.pool.clone();
        let origin_key = origin.key();
        let rel_types: Vec<String> = rel_types.iter().map(|s| s.to_string()).collect();
        self.timed("neighbors", async move {
            let mut subgraph = Subgraph::default();
            let mut visited: HashSet<String> = HashSet::from([origin_key.clone()]);
            let mut seen_edges: HashSet<(String, String, String)> = HashSet::new();
            let mut frontier: Vec<String> = vec![origin_key];

            for level in 1..=depth {
                if frontier.is_empty() {
                    break;
                }

                let mut qb: QueryBuilder<Sqlite> =
                    QueryBuilder::new("SELECT src, rel_type, dst FROM edges WHERE rel_type IN (");
                {
                    let mut sep = qb.separated(", ");
                    for rel in &rel_types {
                        sep.push_bind(rel.clone());
                    }
                }
                qb.push(") AND (src IN (");
                {
                    let mut sep = qb.separated(", ");
                    for key in &frontier {
                        sep.push_bind(key.clone());
                    }
                }
                qb.push(") OR dst IN (");
                {
                    let mut sep = qb.separated(", ");
                    for key in &frontier {
                        sep.push_bind(key.clone());
                    }
                }
                qb.push("))");

                let rows = qb.build().fetch_all(&pool).await?;
                let mut next_frontier: Vec<String> = Vec::new();

                for row in &rows {
                    let src: String = row.try_get("src")?;
                    let rel_type: String = row.try_get("rel_type")?;
                    let dst: String = row.try_get("dst")?;

                    if seen_edges.insert((src.clone(), rel_type.clone(), dst.clone())) {
                        subgraph.edges.push(SubgraphEdge {
                            src: src.clone(),
                            rel_type,
                            dst: dst.clone(),
                        });
                    }

                    for key in [src, dst] {
                        if visited.insert(key.clone()) {
                            let node = NodeRef::parse(&key)?;
                            subgraph.nodes.push(RelatedNode {
                                id: key.clone(),
                                kind: node.kind().to_string(),
                                label: node_label(&node),
                                depth: level,
                            });
                            next_frontier.push(key);
                        }
                    }
                }

                frontier = next_frontier;
            }

            debug!(
                "neighbors expansion: {} nodes, {} edges",
                subgraph.nodes.len(),
                subgraph.edges.len()
            );
            Ok(subgraph)
        })
        .await
    }

    async fn chunk_by_hash(&self, chunk_hash: &str) -> Result<ContextChunk> {
        let pool = self.pool.clone();
        let chunk_hash = chunk_hash.to_string();
        self.timed("chunk_by_hash", async move {
            let row = sqlx::query("SELECT * FROM chunks WHERE chunk_hash = ?")
                .bind(&chunk_hash)
                .fetch_optional(&pool)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("chunk '{chunk_hash}'")))?;
            chunk_from_row(&row)
        })
        .await
    }

    async fn intent_by_name(&self, name: &str, lang: &str) -> Result<Intent> {
        let pool = self.pool.clone();
        let name = name.to_string();
        let lang = lang.to_string();
        self.timed("intent_by_name", async move {
            let row = sqlx::query("SELECT * FROM intents WHERE name = ? AND lang = ?")
                .bind(&name)
                .bind(&lang)
                .fetch_optional(&pool)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("intent '{name}' ({lang})")))?;
            intent_from_row(&row)
        })
        .await
    }

    async fn intent_fulltext(&self, text: &str, k: usize) -> Result<Vec<Intent>> {
        let Some(match_expr) = fts_match_expression(text) else {
            return Ok(Vec::new());
        };
        let pool = self.pool.clone();
        self.timed("intent_fulltext", async move {
            let rows = sqlx::query(
                "SELECT i.* FROM intents i \
                 JOIN intents_fts f ON i.rowid = f.rowid \
                 WHERE intents_fts MATCH ? \
                 ORDER BY rank, i.name, i.lang LIMIT ?",
            )
            .bind(match_expr)
            .bind(k as i64)
            .fetch_all(&pool)
            .await?;
            rows.iter().map(intent_from_row).collect()
        })
        .await
    }

    async fn chunks_detailing(&self, intent: &NodeRef) -> Result<Vec<ContextChunk>> {
        let pool = self.pool.clone();
        let intent_key = intent.key();
        self.timed("chunks_detailing", async move {
            let edge_rows =
                sqlx::query("SELECT src FROM edges WHERE rel_type = 'DETAILS' AND dst = ?")
                    .bind(&intent_key)
                    .fetch_all(&pool)
                    .await?;

            let mut hashes = Vec::new();
            for row in &edge_rows {
                let src: String = row.try_get("src")?;
                if let NodeRef::Chunk(hash) = NodeRef::parse(&src)? {
                    hashes.push(hash);
                }
            }
            if hashes.is_empty() {
                return Ok(Vec::new());
            }

            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT * FROM chunks WHERE chunk_hash IN (");
            {
                let mut sep = qb.separated(", ");
                for hash in &hashes {
                    sep.push_bind(hash.clone());
                }
            }
            qb.push(") ORDER BY chunk_hash");

            let rows = qb.build().fetch_all(&pool).await?;
            rows.iter().map(chunk_from_row).collect()
        })
        .await
    }

    async fn suggest_intents(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let sanitized: String = prefix.chars().filter(|c| c.is_alphanumeric()).collect();
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.pool.clone();
        self.timed("suggest_intents", async move {
            let rows = sqlx::query(
                "SELECT i.name, MAX(i.frequency) AS freq FROM intents i \
                 JOIN intents_fts f ON i.rowid = f.rowid \
                 WHERE intents_fts MATCH ? \
                 GROUP BY i.name \
                 ORDER BY freq DESC, i.name ASC LIMIT ?",
            )
            .bind(format!("\"{sanitized}\"*"))
            .bind(limit as i64)
            .fetch_all(&pool)
            .await?;

            let mut names = Vec::with_capacity(rows.len());
            for row in &rows {
                names.push(row.try_get::<String, _>("name")?);
            }
            Ok(names)
        })
        .await
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let pool = self.pool.clone();
        self.timed("counts", async move {
            let mut counts = StoreCounts::default();
            let tables: [(&str, &mut u64); 4] = [
                ("chunks", &mut counts.chunks),
                ("intents", &mut counts.intents),
                ("phases", &mut counts.phases),
                ("edges", &mut counts.edges),
            ];
            for (table, slot) in tables {
                let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                    .fetch_one(&pool)
                    .await?;
                *slot = count as u64;
            }
            Ok(counts)
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.timed("ping", pool::verify_connection(&self.pool)).await
    }
}

/// Group chunks by hash, used when callers need to dedupe before upsert.
pub fn dedupe_by_hash(chunks: Vec<ContextChunk>) -> Vec<ContextChunk> {
    let mut seen: HashMap<String, ()> = HashMap::new();
    chunks
        .into_iter()
        .filter(|c| seen.insert(c.chunk_hash.clone(), ()).is_none())
        .collect()
}
