//! Search orchestration: strategy dispatch, hybrid fan-out with deadlines,
//! intent expansion, graph expansion, and suggestions.
//!
//! The orchestrator owns no persistent state, only per-query buffers. For
//! identical inputs against identical store and model state, responses are
//! deterministic including ordering.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use lexgraph_config::SearchConfig;
use lexgraph_store::{rel, ChunkFilter, GraphStore, NodeRef, ScoredChunk, Subgraph};

use crate::embeddings::EmbeddingService;
use crate::error::{Result, SearchError};
use crate::metrics::MetricsRegistry;

use super::fusion::{fuse, FusedHit};
use super::request::{SearchRequest, SearchResponse, SearchResult, Strategy};

/// Maximum suggestions returned for a prefix.
const MAX_SUGGESTIONS: usize = 10;

/// Top-level query API of the engine.
#[derive(Clone)]
pub struct SearchOrchestrator {
    store: Arc<dyn GraphStore>,
    embedder: EmbeddingService,
    config: SearchConfig,
    metrics: Arc<MetricsRegistry>,
}

impl SearchOrchestrator {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: EmbeddingService,
        config: SearchConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            metrics,
        }
    }

    /// Execute a search request.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        request.validate(self.config.graph_depth_max)?;

        let started = Instant::now();
        self.metrics.incr("search.requests");
        self.metrics
            .incr(&format!("search.strategy.{}", request.strategy));

        let deadline = Duration::from_millis(self.config.query_timeout_ms);
        let filter = ChunkFilter {
            language: request.language.clone(),
            source_doc: request.filters.source_doc.clone(),
            min_confidence: request.filters.min_confidence,
        };

        let outcome = match request.strategy {
            Strategy::Vector => {
                let hits = self
                    .with_deadline(deadline, self.vector_branch(&request.query, request.k, &filter))
                    .await?;
                (self.plain_results(hits, None), false)
            }
            Strategy::Fulltext => {
                let hits = self
                    .with_deadline(deadline, async {
                        Ok(self
                            .store
                            .fulltext_query(&request.query, request.k, &filter)
                            .await?)
                    })
                    .await?;
                (self.plain_results(hits, Some(&request.query)), false)
            }
            Strategy::Hybrid => {
                let (fused, partial) = self.hybrid(&request, &filter, deadline).await?;
                (self.fused_results(fused, &request.query), partial)
            }
            Strategy::Intent => {
                let hits = self
                    .with_deadline(deadline, self.intent_branch(&request.query, request.k))
                    .await?;
                (self.plain_results(hits, None), false)
            }
        };
        let (results, partial) = outcome;

        let related_nodes = if request.expand_graph && !results.is_empty() {
            let remaining = deadline.saturating_sub(started.elapsed());
            Some(
                self.with_deadline(remaining, self.expand(&results, request.graph_depth))
                    .await?,
            )
        } else {
            None
        };

        let elapsed = started.elapsed();
        self.metrics.observe("search", elapsed);
        if partial {
            self.metrics.incr("search.partial");
        }
        info!(
            "search '{}' ({}) -> {} results in {:?}{}",
            request.query,
            request.strategy,
            results.len(),
            elapsed,
            if partial { " [partial]" } else { "" }
        );

        Ok(SearchResponse {
            total_results: results.len(),
            results,
            search_time_ms: elapsed.as_millis() as u64,
            strategy_used: request.strategy.to_string(),
            partial,
            related_nodes,
        })
    }

    /// Intent-name suggestions for a prefix of length >= 2.
    pub async fn suggest(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim();
        if prefix.chars().count() < 2 {
            return Err(SearchError::InvalidInput(
                "suggestion prefix must be at least 2 characters".into(),
            ));
        }
        self.metrics.incr("search.suggestions");
        Ok(self.store.suggest_intents(prefix, MAX_SUGGESTIONS).await?)
    }

    /// Vector branch: embed the query, then query the vector index.
    async fn vector_branch(
        &self,
        query: &str,
        k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let embedding = self.embedder.embed(query).await?;
        Ok(self.store.vector_query(&embedding, k, filter).await?)
    }

    /// Hybrid fan-out: vector and fulltext run concurrently with a shared
    /// deadline and twice the requested depth, then fuse. When exactly one
    /// branch beats the clock, its results are returned with
    /// `partial = true`; when neither does, the request times out.
    async fn hybrid(
        &self,
        request: &SearchRequest,
        filter: &ChunkFilter,
        deadline: Duration,
    ) -> Result<(Vec<FusedHit>, bool)> {
        let pool_k = request.k * 2;

        let vector_fut = tokio::time::timeout(
            deadline,
            self.vector_branch(&request.query, pool_k, filter),
        );
        let fulltext_fut = tokio::time::timeout(
            deadline,
            self.store.fulltext_query(&request.query, pool_k, filter),
        );

        let (vector_out, fulltext_out) = tokio::join!(vector_fut, fulltext_fut);

        match (vector_out, fulltext_out) {
            (Ok(vector), Ok(fulltext)) => {
                let vector = vector?;
                let fulltext = fulltext.map_err(SearchError::from)?;
                debug!(
                    "hybrid branches: {} vector, {} fulltext",
                    vector.len(),
                    fulltext.len()
                );
                Ok((fuse(vector, fulltext, self.config.rrf_k, request.k), false))
            }
            (Ok(vector), Err(_)) => {
                warn!("fulltext branch missed the deadline, returning partial results");
                let vector = vector?;
                Ok((fuse(vector, Vec::new(), self.config.rrf_k, request.k), true))
            }
            (Err(_), Ok(fulltext)) => {
                warn!("vector branch missed the deadline, returning partial results");
                let fulltext = fulltext.map_err(SearchError::from)?;
                Ok((
                    fuse(Vec::new(), fulltext, self.config.rrf_k, request.k),
                    true,
                ))
            }
            (Err(_), Err(_)) => Err(SearchError::Timeout { op: "search" }),
        }
    }

    /// Intent branch: resolve the query to intents by name, gather the
    /// chunks that detail them, and rank by intent confidence times vector
    /// similarity.
    async fn intent_branch(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let query_embedding = self.embedder.embed(query).await?;
        let intents = self.store.intent_fulltext(query, k).await?;
        debug!("intent branch resolved {} intents", intents.len());

        let mut best: HashMap<String, ScoredChunk> = HashMap::new();
        for intent in &intents {
            let chunks = self.store.chunks_detailing(&intent.node_ref()).await?;
            for chunk in chunks {
                let similarity = self.embedder.similarity(&query_embedding, &chunk.embedding);
                let score = intent.confidence * similarity;
                let entry = ScoredChunk {
                    chunk_hash: chunk.chunk_hash.clone(),
                    content: chunk.content,
                    language: chunk.language,
                    source_doc: chunk.source_doc,
                    position: chunk.position,
                    confidence: chunk.confidence,
                    score,
                };
                match best.get(&entry.chunk_hash) {
                    Some(existing) if existing.score >= score => {}
                    _ => {
                        best.insert(entry.chunk_hash.clone(), entry);
                    }
                }
            }
        }

        let mut hits: Vec<ScoredChunk> = best.into_values().collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_hash.cmp(&b.chunk_hash))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Fetch neighbors for each hit and merge into one subgraph. Expansion
    /// never re-ranks the hit list.
    async fn expand(&self, results: &[SearchResult], depth: usize) -> Result<Subgraph> {
        let mut merged = Subgraph::default();
        let mut seen_nodes: HashSet<String> = HashSet::new();
        let mut seen_edges: HashSet<(String, String, String)> = HashSet::new();

        for result in results {
            let origin = NodeRef::Chunk(result.chunk_id.clone());
            let subgraph = self
                .store
                .neighbors(&origin, depth, &[rel::DETAILS, rel::LEADS_TO])
                .await?;
            for node in subgraph.nodes {
                if seen_nodes.insert(node.id.clone()) {
                    merged.nodes.push(node);
                }
            }
            for edge in subgraph.edges {
                let key = (edge.src.clone(), edge.rel_type.clone(), edge.dst.clone());
                if seen_edges.insert(key) {
                    merged.edges.push(edge);
                }
            }
        }
        Ok(merged)
    }

    fn plain_results(
        &self,
        hits: Vec<ScoredChunk>,
        highlight_query: Option<&str>,
    ) -> Vec<SearchResult> {
        hits.into_iter()
            .map(|hit| {
                let highlights = highlight_query.and_then(|q| highlights_for(q, &hit.content));
                SearchResult {
                    chunk_id: hit.chunk_hash,
                    content: hit.content,
                    language: hit.language,
                    source_doc: hit.source_doc,
                    position: hit.position,
                    score: hit.score,
                    highlights,
                }
            })
            .collect()
    }

    fn fused_results(&self, hits: Vec<FusedHit>, query: &str) -> Vec<SearchResult> {
        hits.into_iter()
            .map(|hit| {
                // Highlights only make sense where fulltext matched
                let highlights = if hit.fulltext_score.is_some() {
                    highlights_for(query, &hit.chunk.content)
                } else {
                    None
                };
                SearchResult {
                    chunk_id: hit.chunk.chunk_hash,
                    content: hit.chunk.content,
                    language: hit.chunk.language,
                    source_doc: hit.chunk.source_doc,
                    position: hit.chunk.position,
                    score: hit.fused_score,
                    highlights,
                }
            })
            .collect()
    }

    async fn with_deadline<T>(
        &self,
        deadline: Duration,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| SearchError::Timeout { op: "search" })?
    }
}

/// Query terms present in the content, lowercased, deduplicated, in query
/// order.
fn highlights_for(query: &str, content: &str) -> Option<Vec<String>> {
    let content_lower = content.to_lowercase();
    let mut seen = HashSet::new();
    let matched: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .filter(|t| content_lower.contains(t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect();
    if matched.is_empty() {
        None
    } else {
        Some(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highlights_match_case_insensitively() {
        let highlights = highlights_for("Programming language", "Python is a programming tool");
        assert_eq!(highlights, Some(vec!["programming".to_string()]));
    }

    #[test]
    fn test_highlights_dedupe_and_skip_short_tokens() {
        let highlights = highlights_for("a go go round", "go round and round");
        assert_eq!(
            highlights,
            Some(vec!["go".to_string(), "round".to_string()])
        );
    }

    #[test]
    fn test_highlights_none_when_nothing_matches() {
        assert!(highlights_for("quantum", "classical text").is_none());
    }
}
