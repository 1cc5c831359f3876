//! Ingestion pipeline: normalize → chunk → detect → hash → embed →
//! upsert → link.
//!
//! Failures isolate per chunk: a failing chunk is reported and the
//! pipeline continues with the rest. Writes are grouped into transactions;
//! a failed group is retried once and then isolated row by row.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use lexgraph_config::IngestConfig;
use lexgraph_store::{rel, ContextChunk, GraphStore, IntentSpec, NodeRef, UpsertOutcome};

use crate::embeddings::EmbeddingService;
use crate::error::{Result, SearchError};
use crate::metrics::MetricsRegistry;

use super::chunker::TextChunker;
use super::language::{resolve_language, LanguageDetector};
use super::normalize::{chunk_fingerprint, normalize_text};

/// Cooperative cancellation flag. Ingestion checks it between chunk
/// groups; an in-flight transaction always completes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One document to ingest.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub document: String,
    pub source_doc: String,
    /// Language hint; detection runs per chunk when absent
    pub language: Option<String>,
    /// Intent names to anchor the chunks to via DETAILS edges
    pub intents: Vec<String>,
}

/// Why one chunk did not make it into the store.
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub position: u32,
    pub reason: String,
}

/// Per-document ingestion outcome.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub chunks_ingested: usize,
    pub chunks_skipped: usize,
    pub failures: Vec<ChunkFailure>,
}

struct PendingChunk {
    position: u32,
    chunk: ContextChunk,
}

/// Turns documents into stored, embedded, linked chunks.
#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn GraphStore>,
    embedder: EmbeddingService,
    detector: Option<Arc<dyn LanguageDetector>>,
    chunker: TextChunker,
    config: IngestConfig,
    metrics: Arc<MetricsRegistry>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: EmbeddingService,
        detector: Option<Arc<dyn LanguageDetector>>,
        config: IngestConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let chunker = TextChunker::new(&config);
        Self {
            store,
            embedder,
            detector,
            chunker,
            config,
            metrics,
        }
    }

    /// Ingest a document without external cancellation.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport> {
        self.ingest_with_cancel(request, &CancelToken::new()).await
    }

    /// Ingest a document; `cancel` takes effect between chunk groups.
    pub async fn ingest_with_cancel(
        &self,
        request: IngestRequest,
        cancel: &CancelToken,
    ) -> Result<IngestReport> {
        let started = Instant::now();
        self.metrics.incr("ingest.requests");

        if request.source_doc.trim().is_empty() {
            return Err(SearchError::InvalidInput("source_doc must not be empty".into()));
        }
        let normalized = normalize_text(&request.document);
        if normalized.is_empty() {
            return Err(SearchError::InvalidInput("document must not be empty".into()));
        }

        let hint = request.language.as_deref();
        let detector = self.detector.as_deref();
        let texts = self.chunker.chunk(&normalized);
        debug!(
            "ingesting '{}': {} chunks from {} chars",
            request.source_doc,
            texts.len(),
            normalized.chars().count()
        );

        let mut report = IngestReport::default();
        if texts.is_empty() {
            return Ok(report);
        }

        // Embed all chunks up front, in model-sized sub-batches
        let embeddings = match self.embedder.embed_batch(texts.clone(), false).await {
            Ok(embeddings) => embeddings,
            Err(err) => {
                // The whole batch failed; report every chunk
                for position in 0..texts.len() {
                    report.failures.push(ChunkFailure {
                        position: position as u32,
                        reason: err.to_string(),
                    });
                }
                self.metrics
                    .incr_by("ingest.failures", report.failures.len() as u64);
                return Ok(report);
            }
        };

        let mut pending: Vec<PendingChunk> = Vec::with_capacity(texts.len());
        for (position, (content, embedding)) in texts.into_iter().zip(embeddings).enumerate() {
            let position = position as u32;
            if embedding.iter().all(|&x| x == 0.0) {
                report.failures.push(ChunkFailure {
                    position,
                    reason: "chunk embedding unavailable".into(),
                });
                continue;
            }
            let language = resolve_language(hint, detector, &content);
            let chunk_hash = chunk_fingerprint(&language, &content);
            let now = Utc::now();
            pending.push(PendingChunk {
                position,
                chunk: ContextChunk {
                    chunk_hash,
                    content,
                    language,
                    source_doc: request.source_doc.clone(),
                    position,
                    confidence: 1.0,
                    embedding,
                    metadata: json!({}),
                    created_at: now,
                    updated_at: now,
                },
            });
        }

        // Anchor intents first so DETAILS edges have both endpoints.
        // Each ingest call bumps the frequency of every referenced intent.
        let intent_lang = resolve_language(hint, detector, &normalized);
        let mut intent_refs: Vec<NodeRef> = Vec::with_capacity(request.intents.len());
        for name in &request.intents {
            let spec = IntentSpec::named(name.clone(), intent_lang.clone());
            self.store.upsert_intent(&spec).await?;
            intent_refs.push(NodeRef::Intent {
                name: name.clone(),
                lang: intent_lang.clone(),
            });
        }

        // Grouped transactional upserts
        let mut stored: Vec<&PendingChunk> = Vec::with_capacity(pending.len());
        for group in pending.chunks(self.config.tx_group_size.max(1)) {
            if cancel.is_cancelled() {
                for item in group {
                    report.failures.push(ChunkFailure {
                        position: item.position,
                        reason: "cancelled".into(),
                    });
                }
                continue;
            }
            let chunks: Vec<ContextChunk> = group.iter().map(|p| p.chunk.clone()).collect();

            let outcomes = match self.store.upsert_chunk_group(&chunks).await {
                Ok(outcomes) => Some(outcomes),
                Err(first) => {
                    warn!("chunk group failed, retrying once: {first}");
                    match self.store.upsert_chunk_group(&chunks).await {
                        Ok(outcomes) => Some(outcomes),
                        Err(second) => {
                            warn!("chunk group failed twice, isolating: {second}");
                            None
                        }
                    }
                }
            };

            match outcomes {
                Some(outcomes) => {
                    for (item, outcome) in group.iter().zip(outcomes) {
                        match outcome {
                            UpsertOutcome::Created => report.chunks_ingested += 1,
                            UpsertOutcome::Matched => report.chunks_skipped += 1,
                        }
                        stored.push(item);
                    }
                }
                None => {
                    // Failing group: isolate chunks one by one
                    for item in group {
                        match self.store.upsert_chunk(&item.chunk).await {
                            Ok(UpsertOutcome::Created) => {
                                report.chunks_ingested += 1;
                                stored.push(item);
                            }
                            Ok(UpsertOutcome::Matched) => {
                                report.chunks_skipped += 1;
                                stored.push(item);
                            }
                            Err(err) => report.failures.push(ChunkFailure {
                                position: item.position,
                                reason: err.to_string(),
                            }),
                        }
                    }
                }
            }
        }

        // Link stored chunks to their intent anchors
        for item in &stored {
            let chunk_ref = item.chunk.node_ref();
            for intent_ref in &intent_refs {
                if let Err(err) = self
                    .store
                    .link(&chunk_ref, rel::DETAILS, intent_ref, json!({}))
                    .await
                {
                    warn!(
                        "failed to link chunk {} to {:?}: {err}",
                        item.chunk.chunk_hash, intent_ref
                    );
                    self.metrics.incr("ingest.link_failures");
                }
            }
        }

        self.metrics
            .incr_by("ingest.chunks_ingested", report.chunks_ingested as u64);
        self.metrics
            .incr_by("ingest.chunks_skipped", report.chunks_skipped as u64);
        self.metrics
            .incr_by("ingest.failures", report.failures.len() as u64);
        self.metrics.observe("ingest", started.elapsed());

        info!(
            "ingest '{}' done: {} ingested, {} skipped, {} failed in {:?}",
            request.source_doc,
            report.chunks_ingested,
            report.chunks_skipped,
            report.failures.len(),
            started.elapsed()
        );
        Ok(report)
    }
}
