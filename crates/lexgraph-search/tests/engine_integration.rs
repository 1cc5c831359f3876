//! End-to-end scenarios against an in-memory store and the deterministic
//! test model.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{harness, harness_with, SlowFulltextStore, TestModel, DIM};
use lexgraph_config::{LexConfig, SearchConfig};
use lexgraph_search::ingest::{CancelToken, IngestRequest};
use lexgraph_search::search::{SearchRequest, Strategy};
use lexgraph_search::{Engine, SearchError};
use lexgraph_store::{rel, GraphStore, NodeRef};

fn ingest_request(document: &str, source: &str, language: Option<&str>) -> IngestRequest {
    IngestRequest {
        document: document.to_string(),
        source_doc: source.to_string(),
        language: language.map(String::from),
        intents: vec![],
    }
}

#[tokio::test]
async fn ingest_then_vector_search_ukrainian() {
    let h = harness().await;
    h.pipeline
        .ingest(ingest_request(
            "Україна розвиває штучний інтелект.",
            "doc1",
            Some("uk"),
        ))
        .await
        .unwrap();

    let response = h
        .orchestrator
        .search(
            SearchRequest::new("штучний інтелект")
                .with_strategy(Strategy::Vector)
                .with_language("uk")
                .with_k(5),
        )
        .await
        .unwrap();

    assert_eq!(response.total_results, 1);
    assert_eq!(response.results[0].source_doc, "doc1");
    assert_eq!(response.results[0].language, "uk");
    assert!(
        response.results[0].score >= 0.6,
        "score {} below 0.6",
        response.results[0].score
    );
    assert_eq!(response.strategy_used, "vector");
    assert!(!response.partial);
}

#[tokio::test]
async fn hybrid_ranks_matching_chunk_first() {
    let h = harness().await;
    h.pipeline
        .ingest(ingest_request(
            "Python is a programming language.",
            "doc-py",
            Some("en"),
        ))
        .await
        .unwrap();
    h.pipeline
        .ingest(ingest_request(
            "Javelin is a sports equipment.",
            "doc-jav",
            Some("en"),
        ))
        .await
        .unwrap();

    let response = h
        .orchestrator
        .search(SearchRequest::new("programming").with_k(2))
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].source_doc, "doc-py");
    assert!(response.results.len() <= 2);
    // Fulltext matched the top hit, so it carries highlights
    assert_eq!(
        response.results[0].highlights.as_deref(),
        Some(&["programming".to_string()][..])
    );
}

#[tokio::test]
async fn reingest_is_idempotent() {
    let h = harness().await;
    let first = h
        .pipeline
        .ingest(ingest_request("Hello world", "doc1", Some("en")))
        .await
        .unwrap();
    assert_eq!(first.chunks_ingested, 1);
    assert_eq!(first.chunks_skipped, 0);

    let second = h
        .pipeline
        .ingest(ingest_request("Hello world", "doc1", Some("en")))
        .await
        .unwrap();
    assert_eq!(second.chunks_ingested, 0);
    assert_eq!(second.chunks_skipped, 1);

    assert_eq!(h.store.counts().await.unwrap().chunks, 1);
}

#[tokio::test]
async fn stored_embeddings_have_configured_dimension() {
    let h = harness().await;
    h.pipeline
        .ingest(ingest_request(
            "First sentence here. Second sentence follows. Third one closes.",
            "doc1",
            Some("en"),
        ))
        .await
        .unwrap();

    let response = h
        .orchestrator
        .search(SearchRequest::new("sentence").with_strategy(Strategy::Vector))
        .await
        .unwrap();
    assert!(!response.results.is_empty());

    for result in &response.results {
        let chunk = h.store.chunk_by_hash(&result.chunk_id).await.unwrap();
        assert_eq!(chunk.embedding.len(), DIM);
        let norm: f32 = chunk.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }
}

#[tokio::test]
async fn hybrid_is_deterministic() {
    let h = harness().await;
    for (i, text) in [
        "Rust is a systems programming language.",
        "Python is a programming language for scripting.",
        "Go is a programming language from Google.",
        "Chess is a board game.",
    ]
    .iter()
    .enumerate()
    {
        h.pipeline
            .ingest(ingest_request(text, &format!("doc{i}"), Some("en")))
            .await
            .unwrap();
    }

    let run = || async {
        let response = h
            .orchestrator
            .search(SearchRequest::new("programming language").with_k(4))
            .await
            .unwrap();
        response
            .results
            .iter()
            .map(|r| r.chunk_id.clone())
            .collect::<Vec<_>>()
    };

    let first = run().await;
    assert!(!first.is_empty());
    for _ in 0..5 {
        assert_eq!(run().await, first);
    }
}

#[tokio::test]
async fn top_k_cutoff_holds() {
    let h = harness().await;
    for i in 0..8 {
        h.pipeline
            .ingest(ingest_request(
                &format!("Shared topic sentence number {i}."),
                &format!("doc{i}"),
                Some("en"),
            ))
            .await
            .unwrap();
    }

    for strategy in [Strategy::Vector, Strategy::Fulltext, Strategy::Hybrid] {
        let response = h
            .orchestrator
            .search(
                SearchRequest::new("shared topic sentence")
                    .with_strategy(strategy)
                    .with_k(3),
            )
            .await
            .unwrap();
        assert!(
            response.results.len() <= 3,
            "{strategy} returned {}",
            response.results.len()
        );
    }
}

#[tokio::test]
async fn slow_fulltext_branch_yields_partial_vector_results() {
    let search_config = SearchConfig {
        query_timeout_ms: 250,
        ..Default::default()
    };
    let h = harness_with(
        search_config,
        Some(Box::new(|inner| {
            Arc::new(SlowFulltextStore {
                inner,
                fulltext_delay: Duration::from_millis(2_000),
            }) as Arc<dyn GraphStore>
        })),
    )
    .await;

    h.pipeline
        .ingest(ingest_request(
            "Python is a programming language.",
            "doc1",
            Some("en"),
        ))
        .await
        .unwrap();

    let response = h
        .orchestrator
        .search(SearchRequest::new("programming").with_k(5))
        .await
        .unwrap();

    assert!(response.partial);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].source_doc, "doc1");
    // The surviving branch is vector-only, so no highlights
    assert!(response.results[0].highlights.is_none());
}

#[tokio::test]
async fn suggestions_order_by_frequency_then_name() {
    let h = harness().await;
    let seed = [("python_help", 5), ("python_tutorial", 3), ("javelin_throw", 1)];
    for (name, frequency) in seed {
        for i in 0..frequency {
            h.pipeline
                .ingest(IngestRequest {
                    document: format!("Document {i} about {name}."),
                    source_doc: format!("doc-{name}-{i}"),
                    language: Some("en".into()),
                    intents: vec![name.to_string()],
                })
                .await
                .unwrap();
        }
    }

    let suggestions = h.orchestrator.suggest("py").await.unwrap();
    assert_eq!(suggestions, vec!["python_help", "python_tutorial"]);

    // Prefix shorter than 2 characters is invalid
    assert!(matches!(
        h.orchestrator.suggest("p").await.unwrap_err(),
        SearchError::InvalidInput(_)
    ));
}

#[tokio::test]
async fn expansion_attaches_related_nodes_two_hops_out() {
    let h = harness().await;
    h.pipeline
        .ingest(IngestRequest {
            document: "Practical guide to training neural networks.".into(),
            source_doc: "doc1".into(),
            language: Some("en".into()),
            intents: vec!["training".into()],
        })
        .await
        .unwrap();

    // training -LEADS_TO-> deployment
    let i1 = NodeRef::Intent {
        name: "training".into(),
        lang: "en".into(),
    };
    let i2 = NodeRef::Intent {
        name: "deployment".into(),
        lang: "en".into(),
    };
    h.store
        .link(&i1, rel::LEADS_TO, &i2, json!({"weight": 1.0}))
        .await
        .unwrap();

    let response = h
        .orchestrator
        .search(
            SearchRequest::new("neural networks")
                .with_strategy(Strategy::Vector)
                .with_expansion(2),
        )
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    let related = response.related_nodes.expect("expansion requested");
    let ids: Vec<&str> = related.nodes.iter().map(|n| n.id.as_str()).collect();
    assert!(ids.contains(&i1.key().as_str()), "missing direct intent");
    assert!(ids.contains(&i2.key().as_str()), "missing second hop");

    // Expansion must not change ordering: rerun without it
    let plain = h
        .orchestrator
        .search(
            SearchRequest::new("neural networks")
                .with_strategy(Strategy::Vector),
        )
        .await
        .unwrap();
    let with_ids: Vec<&str> = response.results.iter().map(|r| r.chunk_id.as_str()).collect();
    let plain_ids: Vec<&str> = plain.results.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(with_ids, plain_ids);
}

#[tokio::test]
async fn invalid_inputs_are_rejected() {
    let h = harness().await;

    let err = h
        .orchestrator
        .search(SearchRequest::new("query").with_k(0))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::InvalidInput(_)));

    let err = h
        .orchestrator
        .search(SearchRequest::new(""))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::InvalidInput(_)));

    let err = h
        .orchestrator
        .search(SearchRequest::new("query").with_k(101))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::InvalidInput(_)));
}

#[tokio::test]
async fn intent_strategy_ranks_anchored_chunks() {
    let h = harness().await;
    h.pipeline
        .ingest(IngestRequest {
            document: "Fixing broken python imports step by step.".into(),
            source_doc: "doc-py".into(),
            language: Some("en".into()),
            intents: vec!["python".into()],
        })
        .await
        .unwrap();
    h.pipeline
        .ingest(IngestRequest {
            document: "Growing tomatoes in a greenhouse.".into(),
            source_doc: "doc-garden".into(),
            language: Some("en".into()),
            intents: vec!["gardening".into()],
        })
        .await
        .unwrap();

    let response = h
        .orchestrator
        .search(
            SearchRequest::new("python imports")
                .with_strategy(Strategy::Intent)
                .with_k(5),
        )
        .await
        .unwrap();

    assert_eq!(response.total_results, 1);
    assert_eq!(response.results[0].source_doc, "doc-py");
    assert_eq!(response.strategy_used, "intent");
}

#[tokio::test]
async fn intent_frequency_increments_per_ingest_call() {
    let h = harness().await;
    for i in 0..3 {
        h.pipeline
            .ingest(IngestRequest {
                document: format!("Note number {i} about the same topic."),
                source_doc: format!("doc{i}"),
                language: Some("en".into()),
                intents: vec!["notes".into()],
            })
            .await
            .unwrap();
    }

    let intent = h.store.intent_by_name("notes", "en").await.unwrap();
    assert_eq!(intent.frequency, 3);
    assert_eq!(h.store.counts().await.unwrap().intents, 1);
}

#[tokio::test]
async fn cancelled_ingest_reports_remaining_chunks() {
    let h = harness().await;
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = h
        .pipeline
        .ingest_with_cancel(
            ingest_request("One sentence. Another sentence.", "doc1", Some("en")),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(report.chunks_ingested, 0);
    assert!(report.failures.iter().all(|f| f.reason == "cancelled"));
    assert_eq!(h.store.counts().await.unwrap().chunks, 0);
}

#[tokio::test]
async fn language_detection_fills_missing_hint() {
    let h = harness().await;
    h.pipeline
        .ingest(ingest_request(
            "Україна розвиває штучний інтелект та машинне навчання.",
            "doc-uk",
            None,
        ))
        .await
        .unwrap();

    let response = h
        .orchestrator
        .search(
            SearchRequest::new("штучний інтелект")
                .with_strategy(Strategy::Vector)
                .with_language("uk"),
        )
        .await
        .unwrap();
    assert_eq!(response.total_results, 1);
    assert_eq!(response.results[0].language, "uk");
}

#[tokio::test]
async fn engine_composition_end_to_end() {
    let mut config = LexConfig::default();
    config.store.store_uri = "sqlite::memory:".to_string();
    config.model.embedding_dim = DIM;

    let engine = Engine::with_model(config, Arc::new(TestModel)).await.unwrap();
    engine.start().await.unwrap();
    // start() is idempotent
    engine.start().await.unwrap();

    let report = engine
        .ingest(IngestRequest {
            document: "Hello world of search engines.".into(),
            source_doc: "doc1".into(),
            language: Some("en".into()),
            intents: vec!["greeting".into()],
        })
        .await
        .unwrap();
    assert_eq!(report.chunks_ingested, 1);

    let schema = engine.verify_schema().await.unwrap();
    assert!(schema.is_healthy());

    let health = engine.health().await;
    assert!(health.healthy, "{health}");

    let response = engine
        .search(SearchRequest::new("search engines").with_k(5))
        .await
        .unwrap();
    assert_eq!(response.total_results, 1);

    let suggestions = engine.suggest("gr").await.unwrap();
    assert_eq!(suggestions, vec!["greeting"]);

    let snapshot = engine.metrics();
    assert!(snapshot.counters.get("search.requests").copied().unwrap_or(0) >= 1);
    assert!(snapshot.counters.get("ingest.requests").copied().unwrap_or(0) >= 1);
    assert!(snapshot.last_schema_verification.is_some());

    let counts = engine.counts().await.unwrap();
    assert_eq!(counts.chunks, 1);
    assert_eq!(counts.intents, 1);
}

#[tokio::test]
async fn embedder_similarity_orders_related_texts() {
    let h = harness().await;
    let query = h.embedder.embed("programming language").await.unwrap();
    let candidates = vec![
        h.embedder.embed("a programming language").await.unwrap(),
        h.embedder.embed("sports equipment").await.unwrap(),
    ];

    let ranked = h.embedder.most_similar(&query, &candidates, 2);
    assert_eq!(ranked[0].0, 0);
    assert!(ranked[0].1 > ranked[1].1);
    assert!(h.metrics.counter("embed.requests") >= 3);

    let norm: f32 = query.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((0.999..=1.001).contains(&norm));
}

#[tokio::test]
async fn failure_counters_track_error_kinds() {
    let mut config = LexConfig::default();
    config.store.store_uri = "sqlite::memory:".to_string();
    config.model.embedding_dim = DIM;

    let engine = Engine::with_model(config, Arc::new(TestModel)).await.unwrap();
    engine.start().await.unwrap();

    let _ = engine.search(SearchRequest::new("")).await;
    let snapshot = engine.metrics();
    assert_eq!(
        snapshot.counters.get("failures.invalid_input").copied(),
        Some(1)
    );
}
