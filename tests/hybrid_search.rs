//! Hybrid search tests over store fakes and a mocked provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{InMemoryVectorStore, RecordingGraphStore, fact};
use httpmock::prelude::*;
use ragweave::{
    EmbeddingClient, HybridSearchEngine, MockEmbeddingBackend, PiiScrubber, ProviderClient,
    RetryPolicy, Settings, VectorBackend, VectorRecord,
};
use serde_json::json;

const DIM: usize = 8;

fn test_settings(base_url: &str) -> Settings {
    Settings {
        provider_base_url: base_url.to_string(),
        provider_api_key: Some("test-key".to_string()),
        embedding_dimension: DIM,
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        ..Settings::default()
    }
}

struct Harness {
    engine: HybridSearchEngine,
    embeddings: Arc<EmbeddingClient>,
    vectors: Arc<InMemoryVectorStore>,
}

fn build_engine(
    server: &MockServer,
    vectors: Arc<InMemoryVectorStore>,
    graph: Arc<RecordingGraphStore>,
) -> Harness {
    let settings = test_settings(&server.base_url());
    let scrubber = Arc::new(PiiScrubber::disabled());
    let provider = Arc::new(ProviderClient::new(&settings, scrubber.clone()).unwrap());
    let embeddings = Arc::new(EmbeddingClient::with_backend(
        Arc::new(MockEmbeddingBackend::new(DIM)),
        100,
        scrubber,
    ));
    let engine = HybridSearchEngine::new(
        &settings,
        provider,
        embeddings.clone(),
        vectors.clone(),
        graph,
    );
    Harness {
        engine,
        embeddings,
        vectors,
    }
}

async fn mock_entities<'a>(server: &'a MockServer, entities: &str) -> httpmock::Mock<'a> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_contains("Extract the most important specific entities");
            then.status(200)
                .json_body(json!({"choices": [{"message": {"content": entities}}]}));
        })
        .await
}

async fn mock_answer<'a>(server: &'a MockServer, answer: &str) -> httpmock::Mock<'a> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_contains("User Query:");
            then.status(200)
                .json_body(json!({"choices": [{"message": {"content": answer}}]}));
        })
        .await
}

#[tokio::test]
async fn hybrid_search_combines_vector_and_graph_context() {
    let server = MockServer::start_async().await;
    mock_entities(&server, "Aspirin, Ibuprofen").await;
    let answer_mock = mock_answer(&server, "Aspirin treats headaches.").await;

    let graph = Arc::new(
        RecordingGraphStore::new()
            .with_neighborhood("Aspirin", vec![fact("Aspirin", "TREATS", "Headache")])
            .with_neighborhood(
                "Ibuprofen",
                vec![
                    fact("Aspirin", "TREATS", "Headache"),
                    fact("Ibuprofen", "SOOTHES", "Pain"),
                ],
            ),
    );
    let vectors = Arc::new(InMemoryVectorStore::new());
    let harness = build_engine(&server, vectors, graph);

    // Seed two chunks; the one embedded from the query text itself ranks first.
    let query = "what treats headaches?";
    let near = harness.embeddings.embed_one(query).await.unwrap();
    let far = harness.embeddings.embed_one("unrelated content").await.unwrap();
    harness
        .vectors
        .insert_batch(vec![
            VectorRecord::new("aspirin is commonly used for headaches", json!({}))
                .with_embedding(near),
            VectorRecord::new("sqlite is a database", json!({})).with_embedding(far),
        ])
        .await
        .unwrap();

    let response = harness.engine.search(query, 2).await.unwrap();

    assert_eq!(response.answer, "Aspirin treats headaches.");
    assert_eq!(response.vector_count, 2);
    assert_eq!(
        response.graph_count, 2,
        "cross-entity duplicate facts collapse to one occurrence"
    );
    assert_eq!(response.entities, vec!["Aspirin", "Ibuprofen"]);
    assert_eq!(answer_mock.hits_async().await, 1);
}

#[tokio::test]
async fn vector_failure_degrades_to_graph_only_answer() {
    let server = MockServer::start_async().await;
    mock_entities(&server, "Aspirin").await;
    mock_answer(&server, "Answer from graph context only.").await;

    let graph = Arc::new(
        RecordingGraphStore::new()
            .with_neighborhood("Aspirin", vec![fact("Aspirin", "TREATS", "Headache")]),
    );
    let vectors = Arc::new(InMemoryVectorStore::new());
    *vectors.fail_search.lock() = true;
    let harness = build_engine(&server, vectors, graph);

    let response = harness.engine.search("aspirin?", 3).await.unwrap();

    assert_eq!(response.vector_count, 0);
    assert_eq!(response.graph_count, 1);
    assert_eq!(response.answer, "Answer from graph context only.");
}

#[tokio::test]
async fn per_entity_graph_failure_spares_other_entities() {
    let server = MockServer::start_async().await;
    mock_entities(&server, "Aspirin, Ibuprofen").await;
    mock_answer(&server, "partial graph answer").await;

    let graph = Arc::new(
        RecordingGraphStore::new()
            .with_neighborhood("Aspirin", vec![fact("Aspirin", "TREATS", "Headache")])
            .failing_for("Ibuprofen"),
    );
    let vectors = Arc::new(InMemoryVectorStore::new());
    let harness = build_engine(&server, vectors, graph);

    let response = harness.engine.search("meds?", 3).await.unwrap();

    assert_eq!(response.graph_count, 1, "surviving entity still contributes");
    assert_eq!(response.entities.len(), 2);
}

#[tokio::test]
async fn entity_extraction_is_cached_per_query_text() {
    let server = MockServer::start_async().await;
    let entity_mock = mock_entities(&server, "Aspirin").await;
    mock_answer(&server, "answer").await;

    let graph = Arc::new(RecordingGraphStore::new());
    let vectors = Arc::new(InMemoryVectorStore::new());
    let harness = build_engine(&server, vectors, graph);

    harness.engine.search("same question", 3).await.unwrap();
    harness.engine.search("same question", 3).await.unwrap();

    assert_eq!(
        entity_mock.hits_async().await,
        1,
        "second search must be served from the entity cache"
    );
}

#[tokio::test]
async fn entity_extraction_failure_propagates_after_retries() {
    let server = MockServer::start_async().await;
    let entity_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_contains("Extract the most important specific entities");
            then.status(500).body("reasoner unavailable");
        })
        .await;

    let graph = Arc::new(RecordingGraphStore::new());
    let vectors = Arc::new(InMemoryVectorStore::new());
    let harness = build_engine(&server, vectors, graph);

    let result = harness.engine.search("doomed query", 3).await;

    assert!(result.is_err(), "entity extraction is load-bearing");
    assert_eq!(
        entity_mock.hits_async().await,
        2,
        "bounded backoff retries before propagating"
    );
}
