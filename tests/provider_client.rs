//! Provider HTTP behavior: chat completions and the embeddings backend,
//! exercised against a mock server.

use std::sync::Arc;

use httpmock::prelude::*;
use ragweave::provider::embeddings::{EmbeddingBackend, OpenAiEmbeddingBackend};
use ragweave::{
    CompletionOptions, EmbeddingClient, PiiScrubber, ProviderClient, RagError, Settings,
};
use serde_json::json;

fn settings_for(server: &MockServer) -> Settings {
    Settings {
        provider_base_url: server.base_url(),
        provider_api_key: Some("test-key".to_string()),
        ..Settings::default()
    }
}

fn client(server: &MockServer, scrubber: PiiScrubber) -> ProviderClient {
    ProviderClient::new(&settings_for(server), Arc::new(scrubber)).unwrap()
}

#[tokio::test]
async fn completion_returns_message_content() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer test-key")
                .body_contains("\"stream\":false");
            then.status(200).json_body(json!({
                "choices": [{"message": {"content": "hello back"}}]
            }));
        })
        .await;

    let client = client(&server, PiiScrubber::disabled());
    let answer = client
        .complete("hello", &CompletionOptions::default())
        .await
        .unwrap();

    assert_eq!(answer, "hello back");
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn system_prompt_leads_the_message_list() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions").body_contains(
                "\"messages\":[{\"role\":\"system\",\"content\":\"be brief\"},{\"role\":\"user\"",
            );
            then.status(200)
                .json_body(json!({"choices": [{"message": {"content": "ok"}}]}));
        })
        .await;

    let client = client(&server, PiiScrubber::disabled());
    client
        .complete("question", &CompletionOptions::with_system_prompt("be brief"))
        .await
        .unwrap();

    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn null_content_yields_empty_string_not_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .json_body(json!({"choices": [{"message": {"content": null}}]}));
        })
        .await;

    let client = client(&server, PiiScrubber::disabled());
    let answer = client
        .complete("anything", &CompletionOptions::default())
        .await
        .unwrap();

    assert_eq!(answer, "");
}

#[tokio::test]
async fn provider_error_status_becomes_completion_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(503).body("overloaded");
        })
        .await;

    let client = client(&server, PiiScrubber::disabled());
    let result = client.complete("hi", &CompletionOptions::default()).await;

    assert!(matches!(result, Err(RagError::Completion(_))));
}

#[tokio::test]
async fn missing_api_key_is_a_configuration_error() {
    let server = MockServer::start_async().await;
    let mut settings = settings_for(&server);
    settings.provider_api_key = None;
    let client = ProviderClient::new(&settings, Arc::new(PiiScrubber::disabled())).unwrap();

    let result = client.complete("hi", &CompletionOptions::default()).await;
    assert!(matches!(result, Err(RagError::Configuration(_))));
}

#[tokio::test]
async fn prompt_is_scrubbed_before_leaving_the_process() {
    let server = MockServer::start_async().await;
    let scrubbed = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_contains("<EMAIL_ADDRESS>");
            then.status(200)
                .json_body(json!({"choices": [{"message": {"content": "done"}}]}));
        })
        .await;

    let client = client(&server, PiiScrubber::new());
    client
        .complete(
            "please email alice@example.com about the report",
            &CompletionOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(scrubbed.hits_async().await, 1);
}

#[tokio::test]
async fn embeddings_backend_reorders_by_provider_index() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            }));
        })
        .await;

    let backend = OpenAiEmbeddingBackend::new(
        server.base_url(),
        Some("test-key".to_string()),
        "embed-model".to_string(),
        2,
    )
    .unwrap();

    let vectors = backend
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors[0], vec![1.0, 0.0]);
    assert_eq!(vectors[1], vec![0.0, 1.0]);
}

#[tokio::test]
async fn embedding_cache_is_keyed_by_original_text() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            // The provider only ever sees the scrubbed form.
            when.method(POST)
                .path("/embeddings")
                .body_contains("<EMAIL_ADDRESS>");
            then.status(200).json_body(json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0]}]
            }));
        })
        .await;

    let settings = Settings {
        embedding_dimension: 2,
        ..settings_for(&server)
    };
    let client = EmbeddingClient::from_settings(&settings, Arc::new(PiiScrubber::new()));

    let original = "reach me at bob@example.com";
    let first = client.embed_one(original).await.unwrap();
    let second = client.embed_one(original).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        mock.hits_async().await,
        1,
        "second call must hit the cache under the pre-scrub key"
    );
}

#[tokio::test]
async fn embedding_provider_failure_fails_the_whole_call() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(500).body("boom");
        })
        .await;

    let settings = Settings {
        embedding_dimension: 2,
        ..settings_for(&server)
    };
    let client = EmbeddingClient::from_settings(&settings, Arc::new(PiiScrubber::disabled()));

    let result = client
        .embed(&["a".to_string(), "b".to_string()])
        .await;
    assert!(matches!(result, Err(RagError::Provider(_))));
}
