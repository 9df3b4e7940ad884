//! Embedding cache and batcher.
//!
//! [`EmbeddingClient::embed`] is the single entry point for turning text into
//! vectors. It partitions input by cache hit, scrubs the misses, sends them in
//! exactly one batched backend call, and reassembles the output in the
//! caller's order. The backend itself is initialized lazily, once per
//! process, and reused by every subsequent call.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::cache::TextCache;
use crate::config::Settings;
use crate::scrub::PiiScrubber;
use crate::types::RagError;

/// A backend that converts a batch of texts into one vector per text.
///
/// Implementations must be order- and length-preserving.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn dimension(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;
}

enum BackendInit {
    OpenAi {
        base_url: String,
        api_key: Option<String>,
        model: String,
        dimension: usize,
    },
    Preset(Arc<dyn EmbeddingBackend>),
}

/// Caching, batching front door to the embedding backend.
pub struct EmbeddingClient {
    backend: OnceCell<Arc<dyn EmbeddingBackend>>,
    init: BackendInit,
    cache: TextCache<Vec<f32>>,
    scrubber: Arc<PiiScrubber>,
}

impl EmbeddingClient {
    /// Client backed by the configured OpenAI-compatible endpoint.
    pub fn from_settings(settings: &Settings, scrubber: Arc<PiiScrubber>) -> Self {
        Self {
            backend: OnceCell::new(),
            init: BackendInit::OpenAi {
                base_url: settings.provider_base_url.clone(),
                api_key: settings.provider_api_key.clone(),
                model: settings.embed_model.clone(),
                dimension: settings.embedding_dimension,
            },
            cache: TextCache::new(settings.cache_capacity),
            scrubber,
        }
    }

    /// Client over a pre-built backend, used for composition and tests.
    pub fn with_backend(
        backend: Arc<dyn EmbeddingBackend>,
        cache_capacity: usize,
        scrubber: Arc<PiiScrubber>,
    ) -> Self {
        Self {
            backend: OnceCell::new(),
            init: BackendInit::Preset(backend),
            cache: TextCache::new(cache_capacity),
            scrubber,
        }
    }

    async fn backend(&self) -> Result<&Arc<dyn EmbeddingBackend>, RagError> {
        self.backend
            .get_or_try_init(|| async {
                match &self.init {
                    BackendInit::Preset(backend) => Ok(backend.clone()),
                    BackendInit::OpenAi {
                        base_url,
                        api_key,
                        model,
                        dimension,
                    } => {
                        info!(model = %model, "initializing embedding backend");
                        let backend = OpenAiEmbeddingBackend::new(
                            base_url.clone(),
                            api_key.clone(),
                            model.clone(),
                            *dimension,
                        )?;
                        Ok(Arc::new(backend) as Arc<dyn EmbeddingBackend>)
                    }
                }
            })
            .await
    }

    /// Embeds `texts`, returning one vector per input in input order.
    ///
    /// Cached texts are served without touching the backend; all misses go
    /// out in a single batched call. Any backend failure fails the whole call
    /// with no partial results.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut uncached_indices = Vec::new();
        let mut uncached_texts: Vec<String> = Vec::new();

        for (index, text) in texts.iter().enumerate() {
            match self.cache.get(text) {
                Some(vector) => results[index] = Some(vector),
                None => {
                    uncached_indices.push(index);
                    uncached_texts.push(text.clone());
                }
            }
        }

        if uncached_texts.is_empty() {
            debug!(count = texts.len(), "all embeddings served from cache");
            return collect_slots(results);
        }

        // The cache stays keyed by the original text; only the provider sees
        // the scrubbed form.
        let safe_texts: Vec<String> = uncached_texts
            .iter()
            .map(|text| self.scrubber.scrub(text).into_owned())
            .collect();

        let backend = self.backend().await?;
        let vectors = backend.embed_batch(&safe_texts).await?;
        if vectors.len() != uncached_texts.len() {
            return Err(RagError::Provider(format!(
                "backend returned {} vectors for {} inputs",
                vectors.len(),
                uncached_texts.len()
            )));
        }

        for (position, vector) in vectors.into_iter().enumerate() {
            let original_index = uncached_indices[position];
            self.cache
                .insert(texts[original_index].clone(), vector.clone());
            results[original_index] = Some(vector);
        }

        collect_slots(results)
    }

    /// Embeds a single text via the batched path.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let texts = [text.to_string()];
        let mut vectors = self.embed(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Provider("backend returned no vector".to_string()))
    }

    /// Number of cached embeddings, exposed for observability.
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

fn collect_slots(slots: Vec<Option<Vec<f32>>>) -> Result<Vec<Vec<f32>>, RagError> {
    slots
        .into_iter()
        .map(|slot| {
            slot.ok_or_else(|| RagError::Provider("embedding result slot left empty".to_string()))
        })
        .collect()
}

// ── OpenAI-compatible backend ──────────────────────────────────────────

pub struct OpenAiEmbeddingBackend {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddingBackend {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        dimension: usize,
    ) -> Result<Self, RagError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| RagError::Configuration(format!("http client: {err}")))?;
        Ok(Self {
            http,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model,
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbeddingBackend {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            RagError::Configuration("PROVIDER_API_KEY is not set".to_string())
        })?;

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Provider(format!(
                "embeddings request failed ({status}): {body}"
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| RagError::Provider(format!("malformed embedding response: {err}")))?;
        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != texts.len() {
            return Err(RagError::Provider(format!(
                "provider returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

// ── Deterministic mock backend ─────────────────────────────────────────

/// Hash-seeded backend producing stable, normalized vectors without any
/// network dependency. Tracks how many batch calls it has served.
pub struct MockEmbeddingBackend {
    dimension: usize,
    calls: AtomicUsize,
}

impl MockEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of batch calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        use std::hash::{DefaultHasher, Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish() | 1;

        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            // xorshift keeps the sequence deterministic per seed.
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            vector.push(((state % 2000) as f32 / 1000.0) - 1.0);
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_mock(dimension: usize) -> (EmbeddingClient, Arc<MockEmbeddingBackend>) {
        let backend = Arc::new(MockEmbeddingBackend::new(dimension));
        let client = EmbeddingClient::with_backend(
            backend.clone(),
            16,
            Arc::new(PiiScrubber::disabled()),
        );
        (client, backend)
    }

    #[tokio::test]
    async fn embed_preserves_length_and_order() {
        let (client, backend) = client_with_mock(8);
        let texts: Vec<String> = ["alpha", "beta", "gamma"]
            .into_iter()
            .map(str::to_string)
            .collect();

        let vectors = client.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), texts.len());

        // Re-embedding individually must reproduce the batched positions.
        for (text, expected) in texts.iter().zip(&vectors) {
            assert_eq!(&backend.vector_for(text), expected);
        }
    }

    #[tokio::test]
    async fn fully_cached_input_issues_no_backend_call() {
        let (client, backend) = client_with_mock(8);
        let texts: Vec<String> = ["one", "two"].into_iter().map(str::to_string).collect();

        client.embed(&texts).await.unwrap();
        assert_eq!(backend.calls(), 1);

        let again = client.embed(&texts).await.unwrap();
        assert_eq!(backend.calls(), 1, "cache hits must not reach the backend");
        assert_eq!(again.len(), 2);
    }

    #[tokio::test]
    async fn partial_cache_sends_single_batch_for_misses() {
        let (client, backend) = client_with_mock(8);
        client.embed(&["one".to_string()]).await.unwrap();

        let texts: Vec<String> = ["one", "two", "three"]
            .into_iter()
            .map(str::to_string)
            .collect();
        let vectors = client.embed(&texts).await.unwrap();

        assert_eq!(backend.calls(), 2, "one batch for the two misses");
        assert_eq!(vectors[0], backend.vector_for("one"));
        assert_eq!(vectors[2], backend.vector_for("three"));
    }

    #[tokio::test]
    async fn cached_vector_is_returned_unchanged() {
        let (client, _) = client_with_mock(8);
        let first = client.embed_one("stable").await.unwrap();
        let second = client.embed_one("stable").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn mock_vectors_are_normalized() {
        let backend = MockEmbeddingBackend::new(32);
        let vector = backend.vector_for("check");
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
