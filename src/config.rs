//! Environment-driven configuration.
//!
//! [`Settings::from_env`] loads a `.env` file when present and falls back to
//! documented defaults for everything except credentials, which stay `None`
//! until provided and surface as configuration errors at first use.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::stores::graph::{GraphSearchConfig, SecondHopPolicy};

/// Runtime settings shared by the ingestion and retrieval components.
#[derive(Clone, Debug)]
pub struct Settings {
    /// OpenAI-compatible provider endpoint.
    pub provider_base_url: String,
    pub provider_api_key: Option<String>,
    pub chat_model: String,
    pub reasoner_model: String,
    pub embed_model: String,
    /// Dimension of stored embedding vectors.
    pub embedding_dimension: usize,
    /// SQLite database file backing the vector and query-embedding stores.
    pub vector_db_path: PathBuf,
    pub graph_uri: String,
    pub graph_user: String,
    pub graph_password: Option<String>,
    /// Number of chunks embedded and persisted per ingestion batch.
    pub batch_size_embeddings: usize,
    pub vector_top_k: usize,
    /// Capacity of the embedding and entity LRU caches.
    pub cache_capacity: usize,
    /// File extensions (without dot) accepted by the ingestion pipeline.
    pub allowed_extensions: Vec<String>,
    pub scrub_pii: bool,
    pub retry: RetryPolicy,
    /// Optional second-hop graph traversal policy, `Label:REL_A|REL_B` form.
    pub second_hop: Option<SecondHopPolicy>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider_base_url: "https://api.deepseek.com".to_string(),
            provider_api_key: None,
            chat_model: "deepseek-chat".to_string(),
            reasoner_model: "deepseek-reasoner".to_string(),
            embed_model: "sentence-transformers/all-mpnet-base-v2".to_string(),
            embedding_dimension: 768,
            vector_db_path: PathBuf::from("ragweave.sqlite"),
            graph_uri: "bolt://127.0.0.1:7687".to_string(),
            graph_user: "neo4j".to_string(),
            graph_password: None,
            batch_size_embeddings: 10,
            vector_top_k: 5,
            cache_capacity: crate::cache::DEFAULT_CACHE_CAPACITY,
            allowed_extensions: ["pdf", "docx", "xlsx", "csv", "txt", "sql", "md", "json", "xml"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            scrub_pii: true,
            retry: RetryPolicy::default(),
            second_hop: None,
        }
    }
}

impl Settings {
    /// Builds settings from the process environment, loading `.env` first.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Settings::default();

        Self {
            provider_base_url: env_or("PROVIDER_BASE_URL", defaults.provider_base_url),
            provider_api_key: env_opt("PROVIDER_API_KEY"),
            chat_model: env_or("MODEL_CHAT", defaults.chat_model),
            reasoner_model: env_or("MODEL_REASONER", defaults.reasoner_model),
            embed_model: env_or("MODEL_EMBED", defaults.embed_model),
            embedding_dimension: env_parsed("EMBEDDING_DIMENSION", defaults.embedding_dimension),
            vector_db_path: env_opt("VECTOR_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.vector_db_path),
            graph_uri: env_or("NEO4J_URI", defaults.graph_uri),
            graph_user: env_or("NEO4J_USER", defaults.graph_user),
            graph_password: env_opt("NEO4J_PWD"),
            batch_size_embeddings: env_parsed(
                "BATCH_SIZE_EMBEDDINGS",
                defaults.batch_size_embeddings,
            )
            .max(1),
            vector_top_k: env_parsed("VECTOR_TOP_K", defaults.vector_top_k),
            cache_capacity: env_parsed("CACHE_CAPACITY", defaults.cache_capacity),
            allowed_extensions: env_opt("ALLOWED_FILE_EXTENSIONS")
                .map(|raw| {
                    raw.split(',')
                        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                        .filter(|ext| !ext.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.allowed_extensions),
            scrub_pii: env_parsed("SCRUB_PII", defaults.scrub_pii),
            retry: RetryPolicy {
                max_attempts: env_parsed("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts),
                base_delay: Duration::from_millis(env_parsed(
                    "RETRY_BASE_DELAY_MS",
                    defaults.retry.base_delay.as_millis() as u64,
                )),
                max_delay: Duration::from_millis(env_parsed(
                    "RETRY_MAX_DELAY_MS",
                    defaults.retry.max_delay.as_millis() as u64,
                )),
            },
            second_hop: env_opt("GRAPH_SECOND_HOP").and_then(|raw| SecondHopPolicy::parse(&raw)),
        }
    }

    /// Graph traversal tuning derived from these settings.
    pub fn graph_search_config(&self) -> GraphSearchConfig {
        GraphSearchConfig {
            second_hop: self.second_hop.clone(),
            ..GraphSearchConfig::default()
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_or(key: &str, default: String) -> String {
    env_opt(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.batch_size_embeddings, 10);
        assert_eq!(settings.embedding_dimension, 768);
        assert_eq!(settings.vector_top_k, 5);
        assert!(settings.second_hop.is_none());
        assert!(settings.allowed_extensions.contains(&"txt".to_string()));
    }
}
