//! Salient-entity extraction for graph traversal anchoring.
//!
//! Uses the reasoning model (better at disambiguation than the chat model)
//! and caches results by exact query text, since the same question tends to
//! be asked repeatedly.

use std::sync::Arc;

use tracing::debug;

use crate::cache::TextCache;
use crate::provider::ProviderClient;
use crate::retry::{self, RetryPolicy};
use crate::types::RagError;

/// Hard cap on entities fed into graph traversal.
const MAX_ENTITIES: usize = 8;

pub struct EntityExtractor {
    provider: Arc<ProviderClient>,
    cache: TextCache<Vec<String>>,
    retry: RetryPolicy,
}

impl EntityExtractor {
    pub fn new(provider: Arc<ProviderClient>, cache_capacity: usize, retry: RetryPolicy) -> Self {
        Self {
            provider,
            cache: TextCache::new(cache_capacity),
            retry,
        }
    }

    /// Extracts up to [`MAX_ENTITIES`] salient entities from a query.
    ///
    /// Load-bearing for hybrid search: failures are retried with bounded
    /// backoff and then propagated.
    pub async fn extract(&self, query: &str) -> Result<Vec<String>, RagError> {
        if let Some(cached) = self.cache.get(query) {
            debug!(query, "entity cache hit");
            return Ok(cached);
        }

        let prompt = format!(
            "Extract the most important specific entities from the following query.\n\
             Look for:\n\
             - Named people or organizations\n\
             - Identifiers or codes (e.g., P20, V72, D1)\n\
             - Domain-specific terms, products, or concepts\n\n\
             Return ONLY a comma-separated list of names or IDs. No extra text.\n\
             Query: {query}"
        );

        let response = retry::with_backoff(self.retry, "entity extraction", || {
            let provider = self.provider.clone();
            let prompt = prompt.clone();
            async move { provider.reason(&prompt).await }
        })
        .await?;

        let entities = parse_entity_list(&response);
        self.cache.insert(query.to_string(), entities.clone());
        debug!(query, count = entities.len(), "cached extracted entities");
        Ok(entities)
    }

    /// Number of cached queries, exposed for observability.
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

/// Parses the model's comma-separated entity list.
///
/// Models sometimes prefix the list ("Entities: A, B"); when a colon is
/// present the trailing segment is taken. Single-character fragments are
/// noise and dropped.
pub fn parse_entity_list(raw: &str) -> Vec<String> {
    let mut cleaned = raw.trim();
    if cleaned.contains(':') {
        if let Some((_, tail)) = cleaned.rsplit_once(':') {
            cleaned = tail;
        }
    }
    cleaned
        .split(',')
        .map(str::trim)
        .filter(|entity| entity.len() > 1)
        .map(str::to_string)
        .take(MAX_ENTITIES)
        .collect()
}
