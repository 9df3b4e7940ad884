//! Maintenance facade over the two stores: schema bootstrap, reset, health,
//! and counts. Kept thin; nothing here participates in ingestion or search.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::stores::{GraphBackend, VectorBackend};
use crate::types::RagError;

/// Store totals surfaced to dashboards.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub graph_nodes: usize,
    pub graph_relationships: usize,
}

pub struct AdminSurface {
    vectors: Arc<dyn VectorBackend>,
    graph: Arc<dyn GraphBackend>,
}

impl AdminSurface {
    pub fn new(vectors: Arc<dyn VectorBackend>, graph: Arc<dyn GraphBackend>) -> Self {
        Self { vectors, graph }
    }

    /// Creates graph constraints and indexes. Vector-store schema is created
    /// when the store opens.
    pub async fn init_schema(&self) -> Result<(), RagError> {
        self.graph.ensure_schema().await
    }

    /// Truncates the vector store and detach-deletes the entire graph.
    ///
    /// This is the only way stored data is destroyed.
    pub async fn reset_all(&self) -> Result<(), RagError> {
        self.vectors.truncate().await?;
        self.graph.wipe().await?;
        info!("all stores reset");
        Ok(())
    }

    /// Pings both stores; failures are logged and reported as unhealthy
    /// rather than propagated.
    pub async fn health_check(&self) -> bool {
        if let Err(err) = self.vectors.count().await {
            error!(error = %err, "vector store health check failed");
            return false;
        }
        if let Err(err) = self.graph.ping().await {
            error!(error = %err, "graph store health check failed");
            return false;
        }
        true
    }

    /// Row and node/relationship counts.
    pub async fn stats(&self) -> Result<StoreStats, RagError> {
        let chunk_count = self.vectors.count().await?;
        let graph = self.graph.counts().await?;
        Ok(StoreStats {
            chunk_count,
            graph_nodes: graph.nodes,
            graph_relationships: graph.relationships,
        })
    }
}
