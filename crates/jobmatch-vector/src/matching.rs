//! Entity-level matching service.
//!
//! Composes text projection, the embedding provider and the vector store into
//! the operations the rest of the platform calls: index one entity, index a
//! batch, find matches in either direction, delete, and report statistics.
//! Write-path operations never propagate errors; failures are logged and
//! reported as `false`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jobmatch_core::config::MatchConfig;
use jobmatch_core::error::{MatchError, Result};
use jobmatch_core::events::EntityEvent;
use jobmatch_core::types::{
    CandidateProfile, Entity, EntityKind, JobOffer, ScoredId, CANDIDATES_COLLECTION,
    JOB_OFFERS_COLLECTION,
};

use crate::embedding::DynEmbeddingService;
use crate::index::{IndexStats, VectorStore};
use crate::projection::project;

const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Statistics for both collections plus the embedding model in use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingStats {
    pub candidates: IndexStats,
    pub job_offers: IndexStats,
    pub embedding_dimension: usize,
    pub embedding_model: String,
}

/// Matching service over one vector store and one embedding provider.
pub struct MatchingService {
    store: Arc<VectorStore>,
    embedder: Arc<dyn DynEmbeddingService>,
    model_name: String,
    embed_timeout: Duration,
    candidates_collection: String,
    job_offers_collection: String,
}

impl std::fmt::Debug for MatchingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingService")
            .field("index_dir", &self.store.index_dir())
            .field("dimension", &self.store.dimension())
            .field("model_name", &self.model_name)
            .field("candidates_collection", &self.candidates_collection)
            .field("job_offers_collection", &self.job_offers_collection)
            .finish()
    }
}

impl MatchingService {
    /// Create a service with the default collection names.
    ///
    /// Fails if the embedder and the store disagree on the vector dimension.
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn DynEmbeddingService>) -> Result<Self> {
        if embedder.dimensions() != store.dimension() {
            return Err(MatchError::Config(format!(
                "embedding dimension {} does not match store dimension {}",
                embedder.dimensions(),
                store.dimension()
            )));
        }
        Ok(Self {
            store,
            embedder,
            model_name: "unknown".to_string(),
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
            candidates_collection: CANDIDATES_COLLECTION.to_string(),
            job_offers_collection: JOB_OFFERS_COLLECTION.to_string(),
        })
    }

    /// Create a service with collection names, model name and timeout taken
    /// from configuration.
    pub fn from_config(
        config: &MatchConfig,
        store: Arc<VectorStore>,
        embedder: Arc<dyn DynEmbeddingService>,
    ) -> Result<Self> {
        Ok(Self::new(store, embedder)?
            .with_collections(
                &config.index.candidates_collection,
                &config.index.job_offers_collection,
            )
            .with_model_name(&config.embedding.model_name)
            .with_embed_timeout(Duration::from_millis(config.embedding.timeout_ms)))
    }

    pub fn with_collections(mut self, candidates: &str, job_offers: &str) -> Self {
        self.candidates_collection = candidates.to_string();
        self.job_offers_collection = job_offers.to_string();
        self
    }

    pub fn with_model_name(mut self, model_name: &str) -> Self {
        self.model_name = model_name.to_string();
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// The collection entities of `kind` are indexed under.
    pub fn collection_for(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Candidate => &self.candidates_collection,
            EntityKind::JobOffer => &self.job_offers_collection,
        }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Project, embed and upsert one entity.
    ///
    /// Returns `false` (without error) when the projection is blank or when
    /// any step fails; the failure is logged.
    pub async fn index_entity(&self, id: &str, entity: &Entity) -> bool {
        let collection = self.collection_for(entity.kind()).to_string();
        let text = project(entity);
        if text.trim().is_empty() {
            warn!(id, collection = %collection, "Empty projection, skipping indexing");
            return false;
        }

        let result: Result<()> = async {
            let vector = self.embed(&text).await?;
            let ids = vec![id.to_string()];
            let coll = collection.clone();
            self.with_store(move |store| store.upsert(&coll, &ids, &[vector]))
                .await
        }
        .await;

        match result {
            Ok(()) => {
                info!(id, collection = %collection, "Indexed entity");
                true
            }
            Err(e) => {
                log_failure(&e, "Failed to index entity");
                debug!(id, collection = %collection, "Entity left unindexed");
                false
            }
        }
    }

    /// Index many entities with one embedding call and one upsert per
    /// collection.
    ///
    /// Every input ID appears exactly once in the result. Blank projections
    /// fail immediately; an embedding failure fails the whole batch.
    pub async fn batch_index(&self, entities: &[(String, Entity)]) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        let mut batch_ids: Vec<String> = Vec::new();
        let mut batch_kinds: Vec<EntityKind> = Vec::new();
        let mut texts: Vec<String> = Vec::new();

        for (id, entity) in entities {
            let text = project(entity);
            if text.trim().is_empty() {
                warn!(id = %id, "Empty projection, excluded from batch");
                results.insert(id.clone(), false);
                continue;
            }
            batch_ids.push(id.clone());
            batch_kinds.push(entity.kind());
            texts.push(text);
        }

        if texts.is_empty() {
            return results;
        }

        let vectors = match self.embed_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                log_failure(&e, "Batch embedding failed");
                debug!(batch = texts.len(), "Batch left unindexed");
                for id in batch_ids {
                    results.insert(id, false);
                }
                return results;
            }
        };

        // Group by target collection, keeping input order within each group.
        let mut groups: HashMap<String, (Vec<String>, Vec<Vec<f32>>)> = HashMap::new();
        for ((id, kind), vector) in batch_ids.into_iter().zip(batch_kinds).zip(vectors) {
            let group = groups
                .entry(self.collection_for(kind).to_string())
                .or_default();
            group.0.push(id);
            group.1.push(vector);
        }

        for (collection, (ids, vectors)) in groups {
            let coll = collection.clone();
            let upsert_ids = ids.clone();
            let outcome = self
                .with_store(move |store| store.upsert(&coll, &upsert_ids, &vectors))
                .await;
            let ok = match outcome {
                Ok(()) => true,
                Err(e) => {
                    error!(collection = %collection, error = %e, "Batch upsert failed");
                    false
                }
            };
            for id in ids {
                results.insert(id, ok);
            }
        }

        let succeeded = results.values().filter(|ok| **ok).count();
        info!(succeeded, total = results.len(), "Batch indexing finished");
        results
    }

    /// Remove one entity's vector. An ID that was never indexed still
    /// reports `true`; only a store failure reports `false`.
    pub async fn delete_entity(&self, id: &str, collection: &str) -> bool {
        let ids = vec![id.to_string()];
        let coll = collection.to_string();
        match self.with_store(move |store| store.delete(&coll, &ids)).await {
            Ok(removed) => {
                info!(id, collection, removed, "Deleted entity from index");
                true
            }
            Err(e) => {
                error!(id, collection, error = %e, "Failed to delete entity");
                false
            }
        }
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Project and embed `entity`, then search `target_collection`.
    ///
    /// The target is not required to be the opposite kind; searching an
    /// entity against its own collection finds similar entities.
    pub async fn find_matches_for(
        &self,
        entity: &Entity,
        target_collection: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredId>> {
        let text = project(entity);
        if text.trim().is_empty() {
            debug!(collection = target_collection, "Empty projection, no matches");
            return Ok(Vec::new());
        }
        self.search_text(target_collection, &text, top_k).await
    }

    /// Candidates best suited for a job offer. Failures yield an empty list.
    pub async fn find_candidates_for_job(&self, offer: &JobOffer, top_k: usize) -> Vec<ScoredId> {
        let entity = Entity::JobOffer(offer.clone());
        let target = self.candidates_collection.clone();
        self.matches_or_empty(&entity, &target, top_k).await
    }

    /// Job offers best suited for a candidate. Failures yield an empty list.
    pub async fn find_jobs_for_candidate(
        &self,
        candidate: &CandidateProfile,
        top_k: usize,
    ) -> Vec<ScoredId> {
        let entity = Entity::Candidate(candidate.clone());
        let target = self.job_offers_collection.clone();
        self.matches_or_empty(&entity, &target, top_k).await
    }

    async fn matches_or_empty(&self, entity: &Entity, target: &str, top_k: usize) -> Vec<ScoredId> {
        match self.find_matches_for(entity, target, top_k).await {
            Ok(hits) => {
                info!(collection = target, hits = hits.len(), "Found matches");
                hits
            }
            Err(e) => {
                log_failure(&e, "Match search failed");
                debug!(collection = target, "Returning no matches");
                Vec::new()
            }
        }
    }

    /// Embed free text and search one collection.
    pub async fn search_text(&self, collection: &str, text: &str, k: usize) -> Result<Vec<ScoredId>> {
        if text.trim().is_empty() {
            return Err(MatchError::InvalidInput("query text is empty".to_string()));
        }
        let vector = self.embed(text).await?;
        let coll = collection.to_string();
        self.with_store(move |store| store.search(&coll, &vector, k))
            .await
    }

    /// Statistics for both collections and the embedding model.
    pub fn stats(&self) -> Result<MatchingStats> {
        Ok(MatchingStats {
            candidates: self.store.get_stats(&self.candidates_collection)?,
            job_offers: self.store.get_stats(&self.job_offers_collection)?,
            embedding_dimension: self.embedder.dimensions(),
            embedding_model: self.model_name.clone(),
        })
    }

    // =========================================================================
    // Change notifications
    // =========================================================================

    /// Apply one upstream change: re-index on upsert, delete on delete.
    pub async fn handle_event(&self, event: &EntityEvent) -> bool {
        match event {
            EntityEvent::Upserted { id, entity } => self.index_entity(id, entity).await,
            EntityEvent::Deleted { id, kind } => {
                let collection = self.collection_for(*kind).to_string();
                self.delete_entity(id, &collection).await
            }
            _ => {
                warn!(id = event.id(), "Unsupported entity event ignored");
                false
            }
        }
    }

    /// Consume change notifications in the background until the channel closes.
    pub fn spawn_event_listener(
        self: Arc<Self>,
        mut events: broadcast::Receiver<EntityEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Entity event listener started");
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let ok = self.handle_event(&event).await;
                        debug!(id = event.id(), kind = %event.kind(), ok, "Handled entity event");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Entity event listener lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("Entity event listener stopped");
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let millis = self.embed_timeout.as_millis() as u64;
        tokio::time::timeout(self.embed_timeout, self.embedder.embed_boxed(text))
            .await
            .map_err(|_| MatchError::Timeout {
                operation: "embed".to_string(),
                millis,
            })?
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let millis = self.embed_timeout.as_millis() as u64;
        let vectors = tokio::time::timeout(self.embed_timeout, self.embedder.embed_batch_boxed(texts))
            .await
            .map_err(|_| MatchError::Timeout {
                operation: "embed_batch".to_string(),
                millis,
            })??;
        if vectors.len() != texts.len() {
            return Err(MatchError::Embedding(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    /// Run a store operation on the blocking pool; it does file I/O.
    async fn with_store<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&VectorStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| MatchError::Storage(format!("Store task panicked: {}", e)))?
    }
}

/// Collaborator outages degrade the result and log at `warn`; anything else
/// is a local fault and logs at `error`.
fn log_failure(err: &MatchError, message: &str) {
    if err.is_collaborator_failure() {
        warn!(error = %err, "{}", message);
    } else {
        error!(error = %err, "{}", message);
    }
}
