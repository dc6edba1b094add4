//! Vector store: an index paired with the embedding provider that fills it.

use crate::document::Document;
use crate::embeddings::EmbeddingProvider;
use crate::progress::ProgressReporter;
use crate::vector_index::{cosine_similarity, ScoredEntry, VectorIndex};
use modrag_core::{AppError, AppResult};
use std::sync::Arc;

/// Embeds text on the way in and queries on the way out.
#[derive(Clone)]
pub struct VectorStore {
    index: Arc<dyn VectorIndex>,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("index", &self.index.kind())
            .field("embeddings", &self.embeddings)
            .finish()
    }
}

impl VectorStore {
    pub fn new(index: Arc<dyn VectorIndex>, embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self { index, embeddings }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn embeddings(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embeddings
    }

    /// Embed and store documents in provider-sized batches, then flush.
    /// Returns the number of documents stored.
    pub async fn add_documents(&self, documents: &[Document]) -> AppResult<usize> {
        self.add_documents_with_progress(documents, &ProgressReporter::noop())
            .await
    }

    pub async fn add_documents_with_progress(
        &self,
        documents: &[Document],
        progress: &ProgressReporter,
    ) -> AppResult<usize> {
        let batch_size = self.embeddings.batch_size().max(1);
        let mut stored = 0;

        for batch in documents.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let vectors = self.embeddings.embed_batch(&texts).await?;

            if vectors.len() != batch.len() {
                return Err(AppError::Knowledge(format!(
                    "Embedding count mismatch: sent {}, received {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            for (document, vector) in batch.iter().zip(vectors.iter()) {
                self.index.upsert(document, vector)?;
            }
            stored += batch.len();
            progress.embed(
                stored as u64,
                documents.len() as u64,
                self.embeddings.model_name(),
            );

            tracing::debug!(
                "Stored {}/{} documents with {}",
                stored,
                documents.len(),
                self.embeddings.model_name()
            );
        }

        self.index.flush()?;
        progress.store(stored as u64, self.index.kind().as_str());
        Ok(stored)
    }

    pub async fn similarity_search(&self, query: &str, k: usize) -> AppResult<Vec<Document>> {
        Ok(self
            .similarity_search_with_score(query, k)
            .await?
            .into_iter()
            .map(|(document, _)| document)
            .collect())
    }

    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> AppResult<Vec<(Document, f32)>> {
        Ok(self
            .search_entries(query, k)
            .await?
            .into_iter()
            .map(|e| (e.document, e.score))
            .collect())
    }

    /// Hits whose score is at least `threshold`.
    pub async fn similarity_search_with_threshold(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> AppResult<Vec<(Document, f32)>> {
        Ok(self
            .similarity_search_with_score(query, k)
            .await?
            .into_iter()
            .filter(|(_, score)| *score >= threshold)
            .collect())
    }

    /// Greedy maximal marginal relevance over the top `fetch_k` hits.
    ///
    /// Each step picks the candidate maximising
    /// `lambda * sim(query, d) - (1 - lambda) * max sim(d, selected)`.
    pub async fn max_marginal_relevance_search(
        &self,
        query: &str,
        k: usize,
        fetch_k: usize,
        lambda_mult: f32,
    ) -> AppResult<Vec<(Document, f32)>> {
        let query_vector = self.embeddings.embed(query).await?;
        let candidates = self.index.search(&query_vector, fetch_k.max(k))?;
        Ok(mmr_select(&query_vector, candidates, k, lambda_mult))
    }

    /// Raw index hits including embeddings.
    pub async fn search_entries(&self, query: &str, k: usize) -> AppResult<Vec<ScoredEntry>> {
        let query_vector = self.embeddings.embed(query).await?;
        self.index.search(&query_vector, k)
    }

    pub fn documents(&self) -> AppResult<Vec<Document>> {
        self.index.documents()
    }

    pub fn len(&self) -> AppResult<usize> {
        self.index.count()
    }

    pub fn is_empty(&self) -> AppResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn reset(&self) -> AppResult<()> {
        self.index.reset()?;
        self.index.flush()
    }
}

fn mmr_select(
    query: &[f32],
    mut candidates: Vec<ScoredEntry>,
    k: usize,
    lambda: f32,
) -> Vec<(Document, f32)> {
    let mut selected: Vec<ScoredEntry> = Vec::with_capacity(k.min(candidates.len()));

    while selected.len() < k && !candidates.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (i, candidate) in candidates.iter().enumerate() {
            let relevance = cosine_similarity(query, &candidate.embedding);
            let redundancy = selected
                .iter()
                .map(|s| cosine_similarity(&candidate.embedding, &s.embedding))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };

            let score = lambda * relevance - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_idx = i;
            }
        }

        selected.push(candidates.remove(best_idx));
    }

    selected
        .into_iter()
        .map(|e| (e.document, e.score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::providers::MockProvider;
    use crate::memory_index::MemoryIndex;

    fn store() -> VectorStore {
        VectorStore::new(Arc::new(MemoryIndex::new()), Arc::new(MockProvider::new(256)))
    }

    fn corpus() -> Vec<Document> {
        vec![
            Document::new("BM25 is a sparse keyword ranking function"),
            Document::new("Dense retrieval embeds queries and documents as vectors"),
            Document::new("Dense retrieval embeds queries and documents as vectors too"),
            Document::new("Sourdough bread needs a starter and patience"),
        ]
    }

    #[tokio::test]
    async fn test_add_and_search() {
        let store = store();
        assert_eq!(store.add_documents(&corpus()).await.unwrap(), 4);
        assert_eq!(store.len().unwrap(), 4);

        let hits = store
            .similarity_search_with_score("dense vectors retrieval", 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].0.content.starts_with("Dense retrieval"));
        assert!(hits[0].1 >= hits[1].1);
    }

    #[tokio::test]
    async fn test_threshold_filters() {
        let store = store();
        store.add_documents(&corpus()).await.unwrap();

        let hits = store
            .similarity_search_with_threshold("dense vectors retrieval", 4, 0.99)
            .await
            .unwrap();
        assert!(hits.iter().all(|(_, s)| *s >= 0.99));
        assert!(hits.len() < 4);
    }

    #[tokio::test]
    async fn test_mmr_prefers_diverse_results() {
        let store = store();
        store.add_documents(&corpus()).await.unwrap();

        let plain = store.similarity_search("dense retrieval vectors", 2).await.unwrap();
        assert!(plain.iter().all(|d| d.content.starts_with("Dense")));

        let diverse = store
            .max_marginal_relevance_search("dense retrieval vectors", 2, 4, 0.3)
            .await
            .unwrap();
        assert_eq!(diverse.len(), 2);
        assert!(diverse[0].0.content.starts_with("Dense"));
        assert!(!diverse[1].0.content.starts_with("Dense"));
    }

    #[tokio::test]
    async fn test_reset() {
        let store = store();
        store.add_documents(&corpus()).await.unwrap();
        store.reset().unwrap();
        assert!(store.is_empty().unwrap());
    }
}
