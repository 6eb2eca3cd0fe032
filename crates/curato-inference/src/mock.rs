//! Mock provider backends for deterministic testing.
//!
//! `MockExtractionBackend` replays scripted per-post extractions through
//! both the chunked and bulk paths, with a configurable poll countdown so
//! batch lifecycle transitions can be driven without a provider.
//! `MockEmbeddingBackend` hashes each text into a deterministic vector.
//! All mocks keep call logs for assertion.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use curato_core::{
    BatchState, BatchStatus, BatchSubmission, EmbeddingBackend, Error, Extraction,
    ExtractionBackend, ExtractionInput, GeoPoint, GeocodingBackend, Result,
};

// =============================================================================
// EXTRACTION MOCK
// =============================================================================

#[derive(Debug, Clone)]
struct MockBatch {
    post_ids: Vec<Uuid>,
    polls_remaining: usize,
    cancelled: bool,
}

#[derive(Default)]
struct ExtractionState {
    extractions: HashMap<Uuid, Extraction>,
    batches: HashMap<String, MockBatch>,
    next_batch_seq: usize,
    polls_until_complete: usize,
    fail_chunks: bool,
}

/// Scripted extraction backend.
#[derive(Clone, Default)]
pub struct MockExtractionBackend {
    state: Arc<Mutex<ExtractionState>>,
    chunk_calls: Arc<AtomicUsize>,
    fetch_calls: Arc<AtomicUsize>,
}

impl MockExtractionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the extraction returned for a post.
    pub fn with_extraction(self, post_id: Uuid, extraction: Extraction) -> Self {
        self.script_extraction(post_id, extraction);
        self
    }

    /// Script an extraction after construction.
    pub fn script_extraction(&self, post_id: Uuid, extraction: Extraction) {
        self.state
            .lock()
            .unwrap()
            .extractions
            .insert(post_id, extraction);
    }

    /// Number of polls a batch reports `InProgress` before ending.
    pub fn with_polls_until_complete(self, polls: usize) -> Self {
        self.state.lock().unwrap().polls_until_complete = polls;
        self
    }

    /// Make every chunk request fail.
    pub fn with_failing_chunks(self) -> Self {
        self.state.lock().unwrap().fail_chunks = true;
        self
    }

    /// Number of `extract_chunk` calls made so far.
    pub fn chunk_call_count(&self) -> usize {
        self.chunk_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_batch_results` calls made so far.
    pub fn fetch_call_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn results_for(&self, post_ids: &[Uuid]) -> Vec<(Uuid, Extraction)> {
        let state = self.state.lock().unwrap();
        post_ids
            .iter()
            .filter_map(|id| state.extractions.get(id).map(|e| (*id, e.clone())))
            .collect()
    }
}

#[async_trait]
impl ExtractionBackend for MockExtractionBackend {
    async fn extract_chunk(
        &self,
        posts: &[ExtractionInput],
        _known_categories: &[String],
    ) -> Result<Vec<(Uuid, Extraction)>> {
        self.chunk_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.lock().unwrap().fail_chunks {
            return Err(Error::Extraction("mock chunk failure".into()));
        }
        let ids: Vec<Uuid> = posts.iter().map(|p| p.post_id).collect();
        Ok(self.results_for(&ids))
    }

    async fn submit_batch(
        &self,
        posts: &[ExtractionInput],
        _known_categories: &[String],
    ) -> Result<BatchSubmission> {
        if posts.is_empty() {
            return Err(Error::InvalidInput("cannot submit an empty batch".into()));
        }
        let mut state = self.state.lock().unwrap();
        state.next_batch_seq += 1;
        let batch_id = format!("mock-batch-{}", state.next_batch_seq);
        let polls = state.polls_until_complete;
        state.batches.insert(
            batch_id.clone(),
            MockBatch {
                post_ids: posts.iter().map(|p| p.post_id).collect(),
                polls_remaining: polls,
                cancelled: false,
            },
        );
        Ok(BatchSubmission {
            batch_id,
            request_count: posts.len(),
        })
    }

    async fn poll_batch(&self, batch_id: &str) -> Result<BatchStatus> {
        let mut state = self.state.lock().unwrap();
        let batch = state
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| Error::NotFound(format!("unknown batch {}", batch_id)))?;
        let total = batch.post_ids.len();

        if batch.cancelled {
            return Ok(BatchStatus {
                state: BatchState::Failed,
                completed: 0,
                total,
            });
        }
        if batch.polls_remaining > 0 {
            batch.polls_remaining -= 1;
            return Ok(BatchStatus {
                state: BatchState::InProgress,
                completed: total.saturating_sub(batch.polls_remaining + 1),
                total,
            });
        }
        Ok(BatchStatus {
            state: BatchState::Ended,
            completed: total,
            total,
        })
    }

    async fn fetch_batch_results(&self, batch_id: &str) -> Result<Vec<(Uuid, Extraction)>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let (post_ids, ready) = {
            let state = self.state.lock().unwrap();
            let batch = state
                .batches
                .get(batch_id)
                .ok_or_else(|| Error::NotFound(format!("unknown batch {}", batch_id)))?;
            if batch.cancelled {
                return Err(Error::State(format!("batch {} was cancelled", batch_id)));
            }
            (batch.post_ids.clone(), batch.polls_remaining == 0)
        };
        if !ready {
            return Err(Error::State(format!("batch {} is not terminal", batch_id)));
        }
        Ok(self.results_for(&post_ids))
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let batch = state
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| Error::NotFound(format!("unknown batch {}", batch_id)))?;
        batch.cancelled = true;
        Ok(())
    }
}

// =============================================================================
// EMBEDDING MOCK
// =============================================================================

/// Deterministic embedding backend. The same text always hashes to the
/// same vector, so version and idempotence assertions hold across calls.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    call_log: Arc<Mutex<Vec<String>>>,
    fail: Arc<Mutex<bool>>,
}

impl Default for MockEmbeddingBackend {
    fn default() -> Self {
        Self {
            dimension: 8,
            call_log: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(Mutex::new(false)),
        }
    }
}

impl MockEmbeddingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Make every embedding request fail until cleared.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    /// Every text ever embedded, in call order.
    pub fn embedded_texts(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn embed_call_count(&self) -> usize {
        self.call_log.lock().unwrap().len()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());
        (0..self.dimension).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if *self.fail.lock().unwrap() {
            return Err(Error::Embedding("mock embedding failure".into()));
        }
        let mut log = self.call_log.lock().unwrap();
        log.extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedder"
    }
}

// =============================================================================
// GEOCODING MOCK
// =============================================================================

/// Table-driven geocoder. Unscripted locations resolve to `None`.
#[derive(Clone, Default)]
pub struct MockGeocoder {
    places: Arc<Mutex<HashMap<String, GeoPoint>>>,
    call_log: Arc<Mutex<Vec<String>>>,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(self, location: impl Into<String>, geo: GeoPoint) -> Self {
        self.places.lock().unwrap().insert(location.into(), geo);
        self
    }

    pub fn resolved_locations(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }
}

#[async_trait]
impl GeocodingBackend for MockGeocoder {
    async fn resolve(&self, location: &str) -> Result<Option<GeoPoint>> {
        self.call_log.lock().unwrap().push(location.to_string());
        Ok(self.places.lock().unwrap().get(location).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(id: Uuid) -> ExtractionInput {
        ExtractionInput {
            post_id: id,
            caption: "caption".into(),
        }
    }

    #[tokio::test]
    async fn test_extraction_mock_returns_scripted_results() {
        let id = Uuid::new_v4();
        let extraction = Extraction {
            categories: vec!["Food".into()],
            ..Default::default()
        };
        let mock = MockExtractionBackend::new().with_extraction(id, extraction.clone());

        let results = mock
            .extract_chunk(&[input(id), input(Uuid::new_v4())], &[])
            .await
            .unwrap();
        assert_eq!(results, vec![(id, extraction)]);
        assert_eq!(mock.chunk_call_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_poll_countdown() {
        let id = Uuid::new_v4();
        let mock = MockExtractionBackend::new()
            .with_extraction(id, Extraction::default())
            .with_polls_until_complete(2);

        let submission = mock.submit_batch(&[input(id)], &[]).await.unwrap();
        let b = &submission.batch_id;

        assert_eq!(
            mock.poll_batch(b).await.unwrap().state,
            BatchState::InProgress
        );
        assert!(mock.fetch_batch_results(b).await.is_err());
        assert_eq!(
            mock.poll_batch(b).await.unwrap().state,
            BatchState::InProgress
        );
        assert_eq!(mock.poll_batch(b).await.unwrap().state, BatchState::Ended);

        let results = mock.fetch_batch_results(b).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_batch_fails() {
        let id = Uuid::new_v4();
        let mock = MockExtractionBackend::new();
        let submission = mock.submit_batch(&[input(id)], &[]).await.unwrap();
        mock.cancel_batch(&submission.batch_id).await.unwrap();

        let status = mock.poll_batch(&submission.batch_id).await.unwrap();
        assert_eq!(status.state, BatchState::Failed);
        assert!(mock.fetch_batch_results(&submission.batch_id).await.is_err());
    }

    #[tokio::test]
    async fn test_embedding_mock_is_deterministic() {
        let mock = MockEmbeddingBackend::new().with_dimension(16);
        let a = mock.embed_texts(&["pasta".into()]).await.unwrap();
        let b = mock.embed_texts(&["pasta".into()]).await.unwrap();
        let c = mock.embed_texts(&["sushi".into()]).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a[0].len(), 16);
        assert_eq!(mock.embed_call_count(), 3);
    }

    #[tokio::test]
    async fn test_geocoder_mock_table() {
        let mock = MockGeocoder::new().with_place(
            "Rome",
            GeoPoint {
                lat: 41.9,
                lon: 12.5,
                country: Some("Italy".into()),
                city: Some("Rome".into()),
                neighborhood: None,
            },
        );

        assert!(mock.resolve("Rome").await.unwrap().is_some());
        assert!(mock.resolve("Atlantis").await.unwrap().is_none());
        assert_eq!(mock.resolved_locations(), vec!["Rome", "Atlantis"]);
    }
}
