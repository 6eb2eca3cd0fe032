//! Extraction driver.
//!
//! Wraps the provider backend with the pipeline's policies: posts without
//! captions are skipped up front, a failed chunk is absorbed rather than
//! aborting the pass, and bulk batch results are materialized exactly once
//! behind a cache and an in-flight guard.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use curato_core::{
    defaults, BatchState, BatchStatus, BatchSubmission, Error, Extraction, ExtractionBackend,
    ExtractionInput, Post, Result,
};

use crate::registry::JobRegistry;

/// Extraction driver over a provider backend.
pub struct Extractor {
    backend: Arc<dyn ExtractionBackend>,
    registry: Arc<JobRegistry>,
    chunk_size: usize,
}

impl Extractor {
    pub fn new(backend: Arc<dyn ExtractionBackend>, registry: Arc<JobRegistry>) -> Self {
        Self {
            backend,
            registry,
            chunk_size: defaults::EXTRACTION_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Turn posts into extraction inputs, dropping the captionless ones.
    /// Returns the inputs and the number skipped.
    pub fn inputs_from(posts: &[Post]) -> (Vec<ExtractionInput>, usize) {
        let mut inputs = Vec::new();
        let mut skipped = 0;
        for post in posts {
            match post.caption.as_deref().map(str::trim) {
                Some(caption) if !caption.is_empty() => inputs.push(ExtractionInput {
                    post_id: post.id,
                    caption: caption.to_string(),
                }),
                _ => skipped += 1,
            }
        }
        (inputs, skipped)
    }

    /// Extract a whole input set chunk by chunk.
    ///
    /// Posts from a failed chunk are simply absent from the map; callers
    /// treat a missing id as "not extracted this run". The progress
    /// callback fires after each chunk with cumulative counts.
    pub async fn extract_batch(
        &self,
        inputs: &[ExtractionInput],
        known_categories: &[String],
        mut on_progress: impl FnMut(usize, usize) + Send,
    ) -> HashMap<Uuid, Extraction> {
        let total = inputs.len();
        let mut results = HashMap::new();
        let mut completed = 0;

        for chunk in inputs.chunks(self.chunk_size) {
            if let Some(chunk_results) = self.extract_chunk_absorbing(chunk, known_categories).await
            {
                results.extend(chunk_results);
            }
            completed += chunk.len();
            on_progress(completed, total);
        }
        results
    }

    /// Extract one chunk, absorbing provider failure.
    ///
    /// `None` means the whole chunk failed and was logged; the caller moves
    /// on to the next chunk.
    pub async fn extract_chunk_absorbing(
        &self,
        chunk: &[ExtractionInput],
        known_categories: &[String],
    ) -> Option<Vec<(Uuid, Extraction)>> {
        match self.backend.extract_chunk(chunk, known_categories).await {
            Ok(results) => Some(results),
            Err(e) => {
                warn!(
                    chunk_size = chunk.len(),
                    error = %e,
                    "Extraction chunk failed, continuing with next chunk"
                );
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Bulk batch path
    // -------------------------------------------------------------------------

    /// Submit all inputs as one provider-side bulk job.
    pub async fn submit_bulk(
        &self,
        inputs: &[ExtractionInput],
        known_categories: &[String],
    ) -> Result<BatchSubmission> {
        let submission = self.backend.submit_batch(inputs, known_categories).await?;
        info!(
            batch_id = %submission.batch_id,
            input_count = submission.request_count,
            "Bulk extraction submitted"
        );
        Ok(submission)
    }

    /// Non-destructive status poll; never touches results.
    pub async fn poll(&self, batch_id: &str) -> Result<BatchStatus> {
        if self.registry.is_materializing(batch_id) {
            return Ok(BatchStatus {
                state: BatchState::ResultsProcessing,
                completed: 0,
                total: 0,
            });
        }
        if let Some(cached) = self.registry.cached_results(batch_id) {
            return Ok(BatchStatus {
                state: BatchState::Done,
                completed: cached.len(),
                total: cached.len(),
            });
        }
        self.backend.poll_batch(batch_id).await
    }

    /// Fetch a finished batch's results, at most once per batch.
    ///
    /// Repeat calls return the cached results without another provider
    /// round trip. A call that arrives while another caller is fetching is
    /// refused rather than duplicated.
    pub async fn materialize(&self, batch_id: &str) -> Result<Vec<(Uuid, Extraction)>> {
        if let Some(cached) = self.registry.cached_results(batch_id) {
            return Ok(cached);
        }

        let status = self.backend.poll_batch(batch_id).await?;
        match status.state {
            BatchState::Ended => {}
            BatchState::Failed => {
                return Err(Error::Job(format!("batch {} failed upstream", batch_id)));
            }
            other => {
                return Err(Error::Job(format!(
                    "batch {} is not finished (state: {})",
                    batch_id, other
                )));
            }
        }

        if !self.registry.try_begin_materialize(batch_id) {
            return Err(Error::Job(format!(
                "batch {} results are already being processed",
                batch_id
            )));
        }

        let fetched = self.backend.fetch_batch_results(batch_id).await;
        self.registry.end_materialize(batch_id);

        let results = fetched?;
        self.registry.store_results(batch_id, results.clone());
        info!(batch_id, result_count = results.len(), "Materialized batch results");
        Ok(results)
    }

    /// Cancel an in-flight bulk job.
    pub async fn cancel(&self, batch_id: &str) -> Result<()> {
        self.backend.cancel_batch(batch_id).await
    }
}
