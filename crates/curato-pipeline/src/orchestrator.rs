//! Pipeline orchestration.
//!
//! `Pipeline` wires the stores, providers, and engines together and runs
//! the end-to-end passes: extraction (sync chunked or bulk batch),
//! embedding reconciliation, and taxonomy cleanup. Every pass claims its
//! run gate first, publishes progress through it, and releases it on exit.
//! Starting a pass whose gate is held is not an error; the caller gets the
//! in-flight run's snapshot instead.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use curato_core::{
    BatchStatus, BatchSubmission, CategoryGraph, EmbeddingBackend, Extraction, ExtractionBackend,
    GeocodingBackend, PostRepository, Result,
};

use crate::cleanup::{CleanupEngine, CleanupPlan, CleanupReport};
use crate::extractor::Extractor;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::registry::{JobRegistry, OperationKind, Progress, RunGuard, RunSnapshot, StartOutcome};
use crate::resolver::Resolver;

/// What came of a start request for a gated operation.
#[derive(Debug)]
pub enum RunOutcome<T> {
    /// The gate was free; the operation ran to completion.
    Completed(T),
    /// A run of the same kind was in flight; here is its live snapshot.
    AlreadyRunning(RunSnapshot),
}

impl<T> RunOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            RunOutcome::Completed(value) => Some(value),
            RunOutcome::AlreadyRunning(_) => None,
        }
    }

    pub fn is_already_running(&self) -> bool {
        matches!(self, RunOutcome::AlreadyRunning(_))
    }
}

/// Counters for one extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Posts considered for extraction.
    pub processed: usize,
    /// Posts whose metadata was written back.
    pub applied: usize,
    /// Posts skipped for having no caption.
    pub skipped: usize,
    /// Posts submitted but lost to provider failures.
    pub failed: usize,
}

/// Fully wired pipeline.
pub struct Pipeline {
    repo: Arc<dyn PostRepository>,
    extractor: Extractor,
    resolver: Resolver,
    reconciler: Reconciler,
    cleanup: CleanupEngine,
    geocoder: Option<Arc<dyn GeocodingBackend>>,
    registry: Arc<JobRegistry>,
}

impl Pipeline {
    pub fn new(
        repo: Arc<dyn PostRepository>,
        graph: Arc<dyn CategoryGraph>,
        extraction: Arc<dyn ExtractionBackend>,
        embedding: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        let registry = JobRegistry::new();
        Self {
            repo: repo.clone(),
            extractor: Extractor::new(extraction, registry.clone()),
            resolver: Resolver::new(graph.clone()),
            reconciler: Reconciler::new(repo, graph.clone(), embedding),
            cleanup: CleanupEngine::new(graph),
            geocoder: None,
            registry,
        }
    }

    /// Attach a geocoding backend. Without one, locations stay unresolved.
    pub fn with_geocoder(mut self, geocoder: Arc<dyn GeocodingBackend>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_cleanup_min_posts(mut self, min_posts: usize) -> Self {
        self.cleanup = self.cleanup.with_min_posts(min_posts);
        self
    }

    /// Whether cleanup moves archived categories' posts to a surviving
    /// relative. On by default.
    pub fn with_cleanup_reassign_orphans(mut self, reassign_orphans: bool) -> Self {
        self.cleanup = self.cleanup.with_reassign_orphans(reassign_orphans);
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Latest run snapshot for an operation kind.
    pub fn status(&self, kind: OperationKind) -> RunSnapshot {
        self.registry.status(kind)
    }

    fn claim(&self, kind: OperationKind) -> std::result::Result<RunGuard, RunSnapshot> {
        match self.registry.try_start(kind) {
            StartOutcome::Started(guard) => Ok(guard),
            StartOutcome::AlreadyRunning(snapshot) => {
                debug!(run_kind = kind.as_str(), "Run already in flight");
                Err(snapshot)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Extraction
    // -------------------------------------------------------------------------

    /// Run a synchronous chunked extraction pass.
    ///
    /// `post_ids` limits the pass; `None` covers every stored post.
    pub async fn run_extraction(
        &self,
        post_ids: Option<&[Uuid]>,
    ) -> Result<RunOutcome<ExtractionSummary>> {
        let guard = match self.claim(OperationKind::Extraction) {
            Ok(guard) => guard,
            Err(snapshot) => return Ok(RunOutcome::AlreadyRunning(snapshot)),
        };
        match self.extraction_pass(post_ids, &guard).await {
            Ok(summary) => {
                guard.finish_ok();
                Ok(RunOutcome::Completed(summary))
            }
            Err(e) => {
                guard.finish_err(e.to_string());
                Err(e)
            }
        }
    }

    async fn extraction_pass(
        &self,
        post_ids: Option<&[Uuid]>,
        guard: &RunGuard,
    ) -> Result<ExtractionSummary> {
        let ids = match post_ids {
            Some(ids) => ids.to_vec(),
            None => self.repo.list_ids().await?,
        };
        let posts = self.repo.fetch_many(&ids).await?;
        let (inputs, skipped) = Extractor::inputs_from(&posts);

        let mut summary = ExtractionSummary {
            processed: posts.len(),
            skipped,
            ..Default::default()
        };

        info!(
            input_count = inputs.len(),
            skipped,
            "Starting extraction pass"
        );

        // The working set is read fresh once per pass; names created by
        // this pass steer the next one.
        let known = self.resolver.known_category_names().await?;
        let total = posts.len();
        let results = self
            .extractor
            .extract_batch(&inputs, &known, |done, _| {
                guard.set_progress(Progress {
                    processed: done + skipped,
                    total,
                    skipped,
                    ..Default::default()
                });
            })
            .await;
        summary.failed = inputs.len() - results.len();

        for (post_id, extraction) in &results {
            self.apply_one(*post_id, extraction).await?;
            summary.applied += 1;
            guard.set_progress(Progress {
                processed: total,
                total,
                updated: summary.applied,
                skipped,
                failed: summary.failed,
                message: None,
            });
        }

        info!(
            applied = summary.applied,
            skipped = summary.skipped,
            failed = summary.failed,
            "Extraction pass finished"
        );
        Ok(summary)
    }

    /// Write one extraction back: post fields, taxonomy edges, geo.
    async fn apply_one(&self, post_id: Uuid, extraction: &Extraction) -> Result<()> {
        self.repo.apply_extraction(post_id, extraction).await?;
        self.resolver
            .resolve_labels(post_id, &extraction.categories)
            .await?;
        self.geocode_one(post_id, extraction).await;
        Ok(())
    }

    /// Geocoding is best effort; a miss or provider failure never fails
    /// the post.
    async fn geocode_one(&self, post_id: Uuid, extraction: &Extraction) {
        let Some(geocoder) = &self.geocoder else {
            return;
        };
        let Some(location) = &extraction.location else {
            return;
        };
        match geocoder.resolve(location).await {
            Ok(Some(geo)) => {
                if let Err(e) = self.repo.set_geo(post_id, geo).await {
                    warn!(post_id = %post_id, error = %e, "Could not store geocoding result");
                }
            }
            Ok(None) => debug!(post_id = %post_id, location, "No geocoding match"),
            Err(e) => warn!(post_id = %post_id, location, error = %e, "Geocoding failed"),
        }
    }

    // -------------------------------------------------------------------------
    // Bulk extraction
    // -------------------------------------------------------------------------

    /// Submit posts to the provider's bulk facility. Returns immediately
    /// with a receipt; results arrive through [`Self::apply_batch_results`].
    pub async fn submit_bulk_extraction(
        &self,
        post_ids: Option<&[Uuid]>,
    ) -> Result<BatchSubmission> {
        let ids = match post_ids {
            Some(ids) => ids.to_vec(),
            None => self.repo.list_ids().await?,
        };
        let posts = self.repo.fetch_many(&ids).await?;
        let (inputs, skipped) = Extractor::inputs_from(&posts);
        if skipped > 0 {
            debug!(skipped, "Captionless posts excluded from bulk submission");
        }
        let known = self.resolver.known_category_names().await?;
        self.extractor.submit_bulk(&inputs, &known).await
    }

    /// Poll a bulk job without touching its results.
    pub async fn poll_bulk_extraction(&self, batch_id: &str) -> Result<BatchStatus> {
        self.extractor.poll(batch_id).await
    }

    /// Materialize a finished bulk job and apply its results, gated like a
    /// synchronous extraction pass. Re-running applies the cached results
    /// without another provider fetch.
    pub async fn apply_batch_results(
        &self,
        batch_id: &str,
    ) -> Result<RunOutcome<ExtractionSummary>> {
        let guard = match self.claim(OperationKind::Extraction) {
            Ok(guard) => guard,
            Err(snapshot) => return Ok(RunOutcome::AlreadyRunning(snapshot)),
        };
        let outcome: Result<ExtractionSummary> = async {
            let results = self.extractor.materialize(batch_id).await?;
            let mut summary = ExtractionSummary {
                processed: results.len(),
                ..Default::default()
            };
            for (post_id, extraction) in &results {
                self.apply_one(*post_id, extraction).await?;
                summary.applied += 1;
                guard.set_progress(Progress {
                    processed: summary.applied,
                    total: results.len(),
                    updated: summary.applied,
                    ..Default::default()
                });
            }
            Ok(summary)
        }
        .await;

        match outcome {
            Ok(summary) => {
                guard.finish_ok();
                Ok(RunOutcome::Completed(summary))
            }
            Err(e) => {
                guard.finish_err(e.to_string());
                Err(e)
            }
        }
    }

    /// Cancel an in-flight bulk job.
    pub async fn cancel_bulk_extraction(&self, batch_id: &str) -> Result<()> {
        self.extractor.cancel(batch_id).await
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    /// Run an embedding reconciliation pass.
    ///
    /// `post_ids` limits the pass; `None` covers every stored post.
    pub async fn run_embedding_refresh(
        &self,
        post_ids: Option<&[Uuid]>,
        skip_if_enriched: bool,
    ) -> Result<RunOutcome<ReconcileReport>> {
        let guard = match self.claim(OperationKind::EmbeddingRefresh) {
            Ok(guard) => guard,
            Err(snapshot) => return Ok(RunOutcome::AlreadyRunning(snapshot)),
        };

        let publish = |report: &ReconcileReport| {
            guard.set_progress(Progress {
                processed: report.processed,
                total: 0,
                updated: report.updated,
                skipped: report.skipped,
                failed: report.failed,
                message: None,
            });
        };
        let result = match post_ids {
            Some(ids) => self.reconciler.regenerate(ids, skip_if_enriched, publish).await,
            None => self.reconciler.refresh_all(skip_if_enriched, publish).await,
        };

        match result {
            Ok(report) => {
                guard.finish_ok();
                Ok(RunOutcome::Completed(report))
            }
            Err(e) => {
                guard.finish_err(e.to_string());
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Cleanup
    // -------------------------------------------------------------------------

    /// Compute the cleanup plan without mutating anything. Not gated.
    pub async fn cleanup_analyze(&self) -> Result<CleanupPlan> {
        self.cleanup.analyze().await
    }

    /// Execute (or dry-run) a cleanup pass.
    pub async fn run_cleanup(&self, dry_run: bool) -> Result<RunOutcome<CleanupReport>> {
        let guard = match self.claim(OperationKind::Cleanup) {
            Ok(guard) => guard,
            Err(snapshot) => return Ok(RunOutcome::AlreadyRunning(snapshot)),
        };
        let result = self
            .cleanup
            .execute(dry_run, |progress| {
                guard.set_progress(Progress {
                    processed: progress.processed,
                    total: progress.total,
                    message: Some(progress.message.clone()),
                    ..Default::default()
                });
            })
            .await;

        match result {
            Ok(report) => {
                guard.finish_ok();
                Ok(RunOutcome::Completed(report))
            }
            Err(e) => {
                guard.finish_err(e.to_string());
                Err(e)
            }
        }
    }

    /// Restore the pre-cleanup state from the outstanding backup.
    pub async fn revert_cleanup(&self) -> Result<RunOutcome<usize>> {
        let guard = match self.claim(OperationKind::Cleanup) {
            Ok(guard) => guard,
            Err(snapshot) => return Ok(RunOutcome::AlreadyRunning(snapshot)),
        };
        match self.cleanup.revert().await {
            Ok(restored) => {
                guard.finish_ok();
                Ok(RunOutcome::Completed(restored))
            }
            Err(e) => {
                guard.finish_err(e.to_string());
                Err(e)
            }
        }
    }

    /// Make the executed cleanup permanent.
    pub async fn commit_cleanup(&self) -> Result<RunOutcome<usize>> {
        let guard = match self.claim(OperationKind::Cleanup) {
            Ok(guard) => guard,
            Err(snapshot) => return Ok(RunOutcome::AlreadyRunning(snapshot)),
        };
        match self.cleanup.commit().await {
            Ok(deleted) => {
                guard.finish_ok();
                Ok(RunOutcome::Completed(deleted))
            }
            Err(e) => {
                guard.finish_err(e.to_string());
                Err(e)
            }
        }
    }

    /// Whether an executed, uncommitted cleanup backup exists.
    pub async fn cleanup_has_backup(&self) -> Result<bool> {
        self.cleanup.has_backup().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RunStatus;
    use curato_core::{EmbeddingVersion, Error, GeoPoint, Post};
    use curato_graph::MemoryGraph;
    use curato_inference::mock::{MockEmbeddingBackend, MockExtractionBackend, MockGeocoder};

    struct Fixture {
        graph: Arc<MemoryGraph>,
        extraction: MockExtractionBackend,
        pipeline: Pipeline,
    }

    async fn fixture() -> Fixture {
        let graph = Arc::new(MemoryGraph::new());
        let extraction = MockExtractionBackend::new();
        let geocoder = MockGeocoder::new().with_place(
            "Rome",
            GeoPoint {
                lat: 41.9,
                lon: 12.5,
                country: Some("Italy".into()),
                city: Some("Rome".into()),
                neighborhood: None,
            },
        );
        let pipeline = Pipeline::new(
            graph.clone(),
            graph.clone(),
            Arc::new(extraction.clone()),
            Arc::new(MockEmbeddingBackend::new()),
        )
        .with_geocoder(Arc::new(geocoder));

        Fixture {
            graph,
            extraction,
            pipeline,
        }
    }

    async fn scripted_post(f: &Fixture, caption: &str, extraction: Extraction) -> Uuid {
        let id = f
            .graph
            .insert(Post::new(format!("src_{caption}"), Some(caption.into())))
            .await
            .unwrap();
        f.extraction.script_extraction(id, extraction);
        id
    }

    fn italian_extraction(location: Option<&str>) -> Extraction {
        Extraction {
            hashtags: vec!["pasta".into()],
            location: location.map(str::to_string),
            categories: vec!["Food/Italian".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_extraction_pass_builds_shared_hierarchy() {
        let f = fixture().await;
        let first = scripted_post(&f, "carbonara night", italian_extraction(Some("Rome"))).await;
        let second = scripted_post(&f, "best pizza ever", italian_extraction(None)).await;

        let summary = f
            .pipeline
            .run_extraction(None)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.failed, 0);

        // One Food, one Italian, linked once, posts on the leaf only.
        let food = f.graph.find_by_name("Food").await.unwrap().unwrap();
        let italian = f.graph.find_by_name("Italian").await.unwrap().unwrap();
        assert!(food.is_parent);
        assert_eq!(f.graph.parent_of(italian.id).await.unwrap(), Some(food.id));
        assert_eq!(f.graph.posts_in(italian.id).await.unwrap().len(), 2);
        assert!(f.graph.posts_in(food.id).await.unwrap().is_empty());

        // Extraction fields written back; geo resolved where a location was.
        let first_post = f.graph.fetch(first).await.unwrap();
        assert_eq!(first_post.hashtags, vec!["pasta"]);
        assert_eq!(first_post.geo.unwrap().city.as_deref(), Some("Rome"));
        assert!(f.graph.fetch(second).await.unwrap().geo.is_none());

        assert_eq!(
            f.pipeline.status(OperationKind::Extraction).status,
            RunStatus::Done
        );
    }

    #[tokio::test]
    async fn test_extraction_skips_captionless_posts() {
        let f = fixture().await;
        f.graph.insert(Post::new("bare", None)).await.unwrap();
        scripted_post(&f, "carbonara", italian_extraction(None)).await;

        let summary = f
            .pipeline
            .run_extraction(None)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_start_while_running_returns_snapshot() {
        let f = fixture().await;
        scripted_post(&f, "carbonara", italian_extraction(None)).await;

        // Another caller holds the extraction gate.
        let held = match f.pipeline.registry().try_start(OperationKind::Extraction) {
            StartOutcome::Started(guard) => guard,
            StartOutcome::AlreadyRunning(_) => panic!("gate should be free"),
        };

        let outcome = f.pipeline.run_extraction(None).await.unwrap();
        match outcome {
            RunOutcome::AlreadyRunning(snapshot) => {
                assert_eq!(snapshot.status, RunStatus::Running);
            }
            RunOutcome::Completed(_) => panic!("expected the in-flight snapshot"),
        }

        held.finish_ok();
        let outcome = f.pipeline.run_extraction(None).await.unwrap();
        assert!(!outcome.is_already_running());
    }

    #[tokio::test]
    async fn test_bulk_flow_applies_cached_results_once() {
        let f = fixture().await;
        let id = scripted_post(&f, "carbonara", italian_extraction(None)).await;

        let submission = f.pipeline.submit_bulk_extraction(None).await.unwrap();
        let status = f
            .pipeline
            .poll_bulk_extraction(&submission.batch_id)
            .await
            .unwrap();
        assert!(status.state.is_terminal());

        let summary = f
            .pipeline
            .apply_batch_results(&submission.batch_id)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(f.graph.memberships_of_post(id).await.unwrap().len(), 1);

        // Re-applying reuses the cache instead of re-fetching.
        f.pipeline
            .apply_batch_results(&submission.batch_id)
            .await
            .unwrap();
        assert_eq!(f.extraction.fetch_call_count(), 1);
    }

    #[tokio::test]
    async fn test_full_lifecycle_extract_embed_cleanup() {
        let f = fixture().await;
        let post = scripted_post(&f, "carbonara", italian_extraction(None)).await;

        f.pipeline.run_extraction(None).await.unwrap();

        let report = f
            .pipeline
            .run_embedding_refresh(None, false)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(
            f.graph.embedding_version(post).await.unwrap(),
            EmbeddingVersion::Enriched
        );

        // One post is below the default threshold, so cleanup archives the
        // taxonomy and revert brings it back.
        let cleanup = f
            .pipeline
            .run_cleanup(false)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert!(cleanup.archived > 0);
        assert!(f.pipeline.cleanup_has_backup().await.unwrap());

        let restored = f
            .pipeline
            .revert_cleanup()
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert!(restored > 0);
        assert!(!f.pipeline.cleanup_has_backup().await.unwrap());
        assert!(f.graph.find_by_name("Italian").await.unwrap().is_some());

        // Execute again and make it stick.
        f.pipeline.run_cleanup(false).await.unwrap();
        let deleted = f
            .pipeline
            .commit_cleanup()
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert!(deleted > 0);
        assert!(f.graph.find_by_name("Italian").await.unwrap().is_none());
        assert_eq!(
            f.pipeline
                .commit_cleanup()
                .await
                .unwrap()
                .completed()
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_targeted_embedding_refresh() {
        let f = fixture().await;
        let first = scripted_post(&f, "one", italian_extraction(None)).await;
        let second = scripted_post(&f, "two", italian_extraction(None)).await;

        let report = f
            .pipeline
            .run_embedding_refresh(Some(&[first]), false)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(
            f.graph.embedding_version(first).await.unwrap(),
            EmbeddingVersion::Enriched
        );
        assert_eq!(
            f.graph.embedding_version(second).await.unwrap(),
            EmbeddingVersion::None
        );
    }

    #[tokio::test]
    async fn test_failed_run_releases_gate() {
        let f = fixture().await;
        scripted_post(&f, "one", italian_extraction(None)).await;
        scripted_post(&f, "two", italian_extraction(None)).await;
        f.pipeline.run_extraction(None).await.unwrap();

        // Two posts sit below the default threshold, so this archives the
        // taxonomy and leaves a backup outstanding.
        f.pipeline.run_cleanup(false).await.unwrap();
        assert!(f.pipeline.cleanup_has_backup().await.unwrap());

        // Backup outstanding: a second execute fails but frees the gate.
        let err = f.pipeline.run_cleanup(false).await.unwrap_err();
        assert!(matches!(err, Error::State(_)));
        assert_eq!(
            f.pipeline.status(OperationKind::Cleanup).status,
            RunStatus::Error
        );
        assert!(f.pipeline.revert_cleanup().await.is_ok());
    }
}
