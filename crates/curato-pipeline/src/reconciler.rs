//! Embedding reconciliation.
//!
//! Regenerates post embeddings in bulk once richer metadata (categories,
//! location, hashtags) is available, bumping each post's freshness version
//! to `Enriched`. The stored version only moves forward, so repeated runs
//! converge; with the skip flag, already-enriched posts cost nothing.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use curato_core::{
    defaults, CategoryGraph, EmbeddingBackend, EmbeddingVersion, Post, PostRepository, Result,
};

/// Cumulative counters for a reconciliation run. Counters only grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub processed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Re-embeds posts whose embedding version lags their stored fields.
pub struct Reconciler {
    repo: Arc<dyn PostRepository>,
    graph: Arc<dyn CategoryGraph>,
    embedder: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn PostRepository>,
        graph: Arc<dyn CategoryGraph>,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            repo,
            graph,
            embedder,
            batch_size: defaults::EMBED_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Regenerate embeddings for every stored post.
    pub async fn refresh_all(
        &self,
        skip_if_enriched: bool,
        on_progress: impl FnMut(&ReconcileReport) + Send,
    ) -> Result<ReconcileReport> {
        let ids = self.repo.list_ids().await?;
        self.regenerate(&ids, skip_if_enriched, on_progress).await
    }

    /// Regenerate embeddings for the given posts, in batches.
    ///
    /// With `skip_if_enriched`, posts already at `Enriched` are skipped
    /// before any provider cost. Captionless posts count as processed but
    /// are never updated. A failed embedding batch marks its posts failed
    /// and the run continues with the next batch. The progress callback
    /// fires once per batch with cumulative counters.
    pub async fn regenerate(
        &self,
        post_ids: &[Uuid],
        skip_if_enriched: bool,
        mut on_progress: impl FnMut(&ReconcileReport) + Send,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        info!(
            post_count = post_ids.len(),
            skip_if_enriched, "Starting embedding reconciliation"
        );

        for chunk in post_ids.chunks(self.batch_size) {
            let posts = self.repo.fetch_many(chunk).await?;

            // Decide per post before spending a provider call.
            let mut pending: Vec<(Uuid, String)> = Vec::new();
            for post in &posts {
                report.processed += 1;

                if skip_if_enriched && post.embedding_version == EmbeddingVersion::Enriched {
                    report.skipped += 1;
                    continue;
                }
                if post.caption.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    debug!(post_id = %post.id, "No caption to embed, skipping");
                    report.skipped += 1;
                    continue;
                }

                let category_names = self.category_names_of(post.id).await?;
                pending.push((post.id, embedding_text(post, &category_names)));
            }

            if pending.is_empty() {
                on_progress(&report);
                continue;
            }

            let texts: Vec<String> = pending.iter().map(|(_, t)| t.clone()).collect();
            let vectors = match self.embedder.embed_texts(&texts).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        batch_size = pending.len(),
                        error = %e,
                        "Embedding batch failed, continuing with next batch"
                    );
                    report.failed += pending.len();
                    on_progress(&report);
                    continue;
                }
            };

            for ((id, _), vector) in pending.into_iter().zip(vectors) {
                self.repo
                    .set_embedding(id, vector, EmbeddingVersion::Enriched)
                    .await?;
                report.updated += 1;
            }
            on_progress(&report);
        }

        info!(
            processed = report.processed,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "Embedding reconciliation finished"
        );
        Ok(report)
    }

    async fn category_names_of(&self, post_id: Uuid) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for category_id in self.graph.memberships_of_post(post_id).await? {
            if let Some(category) = self.graph.get(category_id).await? {
                names.push(category.name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Flatten a post's fields into one embedding input.
fn embedding_text(post: &Post, category_names: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(caption) = &post.caption {
        if !caption.trim().is_empty() {
            parts.push(caption.trim().to_string());
        }
    }
    if let Some(owner) = &post.owner {
        parts.push(format!("by {}", owner));
    }
    if !category_names.is_empty() {
        parts.push(format!("categories: {}", category_names.join(", ")));
    }
    if let Some(location) = &post.location {
        parts.push(format!("location: {}", location));
    }
    if let Some(venue) = &post.venue {
        parts.push(format!("venue: {}", venue));
    }
    if !post.hashtags.is_empty() {
        parts.push(format!("tags: {}", post.hashtags.join(" ")));
    }
    if !post.mentions.is_empty() {
        parts.push(format!("mentions: {}", post.mentions.join(" ")));
    }
    parts.join("\n")
}
