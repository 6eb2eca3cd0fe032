//! Reversible taxonomy cleanup.
//!
//! A cleanup run archives categories whose transitive distinct post count
//! falls under a threshold, reassigning their posts to the nearest
//! surviving relative. Execution is snapshot-first: original tags and
//! mirrored edges are written before anything is touched, so the whole run
//! stays revertible until it is committed. Exactly one backup may be
//! outstanding at a time.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use curato_core::{defaults, Category, CategoryGraph, Error, Result};

// =============================================================================
// PLAN
// =============================================================================

/// Where a doomed category's posts go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignTarget {
    /// The category's own surviving parent.
    Parent(Uuid),
    /// First surviving sibling in name order.
    Sibling(Uuid),
    /// No surviving relative; posts keep their other memberships only.
    Orphan,
}

/// One category proposed for removal.
#[derive(Debug, Clone)]
pub struct CleanupProposal {
    pub category: Category,
    /// Transitive distinct post count at analysis time.
    pub post_count: usize,
    pub target: ReassignTarget,
}

/// Analysis output: what an execute run would do.
#[derive(Debug, Clone, Default)]
pub struct CleanupPlan {
    pub threshold: usize,
    pub proposals: Vec<CleanupProposal>,
}

/// Counters for an execute run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Active categories examined.
    pub analyzed: usize,
    /// Categories archived (0 on a dry run).
    pub archived: usize,
    /// Membership edges moved to a surviving relative.
    pub reassigned: usize,
    pub dry_run: bool,
}

/// Progress line for long cleanup runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupProgress {
    pub processed: usize,
    pub total: usize,
    pub message: String,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Analyze / execute / revert / commit over the category graph.
pub struct CleanupEngine {
    graph: Arc<dyn CategoryGraph>,
    min_posts: usize,
    reassign_orphans: bool,
}

impl CleanupEngine {
    pub fn new(graph: Arc<dyn CategoryGraph>) -> Self {
        Self {
            graph,
            min_posts: defaults::CLEANUP_MIN_POSTS,
            reassign_orphans: true,
        }
    }

    pub fn with_min_posts(mut self, min_posts: usize) -> Self {
        self.min_posts = min_posts;
        self
    }

    /// When disabled, posts of archived categories are not moved to the
    /// reassignment target; they keep only their other memberships.
    pub fn with_reassign_orphans(mut self, reassign_orphans: bool) -> Self {
        self.reassign_orphans = reassign_orphans;
        self
    }

    /// Whether a backup from an executed, uncommitted run exists.
    pub async fn has_backup(&self) -> Result<bool> {
        self.graph.has_original_tags().await
    }

    /// Compute the removal plan without touching anything.
    ///
    /// A category is proposed when the distinct posts in its whole subtree
    /// fall under the threshold. Targets are picked against the surviving
    /// set, so a doomed parent is never chosen.
    pub async fn analyze(&self) -> Result<CleanupPlan> {
        let active = self.graph.list_active().await?;

        let mut doomed: Vec<(Category, usize)> = Vec::new();
        for category in &active {
            let count = self.graph.count_distinct_posts_under(category.id).await?;
            if count < self.min_posts {
                doomed.push((category.clone(), count));
            }
        }

        let doomed_ids: HashSet<Uuid> = doomed.iter().map(|(c, _)| c.id).collect();
        let mut proposals = Vec::with_capacity(doomed.len());
        for (category, post_count) in doomed {
            let target = self.pick_target(&category, &doomed_ids).await?;
            proposals.push(CleanupProposal {
                category,
                post_count,
                target,
            });
        }
        proposals.sort_by(|a, b| a.category.name.cmp(&b.category.name));

        Ok(CleanupPlan {
            threshold: self.min_posts,
            proposals,
        })
    }

    async fn pick_target(
        &self,
        category: &Category,
        doomed: &HashSet<Uuid>,
    ) -> Result<ReassignTarget> {
        let Some(parent_id) = self.graph.parent_of(category.id).await? else {
            return Ok(ReassignTarget::Orphan);
        };

        if !doomed.contains(&parent_id) {
            return Ok(ReassignTarget::Parent(parent_id));
        }

        // Parent is going too; fall back to a surviving sibling.
        let mut siblings: Vec<Category> = Vec::new();
        for sibling_id in self.graph.children_of(parent_id).await? {
            if sibling_id == category.id || doomed.contains(&sibling_id) {
                continue;
            }
            if let Some(sibling) = self.graph.get(sibling_id).await? {
                siblings.push(sibling);
            }
        }
        siblings.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(match siblings.into_iter().next() {
            Some(sibling) => ReassignTarget::Sibling(sibling.id),
            None => ReassignTarget::Orphan,
        })
    }

    /// Execute the current plan.
    ///
    /// With `dry_run` the graph is never written; the report describes what
    /// a real run would do. A real run refuses to start while a previous
    /// backup is outstanding, then snapshots before the first mutation.
    pub async fn execute(
        &self,
        dry_run: bool,
        mut on_progress: impl FnMut(&CleanupProgress) + Send,
    ) -> Result<CleanupReport> {
        let active_count = self.graph.list_active().await?.len();
        let plan = self.analyze().await?;

        let mut report = CleanupReport {
            analyzed: active_count,
            dry_run,
            ..Default::default()
        };

        if dry_run {
            for proposal in &plan.proposals {
                if self.reassign_orphans && proposal.target != ReassignTarget::Orphan {
                    report.reassigned += self.graph.posts_in(proposal.category.id).await?.len();
                }
            }
            info!(
                proposals = plan.proposals.len(),
                "Dry-run cleanup, no changes applied"
            );
            return Ok(report);
        }

        if self.graph.has_original_tags().await? {
            return Err(Error::State(
                "a cleanup backup already exists; revert or commit it first".into(),
            ));
        }

        if plan.proposals.is_empty() {
            info!(analyzed = report.analyzed, "Cleanup found nothing to archive");
            return Ok(report);
        }

        // Snapshot before the first mutation.
        self.graph.tag_originals().await?;
        self.graph.mirror_edges().await?;

        let total = plan.proposals.len();
        let mut last_message = String::new();
        for (i, proposal) in plan.proposals.iter().enumerate() {
            let target_id = match proposal.target {
                ReassignTarget::Parent(id) | ReassignTarget::Sibling(id)
                    if self.reassign_orphans =>
                {
                    Some(id)
                }
                _ => None,
            };

            for post_id in self.graph.posts_in(proposal.category.id).await? {
                if let Some(target_id) = target_id {
                    self.graph.add_membership(post_id, target_id).await?;
                    report.reassigned += 1;
                }
                self.graph.remove_membership(post_id, proposal.category.id).await?;
            }

            // Reattach children to the grandparent so the hierarchy stays
            // connected after the archive.
            let grandparent = self.graph.parent_of(proposal.category.id).await?;
            for child_id in self.graph.children_of(proposal.category.id).await? {
                if let Err(e) = self.graph.set_parent(child_id, grandparent).await {
                    warn!(child = %child_id, error = %e, "Could not reattach child, detaching");
                    self.graph.set_parent(child_id, None).await?;
                }
            }

            self.graph.archive(proposal.category.id).await?;
            report.archived += 1;

            let message = format!("archived {}", proposal.category.name);
            if message != last_message {
                on_progress(&CleanupProgress {
                    processed: i + 1,
                    total,
                    message: message.clone(),
                });
                last_message = message;
            }
        }

        info!(
            archived = report.archived,
            reassigned = report.reassigned,
            "Cleanup executed"
        );
        Ok(report)
    }

    /// Restore the pre-cleanup state from the outstanding backup.
    ///
    /// Safe to call when no backup exists; that is a no-op. The backup is
    /// consumed on success.
    pub async fn revert(&self) -> Result<usize> {
        if !self.graph.has_original_tags().await? {
            return Ok(0);
        }

        // Everything created since the snapshot goes first; only originals
        // belong to the restored state.
        for category in self.graph.list_all().await? {
            if !self.graph.is_original(category.id).await? {
                self.graph.delete_category(category.id).await?;
            }
        }

        let mut restored = 0;
        for category in self.graph.list_all().await? {
            if !self.graph.is_original(category.id).await? {
                continue;
            }
            if category.state == curato_core::CategoryState::Archived {
                self.graph.unarchive(category.id).await?;
                restored += 1;
            }
            if let Some(original) = self.graph.original_name_of(category.id).await? {
                if original != category.name {
                    self.graph.rename(category.id, &original).await?;
                }
            }
        }

        self.graph.restore_mirrored_edges().await?;

        // Parent flags are derived; rebuild them from the restored edges.
        for category in self.graph.list_all().await? {
            let has_children = !self.graph.children_of(category.id).await?.is_empty();
            if category.is_parent != has_children {
                self.graph.set_is_parent(category.id, has_children).await?;
            }
        }

        self.graph.clear_original_tags().await?;
        self.graph.delete_mirrored_edges().await?;

        info!(restored, "Cleanup reverted");
        Ok(restored)
    }

    /// Make the executed cleanup permanent: hard-delete the archived
    /// originals and drop the backup. No-op when no backup exists.
    pub async fn commit(&self) -> Result<usize> {
        if !self.graph.has_original_tags().await? {
            return Ok(0);
        }

        let mut deleted = 0;
        for category in self.graph.list_archived().await? {
            if self.graph.is_original(category.id).await? {
                self.graph.delete_category(category.id).await?;
                deleted += 1;
            }
        }

        self.graph.clear_original_tags().await?;
        self.graph.delete_mirrored_edges().await?;

        info!(deleted, "Cleanup committed");
        Ok(deleted)
    }
}
