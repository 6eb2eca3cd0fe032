//! Core traits for curato abstractions.
//!
//! These traits define the narrow contracts the pipeline consumes: the
//! graph store (posts, categories, edges, cleanup snapshot bookkeeping)
//! and the external extraction/embedding/geocoding providers. Concrete
//! implementations are pluggable and individually atomic per call; no
//! cross-call transactionality is assumed.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// POST REPOSITORY
// =============================================================================

/// Repository for post storage and enrichment writes.
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Insert a new post.
    async fn insert(&self, post: Post) -> Result<Uuid>;

    /// Fetch a post by ID.
    async fn fetch(&self, id: Uuid) -> Result<Post>;

    /// Fetch several posts at once. Unknown IDs are silently omitted.
    async fn fetch_many(&self, ids: &[Uuid]) -> Result<Vec<Post>>;

    /// List all post IDs.
    async fn list_ids(&self) -> Result<Vec<Uuid>>;

    /// Write extraction output (hashtags, location, venue, event date,
    /// mentions) onto a post. Marks the post as model-edited.
    async fn apply_extraction(&self, id: Uuid, extraction: &Extraction) -> Result<()>;

    /// Store an embedding and bump the freshness version.
    async fn set_embedding(
        &self,
        id: Uuid,
        embedding: Vec<f32>,
        version: EmbeddingVersion,
    ) -> Result<()>;

    /// Current embedding freshness version for a post.
    async fn embedding_version(&self, id: Uuid) -> Result<EmbeddingVersion>;

    /// Record a manual metadata edit: sets `last_edited_by = User` and
    /// resets the embedding version to `CaptionOnly` so the next refresh
    /// re-embeds the post.
    async fn mark_user_edited(&self, id: Uuid) -> Result<()>;

    /// Attach a geocoding result to a post.
    async fn set_geo(&self, id: Uuid, geo: GeoPoint) -> Result<()>;
}

// =============================================================================
// CATEGORY GRAPH
// =============================================================================

/// Graph store for the category taxonomy.
///
/// Covers category nodes, `CHILD_OF` hierarchy edges (single active parent
/// per child, replace-on-set), `BELONGS_TO` membership edges (set
/// semantics), and the cleanup-snapshot protocol (original tags, preserved
/// names, mirrored edges).
#[async_trait]
pub trait CategoryGraph: Send + Sync {
    /// Find an active category by name, case-insensitively.
    async fn find_by_name(&self, name: &str) -> Result<Option<Category>>;

    /// Create a category. Fails if an active category with the same name
    /// (case-insensitive) already exists.
    async fn create(&self, name: &str, is_parent: bool) -> Result<Category>;

    /// Get a category by ID regardless of lifecycle state.
    async fn get(&self, id: Uuid) -> Result<Option<Category>>;

    /// List active categories.
    async fn list_active(&self) -> Result<Vec<Category>>;

    /// List archived categories.
    async fn list_archived(&self) -> Result<Vec<Category>>;

    /// List every category regardless of state.
    async fn list_all(&self) -> Result<Vec<Category>>;

    /// Rename a category.
    async fn rename(&self, id: Uuid, name: &str) -> Result<()>;

    /// Set or clear the `is_parent` flag.
    async fn set_is_parent(&self, id: Uuid, is_parent: bool) -> Result<()>;

    /// Point the child's parent edge at `parent`, replacing any previous
    /// parent. `None` detaches the child. Refuses self-loops and edges
    /// whose ancestor chain would contain the child.
    async fn set_parent(&self, child: Uuid, parent: Option<Uuid>) -> Result<()>;

    /// The child's current parent, if any.
    async fn parent_of(&self, child: Uuid) -> Result<Option<Uuid>>;

    /// Direct children of a category.
    async fn children_of(&self, id: Uuid) -> Result<Vec<Uuid>>;

    /// Link a post to a category (idempotent set membership).
    async fn add_membership(&self, post_id: Uuid, category_id: Uuid) -> Result<()>;

    /// Unlink a post from a category.
    async fn remove_membership(&self, post_id: Uuid, category_id: Uuid) -> Result<()>;

    /// Categories a post directly belongs to.
    async fn memberships_of_post(&self, post_id: Uuid) -> Result<Vec<Uuid>>;

    /// Posts directly linked to a category.
    async fn posts_in(&self, category_id: Uuid) -> Result<Vec<Uuid>>;

    /// Distinct posts belonging to a category or any of its descendants.
    /// A post under two overlapping subtrees counts once.
    async fn count_distinct_posts_under(&self, category_id: Uuid) -> Result<usize>;

    /// Hard-delete a category and every edge touching it.
    async fn delete_category(&self, id: Uuid) -> Result<()>;

    /// Move a category into the archived set (soft delete).
    async fn archive(&self, id: Uuid) -> Result<()>;

    /// Restore an archived category to the active set.
    async fn unarchive(&self, id: Uuid) -> Result<()>;

    // -------------------------------------------------------------------------
    // Cleanup snapshot protocol
    // -------------------------------------------------------------------------

    /// Tag every current category as original, preserving its name.
    async fn tag_originals(&self) -> Result<()>;

    /// Drop all original tags and preserved names.
    async fn clear_original_tags(&self) -> Result<()>;

    /// Whether any original tags exist (O(1) backup-existence check).
    async fn has_original_tags(&self) -> Result<bool>;

    /// Whether a specific category carries the original tag.
    async fn is_original(&self, id: Uuid) -> Result<bool>;

    /// The name a category had when it was tagged original.
    async fn original_name_of(&self, id: Uuid) -> Result<Option<String>>;

    /// Mirror every current membership and parent edge into the shadow set.
    async fn mirror_edges(&self) -> Result<()>;

    /// Replace all current membership and parent edges with the shadow set.
    async fn restore_mirrored_edges(&self) -> Result<()>;

    /// Delete the shadow edge set.
    async fn delete_mirrored_edges(&self) -> Result<()>;
}

// =============================================================================
// EXTRACTION PROVIDER
// =============================================================================

/// Caption handed to the extraction provider, keyed by post ID so results
/// are matched by identifier rather than position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionInput {
    pub post_id: Uuid,
    pub caption: String,
}

/// External model capable of structured metadata extraction.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Extract metadata for one chunk of posts in a single request.
    ///
    /// Results are keyed by post ID; posts the model failed to answer for
    /// are simply absent. `known_categories` steers the model toward the
    /// existing taxonomy instead of inventing near-duplicate names.
    async fn extract_chunk(
        &self,
        posts: &[ExtractionInput],
        known_categories: &[String],
    ) -> Result<Vec<(Uuid, Extraction)>>;

    /// Enqueue one request per post with the provider's bulk facility.
    async fn submit_batch(
        &self,
        posts: &[ExtractionInput],
        known_categories: &[String],
    ) -> Result<BatchSubmission>;

    /// Non-destructive status poll for a bulk job.
    async fn poll_batch(&self, batch_id: &str) -> Result<BatchStatus>;

    /// Stream per-post results for a terminal bulk job.
    async fn fetch_batch_results(&self, batch_id: &str) -> Result<Vec<(Uuid, Extraction)>>;

    /// Fire-and-forget cancellation of a bulk job.
    async fn cancel_batch(&self, batch_id: &str) -> Result<()>;
}

// =============================================================================
// EMBEDDING PROVIDER
// =============================================================================

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns one fixed-length vector per input text, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Model name being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// GEOCODING PROVIDER
// =============================================================================

/// Backend resolving free-text locations to coordinates.
///
/// Failures here are non-fatal to the taxonomy pipeline; callers log and
/// continue.
#[async_trait]
pub trait GeocodingBackend: Send + Sync {
    /// Resolve a location string. `Ok(None)` means the provider answered
    /// but found nothing.
    async fn resolve(&self, location: &str) -> Result<Option<GeoPoint>>;
}
