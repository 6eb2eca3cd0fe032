//! In-memory graph store.
//!
//! `MemoryGraph` implements both [`PostRepository`] and [`CategoryGraph`]
//! over a single `RwLock`-guarded state. It is the reference implementation
//! of the storage contracts and the substrate the pipeline tests run
//! against; a durable backend would implement the same traits.
//!
//! Every trait method takes the lock once, so each call is individually
//! atomic. Multi-step protocols (snapshot, revert, commit) are composed by
//! the cleanup engine and designed to be safely re-run between calls.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use curato_core::{
    Category, CategoryGraph, CategoryState, EditedBy, EmbeddingVersion, Error, Extraction,
    GeoPoint, Post, PostRepository, Result,
};

/// Pre-cleanup state preserved for revert.
///
/// Exactly one snapshot may be outstanding at a time; the cleanup engine
/// refuses to create a second one while `originals` is non-empty.
#[derive(Debug, Clone, Default)]
pub struct CleanupSnapshot {
    /// Categories that existed when the snapshot was taken, with the name
    /// each had at that moment.
    originals: HashMap<Uuid, String>,
    /// Mirrored `BELONGS_TO` edges (post → category).
    memberships: Vec<(Uuid, Uuid)>,
    /// Mirrored `CHILD_OF` edges (child → parent).
    parent_edges: Vec<(Uuid, Uuid)>,
}

impl CleanupSnapshot {
    fn is_empty(&self) -> bool {
        self.originals.is_empty() && self.memberships.is_empty() && self.parent_edges.is_empty()
    }
}

#[derive(Debug, Default)]
struct GraphInner {
    posts: HashMap<Uuid, Post>,
    categories: HashMap<Uuid, Category>,
    /// child category → active parent (at most one).
    parents: HashMap<Uuid, Uuid>,
    /// post → categories it directly belongs to.
    memberships: HashMap<Uuid, BTreeSet<Uuid>>,
    snapshot: Option<CleanupSnapshot>,
}

impl GraphInner {
    /// Direct children of `id`.
    fn children(&self, id: Uuid) -> Vec<Uuid> {
        let mut out: Vec<Uuid> = self
            .parents
            .iter()
            .filter(|(_, p)| **p == id)
            .map(|(c, _)| *c)
            .collect();
        out.sort();
        out
    }

    /// Whether `ancestor` appears in the parent chain above `id`.
    fn has_ancestor(&self, id: Uuid, ancestor: Uuid) -> bool {
        let mut current = id;
        let mut seen = HashSet::new();
        while let Some(&parent) = self.parents.get(&current) {
            if parent == ancestor {
                return true;
            }
            // Guard against pre-existing corruption.
            if !seen.insert(parent) {
                return false;
            }
            current = parent;
        }
        false
    }
}

/// In-memory implementation of the curato storage contracts.
#[derive(Clone, Default)]
pub struct MemoryGraph {
    inner: Arc<RwLock<GraphInner>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostRepository for MemoryGraph {
    async fn insert(&self, post: Post) -> Result<Uuid> {
        let mut inner = self.inner.write().await;
        let id = post.id;
        inner.posts.insert(id, post);
        Ok(id)
    }

    async fn fetch(&self, id: Uuid) -> Result<Post> {
        let inner = self.inner.read().await;
        inner
            .posts
            .get(&id)
            .cloned()
            .ok_or(Error::PostNotFound(id))
    }

    async fn fetch_many(&self, ids: &[Uuid]) -> Result<Vec<Post>> {
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.posts.get(id).cloned())
            .collect())
    }

    async fn list_ids(&self) -> Result<Vec<Uuid>> {
        let inner = self.inner.read().await;
        let mut ids: Vec<Uuid> = inner.posts.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn apply_extraction(&self, id: Uuid, extraction: &Extraction) -> Result<()> {
        let mut inner = self.inner.write().await;
        let post = inner.posts.get_mut(&id).ok_or(Error::PostNotFound(id))?;
        post.hashtags = extraction.hashtags.clone();
        post.mentions = extraction.mentions.clone();
        if extraction.location.is_some() {
            post.location = extraction.location.clone();
        }
        if extraction.venue.is_some() {
            post.venue = extraction.venue.clone();
        }
        if extraction.event_date.is_some() {
            post.event_date = extraction.event_date.clone();
        }
        post.last_edited_by = EditedBy::Model;
        Ok(())
    }

    async fn set_embedding(
        &self,
        id: Uuid,
        embedding: Vec<f32>,
        version: EmbeddingVersion,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let post = inner.posts.get_mut(&id).ok_or(Error::PostNotFound(id))?;
        post.embedding = Some(embedding);
        // Version only moves forward here; manual edits reset it through
        // `mark_user_edited`.
        if version > post.embedding_version {
            post.embedding_version = version;
        }
        Ok(())
    }

    async fn embedding_version(&self, id: Uuid) -> Result<EmbeddingVersion> {
        let inner = self.inner.read().await;
        inner
            .posts
            .get(&id)
            .map(|p| p.embedding_version)
            .ok_or(Error::PostNotFound(id))
    }

    async fn mark_user_edited(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let post = inner.posts.get_mut(&id).ok_or(Error::PostNotFound(id))?;
        post.last_edited_by = EditedBy::User;
        if post.embedding_version > EmbeddingVersion::CaptionOnly {
            post.embedding_version = EmbeddingVersion::CaptionOnly;
        }
        Ok(())
    }

    async fn set_geo(&self, id: Uuid, geo: GeoPoint) -> Result<()> {
        let mut inner = self.inner.write().await;
        let post = inner.posts.get_mut(&id).ok_or(Error::PostNotFound(id))?;
        post.geo = Some(geo);
        Ok(())
    }
}

#[async_trait]
impl CategoryGraph for MemoryGraph {
    async fn find_by_name(&self, name: &str) -> Result<Option<Category>> {
        let inner = self.inner.read().await;
        let needle = name.to_lowercase();
        Ok(inner
            .categories
            .values()
            .find(|c| c.state == CategoryState::Active && c.name.to_lowercase() == needle)
            .cloned())
    }

    async fn create(&self, name: &str, is_parent: bool) -> Result<Category> {
        let mut inner = self.inner.write().await;
        let needle = name.to_lowercase();
        if inner
            .categories
            .values()
            .any(|c| c.state == CategoryState::Active && c.name.to_lowercase() == needle)
        {
            return Err(Error::Graph(format!("category already exists: {}", name)));
        }
        let mut category = Category::new(name);
        category.is_parent = is_parent;
        debug!(category_id = %category.id, category_name = %category.name, "Created category");
        inner.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Category>> {
        let inner = self.inner.read().await;
        Ok(inner.categories.get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Category>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Category> = inner
            .categories
            .values()
            .filter(|c| c.state == CategoryState::Active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn list_archived(&self) -> Result<Vec<Category>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Category> = inner
            .categories
            .values()
            .filter(|c| c.state == CategoryState::Archived)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn list_all(&self) -> Result<Vec<Category>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Category> = inner.categories.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn rename(&self, id: Uuid, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let category = inner
            .categories
            .get_mut(&id)
            .ok_or(Error::CategoryNotFound(id))?;
        category.name = name.to_string();
        Ok(())
    }

    async fn set_is_parent(&self, id: Uuid, is_parent: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        let category = inner
            .categories
            .get_mut(&id)
            .ok_or(Error::CategoryNotFound(id))?;
        category.is_parent = is_parent;
        Ok(())
    }

    async fn set_parent(&self, child: Uuid, parent: Option<Uuid>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.categories.contains_key(&child) {
            return Err(Error::CategoryNotFound(child));
        }
        match parent {
            Some(parent_id) => {
                if !inner.categories.contains_key(&parent_id) {
                    return Err(Error::CategoryNotFound(parent_id));
                }
                if parent_id == child {
                    return Err(Error::Graph("category cannot be its own parent".into()));
                }
                if inner.has_ancestor(parent_id, child) {
                    return Err(Error::Graph(format!(
                        "setting parent {} on {} would create a cycle",
                        parent_id, child
                    )));
                }
                // Replace, never accumulate: one active parent per child.
                inner.parents.insert(child, parent_id);
            }
            None => {
                inner.parents.remove(&child);
            }
        }
        Ok(())
    }

    async fn parent_of(&self, child: Uuid) -> Result<Option<Uuid>> {
        let inner = self.inner.read().await;
        Ok(inner.parents.get(&child).copied())
    }

    async fn children_of(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let inner = self.inner.read().await;
        Ok(inner.children(id))
    }

    async fn add_membership(&self, post_id: Uuid, category_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.posts.contains_key(&post_id) {
            return Err(Error::PostNotFound(post_id));
        }
        if !inner.categories.contains_key(&category_id) {
            return Err(Error::CategoryNotFound(category_id));
        }
        inner
            .memberships
            .entry(post_id)
            .or_default()
            .insert(category_id);
        Ok(())
    }

    async fn remove_membership(&self, post_id: Uuid, category_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(set) = inner.memberships.get_mut(&post_id) {
            set.remove(&category_id);
        }
        Ok(())
    }

    async fn memberships_of_post(&self, post_id: Uuid) -> Result<Vec<Uuid>> {
        let inner = self.inner.read().await;
        Ok(inner
            .memberships
            .get(&post_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn posts_in(&self, category_id: Uuid) -> Result<Vec<Uuid>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Uuid> = inner
            .memberships
            .iter()
            .filter(|(_, cats)| cats.contains(&category_id))
            .map(|(post, _)| *post)
            .collect();
        out.sort();
        Ok(out)
    }

    async fn count_distinct_posts_under(&self, category_id: Uuid) -> Result<usize> {
        let inner = self.inner.read().await;
        if !inner.categories.contains_key(&category_id) {
            return Err(Error::CategoryNotFound(category_id));
        }

        // BFS over the subtree, deduplicating posts across branches.
        let mut subtree = HashSet::new();
        let mut queue = VecDeque::from([category_id]);
        while let Some(current) = queue.pop_front() {
            if subtree.insert(current) {
                queue.extend(inner.children(current));
            }
        }

        let distinct: HashSet<Uuid> = inner
            .memberships
            .iter()
            .filter(|(_, cats)| cats.iter().any(|c| subtree.contains(c)))
            .map(|(post, _)| *post)
            .collect();
        Ok(distinct.len())
    }

    async fn delete_category(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.categories.remove(&id).is_none() {
            warn!(category_id = %id, "Deleting unknown category, ignoring");
            return Ok(());
        }
        inner.parents.remove(&id);
        // Detach children rather than cascading.
        inner.parents.retain(|_, parent| *parent != id);
        for set in inner.memberships.values_mut() {
            set.remove(&id);
        }
        Ok(())
    }

    async fn archive(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let category = inner
            .categories
            .get_mut(&id)
            .ok_or(Error::CategoryNotFound(id))?;
        category.state = CategoryState::Archived;
        Ok(())
    }

    async fn unarchive(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let category = inner
            .categories
            .get_mut(&id)
            .ok_or(Error::CategoryNotFound(id))?;
        category.state = CategoryState::Active;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Cleanup snapshot protocol
    // -------------------------------------------------------------------------

    async fn tag_originals(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        let originals: HashMap<Uuid, String> = inner
            .categories
            .iter()
            .map(|(id, c)| (*id, c.name.clone()))
            .collect();
        inner.snapshot.get_or_insert_with(Default::default).originals = originals;
        Ok(())
    }

    async fn clear_original_tags(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(snapshot) = inner.snapshot.as_mut() {
            snapshot.originals.clear();
            if snapshot.is_empty() {
                inner.snapshot = None;
            }
        }
        Ok(())
    }

    async fn has_original_tags(&self) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .snapshot
            .as_ref()
            .is_some_and(|s| !s.originals.is_empty()))
    }

    async fn is_original(&self, id: Uuid) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .snapshot
            .as_ref()
            .is_some_and(|s| s.originals.contains_key(&id)))
    }

    async fn original_name_of(&self, id: Uuid) -> Result<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .snapshot
            .as_ref()
            .and_then(|s| s.originals.get(&id).cloned()))
    }

    async fn mirror_edges(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        let memberships: Vec<(Uuid, Uuid)> = inner
            .memberships
            .iter()
            .flat_map(|(post, cats)| cats.iter().map(|c| (*post, *c)))
            .collect();
        let parent_edges: Vec<(Uuid, Uuid)> =
            inner.parents.iter().map(|(c, p)| (*c, *p)).collect();
        let snapshot = inner.snapshot.get_or_insert_with(Default::default);
        snapshot.memberships = memberships;
        snapshot.parent_edges = parent_edges;
        Ok(())
    }

    async fn restore_mirrored_edges(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(snapshot) = inner.snapshot.clone() else {
            return Ok(());
        };

        inner.memberships.clear();
        for (post, category) in &snapshot.memberships {
            // Skip edges whose endpoints no longer exist.
            if inner.posts.contains_key(post) && inner.categories.contains_key(category) {
                inner.memberships.entry(*post).or_default().insert(*category);
            }
        }

        inner.parents.clear();
        for (child, parent) in &snapshot.parent_edges {
            if inner.categories.contains_key(child) && inner.categories.contains_key(parent) {
                inner.parents.insert(*child, *parent);
            }
        }
        Ok(())
    }

    async fn delete_mirrored_edges(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(snapshot) = inner.snapshot.as_mut() {
            snapshot.memberships.clear();
            snapshot.parent_edges.clear();
            if snapshot.is_empty() {
                inner.snapshot = None;
            }
        }
        Ok(())
    }
}
