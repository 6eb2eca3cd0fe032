//! Category label resolution.
//!
//! Turns extracted labels (`"Name"` or `"Parent/Name"`) into graph nodes
//! and edges. Resolution is find-or-create against the active set with
//! case-insensitive matching, so repeated labels converge on one node
//! regardless of capitalization. Posts are only ever linked to the leaf;
//! hierarchy rollups are derived at query time.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use curato_core::{Category, CategoryGraph, Error, Result};

/// Outcome counters for one post's labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionOutcome {
    /// Categories newly created during this resolution.
    pub created: usize,
    /// Membership edges added (idempotent re-links not counted).
    pub linked: usize,
    /// Labels dropped as malformed.
    pub skipped: usize,
    /// Labels whose graph writes failed.
    pub failed: usize,
}

/// Resolves extracted category labels into the taxonomy graph.
pub struct Resolver {
    graph: Arc<dyn CategoryGraph>,
}

impl Resolver {
    pub fn new(graph: Arc<dyn CategoryGraph>) -> Self {
        Self { graph }
    }

    /// Active category names, for steering the extraction model toward the
    /// existing taxonomy. Read fresh at the start of each pass, so names
    /// created by one pass are visible to the next.
    pub async fn known_category_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .graph
            .list_active()
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        Ok(names)
    }

    /// Resolve one post's labels into nodes and edges.
    ///
    /// Malformed labels (empty segments, more than two levels) are skipped
    /// with a warning rather than failing the post, and a label whose graph
    /// writes fail is counted and logged without aborting the rest. A
    /// parent edge the graph refuses (self-loop or cycle) is likewise
    /// absorbed; the leaf still gets created and linked.
    pub async fn resolve_labels(&self, post_id: Uuid, labels: &[String]) -> Result<ResolutionOutcome> {
        let mut outcome = ResolutionOutcome::default();

        for label in labels {
            match parse_label(label) {
                Some(ParsedLabel { parent, leaf }) => {
                    if let Err(e) = self.resolve_one(post_id, parent, leaf, &mut outcome).await {
                        warn!(
                            post_id = %post_id,
                            label,
                            error = %e,
                            "Label resolution failed, continuing with next label"
                        );
                        outcome.failed += 1;
                    }
                }
                None => {
                    warn!(post_id = %post_id, label, "Skipping malformed category label");
                    outcome.skipped += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn resolve_one(
        &self,
        post_id: Uuid,
        parent: Option<&str>,
        leaf: &str,
        outcome: &mut ResolutionOutcome,
    ) -> Result<()> {
        let leaf_cat = self.find_or_create(leaf, false, outcome).await?;

        if let Some(parent_name) = parent {
            // Self-referential labels like "Food/Food" resolve to the same
            // node; the graph would refuse the loop, so don't attempt it.
            if !parent_name.eq_ignore_ascii_case(leaf) {
                let parent_cat = self.find_or_create(parent_name, true, outcome).await?;
                if !parent_cat.is_parent {
                    self.graph.set_is_parent(parent_cat.id, true).await?;
                }
                if let Err(e) = self.graph.set_parent(leaf_cat.id, Some(parent_cat.id)).await {
                    warn!(
                        post_id = %post_id,
                        child = %leaf_cat.name,
                        parent = %parent_cat.name,
                        error = %e,
                        "Refused hierarchy edge, keeping membership only"
                    );
                }
            } else {
                warn!(post_id = %post_id, label = leaf, "Label names itself as parent, ignoring hierarchy");
            }
        }

        self.graph.add_membership(post_id, leaf_cat.id).await?;
        outcome.linked += 1;
        Ok(())
    }

    /// Find an active category by name or create it. A creation that loses
    /// a race to an identical name falls back to the winner.
    async fn find_or_create(
        &self,
        name: &str,
        is_parent: bool,
        outcome: &mut ResolutionOutcome,
    ) -> Result<Category> {
        if let Some(existing) = self.graph.find_by_name(name).await? {
            return Ok(existing);
        }
        match self.graph.create(name, is_parent).await {
            Ok(created) => {
                debug!(category_name = name, is_parent, "Created category");
                outcome.created += 1;
                Ok(created)
            }
            Err(Error::Graph(_)) => self
                .graph
                .find_by_name(name)
                .await?
                .ok_or_else(|| Error::Graph(format!("category '{}' vanished during create", name))),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct ParsedLabel<'a> {
    parent: Option<&'a str>,
    leaf: &'a str,
}

/// Split a label into at most two non-empty levels.
fn parse_label(label: &str) -> Option<ParsedLabel<'_>> {
    let mut parts = label.split('/').map(str::trim);
    let first = parts.next()?;
    let second = parts.next();
    if parts.next().is_some() {
        return None;
    }
    match second {
        Some(leaf) => {
            if first.is_empty() || leaf.is_empty() {
                None
            } else {
                Some(ParsedLabel {
                    parent: Some(first),
                    leaf,
                })
            }
        }
        None => {
            if first.is_empty() {
                None
            } else {
                Some(ParsedLabel {
                    parent: None,
                    leaf: first,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curato_core::{Post, PostRepository};
    use curato_graph::MemoryGraph;

    fn resolver() -> (Resolver, Arc<MemoryGraph>) {
        let graph = Arc::new(MemoryGraph::new());
        (Resolver::new(graph.clone()), graph)
    }

    async fn stored_post(graph: &MemoryGraph) -> Uuid {
        graph
            .insert(Post::new("src", Some("caption".into())))
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_label_levels() {
        assert_eq!(
            parse_label("Food"),
            Some(ParsedLabel {
                parent: None,
                leaf: "Food"
            })
        );
        assert_eq!(
            parse_label("Food/Italian"),
            Some(ParsedLabel {
                parent: Some("Food"),
                leaf: "Italian"
            })
        );
        assert_eq!(
            parse_label(" Food / Italian "),
            Some(ParsedLabel {
                parent: Some("Food"),
                leaf: "Italian"
            })
        );
        assert_eq!(parse_label(""), None);
        assert_eq!(parse_label("/Italian"), None);
        assert_eq!(parse_label("Food/"), None);
        assert_eq!(parse_label("A/B/C"), None);
    }

    #[tokio::test]
    async fn test_two_posts_same_label_share_nodes() {
        let (resolver, graph) = resolver();
        let post_a = stored_post(&graph).await;
        let post_b = stored_post(&graph).await;
        let labels = vec!["Food/Italian".to_string()];

        let first = resolver.resolve_labels(post_a, &labels).await.unwrap();
        let second = resolver.resolve_labels(post_b, &labels).await.unwrap();

        assert_eq!(first.created, 2);
        assert_eq!(second.created, 0);

        let all = graph.list_active().await.unwrap();
        assert_eq!(all.len(), 2);

        let italian = graph.find_by_name("italian").await.unwrap().unwrap();
        let food = graph.find_by_name("FOOD").await.unwrap().unwrap();
        assert!(food.is_parent);
        assert_eq!(graph.parent_of(italian.id).await.unwrap(), Some(food.id));

        // Both posts link to the leaf only.
        let in_italian = graph.posts_in(italian.id).await.unwrap();
        assert_eq!(in_italian.len(), 2);
        assert!(graph.posts_in(food.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolution_is_idempotent_per_post() {
        let (resolver, graph) = resolver();
        let post = stored_post(&graph).await;
        let labels = vec!["Food/Italian".to_string()];

        resolver.resolve_labels(post, &labels).await.unwrap();
        resolver.resolve_labels(post, &labels).await.unwrap();

        let italian = graph.find_by_name("Italian").await.unwrap().unwrap();
        assert_eq!(graph.posts_in(italian.id).await.unwrap(), vec![post]);
        assert_eq!(graph.list_active().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_case_insensitive_dedup() {
        let (resolver, graph) = resolver();
        let post = stored_post(&graph).await;

        resolver
            .resolve_labels(post, &["food".to_string(), "Food".to_string(), "FOOD".to_string()])
            .await
            .unwrap();

        assert_eq!(graph.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_self_parent_label_keeps_membership() {
        let (resolver, graph) = resolver();
        let post = stored_post(&graph).await;

        let outcome = resolver
            .resolve_labels(post, &["Food/Food".to_string()])
            .await
            .unwrap();

        assert_eq!(outcome.linked, 1);
        let food = graph.find_by_name("Food").await.unwrap().unwrap();
        assert_eq!(graph.parent_of(food.id).await.unwrap(), None);
        assert_eq!(graph.posts_in(food.id).await.unwrap(), vec![post]);
    }

    #[tokio::test]
    async fn test_malformed_labels_are_skipped_not_fatal() {
        let (resolver, graph) = resolver();
        let post = stored_post(&graph).await;

        let outcome = resolver
            .resolve_labels(
                post,
                &["".to_string(), "A/B/C".to_string(), "Travel".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.linked, 1);
        assert!(graph.find_by_name("Travel").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cycle_refused_but_resolution_continues() {
        let (resolver, graph) = resolver();
        let post = stored_post(&graph).await;

        // A is parent of B, then a label tries to invert it.
        resolver
            .resolve_labels(post, &["A/B".to_string()])
            .await
            .unwrap();
        let outcome = resolver
            .resolve_labels(post, &["B/A".to_string()])
            .await
            .unwrap();

        assert_eq!(outcome.linked, 1);
        let a = graph.find_by_name("A").await.unwrap().unwrap();
        let b = graph.find_by_name("B").await.unwrap().unwrap();
        // Original edge intact, inverted edge refused.
        assert_eq!(graph.parent_of(b.id).await.unwrap(), Some(a.id));
        assert_eq!(graph.parent_of(a.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_label_does_not_abort_remaining() {
        let (resolver, graph) = resolver();
        // Never inserted, so every membership write fails.
        let unknown = Uuid::new_v4();

        let outcome = resolver
            .resolve_labels(unknown, &["Food".to_string(), "Travel".to_string()])
            .await
            .unwrap();

        assert_eq!(outcome.failed, 2);
        assert_eq!(outcome.linked, 0);
        // The second label was still attempted after the first failed.
        assert!(graph.find_by_name("Food").await.unwrap().is_some());
        assert!(graph.find_by_name("Travel").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_known_names_sorted() {
        let (resolver, graph) = resolver();
        let post = stored_post(&graph).await;
        resolver
            .resolve_labels(post, &["Travel".to_string(), "Food".to_string()])
            .await
            .unwrap();

        let names = resolver.known_category_names().await.unwrap();
        assert_eq!(names, vec!["Food", "Travel"]);
    }
}
