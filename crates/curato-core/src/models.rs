//! Data model types for curato.
//!
//! Posts and categories are the two durable entities; everything else here
//! is either a value object (extraction payloads, geo points) or lifecycle
//! bookkeeping (batch jobs, cleanup snapshots).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// POSTS
// =============================================================================

/// Embedding freshness marker for a post.
///
/// The version only moves forward (0 → 1 → 2) except on explicit metadata
/// edits by a user, which reset it to `CaptionOnly` so the next refresh
/// re-embeds with the corrected fields.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingVersion {
    /// No embedding stored.
    #[default]
    None,
    /// Embedded from the raw caption only.
    CaptionOnly,
    /// Embedded from caption plus enrichment (categories, location, tags).
    Enriched,
}

impl EmbeddingVersion {
    /// Numeric representation (0/1/2) used in progress surfaces.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::CaptionOnly => 1,
            Self::Enriched => 2,
        }
    }
}

/// Who last touched a post's enrichment fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EditedBy {
    /// A human edited the metadata; model output must not clobber it.
    User,
    /// The extraction model wrote the fields.
    #[default]
    Model,
}

/// Normalized geocoding result for a location string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
}

/// A saved social-media post with its enrichment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    /// Immutable external identifier (e.g. the Instagram media id).
    pub source_id: String,
    pub caption: Option<String>,
    pub owner: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    pub location: Option<String>,
    pub venue: Option<String>,
    pub event_date: Option<String>,
    pub geo: Option<GeoPoint>,
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub embedding_version: EmbeddingVersion,
    #[serde(default)]
    pub last_edited_by: EditedBy,
    pub created_at: DateTime<Utc>,
}

impl Post {
    /// Create a bare post from an external id and optional caption.
    pub fn new(source_id: impl Into<String>, caption: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            caption,
            owner: None,
            hashtags: Vec::new(),
            mentions: Vec::new(),
            location: None,
            venue: None,
            event_date: None,
            geo: None,
            embedding: None,
            embedding_version: EmbeddingVersion::None,
            last_edited_by: EditedBy::Model,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// CATEGORIES
// =============================================================================

/// Lifecycle state of a category.
///
/// `Archived` is the soft-deleted state a cleanup run moves categories into;
/// archived categories are invisible to resolution and analysis but remain
/// restorable until the cleanup is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CategoryState {
    #[default]
    Active,
    Archived,
}

/// A taxonomy node. Names are globally unique, case-insensitively.
///
/// Post counts are always derived from membership edges, never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    /// True once any category has declared this one as its parent.
    pub is_parent: bool,
    /// Optional embedding for future clustering work.
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub state: CategoryState,
    pub created_at: DateTime<Utc>,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            is_parent: false,
            embedding: None,
            state: CategoryState::Active,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// EXTRACTION PAYLOADS
// =============================================================================

/// Per-field audit strings explaining why the model chose each value.
///
/// Every field is optional; a missing reason deserializes to `None` rather
/// than failing the whole payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReasons {
    #[serde(default)]
    pub hashtags: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub categories: Option<String>,
    #[serde(default)]
    pub event_date: Option<String>,
    #[serde(default)]
    pub mentions: Option<String>,
}

/// Structured metadata extracted from a caption by the model.
///
/// Defaulting rules: missing list → empty, missing scalar → `None`. The
/// payload is deserialized strictly into this shape; unknown model output
/// is never coerced ad hoc.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    /// Category labels: `"Name"` or `"Parent/Name"`.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub event_date: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub reasons: ExtractionReasons,
}

// =============================================================================
// BATCH JOBS
// =============================================================================

/// Lifecycle of an asynchronous bulk extraction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Submitted,
    InProgress,
    Ended,
    ResultsProcessing,
    Done,
    Failed,
}

impl BatchState {
    /// Whether the provider-side job has finished (results fetchable).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::InProgress => "in_progress",
            Self::Ended => "ended",
            Self::ResultsProcessing => "results_processing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Receipt for a submitted bulk extraction job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub batch_id: String,
    pub request_count: usize,
}

/// Non-destructive poll result for a bulk extraction job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub state: BatchState,
    pub completed: usize,
    pub total: usize,
}
