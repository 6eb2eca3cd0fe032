//! Centralized default constants for curato.
//!
//! **This module is the single source of truth** for all shared default
//! values. Crates reference these constants instead of defining their own
//! magic numbers.

// =============================================================================
// EXTRACTION
// =============================================================================

/// Posts per synchronous extraction chunk (one provider request each).
pub const EXTRACTION_CHUNK_SIZE: usize = 20;

/// Default generation model for metadata extraction.
pub const GEN_MODEL: &str = "gpt-4o-mini";

/// Default request timeout for extraction calls, in seconds.
pub const EXTRACTION_TIMEOUT_SECS: u64 = 300;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name.
pub const EMBED_MODEL: &str = "text-embedding-3-small";

/// Default embedding vector dimension for text-embedding-3-small.
pub const EMBED_DIMENSION: usize = 1536;

/// Posts per embedding regeneration batch (one multi-input request each).
pub const EMBED_BATCH_SIZE: usize = 100;

// =============================================================================
// CLEANUP
// =============================================================================

/// Default minimum transitive post count below which a category is
/// proposed for deletion.
pub const CLEANUP_MIN_POSTS: usize = 5;

// =============================================================================
// PROVIDERS
// =============================================================================

/// Default OpenAI-compatible API endpoint.
pub const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default geocoding endpoint (Nominatim-compatible).
pub const GEOCODE_URL: &str = "https://nominatim.openstreetmap.org/search";

/// Default request timeout for geocoding calls, in seconds.
pub const GEOCODE_TIMEOUT_SECS: u64 = 30;
