//! # curato-inference
//!
//! Provider clients for the curato pipeline: an OpenAI-compatible backend
//! for structured extraction (chunked and bulk batch) and embeddings, and
//! a Nominatim client for geocoding.
//!
//! Enable the `mock` feature for deterministic in-process backends.

pub mod geocode;
pub mod openai;

#[cfg(feature = "mock")]
pub mod mock;

pub use geocode::{NominatimConfig, NominatimGeocoder};
pub use openai::{OpenAIBackend, OpenAIConfig};
