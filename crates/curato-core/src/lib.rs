//! # curato-core
//!
//! Core types, traits, and abstractions for the curato taxonomy pipeline.
//!
//! This crate provides the foundational data structures and trait
//! definitions that other curato crates depend on: the post/category data
//! model, the graph-store and provider contracts, and shared defaults.

pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
