//! # curato-graph
//!
//! In-memory graph store for the curato taxonomy pipeline.
//!
//! Implements the [`curato_core::PostRepository`] and
//! [`curato_core::CategoryGraph`] contracts over a single lock-guarded
//! state, including the cleanup-snapshot bookkeeping (original tags,
//! preserved names, mirrored edges) the cleanup engine builds on.

pub mod memory;

pub use memory::{CleanupSnapshot, MemoryGraph};
