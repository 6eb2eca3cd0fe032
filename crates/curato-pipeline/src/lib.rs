//! # curato-pipeline
//!
//! The curato processing pipeline: chunked and bulk metadata extraction,
//! incremental taxonomy construction, reversible cleanup, and versioned
//! embedding reconciliation, all gated through an advisory run registry.
//!
//! [`Pipeline`] wires the pieces together; the individual engines are
//! public for callers that need finer control.

pub mod cleanup;
pub mod extractor;
pub mod orchestrator;
pub mod reconciler;
pub mod registry;
pub mod resolver;

pub use cleanup::{CleanupEngine, CleanupPlan, CleanupProposal, CleanupReport, ReassignTarget};
pub use extractor::Extractor;
pub use orchestrator::{ExtractionSummary, Pipeline, RunOutcome};
pub use reconciler::{ReconcileReport, Reconciler};
pub use registry::{JobRegistry, OperationKind, Progress, RunSnapshot, RunStatus, StartOutcome};
pub use resolver::{ResolutionOutcome, Resolver};
