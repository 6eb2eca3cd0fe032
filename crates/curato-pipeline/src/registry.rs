//! Advisory run registry.
//!
//! One long-running operation per kind at a time, enforced by an in-memory
//! check-and-set gate. The gate is advisory: it protects a single process
//! against double-triggering, nothing more. The registry also owns the
//! per-batch result cache and the in-flight materialization guard for bulk
//! extraction jobs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use curato_core::Extraction;

// =============================================================================
// RUN STATE
// =============================================================================

/// Kinds of long-running operations the registry gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Extraction,
    Cleanup,
    EmbeddingRefresh,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Cleanup => "cleanup",
            Self::EmbeddingRefresh => "embedding_refresh",
        }
    }
}

/// Lifecycle of the most recent run of an operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Done,
    Error,
}

/// Counters surfaced while a run is in flight and after it ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(default)]
    pub message: Option<String>,
}

/// Point-in-time view of one operation kind's latest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub kind: OperationKind,
    pub status: RunStatus,
    pub progress: Progress,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
struct RunState {
    status: RunStatus,
    progress: Progress,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Outcome of attempting to start a run.
pub enum StartOutcome {
    /// The gate was free; hold the guard for the duration of the run.
    Started(RunGuard),
    /// A run of this kind is already in flight.
    AlreadyRunning(RunSnapshot),
}

/// In-memory registry of run gates and batch result bookkeeping.
#[derive(Default)]
pub struct JobRegistry {
    runs: Mutex<HashMap<OperationKind, RunState>>,
    batch_cache: Mutex<HashMap<String, Vec<(Uuid, Extraction)>>>,
    materializing: Mutex<HashSet<String>>,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attempt to claim the gate for an operation kind.
    ///
    /// The check and the transition to `Running` happen under one lock, so
    /// two concurrent triggers cannot both start.
    pub fn try_start(self: &Arc<Self>, kind: OperationKind) -> StartOutcome {
        let mut runs = self.runs.lock().unwrap();
        let state = runs.entry(kind).or_default();

        if state.status == RunStatus::Running {
            debug!(run_kind = kind.as_str(), "Run already in flight, refusing start");
            return StartOutcome::AlreadyRunning(snapshot_of(kind, state));
        }

        *state = RunState {
            status: RunStatus::Running,
            progress: Progress::default(),
            started_at: Some(Utc::now()),
            finished_at: None,
        };
        debug!(run_kind = kind.as_str(), op = "start", "Run started");

        StartOutcome::Started(RunGuard {
            registry: Arc::clone(self),
            kind,
            finished: false,
        })
    }

    /// Latest run snapshot for a kind. Never blocks a running operation.
    pub fn status(&self, kind: OperationKind) -> RunSnapshot {
        let runs = self.runs.lock().unwrap();
        match runs.get(&kind) {
            Some(state) => snapshot_of(kind, state),
            None => RunSnapshot {
                kind,
                status: RunStatus::Idle,
                progress: Progress::default(),
                started_at: None,
                finished_at: None,
            },
        }
    }

    fn set_progress(&self, kind: OperationKind, progress: Progress) {
        let mut runs = self.runs.lock().unwrap();
        if let Some(state) = runs.get_mut(&kind) {
            state.progress = progress;
        }
    }

    fn finish(&self, kind: OperationKind, status: RunStatus, message: Option<String>) {
        let mut runs = self.runs.lock().unwrap();
        if let Some(state) = runs.get_mut(&kind) {
            state.status = status;
            state.finished_at = Some(Utc::now());
            if message.is_some() {
                state.progress.message = message;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Batch result bookkeeping
    // -------------------------------------------------------------------------

    /// Results already materialized for a batch, if any.
    pub fn cached_results(&self, batch_id: &str) -> Option<Vec<(Uuid, Extraction)>> {
        self.batch_cache.lock().unwrap().get(batch_id).cloned()
    }

    /// Cache the materialized results of a batch.
    pub fn store_results(&self, batch_id: &str, results: Vec<(Uuid, Extraction)>) {
        self.batch_cache
            .lock()
            .unwrap()
            .insert(batch_id.to_string(), results);
    }

    /// Claim the materialization slot for a batch. Returns false when
    /// another caller is already fetching and applying its results.
    pub fn try_begin_materialize(&self, batch_id: &str) -> bool {
        self.materializing
            .lock()
            .unwrap()
            .insert(batch_id.to_string())
    }

    /// Release the materialization slot.
    pub fn end_materialize(&self, batch_id: &str) {
        self.materializing.lock().unwrap().remove(batch_id);
    }

    /// Whether a batch is currently being materialized.
    pub fn is_materializing(&self, batch_id: &str) -> bool {
        self.materializing.lock().unwrap().contains(batch_id)
    }
}

fn snapshot_of(kind: OperationKind, state: &RunState) -> RunSnapshot {
    RunSnapshot {
        kind,
        status: state.status,
        progress: state.progress.clone(),
        started_at: state.started_at,
        finished_at: state.finished_at,
    }
}

// =============================================================================
// RUN GUARD
// =============================================================================

/// Handle held by the single active run of an operation kind.
///
/// Dropping the guard without finishing marks the run as errored so the
/// gate never wedges shut after a panic or early return.
pub struct RunGuard {
    registry: Arc<JobRegistry>,
    kind: OperationKind,
    finished: bool,
}

impl RunGuard {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Publish updated counters for status polls.
    pub fn set_progress(&self, progress: Progress) {
        self.registry.set_progress(self.kind, progress);
    }

    /// Mark the run finished successfully and release the gate.
    pub fn finish_ok(mut self) {
        self.finished = true;
        self.registry.finish(self.kind, RunStatus::Done, None);
    }

    /// Mark the run failed with a message and release the gate.
    pub fn finish_err(mut self, message: impl Into<String>) {
        self.finished = true;
        self.registry
            .finish(self.kind, RunStatus::Error, Some(message.into()));
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(run_kind = self.kind.as_str(), "Run guard dropped without finishing");
            self.registry.finish(
                self.kind,
                RunStatus::Error,
                Some("run aborted".to_string()),
            );
        }
    }
}
