//! Error taxonomy (§7). `UsageError` is diagnostic-only — the engine logs it
//! and keeps running; it is never returned from a read/write call. Action
//! errors are the one place a reactive-boundary error is actually surfaced
//! to the caller, via `Result`.

use thiserror::Error;

use crate::id::NodeId;

/// Usage errors: conditions the engine can detect but, per §4.2/§4.3,
/// chooses to log rather than refuse — refusing outright would make it
/// impossible to even observe the violation in a test. Lint rules (out of
/// scope here) are expected to upgrade these to hard failures at the source
/// level.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("a cell or observer named {0:?} is already registered")]
    DuplicateName(String),

    #[error("source {0} was written while a computed cell was recomputing")]
    WriteDuringComputed(NodeId),

    #[error("computed cell {0} read itself, directly or transitively")]
    CyclicComputed(NodeId),

    #[error("observer {0} exceeded its infinite-loop heuristic and was disposed")]
    ObserverLoopDetected(NodeId),
}

/// Errors surfaced to the caller of an [`crate::action::Action`] invocation.
#[derive(Debug, Error)]
pub enum ActionError<E> {
    /// This invocation was cancelled by a later `drop-previous` call.
    #[error("action invocation was cancelled by a newer call")]
    Cancelled,

    /// The action body itself returned an error.
    #[error("action body failed: {0}")]
    Body(E),
}

impl<E: PartialEq> PartialEq for ActionError<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ActionError::Cancelled, ActionError::Cancelled) => true,
            (ActionError::Body(a), ActionError::Body(b)) => a == b,
            _ => false,
        }
    }
}

/// Umbrella for cross-cutting engine-level failures: every [`UsageError`]
/// (via `From`) plus the body-panicked diagnostics an observer or computed
/// cell records when `catch_unwind` recovers from a panicking body. This is
/// what [`crate::runtime::take_cell_errors`] drains; it is never returned
/// from a read/write call, matching `UsageError`'s diagnostic-only contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CellError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("observer {0} body panicked: {1}")]
    ObserverPanicked(NodeId, String),

    #[error("computed cell {0} body panicked: {1}")]
    ComputedPanicked(NodeId, String),
}
