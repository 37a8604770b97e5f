//! Public error types for vantage.
//!
//! One family per operation class: read paths return [`RetrievalError`],
//! write paths return [`MutationError`]. Every write path is
//! optimistic -> I/O -> confirm/rollback; rollback always precedes error
//! propagation.

use thiserror::Error;

/// The transport failed to execute a structured query.
#[derive(Debug, Error, Clone)]
#[error("transport error: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self { Self { message: message.into() } }
}

/// Error type for read operations.
///
/// Returned from: `LiveView::get`, `fetch`; `QuerySet::get`, `fetch`,
/// aggregate methods.
#[derive(Debug, Error, Clone)]
pub enum RetrievalError {
    /// Lookup failed locally and on the server
    #[error("does not exist")]
    DoesNotExist,

    /// A local get matched more than one row
    #[error("multiple objects returned: {0}")]
    MultipleObjectsReturned(usize),

    /// The executor failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Error type for mutation operations.
///
/// Returned from: `LiveView::create`, `update`, `delete`, `refresh`;
/// `OverfetchCache::reset`.
#[derive(Debug, Error, Clone)]
pub enum MutationError {
    /// Mutation on a destroyed view
    #[error("view is destroyed")]
    DestroyedView,

    /// The call is malformed (user error)
    #[error("invalid arguments: {0}")]
    InvalidArguments(&'static str),

    /// Refresh/reset attempted with a different entity model
    #[error("model mismatch: expected {expected}, got {actual}")]
    ModelMismatch { expected: String, actual: String },

    /// The executor failed; the optimistic contribution has been rolled back
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<RetrievalError> for MutationError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Transport(t) => MutationError::Transport(t),
            other => MutationError::Transport(TransportError::new(other.to_string())),
        }
    }
}
