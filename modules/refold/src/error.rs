//! Typed errors for actions, the store engine and selectors.

use thiserror::Error;

/// Errors raised while building or converting an [`Action`](crate::Action).
#[derive(Debug, Error)]
pub enum ActionError {
    /// Action types are tags; an empty tag can never be matched.
    #[error("action type must not be empty")]
    EmptyType,

    #[error("failed to encode action payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("failed to decode action {kind}: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// The value did not encode to an object with a string `type` field.
    #[error("value does not encode to a tagged action")]
    Untagged,
}

/// Errors raised by the store engine itself.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Effects are driven by a tokio task, so registering one needs a runtime.
    #[error("registering an effect requires a tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("effect task did not complete: {0}")]
    EffectTask(#[from] tokio::task::JoinError),
}

/// Why a store's state stream ended: the reducer panicked while folding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reducer panicked while folding {action}: {message}")]
pub struct FoldError {
    /// Type of the action being folded.
    pub action: String,
    pub message: String,
}

/// Emitted by a path selector, as its last item, when a source value cannot
/// be viewed as JSON.
#[derive(Debug, Error)]
#[error("selector source is not representable as JSON: {0}")]
pub struct SelectError(#[from] serde_json::Error);
