//! Error types and the single reporting hook.
//!
//! Errors raised while a watcher evaluates or reacts are funneled through
//! [`handle_error`], so that a single failing update never aborts the rest
//! of a flush.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::reactive::WatcherId;

/// Errors produced by the reactive core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    /// The tracked function of a watcher failed.
    #[error("error in getter for watcher \"{expression}\": {message}")]
    Evaluation {
        watcher: WatcherId,
        expression: String,
        message: String,
    },

    /// A watcher callback failed while reacting to a change.
    #[error("error in callback for watcher \"{expression}\": {message}")]
    Callback {
        watcher: WatcherId,
        expression: String,
        message: String,
    },

    /// A watcher re-entered the queue too many times within one flush.
    #[error("you may have an infinite update loop in watcher \"{expression}\" ({watcher} re-entered {count} times)")]
    InfiniteUpdateLoop {
        watcher: WatcherId,
        expression: String,
        count: usize,
    },

    /// Reactive add / delete was attempted on a primitive.
    #[error("cannot {operation} reactive property on undefined, null, or primitive value: {value}")]
    InvalidTarget {
        operation: &'static str,
        value: String,
    },

    /// A watch path was not a simple dot-delimited path.
    #[error("failed watching path \"{0}\": only simple dot-delimited paths are accepted")]
    InvalidWatchPath(String),

    /// A configuration document could not be parsed.
    #[error("invalid scheduler config: {0}")]
    Config(String),

    /// Raised by user code from inside getters and callbacks.
    #[error("{0}")]
    Custom(String),
}

impl ReactiveError {
    /// Build a [`ReactiveError::Custom`] from any message.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

type ErrorHandler = Arc<dyn Fn(&ReactiveError) + Send + Sync>;

static ERROR_HANDLER: RwLock<Option<ErrorHandler>> = RwLock::new(None);

/// Install the host error hook.
///
/// Replaces any previously installed handler.
pub fn set_error_handler<F>(handler: F)
where
    F: Fn(&ReactiveError) + Send + Sync + 'static,
{
    *ERROR_HANDLER.write() = Some(Arc::new(handler));
}

/// Remove the host error hook; reported errors are logged again.
pub fn clear_error_handler() {
    *ERROR_HANDLER.write() = None;
}

/// Report an error that must not propagate.
///
/// Calls the installed handler, or logs through `tracing` when there is none.
pub fn handle_error(err: ReactiveError) {
    // Clone the handler out so it may itself install a new one.
    let handler = ERROR_HANDLER.read().clone();
    match handler {
        Some(handler) => handler(&err),
        None => tracing::error!(error = %err, "unhandled reactive error"),
    }
}
