//! Typed errors for module lifecycle hooks.

use thiserror::Error;

/// Errors a module (or its factory) can report back to the host.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModuleError {
    /// The module's start hook failed.
    #[error("Module start failed: {0}")]
    StartFailed(String),

    /// The module's stop hook failed.
    #[error("Module stop failed: {0}")]
    StopFailed(String),

    /// The factory could not construct a module instance.
    #[error("Module construction failed: {0}")]
    ConstructionFailed(String),

    /// A hook panicked; the payload message is kept when it is a string.
    #[error("Module panicked: {0}")]
    Panicked(String),

    /// An I/O error surfaced inside a hook.
    #[error("Module I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for errors that don't fit the above categories.
    #[error("{0}")]
    Other(String),
}

impl ModuleError {
    /// Build a [`ModuleError::Panicked`] from a `catch_unwind` payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}

/// Result alias used by every module hook.
pub type ModuleResult<T> = Result<T, ModuleError>;
