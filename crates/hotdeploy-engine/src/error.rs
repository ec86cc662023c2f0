//! Error types for the deployment engine.
//!
//! [`DeployError`] covers every way a bundle can fail to come up. Failures of a
//! single bundle's load are recorded on that bundle and turned into a retry by
//! the deployer; only the facade surfaces errors to the host, wrapped in
//! [`error_stack::Report`] via [`DeployResult`].

use std::path::PathBuf;

use error_stack::Report;
use thiserror::Error;

use crate::config::ConfigError;

/// A type name could not be resolved through the domain hierarchy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolutionError {
    /// No domain defines the type.
    #[error("Type not found: {type_name}")]
    NotFound { type_name: String },

    /// The type is already being resolved on this thread.
    #[error("Resolution cycle detected at type: {type_name}")]
    Cycle { type_name: String },

    /// The type is defined but one of its dependencies cannot be resolved.
    #[error("Type {type_name} cannot link {dependency}: {source}")]
    Link {
        type_name: String,
        dependency: String,
        #[source]
        source: Box<ResolutionError>,
    },

    /// The type's definition entry exists but is unreadable or malformed.
    #[error("Invalid definition for type {type_name}: {reason}")]
    Definition { type_name: String, reason: String },
}

impl ResolutionError {
    /// The type whose resolution failed.
    pub fn type_name(&self) -> &str {
        match self {
            Self::NotFound { type_name }
            | Self::Cycle { type_name }
            | Self::Link { type_name, .. }
            | Self::Definition { type_name, .. } => type_name,
        }
    }

    /// The innermost type that could not be found, following `Link` chains.
    pub fn root_cause(&self) -> &ResolutionError {
        match self {
            Self::Link { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Deployment engine error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeployError {
    /// The bundle file could not be copied into the staging directory.
    #[error("Cannot stage bundle {bundle}: {source}")]
    Staging {
        bundle: String,
        #[source]
        source: std::io::Error,
    },

    /// A required type could not be resolved.
    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    /// A service descriptor exists but is unreadable or malformed.
    #[error("Invalid service descriptor {resource}: {reason}")]
    Descriptor { resource: String, reason: String },

    /// A discovered implementation could not be constructed.
    #[error("Cannot instantiate {type_name}: {reason}")]
    Instantiation { type_name: String, reason: String },

    /// The bounded retry gave up with bundles still unresolved.
    #[error("Deploy settling exceeded after {attempts} attempts; unresolved bundles: {unresolved:?}")]
    SettlingExceeded {
        attempts: usize,
        unresolved: Vec<String>,
    },

    /// The bundle archive could not be opened or read.
    #[error("Cannot read bundle archive {}: {reason}", .path.display())]
    Archive { path: PathBuf, reason: String },

    /// Invalid deployer configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A low-level I/O error outside bundle staging.
    #[error("Deployment I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// The offending type name, when the failure is tied to one.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Resolution(err) => Some(err.type_name()),
            Self::Instantiation { type_name, .. } => Some(type_name),
            _ => None,
        }
    }

    /// Whether this failure may clear up once other bundles are loaded.
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution(_))
    }
}

/// Facade result alias using [`error_stack::Report`].
///
/// Equivalent to `Result<T, error_stack::Report<DeployError>>`.
pub type DeployResult<T> = Result<T, Report<DeployError>>;

/// Extension trait to convert `Result<T, DeployError>` into [`DeployResult<T>`].
pub trait IntoDeployReport<T> {
    /// Wrap the error in an `error_stack::Report`.
    fn into_report(self) -> DeployResult<T>;
}

impl<T, E> IntoDeployReport<T> for Result<T, E>
where
    E: Into<DeployError>,
{
    #[inline]
    fn into_report(self) -> DeployResult<T> {
        self.map_err(|e| Report::new(e.into()))
    }
}
