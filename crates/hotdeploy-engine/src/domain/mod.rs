//! Hierarchical loading domains
//!
//! A [`RootDomain`] holds the types the host process provides and one child
//! [`BundleDomain`] per loaded bundle. Names are resolved root first, then
//! through each child in registration order; results are cached until the
//! defining child is unregistered.

pub(crate) mod archive;
mod bundle;
mod root;
mod types;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub use archive::{BundleArchive, MAX_ENTRY_BYTES};
pub use bundle::BundleDomain;
pub use root::RootDomain;
pub use types::{
    DomainId, FactoryCatalog, ResolvedType, TYPE_DEFINITION_DIR, TypeDefinition,
    is_valid_type_name,
};

use crate::error::DeployError;

/// Where a resource was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOrigin {
    /// Registered by the host on the root domain.
    Host,
    /// An entry of a bundle archive.
    Bundle { domain: DomainId, archive: PathBuf },
}

impl fmt::Display for ResourceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Bundle { archive, .. } => write!(f, "{}", archive.display()),
        }
    }
}

/// A named blob of bytes reachable through a domain.
#[derive(Debug, Clone)]
pub struct Resource {
    pub origin: ResourceOrigin,
    pub path: String,
    pub bytes: Arc<[u8]>,
}

impl Resource {
    /// `origin!path`, used in diagnostics.
    pub fn location(&self) -> String {
        format!("{}!{}", self.origin, self.path)
    }
}

/// Anything resources can be looked up through.
pub trait ResourceLookup {
    /// Every resource stored under `path`, in lookup order.
    fn find_resources(&self, path: &str) -> Result<Vec<Resource>, DeployError>;
}

/// Append `resource` unless one with identical content is already present.
pub(crate) fn push_distinct(found: &mut Vec<Resource>, resource: Resource) {
    if !found.iter().any(|r| r.bytes == resource.bytes) {
        found.push(resource);
    }
}
