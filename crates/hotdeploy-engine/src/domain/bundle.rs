//! Per-bundle loading domain.

use std::path::Path;
use std::sync::{Arc, Weak};

use tracing::trace;

use super::{
    BundleArchive, DomainId, Resource, ResourceLookup, ResolvedType, RootDomain, TypeDefinition,
};
use crate::error::{DeployError, ResolutionError};

/// The domain of one loaded bundle, backed by its staged archive.
///
/// Definitions are local, resolution is not: every name a definition links to
/// goes back through the root, so a bundle sees host types first and then the
/// types of every other registered bundle.
pub struct BundleDomain {
    id: DomainId,
    label: String,
    archive: BundleArchive,
    root: Weak<RootDomain>,
}

impl BundleDomain {
    /// Open a domain over the archive at `path`. The caller registers it.
    pub fn open(label: &str, path: &Path, root: &Arc<RootDomain>) -> Result<Arc<Self>, DeployError> {
        let id = DomainId::next();
        let archive = BundleArchive::open_for(path, id)?;
        Ok(Arc::new(Self {
            id,
            label: label.to_string(),
            archive,
            root: Arc::downgrade(root),
        }))
    }

    pub fn id(&self) -> DomainId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn archive_path(&self) -> &Path {
        self.archive.path()
    }

    /// Whether this bundle carries a definition for `name`.
    pub fn defines(&self, name: &str) -> bool {
        self.archive.contains(&TypeDefinition::entry_path(name))
    }

    /// Define `name` from this bundle's archive.
    ///
    /// Returns `Ok(None)` when the archive has no definition for it. Linking
    /// goes through the root, so it can recurse into other domains.
    pub fn define(&self, name: &str) -> Result<Option<Arc<ResolvedType>>, ResolutionError> {
        let entry = TypeDefinition::entry_path(name);
        let bytes = match self.archive.read_entry(&entry) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(e) => {
                return Err(ResolutionError::Definition {
                    type_name: name.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        let text = String::from_utf8(bytes).map_err(|_| ResolutionError::Definition {
            type_name: name.to_string(),
            reason: format!("{entry} is not valid UTF-8"),
        })?;
        let definition = TypeDefinition::parse(name, &text)?;

        let root = self.root()?;
        trace!(domain = %self.id, type_name = %name, "Linking type definition");

        let mut links = Vec::new();
        for dependency in definition.dependencies() {
            let linked = root.resolve(dependency).map_err(|source| ResolutionError::Link {
                type_name: name.to_string(),
                dependency: dependency.to_string(),
                source: Box::new(source),
            })?;
            links.push(linked);
        }

        let factory_name = definition.factory_name(name);
        let factory = root.catalog().get(factory_name);

        Ok(Some(Arc::new(ResolvedType::new(
            name,
            self.id,
            definition.implements.clone(),
            links,
            factory_name,
            factory,
        ))))
    }

    /// Resolve `name` the way code inside this bundle sees it: root first.
    pub fn resolve(&self, name: &str) -> Result<Arc<ResolvedType>, ResolutionError> {
        self.root()?.resolve(name)
    }

    /// Resources stored in this bundle's own archive only.
    pub fn local_resources(&self, path: &str) -> Result<Vec<Resource>, DeployError> {
        self.archive.find_resources(path)
    }

    fn root(&self) -> Result<Arc<RootDomain>, ResolutionError> {
        self.root.upgrade().ok_or_else(|| ResolutionError::Definition {
            type_name: self.label.clone(),
            reason: "root domain has been dropped".to_string(),
        })
    }
}

impl ResourceLookup for BundleDomain {
    fn find_resources(&self, path: &str) -> Result<Vec<Resource>, DeployError> {
        self.local_resources(path)
    }
}

impl std::fmt::Debug for BundleDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleDomain")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("archive", &self.archive.path())
            .finish()
    }
}
