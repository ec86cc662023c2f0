//! The process-wide root domain.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use hotdeploy_kernel::MODULE_CAPABILITY;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::{
    BundleDomain, DomainId, FactoryCatalog, Resource, ResourceLookup, ResourceOrigin,
    ResolvedType, push_distinct,
};
use crate::error::{DeployError, ResolutionError};

type GuardKey = (ThreadId, String);

#[derive(Default)]
struct ResolutionState {
    cache: HashMap<String, Arc<ResolvedType>>,
    in_flight: HashSet<GuardKey>,
    resources_in_flight: HashSet<GuardKey>,
}

/// Root of the domain tree.
///
/// Lock order is `state` then `children`; `state` is only ever held for a
/// single lookup, insert or purge and never across a nested resolution.
pub struct RootDomain {
    catalog: FactoryCatalog,
    host_types: RwLock<HashMap<String, Arc<ResolvedType>>>,
    host_resources: RwLock<Vec<Resource>>,
    state: Mutex<ResolutionState>,
    children: RwLock<Vec<Arc<BundleDomain>>>,
}

impl RootDomain {
    /// Create a root domain whose host types include the module capability.
    pub fn new(catalog: FactoryCatalog) -> Arc<Self> {
        let root = Arc::new(Self {
            catalog,
            host_types: RwLock::new(HashMap::new()),
            host_resources: RwLock::new(Vec::new()),
            state: Mutex::new(ResolutionState::default()),
            children: RwLock::new(Vec::new()),
        });
        root.register_host_type(MODULE_CAPABILITY, &[]);
        root
    }

    pub fn catalog(&self) -> &FactoryCatalog {
        &self.catalog
    }

    /// Declare a type provided by the host process itself.
    ///
    /// Host types win over every bundle definition of the same name. A host
    /// type is instantiable when the catalog has a factory under its name.
    pub fn register_host_type(&self, name: &str, implements: &[&str]) {
        let ty = ResolvedType::new(
            name,
            DomainId::ROOT,
            implements.iter().map(|s| s.to_string()).collect(),
            Vec::new(),
            name,
            self.catalog.get(name),
        );
        self.host_types.write().insert(name.to_string(), Arc::new(ty));
    }

    pub fn has_host_type(&self, name: &str) -> bool {
        self.host_types.read().contains_key(name)
    }

    /// Make `bytes` visible under `path` ahead of every bundle's resources.
    pub fn register_host_resource(&self, path: &str, bytes: impl Into<Arc<[u8]>>) {
        self.host_resources.write().push(Resource {
            origin: ResourceOrigin::Host,
            path: path.to_string(),
            bytes: bytes.into(),
        });
    }

    /// Resolve `name`: host types first, then each bundle domain in
    /// registration order. Successful results are cached.
    pub fn resolve(&self, name: &str) -> Result<Arc<ResolvedType>, ResolutionError> {
        let key = (thread::current().id(), name.to_string());
        {
            let mut state = self.state.lock();
            if state.in_flight.contains(&key) {
                return Err(ResolutionError::Cycle {
                    type_name: name.to_string(),
                });
            }
            if let Some(cached) = state.cache.get(name) {
                trace!(type_name = %name, "Resolution cache hit");
                return Ok(cached.clone());
            }
            state.in_flight.insert(key.clone());
        }

        let result = self.lookup(name);

        let mut state = self.state.lock();
        state.in_flight.remove(&key);
        let resolved = result?;
        // Skip caching when the owner was unregistered mid-resolution.
        if !resolved.owner().is_root() && !self.is_registered(resolved.owner()) {
            return Ok(resolved);
        }
        // A concurrent resolution may have cached the name first; it wins.
        Ok(state
            .cache
            .entry(name.to_string())
            .or_insert(resolved)
            .clone())
    }

    fn lookup(&self, name: &str) -> Result<Arc<ResolvedType>, ResolutionError> {
        if let Some(host) = self.host_types.read().get(name) {
            return Ok(host.clone());
        }

        let children = self.children.read().clone();
        let mut first_failure = None;
        for child in children {
            match child.define(name) {
                Ok(Some(resolved)) => {
                    trace!(type_name = %name, domain = %child.id(), "Defined type");
                    return Ok(resolved);
                }
                Ok(None) => {}
                Err(e) => {
                    trace!(type_name = %name, domain = %child.id(), error = %e, "Definition failed to link");
                    first_failure.get_or_insert(e);
                }
            }
        }

        Err(first_failure.unwrap_or_else(|| ResolutionError::NotFound {
            type_name: name.to_string(),
        }))
    }

    /// Append a bundle domain to the lookup order.
    pub fn register(&self, domain: Arc<BundleDomain>) {
        debug!(domain = %domain.id(), bundle = %domain.label(), "Registered bundle domain");
        self.children.write().push(domain);
    }

    /// Remove a bundle domain and purge every cache entry it owns.
    ///
    /// Returns the number of purged cache entries.
    pub fn unregister(&self, id: DomainId) -> usize {
        let removed = {
            let mut children = self.children.write();
            let before = children.len();
            children.retain(|c| c.id() != id);
            before != children.len()
        };

        let mut state = self.state.lock();
        let before = state.cache.len();
        state.cache.retain(|_, ty| ty.owner() != id);
        let purged = before - state.cache.len();

        if removed {
            debug!(domain = %id, purged, "Unregistered bundle domain");
        }
        purged
    }

    pub fn is_registered(&self, id: DomainId) -> bool {
        self.children.read().iter().any(|c| c.id() == id)
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.state.lock().cache.contains_key(name)
    }

    pub fn cached_type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().cache.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Drop every bundle domain and the whole cache. Host types are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.cache.clear();
        self.children.write().clear();
    }

    /// Every resource stored under `path`: host resources first, then each
    /// registered bundle in registration order, deduplicated by content.
    pub fn resources(&self, path: &str) -> Result<Vec<Resource>, DeployError> {
        self.find_resources(path)
    }
}

impl ResourceLookup for RootDomain {
    /// Host resources first, then every bundle in registration order,
    /// deduplicated by content.
    fn find_resources(&self, path: &str) -> Result<Vec<Resource>, DeployError> {
        let key = (thread::current().id(), path.to_string());
        if !self.state.lock().resources_in_flight.insert(key.clone()) {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for resource in self.host_resources.read().iter().filter(|r| r.path == path) {
            push_distinct(&mut found, resource.clone());
        }

        let children = self.children.read().clone();
        let mut result = Ok(());
        for child in children {
            match child.local_resources(path) {
                Ok(resources) => {
                    for resource in resources {
                        push_distinct(&mut found, resource);
                    }
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        self.state.lock().resources_in_flight.remove(&key);
        result.map(|()| found)
    }
}

impl std::fmt::Debug for RootDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootDomain")
            .field("host_types", &self.host_types.read().len())
            .field("children", &self.child_count())
            .field("cached", &self.state.lock().cache.len())
            .finish()
    }
}
