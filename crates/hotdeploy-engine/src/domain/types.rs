//! Resolved types, type definitions and the factory catalog.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hotdeploy_kernel::{Module, ModuleError, ModuleFactory};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::error::{DeployError, ResolutionError};

/// Directory inside a bundle archive holding type definitions.
pub const TYPE_DEFINITION_DIR: &str = "types/";

/// Identifier of a loading domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(u64);

impl DomainId {
    /// The process-wide root domain.
    pub const ROOT: DomainId = DomainId(0);

    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "root")
        } else {
            write!(f, "bundle-{}", self.0)
        }
    }
}

/// Whether `name` is a well-formed type name.
///
/// Accepts dotted identifiers such as `alpha.Greeter` or `alpha.Outer$Inner`.
pub fn is_valid_type_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '$' | '-' | ':'))
}

/// A type as seen after resolution: where it came from and what it links to.
pub struct ResolvedType {
    name: String,
    owner: DomainId,
    implements: Vec<String>,
    links: Vec<Arc<ResolvedType>>,
    factory_name: String,
    factory: Option<ModuleFactory>,
}

impl ResolvedType {
    pub(crate) fn new(
        name: &str,
        owner: DomainId,
        implements: Vec<String>,
        links: Vec<Arc<ResolvedType>>,
        factory_name: &str,
        factory: Option<ModuleFactory>,
    ) -> Self {
        Self {
            name: name.to_string(),
            owner,
            implements,
            links,
            factory_name: factory_name.to_string(),
            factory,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The domain that defined this type.
    pub fn owner(&self) -> DomainId {
        self.owner
    }

    /// Whether the type is, or implements, `capability`.
    ///
    /// Follows the `implements` chain through linked types, so a type
    /// implementing `beta.Base` also implements whatever `beta.Base` does.
    pub fn implements(&self, capability: &str) -> bool {
        if self.name == capability || self.implements.iter().any(|c| c == capability) {
            return true;
        }
        self.links
            .iter()
            .filter(|l| self.implements.iter().any(|c| c == l.name()))
            .any(|l| l.implements(capability))
    }

    /// Types linked while defining this one.
    pub fn links(&self) -> &[Arc<ResolvedType>] {
        &self.links
    }

    /// Whether a constructor is bound to this type.
    pub fn is_instantiable(&self) -> bool {
        self.factory.is_some()
    }

    /// Construct a module instance through the bound factory.
    pub fn instantiate(&self) -> Result<Box<dyn Module>, DeployError> {
        let factory = self.factory.as_ref().ok_or_else(|| DeployError::Instantiation {
            type_name: self.name.clone(),
            reason: format!("no factory registered under `{}`", self.factory_name),
        })?;

        let outcome = match catch_unwind(AssertUnwindSafe(|| factory())) {
            Ok(outcome) => outcome,
            Err(payload) => Err(ModuleError::from_panic(payload.as_ref())),
        };

        outcome.map_err(|e| DeployError::Instantiation {
            type_name: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for ResolvedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedType")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("implements", &self.implements)
            .field(
                "links",
                &self.links.iter().map(|l| l.name()).collect::<Vec<_>>(),
            )
            .field("factory", &self.factory_name)
            .field("instantiable", &self.factory.is_some())
            .finish()
    }
}

/// Contents of a `types/<name>.toml` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDefinition {
    /// Capabilities (or other types) this type implements; linked on definition.
    #[serde(default)]
    pub implements: Vec<String>,
    /// Types that must be resolvable before this one links.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Catalog key of the constructor; defaults to the type name.
    #[serde(default)]
    pub factory: Option<String>,
}

impl TypeDefinition {
    /// Archive path of the definition entry for `type_name`.
    pub fn entry_path(type_name: &str) -> String {
        format!("{TYPE_DEFINITION_DIR}{type_name}.toml")
    }

    pub fn parse(type_name: &str, text: &str) -> Result<Self, ResolutionError> {
        let definition: TypeDefinition =
            toml::from_str(text).map_err(|e| ResolutionError::Definition {
                type_name: type_name.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(bad) = definition
            .implements
            .iter()
            .chain(definition.requires.iter())
            .find(|n| !is_valid_type_name(n))
        {
            return Err(ResolutionError::Definition {
                type_name: type_name.to_string(),
                reason: format!("invalid type name `{bad}`"),
            });
        }

        Ok(definition)
    }

    /// Every name that must link: implemented types first, then requirements.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.implements
            .iter()
            .chain(self.requires.iter())
            .map(String::as_str)
    }

    pub fn factory_name<'a>(&'a self, type_name: &'a str) -> &'a str {
        self.factory.as_deref().unwrap_or(type_name)
    }
}

/// Constructors the host process can bind bundle types to.
///
/// Cloning is cheap; all clones share the same table.
#[derive(Clone, Default)]
pub struct FactoryCatalog {
    factories: Arc<RwLock<HashMap<String, ModuleFactory>>>,
}

impl FactoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register(&self, name: &str, factory: ModuleFactory) {
        self.factories.write().insert(name.to_string(), factory);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.factories.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<ModuleFactory> {
        self.factories.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for FactoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryCatalog")
            .field("names", &self.names())
            .finish()
    }
}
