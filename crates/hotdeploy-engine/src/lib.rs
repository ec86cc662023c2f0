//! hotdeploy engine
//!
//! Watches a directory for bundle archives and keeps the modules they provide
//! deployed while the host keeps running:
//!
//! - [`snapshot`]: polling the directory and detecting changes
//! - [`domain`]: isolated, hierarchical type resolution per bundle
//! - [`descriptor`]: discovering implementations through service descriptors
//! - [`bundle`] and [`container`]: loading bundles and driving module lifecycles
//! - [`deployer`]: the poll / undeploy / settle / start loop
//! - [`framework`]: the [`HotDeploy`] facade hosts embed
//!
//! # Bundle layout
//!
//! A bundle is a zip archive:
//!
//! ```text
//! META-INF/services/hotdeploy.Module   implementation names, one per line
//! types/alpha.Greeter.toml             implements / requires / factory
//! ```
//!
//! Type definitions bind to constructors the host registered in its
//! [`FactoryCatalog`]; a bundle carries names and wiring, the host links the code.

pub mod bundle;
pub mod config;
pub mod container;
pub mod deployer;
pub mod descriptor;
pub mod domain;
pub mod error;
pub mod framework;
pub mod listener;
pub mod snapshot;

pub use bundle::{Bundle, BundleContext, BundleId};
pub use config::{ConfigError, DeployerConfig};
pub use container::{ModuleContainer, ModuleState};
pub use deployer::{CycleOutcome, CycleSummary, Deployer, DeployerHandle, FailedBundle};
pub use domain::{
    BundleDomain, DomainId, FactoryCatalog, Resource, ResourceLookup, ResourceOrigin, ResolvedType,
    RootDomain,
};
pub use error::{DeployError, DeployResult, IntoDeployReport, ResolutionError};
pub use framework::{HotDeploy, HotDeployBuilder};
pub use listener::{DeploymentListener, LifecycleHook, ListenerSlot};
pub use snapshot::{FileRecord, Snapshot};

pub use hotdeploy_kernel::{
    MODULE_CAPABILITY, Module, ModuleError, ModuleFactory, ModuleResult, Priority,
    default_factory, factory_fn,
};
