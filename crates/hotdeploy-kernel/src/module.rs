//! The module capability: what every deployable implementation provides.

use std::sync::Arc;

use crate::error::ModuleResult;
use crate::priority::Priority;

/// Capability name under which bundles publish module implementations.
///
/// Bundles list their implementations in the service descriptor named after
/// this capability, and each implementation type declares it in its
/// `implements` list.
pub const MODULE_CAPABILITY: &str = "hotdeploy.Module";

/// Core module trait.
///
/// Hooks are invoked by the host on the deployer thread (or by the host
/// facade's `start_all`/`stop_all`); a module is never started twice in a row
/// by the host, so implementations need not guard against it.
pub trait Module: Send {
    /// Stable identifier, used in logs and diagnostics.
    fn module_id(&self) -> String;

    /// Start hook.
    fn start_module(&mut self) -> ModuleResult<()>;

    /// Stop hook.
    fn stop_module(&mut self) -> ModuleResult<()>;

    /// Start priority; lower starts earlier.
    fn priority(&self) -> Priority {
        Priority::DEFAULT
    }
}

/// No-argument constructor for a module implementation.
pub type ModuleFactory = Arc<dyn Fn() -> ModuleResult<Box<dyn Module>> + Send + Sync>;

/// Wrap an infallible constructor closure into a [`ModuleFactory`].
pub fn factory_fn<M, F>(constructor: F) -> ModuleFactory
where
    M: Module + 'static,
    F: Fn() -> M + Send + Sync + 'static,
{
    Arc::new(move || Ok(Box::new(constructor()) as Box<dyn Module>))
}

/// Factory that builds `M` through its [`Default`] impl.
pub fn default_factory<M>() -> ModuleFactory
where
    M: Module + Default + 'static,
{
    factory_fn(M::default)
}
