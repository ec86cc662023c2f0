//! hotdeploy kernel
//!
//! The contract shared between the hot-deployment host and bundle authors:
//! - [`Module`]: the capability every deployable implementation provides
//! - [`ModuleFactory`]: how the host constructs an implementation
//! - [`Priority`]: start ordering between modules
//! - [`ModuleError`]: typed failures reported by lifecycle hooks

pub mod error;
pub mod module;
pub mod priority;

pub use error::{ModuleError, ModuleResult};
pub use module::{MODULE_CAPABILITY, Module, ModuleFactory, default_factory, factory_fn};
pub use priority::Priority;
