//! Deployment listener: host callbacks around each lifecycle transition.

use std::fmt;
use std::sync::Arc;

use hotdeploy_kernel::ModuleResult;
use parking_lot::RwLock;
use tracing::warn;

use crate::container::{ModuleContainer, guarded};

/// Receives lifecycle notifications for every module container.
///
/// All methods default to no-ops. Errors and panics are logged and never
/// interrupt deployment.
pub trait DeploymentListener: Send + Sync {
    /// A container was created by a successful bundle load.
    fn loaded(&self, _container: &ModuleContainer) -> ModuleResult<()> {
        Ok(())
    }

    fn pre_start(&self, _container: &ModuleContainer) -> ModuleResult<()> {
        Ok(())
    }

    fn post_start(&self, _container: &ModuleContainer) -> ModuleResult<()> {
        Ok(())
    }

    fn pre_stop(&self, _container: &ModuleContainer) -> ModuleResult<()> {
        Ok(())
    }

    fn post_stop(&self, _container: &ModuleContainer) -> ModuleResult<()> {
        Ok(())
    }
}

/// Which listener method to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleHook {
    Loaded,
    PreStart,
    PostStart,
    PreStop,
    PostStop,
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loaded => "loaded",
            Self::PreStart => "pre_start",
            Self::PostStart => "post_start",
            Self::PreStop => "pre_stop",
            Self::PostStop => "post_stop",
        };
        f.write_str(name)
    }
}

/// Shared, replaceable listener.
///
/// The deployer thread and the host facade hold clones of the same slot.
#[derive(Clone, Default)]
pub struct ListenerSlot {
    inner: Arc<RwLock<Option<Arc<dyn DeploymentListener>>>>,
}

impl ListenerSlot {
    pub fn new(listener: Option<Arc<dyn DeploymentListener>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(listener)),
        }
    }

    pub fn set(&self, listener: Arc<dyn DeploymentListener>) {
        *self.inner.write() = Some(listener);
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Fire `hook` for `container`. Returns `false` if the listener failed.
    pub fn notify(&self, hook: LifecycleHook, container: &ModuleContainer) -> bool {
        // Clone out so a listener may replace itself from inside a callback.
        let Some(listener) = self.inner.read().clone() else {
            return true;
        };
        let outcome = guarded(|| match hook {
            LifecycleHook::Loaded => listener.loaded(container),
            LifecycleHook::PreStart => listener.pre_start(container),
            LifecycleHook::PostStart => listener.post_start(container),
            LifecycleHook::PreStop => listener.pre_stop(container),
            LifecycleHook::PostStop => listener.post_stop(container),
        });
        match outcome {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    hook = %hook,
                    type_name = %container.type_name(),
                    error = %e,
                    "Deployment listener failed"
                );
                false
            }
        }
    }

    /// `pre_start`, the start hook, then `post_start` if the module started.
    pub fn start(&self, container: &ModuleContainer) -> bool {
        self.notify(LifecycleHook::PreStart, container);
        match container.start() {
            Ok(()) => {
                self.notify(LifecycleHook::PostStart, container);
                true
            }
            Err(e) => {
                warn!(
                    type_name = %container.type_name(),
                    bundle = %container.bundle_id().name,
                    error = %e,
                    "Module failed to start"
                );
                false
            }
        }
    }

    /// `pre_stop`, the stop hook, then `post_stop` if the module stopped.
    pub fn stop(&self, container: &ModuleContainer) -> bool {
        self.notify(LifecycleHook::PreStop, container);
        match container.stop() {
            Ok(()) => {
                self.notify(LifecycleHook::PostStop, container);
                true
            }
            Err(e) => {
                warn!(
                    type_name = %container.type_name(),
                    bundle = %container.bundle_id().name,
                    error = %e,
                    "Module failed to stop"
                );
                false
            }
        }
    }
}

impl fmt::Debug for ListenerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSlot")
            .field("set", &self.is_set())
            .finish()
    }
}
