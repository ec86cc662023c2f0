//! Module containers: one live module instance and its lifecycle state.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use hotdeploy_kernel::{Module, ModuleError, ModuleResult, Priority};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::bundle::{Bundle, BundleId};

/// Lifecycle state of a module container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModuleState {
    #[default]
    Stopped,
    Started,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Started => write!(f, "started"),
        }
    }
}

/// Run a hook, turning a panic into [`ModuleError::Panicked`].
pub(crate) fn guarded<T>(hook: impl FnOnce() -> ModuleResult<T>) -> ModuleResult<T> {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result,
        Err(payload) => Err(ModuleError::from_panic(payload.as_ref())),
    }
}

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// One instantiated module.
///
/// Containers order by priority, then by the order they were discovered in.
pub struct ModuleContainer {
    /// Fresh for every instantiation, reloads included
    instance_id: Uuid,
    /// Implementation type name from the bundle's descriptor
    type_name: String,
    module_id: String,
    priority: Priority,
    sequence: u64,
    bundle_id: BundleId,
    bundle: Weak<Bundle>,
    module: Mutex<Box<dyn Module>>,
    state: Mutex<ModuleState>,
}

impl ModuleContainer {
    /// Wrap `module`, reading its id and priority once.
    ///
    /// A panic in either accessor is returned as an error.
    pub(crate) fn new(
        type_name: &str,
        module: Box<dyn Module>,
        bundle_id: BundleId,
        bundle: Weak<Bundle>,
    ) -> ModuleResult<Self> {
        let module_id = guarded(|| Ok(module.module_id()))?;
        let priority = guarded(|| Ok(module.priority()))?;
        let container = Self {
            instance_id: Uuid::now_v7(),
            type_name: type_name.to_string(),
            module_id,
            priority,
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            bundle_id,
            bundle,
            module: Mutex::new(module),
            state: Mutex::new(ModuleState::Stopped),
        };
        debug!(
            bundle = %container.bundle_id.name,
            type_name = %container.type_name,
            priority = %container.priority,
            "Created module container"
        );
        Ok(container)
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn bundle_id(&self) -> &BundleId {
        &self.bundle_id
    }

    /// The owning bundle, while it is still alive.
    pub fn bundle(&self) -> Option<std::sync::Arc<Bundle>> {
        self.bundle.upgrade()
    }

    pub fn state(&self) -> ModuleState {
        *self.state.lock()
    }

    pub fn is_started(&self) -> bool {
        self.state() == ModuleState::Started
    }

    /// Call the start hook; the state becomes `Started` only if it succeeds.
    pub fn start(&self) -> ModuleResult<()> {
        let mut module = self.module.lock();
        guarded(|| module.start_module())?;
        *self.state.lock() = ModuleState::Started;
        Ok(())
    }

    /// Call the stop hook; the state becomes `Stopped` only if it succeeds.
    pub fn stop(&self) -> ModuleResult<()> {
        let mut module = self.module.lock();
        guarded(|| module.stop_module())?;
        *self.state.lock() = ModuleState::Stopped;
        Ok(())
    }

    /// Run `f` against the module instance.
    pub fn with_module<R>(&self, f: impl FnOnce(&mut dyn Module) -> R) -> R {
        let mut module = self.module.lock();
        f(module.as_mut())
    }
}

/// Stable sort by priority; equal priorities keep their current order.
pub fn sort_for_start(containers: &mut [std::sync::Arc<ModuleContainer>]) {
    containers.sort_by_key(|c| c.priority());
}

impl PartialEq for ModuleContainer {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for ModuleContainer {}

impl PartialOrd for ModuleContainer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModuleContainer {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl fmt::Debug for ModuleContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContainer")
            .field("instance_id", &self.instance_id)
            .field("type_name", &self.type_name)
            .field("priority", &self.priority)
            .field("bundle", &self.bundle_id.name)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for ModuleContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleContainer({}@prio={})", self.type_name, self.priority)
    }
}
