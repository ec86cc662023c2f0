//! Host facade
//!
//! [`HotDeploy`] is what an application embeds: register the constructors
//! bundles may bind to, point it at a directory, call
//! [`HotDeploy::begin_loading`], and the deployer thread takes it from there.
//!
//! ```rust,ignore
//! use hotdeploy_engine::{DeployerConfig, HotDeploy};
//! use hotdeploy_kernel::default_factory;
//!
//! let mut deploy = HotDeploy::builder(DeployerConfig::new("plugins"))
//!     .module("greeter.Greeter", default_factory::<Greeter>())
//!     .build()?;
//! deploy.begin_loading(true)?;
//! for module in deploy.loaded_modules() {
//!     println!("{} ({})", module.type_name(), module.state());
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use error_stack::ResultExt;
use hotdeploy_kernel::ModuleFactory;
use tracing::info;

use crate::config::DeployerConfig;
use crate::container::ModuleContainer;
use crate::deployer::{Deployer, DeployerHandle, DeploymentView, FailedBundle, InitialDeployment};
use crate::domain::{FactoryCatalog, Resource, RootDomain};
use crate::error::{DeployError, DeployResult, IntoDeployReport};
use crate::listener::{DeploymentListener, ListenerSlot};

/// Builder for [`HotDeploy`]
pub struct HotDeployBuilder {
    config: DeployerConfig,
    catalog: FactoryCatalog,
    host_types: Vec<(String, Vec<String>)>,
    host_resources: Vec<(String, Vec<u8>)>,
    listener: Option<Arc<dyn DeploymentListener>>,
}

impl HotDeployBuilder {
    /// Make `factory` available to bundle types bound to `name`.
    pub fn module(self, name: &str, factory: ModuleFactory) -> Self {
        self.catalog.register(name, factory);
        self
    }

    /// Declare a type the host provides, visible to every bundle.
    pub fn host_type(mut self, name: &str, implements: &[&str]) -> Self {
        self.host_types.push((
            name.to_string(),
            implements.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// Publish a resource from the host, found ahead of bundle resources.
    pub fn host_resource(mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.host_resources.push((path.to_string(), bytes.into()));
        self
    }

    pub fn listener(mut self, listener: Arc<dyn DeploymentListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Prepare the directories and the root domain. Nothing is deployed yet.
    pub fn build(self) -> DeployResult<HotDeploy> {
        let watch_dir = self.config.watch_dir.clone();
        let root = RootDomain::new(self.catalog);
        for (name, implements) in &self.host_types {
            let implements: Vec<&str> = implements.iter().map(String::as_str).collect();
            root.register_host_type(name, &implements);
        }
        for (path, bytes) in self.host_resources {
            root.register_host_resource(&path, bytes);
        }

        let listener = ListenerSlot::new(self.listener);
        let deployer = Deployer::new(self.config, root, listener.clone())
            .into_report()
            .attach(format!("while preparing deployment directory {}", watch_dir.display()))?;

        Ok(HotDeploy {
            watch_dir,
            root: deployer.root().clone(),
            listener,
            view: deployer.view(),
            initial: deployer.initial_deployment(),
            state: FrameworkState::Ready(Box::new(deployer)),
        })
    }
}

enum FrameworkState {
    Ready(Box<Deployer>),
    Running(DeployerHandle),
    Stopped,
}

/// An embedded hot-deployment engine.
///
/// Dropping it shuts the deployer down and undeploys every bundle.
pub struct HotDeploy {
    watch_dir: PathBuf,
    root: Arc<RootDomain>,
    listener: ListenerSlot,
    view: DeploymentView,
    initial: InitialDeployment,
    state: FrameworkState,
}

impl HotDeploy {
    pub fn builder(config: DeployerConfig) -> HotDeployBuilder {
        HotDeployBuilder {
            config,
            catalog: FactoryCatalog::new(),
            host_types: Vec::new(),
            host_resources: Vec::new(),
            listener: None,
        }
    }

    pub fn watch_dir(&self) -> &std::path::Path {
        &self.watch_dir
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, FrameworkState::Running(_))
    }

    /// Start the deployer thread. Calling it again is a no-op.
    ///
    /// With `wait_for_initial`, blocks until the first cycle has finished.
    pub fn begin_loading(&mut self, wait_for_initial: bool) -> DeployResult<()> {
        self.state = match std::mem::replace(&mut self.state, FrameworkState::Stopped) {
            FrameworkState::Ready(deployer) => {
                let handle = (*deployer)
                    .spawn()
                    .into_report()
                    .attach("while starting the deployer thread")?;
                info!(dir = %self.watch_dir.display(), "Hot deployment started");
                FrameworkState::Running(handle)
            }
            other => other,
        };

        if wait_for_initial && self.is_running() {
            self.initial.wait();
        }
        Ok(())
    }

    /// Containers of every deployed bundle, sorted by priority.
    ///
    /// Waits for the initial deployment when the deployer is running.
    pub fn loaded_modules(&self) -> Vec<Arc<ModuleContainer>> {
        if self.is_running() {
            self.initial.wait();
        }
        self.view.containers()
    }

    /// Start every stopped module. Returns how many started.
    pub fn start_all(&self) -> usize {
        self.loaded_modules()
            .iter()
            .filter(|c| !c.is_started())
            .filter(|c| self.listener.start(c))
            .count()
    }

    /// Stop every started module, in reverse start order. Returns how many stopped.
    pub fn stop_all(&self) -> usize {
        self.loaded_modules()
            .iter()
            .rev()
            .filter(|c| c.is_started())
            .filter(|c| self.listener.stop(c))
            .count()
    }

    /// Replace the deployment listener, effective from the next notification.
    pub fn set_listener(&self, listener: Arc<dyn DeploymentListener>) {
        self.listener.set(listener);
    }

    pub fn clear_listener(&self) {
        self.listener.clear();
    }

    /// Resources under `path`, host resources first, then each deployed
    /// bundle's in deployment order. Identical content is listed once.
    pub fn resources(&self, path: &str) -> Result<Vec<Resource>, DeployError> {
        self.root.resources(path)
    }

    /// Bundles whose last deployment attempt failed.
    pub fn failed_bundles(&self) -> Vec<FailedBundle> {
        self.view.failures()
    }

    /// Stop the deployer and undeploy every bundle. Idempotent.
    pub fn shutdown(&mut self) {
        match std::mem::replace(&mut self.state, FrameworkState::Stopped) {
            FrameworkState::Running(mut handle) => handle.shutdown(),
            FrameworkState::Ready(mut deployer) => deployer.shutdown(),
            FrameworkState::Stopped => {}
        }
    }
}

impl Drop for HotDeploy {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for HotDeploy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            FrameworkState::Ready(_) => "ready",
            FrameworkState::Running(_) => "running",
            FrameworkState::Stopped => "stopped",
        };
        f.debug_struct("HotDeploy")
            .field("watch_dir", &self.watch_dir)
            .field("state", &state)
            .finish()
    }
}
