//! The deployer loop
//!
//! One [`Deployer`] owns every bundle. Each cycle it snapshots the watched
//! directory, and when anything changed it undeploys removed or replaced
//! bundles, settles the new ones with bounded retries, and starts the modules
//! they brought in priority order. The loop runs on its own thread, started
//! with [`Deployer::spawn`].

mod plan;
mod settle;
mod signal;

use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hotdeploy_kernel::ModuleError;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

pub use plan::DeployPlan;
pub use settle::{Deployable, SettleReport, max_attempts, settle};
pub use signal::{InitialDeployment, ShutdownSignal};

use crate::bundle::{Bundle, BundleContext, BundleId, STAGED_SUFFIX};
use crate::config::DeployerConfig;
use crate::container::{ModuleContainer, sort_for_start};
use crate::domain::{Resource, RootDomain};
use crate::error::DeployError;
use crate::listener::{LifecycleHook, ListenerSlot};
use crate::snapshot::Snapshot;

/// Name of the deployer thread.
pub const DEPLOYER_THREAD_NAME: &str = "bundle-deployer";

/// A bundle whose last deployment attempt failed.
#[derive(Debug, Clone)]
pub struct FailedBundle {
    pub id: BundleId,
    pub error: Arc<DeployError>,
}

impl FailedBundle {
    pub fn name(&self) -> &str {
        &self.id.name
    }
}

/// Read side of the deployer's state, shared with the host.
///
/// Replaced wholesale at the end of every cycle that changed something.
#[derive(Debug, Clone, Default)]
pub struct DeploymentView {
    inner: Arc<ViewInner>,
}

#[derive(Debug, Default)]
struct ViewInner {
    containers: RwLock<Vec<Arc<ModuleContainer>>>,
    failures: RwLock<Vec<FailedBundle>>,
}

impl DeploymentView {
    /// Every container of every deployed bundle, in start order.
    pub fn containers(&self) -> Vec<Arc<ModuleContainer>> {
        self.inner.containers.read().clone()
    }

    pub fn failures(&self) -> Vec<FailedBundle> {
        self.inner.failures.read().clone()
    }

    fn publish(&self, containers: Vec<Arc<ModuleContainer>>, failures: Vec<FailedBundle>) {
        *self.inner.containers.write() = containers;
        *self.inner.failures.write() = failures;
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The directory looked the same as last time.
    Unchanged,
    Changed(CycleSummary),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub undeployed: usize,
    pub deployed: usize,
    pub unresolved: usize,
    pub started: usize,
    pub attempts: usize,
}

/// Owner of every bundle and of the deploy loop.
pub struct Deployer {
    config: DeployerConfig,
    context: BundleContext,
    listener: ListenerSlot,
    known: Vec<Arc<Bundle>>,
    failed: Vec<FailedBundle>,
    last_snapshot: Option<Snapshot>,
    view: DeploymentView,
    initial: InitialDeployment,
}

impl Deployer {
    /// Create the watched and staging directories if needed and purge stale
    /// staged copies left by an earlier process.
    pub fn new(
        config: DeployerConfig,
        root: Arc<RootDomain>,
        listener: ListenerSlot,
    ) -> Result<Self, DeployError> {
        config.validate()?;
        let staging_dir = config.staging_path();
        fs::create_dir_all(&config.watch_dir)?;
        fs::create_dir_all(&staging_dir)?;

        let (removed, total) = purge_stale_staging(&staging_dir)?;
        if total > 0 {
            info!(removed, total, dir = %staging_dir.display(), "Purged stale staged bundles");
        }

        if !root.has_host_type(&config.capability) {
            root.register_host_type(&config.capability, &[]);
        }

        let context = BundleContext {
            staging_dir,
            capability: config.capability.clone(),
            root,
        };
        Ok(Self {
            config,
            context,
            listener,
            known: Vec::new(),
            failed: Vec::new(),
            last_snapshot: None,
            view: DeploymentView::default(),
            initial: InitialDeployment::new(),
        })
    }

    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    pub fn root(&self) -> &Arc<RootDomain> {
        &self.context.root
    }

    pub fn listener(&self) -> &ListenerSlot {
        &self.listener
    }

    pub fn view(&self) -> DeploymentView {
        self.view.clone()
    }

    pub fn initial_deployment(&self) -> InitialDeployment {
        self.initial.clone()
    }

    /// Resources under `path` across the host and every deployed bundle.
    pub fn resources(&self, path: &str) -> Result<Vec<Resource>, DeployError> {
        self.context.root.resources(path)
    }

    /// Bundles currently deployed, in deployment order.
    pub fn known_bundles(&self) -> &[Arc<Bundle>] {
        &self.known
    }

    /// Bundles left unresolved by the last cycle that changed anything.
    pub fn failed_bundles(&self) -> &[FailedBundle] {
        &self.failed
    }

    /// Run one poll cycle.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, DeployError> {
        let snapshot = Snapshot::capture(&self.config.watch_dir, &self.config.extension)?;
        if self.last_snapshot.as_ref() == Some(&snapshot) {
            return Ok(CycleOutcome::Unchanged);
        }
        info!(files = snapshot.len(), "Deployment directory changed");

        let plan = DeployPlan::compute(
            &self.known,
            &snapshot,
            &self.config.extension,
            &self.context,
        );
        let mut summary = CycleSummary {
            undeployed: plan.undeploy.len(),
            ..CycleSummary::default()
        };

        for bundle in &plan.undeploy {
            self.undeploy(bundle);
        }
        self.known
            .retain(|k| !plan.undeploy.iter().any(|u| Arc::ptr_eq(u, k)));

        let report = settle(plan.deploy);
        summary.attempts = report.attempts;
        if let Some(err) = report.exceeded() {
            error!(max_attempts = report.max_attempts, error = %err, "Deployment did not settle");
        }

        let mut loaded = Vec::new();
        for (bundle, containers) in report.settled {
            bundle.set_last_error(None);
            for container in &containers {
                self.listener.notify(LifecycleHook::Loaded, container);
            }
            info!(bundle = %bundle.name(), modules = containers.len(), "Deployed bundle");
            loaded.extend(containers);
            self.known.push(bundle);
            summary.deployed += 1;
        }

        self.failed = report
            .unresolved
            .iter()
            .map(|bundle| FailedBundle {
                id: bundle.id().clone(),
                error: bundle.last_error().unwrap_or_else(|| {
                    Arc::new(DeployError::SettlingExceeded {
                        attempts: report.attempts,
                        unresolved: vec![bundle.name().to_string()],
                    })
                }),
            })
            .collect();
        for failed in &self.failed {
            warn!(bundle = %failed.name(), error = %failed.error, "Bundle left undeployed");
        }
        summary.unresolved = self.failed.len();

        sort_for_start(&mut loaded);
        for container in &loaded {
            if self.listener.start(container) {
                summary.started += 1;
            }
        }

        self.last_snapshot = Some(snapshot);
        self.publish();
        self.initial.signal();
        debug!(?summary, "Deployment cycle finished");
        Ok(CycleOutcome::Changed(summary))
    }

    /// Stop every started container of `bundle`, then unload it.
    fn undeploy(&self, bundle: &Bundle) {
        let mut containers = bundle.loaded_containers();
        sort_for_start(&mut containers);
        for container in containers.iter().rev().filter(|c| c.is_started()) {
            self.listener.stop(container);
        }
        bundle.unload();
        info!(bundle = %bundle.name(), "Undeployed bundle");
    }

    fn publish(&self) {
        let mut containers: Vec<_> = self
            .known
            .iter()
            .flat_map(|b| b.loaded_containers())
            .collect();
        containers.sort();
        self.view.publish(containers, self.failed.clone());
    }

    /// Poll until `signal` asks to stop, then undeploy everything.
    pub fn run(&mut self, signal: &ShutdownSignal) {
        info!(
            dir = %self.config.watch_dir.display(),
            interval_ms = self.config.poll_interval_ms,
            "Deployer started"
        );
        while !signal.is_requested() {
            match panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle())) {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "Deployment cycle failed");
                    // Waiters must not hang on a directory that can't be read.
                    self.initial.signal();
                }
                Err(payload) => {
                    let panic = ModuleError::from_panic(payload.as_ref());
                    error!(error = %panic, "Deployment cycle panicked");
                    // Retry the whole directory on the next cycle.
                    self.last_snapshot = None;
                    self.initial.signal();
                }
            }
            if signal.sleep(self.config.poll_interval()) {
                break;
            }
        }
        self.shutdown();
    }

    /// Undeploy every bundle in reverse deployment order and reset the root.
    pub fn shutdown(&mut self) {
        let bundles = std::mem::take(&mut self.known);
        info!(bundles = bundles.len(), "Undeploying all bundles");
        for bundle in bundles.iter().rev() {
            self.undeploy(bundle);
        }
        self.context.root.clear();
        self.failed.clear();
        self.last_snapshot = None;
        self.publish();
        self.initial.signal();
    }

    /// Move the deployer onto its own thread.
    pub fn spawn(self) -> io::Result<DeployerHandle> {
        let signal = ShutdownSignal::new();
        let view = self.view();
        let initial = self.initial_deployment();
        let thread_signal = signal.clone();
        let mut deployer = self;
        let thread = thread::Builder::new()
            .name(DEPLOYER_THREAD_NAME.to_string())
            .spawn(move || {
                let _release = ReleaseOnExit(deployer.initial_deployment());
                deployer.run(&thread_signal);
            })?;
        Ok(DeployerHandle {
            signal,
            view,
            initial,
            thread: Some(thread),
        })
    }
}

/// Handle to a running deployer thread. Dropping it shuts the thread down.
#[derive(Debug)]
pub struct DeployerHandle {
    signal: ShutdownSignal,
    view: DeploymentView,
    initial: InitialDeployment,
    thread: Option<JoinHandle<()>>,
}

impl DeployerHandle {
    pub fn view(&self) -> &DeploymentView {
        &self.view
    }

    pub fn initial_deployment(&self) -> &InitialDeployment {
        &self.initial
    }

    pub fn wait_initial(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(timeout) => self.initial.wait_timeout(timeout),
            None => {
                self.initial.wait();
                true
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Request shutdown and wait for the final undeploy sweep.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.signal.request();
        if thread.join().is_err() {
            error!("Deployer thread panicked");
        }
        info!("Deployer stopped");
    }
}

impl Drop for DeployerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Releases initial-deployment waiters however the deployer thread exits.
struct ReleaseOnExit(InitialDeployment);

impl Drop for ReleaseOnExit {
    fn drop(&mut self) {
        self.0.signal();
    }
}

/// Remove leftover staged copies; returns `(removed, total)`.
fn purge_stale_staging(dir: &Path) -> io::Result<(usize, usize)> {
    let mut removed = 0;
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_staged = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(STAGED_SUFFIX));
        if !is_staged || !path.is_file() {
            continue;
        }
        total += 1;
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Cannot remove stale staged bundle"),
        }
    }
    Ok((removed, total))
}
