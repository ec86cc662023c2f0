//! Shared helpers for hotdeploy-engine integration tests
#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use hotdeploy_engine::{
    DeploymentListener, MODULE_CAPABILITY, Module, ModuleContainer, ModuleError, ModuleFactory,
    ModuleResult, Priority, factory_fn,
};
use parking_lot::Mutex;
use zip::write::SimpleFileOptions;

// ============================================================================
// Tracing
// ============================================================================

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Bundle archives
// ============================================================================

/// Builder for a bundle zip archive.
#[derive(Debug, Default, Clone)]
pub struct BundleSpec {
    services: Vec<String>,
    entries: Vec<(String, Vec<u8>)>,
}

impl BundleSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// A module implementation listed in the descriptor.
    pub fn module(self, name: &str) -> Self {
        self.module_requiring(name, &[])
    }

    /// A module implementation that links `requires` before it can load.
    pub fn module_requiring(mut self, name: &str, requires: &[&str]) -> Self {
        self.services.push(name.to_string());
        self.type_def(name, &type_toml(&[MODULE_CAPABILITY], requires))
    }

    /// A plain type definition, not listed in the descriptor.
    pub fn type_def(mut self, name: &str, toml: &str) -> Self {
        self.entries
            .push((format!("types/{name}.toml"), toml.as_bytes().to_vec()));
        self
    }

    /// An arbitrary entry, e.g. to change the archive size.
    pub fn entry(mut self, path: &str, bytes: &[u8]) -> Self {
        self.entries.push((path.to_string(), bytes.to_vec()));
        self
    }

    /// Write the archive next to `path` and rename it into place.
    pub fn write(&self, path: &Path) {
        let partial = path.with_extension("partial");
        {
            let mut writer = zip::ZipWriter::new(File::create(&partial).unwrap());
            let options = SimpleFileOptions::default();
            if !self.services.is_empty() {
                writer
                    .start_file(format!("META-INF/services/{MODULE_CAPABILITY}"), options)
                    .unwrap();
                writer
                    .write_all(format!("# generated\n{}\n", self.services.join("\n")).as_bytes())
                    .unwrap();
            }
            for (name, bytes) in &self.entries {
                writer.start_file(name.as_str(), options).unwrap();
                writer.write_all(bytes).unwrap();
            }
            writer.finish().unwrap();
        }
        fs::rename(&partial, path).unwrap();
    }
}

pub fn type_toml(implements: &[&str], requires: &[&str]) -> String {
    let list = |names: &[&str]| {
        names
            .iter()
            .map(|n| format!("\"{n}\""))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("implements = [{}]\nrequires = [{}]\n", list(implements), list(requires))
}

pub fn staged_file_count(staging: &Path) -> usize {
    fs::read_dir(staging).map(|d| d.count()).unwrap_or(0)
}

// ============================================================================
// Recording modules and listener
// ============================================================================

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().clone()
}

/// Module that logs `start:<id>` / `stop:<id>`.
pub struct Recording {
    id: String,
    priority: Priority,
    fail_start: bool,
    log: EventLog,
}

impl Module for Recording {
    fn module_id(&self) -> String {
        self.id.clone()
    }

    fn start_module(&mut self) -> ModuleResult<()> {
        if self.fail_start {
            return Err(ModuleError::StartFailed(format!("{} refuses", self.id)));
        }
        self.log.lock().push(format!("start:{}", self.id));
        Ok(())
    }

    fn stop_module(&mut self) -> ModuleResult<()> {
        self.log.lock().push(format!("stop:{}", self.id));
        Ok(())
    }

    fn priority(&self) -> Priority {
        self.priority
    }
}

pub fn recording(id: &str, priority: u32, log: &EventLog) -> ModuleFactory {
    let id = id.to_string();
    let log = log.clone();
    factory_fn(move || Recording {
        id: id.clone(),
        priority: Priority(priority),
        fail_start: false,
        log: log.clone(),
    })
}

pub fn failing(id: &str, log: &EventLog) -> ModuleFactory {
    let id = id.to_string();
    let log = log.clone();
    factory_fn(move || Recording {
        id: id.clone(),
        priority: Priority::DEFAULT,
        fail_start: true,
        log: log.clone(),
    })
}

/// Module whose `module_id` panics.
pub struct Unnamed;

impl Module for Unnamed {
    fn module_id(&self) -> String {
        panic!("module_id exploded")
    }

    fn start_module(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    fn stop_module(&mut self) -> ModuleResult<()> {
        Ok(())
    }
}

pub fn unnamed() -> ModuleFactory {
    factory_fn(|| Unnamed)
}

/// Listener that logs `<hook>:<type name>`.
pub struct RecordingListener {
    pub log: EventLog,
}

impl RecordingListener {
    fn push(&self, hook: &str, container: &ModuleContainer) -> ModuleResult<()> {
        self.log
            .lock()
            .push(format!("{hook}:{}", container.type_name()));
        Ok(())
    }
}

impl DeploymentListener for RecordingListener {
    fn loaded(&self, container: &ModuleContainer) -> ModuleResult<()> {
        self.push("loaded", container)
    }

    fn pre_start(&self, container: &ModuleContainer) -> ModuleResult<()> {
        self.push("pre_start", container)
    }

    fn post_start(&self, container: &ModuleContainer) -> ModuleResult<()> {
        self.push("post_start", container)
    }

    fn pre_stop(&self, container: &ModuleContainer) -> ModuleResult<()> {
        self.push("pre_stop", container)
    }

    fn post_stop(&self, container: &ModuleContainer) -> ModuleResult<()> {
        self.push("post_stop", container)
    }
}
