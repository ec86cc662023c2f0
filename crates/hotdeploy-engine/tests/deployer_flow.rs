//! Integration tests for the deployer cycle
//!
//! Drives [`Deployer::run_cycle`] directly against a temporary directory, so
//! every step is deterministic.

mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use common::*;
use hotdeploy_engine::{
    CycleOutcome, CycleSummary, DeployError, Deployer, DeployerConfig, DeploymentListener,
    FactoryCatalog, ListenerSlot, MODULE_CAPABILITY, ModuleState, RootDomain,
};
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    root: Arc<RootDomain>,
    deployer: Deployer,
    log: EventLog,
    hooks: EventLog,
}

impl Harness {
    fn new(register: impl FnOnce(&FactoryCatalog, &EventLog)) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let log = event_log();
        let hooks = event_log();
        let catalog = FactoryCatalog::new();
        register(&catalog, &log);
        let root = RootDomain::new(catalog);
        let listener: Arc<dyn DeploymentListener> = Arc::new(RecordingListener {
            log: hooks.clone(),
        });
        let deployer = Deployer::new(
            DeployerConfig::new(dir.path()),
            root.clone(),
            ListenerSlot::new(Some(listener)),
        )
        .unwrap();
        Self {
            dir,
            root,
            deployer,
            log,
            hooks,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn staged(&self) -> usize {
        staged_file_count(&self.dir.path().join("tmp"))
    }

    fn cycle(&mut self) -> CycleSummary {
        match self.deployer.run_cycle().unwrap() {
            CycleOutcome::Changed(summary) => summary,
            CycleOutcome::Unchanged => panic!("expected the cycle to see a change"),
        }
    }

    fn running(&self) -> Vec<String> {
        self.deployer
            .view()
            .containers()
            .iter()
            .map(|c| c.type_name().to_string())
            .collect()
    }
}

// ============================================================================
// Deployment and settling
// ============================================================================

#[test]
fn test_dependent_bundles_settle_in_one_cycle() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("alpha.Greeter", recording("greeter", 3072, log));
        catalog.register("beta.Service", recording("service", 3072, log));
    });
    // alpha sorts first but needs a type only beta defines.
    BundleSpec::new()
        .module_requiring("alpha.Greeter", &["beta.Codec"])
        .write(&h.path("alpha.pkg"));
    BundleSpec::new()
        .module("beta.Service")
        .type_def("beta.Codec", "")
        .write(&h.path("beta.pkg"));

    let summary = h.cycle();

    assert_eq!(summary.deployed, 2);
    assert_eq!(summary.unresolved, 0);
    assert_eq!(summary.attempts, 3);
    assert_eq!(summary.started, 2);
    assert!(h.deployer.failed_bundles().is_empty());

    let known: Vec<&str> = h.deployer.known_bundles().iter().map(|b| b.name()).collect();
    assert_eq!(known, vec!["beta.pkg", "alpha.pkg"]);
    assert_eq!(events(&h.log), vec!["start:service", "start:greeter"]);
    assert_eq!(h.staged(), 2);
    assert!(h.root.is_cached("beta.Codec"));
}

#[test]
fn test_modules_start_in_priority_order() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("p.P300", recording("p300", 300, log));
        catalog.register("p.P100a", recording("p100a", 100, log));
        catalog.register("p.P100b", recording("p100b", 100, log));
        catalog.register("p.P200", recording("p200", 200, log));
    });
    BundleSpec::new()
        .module("p.P300")
        .module("p.P100a")
        .module("p.P100b")
        .module("p.P200")
        .write(&h.path("prio.pkg"));

    h.cycle();

    assert_eq!(
        events(&h.log),
        vec!["start:p100a", "start:p100b", "start:p200", "start:p300"]
    );
    assert_eq!(h.running(), vec!["p.P100a", "p.P100b", "p.P200", "p.P300"]);
}

#[test]
fn test_unchanged_directory_is_a_no_op() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("a.A", recording("a", 1, log));
    });
    BundleSpec::new().module("a.A").write(&h.path("a.pkg"));

    h.cycle();
    assert_eq!(h.deployer.run_cycle().unwrap(), CycleOutcome::Unchanged);
    assert_eq!(events(&h.log), vec!["start:a"]);
}

#[test]
fn test_listener_sees_every_transition() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("a.A", recording("a", 1, log));
    });
    BundleSpec::new().module("a.A").write(&h.path("a.pkg"));
    h.cycle();

    fs::remove_file(h.path("a.pkg")).unwrap();
    h.cycle();

    assert_eq!(
        events(&h.hooks),
        vec![
            "loaded:a.A",
            "pre_start:a.A",
            "post_start:a.A",
            "pre_stop:a.A",
            "post_stop:a.A"
        ]
    );
}

// ============================================================================
// Redeploy and removal
// ============================================================================

#[test]
fn test_changed_file_is_redeployed_in_one_cycle() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("a.A", recording("a", 1, log));
    });
    BundleSpec::new().module("a.A").write(&h.path("a.pkg"));
    h.cycle();
    let before = h.deployer.view().containers()[0].instance_id();

    BundleSpec::new()
        .module("a.A")
        .entry("README", b"second build, larger archive")
        .write(&h.path("a.pkg"));
    let summary = h.cycle();

    assert_eq!(summary.undeployed, 1);
    assert_eq!(summary.deployed, 1);
    assert_eq!(events(&h.log), vec!["start:a", "stop:a", "start:a"]);
    let after = h.deployer.view().containers();
    assert_eq!(after.len(), 1);
    assert_ne!(after[0].instance_id(), before);
    assert_eq!(after[0].state(), ModuleState::Started);
    assert_eq!(h.deployer.known_bundles().len(), 1);
    assert_eq!(h.staged(), 1);
}

#[test]
fn test_removed_file_is_undeployed_and_cache_purged() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("a.A", recording("a", 1, log));
        catalog.register("b.B", recording("b", 1, log));
    });
    BundleSpec::new().module("a.A").write(&h.path("a.pkg"));
    BundleSpec::new().module("b.B").write(&h.path("b.pkg"));
    h.cycle();
    assert!(h.root.is_cached("a.A"));

    fs::remove_file(h.path("a.pkg")).unwrap();
    let summary = h.cycle();

    assert_eq!(summary.undeployed, 1);
    assert_eq!(summary.deployed, 0);
    assert!(!h.root.is_cached("a.A"));
    assert!(h.root.is_cached("b.B"));
    assert_eq!(h.running(), vec!["b.B"]);
    assert_eq!(h.staged(), 1);
    assert_eq!(h.root.child_count(), 1);
}

#[test]
fn test_shutdown_undeploys_everything() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("a.A", recording("a", 1, log));
        catalog.register("b.B", recording("b", 2, log));
    });
    BundleSpec::new().module("a.A").write(&h.path("a.pkg"));
    BundleSpec::new().module("b.B").write(&h.path("b.pkg"));
    h.cycle();

    h.deployer.shutdown();

    assert_eq!(events(&h.log), vec!["start:a", "start:b", "stop:b", "stop:a"]);
    assert!(h.deployer.known_bundles().is_empty());
    assert!(h.running().is_empty());
    assert_eq!(h.staged(), 0);
    assert_eq!(h.root.child_count(), 0);
    assert!(h.root.cached_type_names().is_empty());
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_unacceptable_files_are_ignored() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("a.A", recording("a", 1, log));
    });
    fs::write(h.path("junk.pkg"), b"not an archive").unwrap();
    BundleSpec::new()
        .type_def("lib.Only", "")
        .write(&h.path("library.pkg"));
    BundleSpec::new().module("a.A").write(&h.path("a.pkg"));
    fs::write(h.path("notes.txt"), b"ignored").unwrap();

    let summary = h.cycle();

    assert_eq!(summary.deployed, 1);
    assert_eq!(summary.unresolved, 0);
    assert!(h.deployer.failed_bundles().is_empty());
    assert_eq!(h.running(), vec!["a.A"]);
}

#[test]
fn test_settling_exceeded_then_retried_after_change() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("a.A", recording("a", 1, log));
        catalog.register("b.B", recording("b", 2, log));
    });
    BundleSpec::new()
        .module_requiring("a.A", &["b.B"])
        .write(&h.path("a.pkg"));
    BundleSpec::new()
        .module_requiring("b.B", &["a.A"])
        .write(&h.path("b.pkg"));

    let summary = h.cycle();
    assert_eq!(summary.deployed, 0);
    assert_eq!(summary.unresolved, 2);
    assert_eq!(summary.attempts, 3);
    assert!(h.deployer.known_bundles().is_empty());
    assert_eq!(h.staged(), 0);

    let failed = h.deployer.failed_bundles();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|f| f.error.is_resolution()));
    assert_eq!(h.deployer.view().failures().len(), 2);

    // Nothing changed: no retry.
    assert_eq!(h.deployer.run_cycle().unwrap(), CycleOutcome::Unchanged);

    // Break the loop; both bundles are probed again.
    BundleSpec::new()
        .module("a.A")
        .entry("README", b"no longer needs b")
        .write(&h.path("a.pkg"));
    let summary = h.cycle();

    assert_eq!(summary.deployed, 2);
    assert_eq!(summary.unresolved, 0);
    assert!(h.deployer.failed_bundles().is_empty());
    assert_eq!(events(&h.log), vec!["start:a", "start:b"]);
}

#[test]
fn test_missing_factory_is_reported_per_bundle() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("ok.Fine", recording("fine", 1, log));
    });
    BundleSpec::new().module("ok.Fine").write(&h.path("ok.pkg"));
    BundleSpec::new()
        .module("orphan.NoFactory")
        .write(&h.path("orphan.pkg"));

    let summary = h.cycle();

    assert_eq!(summary.deployed, 1);
    assert_eq!(summary.unresolved, 1);
    let failed = h.deployer.failed_bundles();
    assert_eq!(failed[0].name(), "orphan.pkg");
    assert!(matches!(
        failed[0].error.as_ref(),
        DeployError::Instantiation { type_name, .. } if type_name == "orphan.NoFactory"
    ));
    let bundle_error = failed[0].error.to_string();
    assert!(bundle_error.contains("no factory registered"));
}

#[test]
fn test_failing_start_leaves_module_stopped() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("bad.Start", failing("bad", log));
        catalog.register("good.Start", recording("good", 1, log));
    });
    BundleSpec::new()
        .module("bad.Start")
        .module("good.Start")
        .write(&h.path("mixed.pkg"));

    let summary = h.cycle();

    assert_eq!(summary.deployed, 1);
    assert_eq!(summary.started, 1);
    let states: Vec<(String, ModuleState)> = h
        .deployer
        .view()
        .containers()
        .iter()
        .map(|c| (c.type_name().to_string(), c.state()))
        .collect();
    assert_eq!(
        states,
        vec![
            ("good.Start".to_string(), ModuleState::Started),
            ("bad.Start".to_string(), ModuleState::Stopped),
        ]
    );
    assert_eq!(
        events(&h.hooks)
            .iter()
            .filter(|e| e.starts_with("post_start"))
            .count(),
        1
    );
}

#[test]
fn test_panicking_module_fails_only_its_bundle() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("bad.Unnamed", unnamed());
        catalog.register("good.Fine", recording("fine", 1, log));
    });
    BundleSpec::new().module("bad.Unnamed").write(&h.path("bad.pkg"));
    BundleSpec::new().module("good.Fine").write(&h.path("good.pkg"));

    let summary = h.cycle();

    assert_eq!(summary.deployed, 1);
    assert_eq!(summary.unresolved, 1);
    assert_eq!(h.running(), vec!["good.Fine"]);
    let failed = h.deployer.failed_bundles();
    assert_eq!(failed[0].name(), "bad.pkg");
    assert!(matches!(
        failed[0].error.as_ref(),
        DeployError::Instantiation { type_name, reason }
            if type_name == "bad.Unnamed" && reason.contains("module_id exploded")
    ));
    assert_eq!(h.staged(), 1);
    assert!(!h.root.is_cached("bad.Unnamed"));
    assert_eq!(h.root.child_count(), 1);
}

#[test]
fn test_corrupt_descriptors_are_skipped() {
    let mut h = Harness::new(|catalog, log| {
        catalog.register("a.A", recording("a", 1, log));
    });
    BundleSpec::new()
        .entry("META-INF/services/hotdeploy.Module", &[0xff, 0xfe, 0x00, 0x80])
        .write(&h.path("binary.pkg"));
    BundleSpec::new()
        .entry("META-INF/services/hotdeploy.Module", b"a.A\nnot/a type!\n")
        .type_def("a.A", &type_toml(&[MODULE_CAPABILITY], &[]))
        .write(&h.path("illegal.pkg"));
    BundleSpec::new().module("a.A").write(&h.path("a.pkg"));

    let summary = h.cycle();

    assert_eq!(summary.deployed, 1);
    assert_eq!(summary.unresolved, 0);
    assert!(h.deployer.failed_bundles().is_empty());
    let known: Vec<&str> = h.deployer.known_bundles().iter().map(|b| b.name()).collect();
    assert_eq!(known, vec!["a.pkg"]);
    assert_eq!(h.staged(), 1);
}
