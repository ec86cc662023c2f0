//! Deployable bundles
//!
//! A [`Bundle`] is one archive file in the watched directory. Loading it
//! stages a private copy, opens a [`BundleDomain`] over the copy, and
//! instantiates every implementation its service descriptor lists. The source
//! file is never held open, so it can be replaced while the bundle runs.

use std::fmt;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::container::ModuleContainer;
use crate::descriptor;
use crate::domain::{BundleArchive, BundleDomain, DomainId, RootDomain};
use crate::error::DeployError;
use crate::snapshot::{FileRecord, has_extension};

/// Suffix of staged bundle copies inside the staging directory.
pub const STAGED_SUFFIX: &str = ".staged";

/// Identity of a bundle file: two bundles with equal ids are the same unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleId {
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
}

impl BundleId {
    pub fn new(name: impl Into<String>, size: u64, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
        }
    }

    pub fn from_record(record: &FileRecord) -> Self {
        Self::new(record.name.clone(), record.size, record.modified)
    }

    /// Read the identity of the file at `path`.
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a UTF-8 file name: {}", path.display()),
                )
            })?;
        Ok(Self::new(name, metadata.len(), metadata.modified()?))
    }

    pub fn matches(&self, record: &FileRecord) -> bool {
        self.name == record.name && self.size == record.size && self.modified == record.modified
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modified = self
            .modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        write!(f, "{} ({} bytes, modified {})", self.name, self.size, modified)
    }
}

/// What every bundle needs from the deployer.
#[derive(Debug, Clone)]
pub struct BundleContext {
    /// Directory staged copies are written to
    pub staging_dir: PathBuf,
    /// Capability whose implementations are instantiated
    pub capability: String,
    /// Root of the domain tree bundle domains register with
    pub root: Arc<RootDomain>,
}

struct LoadedBundle {
    staged: TempPath,
    digest: String,
    domain: Arc<BundleDomain>,
    containers: Vec<Arc<ModuleContainer>>,
}

/// One bundle file and, once loaded, its domain and module containers.
pub struct Bundle {
    id: BundleId,
    path: PathBuf,
    context: BundleContext,
    loaded: Mutex<Option<LoadedBundle>>,
    last_error: Mutex<Option<Arc<DeployError>>>,
}

impl Bundle {
    /// Whether the file at `path` looks deployable: matching extension and a
    /// service descriptor naming at least one implementation of `capability`.
    ///
    /// Never fails; any problem reading the file counts as "no".
    pub fn accepted(path: &Path, extension: &str, capability: &str) -> bool {
        if !has_extension(path, extension) {
            return false;
        }
        let archive = match BundleArchive::open(path) {
            Ok(archive) => archive,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable bundle");
                return false;
            }
        };
        match descriptor::discover(&archive, capability) {
            Ok(names) if names.is_empty() => {
                debug!(path = %path.display(), capability = %capability, "Bundle provides no implementations");
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring bundle with a bad descriptor");
                false
            }
        }
    }

    /// Open a bundle for the file at `path`, reading its identity.
    pub fn open(path: &Path, context: BundleContext) -> io::Result<Self> {
        let id = BundleId::of_file(path)?;
        Ok(Self::with_id(id, path.to_path_buf(), context))
    }

    pub fn with_id(id: BundleId, path: PathBuf, context: BundleContext) -> Self {
        Self {
            id,
            path,
            context,
            loaded: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &BundleId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }

    /// Load the bundle and return its module containers.
    ///
    /// Memoized: once loaded, later calls return the same containers. On
    /// failure nothing is left behind; the domain is unregistered and the
    /// staged copy deleted.
    pub fn load(self: &Arc<Self>) -> Result<Vec<Arc<ModuleContainer>>, DeployError> {
        let mut loaded = self.loaded.lock();
        if let Some(existing) = loaded.as_ref() {
            return Ok(existing.containers.clone());
        }

        let staged = self.stage()?;
        let digest = match digest_file(&staged) {
            Ok(digest) => digest,
            Err(source) => {
                discard_staged(staged);
                return Err(self.staging_error(source));
            }
        };

        let domain = match BundleDomain::open(&self.id.name, &staged, &self.context.root) {
            Ok(domain) => domain,
            Err(e) => {
                discard_staged(staged);
                return Err(e);
            }
        };
        self.context.root.register(domain.clone());

        match self.instantiate_all(&domain) {
            Ok(containers) => {
                info!(
                    bundle = %self.id.name,
                    modules = containers.len(),
                    sha256 = %digest,
                    "Loaded bundle"
                );
                *loaded = Some(LoadedBundle {
                    staged,
                    digest,
                    domain,
                    containers: containers.clone(),
                });
                Ok(containers)
            }
            Err(e) => {
                debug!(bundle = %self.id.name, error = %e, "Bundle load failed");
                self.context.root.unregister(domain.id());
                drop(domain);
                discard_staged(staged);
                Err(e)
            }
        }
    }

    fn stage(&self) -> Result<TempPath, DeployError> {
        let mut source = File::open(&self.path).map_err(|e| self.staging_error(e))?;
        let mut staged = tempfile::Builder::new()
            .prefix(&format!("{}_", self.id.name))
            .suffix(STAGED_SUFFIX)
            .tempfile_in(&self.context.staging_dir)
            .map_err(|e| self.staging_error(e))?;
        io::copy(&mut source, staged.as_file_mut()).map_err(|e| self.staging_error(e))?;
        debug!(bundle = %self.id.name, staged = %staged.path().display(), "Staged bundle");
        Ok(staged.into_temp_path())
    }

    fn staging_error(&self, source: io::Error) -> DeployError {
        DeployError::Staging {
            bundle: self.id.name.clone(),
            source,
        }
    }

    fn instantiate_all(
        self: &Arc<Self>,
        domain: &BundleDomain,
    ) -> Result<Vec<Arc<ModuleContainer>>, DeployError> {
        let capability = &self.context.capability;
        let names = descriptor::discover(domain, capability)?;

        let mut containers = Vec::with_capacity(names.len());
        for name in names {
            let resolved = domain.resolve(&name)?;
            if !resolved.implements(capability) {
                return Err(DeployError::Instantiation {
                    type_name: name,
                    reason: format!("does not implement {capability}"),
                });
            }
            let module = resolved.instantiate()?;
            let container =
                ModuleContainer::new(&name, module, self.id.clone(), Arc::downgrade(self))
                    .map_err(|e| DeployError::Instantiation {
                        type_name: name.clone(),
                        reason: e.to_string(),
                    })?;
            containers.push(Arc::new(container));
        }
        Ok(containers)
    }

    /// Unregister the domain, drop the modules and delete the staged copy.
    ///
    /// Returns `false` if the bundle was not loaded.
    pub fn unload(&self) -> bool {
        let Some(LoadedBundle {
            staged,
            domain,
            containers,
            ..
        }) = self.loaded.lock().take()
        else {
            return false;
        };

        let purged = self.context.root.unregister(domain.id());
        drop(containers);
        drop(domain);
        discard_staged(staged);
        info!(bundle = %self.id.name, purged, "Unloaded bundle");
        true
    }

    /// Containers of the current load, empty when not loaded.
    pub fn loaded_containers(&self) -> Vec<Arc<ModuleContainer>> {
        self.loaded
            .lock()
            .as_ref()
            .map(|l| l.containers.clone())
            .unwrap_or_default()
    }

    /// SHA-256 of the staged copy, hex encoded.
    pub fn staged_digest(&self) -> Option<String> {
        self.loaded.lock().as_ref().map(|l| l.digest.clone())
    }

    pub fn staged_path(&self) -> Option<PathBuf> {
        self.loaded.lock().as_ref().map(|l| l.staged.to_path_buf())
    }

    pub fn domain_id(&self) -> Option<DomainId> {
        self.loaded.lock().as_ref().map(|l| l.domain.id())
    }

    pub fn last_error(&self) -> Option<Arc<DeployError>> {
        self.last_error.lock().clone()
    }

    pub fn set_last_error(&self, error: Option<DeployError>) {
        *self.last_error.lock() = error.map(Arc::new);
    }
}

fn digest_file(path: &Path) -> io::Result<String> {
    let contents = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}

fn discard_staged(staged: TempPath) {
    let path = staged.to_path_buf();
    if let Err(e) = staged.close() {
        warn!(staged = %path.display(), error = %e, "Failed to delete staged copy");
    }
}

impl PartialEq for Bundle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Bundle {}

impl Hash for Bundle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bundle({}", self.id)?;
        if let Some(error) = self.last_error() {
            write!(f, ", last error: {error}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FactoryCatalog;
    use hotdeploy_kernel::{MODULE_CAPABILITY, Module, ModuleResult, factory_fn};
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    struct Hello;

    impl Module for Hello {
        fn module_id(&self) -> String {
            "hello".to_string()
        }

        fn start_module(&mut self) -> ModuleResult<()> {
            Ok(())
        }

        fn stop_module(&mut self) -> ModuleResult<()> {
            Ok(())
        }
    }

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (entry, body) in entries {
            writer.start_file(*entry, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        watch: PathBuf,
        context: BundleContext,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().to_path_buf();
        let staging = watch.join("tmp");
        fs::create_dir_all(&staging).unwrap();
        let catalog = FactoryCatalog::new();
        catalog.register("hello.Hello", factory_fn(|| Hello));
        Fixture {
            _dir: dir,
            watch,
            context: BundleContext {
                staging_dir: staging,
                capability: MODULE_CAPABILITY.to_string(),
                root: RootDomain::new(catalog),
            },
        }
    }

    const HELLO: &[(&str, &str)] = &[
        ("META-INF/services/hotdeploy.Module", "hello.Hello\n"),
        ("types/hello.Hello.toml", "implements = [\"hotdeploy.Module\"]\n"),
    ];

    fn staged_files(fx: &Fixture) -> usize {
        fs::read_dir(&fx.context.staging_dir).unwrap().count()
    }

    #[test]
    fn test_accepted_requires_extension_and_implementations() {
        let fx = fixture();
        let good = fx.watch.join("hello.pkg");
        write_zip(&good, HELLO);
        let empty = fx.watch.join("empty.pkg");
        write_zip(&empty, &[("types/x.Y.toml", "")]);
        let junk = fx.watch.join("junk.pkg");
        fs::write(&junk, b"not a zip").unwrap();
        let renamed = fx.watch.join("hello.zip");
        fs::copy(&good, &renamed).unwrap();

        assert!(Bundle::accepted(&good, "pkg", MODULE_CAPABILITY));
        assert!(!Bundle::accepted(&empty, "pkg", MODULE_CAPABILITY));
        assert!(!Bundle::accepted(&junk, "pkg", MODULE_CAPABILITY));
        assert!(!Bundle::accepted(&renamed, "pkg", MODULE_CAPABILITY));
        assert!(!Bundle::accepted(&fx.watch.join("absent.pkg"), "pkg", MODULE_CAPABILITY));
    }

    #[test]
    fn test_accepted_rejects_corrupt_descriptors() {
        let fx = fixture();
        let binary = fx.watch.join("binary.pkg");
        let mut writer = zip::ZipWriter::new(File::create(&binary).unwrap());
        writer
            .start_file("META-INF/services/hotdeploy.Module", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&[0xff, 0xfe, 0x00, 0x80]).unwrap();
        writer.finish().unwrap();
        let illegal = fx.watch.join("illegal.pkg");
        write_zip(&illegal, &[("META-INF/services/hotdeploy.Module", "hello/Hello!\n")]);
        let huge = fx.watch.join("huge.pkg");
        fs::write(
            &huge,
            crate::domain::archive::zip64_with_declared_size(
                "META-INF/services/hotdeploy.Module",
                1 << 62,
            ),
        )
        .unwrap();

        assert!(!Bundle::accepted(&binary, "pkg", MODULE_CAPABILITY));
        assert!(!Bundle::accepted(&illegal, "pkg", MODULE_CAPABILITY));
        assert!(!Bundle::accepted(&huge, "pkg", MODULE_CAPABILITY));
    }

    #[test]
    fn test_load_is_memoized_and_unload_cleans_up() {
        let fx = fixture();
        let path = fx.watch.join("hello.pkg");
        write_zip(&path, HELLO);
        let bundle = Arc::new(Bundle::open(&path, fx.context.clone()).unwrap());

        let first = bundle.load().unwrap();
        let second = bundle.load().unwrap();
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert_eq!(first[0].type_name(), "hello.Hello");
        assert_eq!(first[0].bundle_id(), bundle.id());
        assert_eq!(staged_files(&fx), 1);
        assert_eq!(bundle.staged_digest().map(|d| d.len()), Some(64));
        assert!(fx.context.root.is_cached("hello.Hello"));

        assert!(bundle.unload());
        assert!(!bundle.unload());
        assert_eq!(staged_files(&fx), 0);
        assert!(!fx.context.root.is_cached("hello.Hello"));
        assert_eq!(fx.context.root.child_count(), 0);
        assert!(bundle.loaded_containers().is_empty());
    }

    #[test]
    fn test_failed_load_leaves_nothing_behind() {
        let fx = fixture();
        let path = fx.watch.join("needy.pkg");
        write_zip(
            &path,
            &[
                ("META-INF/services/hotdeploy.Module", "needy.Needy"),
                (
                    "types/needy.Needy.toml",
                    "implements = [\"hotdeploy.Module\"]\nrequires = [\"absent.Dep\"]",
                ),
            ],
        );
        let bundle = Arc::new(Bundle::open(&path, fx.context.clone()).unwrap());

        let err = bundle.load().unwrap_err();
        assert!(err.is_resolution());
        assert_eq!(err.type_name(), Some("needy.Needy"));
        assert!(!bundle.is_loaded());
        assert_eq!(staged_files(&fx), 0);
        assert_eq!(fx.context.root.child_count(), 0);
    }

    #[test]
    fn test_type_without_capability_is_rejected() {
        let fx = fixture();
        let path = fx.watch.join("liar.pkg");
        write_zip(
            &path,
            &[
                ("META-INF/services/hotdeploy.Module", "hello.Hello"),
                ("types/hello.Hello.toml", ""),
            ],
        );
        let bundle = Arc::new(Bundle::open(&path, fx.context.clone()).unwrap());

        let err = bundle.load().unwrap_err();
        assert!(matches!(err, DeployError::Instantiation { .. }));
        assert!(err.to_string().contains("does not implement"));
    }

    #[test]
    fn test_identity_equality_and_display() {
        let fx = fixture();
        let path = fx.watch.join("hello.pkg");
        write_zip(&path, HELLO);
        let a = Bundle::open(&path, fx.context.clone()).unwrap();
        let b = Bundle::open(&path, fx.context.clone()).unwrap();
        assert_eq!(a, b);

        a.set_last_error(Some(DeployError::Instantiation {
            type_name: "x.Y".to_string(),
            reason: "boom".to_string(),
        }));
        let shown = a.to_string();
        assert!(shown.starts_with("Bundle(hello.pkg ("));
        assert!(shown.contains("boom"));
        a.set_last_error(None);
        assert!(a.last_error().is_none());
    }
}
