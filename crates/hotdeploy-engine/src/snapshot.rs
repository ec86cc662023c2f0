//! Point-in-time listing of the bundle files in the watched directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Whether `path` carries extension `ext`, compared ASCII case-insensitively.
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// One eligible file at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRecord {
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
}

impl FileRecord {
    pub fn new(name: impl Into<String>, size: u64, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
        }
    }
}

/// Records of every eligible file, sorted by name.
///
/// Equality only looks at the records, so two captures of an unchanged
/// directory compare equal whatever order the OS listed the entries in.
#[derive(Debug, Clone)]
pub struct Snapshot {
    dir: PathBuf,
    records: Vec<FileRecord>,
}

impl Snapshot {
    /// List regular files in `dir` whose extension matches `extension`.
    pub fn capture(dir: &Path, extension: &str) -> io::Result<Self> {
        let mut records = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !has_extension(&path, extension) {
                continue;
            }
            // Entries can vanish between listing and stat.
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            records.push(FileRecord::new(name, metadata.len(), metadata.modified()?));
        }
        Ok(Self::from_records(dir, records))
    }

    pub fn from_records(dir: impl Into<PathBuf>, mut records: Vec<FileRecord>) -> Self {
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            dir: dir.into(),
            records,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    pub fn get(&self, name: &str) -> Option<&FileRecord> {
        self.records
            .binary_search_by(|r| r.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.records[i])
    }

    pub fn path_of(&self, record: &FileRecord) -> PathBuf {
        self.dir.join(&record.name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

impl Eq for Snapshot {}
