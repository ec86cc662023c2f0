//! Read access to a bundle's zip archive.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use zip::ZipArchive;
use zip::result::ZipError;

use super::{DomainId, Resource, ResourceLookup, ResourceOrigin};
use crate::error::DeployError;

/// Largest entry read out of a bundle archive.
pub const MAX_ENTRY_BYTES: u64 = 16 * 1024 * 1024;

/// An opened bundle archive.
///
/// Entry reads are serialized through an internal lock since the zip reader
/// needs `&mut` access.
pub struct BundleArchive {
    path: PathBuf,
    domain: DomainId,
    zip: Mutex<ZipArchive<BufReader<File>>>,
}

impl BundleArchive {
    pub fn open(path: &Path) -> Result<Self, DeployError> {
        Self::open_for(path, DomainId::ROOT)
    }

    pub(crate) fn open_for(path: &Path, domain: DomainId) -> Result<Self, DeployError> {
        let archive_error = |reason: String| DeployError::Archive {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|e| archive_error(e.to_string()))?;
        let zip = ZipArchive::new(BufReader::new(file)).map_err(|e| archive_error(e.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            domain,
            zip: Mutex::new(zip),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.zip.lock().file_names().any(|n| n == entry)
    }

    /// Read an entry, or `None` if the archive has no such entry.
    pub fn read_entry(&self, entry: &str) -> Result<Option<Vec<u8>>, DeployError> {
        let mut zip = self.zip.lock();
        let mut file = match zip.by_name(entry) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(DeployError::Archive {
                    path: self.path.clone(),
                    reason: format!("{entry}: {e}"),
                });
            }
        };
        let too_large = || DeployError::Archive {
            path: self.path.clone(),
            reason: format!("{entry}: entry exceeds {MAX_ENTRY_BYTES} bytes"),
        };
        // The declared size comes from the archive itself; never trust it for allocation.
        if file.size() > MAX_ENTRY_BYTES {
            return Err(too_large());
        }
        let mut bytes = Vec::new();
        file.by_ref()
            .take(MAX_ENTRY_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| DeployError::Archive {
                path: self.path.clone(),
                reason: format!("{entry}: {e}"),
            })?;
        if bytes.len() as u64 > MAX_ENTRY_BYTES {
            return Err(too_large());
        }
        Ok(Some(bytes))
    }
}

impl ResourceLookup for BundleArchive {
    fn find_resources(&self, path: &str) -> Result<Vec<Resource>, DeployError> {
        Ok(self
            .read_entry(path)?
            .map(|bytes| Resource {
                origin: ResourceOrigin::Bundle {
                    domain: self.domain,
                    archive: self.path.clone(),
                },
                path: path.to_string(),
                bytes: Arc::from(bytes),
            })
            .into_iter()
            .collect())
    }
}

impl std::fmt::Debug for BundleArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleArchive")
            .field("path", &self.path)
            .field("domain", &self.domain)
            .finish()
    }
}

#[cfg(test)]
/// A stored zip64 entry whose headers declare `declared` bytes but carry none.
pub(crate) fn zip64_with_declared_size(name: &str, declared: u64) -> Vec<u8> {
    let name = name.as_bytes();
    let mut extra = Vec::new();
    extra.extend_from_slice(&1u16.to_le_bytes());
    extra.extend_from_slice(&16u16.to_le_bytes());
    extra.extend_from_slice(&declared.to_le_bytes());
    extra.extend_from_slice(&0u64.to_le_bytes());

    let mut out = Vec::new();
    // local file header
    out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
    out.extend_from_slice(&45u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0x0021u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&u32::MAX.to_le_bytes());
    out.extend_from_slice(&u32::MAX.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(&extra);

    // central directory
    let cd_offset = out.len() as u32;
    out.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
    out.extend_from_slice(&45u16.to_le_bytes());
    out.extend_from_slice(&45u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0x0021u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&u32::MAX.to_le_bytes());
    out.extend_from_slice(&u32::MAX.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(&extra);
    let cd_size = out.len() as u32 - cd_offset;

    // end of central directory
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}
