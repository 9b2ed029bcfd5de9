//! Cache Store — persists the last-applied `ContainerSpec` per fingerprint
//! (spec.md §4.C). Grounded on the original's
//! `dockerup/__init__.py::updated`/`__cache_name` for naming and on
//! `conf/load.rs` for the file-read/write idiom.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::spec::ContainerSpec;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache directory {0} could not be created: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("failed to read cache entry {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write cache entry {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("failed to delete cache entry {0}: {1}")]
    Delete(PathBuf, std::io::Error),
    #[error("failed to list cache directory {0}: {1}")]
    List(PathBuf, std::io::Error),
    #[error("cache entry {0} is not valid JSON: {1}")]
    Decode(PathBuf, serde_json::Error),
}

/// On-disk directory holding one file per fingerprint. Writes are atomic
/// (temp file + rename) so a crash mid-write cannot leave a half-written
/// cache entry — the original Python used a plain `open().write()`, which
/// this crate improves on per SPEC_FULL.md's ambient durability additions.
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }

    fn ensure_dir(&self) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| CacheError::CreateDir(self.dir.clone(), e))
    }

    pub fn exists(&self, fingerprint: &str) -> bool {
        self.path_for(fingerprint).is_file()
    }

    /// Reads the raw canonical bytes last written for `fingerprint`, or
    /// `None` if no entry exists.
    pub fn read_raw(&self, fingerprint: &str) -> Result<Option<String>, CacheError> {
        let path = self.path_for(fingerprint);
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Read(path, e)),
        }
    }

    /// Reads and deserializes the cached spec for `fingerprint`.
    pub fn read(&self, fingerprint: &str) -> Result<Option<ContainerSpec>, CacheError> {
        let path = self.path_for(fingerprint);
        match self.read_raw(fingerprint)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CacheError::Decode(path, e)),
            None => Ok(None),
        }
    }

    /// Writes `spec`'s canonical serialization as the applied entry for
    /// `fingerprint`, via a temp file renamed into place.
    pub fn write(&self, fingerprint: &str, spec: &ContainerSpec) -> Result<(), CacheError> {
        self.ensure_dir()?;
        let path = self.path_for(fingerprint);
        let canonical = spec
            .canonical()
            .map_err(|e| CacheError::Decode(path.clone(), e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &canonical).map_err(|e| CacheError::Write(path.clone(), e))?;
        std::fs::rename(&tmp, &path).map_err(|e| CacheError::Write(path.clone(), e))?;
        Ok(())
    }

    pub fn delete(&self, fingerprint: &str) -> Result<(), CacheError> {
        let path = self.path_for(fingerprint);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Delete(path, e)),
        }
    }

    /// Lists the fingerprints of every entry currently cached.
    pub fn list(&self) -> Result<Vec<String>, CacheError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| CacheError::List(self.dir.clone(), e))?;
        let mut fingerprints = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::List(self.dir.clone(), e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    fingerprints.push(stem.to_string());
                }
            }
        }
        fingerprints.sort();
        Ok(fingerprints)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}
