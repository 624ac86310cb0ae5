//! Persistence of the registry document.
//!
//! The document is read whole and written whole.  Each read yields a
//! [`Revision`], the SHA-256 of the bytes on disk; a write is only
//! accepted if the file still hashes to the revision it was loaded at,
//! otherwise it fails with `ConcurrentModification` instead of clobbering
//! another writer.  The check and the write happen under an exclusive lock
//! on a sibling `.<name>.lock` file.  New content goes to a uniquely named
//! temp file in the same directory that is persisted over the document, so
//! readers never see a half-written file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{EntityKind, RegistryError, Result};
use crate::registry::Registry;

/// Content hash of a document as it was read or written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision(String);

impl Revision {
    fn of(bytes: &[u8]) -> Self {
        Revision(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A registry together with the revision it was loaded at.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub registry: Registry,
    pub revision: Revision,
}

pub struct DocumentStore {
    path: PathBuf,
}

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Snapshot> {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RegistryError::NotInitialized(self.path.clone()));
            }
            Err(e) => return Err(self.io_error(e)),
        };
        debug!("Read {} bytes from {}", bytes.len(), self.path.display());

        let mut registry: Registry =
            serde_json::from_slice(&bytes).map_err(|e| RegistryError::Malformed {
                path: self.path.clone(),
                source: e,
            })?;
        registry.normalize()?;
        Ok(Snapshot {
            registry,
            revision: Revision::of(&bytes),
        })
    }

    /// Writes `registry` if the document is still at `expected`.  `None`
    /// means the document must not exist yet.
    pub fn save(&self, registry: &Registry, expected: Option<&Revision>) -> Result<Revision> {
        let _lock = self.lock()?;
        let current = self.revision()?;
        if current.as_ref() != expected {
            if expected.is_none() {
                return Err(RegistryError::AlreadyExists {
                    kind: EntityKind::Document,
                    name: self.path.display().to_string(),
                });
            }
            return Err(RegistryError::ConcurrentModification(self.path.clone()));
        }

        let bytes = encode(registry).map_err(|e| RegistryError::Malformed {
            path: self.path.clone(),
            source: e,
        })?;
        self.write_atomic(&bytes).map_err(|e| self.io_error(e))?;
        debug!("Wrote {} bytes to {}", bytes.len(), self.path.display());
        Ok(Revision::of(&bytes))
    }

    /// Revision of the document on disk, `None` if there is none.
    pub fn revision(&self) -> Result<Option<Revision>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(Revision::of(&bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".into());
        self.path.with_file_name(format!(".{name}.lock"))
    }

    /// Exclusive advisory lock, released when the returned file is dropped.
    fn lock(&self) -> Result<fs::File> {
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| self.io_error(e))?;
        file.lock().map_err(|e| self.io_error(e))?;
        Ok(file)
    }

    fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> RegistryError {
        RegistryError::Persistence {
            path: self.path.clone(),
            source,
        }
    }
}

/// Pretty JSON with four-space indentation, the layout the engine's own
/// tooling writes.
fn encode(registry: &Registry) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    registry.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}
