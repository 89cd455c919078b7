//! Persistent reference resolution.
//!
//! PERSID and BINPERSID hand an opaque id to a caller-supplied resolver.
//! The decoder passes the id through verbatim; any sanitization belongs to
//! the resolver implementation.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("not found")]
    NotFound,
    /// The id is not acceptable to this resolver (e.g. escapes its root).
    #[error("rejected id: {0}")]
    Rejected(String),
    #[error("I/O error: {0}")]
    Io(String),
}

/// Maps a persistent id to the bytes it stands for.
pub trait Resolver {
    fn resolve(&self, id: &str) -> Result<Vec<u8>, ResolveError>;
}

impl<F> Resolver for F
where
    F: Fn(&str) -> Option<Vec<u8>>,
{
    fn resolve(&self, id: &str) -> Result<Vec<u8>, ResolveError> {
        self(id).ok_or(ResolveError::NotFound)
    }
}

/// Resolver for streams that are not expected to carry persistent ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResolver;

impl Resolver for NoResolver {
    fn resolve(&self, _id: &str) -> Result<Vec<u8>, ResolveError> {
        Err(ResolveError::NotFound)
    }
}

/// In-memory id → blob table.
#[derive(Debug, Default, Clone)]
pub struct MapResolver {
    blobs: HashMap<String, Vec<u8>>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, blob: impl Into<Vec<u8>>) -> &mut Self {
        self.blobs.insert(id.into(), blob.into());
        self
    }
}

impl Resolver for MapResolver {
    fn resolve(&self, id: &str) -> Result<Vec<u8>, ResolveError> {
        self.blobs.get(id).cloned().ok_or(ResolveError::NotFound)
    }
}

/// Reads `<root>/<id>` for each id, the layout used by archives that keep
/// tensor storages next to the pickle (e.g. `archive/data/0`).
///
/// Ids must be a single plain path component.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, ResolveError> {
        if id.is_empty() {
            return Err(ResolveError::Rejected("empty id".to_string()));
        }
        if id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
            return Err(ResolveError::Rejected(id.to_string()));
        }
        Ok(self.root.join(id))
    }
}

impl Resolver for DirectoryResolver {
    fn resolve(&self, id: &str) -> Result<Vec<u8>, ResolveError> {
        let path = self.path_for(id)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ResolveError::NotFound),
            Err(e) => Err(ResolveError::Io(format!("{}: {e}", path.display()))),
        }
    }
}
