// src/storage/mod.rs
mod file;
#[cfg(test)]
pub(crate) mod memory;

pub use file::FileStorage;

use std::path::{Path, PathBuf};
use std::{fmt, io};
use url::Url;

#[derive(Debug)]
pub enum StorageError {
    NotFound(String),
    WriteError { path: String, source: io::Error },
    InvalidPath(String),
    UnsupportedScheme(String),
    Io(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "not found: {}", path),
            Self::WriteError { path, source } => write!(f, "cannot write {}: {}", path, source),
            Self::InvalidPath(path) => write!(f, "invalid storage path: {:?}", path),
            Self::UnsupportedScheme(url) => write!(f, "unknown storage: {:?}", url),
            Self::Io(e) => write!(f, "storage IO error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(error: io::Error) -> Self {
        StorageError::Io(error)
    }
}

/// Byte-blob store keyed by logical, slash separated paths relative to the
/// backend root.
pub trait Storage {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Overwrites existing content and creates missing parent containers.
    fn write(&self, path: &str, content: &[u8]) -> Result<(), StorageError>;

    fn describe(&self) -> String;
}

/// Read and write backends of one run. Both usually point at the same root.
pub struct StoragePair {
    pub read: Box<dyn Storage>,
    pub write: Box<dyn Storage>,
}

impl StoragePair {
    pub fn new(read: Box<dyn Storage>, write: Box<dyn Storage>) -> Self {
        Self { read, write }
    }
}

/// Resolves a storage location to a backend. Paths without a scheme and
/// `file://` URLs map to the filesystem backend.
pub fn open_storage(location: &str) -> Result<Box<dyn Storage>, StorageError> {
    Ok(Box::new(FileStorage::new(resolve_file_root(location)?)))
}

fn resolve_file_root(location: &str) -> Result<PathBuf, StorageError> {
    if location.trim().is_empty() {
        return Err(StorageError::InvalidPath(location.to_string()));
    }

    let path = match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|_| StorageError::InvalidPath(location.to_string()))?,
        // single letter schemes are windows drive letters
        Ok(url) if url.scheme().len() > 1 => {
            return Err(StorageError::UnsupportedScheme(location.to_string()))
        }
        _ => PathBuf::from(shellexpand::tilde(location).to_string()),
    };

    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Joins a logical path onto a root, rejecting anything that could escape it.
pub(crate) fn join_logical(root: &Path, logical: &str) -> Result<PathBuf, StorageError> {
    let mut full = root.to_path_buf();
    let mut parts = 0;
    for part in logical.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if part == ".." || part.contains('\\') {
            return Err(StorageError::InvalidPath(logical.to_string()));
        }
        full.push(part);
        parts += 1;
    }
    if parts == 0 {
        return Err(StorageError::InvalidPath(logical.to_string()));
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_less_paths_resolve_against_cwd() {
        let root = resolve_file_root("outputs/system").unwrap();
        assert!(root.is_absolute());
        assert!(root.ends_with("outputs/system"));
    }

    #[test]
    fn file_urls_resolve_to_their_path() {
        let root = resolve_file_root("file:///var/lib/pki").unwrap();
        assert_eq!(root, PathBuf::from("/var/lib/pki"));
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        assert!(matches!(
            resolve_file_root("s3://bucket/pki"),
            Err(StorageError::UnsupportedScheme(_))
        ));
        assert!(open_storage("").is_err());
    }

    #[test]
    fn logical_paths_cannot_escape_root() {
        let root = Path::new("/srv/pki");
        assert_eq!(
            join_logical(root, "global/etc/kubernetes/pki/ca.crt").unwrap(),
            PathBuf::from("/srv/pki/global/etc/kubernetes/pki/ca.crt")
        );
        assert!(join_logical(root, "global/../../etc/passwd").is_err());
        assert!(join_logical(root, "//").is_err());
    }
}
