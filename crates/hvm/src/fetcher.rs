//! Kernel binary sources

use crate::error::FetchError;
use std::path::{Path, PathBuf};

/// Supplies the guest binary to [`Vm::init`](crate::Vm::init).
pub trait KernelFetcher {
    fn fetch(&self) -> Result<Vec<u8>, FetchError>;

    /// Human-readable origin, for logs.
    fn source(&self) -> String;
}

/// Reads the kernel from a file (binary `.wasm` or `.wat` text).
#[derive(Debug, Clone)]
pub struct FileFetcher {
    path: PathBuf,
}

impl FileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KernelFetcher for FileFetcher {
    fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        let bytes = std::fs::read(&self.path).map_err(|source| FetchError::Io {
            path: self.path.clone(),
            source,
        })?;
        non_empty(bytes)
    }

    fn source(&self) -> String {
        self.path.display().to_string()
    }
}

/// A kernel already held in memory.
#[derive(Debug, Clone)]
pub struct BytesFetcher {
    bytes: Vec<u8>,
}

impl BytesFetcher {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }
}

impl KernelFetcher for BytesFetcher {
    fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        non_empty(self.bytes.clone())
    }

    fn source(&self) -> String {
        format!("<{} bytes in memory>", self.bytes.len())
    }
}

fn non_empty(bytes: Vec<u8>) -> Result<Vec<u8>, FetchError> {
    if bytes.is_empty() {
        return Err(FetchError::Empty);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"(module)").unwrap();

        let fetcher = FileFetcher::new(file.path());
        assert_eq!(fetcher.fetch().unwrap(), b"(module)");
        assert_eq!(fetcher.path(), file.path());
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.wasm");

        let err = FileFetcher::new(&path).fetch().unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
        assert!(err.to_string().contains("kernel.wasm"));
    }

    #[test]
    fn empty_payload_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(FileFetcher::new(file.path()).fetch(), Err(FetchError::Empty)));
        assert!(matches!(BytesFetcher::new(Vec::new()).fetch(), Err(FetchError::Empty)));
    }
}
