//! Persisted byte sinks a [`crate::PdfDocument`] commits revisions into.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Where a document's bytes live.
///
/// Incremental updates are a single [`Storage::append`]; full rewrites are a
/// single [`Storage::replace`]. After a failed `append` the document calls
/// [`Storage::truncate`] with the previous length.
pub trait Storage {
    /// Read the complete current content.
    fn load(&mut self) -> io::Result<Vec<u8>>;

    /// Extend the content with `bytes`.
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Cut the content back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Replace the content with `bytes` in one step.
    fn replace(&mut self, bytes: &[u8]) -> io::Result<()>;
}

// ── MemoryStorage ─────────────────────────────────────────────────────────────

/// A document held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    bytes: Vec<u8>,
}

impl MemoryStorage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

impl Storage for MemoryStorage {
    fn load(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.bytes.truncate(len);
        Ok(())
    }

    fn replace(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.bytes = bytes.to_vec();
        Ok(())
    }
}

// ── FileStorage ───────────────────────────────────────────────────────────────

/// A document stored in a file on disk.
///
/// `replace` writes a sibling temporary file and renames it over the
/// original, so a crash leaves either the old or the new file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".pdfattach-tmp");
        self.path.with_file_name(name)
    }
}

impl Storage for FileStorage {
    fn load(&mut self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(bytes)?;
        file.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_all()
    }

    fn replace(&mut self, bytes: &[u8]) -> io::Result<()> {
        let temp = self.temp_path();
        let result = fs::write(&temp, bytes).and_then(|()| fs::rename(&temp, &self.path));
        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }
}
