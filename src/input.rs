//! Where Add reads payloads from and where Extract hands decoded files to.

use crate::EmbeddedFile;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};

// ── AttachmentInput ───────────────────────────────────────────────────────────

/// The bytes of one attachment, held in memory or read lazily at Add time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// One `(name, payload, description)` request for [`crate::PdfDocument::add`].
#[derive(Debug, Clone)]
pub struct AttachmentInput {
    /// Name-tree key and declared filename.
    pub name: String,
    pub description: Option<String>,
    pub payload: Payload,
    /// Stored as `/Subtype` on the embedded stream.
    pub mime_type: Option<String>,
    /// Overrides the file's modification time for `/Params/ModDate`.
    pub modified: Option<DateTime<Utc>>,
}

impl AttachmentInput {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        Self {
            mime_type: guess_mime_type(&name),
            name,
            description: None,
            payload: Payload::Bytes(data.into()),
            modified: None,
        }
    }

    /// Attach the file at `path` under its final path component. The file is
    /// not read until the attachment is added.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            mime_type: guess_mime_type(&name),
            name,
            description: None,
            payload: Payload::Path(path.to_path_buf()),
            modified: None,
        }
    }

    /// Parse a `"path, description"` argument. The description is optional
    /// and everything after the first comma belongs to it.
    ///
    /// ```
    /// # use pdfattach::AttachmentInput;
    /// let input = AttachmentInput::parse("data/report.csv, Q3 figures, final");
    /// assert_eq!(input.name, "report.csv");
    /// assert_eq!(input.description.as_deref(), Some("Q3 figures, final"));
    /// ```
    pub fn parse(arg: &str) -> Self {
        match arg.split_once(',') {
            Some((path, desc)) => {
                let input = Self::from_path(path.trim());
                match desc.trim() {
                    "" => input,
                    desc => input.with_description(desc),
                }
            }
            None => Self::from_path(arg.trim()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Read the payload and its modification time.
    pub(crate) fn load(&self) -> io::Result<(Vec<u8>, Option<DateTime<Utc>>)> {
        match &self.payload {
            Payload::Bytes(data) => Ok((data.clone(), self.modified)),
            Payload::Path(path) => {
                let data = std::fs::read(path)?;
                let modified = match self.modified {
                    Some(m) => Some(m),
                    None => std::fs::metadata(path)?
                        .modified()
                        .ok()
                        .map(DateTime::<Utc>::from),
                };
                Ok((data, modified))
            }
        }
    }
}

fn guess_mime_type(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "xml" => "text/xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => return None,
    };
    Some(mime.to_owned())
}

// ── Extract sinks ─────────────────────────────────────────────────────────────

/// Receives each attachment Extract decodes successfully.
///
/// An error returned here aborts the whole extraction.
pub trait ExtractSink {
    fn write_attachment(&mut self, file: &EmbeddedFile) -> io::Result<()>;
}

/// Collects decoded files in memory.
impl ExtractSink for Vec<EmbeddedFile> {
    fn write_attachment(&mut self, file: &EmbeddedFile) -> io::Result<()> {
        self.push(file.clone());
        Ok(())
    }
}

/// Writes each file into a directory via [`EmbeddedFile::save_to_disk`].
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            written: Vec::new(),
        }
    }

    /// Paths written so far, in extraction order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl ExtractSink for DirectorySink {
    fn write_attachment(&mut self, file: &EmbeddedFile) -> io::Result<()> {
        file.save_to_disk(&self.dir)?;
        self.written.push(self.dir.join(file.safe_filename()));
        Ok(())
    }
}
