use lopdf::ObjectId;
use std::path::Path;

// ── AttachmentEntry ──────────────────────────────────────────────────────────

/// One row of [`crate::PdfDocument::list`]: a name-tree key and what it
/// points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentEntry {
    /// The name-tree key, decoded as a PDF text string.
    pub name: String,

    /// `/Desc` of the file specification, if any.
    pub description: Option<String>,

    /// The file specification the key maps to.
    pub file_spec: ObjectId,
}

// ── EmbeddedFile ─────────────────────────────────────────────────────────────

/// A file that was embedded inside a PDF document.
///
/// Returned by [`crate::PdfDocument::extract`] and handed to an
/// [`crate::ExtractSink`].
#[derive(Debug, Clone)]
pub struct EmbeddedFile {
    /// The name-tree key the file was found under.
    pub name: String,

    /// The filename as declared in the PDF file specification object
    /// (Unicode name preferred over ASCII name when both are present).
    pub filename: String,

    /// The raw, decoded file content.
    pub data: Vec<u8>,

    /// Optional metadata read from the PDF file specification and stream
    /// parameter dictionaries.
    pub metadata: EmbeddedFileMetadata,
}

impl EmbeddedFile {
    /// Write this file into `output_dir`, creating the directory if necessary.
    ///
    /// Only the final path component of [`EmbeddedFile::filename`] is used, so
    /// a declared name such as `../../etc/passwd` lands inside `output_dir`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pdfattach::{AttachConfig, FileStorage, PdfDocument};
    ///
    /// let doc = PdfDocument::open(FileStorage::new("invoice.pdf"), AttachConfig::default()).unwrap();
    /// let mut files: Vec<pdfattach::EmbeddedFile> = Vec::new();
    /// doc.extract(&[], &mut files).unwrap();
    /// for file in &files {
    ///     file.save_to_disk("./extracted").unwrap();
    /// }
    /// ```
    pub fn save_to_disk<P: AsRef<Path>>(&self, output_dir: P) -> std::io::Result<()> {
        let dir = output_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(self.safe_filename()), &self.data)
    }

    /// The final component of the declared filename, falling back to the
    /// name-tree key and then to `"attachment"`.
    pub fn safe_filename(&self) -> String {
        [self.filename.as_str(), self.name.as_str()]
            .into_iter()
            .filter_map(|candidate| Path::new(candidate).file_name())
            .filter_map(|n| n.to_str())
            .find(|n| !n.is_empty())
            .unwrap_or("attachment")
            .to_owned()
    }

    /// Returns the file extension (lowercase is not enforced), or `None` if
    /// the filename has no extension.
    ///
    /// ```
    /// # use pdfattach::{EmbeddedFile, EmbeddedFileMetadata};
    /// # let file = EmbeddedFile { name: "factur-x.xml".into(), filename: "factur-x.xml".into(), data: vec![], metadata: Default::default() };
    /// assert_eq!(file.extension(), Some("xml"));
    /// ```
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
    }

    /// Returns `true` when the file's extension matches `ext`
    /// (case-insensitive comparison).
    pub fn has_extension(&self, ext: &str) -> bool {
        self.extension()
            .map(|e| e.eq_ignore_ascii_case(ext))
            .unwrap_or(false)
    }
}

// ── EmbeddedFileMetadata ──────────────────────────────────────────────────────

/// Metadata associated with an [`EmbeddedFile`], sourced from the PDF file
/// specification dictionary and the embedded stream's `/Params` sub-dictionary.
///
/// All fields are optional: a conforming PDF need not populate them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedFileMetadata {
    /// MIME type declared in the embedded stream's `/Subtype` entry
    /// (e.g. `"application/xml"`).
    pub mime_type: Option<String>,

    /// Human-readable description from the `/Desc` entry.
    pub description: Option<String>,

    /// Modification date from `/Params/ModDate` in PDF date format
    /// (`D:YYYYMMDDHHmmSSOHH'mm'`).
    pub modification_date: Option<String>,

    /// Creation date from `/Params/CreationDate`.
    pub creation_date: Option<String>,

    /// Uncompressed file size in bytes, from `/Params/Size`.
    pub size: Option<usize>,

    /// MD5 checksum hex string from `/Params/CheckSum`, if present.
    pub checksum: Option<String>,
}

impl EmbeddedFileMetadata {
    /// Returns `true` when the declared MIME type contains the string `"xml"`.
    pub fn is_xml(&self) -> bool {
        self.mime_type
            .as_deref()
            .map(|m| m.to_ascii_lowercase().contains("xml"))
            .unwrap_or(false)
    }
}
