//! # pdfattach
//!
//! A Rust library for managing embedded-file attachments inside PDF documents.
//!
//! ## What this crate does
//!
//! 1. **List** - walks the `/Names/EmbeddedFiles` name tree in key order.
//! 2. **Add** - encodes payloads as embedded-file streams, links file
//!    specifications into the name tree and commits one new revision.
//! 3. **Extract** - decodes every (or a chosen subset of) attachment, checking
//!    the declared size and MD5 checksum.
//! 4. **Remove** - unlinks entries from the name tree and frees the objects
//!    nothing else references any more.
//! 5. **Validate** - walks the object graph and the name tree and reports
//!    structural violations without repairing anything.
//!
//! Mutations never rewrite earlier bytes: each successful Add or Remove
//! appends one incremental update (objects, cross-reference section,
//! trailer). A failed call leaves both the in-memory store and the persisted
//! bytes exactly as they were.
//!
//! ## Quick example
//!
//! ```no_run
//! use pdfattach::{AttachConfig, AttachmentInput, FileStorage, PdfDocument};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = FileStorage::new("invoice.pdf");
//! let mut doc = PdfDocument::open(storage, AttachConfig::default())?;
//!
//! doc.add([AttachmentInput::from_path("factur-x.xml").with_description("e-invoice")])?;
//!
//! for entry in doc.list()? {
//!     println!("{}", entry.name);
//! }
//!
//! assert!(doc.validate().is_valid());
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

mod catalog;
mod document;
mod document_attachments;
mod document_validation;
mod embedded;
mod file_spec;
mod filters;
mod input;
mod name_tree;
mod object_writer;
mod pdf_utils;
mod storage;
mod store;
mod validator;
mod xref;

pub use catalog::CollectionView;
pub use document::PdfDocument;
pub use document_attachments::{EntryFailure, ExtractReport, RemoveReport};
pub use embedded::{AttachmentEntry, EmbeddedFile, EmbeddedFileMetadata};
pub use filters::FilterPolicy;
pub use input::{AttachmentInput, DirectorySink, ExtractSink, Payload};
pub use name_tree::{KeyRange, NameTree, NameTreeIter, NameTreeNode, TreeFault};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::{Entry, ObjectStore, ReferenceWalk, Revision, RevisionMarker, Slot};
pub use validator::{ValidationReport, Violation};
pub use xref::{CommitMode, WrittenRevision};

/// Object identifier: `(object number, generation)`.
pub use lopdf::ObjectId;

// ── Configuration ────────────────────────────────────────────────────────────

/// Runtime configuration for [`PdfDocument`].
#[derive(Debug, Clone)]
pub struct AttachConfig {
    /// Maximum number of entries (leaf) or kids (intermediate) held by one
    /// name-tree node before it is split. Values below 2 are treated as 2.
    pub fan_out: usize,

    /// How embedded-file payloads are filter-encoded by Add.
    pub filter_policy: FilterPolicy,

    /// Under [`FilterPolicy::Auto`], payloads shorter than this are stored
    /// without a filter.
    pub compression_threshold: usize,

    /// When `true`, Add stores the MD5 of the decoded payload in
    /// `/Params/CheckSum`.
    pub write_checksums: bool,

    /// After this many incremental updates have been appended through one
    /// handle, the next commit rewrites the whole file instead.
    pub max_incremental_updates: Option<usize>,

    /// Rewrite the whole file on every commit.
    pub always_rewrite: bool,

    /// If set, Add rejects payloads larger than this with
    /// [`AttachError::FileSizeExceeded`] and Extract reports such entries
    /// instead of writing them.
    pub max_attachment_size: Option<usize>,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            fan_out: 32,
            filter_policy: FilterPolicy::Auto,
            compression_threshold: 256,
            write_checksums: true,
            max_incremental_updates: Some(64),
            always_rewrite: false,
            max_attachment_size: None,
        }
    }
}

impl AttachConfig {
    pub(crate) fn effective_fan_out(&self) -> usize {
        self.fan_out.max(2)
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

/// Every error that this crate can produce.
#[derive(Error, Debug)]
pub enum AttachError {
    /// A filesystem I/O error occurred while reading an input or writing an
    /// extracted file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The underlying lopdf parser returned an error.
    #[error("PDF parse error: {0}")]
    ParseError(#[from] lopdf::Error),

    /// The input bytes do not form a usable PDF document.
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// No revision defines the object, or the latest revision marks it free.
    #[error("broken reference: {number} {generation} R")]
    BrokenReference { number: u32, generation: u16 },

    /// The persisted byte sink could not be extended or replaced.
    #[error("failed to write revision: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// Add was asked to attach a name that is already present.
    #[error("attachment '{0}' already exists")]
    DuplicateName(String),

    /// No attachment with this name exists.
    #[error("attachment '{0}' not found")]
    NotFound(String),

    /// The MD5 of the decoded payload differs from `/Params/CheckSum`.
    #[error("checksum mismatch for '{name}': declared {declared}, computed {computed}")]
    IntegrityMismatch {
        name: String,
        declared: String,
        computed: String,
    },

    /// The decoded payload length differs from `/Params/Size`.
    #[error("size mismatch for '{name}': declared {declared} bytes, decoded {actual} bytes")]
    SizeMismatch {
        name: String,
        declared: usize,
        actual: usize,
    },

    /// The object graph or name tree violates a structural invariant.
    #[error("malformed structure: {0}")]
    MalformedStructure(String),

    /// An embedded stream was found but could not be decoded.
    #[error("Failed to extract embedded file '{0}': {1}")]
    ExtractionError(String, String),

    /// A payload exceeds [`AttachConfig::max_attachment_size`].
    #[error("attachment '{name}' is {size} bytes, limit is {limit}")]
    FileSizeExceeded {
        name: String,
        size: usize,
        limit: usize,
    },

    /// The document is encrypted; attachments cannot be written into it.
    #[error("document is encrypted")]
    Encrypted,
}

impl AttachError {
    pub(crate) fn broken(id: ObjectId) -> Self {
        AttachError::BrokenReference {
            number: id.0,
            generation: id.1,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        AttachError::MalformedStructure(message.into())
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AttachError>;
