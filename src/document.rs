use crate::catalog::{self, CollectionView};
use crate::storage::Storage;
use crate::store::ObjectStore;
use crate::xref::{self, CommitMode, WrittenRevision};
use crate::{AttachConfig, AttachError, Result};
use lopdf::Document;
use std::io;
use tracing::{debug, info, warn};

// ── PdfDocument ───────────────────────────────────────────────────────────────

/// An open PDF together with the storage its revisions are committed to.
///
/// Reads (`list`, `extract`, `validate`) take `&self`; mutations (`add`,
/// `remove`) take `&mut self`, so a handle never sees a half-applied change.
///
/// # Opening a document
///
/// ```no_run
/// use pdfattach::{AttachConfig, FileStorage, MemoryStorage, PdfDocument};
///
/// // From a file path
/// let doc = PdfDocument::open(FileStorage::new("invoice.pdf"), AttachConfig::default()).unwrap();
///
/// // From an in-memory buffer
/// let bytes = std::fs::read("invoice.pdf").unwrap();
/// let doc = PdfDocument::open(MemoryStorage::new(bytes), AttachConfig::default()).unwrap();
///
/// // With a custom configuration
/// let cfg = AttachConfig {
///     fan_out: 16,
///     max_attachment_size: Some(10 * 1024 * 1024),
///     ..Default::default()
/// };
/// let doc = PdfDocument::open(FileStorage::new("invoice.pdf"), cfg).unwrap();
/// ```
pub struct PdfDocument<S: Storage> {
    storage: S,
    store: ObjectStore,
    config: AttachConfig,
    /// Length of the persisted bytes; the next increment is appended here.
    persisted_len: u64,
    /// Offset of the newest cross-reference section, for `/Prev`.
    last_startxref: u64,
    /// Incremental sections appended since the last full write.
    increments: usize,
    history: Vec<WrittenRevision>,
    /// Set when a failed append could neither be cut off nor measured.
    storage_unknown: bool,
}

impl<S: Storage> PdfDocument<S> {
    // ── Constructors ──────────────────────────────────────────────────────────

    /// Parse the bytes held by `storage`; the parsed objects become revision 0.
    pub fn open(mut storage: S, config: AttachConfig) -> Result<Self> {
        let bytes = storage.load()?;
        let last_startxref = xref::find_startxref(&bytes)
            .ok_or_else(|| AttachError::malformed("no startxref offset near end of file"))?;
        let document = Document::load_mem(&bytes)?;
        let store = ObjectStore::from_document(document);
        store.catalog()?;

        debug!(
            bytes = bytes.len(),
            objects = store.live_objects().len(),
            version = store.version(),
            "opened document"
        );

        Ok(Self {
            storage,
            store,
            config,
            persisted_len: bytes.len() as u64,
            last_startxref,
            increments: 0,
            history: Vec::new(),
            storage_unknown: false,
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn config(&self) -> &AttachConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Committed revisions, the parsed base included.
    pub fn revision_count(&self) -> usize {
        self.store.revision_count()
    }

    /// Revisions written through this handle, oldest first.
    pub fn history(&self) -> &[WrittenRevision] {
        &self.history
    }

    /// `/Collection /View` of the catalog, if the document is a portfolio.
    pub fn collection(&self) -> Option<CollectionView> {
        catalog::collection_view(&self.store)
    }

    pub fn is_encrypted(&self) -> bool {
        self.store.trailer().has(b"Encrypt")
    }

    // ── Transactions ──────────────────────────────────────────────────────────

    /// Run `mutation` against a fresh pending revision and persist it.
    ///
    /// If `mutation` or the write fails, the store rolls back to where it was
    /// before the call and the persisted bytes are unchanged, unless a torn
    /// append could not be cut off (see `undo_partial_append`). A mutation
    /// that changes nothing writes nothing.
    pub(crate) fn transaction<T>(
        &mut self,
        mutation: impl FnOnce(&mut ObjectStore, &AttachConfig) -> Result<T>,
    ) -> Result<(T, Option<WrittenRevision>)> {
        if self.is_encrypted() {
            return Err(AttachError::Encrypted);
        }
        if self.storage_unknown {
            return Err(AttachError::WriteFailed(io::Error::other(
                "storage length unknown after an earlier failed write; reopen the document",
            )));
        }

        let marker = self.store.begin();
        let value = match mutation(&mut self.store, &self.config) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "mutation failed, rolling back");
                self.store.rollback(marker);
                return Err(e);
            }
        };

        match self.commit() {
            Ok(written) => Ok((value, written)),
            Err(e) => {
                self.store.rollback(marker);
                Err(e)
            }
        }
    }

    fn commit_mode(&self) -> CommitMode {
        let chain_full = self
            .config
            .max_incremental_updates
            .is_some_and(|max| self.increments >= max);
        if self.config.always_rewrite || chain_full {
            CommitMode::Full
        } else {
            CommitMode::Incremental
        }
    }

    /// Cut storage back to `persisted_len` after `append` failed part way.
    ///
    /// When the cut fails too, the bytes that did land stay in front of the
    /// next section: `persisted_len` is re-read from storage so later offsets
    /// stay correct, and the handle refuses further writes if even that
    /// fails. The returned error names every failure.
    fn undo_partial_append(&mut self, append_error: io::Error) -> io::Error {
        let truncate_error = match self.storage.truncate(self.persisted_len) {
            Ok(()) => return append_error,
            Err(t) => t,
        };
        let mut message = format!(
            "{append_error}; truncating to {} failed: {truncate_error}",
            self.persisted_len
        );

        match self.storage.load() {
            Ok(bytes) => {
                warn!(
                    expected = self.persisted_len,
                    actual = bytes.len(),
                    "partial revision left in storage"
                );
                self.persisted_len = bytes.len() as u64;
            }
            Err(load_error) => {
                warn!(error = %load_error, "storage length unknown, refusing further writes");
                self.storage_unknown = true;
                message.push_str(&format!("; reading storage back failed: {load_error}"));
            }
        }
        io::Error::new(append_error.kind(), message)
    }

    /// Serialize the pending revision, then push it onto the stack. The store
    /// only changes after the storage accepted the bytes.
    fn commit(&mut self) -> Result<Option<WrittenRevision>> {
        if !self.store.has_pending_changes() {
            self.store.commit();
            return Ok(None);
        }

        let mode = self.commit_mode();
        let (serialized, range) = match mode {
            CommitMode::Incremental => {
                let Some(pending) = self.store.pending() else {
                    return Ok(None);
                };
                let serialized = xref::write_increment(
                    &self.store,
                    pending,
                    self.persisted_len,
                    self.last_startxref,
                );
                if let Err(e) = self.storage.append(&serialized.bytes) {
                    return Err(AttachError::WriteFailed(self.undo_partial_append(e)));
                }
                let range = self.persisted_len..self.persisted_len + serialized.bytes.len() as u64;
                (serialized, range)
            }
            CommitMode::Full => {
                let serialized = xref::write_full(&self.store);
                self.storage
                    .replace(&serialized.bytes)
                    .map_err(AttachError::WriteFailed)?;
                let range = 0..serialized.bytes.len() as u64;
                (serialized, range)
            }
        };

        let revision = self
            .store
            .commit()
            .ok_or_else(|| AttachError::malformed("pending revision vanished during commit"))?;

        self.persisted_len = range.end;
        self.last_startxref = serialized.startxref;
        match mode {
            CommitMode::Incremental => self.increments += 1,
            CommitMode::Full => self.increments = 0,
        }

        let written = WrittenRevision {
            revision,
            mode,
            range,
            startxref: serialized.startxref,
        };
        info!(
            revision,
            mode = ?written.mode,
            start = written.range.start,
            end = written.range.end,
            startxref = written.startxref,
            "committed revision"
        );
        self.history.push(written.clone());
        Ok(Some(written))
    }
}
