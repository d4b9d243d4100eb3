use crate::catalog::{self, CollectionView};
use crate::document::PdfDocument;
use crate::file_spec::{self, FileSpecParser, NewEmbeddedFile};
use crate::input::{AttachmentInput, ExtractSink};
use crate::name_tree::NameTree;
use crate::pdf_utils::{decode_text_string, encode_text_string, text_string_candidates};
use crate::storage::Storage;
use crate::store::ObjectStore;
use crate::xref::WrittenRevision;
use crate::{AttachConfig, AttachError, AttachmentEntry, Result};
use lopdf::ObjectId;
use tracing::{debug, info, warn};

// ── Reports ───────────────────────────────────────────────────────────────────

/// An entry that could not be processed; the rest of the call went ahead.
#[derive(Debug)]
pub struct EntryFailure {
    pub name: String,
    pub error: AttachError,
}

/// Outcome of [`PdfDocument::extract`].
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Names handed to the sink, in extraction order.
    pub extracted: Vec<String>,
    pub failures: Vec<EntryFailure>,
}

impl ExtractReport {
    pub fn count(&self) -> usize {
        self.extracted.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Requested names that are not in the document.
    pub fn not_found(&self) -> impl Iterator<Item = &str> {
        self.failures
            .iter()
            .filter(|f| matches!(f.error, AttachError::NotFound(_)))
            .map(|f| f.name.as_str())
    }
}

/// Outcome of [`PdfDocument::remove`].
#[derive(Debug, Default)]
pub struct RemoveReport {
    pub removed: Vec<String>,
    /// Requested names that were already absent.
    pub not_found: Vec<String>,
    /// The revision written, `None` when nothing was removed.
    pub revision: Option<WrittenRevision>,
}

/// Attachment operations for PdfDocument.
impl<S: Storage> PdfDocument<S> {
    fn embedded_files(&self) -> Result<NameTree> {
        catalog::embedded_files_tree(self.store(), self.config().effective_fan_out())
    }

    // ── List ──────────────────────────────────────────────────────────────────

    /// Every attachment in name order, with its description. A document
    /// without an `/EmbeddedFiles` tree yields an empty list.
    pub fn list(&self) -> Result<Vec<AttachmentEntry>> {
        let store = self.store();
        let parser = FileSpecParser::new(store);
        self.embedded_files()?
            .iter(store)
            .map(|item| -> Result<AttachmentEntry> {
                let (key, file_spec) = item?;
                Ok(AttachmentEntry {
                    name: decode_text_string(&key),
                    description: parser.description(file_spec),
                    file_spec,
                })
            })
            .collect()
    }

    pub fn list_names(&self) -> Result<Vec<String>> {
        self.embedded_files()?
            .iter(self.store())
            .map(|item| item.map(|(key, _)| decode_text_string(&key)))
            .collect()
    }

    pub fn count(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.embedded_files()?.iter(self.store()) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn has_attachments(&self) -> Result<bool> {
        self.embedded_files()?.is_empty(self.store()).map(|empty| !empty)
    }

    // ── Add ───────────────────────────────────────────────────────────────────

    /// Attach every input in one revision.
    ///
    /// All or nothing: a duplicate name (already in the document or earlier
    /// in `inputs`), an unreadable payload or a failed write leaves the
    /// document and its storage exactly as before.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pdfattach::{AttachConfig, AttachmentInput, FileStorage, PdfDocument};
    ///
    /// let mut doc = PdfDocument::open(FileStorage::new("report.pdf"), AttachConfig::default()).unwrap();
    /// doc.add([
    ///     AttachmentInput::parse("data.csv, raw measurements"),
    ///     AttachmentInput::from_bytes("notes.txt", b"checked twice".to_vec()),
    /// ])
    /// .unwrap();
    /// ```
    pub fn add<I>(&mut self, inputs: I) -> Result<Option<WrittenRevision>>
    where
        I: IntoIterator<Item = AttachmentInput>,
    {
        self.add_attachments(inputs.into_iter().collect(), None)
    }

    /// Like [`PdfDocument::add`], and also marks the document as a portfolio
    /// opening in `view`.
    pub fn add_to_portfolio<I>(&mut self, inputs: I, view: CollectionView) -> Result<Option<WrittenRevision>>
    where
        I: IntoIterator<Item = AttachmentInput>,
    {
        self.add_attachments(inputs.into_iter().collect(), Some(view))
    }

    fn add_attachments(
        &mut self,
        inputs: Vec<AttachmentInput>,
        view: Option<CollectionView>,
    ) -> Result<Option<WrittenRevision>> {
        let (added, written) = self.transaction(|store, config| {
            let mut tree = catalog::embedded_files_tree(store, config.effective_fan_out())?;
            tree.ensure_well_formed(store)?;

            for input in &inputs {
                attach_one(store, config, &mut tree, input)?;
            }
            if !inputs.is_empty() {
                catalog::set_embedded_files(store, tree.root())?;
            }
            if view.is_some() {
                catalog::set_collection(store, view)?;
            }
            Ok(inputs.len())
        })?;

        info!(added, "added attachments");
        Ok(written)
    }

    // ── Extract ───────────────────────────────────────────────────────────────

    /// Decode the named attachments (all of them for an empty `names`) and
    /// hand each to `sink`.
    ///
    /// Missing names and entries that fail to decode or verify are collected
    /// in the report. Only a sink error or an unreadable name tree fails the
    /// call.
    pub fn extract<K>(&self, names: &[&str], sink: &mut K) -> Result<ExtractReport>
    where
        K: ExtractSink + ?Sized,
    {
        let store = self.store();
        let tree = self.embedded_files()?;

        let targets: Vec<(String, Option<ObjectId>)> = if names.is_empty() {
            tree.iter(store)
                .map(|item| item.map(|(key, id)| (decode_text_string(&key), Some(id))))
                .collect::<Result<_>>()?
        } else {
            names
                .iter()
                .map(|name| -> Result<(String, Option<ObjectId>)> {
                    let found = find_key(store, &tree, name)?;
                    Ok((name.to_string(), found.map(|(_, id)| id)))
                })
                .collect::<Result<_>>()?
        };

        let parser = FileSpecParser::new(store);
        let mut report = ExtractReport::default();

        for (name, file_spec) in targets {
            let Some(file_spec) = file_spec else {
                warn!(name = %name, "attachment not found");
                report.failures.push(EntryFailure {
                    error: AttachError::NotFound(name.clone()),
                    name,
                });
                continue;
            };

            let decoded = parser.decode(&name, file_spec).and_then(|file| {
                match self.config().max_attachment_size {
                    Some(limit) if file.data.len() > limit => Err(AttachError::FileSizeExceeded {
                        name: name.clone(),
                        size: file.data.len(),
                        limit,
                    }),
                    _ => Ok(file),
                }
            });

            match decoded {
                Ok(file) => {
                    sink.write_attachment(&file)?;
                    debug!(name = %name, bytes = file.data.len(), "extracted attachment");
                    report.extracted.push(name);
                }
                Err(error) => {
                    warn!(name = %name, error = %error, "skipping attachment");
                    report.failures.push(EntryFailure { name, error });
                }
            }
        }

        info!(
            extracted = report.extracted.len(),
            failed = report.failures.len(),
            "extraction finished"
        );
        Ok(report)
    }

    // ── Remove ────────────────────────────────────────────────────────────────

    /// Unlink the named attachments (all of them for an empty `names`) and
    /// free their file specifications and streams once nothing else in the
    /// document references them.
    ///
    /// Names that are not present are reported, not treated as errors. When
    /// the tree ends up empty, `/EmbeddedFiles` and any portfolio
    /// `/Collection` are dropped from the catalog.
    pub fn remove(&mut self, names: &[&str]) -> Result<RemoveReport> {
        let ((removed, not_found), revision) = self.transaction(|store, config| {
            let mut tree = catalog::embedded_files_tree(store, config.effective_fan_out())?;
            tree.ensure_well_formed(store)?;

            let keys: Vec<(String, Option<Vec<u8>>)> = if names.is_empty() {
                tree.entries(store)?
                    .into_iter()
                    .map(|(key, _)| (decode_text_string(&key), Some(key)))
                    .collect()
            } else {
                let mut keys = Vec::with_capacity(names.len());
                for name in names {
                    let found = find_key(store, &tree, name)?;
                    keys.push((name.to_string(), found.map(|(key, _)| key)));
                }
                keys
            };

            let mut removed = Vec::new();
            let mut not_found = Vec::new();
            let mut unlinked = Vec::new();
            for (name, key) in keys {
                let file_spec = match key {
                    Some(key) => tree.remove(store, &key)?,
                    None => None,
                };
                match file_spec {
                    Some(file_spec) => {
                        debug!(name = %name, "unlinked attachment");
                        removed.push(name);
                        unlinked.push(file_spec);
                    }
                    None => not_found.push(name),
                }
            }

            if !removed.is_empty() {
                catalog::set_embedded_files(store, tree.root())?;
                if tree.root().is_none() {
                    catalog::set_collection(store, None)?;
                }
                free_unreachable(store, &unlinked)?;
            }
            Ok((removed, not_found))
        })?;

        info!(
            removed = removed.len(),
            not_found = not_found.len(),
            "removed attachments"
        );
        Ok(RemoveReport {
            removed,
            not_found,
            revision,
        })
    }
}

/// Encode one input and link it into `tree`.
fn attach_one(
    store: &mut ObjectStore,
    config: &AttachConfig,
    tree: &mut NameTree,
    input: &AttachmentInput,
) -> Result<()> {
    if find_key(store, tree, &input.name)?.is_some() {
        return Err(AttachError::DuplicateName(input.name.clone()));
    }
    let key = encode_text_string(&input.name);

    let (data, modified) = input.load()?;
    if let Some(limit) = config.max_attachment_size {
        if data.len() > limit {
            return Err(AttachError::FileSizeExceeded {
                name: input.name.clone(),
                size: data.len(),
                limit,
            });
        }
    }

    let (file_spec, stream) = file_spec::encode(
        store,
        &NewEmbeddedFile {
            name: &input.name,
            description: input.description.as_deref(),
            data: &data,
            modified,
            mime_type: input.mime_type.as_deref(),
        },
        config,
    )?;
    tree.insert(store, &key, file_spec)?;

    debug!(
        name = %input.name,
        bytes = data.len(),
        file_spec = file_spec.0,
        stream = stream.0,
        "attached"
    );
    Ok(())
}

/// The stored key and value for `name`, whichever text-string encoding the
/// producer used for the key.
fn find_key(store: &ObjectStore, tree: &NameTree, name: &str) -> Result<Option<(Vec<u8>, ObjectId)>> {
    for key in text_string_candidates(name) {
        if let Some(file_spec) = tree.lookup(store, &key)? {
            return Ok(Some((key, file_spec)));
        }
    }
    Ok(None)
}

/// Free each unlinked file specification, and the streams under its `/EF`,
/// unless the document still reaches them some other way.
fn free_unreachable(store: &mut ObjectStore, unlinked: &[ObjectId]) -> Result<()> {
    let walk = store.walk_references();

    for &file_spec in unlinked {
        if walk.reachable.contains(&file_spec) {
            debug!(file_spec = file_spec.0, "file spec still referenced, kept");
            continue;
        }
        if !store.contains(file_spec) {
            continue;
        }
        let streams = FileSpecParser::new(store)
            .stream_ids("", file_spec)
            .unwrap_or_default();
        store.free(file_spec)?;
        for stream in streams {
            if !walk.reachable.contains(&stream) && store.contains(stream) {
                store.free(stream)?;
            }
        }
    }
    Ok(())
}
