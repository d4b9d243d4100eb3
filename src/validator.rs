use crate::catalog;
use crate::file_spec::FileSpecParser;
use crate::name_tree::TreeFault;
use crate::pdf_utils::decode_text_string;
use crate::store::ObjectStore;
use crate::AttachError;
use lopdf::{Object, ObjectId};
use std::fmt;

// ── Violations ────────────────────────────────────────────────────────────────

/// One structural problem found by [`crate::PdfDocument::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The catalog is missing, not a dictionary, or has no `/Pages`.
    Catalog(String),
    /// `holder` (the trailer when `None`) references an object that does not
    /// resolve.
    BrokenReference {
        holder: Option<ObjectId>,
        target: ObjectId,
    },
    /// The `/EmbeddedFiles` name tree is unsorted, has duplicates, wrong
    /// `/Limits` or unreadable nodes.
    NameTree(TreeFault),
    /// A file specification does not lead to an embedded-file stream.
    FileSpec { name: String, reason: String },
    SizeMismatch {
        name: String,
        declared: usize,
        actual: usize,
    },
    ChecksumMismatch {
        name: String,
        declared: String,
        computed: String,
    },
    /// The stream's filter chain could not be decoded.
    Undecodable { name: String, reason: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Catalog(reason) => write!(f, "catalog: {reason}"),
            Violation::BrokenReference {
                holder: Some((hn, hg)),
                target: (n, g),
            } => write!(f, "object {hn} {hg} R references missing {n} {g} R"),
            Violation::BrokenReference {
                holder: None,
                target: (n, g),
            } => write!(f, "trailer references missing {n} {g} R"),
            Violation::NameTree(fault) => write!(f, "name tree: {fault}"),
            Violation::FileSpec { name, reason } => write!(f, "'{name}': {reason}"),
            Violation::SizeMismatch {
                name,
                declared,
                actual,
            } => write!(f, "'{name}': declared {declared} bytes, decoded {actual}"),
            Violation::ChecksumMismatch {
                name,
                declared,
                computed,
            } => write!(f, "'{name}': checksum {declared} declared, {computed} computed"),
            Violation::Undecodable { name, reason } => write!(f, "'{name}': {reason}"),
        }
    }
}

/// Result of a validation pass. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return write!(f, "no violations");
        }
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

// ── Validator ─────────────────────────────────────────────────────────────────
//
// This is an internal type. Callers use PdfDocument::validate, which
// delegates here. Nothing is repaired.

pub(crate) struct Validator<'a> {
    store: &'a ObjectStore,
    fan_out: usize,
}

impl<'a> Validator<'a> {
    pub(crate) fn new(store: &'a ObjectStore, fan_out: usize) -> Self {
        Self { store, fan_out }
    }

    pub(crate) fn run(&self) -> ValidationReport {
        let mut violations = Vec::new();

        let walk = self.store.walk_references();
        violations.extend(
            walk.broken
                .into_iter()
                .map(|(holder, target)| Violation::BrokenReference { holder, target }),
        );

        if self.check_catalog(&mut violations) {
            self.check_attachments(&mut violations);
        }

        ValidationReport { violations }
    }

    /// Returns `false` when there is no catalog to look further into.
    fn check_catalog(&self, violations: &mut Vec<Violation>) -> bool {
        match self.store.catalog() {
            Ok(catalog) => {
                if !catalog.has(b"Pages") {
                    violations.push(Violation::Catalog("no /Pages entry".into()));
                }
                true
            }
            Err(e) => {
                violations.push(Violation::Catalog(e.to_string()));
                false
            }
        }
    }

    fn check_attachments(&self, violations: &mut Vec<Violation>) {
        let tree = match catalog::embedded_files_tree(self.store, self.fan_out) {
            Ok(tree) => tree,
            Err(e) => {
                violations.push(Violation::NameTree(TreeFault::BrokenNode {
                    node: None,
                    reason: e.to_string(),
                }));
                return;
            }
        };

        let faults = tree.verify(self.store);
        let traversable = !faults
            .iter()
            .any(|fault| matches!(fault, TreeFault::BrokenNode { .. }));
        violations.extend(faults.into_iter().map(Violation::NameTree));
        if !traversable {
            return;
        }

        let parser = FileSpecParser::new(self.store);
        for item in tree.iter(self.store) {
            let Ok((key, file_spec)) = item else {
                break;
            };
            let name = decode_text_string(&key);
            if let Some(violation) = Self::check_entry(&parser, &name, file_spec) {
                violations.push(violation);
            }
        }
    }

    fn check_entry(parser: &FileSpecParser<'_>, name: &str, file_spec: ObjectId) -> Option<Violation> {
        let (stream_id, stream) = match parser.stream(name, file_spec) {
            Ok(found) => found,
            Err(e) => {
                return Some(Violation::FileSpec {
                    name: name.into(),
                    reason: e.to_string(),
                })
            }
        };

        let kind = stream.dict.get(b"Type").and_then(Object::as_name).ok();
        if kind != Some(b"EmbeddedFile".as_slice()) {
            let found = match kind {
                Some(kind) => format!("/Type /{}", String::from_utf8_lossy(kind)),
                None => "no /Type".to_string(),
            };
            return Some(Violation::FileSpec {
                name: name.into(),
                reason: format!(
                    "stream {} {} R has {found}, expected /Type /EmbeddedFile",
                    stream_id.0, stream_id.1
                ),
            });
        }

        match parser.decode(name, file_spec) {
            Ok(_) => None,
            Err(AttachError::SizeMismatch {
                name,
                declared,
                actual,
            }) => Some(Violation::SizeMismatch {
                name,
                declared,
                actual,
            }),
            Err(AttachError::IntegrityMismatch {
                name,
                declared,
                computed,
            }) => Some(Violation::ChecksumMismatch {
                name,
                declared,
                computed,
            }),
            Err(e) => Some(Violation::Undecodable {
                name: name.into(),
                reason: e.to_string(),
            }),
        }
    }
}
