// End-to-end attachment scenarios against in-memory PDFs.

mod common;

use lopdf::{dictionary, Document, Object};
use pdfattach::{
    AttachConfig, AttachError, AttachmentInput, CollectionView, CommitMode, EmbeddedFile,
    MemoryStorage, NameTree, PdfDocument, Storage, Violation,
};
use proptest::prelude::*;
use std::cell::Cell;
use std::io;
use std::rc::Rc;

fn extract_all<S: Storage>(doc: &PdfDocument<S>) -> Vec<EmbeddedFile> {
    let mut files: Vec<EmbeddedFile> = Vec::new();
    let report = doc.extract(&[], &mut files).unwrap();
    assert!(report.is_complete(), "{:?}", report.failures);
    files
}

fn tree_of<S: Storage>(doc: &PdfDocument<S>, fan_out: usize) -> NameTree {
    let store = doc.store();
    let names = store
        .deref(store.catalog().unwrap().get(b"Names").unwrap())
        .unwrap()
        .as_dict()
        .unwrap();
    let root = names.get(b"EmbeddedFiles").unwrap().as_reference().unwrap();
    NameTree::new(Some(root), fan_out)
}

// ── Scenario A ────────────────────────────────────────────────────────────────

#[test]
fn add_list_extract_remove_cycle() {
    let mut doc = common::open_blank(AttachConfig::default());
    let payloads = vec![
        ("a.bin", common::payload(1, 100)),
        ("b.bin", Vec::new()),
        ("c.bin", common::payload(3, 5000)),
        ("d.bin", vec![b'x'; 4096]),
    ];
    doc.add(
        payloads
            .iter()
            .map(|(name, data)| AttachmentInput::from_bytes(*name, data.clone())),
    )
    .unwrap();

    assert_eq!(doc.list_names().unwrap(), ["a.bin", "b.bin", "c.bin", "d.bin"]);

    let files = extract_all(&doc);
    assert_eq!(files.len(), 4);
    for (file, (name, data)) in files.iter().zip(&payloads) {
        assert_eq!(file.name, *name);
        assert_eq!(&file.data, data);
    }

    let report = doc.remove(&["a.bin"]).unwrap();
    assert_eq!(report.removed, ["a.bin"]);
    assert_eq!(doc.list_names().unwrap(), ["b.bin", "c.bin", "d.bin"]);

    let report = doc.remove(&[]).unwrap();
    assert_eq!(report.removed.len(), 3);
    assert_eq!(doc.count().unwrap(), 0);
    assert!(!doc.store().catalog().unwrap().has(b"Names"));
    assert!(doc.validate().is_valid());

    let doc = common::reopen(doc, AttachConfig::default());
    assert_eq!(doc.count().unwrap(), 0);
    assert!(doc.validate().is_valid());
}

// ── Scenario B ────────────────────────────────────────────────────────────────

#[test]
fn two_hundred_entries_build_a_three_level_tree() {
    let config = AttachConfig {
        fan_out: 16,
        ..Default::default()
    };
    let mut doc = common::open_blank(config.clone());
    let names: Vec<String> = (0..200).map(|i| format!("entry-{i:03}.dat")).collect();
    doc.add(
        names
            .iter()
            .enumerate()
            .map(|(i, name)| AttachmentInput::from_bytes(name.as_str(), common::payload(i as u32, 64 + i))),
    )
    .unwrap();
    assert_eq!(doc.history().len(), 1);

    assert!(tree_of(&doc, 16).depth(doc.store()).unwrap() >= 3);
    assert!(doc.validate().is_valid());

    let doc = common::reopen(doc, config);
    assert!(doc.validate().is_valid());
    let files = extract_all(&doc);
    assert_eq!(files.len(), 200);
    for (i, file) in files.iter().enumerate() {
        assert_eq!(file.name, names[i]);
        assert_eq!(file.data, common::payload(i as u32, 64 + i));
    }
}

// ── Scenario C ────────────────────────────────────────────────────────────────

#[test]
fn corrupted_size_is_reported_per_entry() {
    let mut doc = common::open_blank(AttachConfig::default());
    doc.add([
        AttachmentInput::from_bytes("a.bin", vec![1u8; 11]),
        AttachmentInput::from_bytes("b.bin", vec![2u8; 22]),
        AttachmentInput::from_bytes("c.bin", vec![3u8; 33]),
    ])
    .unwrap();

    // Rewrite b.bin's /Params/Size with an unrelated tool.
    let bytes = doc.into_storage().into_inner();
    let mut raw = Document::load_mem(&bytes).unwrap();
    let mut corrupted = 0;
    for object in raw.objects.values_mut() {
        let Object::Stream(stream) = object else {
            continue;
        };
        let Ok(Object::Dictionary(params)) = stream.dict.get_mut(b"Params") else {
            continue;
        };
        if params.get(b"Size").and_then(Object::as_i64).ok() == Some(22) {
            params.set("Size", Object::Integer(23));
            corrupted += 1;
        }
    }
    assert_eq!(corrupted, 1);
    let mut bytes = Vec::new();
    raw.save_to(&mut bytes).unwrap();

    let doc = PdfDocument::open(MemoryStorage::new(bytes), AttachConfig::default()).unwrap();
    let mut files: Vec<EmbeddedFile> = Vec::new();
    let report = doc.extract(&[], &mut files).unwrap();

    assert_eq!(report.extracted, ["a.bin", "c.bin"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "b.bin");
    assert!(matches!(
        report.failures[0].error,
        AttachError::SizeMismatch {
            declared: 23,
            actual: 22,
            ..
        }
    ));

    let violations = doc.validate().violations;
    assert_eq!(
        violations,
        vec![Violation::SizeMismatch {
            name: "b.bin".into(),
            declared: 23,
            actual: 22,
        }]
    );
}

// ── Duplicates and idempotence ────────────────────────────────────────────────

#[test]
fn duplicate_within_one_call_rejects_everything() {
    let mut doc = common::open_blank(AttachConfig::default());
    let before = doc.storage().as_bytes().to_vec();

    let err = doc
        .add([
            AttachmentInput::from_bytes("x.bin", b"first".to_vec()),
            AttachmentInput::from_bytes("y.bin", b"other".to_vec()),
            AttachmentInput::from_bytes("x.bin", b"second".to_vec()),
        ])
        .unwrap_err();

    assert!(matches!(err, AttachError::DuplicateName(ref name) if name == "x.bin"));
    assert_eq!(doc.count().unwrap(), 0);
    assert_eq!(doc.storage().as_bytes(), before.as_slice());
    assert_eq!(doc.revision_count(), 1);
    assert!(doc.validate().is_valid());
}

#[test]
fn duplicate_of_existing_entry_is_rejected() {
    let mut doc = common::open_blank(AttachConfig::default());
    doc.add([AttachmentInput::from_bytes("x.bin", b"first".to_vec())])
        .unwrap();
    let before = doc.storage().as_bytes().to_vec();

    let err = doc
        .add([AttachmentInput::from_bytes("x.bin", b"second".to_vec())])
        .unwrap_err();
    assert!(matches!(err, AttachError::DuplicateName(_)));
    assert_eq!(doc.storage().as_bytes(), before.as_slice());
    assert_eq!(extract_all(&doc)[0].data, b"first");
}

#[test]
fn removing_absent_name_is_reported_not_fatal() {
    let mut doc = common::open_blank(AttachConfig::default());
    doc.add([
        AttachmentInput::from_bytes("a.bin", b"a".to_vec()),
        AttachmentInput::from_bytes("b.bin", b"b".to_vec()),
    ])
    .unwrap();
    let before = doc.storage().as_bytes().to_vec();

    let report = doc.remove(&["zzz.bin"]).unwrap();
    assert!(report.removed.is_empty());
    assert_eq!(report.not_found, ["zzz.bin"]);
    assert!(report.revision.is_none());
    assert_eq!(doc.list_names().unwrap(), ["a.bin", "b.bin"]);
    assert_eq!(doc.storage().as_bytes(), before.as_slice());

    let report = doc.remove(&["a.bin", "zzz.bin"]).unwrap();
    assert_eq!(report.removed, ["a.bin"]);
    assert_eq!(report.not_found, ["zzz.bin"]);
}

#[test]
fn extract_reports_missing_names() {
    let mut doc = common::open_blank(AttachConfig::default());
    doc.add([AttachmentInput::from_bytes("a.bin", b"a".to_vec())])
        .unwrap();

    let mut files: Vec<EmbeddedFile> = Vec::new();
    let report = doc.extract(&["nope", "a.bin"], &mut files).unwrap();
    assert_eq!(report.extracted, ["a.bin"]);
    assert_eq!(report.not_found().collect::<Vec<_>>(), ["nope"]);
}

// ── Keys written by other producers ───────────────────────────────────────────

/// Rewrite every name-tree key equal to `name` as UTF-16BE with a mark.
fn rekey_as_utf16(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut doc = Document::load_mem(bytes).unwrap();
    let utf16 = lopdf::encode_utf16_be(name);
    for object in doc.objects.values_mut() {
        let Object::Dictionary(dict) = object else {
            continue;
        };
        for key in [b"Names".as_slice(), b"Limits".as_slice()] {
            if let Ok(Object::Array(items)) = dict.get_mut(key) {
                for item in items.iter_mut() {
                    if let Object::String(text, _) = item {
                        if text.as_slice() == name.as_bytes() {
                            *text = utf16.clone();
                        }
                    }
                }
            }
        }
    }
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

#[test]
fn utf16_keys_match_by_decoded_name() {
    let mut doc = common::open_blank(AttachConfig::default());
    doc.add([
        AttachmentInput::from_bytes("alpha.txt", b"first".to_vec()),
        AttachmentInput::from_bytes("golang.pdf", b"%PDF-gopher".to_vec()),
    ])
    .unwrap();
    let bytes = rekey_as_utf16(doc.storage().as_bytes(), "golang.pdf");
    assert!(bytes
        .windows(4)
        .any(|w| w == [0xFE, 0xFF, 0x00, b'g']));

    let mut doc = PdfDocument::open(MemoryStorage::new(bytes), AttachConfig::default()).unwrap();
    assert_eq!(doc.list_names().unwrap(), ["alpha.txt", "golang.pdf"]);

    let mut files: Vec<EmbeddedFile> = Vec::new();
    let report = doc.extract(&["golang.pdf"], &mut files).unwrap();
    assert_eq!(report.extracted, ["golang.pdf"]);
    assert_eq!(files[0].data, b"%PDF-gopher");

    let err = doc
        .add([AttachmentInput::from_bytes("golang.pdf", b"again".to_vec())])
        .unwrap_err();
    assert!(matches!(err, AttachError::DuplicateName(name) if name == "golang.pdf"));
    assert_eq!(doc.count().unwrap(), 2);

    let report = doc.remove(&["golang.pdf"]).unwrap();
    assert_eq!(report.removed, ["golang.pdf"]);
    assert!(report.not_found.is_empty());
    assert_eq!(doc.list_names().unwrap(), ["alpha.txt"]);
    assert!(doc.validate().is_valid());

    let doc = common::reopen(doc, AttachConfig::default());
    assert_eq!(doc.list_names().unwrap(), ["alpha.txt"]);
}

// ── Failures leave nothing behind ─────────────────────────────────────────────

/// Memory storage that can be told to fail halfway through a write.
struct FlakyStorage {
    inner: MemoryStorage,
    fail: Rc<Cell<bool>>,
}

impl Storage for FlakyStorage {
    fn load(&mut self) -> io::Result<Vec<u8>> {
        self.inner.load()
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail.get() {
            self.inner.append(&bytes[..bytes.len() / 2])?;
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.inner.append(bytes)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.inner.truncate(len)
    }

    fn replace(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail.get() {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.inner.replace(bytes)
    }
}

#[test]
fn failed_write_rolls_back_store_and_bytes() {
    let fail = Rc::new(Cell::new(true));
    let original = common::blank_pdf();
    let storage = FlakyStorage {
        inner: MemoryStorage::new(original.clone()),
        fail: Rc::clone(&fail),
    };
    let mut doc = PdfDocument::open(storage, AttachConfig::default()).unwrap();

    let err = doc
        .add([AttachmentInput::from_bytes("a.bin", b"payload".to_vec())])
        .unwrap_err();
    assert!(matches!(err, AttachError::WriteFailed(_)));
    assert_eq!(doc.storage().inner.as_bytes(), original.as_slice());
    assert_eq!(doc.count().unwrap(), 0);
    assert_eq!(doc.revision_count(), 1);

    fail.set(false);
    let written = doc
        .add([AttachmentInput::from_bytes("a.bin", b"payload".to_vec())])
        .unwrap()
        .unwrap();
    assert_eq!(written.range.start, original.len() as u64);
    assert_eq!(extract_all(&doc)[0].data, b"payload");
}

#[test]
fn failed_full_rewrite_rolls_back_store_and_bytes() {
    let fail = Rc::new(Cell::new(true));
    let original = common::blank_pdf();
    let storage = FlakyStorage {
        inner: MemoryStorage::new(original.clone()),
        fail: Rc::clone(&fail),
    };
    let config = AttachConfig {
        always_rewrite: true,
        ..Default::default()
    };
    let mut doc = PdfDocument::open(storage, config).unwrap();

    let err = doc
        .add([AttachmentInput::from_bytes("a.bin", b"payload".to_vec())])
        .unwrap_err();
    assert!(matches!(err, AttachError::WriteFailed(_)));
    assert_eq!(doc.storage().inner.as_bytes(), original.as_slice());
    assert_eq!(doc.revision_count(), 1);
    assert_eq!(doc.count().unwrap(), 0);
    assert!(doc.history().is_empty());

    fail.set(false);
    let written = doc
        .add([AttachmentInput::from_bytes("a.bin", b"payload".to_vec())])
        .unwrap()
        .unwrap();
    assert_eq!(written.mode, CommitMode::Full);
    assert_eq!(written.range.start, 0);
    assert_eq!(extract_all(&doc)[0].data, b"payload");
}

#[test]
fn unreadable_input_aborts_the_whole_add() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = common::open_blank(AttachConfig::default());
    let before = doc.storage().as_bytes().to_vec();

    let err = doc
        .add([
            AttachmentInput::from_bytes("ok.bin", b"fine".to_vec()),
            AttachmentInput::from_path(dir.path().join("missing.bin")),
        ])
        .unwrap_err();
    assert!(matches!(err, AttachError::IoError(_)));
    assert_eq!(doc.storage().as_bytes(), before.as_slice());
    assert_eq!(doc.count().unwrap(), 0);
}

#[test]
fn oversized_payload_is_rejected() {
    let mut doc = common::open_blank(AttachConfig {
        max_attachment_size: Some(8),
        ..Default::default()
    });
    let err = doc
        .add([AttachmentInput::from_bytes("big.bin", vec![0u8; 9])])
        .unwrap_err();
    assert!(matches!(
        err,
        AttachError::FileSizeExceeded {
            size: 9,
            limit: 8,
            ..
        }
    ));
}

// ── Revisions on disk ─────────────────────────────────────────────────────────

#[test]
fn chained_increments_reopen_cleanly() {
    let config = AttachConfig::default();
    let mut doc = common::open_blank(config.clone());
    doc.add([AttachmentInput::from_bytes("one.txt", b"1".to_vec())])
        .unwrap();
    doc.add([AttachmentInput::from_bytes("two.txt", b"2".to_vec())])
        .unwrap();
    doc.remove(&["one.txt"]).unwrap();
    doc.add([AttachmentInput::from_bytes("three.txt", b"3".to_vec())])
        .unwrap();

    let modes: Vec<CommitMode> = doc.history().iter().map(|w| w.mode).collect();
    assert_eq!(modes, vec![CommitMode::Incremental; 4]);
    let ranges: Vec<_> = doc.history().iter().map(|w| w.range.clone()).collect();
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }

    let doc = common::reopen(doc, config);
    assert_eq!(doc.list_names().unwrap(), ["three.txt", "two.txt"]);
    assert!(doc.validate().is_valid());
}

#[test]
fn object_numbers_are_not_reused() {
    let mut doc = common::open_blank(AttachConfig::default());
    doc.add([AttachmentInput::from_bytes("a.bin", b"a".to_vec())])
        .unwrap();
    let first = doc.list().unwrap()[0].file_spec;
    doc.remove(&["a.bin"]).unwrap();
    assert!(!doc.store().contains(first));

    doc.add([AttachmentInput::from_bytes("a.bin", b"a".to_vec())])
        .unwrap();
    let second = doc.list().unwrap()[0].file_spec;
    assert!(second.0 > first.0);
}

#[test]
fn rewrite_mode_replaces_the_file() {
    let config = AttachConfig {
        always_rewrite: true,
        ..Default::default()
    };
    let mut doc = common::open_blank(config.clone());
    let written = doc
        .add([AttachmentInput::from_bytes("a.bin", b"a".to_vec())])
        .unwrap()
        .unwrap();
    assert_eq!(written.mode, CommitMode::Full);
    assert_eq!(written.range.start, 0);
    assert!(doc.storage().as_bytes().starts_with(b"%PDF-"));

    let doc = common::reopen(doc, config);
    assert_eq!(doc.list_names().unwrap(), ["a.bin"]);
    assert!(doc.validate().is_valid());
}

#[test]
fn long_increment_chain_falls_back_to_rewrite() {
    let mut doc = common::open_blank(AttachConfig {
        max_incremental_updates: Some(2),
        ..Default::default()
    });
    for name in ["a", "b", "c"] {
        doc.add([AttachmentInput::from_bytes(name, name.as_bytes().to_vec())])
            .unwrap();
    }
    let modes: Vec<CommitMode> = doc.history().iter().map(|w| w.mode).collect();
    assert_eq!(
        modes,
        [CommitMode::Incremental, CommitMode::Incremental, CommitMode::Full]
    );
    assert_eq!(doc.list_names().unwrap(), ["a", "b", "c"]);
}

// ── Portfolio ─────────────────────────────────────────────────────────────────

#[test]
fn portfolio_view_survives_reopen_and_goes_with_last_entry() {
    let config = AttachConfig::default();
    let mut doc = common::open_blank(config.clone());
    doc.add_to_portfolio(
        [AttachmentInput::from_bytes("a.pdf", b"%PDF-1.4".to_vec())],
        CollectionView::Tile,
    )
    .unwrap();
    assert_eq!(doc.collection(), Some(CollectionView::Tile));

    let mut doc = common::reopen(doc, config);
    assert_eq!(doc.collection(), Some(CollectionView::Tile));

    doc.remove(&[]).unwrap();
    assert_eq!(doc.collection(), None);
    assert!(doc.validate().is_valid());
}

// ── Shared file specifications ────────────────────────────────────────────────

#[test]
fn file_spec_still_used_by_annotation_is_kept() {
    let mut doc = common::open_blank(AttachConfig::default());
    doc.add([AttachmentInput::from_bytes("shared.txt", b"shared".to_vec())])
        .unwrap();
    let file_spec = doc.list().unwrap()[0].file_spec;

    // Point a page annotation at the same file specification.
    let bytes = doc.into_storage().into_inner();
    let mut raw = Document::load_mem(&bytes).unwrap();
    let page_id = *raw.get_pages().values().next().unwrap();
    let annot = raw.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "FileAttachment",
        "Rect" => vec![0.into(), 0.into(), 20.into(), 20.into()],
        "FS" => file_spec,
    });
    raw.get_object_mut(page_id)
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("Annots", vec![Object::Reference(annot)]);
    let mut bytes = Vec::new();
    raw.save_to(&mut bytes).unwrap();

    let mut doc = PdfDocument::open(MemoryStorage::new(bytes), AttachConfig::default()).unwrap();
    let report = doc.remove(&[]).unwrap();
    assert_eq!(report.removed, ["shared.txt"]);
    assert_eq!(doc.count().unwrap(), 0);
    assert!(doc.store().contains(file_spec));
    assert!(doc.validate().is_valid());
}

// ── Properties ────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn add_then_remove_all_leaves_a_valid_empty_document(
        names in prop::collection::btree_set("[a-z0-9]{1,12}", 1..60),
        fan_out in 2usize..8,
    ) {
        let config = AttachConfig { fan_out, ..Default::default() };
        let mut doc = common::open_blank(config);
        doc.add(names.iter().map(|n| AttachmentInput::from_bytes(n.as_str(), n.as_bytes().to_vec())))
            .unwrap();
        prop_assert_eq!(doc.list_names().unwrap(), names.iter().cloned().collect::<Vec<_>>());

        let report = doc.remove(&[]).unwrap();
        prop_assert_eq!(report.removed.len(), names.len());
        prop_assert_eq!(doc.count().unwrap(), 0);
        prop_assert!(doc.validate().is_valid());
    }
}
