// Fixture PDFs built in memory with lopdf.

#![allow(dead_code)]

use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use pdfattach::{AttachConfig, MemoryStorage, PdfDocument};

/// A one-page PDF with no attachments.
pub fn blank_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(Dictionary::new(), b"BT ET".to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

pub fn open_blank(config: AttachConfig) -> PdfDocument<MemoryStorage> {
    PdfDocument::open(MemoryStorage::new(blank_pdf()), config).unwrap()
}

/// Reopen whatever the handle has persisted so far.
pub fn reopen(doc: PdfDocument<MemoryStorage>, config: AttachConfig) -> PdfDocument<MemoryStorage> {
    let bytes = doc.into_storage().into_inner();
    PdfDocument::open(MemoryStorage::new(bytes), config).unwrap()
}

/// Deterministic, poorly compressible payload.
pub fn payload(seed: u32, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}
