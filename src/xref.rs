//! Cross-reference writer: serializes one revision as an incremental update,
//! or the whole object set as a fresh file.
//!
//! Both forms end with `trailer`, `startxref` and `%%EOF`, so the bytes only
//! become a valid revision once the last line is in place.

use crate::object_writer::{write_dictionary, write_indirect};
use crate::store::{ObjectStore, Revision, Slot};
use lopdf::{Dictionary, Object};
use std::io::Write;
use std::ops::Range;

/// Trailer keys carried from one revision to the next.
const CARRIED_TRAILER_KEYS: [&[u8]; 3] = [b"Root", b"Info", b"ID"];

/// How far back from the end of the file `startxref` is searched for.
const STARTXREF_SEARCH_WINDOW: usize = 2048;

/// How a revision was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Appended after the existing bytes with a `/Prev` link.
    Incremental,
    /// The whole file was rewritten with a single table.
    Full,
}

/// Where a committed revision landed in the persisted bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenRevision {
    pub revision: usize,
    pub mode: CommitMode,
    pub range: Range<u64>,
    pub startxref: u64,
}

/// Serialized bytes plus the offset of their cross-reference section.
pub(crate) struct Serialized {
    pub bytes: Vec<u8>,
    pub startxref: u64,
}

#[derive(Debug, Clone, Copy)]
enum Row {
    InUse { offset: u64, generation: u16 },
    Free { generation: u16 },
}

/// Serialize only the entries of `revision`, to be appended at `base_offset`
/// behind a table that starts at `prev_startxref`.
pub(crate) fn write_increment(
    store: &ObjectStore,
    revision: &Revision,
    base_offset: u64,
    prev_startxref: u64,
) -> Serialized {
    let mut out = vec![b'\n'];
    let mut rows = Vec::with_capacity(revision.len());

    for (number, entry) in revision.entries() {
        match &entry.slot {
            Slot::InUse(object) => {
                let offset = base_offset + out.len() as u64;
                write_indirect(&mut out, (number, entry.generation), object);
                rows.push((
                    number,
                    Row::InUse {
                        offset,
                        generation: entry.generation,
                    },
                ));
            }
            Slot::Free => rows.push((
                number,
                Row::Free {
                    generation: entry.generation,
                },
            )),
        }
    }

    let startxref = base_offset + out.len() as u64;
    write_table(&mut out, &rows);
    write_trailer(&mut out, store, Some(prev_startxref), startxref);

    Serialized { bytes: out, startxref }
}

/// Serialize every live object as a fresh, self-contained file.
pub(crate) fn write_full(store: &ObjectStore) -> Serialized {
    let mut out = Vec::new();
    let _ = writeln!(out, "%PDF-{}", store.version());
    out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

    let live = store.live_objects();
    let mut rows = vec![(0u32, Row::Free { generation: 65535 })];

    for number in 1..store.size() {
        let row = match live.get(&number) {
            Some((generation, object)) if !is_xref_container(object) => {
                let offset = out.len() as u64;
                write_indirect(&mut out, (number, *generation), object);
                Row::InUse {
                    offset,
                    generation: *generation,
                }
            }
            _ => Row::Free {
                generation: store.entry(number).map_or(0, |e| match e.slot {
                    Slot::Free => e.generation,
                    Slot::InUse(_) => 0,
                }),
            },
        };
        rows.push((number, row));
    }

    let startxref = out.len() as u64;
    write_table(&mut out, &rows);
    write_trailer(&mut out, store, None, startxref);

    Serialized { bytes: out, startxref }
}

/// Object and cross-reference streams are rebuilt by readers from the table
/// itself; a full rewrite drops them.
fn is_xref_container(object: &Object) -> bool {
    match object {
        Object::Stream(stream) => matches!(
            stream.dict.get(b"Type").and_then(Object::as_name),
            Ok(b"XRef") | Ok(b"ObjStm")
        ),
        _ => false,
    }
}

/// Write `xref` followed by one subsection per run of consecutive numbers.
fn write_table(out: &mut Vec<u8>, rows: &[(u32, Row)]) {
    out.extend_from_slice(b"xref\n");
    let mut start = 0;
    while start < rows.len() {
        let mut end = start + 1;
        while end < rows.len() && rows[end].0 == rows[end - 1].0 + 1 {
            end += 1;
        }
        let _ = writeln!(out, "{} {}", rows[start].0, end - start);
        for (_, row) in &rows[start..end] {
            // each entry is exactly 20 bytes
            let _ = match row {
                Row::InUse { offset, generation } => {
                    write!(out, "{offset:010} {generation:05} n \n")
                }
                Row::Free { generation } => write!(out, "0000000000 {generation:05} f \n"),
            };
        }
        start = end;
    }
}

fn write_trailer(out: &mut Vec<u8>, store: &ObjectStore, prev: Option<u64>, startxref: u64) {
    let mut trailer = Dictionary::new();
    trailer.set("Size", Object::Integer(i64::from(store.size())));
    for key in CARRIED_TRAILER_KEYS {
        if let Ok(value) = store.trailer().get(key) {
            trailer.set(key.to_vec(), value.clone());
        }
    }
    if let Some(prev) = prev {
        trailer.set("Prev", Object::Integer(prev as i64));
    }

    out.extend_from_slice(b"trailer\n");
    write_dictionary(out, &trailer);
    let _ = write!(out, "\nstartxref\n{startxref}\n%%EOF\n");
}

/// Offset recorded after the last `startxref` keyword in `bytes`.
pub(crate) fn find_startxref(bytes: &[u8]) -> Option<u64> {
    const KEYWORD: &[u8] = b"startxref";
    let window_start = bytes.len().saturating_sub(STARTXREF_SEARCH_WINDOW);
    let tail = &bytes[window_start..];
    let pos = tail
        .windows(KEYWORD.len())
        .rposition(|w| w == KEYWORD)?;
    let digits: String = tail[pos + KEYWORD.len()..]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .map(|&b| b as char)
        .collect();
    digits.parse().ok()
}
