//! Shared PDF string and date helpers used across multiple modules.

use chrono::{DateTime, Utc};
use lopdf::{Object, StringFormat};

const UTF16BE_BOM: &[u8] = b"\xFE\xFF";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Extract a text string value from a PDF dictionary for a given key.
///
/// Returns `Some(String)` if the key exists and contains a non-empty string,
/// `None` otherwise.
pub fn extract_string_from_dict(dict: &lopdf::Dictionary, key: &[u8]) -> Option<String> {
    dict.get(key)
        .ok()
        .and_then(|v| v.as_str().ok())
        .map(decode_text_string)
        .filter(|s| !s.is_empty())
}

/// Encode `text` as a PDF text string: plain bytes when it is ASCII that
/// reads back unchanged as PDFDocEncoding, UTF-16BE with a byte-order mark
/// otherwise.
pub fn encode_text_string(text: &str) -> Vec<u8> {
    if text.is_ascii() && decode_text_string(text.as_bytes()) == text {
        return text.as_bytes().to_vec();
    }
    lopdf::encode_utf16_be(text)
}

/// Decode a PDF text string: UTF-16BE or UTF-8 after a byte-order mark,
/// PDFDocEncoding otherwise. Malformed UTF-16 or UTF-8 decodes lossily.
pub fn decode_text_string(bytes: &[u8]) -> String {
    let object = Object::String(bytes.to_vec(), StringFormat::Literal);
    let text = lopdf::decode_text_string(&object).unwrap_or_else(|_| decode_lossy(bytes));
    // lopdf leaves the UTF-8 mark in the decoded text
    match text.strip_prefix('\u{FEFF}') {
        Some(rest) if bytes.starts_with(UTF8_BOM) => rest.to_owned(),
        _ => text,
    }
}

fn decode_lossy(bytes: &[u8]) -> String {
    match bytes.strip_prefix(UTF16BE_BOM) {
        Some(body) => {
            let units: Vec<u16> = body
                .chunks(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Every byte form a producer may have used for `name` as a name-tree key:
/// the form this crate writes first, then UTF-16BE and UTF-8 with a mark,
/// then single-byte PDFDocEncoding. Forms that do not decode back to `name`
/// are left out.
pub fn text_string_candidates(name: &str) -> Vec<Vec<u8>> {
    let mut forms = vec![
        encode_text_string(name),
        lopdf::encode_utf16_be(name),
        lopdf::encode_utf8(name),
    ];
    if name.chars().all(|c| u32::from(c) < 0x100) {
        forms.push(name.chars().map(|c| u32::from(c) as u8).collect());
    }

    let mut candidates: Vec<Vec<u8>> = Vec::with_capacity(forms.len());
    for form in forms {
        if !candidates.contains(&form) && decode_text_string(&form) == name {
            candidates.push(form);
        }
    }
    candidates
}

/// A literal string object holding `text` as a PDF text string.
pub fn text_object(text: &str) -> Object {
    Object::String(encode_text_string(text), StringFormat::Literal)
}

/// Format a timestamp as a PDF date (`D:YYYYMMDDHHmmSS+00'00'`).
pub fn pdf_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

/// Byte-lexicographic display helper for name-tree keys in messages.
pub fn display_key(key: &[u8]) -> String {
    decode_text_string(key)
}
