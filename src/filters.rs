//! Stream filter encoding and decoding for embedded-file payloads.

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use lopdf::{Object, Stream};
use std::io::Read;

/// How Add filter-encodes a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterPolicy {
    /// Store the payload bytes as-is.
    None,
    /// Always apply `/FlateDecode`.
    Flate,
    /// Apply `/FlateDecode` only when the payload reaches the configured
    /// threshold and deflating actually makes it smaller.
    #[default]
    Auto,
}

/// A payload ready to be stored, plus the filter name to declare (if any).
pub(crate) struct EncodedPayload {
    pub content: Vec<u8>,
    pub filter: Option<&'static str>,
}

pub(crate) fn encode(
    payload: &[u8],
    policy: FilterPolicy,
    threshold: usize,
) -> std::io::Result<EncodedPayload> {
    match policy {
        FilterPolicy::None => Ok(raw(payload)),
        FilterPolicy::Flate => Ok(EncodedPayload {
            content: deflate(payload)?,
            filter: Some("FlateDecode"),
        }),
        FilterPolicy::Auto => {
            if payload.len() < threshold {
                return Ok(raw(payload));
            }
            let compressed = deflate(payload)?;
            if compressed.len() < payload.len() {
                Ok(EncodedPayload {
                    content: compressed,
                    filter: Some("FlateDecode"),
                })
            } else {
                // already compressed data
                Ok(raw(payload))
            }
        }
    }
}

fn raw(payload: &[u8]) -> EncodedPayload {
    EncodedPayload {
        content: payload.to_vec(),
        filter: None,
    }
}

fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(data, Compression::default());
    let mut compressed = Vec::new();
    encoder.read_to_end(&mut compressed)?;
    Ok(compressed)
}

fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// Apply the inverse of the stream's filter chain.
///
/// Unfiltered streams and chains made only of parameterless `/FlateDecode`
/// are handled here; anything else is delegated to lopdf's decoder.
pub(crate) fn decode(stream: &Stream) -> Result<Vec<u8>, String> {
    let filters = match stream.dict.get(b"Filter") {
        Err(_) => return Ok(stream.content.clone()),
        Ok(Object::Name(name)) => vec![name.as_slice()],
        Ok(Object::Array(items)) => items
            .iter()
            .map(|o| o.as_name().map_err(|e| e.to_string()))
            .collect::<Result<Vec<_>, _>>()?,
        Ok(_) => return Err("/Filter is neither a name nor an array".into()),
    };

    let has_params = stream.dict.get(b"DecodeParms").is_ok();
    if filters.is_empty() {
        return Ok(stream.content.clone());
    }
    if !has_params && filters.iter().all(|f| *f == b"FlateDecode") {
        let mut data = stream.content.clone();
        for _ in &filters {
            data = inflate(&data).map_err(|e| format!("FlateDecode failed: {e}"))?;
        }
        return Ok(data);
    }

    stream.decompressed_content().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Dictionary;

    #[test]
    fn auto_skips_small_payloads() {
        let out = encode(b"tiny", FilterPolicy::Auto, 256).unwrap();
        assert!(out.filter.is_none());
        assert_eq!(out.content, b"tiny");
    }

    #[test]
    fn auto_compresses_repetitive_payloads() {
        let payload = vec![b'a'; 4096];
        let out = encode(&payload, FilterPolicy::Auto, 256).unwrap();
        assert_eq!(out.filter, Some("FlateDecode"));
        assert!(out.content.len() < payload.len());
    }

    #[test]
    fn auto_keeps_incompressible_payloads_raw() {
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        let payload: Vec<u8> = (0..4096)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect();
        let out = encode(&payload, FilterPolicy::Auto, 16).unwrap();
        assert!(out.filter.is_none());
        assert_eq!(out.content, payload);
    }

    #[test]
    fn flate_stream_decodes() {
        let payload = b"hello hello hello hello".to_vec();
        let encoded = encode(&payload, FilterPolicy::Flate, 0).unwrap();
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        let stream = Stream::new(dict, encoded.content);
        assert_eq!(decode(&stream).unwrap(), payload);
    }

    #[test]
    fn corrupt_flate_stream_is_an_error() {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        let stream = Stream::new(dict, b"not zlib".to_vec());
        assert!(decode(&stream).is_err());
    }

    #[test]
    fn unfiltered_stream_is_returned_verbatim() {
        let stream = Stream::new(Dictionary::new(), vec![0, 1, 2]);
        assert_eq!(decode(&stream).unwrap(), vec![0, 1, 2]);
    }
}
