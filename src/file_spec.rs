use crate::filters;
use crate::pdf_utils::{self, pdf_date, text_object};
use crate::store::ObjectStore;
use crate::{AttachConfig, AttachError, EmbeddedFile, EmbeddedFileMetadata, Result};
use chrono::{DateTime, Utc};
use lopdf::{Dictionary, Object, ObjectId, Stream, StringFormat};
use md5::{Digest, Md5};

/// Everything Add needs to create one file specification.
#[derive(Debug, Clone)]
pub(crate) struct NewEmbeddedFile<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub data: &'a [u8],
    pub modified: Option<DateTime<Utc>>,
    pub mime_type: Option<&'a str>,
}

/// Allocate an embedded-file stream and a file specification pointing at it.
///
/// Returns `(file_spec, stream)`. `/Params/Size` and `/Params/CheckSum`
/// always describe the decoded payload.
///
/// ```text
/// << /Type /Filespec /F (a.bin) /UF (a.bin) /Desc (...)
///    /EF << /F 12 0 R /UF 12 0 R >> >>
///
/// 12 0 obj << /Type /EmbeddedFile /Filter /FlateDecode
///             /Params << /Size 4096 /CheckSum <...> /ModDate (D:...) >> >>
/// ```
pub(crate) fn encode(
    store: &mut ObjectStore,
    file: &NewEmbeddedFile<'_>,
    config: &AttachConfig,
) -> Result<(ObjectId, ObjectId)> {
    let encoded = filters::encode(file.data, config.filter_policy, config.compression_threshold)?;

    let mut params = Dictionary::new();
    params.set("Size", Object::Integer(file.data.len() as i64));
    if config.write_checksums {
        params.set(
            "CheckSum",
            Object::String(Md5::digest(file.data).to_vec(), StringFormat::Hexadecimal),
        );
    }
    if let Some(modified) = file.modified {
        params.set(
            "ModDate",
            Object::String(pdf_date(modified).into_bytes(), StringFormat::Literal),
        );
    }

    let mut stream_dict = Dictionary::new();
    stream_dict.set("Type", Object::Name(b"EmbeddedFile".to_vec()));
    if let Some(mime) = file.mime_type {
        stream_dict.set("Subtype", Object::Name(mime.as_bytes().to_vec()));
    }
    if let Some(filter) = encoded.filter {
        stream_dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
    }
    stream_dict.set("Params", Object::Dictionary(params));
    let stream_id = store.allocate(Object::Stream(Stream::new(stream_dict, encoded.content)));

    let mut ef = Dictionary::new();
    ef.set("F", Object::Reference(stream_id));
    ef.set("UF", Object::Reference(stream_id));

    let mut spec = Dictionary::new();
    spec.set("Type", Object::Name(b"Filespec".to_vec()));
    spec.set("F", text_object(file.name));
    spec.set("UF", text_object(file.name));
    if let Some(desc) = file.description {
        spec.set("Desc", text_object(desc));
    }
    spec.set("EF", Object::Dictionary(ef));
    let spec_id = store.allocate(Object::Dictionary(spec));

    Ok((spec_id, stream_id))
}

/// Reads file specifications and their embedded streams back out of a store.
pub(crate) struct FileSpecParser<'a> {
    store: &'a ObjectStore,
}

impl<'a> FileSpecParser<'a> {
    pub fn new(store: &'a ObjectStore) -> Self {
        Self { store }
    }

    /// Create an extraction error with consistent formatting.
    fn extraction_error(&self, name: &str, message: &str) -> AttachError {
        AttachError::ExtractionError(name.into(), message.into())
    }

    fn spec_dict(&self, name: &str, spec_id: ObjectId) -> Result<&'a Dictionary> {
        self.store
            .resolve(spec_id)?
            .as_dict()
            .map_err(|_| self.extraction_error(name, "file spec is not a dictionary"))
    }

    /// Resolve the /EF dictionary, handling both inline and reference cases.
    fn ef_dictionary(&self, spec: &'a Dictionary, name: &str) -> Result<&'a Dictionary> {
        let ef_val = spec
            .get(b"EF")
            .map_err(|_| self.extraction_error(name, "missing /EF entry"))?;
        self.store
            .deref(ef_val)?
            .as_dict()
            .map_err(|_| self.extraction_error(name, "/EF is not a dictionary"))
    }

    /// The embedded stream a file specification points at (/UF preferred
    /// over /F).
    pub fn stream(&self, name: &str, spec_id: ObjectId) -> Result<(ObjectId, &'a Stream)> {
        let spec = self.spec_dict(name, spec_id)?;
        let ef = self.ef_dictionary(spec, name)?;
        let stream_ref = ef
            .get(b"UF")
            .or_else(|_| ef.get(b"F"))
            .map_err(|_| self.extraction_error(name, "/EF has neither /F nor /UF"))?;
        let stream_id = stream_ref
            .as_reference()
            .map_err(|_| self.extraction_error(name, "/EF stream entry is not a reference"))?;
        let stream = self
            .store
            .resolve(stream_id)?
            .as_stream()
            .map_err(|_| self.extraction_error(name, "embedded stream object is not a stream"))?;
        Ok((stream_id, stream))
    }

    /// Every distinct stream referenced from the file specification's `/EF`.
    pub fn stream_ids(&self, name: &str, spec_id: ObjectId) -> Result<Vec<ObjectId>> {
        let spec = self.spec_dict(name, spec_id)?;
        let ef = self.ef_dictionary(spec, name)?;
        let mut ids: Vec<ObjectId> = ef
            .iter()
            .filter_map(|(_, v)| v.as_reference().ok())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    /// `/Desc` of a file specification.
    pub fn description(&self, spec_id: ObjectId) -> Option<String> {
        let spec = self.store.resolve(spec_id).ok()?.as_dict().ok()?;
        pdf_utils::extract_string_from_dict(spec, b"Desc")
    }

    /// Decode one attachment and check it against its declared parameters.
    ///
    /// A `/CheckSum` mismatch is reported as `IntegrityMismatch`; a length
    /// that differs from `/Size` is reported as `SizeMismatch`.
    pub fn decode(&self, name: &str, spec_id: ObjectId) -> Result<EmbeddedFile> {
        let spec = self.spec_dict(name, spec_id)?;
        let (_, stream) = self.stream(name, spec_id)?;

        let data = filters::decode(stream).map_err(|e| self.extraction_error(name, &e))?;
        let metadata = Self::read_metadata(spec, &stream.dict);

        if let Some(declared) = Self::declared_checksum(&stream.dict) {
            let computed = Md5::digest(&data).to_vec();
            if declared != computed {
                return Err(AttachError::IntegrityMismatch {
                    name: name.into(),
                    declared: hex::encode(declared),
                    computed: hex::encode(computed),
                });
            }
        }
        if let Some(declared) = metadata.size {
            if declared != data.len() {
                return Err(AttachError::SizeMismatch {
                    name: name.into(),
                    declared,
                    actual: data.len(),
                });
            }
        }

        Ok(EmbeddedFile {
            name: name.into(),
            filename: Self::best_filename(spec, name),
            data,
            metadata,
        })
    }

    fn declared_checksum(stream_dict: &Dictionary) -> Option<Vec<u8>> {
        let params = stream_dict.get(b"Params").ok()?.as_dict().ok()?;
        params
            .get(b"CheckSum")
            .ok()?
            .as_str()
            .ok()
            .map(<[u8]>::to_vec)
    }

    /// Return the best available filename: Unicode (/UF) > ASCII (/F) > fallback.
    fn best_filename(spec_dict: &Dictionary, fallback: &str) -> String {
        for key in [b"UF" as &[u8], b"F"] {
            if let Some(name) = pdf_utils::extract_string_from_dict(spec_dict, key) {
                return name;
            }
        }
        fallback.into()
    }

    /// Read optional metadata from the file specification dictionary and the
    /// embedded stream's `/Params` sub-dictionary.
    fn read_metadata(spec_dict: &Dictionary, stream_dict: &Dictionary) -> EmbeddedFileMetadata {
        let mut metadata = EmbeddedFileMetadata {
            description: pdf_utils::extract_string_from_dict(spec_dict, b"Desc"),
            ..Default::default()
        };

        // /Subtype is a MIME type stored as a name; older producers put it on
        // the file specification instead of the stream.
        metadata.mime_type = [stream_dict, spec_dict]
            .into_iter()
            .find_map(|d| d.get(b"Subtype").ok()?.as_name().ok())
            .map(|n| String::from_utf8_lossy(n).to_ascii_lowercase());

        if let Ok(params) = stream_dict.get(b"Params").and_then(Object::as_dict) {
            metadata.modification_date = pdf_utils::extract_string_from_dict(params, b"ModDate");
            metadata.creation_date = pdf_utils::extract_string_from_dict(params, b"CreationDate");
            metadata.size = params
                .get(b"Size")
                .and_then(Object::as_i64)
                .ok()
                .and_then(|n| usize::try_from(n).ok());
            metadata.checksum = params
                .get(b"CheckSum")
                .and_then(Object::as_str)
                .ok()
                .map(hex::encode);
        }

        metadata
    }
}
