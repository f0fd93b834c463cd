//! Writing modified documents back to bytes
//!
//! Shared by the form and geometric redactors: content streams appended to
//! pages, page resources, PDF text strings, and serialization with a classic
//! cross-reference table.

use crate::extractor::page_resources;
use crate::metrics::resolve;
use crate::PdfError;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::xref::XrefType;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;

/// Trailer keys that only make sense for cross-reference streams
const XREF_STREAM_KEYS: &[&[u8]] = &[
    b"Type",
    b"W",
    b"Index",
    b"Filter",
    b"DecodeParms",
    b"Length",
    b"XRefStm",
    b"Prev",
];

/// Stream whose data is Flate-compressed
pub(crate) fn flate_stream(mut dict: Dictionary, data: &[u8]) -> Result<Stream, PdfError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    let compressed = encoder.finish()?;
    dict.set("Filter", "FlateDecode");
    Ok(Stream::new(dict, compressed))
}

/// Encode operations into content stream bytes
pub(crate) fn encode_operations(operations: Vec<Operation>) -> Result<Vec<u8>, PdfError> {
    Content { operations }
        .encode()
        .map_err(|e| PdfError::Write(e.to_string()))
}

/// Paint `operations` on top of a page's existing content
///
/// The existing streams are wrapped in `q ... Q` so whatever graphics state
/// they leave behind does not leak into the appended drawing.
pub(crate) fn append_page_content(
    doc: &mut Document,
    page_id: ObjectId,
    operations: Vec<Operation>,
) -> Result<(), PdfError> {
    let existing: Vec<Object> = {
        let page = doc.get_dictionary(page_id)?;
        match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match doc.get_object(*id) {
                Ok(Object::Array(items)) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    };

    let mut body = Vec::new();
    if !existing.is_empty() {
        body.extend_from_slice(b"Q\n");
    }
    body.extend(encode_operations(operations)?);
    let overlay_id = doc.add_object(flate_stream(Dictionary::new(), &body)?);

    let mut contents = Vec::with_capacity(existing.len() + 2);
    if !existing.is_empty() {
        let save_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        contents.push(Object::Reference(save_id));
        contents.extend(existing);
    }
    contents.push(Object::Reference(overlay_id));

    doc.get_dictionary_mut(page_id)?
        .set("Contents", Object::Array(contents));
    Ok(())
}

/// Register `target` under `category` (XObject, Font) in a page's resources
///
/// Inherited or shared resource dictionaries are copied onto the page first,
/// so other pages never see the new entry.
pub(crate) fn add_page_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &[u8],
    name: &str,
    target: ObjectId,
) -> Result<(), PdfError> {
    let mut resources = page_resources(doc, page_id)
        .cloned()
        .unwrap_or_else(Dictionary::new);
    let mut entries = resources
        .get(category)
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .cloned()
        .unwrap_or_else(Dictionary::new);

    entries.set(name, Object::Reference(target));
    resources.set(category, Object::Dictionary(entries));
    doc.get_dictionary_mut(page_id)?
        .set("Resources", Object::Dictionary(resources));
    Ok(())
}

/// First `prefix<n>` not yet used in a page's `category` resources
pub(crate) fn unused_resource_name(
    doc: &Document,
    page_id: ObjectId,
    category: &[u8],
    prefix: &str,
) -> String {
    let taken = page_resources(doc, page_id)
        .and_then(|r| r.get(category).ok())
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok());

    (0..)
        .map(|n| format!("{}{}", prefix, n))
        .find(|name| taken.map_or(true, |d| !d.has(name.as_bytes())))
        .unwrap_or_else(|| prefix.to_string())
}

/// PDF text string: literal when printable ASCII, UTF-16BE with BOM otherwise
pub(crate) fn text_string(s: &str) -> Object {
    if s.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        Object::String(s.as_bytes().to_vec(), StringFormat::Literal)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in s.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

/// Decode a PDF text string (UTF-16BE or UTF-8 with BOM, else Latin-1)
pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(utf8) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(utf8).to_string();
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Serialize with a classic cross-reference table
///
/// Object-stream and cross-reference-stream containers left over from
/// loading are dropped; their members are already plain objects.
pub(crate) fn save_document(doc: &mut Document) -> Result<Vec<u8>, PdfError> {
    let containers: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter(|(_, object)| {
            object
                .as_stream()
                .ok()
                .and_then(|s| s.dict.get(b"Type").ok())
                .and_then(|t| t.as_name().ok())
                .map(|t| t == b"ObjStm" || t == b"XRef")
                .unwrap_or(false)
        })
        .map(|(id, _)| *id)
        .collect();
    for id in &containers {
        doc.objects.remove(id);
    }

    for key in XREF_STREAM_KEYS {
        doc.trailer.remove(key);
    }
    doc.reference_table.cross_reference_type = XrefType::CrossReferenceTable;

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PdfError::Write(e.to_string()))?;

    log::debug!(
        "saved {} bytes ({} stream containers dropped)",
        buffer.len(),
        containers.len()
    );
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn test_text_string_forms() {
        match text_string("France") {
            Object::String(bytes, StringFormat::Literal) => assert_eq!(bytes, b"France"),
            other => panic!("unexpected {:?}", other),
        }
        match text_string("\u{2588}\u{2588}") {
            Object::String(bytes, StringFormat::Hexadecimal) => {
                assert_eq!(bytes, vec![0xFE, 0xFF, 0x25, 0x88, 0x25, 0x88]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_text_string() {
        assert_eq!(decode_text_string(b"Country"), "Country");
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x00, 0x56, 0x00, 0x4E]), "VN");
        assert_eq!(decode_text_string(&[0xEF, 0xBB, 0xBF, b'o', b'k']), "ok");
        assert_eq!(decode_text_string(&[0xE9]), "\u{e9}");
    }

    #[test]
    fn test_append_wraps_existing_content() {
        let mut doc = Document::with_version("1.7");
        let content_id = doc.add_object(Stream::new(dictionary! {}, b"1 0 0 rg".to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Contents" => content_id,
        });

        append_page_content(
            &mut doc,
            page_id,
            vec![Operation::new("f", vec![])],
        )
        .unwrap();

        let contents = doc
            .get_dictionary(page_id)
            .unwrap()
            .get(b"Contents")
            .unwrap()
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].as_reference().unwrap(), content_id);
        let overlay = doc
            .get_object(contents[2].as_reference().unwrap())
            .unwrap()
            .as_stream()
            .unwrap();
        let data = overlay.decompressed_content().unwrap();
        assert!(data.starts_with(b"Q\n"));
    }

    #[test]
    fn test_resource_names_skip_taken() {
        let mut doc = Document::with_version("1.7");
        let xobject_id = doc.add_object(dictionary! {});
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Redact0" => xobject_id },
            },
        });
        assert_eq!(
            unused_resource_name(&doc, page_id, b"XObject", "Redact"),
            "Redact1"
        );

        add_page_resource(&mut doc, page_id, b"XObject", "Redact1", xobject_id).unwrap();
        let resources = page_resources(&doc, page_id).unwrap();
        let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
        assert!(xobjects.has(b"Redact0"));
        assert!(xobjects.has(b"Redact1"));
    }
}
