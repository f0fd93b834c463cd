//! Widget appearances and form flattening
//!
//! A widget's normal appearance (/AP /N) is a Form XObject drawn inside its
//! /Rect. Flattening paints every visible appearance into the page content,
//! then removes the widgets and the form itself.

use crate::fields::FormField;
use crate::fonts::ResolvedFont;
use crate::metrics::{number, resolve};
use crate::writer::{add_page_resource, append_page_content, flate_stream, unused_resource_name};
use crate::PdfError;
use lopdf::content::Operation;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::collections::{HashMap, HashSet};

/// Annotation flag: hidden
const ANNOT_HIDDEN: i64 = 1 << 1;

/// Horizontal inset of text inside the widget box
const TEXT_PADDING: f32 = 2.0;

/// Normalized [x1, y1, x2, y2] of a rectangle array
pub(crate) fn rect_of(doc: &Document, obj: &Object) -> Option<[f32; 4]> {
    let items = resolve(doc, obj).as_array().ok()?;
    if items.len() < 4 {
        return None;
    }
    let mut v = [0.0f32; 4];
    for (slot, item) in v.iter_mut().zip(items) {
        *slot = number(resolve(doc, item))?;
    }
    Some([v[0].min(v[2]), v[1].min(v[3]), v[0].max(v[2]), v[1].max(v[3])])
}

/// Font size of a default appearance string (`/Helv 12 Tf 0 g`)
///
/// Zero means auto-size and is reported as None.
pub(crate) fn da_font_size(da: &str) -> Option<f32> {
    let tokens: Vec<&str> = da.split_whitespace().collect();
    let tf = tokens.iter().position(|t| *t == "Tf")?;
    let size: f32 = tokens.get(tf.checked_sub(1)?)?.parse().ok()?;
    (size > 0.0).then_some(size)
}

/// Replace a widget's normal appearance with one showing `text`
pub(crate) fn set_text_appearance(
    doc: &mut Document,
    widget_id: ObjectId,
    text: &str,
    font: &ResolvedFont,
    font_size: Option<f32>,
) -> Result<(), PdfError> {
    let rect = {
        let widget = doc.get_dictionary(widget_id)?;
        let rect = widget.get(b"Rect").map_err(|_| PdfError::InvalidStructure)?;
        rect_of(doc, rect).ok_or(PdfError::InvalidStructure)?
    };
    let width = rect[2] - rect[0];
    let height = rect[3] - rect[1];

    let size = font_size.unwrap_or_else(|| auto_font_size(font, text, width, height));
    let baseline = ((height - size) / 2.0 + size * 0.22).max(1.0);

    let operations = vec![
        Operation::new("BMC", vec!["Tx".into()]),
        Operation::new("q", vec![]),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["FMask".into(), size.into()]),
        Operation::new("g", vec![0.into()]),
        Operation::new("Td", vec![TEXT_PADDING.into(), baseline.into()]),
        Operation::new("Tj", vec![font.encode(text)]),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
        Operation::new("EMC", vec![]),
    ];
    let content = crate::writer::encode_operations(operations)?;

    let stream = flate_stream(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "FMask" => font.font_id },
            },
        },
        &content,
    )?;
    let stream_id = doc.add_object(stream);

    let widget = doc.get_dictionary_mut(widget_id)?;
    widget.set("AP", dictionary! { "N" => stream_id });
    widget.remove(b"AS");
    Ok(())
}

/// Largest size up to 12pt that fits the box
fn auto_font_size(font: &ResolvedFont, text: &str, width: f32, height: f32) -> f32 {
    let by_height = (height * 0.7).min(12.0);
    let unit_width = font.text_width(text, 1.0);
    let by_width = if unit_width > 0.0 {
        (width - 2.0 * TEXT_PADDING) / unit_width
    } else {
        by_height
    };
    by_height.min(by_width).max(4.0)
}

/// Whether a widget already has a normal appearance
pub(crate) fn has_appearance(doc: &Document, widget_id: ObjectId) -> bool {
    doc.get_dictionary(widget_id)
        .ok()
        .and_then(|w| w.get(b"AP").ok())
        .map(|ap| resolve(doc, ap))
        .and_then(|ap| ap.as_dict().ok())
        .map(|ap| ap.has(b"N"))
        .unwrap_or(false)
}

/// Paint every field widget into its page and remove the form
///
/// Returns the number of widgets drawn.
pub(crate) fn flatten_form(doc: &mut Document, fields: &[FormField]) -> Result<usize, PdfError> {
    let widgets: HashSet<ObjectId> = fields.iter().flat_map(|f| f.widgets.iter().copied()).collect();
    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    let mut drawn = 0;

    for page_id in pages {
        let annots = page_annotations(doc, page_id);
        let (on_page, kept): (Vec<Object>, Vec<Object>) = annots.into_iter().partition(|a| {
            a.as_reference()
                .map(|id| widgets.contains(&id))
                .unwrap_or(false)
        });
        if on_page.is_empty() {
            continue;
        }

        let mut operations = Vec::new();
        let mut names: HashMap<ObjectId, String> = HashMap::new();
        for widget_id in on_page.iter().filter_map(|a| a.as_reference().ok()) {
            let Some(placement) = widget_placement(doc, widget_id) else {
                continue;
            };
            if !names.contains_key(&placement.stream_id) {
                let name = unused_resource_name(doc, page_id, b"XObject", "Flat");
                add_page_resource(doc, page_id, b"XObject", &name, placement.stream_id)?;
                names.insert(placement.stream_id, name);
            }
            ensure_form_xobject(doc, placement.stream_id)?;

            let m = placement.matrix;
            operations.push(Operation::new("q", vec![]));
            operations.push(Operation::new(
                "cm",
                m.iter().map(|v| Object::Real(*v)).collect(),
            ));
            operations.push(Operation::new(
                "Do",
                vec![Object::Name(names[&placement.stream_id].clone().into_bytes())],
            ));
            operations.push(Operation::new("Q", vec![]));
            drawn += 1;
        }

        if !operations.is_empty() {
            append_page_content(doc, page_id, operations)?;
        }

        let page = doc.get_dictionary_mut(page_id)?;
        if kept.is_empty() {
            page.remove(b"Annots");
        } else {
            page.set("Annots", Object::Array(kept));
        }
    }

    let root = doc
        .trailer
        .get(b"Root")
        .and_then(|r| r.as_reference())
        .map_err(|_| PdfError::InvalidStructure)?;
    doc.get_dictionary_mut(root)?.remove(b"AcroForm");

    log::info!("flattened {} widgets", drawn);
    Ok(drawn)
}

fn page_annotations(doc: &Document, page_id: ObjectId) -> Vec<Object> {
    doc.get_dictionary(page_id)
        .ok()
        .and_then(|p| p.get(b"Annots").ok())
        .map(|a| resolve(doc, a))
        .and_then(|a| a.as_array().ok())
        .cloned()
        .unwrap_or_default()
}

/// Appearance stream of a widget and the matrix mapping it onto /Rect
struct Placement {
    stream_id: ObjectId,
    matrix: [f32; 6],
}

fn widget_placement(doc: &Document, widget_id: ObjectId) -> Option<Placement> {
    let widget = doc.get_dictionary(widget_id).ok()?;
    let flags = widget.get(b"F").and_then(|f| f.as_i64()).unwrap_or(0);
    if flags & ANNOT_HIDDEN != 0 {
        return None;
    }
    let rect = rect_of(doc, widget.get(b"Rect").ok()?)?;

    // /N is a stream, or a dictionary of states selected by /AS
    let normal = widget
        .get(b"AP")
        .ok()
        .map(|ap| resolve(doc, ap))
        .and_then(|ap| ap.as_dict().ok())
        .and_then(|ap| ap.get(b"N").ok())?;
    let stream_id = match normal {
        Object::Reference(id) if doc.get_object(*id).map(|o| o.as_stream().is_ok()).unwrap_or(false) => *id,
        other => {
            let states = resolve(doc, other).as_dict().ok()?;
            let state = widget.get(b"AS").and_then(|s| s.as_name()).ok()?;
            states.get(state).and_then(|s| s.as_reference()).ok()?
        }
    };

    let stream = doc.get_object(stream_id).ok()?.as_stream().ok()?;
    let bbox = stream
        .dict
        .get(b"BBox")
        .ok()
        .and_then(|b| rect_of(doc, b))
        .unwrap_or([0.0, 0.0, rect[2] - rect[0], rect[3] - rect[1]]);
    let form_matrix = stream
        .dict
        .get(b"Matrix")
        .ok()
        .and_then(|m| m.as_array().ok())
        .filter(|m| m.len() == 6)
        .and_then(|m| {
            let mut out = [0.0f32; 6];
            for (slot, v) in out.iter_mut().zip(m) {
                *slot = number(v)?;
            }
            Some(out)
        })
        .unwrap_or([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    Some(Placement {
        stream_id,
        matrix: rect_mapping(transform_box(bbox, &form_matrix), rect),
    })
}

/// Bounding box of `bbox` after applying `m`
fn transform_box(bbox: [f32; 4], m: &[f32; 6]) -> [f32; 4] {
    let corners = [
        (bbox[0], bbox[1]),
        (bbox[2], bbox[1]),
        (bbox[0], bbox[3]),
        (bbox[2], bbox[3]),
    ];
    let mut out = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
    for (x, y) in corners {
        let tx = m[0] * x + m[2] * y + m[4];
        let ty = m[1] * x + m[3] * y + m[5];
        out[0] = out[0].min(tx);
        out[1] = out[1].min(ty);
        out[2] = out[2].max(tx);
        out[3] = out[3].max(ty);
    }
    out
}

/// Matrix scaling and translating `from` onto `to`
fn rect_mapping(from: [f32; 4], to: [f32; 4]) -> [f32; 6] {
    let scale = |t0: f32, t1: f32, f0: f32, f1: f32| {
        if (f1 - f0).abs() > f32::EPSILON {
            (t1 - t0) / (f1 - f0)
        } else {
            1.0
        }
    };
    let sx = scale(to[0], to[2], from[0], from[2]);
    let sy = scale(to[1], to[3], from[1], from[3]);
    [sx, 0.0, 0.0, sy, to[0] - from[0] * sx, to[1] - from[1] * sy]
}

/// Some writers omit /Type and /Subtype on appearance streams
fn ensure_form_xobject(doc: &mut Document, stream_id: ObjectId) -> Result<(), PdfError> {
    let stream = doc.get_object_mut(stream_id)?.as_stream_mut()?;
    let dict: &mut Dictionary = &mut stream.dict;
    if !dict.has(b"Subtype") {
        dict.set("Type", "XObject");
        dict.set("Subtype", "Form");
    }
    Ok(())
}
