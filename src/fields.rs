//! AcroForm field enumeration
//!
//! Fields are read once into [`FormField`] records with a closed
//! [`FieldKind`], their inherited attributes resolved and every name they
//! answer to collected.

use crate::metrics::resolve;
use crate::writer::decode_text_string;
use crate::PdfError;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashSet;

/// Nesting deeper than this in /Kids is treated as malformed
const MAX_FIELD_DEPTH: usize = 32;

/// Ff bit marking a choice field as a combo box
const FLAG_COMBO: i64 = 1 << 17;

/// What a field lets us set
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Settable text value
    Text,
    /// Option list with a selected value
    Choice { options: Vec<String>, combo: bool },
    /// Buttons, signatures and anything else (never masked)
    Other,
}

/// A terminal form field
#[derive(Debug, Clone)]
pub struct FormField {
    /// Object holding the field's value
    pub id: ObjectId,
    /// Fully qualified name (`parent.child`)
    pub name: String,
    /// Partial (/T), alternate (/TU) and mapping (/TM) names
    pub aliases: Vec<String>,
    pub kind: FieldKind,
    pub value: Option<String>,
    /// Widget annotations (the field itself when they are merged)
    pub widgets: Vec<ObjectId>,
    /// Default appearance string, inherited from ancestors or the form
    pub default_appearance: Option<String>,
}

impl FormField {
    /// Primary name followed by every alias
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Case-insensitive substring match against any name
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        !query.is_empty() && self.names().any(|n| n.to_lowercase().contains(&query))
    }

    pub fn is_maskable(&self) -> bool {
        !matches!(self.kind, FieldKind::Other)
    }
}

/// A field whose value could not be replaced
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    #[error("field '{0}' object is missing or not a dictionary")]
    Missing(String),
    #[error("field '{0}' cannot be masked")]
    Unsupported(String),
    #[error("field '{0}': {1}")]
    Appearance(String, #[source] PdfError),
}

/// Attributes passed down from ancestor fields
#[derive(Clone, Default)]
struct Inherited {
    prefix: String,
    field_type: Option<Vec<u8>>,
    value: Option<Object>,
    flags: Option<i64>,
    default_appearance: Option<String>,
    options: Option<Object>,
}

/// The document's interactive form dictionary, if any
pub fn acroform(doc: &Document) -> Option<&Dictionary> {
    let catalog = doc.catalog().ok()?;
    resolve(doc, catalog.get(b"AcroForm").ok()?).as_dict().ok()
}

/// Enumerate terminal fields of a PDF buffer
pub fn list_form_fields(buffer: &[u8]) -> Result<Vec<FormField>, PdfError> {
    let doc = crate::extractor::load_document(buffer)?;
    Ok(collect_fields(&doc))
}

/// Enumerate terminal fields in document order
pub fn collect_fields(doc: &Document) -> Vec<FormField> {
    let Some(form) = acroform(doc) else {
        return Vec::new();
    };
    let roots = form
        .get(b"Fields")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_array().ok());
    let Some(roots) = roots else {
        return Vec::new();
    };

    let inherited = Inherited {
        default_appearance: form.get(b"DA").ok().and_then(text_value),
        ..Inherited::default()
    };

    let mut fields = Vec::new();
    let mut visited = HashSet::new();
    for root in roots {
        if let Ok(id) = root.as_reference() {
            walk_field(doc, id, &inherited, 0, &mut visited, &mut fields);
        }
    }

    log::debug!("form has {} terminal fields", fields.len());
    fields
}

fn walk_field(
    doc: &Document,
    id: ObjectId,
    parent: &Inherited,
    depth: usize,
    visited: &mut HashSet<ObjectId>,
    out: &mut Vec<FormField>,
) {
    if depth > MAX_FIELD_DEPTH || !visited.insert(id) {
        return;
    }
    let Ok(dict) = doc.get_dictionary(id) else {
        return;
    };

    let partial = dict.get(b"T").ok().and_then(text_value);
    let mut inherited = parent.clone();
    if let Some(partial) = &partial {
        inherited.prefix = if parent.prefix.is_empty() {
            partial.clone()
        } else {
            format!("{}.{}", parent.prefix, partial)
        };
    }
    if let Ok(ft) = dict.get(b"FT").and_then(|o| o.as_name()) {
        inherited.field_type = Some(ft.to_vec());
    }
    if let Ok(v) = dict.get(b"V") {
        inherited.value = Some(resolve(doc, v).clone());
    }
    if let Ok(ff) = dict.get(b"Ff").and_then(|o| o.as_i64()) {
        inherited.flags = Some(ff);
    }
    if let Some(da) = dict.get(b"DA").ok().and_then(text_value) {
        inherited.default_appearance = Some(da);
    }
    if let Ok(opt) = dict.get(b"Opt") {
        inherited.options = Some(resolve(doc, opt).clone());
    }

    let kids: Vec<ObjectId> = dict
        .get(b"Kids")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_array().ok())
        .map(|kids| kids.iter().filter_map(|k| k.as_reference().ok()).collect())
        .unwrap_or_default();

    let (child_fields, widgets): (Vec<ObjectId>, Vec<ObjectId>) =
        kids.iter().partition(|kid| {
            doc.get_dictionary(**kid)
                .map(|d| d.has(b"T"))
                .unwrap_or(false)
        });

    if child_fields.is_empty() {
        let widgets = if widgets.is_empty() { vec![id] } else { widgets };
        out.push(terminal_field(doc, id, dict, partial, &inherited, widgets));
        return;
    }

    for kid in child_fields {
        walk_field(doc, kid, &inherited, depth + 1, visited, out);
    }
}

fn terminal_field(
    doc: &Document,
    id: ObjectId,
    dict: &Dictionary,
    partial: Option<String>,
    inherited: &Inherited,
    widgets: Vec<ObjectId>,
) -> FormField {
    let kind = match inherited.field_type.as_deref() {
        Some(b"Tx") => FieldKind::Text,
        Some(b"Ch") => FieldKind::Choice {
            options: inherited
                .options
                .as_ref()
                .map(|o| option_labels(doc, o))
                .unwrap_or_default(),
            combo: inherited.flags.unwrap_or(0) & FLAG_COMBO != 0,
        },
        _ => FieldKind::Other,
    };

    let mut aliases = Vec::new();
    let alternates = [b"TU".as_slice(), b"TM".as_slice()]
        .into_iter()
        .filter_map(|key| dict.get(key).ok().and_then(text_value));
    for alias in partial.into_iter().chain(alternates) {
        if alias != inherited.prefix && !aliases.contains(&alias) {
            aliases.push(alias);
        }
    }

    FormField {
        id,
        name: inherited.prefix.clone(),
        aliases,
        kind,
        value: inherited.value.as_ref().and_then(|v| value_string(doc, v)),
        widgets,
        default_appearance: inherited.default_appearance.clone(),
    }
}

/// Display labels of an /Opt array (`(label)` or `[(export) (label)]`)
fn option_labels(doc: &Document, options: &Object) -> Vec<String> {
    let Ok(items) = options.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match resolve(doc, item) {
            Object::Array(pair) => pair.last().and_then(text_value),
            other => text_value(other),
        })
        .collect()
}

fn value_string(doc: &Document, value: &Object) -> Option<String> {
    match value {
        Object::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|i| value_string(doc, resolve(doc, i)))
                .collect();
            Some(parts.join(", "))
        }
        Object::Name(name) => Some(String::from_utf8_lossy(name).to_string()),
        other => text_value(other),
    }
}

fn text_value(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        _ => None,
    }
}
