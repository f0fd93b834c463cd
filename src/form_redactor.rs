//! Form field redaction
//!
//! Masks the values of AcroForm fields whose name or alias contains the
//! requested field name, regenerates their appearances, and flattens the
//! form so the masks become static page content.

use crate::appearance::{da_font_size, flatten_form, has_appearance, set_text_appearance};
use crate::config::RedactConfig;
use crate::extractor::load_document;
use crate::fields::{collect_fields, FieldError, FieldKind, FormField};
use crate::fonts::{resolve_mask_font, FontLoader, FsFontLoader, ResolvedFont};
use crate::mask::MaskToken;
use crate::writer::{save_document, text_string};
use crate::{PdfError, Redaction};
use lopdf::{Document, Object};
use std::path::Path;

/// Redact matching form fields of a PDF file
pub fn redact_form_field<P: AsRef<Path>>(
    path: P,
    field: &str,
    config: &RedactConfig,
) -> Result<Redaction, PdfError> {
    let buffer = std::fs::read(path)?;
    redact_form_field_mem(&buffer, field, config)
}

/// Redact matching form fields of a PDF buffer, loading fonts from disk
pub fn redact_form_field_mem(
    buffer: &[u8],
    field: &str,
    config: &RedactConfig,
) -> Result<Redaction, PdfError> {
    redact_form_field_with_loader(buffer, field, config, &FsFontLoader)
}

/// Redact matching form fields with an injected font loader
///
/// A document without a form, or without a matching field, is returned
/// byte-for-byte with `found = false`.
pub fn redact_form_field_with_loader(
    buffer: &[u8],
    field: &str,
    config: &RedactConfig,
    loader: &dyn FontLoader,
) -> Result<Redaction, PdfError> {
    let mut doc = load_document(buffer)?;
    let fields = collect_fields(&doc);
    if fields.is_empty() {
        log::info!("no form fields; nothing to redact for '{}'", field);
        return Ok(Redaction::unchanged(buffer));
    }

    let matched: Vec<&FormField> = fields.iter().filter(|f| f.matches(field)).collect();
    if matched.is_empty() {
        log::info!("no form field matches '{}'", field);
        return Ok(Redaction::unchanged(buffer));
    }

    let mut fonts = MaskFonts::default();
    let mut masked = 0;
    for form_field in &matched {
        match mask_field(&mut doc, form_field, config, loader, &mut fonts) {
            Ok(()) => {
                log::debug!("masked field '{}'", form_field.name);
                masked += 1;
            }
            Err(e) => log::warn!("skipping field: {}", e),
        }
    }

    if masked == 0 {
        return Ok(Redaction::unchanged(buffer));
    }

    // Valued fields without an appearance would vanish when flattened
    for other in fields.iter().filter(|f| !f.matches(field) && f.is_maskable()) {
        let Some(value) = other.value.as_deref().filter(|v| !v.is_empty()) else {
            continue;
        };
        for widget in &other.widgets {
            if has_appearance(&doc, *widget) {
                continue;
            }
            let font = fonts.basic(&mut doc, config);
            let size = appearance_size(other, config);
            if let Err(e) = set_text_appearance(&mut doc, *widget, value, &font, size) {
                log::warn!("no appearance for '{}': {}", other.name, e);
            }
        }
    }

    flatten_form(&mut doc, &fields)?;
    let pruned = doc.prune_objects();
    log::debug!("pruned {} unreachable objects", pruned.len());

    log::info!("masked {} of {} matching fields", masked, matched.len());
    Ok(Redaction {
        bytes: save_document(&mut doc)?,
        found: true,
    })
}

/// Fonts resolved on first use
#[derive(Default)]
struct MaskFonts {
    mask: Option<ResolvedFont>,
    basic: Option<ResolvedFont>,
}

impl MaskFonts {
    fn mask(
        &mut self,
        doc: &mut Document,
        config: &RedactConfig,
        loader: &dyn FontLoader,
    ) -> ResolvedFont {
        self.mask
            .get_or_insert_with(|| resolve_mask_font(doc, config, loader))
            .clone()
    }

    fn basic(&mut self, doc: &mut Document, config: &RedactConfig) -> ResolvedFont {
        self.basic
            .get_or_insert_with(|| ResolvedFont::basic(doc, config.ascii_mask))
            .clone()
    }
}

fn appearance_size(field: &FormField, config: &RedactConfig) -> Option<f32> {
    config
        .appearance_font_size
        .or_else(|| field.default_appearance.as_deref().and_then(da_font_size))
}

fn mask_field(
    doc: &mut Document,
    field: &FormField,
    config: &RedactConfig,
    loader: &dyn FontLoader,
    fonts: &mut MaskFonts,
) -> Result<(), FieldError> {
    let original = field.value.as_deref().unwrap_or("");
    let mask = MaskToken::for_value(original, config.mask_glyph, config.field_fallback_len);

    let (shown, font) = match &field.kind {
        FieldKind::Text => {
            let font = fonts.mask(doc, config, loader);
            (font.render_mask(&mask), font)
        }
        // Option lists stay ASCII so every viewer can show them
        FieldKind::Choice { .. } => {
            let font = fonts.basic(doc, config);
            (mask.to_ascii(config.ascii_mask), font)
        }
        FieldKind::Other => return Err(FieldError::Unsupported(field.name.clone())),
    };

    let dict = doc
        .get_object_mut(field.id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|_| FieldError::Missing(field.name.clone()))?;
    dict.set("V", text_string(shown.as_str()));
    if let FieldKind::Choice { .. } = field.kind {
        dict.set("Opt", Object::Array(vec![text_string(shown.as_str())]));
        dict.remove(b"I");
    }

    let size = appearance_size(field, config);
    for widget in &field.widgets {
        set_text_appearance(doc, *widget, shown.as_str(), &font, size)
            .map_err(|e| FieldError::Appearance(field.name.clone(), e))?;
    }
    Ok(())
}
