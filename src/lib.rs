//! PDF text extraction and field-value redaction using lopdf
//!
//! This crate provides:
//! - Positioned text runs and reading-order plain text from PDF pages
//! - Masking of labelled values in extracted plain text
//! - AcroForm field masking with font fallback and form flattening
//! - Opaque overlays over labelled values in any text layer

pub mod appearance;
pub mod config;
pub mod extractor;
pub mod fields;
pub mod fonts;
pub mod form_redactor;
pub mod geometry;
pub mod layout;
pub mod mask;
pub mod metrics;
pub mod pattern;
pub mod tounicode;
mod writer;

pub use config::{FontSource, RedactConfig, COMMON_FIELDS};
pub use extractor::{
    extract_page_runs, extract_text, extract_text_mem, extract_text_with_positions,
    extract_text_with_positions_mem, TextRun,
};
pub use fields::{list_form_fields, FieldKind, FormField};
pub use fonts::{FontError, FontLoader, FsFontLoader};
pub use form_redactor::{redact_form_field, redact_form_field_mem, redact_form_field_with_loader};
pub use geometry::{locate_field_rects, redact_by_geometry, redact_by_geometry_mem, RedactionRect};
pub use layout::{
    group_lines, reconstruct, reconstruct_pages, reconstruct_pages_with_tolerance,
    reconstruct_with_tolerance, TextLine,
};
pub use mask::{MaskPolicy, MaskToken};
pub use pattern::{locate_field_values, redact_field, redact_field_with};

use std::path::Path;

/// Result of a PDF redaction path
#[derive(Debug, Clone)]
pub struct Redaction {
    /// The output document
    pub bytes: Vec<u8>,
    /// Whether anything matched and was masked
    pub found: bool,
}

impl Redaction {
    /// A copy of the input, reported as not found
    pub fn unchanged(input: &[u8]) -> Self {
        Redaction {
            bytes: input.to_vec(),
            found: false,
        }
    }
}

/// Which redaction path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Form,
    Geometry,
}

/// Redact a PDF file, trying form fields first and the text layer second
pub fn redact_pdf<P: AsRef<Path>>(
    path: P,
    field: &str,
    config: &RedactConfig,
) -> Result<(Redaction, Option<Strategy>), PdfError> {
    let buffer = std::fs::read(path)?;
    redact_pdf_mem(&buffer, field, config)
}

/// Redact a PDF buffer, trying form fields first and the text layer second
///
/// The strategy is None when neither path found the field.
pub fn redact_pdf_mem(
    buffer: &[u8],
    field: &str,
    config: &RedactConfig,
) -> Result<(Redaction, Option<Strategy>), PdfError> {
    let by_form = redact_form_field_mem(buffer, field, config)?;
    if by_form.found {
        return Ok((by_form, Some(Strategy::Form)));
    }

    let by_geometry = redact_by_geometry_mem(buffer, field, config)?;
    if by_geometry.found {
        return Ok((by_geometry, Some(Strategy::Geometry)));
    }

    Ok((Redaction::unchanged(buffer), None))
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot read content: {0}")]
    Parse(String),
    #[error("PDF is encrypted")]
    Encrypted,
    #[error("Invalid PDF structure")]
    InvalidStructure,
    #[error("cannot write PDF: {0}")]
    Write(String),
}

impl From<lopdf::Error> for PdfError {
    fn from(e: lopdf::Error) -> Self {
        PdfError::Parse(e.to_string())
    }
}
