//! Redaction configuration
//!
//! Every entry point takes a [`RedactConfig`] explicitly; nothing here is
//! process-wide state.

use crate::mask::MaskPolicy;
use std::path::PathBuf;
use std::sync::Arc;

/// Field names commonly redacted from CVs and identity documents
pub const COMMON_FIELDS: &[&str] = &[
    "country",
    "languages",
    "phone",
    "email",
    "address",
    "birthdate",
    "ssn",
    "passport",
    "id",
    "salary",
    "experience",
    "education",
];

/// Where a candidate mask font is loaded from
#[derive(Debug, Clone)]
pub enum FontSource {
    /// A TrueType/OpenType file on disk
    Path(PathBuf),
    /// Font bytes already in memory (bundled asset, fetched elsewhere)
    Memory { name: String, data: Arc<[u8]> },
}

impl FontSource {
    /// Label used in log messages
    pub fn describe(&self) -> String {
        match self {
            FontSource::Path(path) => path.display().to_string(),
            FontSource::Memory { name, .. } => format!("memory:{}", name),
        }
    }
}

/// Configuration shared by the extraction and redaction entry points
#[derive(Debug, Clone)]
pub struct RedactConfig {
    /// Maximum baseline difference for two runs to share a visual row
    pub row_tolerance: f32,
    /// Preferred mask glyph (needs an embedded font when not ASCII)
    pub mask_glyph: char,
    /// ASCII mask used when the preferred glyph cannot be rendered
    pub ascii_mask: char,
    /// Mask length for empty values in plain-text redaction
    pub text_fallback_len: usize,
    /// Mask length for empty values in form fields
    pub field_fallback_len: usize,
    /// Ordered candidate fonts for rendering `mask_glyph`
    pub font_sources: Vec<FontSource>,
    /// Fill color of geometric overlays (RGB, 0.0 - 1.0)
    pub overlay_color: (f32, f32, f32),
    /// Extra margin added around each geometric overlay
    pub overlay_padding: f32,
    /// Font size for regenerated field appearances (None = from /DA or auto)
    pub appearance_font_size: Option<f32>,
}

impl Default for RedactConfig {
    fn default() -> Self {
        Self {
            row_tolerance: 2.0,
            mask_glyph: '\u{2588}',
            ascii_mask: '#',
            text_fallback_len: 8,
            field_fallback_len: 6,
            font_sources: default_font_sources(),
            overlay_color: (0.0, 0.0, 0.0),
            overlay_padding: 0.0,
            appearance_font_size: None,
        }
    }
}

impl RedactConfig {
    /// Config that never embeds a font and always masks with ASCII
    pub fn ascii_only() -> Self {
        Self {
            mask_glyph: '#',
            font_sources: Vec::new(),
            ..Self::default()
        }
    }

    /// Masking used for plain-text redaction
    pub fn text_mask_policy(&self) -> MaskPolicy {
        MaskPolicy {
            glyph: self.ascii_mask,
            fallback_len: self.text_fallback_len,
        }
    }
}

/// System fonts known to carry the full block glyph
fn default_font_sources() -> Vec<FontSource> {
    [
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/noto/NotoSansMono-Regular.ttf",
        "/Library/Fonts/Arial Unicode.ttf",
        "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
        "C:\\Windows\\Fonts\\consola.ttf",
        "C:\\Windows\\Fonts\\seguisym.ttf",
    ]
    .iter()
    .map(|p| FontSource::Path(PathBuf::from(p)))
    .collect()
}
