//! Mask font resolution
//!
//! The preferred mask glyph (a full block by default) is only printable with
//! a font that carries it. Candidate sources are tried in order through a
//! [`FontLoader`]; the first face holding the glyph is embedded as a
//! composite TrueType font. When every candidate fails the basic Helvetica
//! font is used and masks fall back to ASCII.

use crate::config::{FontSource, RedactConfig};
use crate::mask::MaskToken;
use crate::tounicode::build_cmap;
use crate::writer::flate_stream;
use crate::PdfError;
use lopdf::{dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::{BTreeMap, HashMap};

/// A failure to use one candidate font (absorbed by the fallback chain)
#[derive(Debug, thiserror::Error)]
pub enum FontError {
    #[error("cannot read font {0}: {1}")]
    Load(String, #[source] std::io::Error),
    #[error("font {0} is not a TrueType/OpenType face")]
    Parse(String),
    #[error("font {0} has no glyph for {1:?}")]
    MissingGlyph(String, char),
}

/// Fetches font program bytes for a [`FontSource`]
pub trait FontLoader {
    fn load(&self, source: &FontSource) -> Result<Vec<u8>, FontError>;
}

/// Reads fonts from the filesystem or from memory
#[derive(Debug, Default, Clone, Copy)]
pub struct FsFontLoader;

impl FontLoader for FsFontLoader {
    fn load(&self, source: &FontSource) -> Result<Vec<u8>, FontError> {
        match source {
            FontSource::Path(path) => {
                std::fs::read(path).map_err(|e| FontError::Load(source.describe(), e))
            }
            FontSource::Memory { data, .. } => Ok(data.to_vec()),
        }
    }
}

/// How a resolved font encodes text
#[derive(Debug, Clone)]
enum Encoding {
    /// Two-byte glyph ids of an embedded face
    Identity { glyphs: HashMap<char, u16> },
    /// WinAnsi single bytes of the standard Helvetica font
    WinAnsi,
}

/// The font used to draw masks, already added to the document
#[derive(Debug, Clone)]
pub struct ResolvedFont {
    /// Font dictionary object
    pub font_id: ObjectId,
    /// Where it came from (`Helvetica` for the basic font)
    pub source: String,
    /// Glyph masks are drawn with
    pub mask_glyph: char,
    /// Substitute for glyphs this font cannot render
    ascii_mask: char,
    encoding: Encoding,
    /// Advance widths in thousandths of an em
    widths: HashMap<char, f32>,
}

impl ResolvedFont {
    /// Add the standard Helvetica font (always available to viewers)
    pub fn basic(doc: &mut Document, ascii_mask: char) -> Self {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let mask_glyph = if ascii_mask.is_ascii_graphic() {
            ascii_mask
        } else {
            '#'
        };
        ResolvedFont {
            font_id,
            source: "Helvetica".to_string(),
            mask_glyph,
            ascii_mask: mask_glyph,
            encoding: Encoding::WinAnsi,
            widths: HashMap::new(),
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self.encoding, Encoding::Identity { .. })
    }

    /// The mask as this font can render it
    pub fn render_mask(&self, mask: &MaskToken) -> MaskToken {
        match &self.encoding {
            Encoding::Identity { glyphs } if mask.as_str().chars().all(|c| glyphs.contains_key(&c)) => {
                mask.clone()
            }
            _ => mask.to_ascii(self.ascii_mask),
        }
    }

    /// String operand showing `text` with this font
    pub fn encode(&self, text: &str) -> Object {
        match &self.encoding {
            Encoding::Identity { glyphs } => {
                let bytes = text
                    .chars()
                    .flat_map(|c| glyphs.get(&c).copied().unwrap_or(0).to_be_bytes())
                    .collect();
                Object::String(bytes, StringFormat::Hexadecimal)
            }
            Encoding::WinAnsi => Object::String(
                text.chars()
                    .map(|c| if c.is_ascii() { c as u8 } else { b'#' })
                    .collect(),
                StringFormat::Literal,
            ),
        }
    }

    /// Width of `text` at `size` points
    pub fn text_width(&self, text: &str, size: f32) -> f32 {
        let basic = crate::metrics::FontMetrics::default();
        text.chars()
            .map(|c| match self.widths.get(&c) {
                Some(w) => *w,
                None => basic.width(c as u32),
            })
            .sum::<f32>()
            / 1000.0
            * size
    }
}

/// Resolve the font for `config.mask_glyph`, embedding it into `doc`
///
/// An ASCII mask glyph needs no embedding and resolves to the basic font
/// directly. Never fails: candidates that cannot be used are logged and
/// skipped.
pub fn resolve_mask_font(
    doc: &mut Document,
    config: &RedactConfig,
    loader: &dyn FontLoader,
) -> ResolvedFont {
    let glyph = config.mask_glyph;
    if glyph.is_ascii_graphic() {
        return ResolvedFont::basic(doc, glyph);
    }

    for source in &config.font_sources {
        match embed_source(doc, source, glyph, config.ascii_mask, loader) {
            Ok(font) => {
                log::info!("mask font: {}", font.source);
                return font;
            }
            Err(EmbedError::Font(e)) => log::debug!("skipping mask font: {}", e),
            Err(EmbedError::Pdf(e)) => log::warn!("cannot embed {}: {}", source.describe(), e),
        }
    }

    log::warn!(
        "no configured font renders {:?}; using Helvetica with '{}' masks",
        glyph,
        config.ascii_mask
    );
    ResolvedFont::basic(doc, config.ascii_mask)
}

enum EmbedError {
    Font(FontError),
    Pdf(PdfError),
}

impl From<FontError> for EmbedError {
    fn from(e: FontError) -> Self {
        EmbedError::Font(e)
    }
}

impl From<PdfError> for EmbedError {
    fn from(e: PdfError) -> Self {
        EmbedError::Pdf(e)
    }
}

/// Load one candidate and embed it as a Type0 / CIDFontType2 font
fn embed_source(
    doc: &mut Document,
    source: &FontSource,
    glyph: char,
    ascii_mask: char,
    loader: &dyn FontLoader,
) -> Result<ResolvedFont, EmbedError> {
    let label = source.describe();
    let data = loader.load(source)?;
    let face = ttf_parser::Face::parse(&data, 0).map_err(|_| FontError::Parse(label.clone()))?;
    if face.glyph_index(glyph).is_none() {
        return Err(FontError::MissingGlyph(label, glyph).into());
    }

    let units_per_em = face.units_per_em().max(1);
    let scale = 1000.0 / units_per_em as f32;
    let scaled = |v: i16| (v as f32 * scale).round() as i64;

    let mut glyphs = HashMap::new();
    let mut widths = HashMap::new();
    let mut to_unicode = BTreeMap::new();
    for c in [glyph, ascii_mask] {
        if let Some(gid) = face.glyph_index(c) {
            let advance = face.glyph_hor_advance(gid).unwrap_or(units_per_em) as f32 * scale;
            glyphs.insert(c, gid.0);
            widths.insert(c, advance.round());
            to_unicode.insert(gid.0, c);
        }
    }

    let base_font = format!("RedactMask+{}", font_name(&label));
    let bbox = face.global_bounding_box();
    let ascent = scaled(face.ascender());
    let descent = scaled(face.descender());
    let cap_height = face.capital_height().map(scaled).unwrap_or(ascent);
    let mut flags: i64 = 4;
    if face.is_monospaced() {
        flags |= 1;
    }

    let file_dict = dictionary! { "Length1" => data.len() as i64 };
    let file_id = doc.add_object(flate_stream(file_dict, &data)?);

    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => Object::Name(base_font.clone().into_bytes()),
        "Flags" => flags,
        "FontBBox" => vec![
            scaled(bbox.x_min).into(),
            scaled(bbox.y_min).into(),
            scaled(bbox.x_max).into(),
            scaled(bbox.y_max).into(),
        ],
        "ItalicAngle" => 0,
        "Ascent" => ascent,
        "Descent" => descent,
        "CapHeight" => cap_height,
        "StemV" => 80,
        "FontFile2" => file_id,
    });

    let mut w_array = Vec::new();
    for (c, gid) in &glyphs {
        w_array.push(Object::Integer(*gid as i64));
        w_array.push(Object::Array(vec![Object::Integer(widths[c] as i64)]));
    }

    let cid_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => Object::Name(base_font.clone().into_bytes()),
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => 1000,
        "W" => w_array,
        "CIDToGIDMap" => "Identity",
    });

    let cmap_id = doc.add_object(flate_stream(dictionary! {}, &build_cmap(&to_unicode))?);

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => Object::Name(base_font.into_bytes()),
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Reference(cid_font_id)],
        "ToUnicode" => cmap_id,
    });

    Ok(ResolvedFont {
        font_id,
        source: label,
        mask_glyph: glyph,
        ascii_mask,
        encoding: Encoding::Identity { glyphs },
        widths,
    })
}

/// PostScript-safe name derived from a source label
fn font_name(label: &str) -> String {
    let stem = label
        .rsplit(['/', '\\', ':'])
        .next()
        .unwrap_or(label)
        .split('.')
        .next()
        .unwrap_or(label);
    let name: String = stem.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if name.is_empty() {
        "Font".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    struct FailingLoader;

    impl FontLoader for FailingLoader {
        fn load(&self, source: &FontSource) -> Result<Vec<u8>, FontError> {
            Err(FontError::Load(
                source.describe(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "offline"),
            ))
        }
    }

    #[test]
    fn test_all_sources_fail_falls_back_to_helvetica() {
        let mut doc = Document::with_version("1.7");
        let config = RedactConfig {
            font_sources: vec![FontSource::Path(PathBuf::from("/nonexistent/font.ttf"))],
            ..RedactConfig::default()
        };
        let font = resolve_mask_font(&mut doc, &config, &FailingLoader);
        assert!(!font.is_embedded());
        assert_eq!(font.mask_glyph, '#');
        assert_eq!(font.source, "Helvetica");

        let mask = MaskToken::for_value("France", '\u{2588}', 6);
        assert_eq!(font.render_mask(&mask).as_str(), "######");
    }

    #[test]
    fn test_fallback_mask_uses_configured_ascii_glyph() {
        let mut doc = Document::with_version("1.7");
        let config = RedactConfig {
            ascii_mask: '*',
            font_sources: Vec::new(),
            ..RedactConfig::default()
        };
        let font = resolve_mask_font(&mut doc, &config, &FailingLoader);
        assert_eq!(font.mask_glyph, '*');

        let mask = MaskToken::for_value("Hanoi", '\u{2588}', 6);
        assert_eq!(font.render_mask(&mask).as_str(), "*****");
    }

    #[test]
    fn test_garbage_font_bytes_are_skipped() {
        let mut doc = Document::with_version("1.7");
        let config = RedactConfig {
            font_sources: vec![FontSource::Memory {
                name: "broken".to_string(),
                data: Arc::from(&b"not a font"[..]),
            }],
            ..RedactConfig::default()
        };
        let font = resolve_mask_font(&mut doc, &config, &FsFontLoader);
        assert!(!font.is_embedded());
    }

    #[test]
    fn test_ascii_glyph_needs_no_font() {
        let mut doc = Document::with_version("1.7");
        let font = resolve_mask_font(&mut doc, &RedactConfig::ascii_only(), &FailingLoader);
        assert!(!font.is_embedded());
        assert_eq!(font.mask_glyph, '#');
    }

    #[test]
    fn test_basic_font_encoding_and_width() {
        let mut doc = Document::with_version("1.7");
        let font = ResolvedFont::basic(&mut doc, '#');
        match font.encode("##") {
            Object::String(bytes, _) => assert_eq!(bytes, b"##"),
            other => panic!("unexpected {:?}", other),
        }
        // '#' is 556 units in Helvetica
        assert!((font.text_width("##", 10.0) - 11.12).abs() < 0.001);
    }

    #[test]
    fn test_font_name_from_label() {
        assert_eq!(font_name("/usr/share/fonts/DejaVuSans.ttf"), "DejaVuSans");
        assert_eq!(font_name("memory:Noto Mono"), "NotoMono");
        assert_eq!(font_name("C:\\Windows\\Fonts\\consola.ttf"), "consola");
    }
}
