//! Glyph advance widths for positioned runs
//!
//! Widths are in thousandths of a text space unit, as in the PDF font
//! dictionaries they come from.

use lopdf::{Dictionary, Document, Object};
use std::collections::HashMap;

/// Helvetica advance widths for character codes 32..=126
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' ' - '/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0' - '9'
    278, 278, 584, 584, 584, 556, 1015, // ':' - '@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A' - 'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N' - 'Z'
    278, 278, 278, 469, 556, 333, // '[' - '`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a' - 'm'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n' - 'z'
    334, 260, 334, 584, // '{' - '~'
];

const DEFAULT_WIDTH: f32 = 556.0;

/// Width information for one font resource
#[derive(Debug, Clone)]
pub enum FontMetrics {
    /// Single-byte font with an explicit /Widths array
    Simple {
        first_char: u32,
        widths: Vec<f32>,
        missing_width: f32,
    },
    /// Two-byte composite font (/DW and /W of the descendant)
    Composite {
        default_width: f32,
        widths: HashMap<u32, f32>,
    },
    /// Standard font without a /Widths array
    Standard { monospace: bool },
}

impl Default for FontMetrics {
    fn default() -> Self {
        FontMetrics::Standard { monospace: false }
    }
}

impl FontMetrics {
    /// Read metrics from a font dictionary
    pub fn from_font_dict(doc: &Document, font: &Dictionary) -> Self {
        let subtype = font
            .get(b"Subtype")
            .and_then(|o| o.as_name())
            .unwrap_or_default();

        if subtype == b"Type0" {
            return composite_metrics(doc, font);
        }

        let widths = font
            .get(b"Widths")
            .ok()
            .map(|o| resolve(doc, o))
            .and_then(|o| o.as_array().ok());

        match widths {
            Some(array) => {
                let first_char = font
                    .get(b"FirstChar")
                    .ok()
                    .and_then(number)
                    .unwrap_or(0.0) as u32;
                let missing_width = font
                    .get(b"FontDescriptor")
                    .ok()
                    .map(|o| resolve(doc, o))
                    .and_then(|o| o.as_dict().ok())
                    .and_then(|d| d.get(b"MissingWidth").ok())
                    .and_then(number)
                    .unwrap_or(0.0);
                FontMetrics::Simple {
                    first_char,
                    widths: array
                        .iter()
                        .map(|w| number(resolve(doc, w)).unwrap_or(0.0))
                        .collect(),
                    missing_width,
                }
            }
            None => {
                let base_font = font
                    .get(b"BaseFont")
                    .and_then(|o| o.as_name())
                    .map(|n| String::from_utf8_lossy(n).to_lowercase())
                    .unwrap_or_default();
                FontMetrics::Standard {
                    monospace: base_font.contains("courier"),
                }
            }
        }
    }

    /// Bytes per character code
    pub fn code_len(&self) -> usize {
        match self {
            FontMetrics::Composite { .. } => 2,
            _ => 1,
        }
    }

    /// Advance width of a character code
    pub fn width(&self, code: u32) -> f32 {
        match self {
            FontMetrics::Simple {
                first_char,
                widths,
                missing_width,
            } => code
                .checked_sub(*first_char)
                .and_then(|i| widths.get(i as usize))
                .copied()
                .filter(|w| *w > 0.0)
                .unwrap_or(if *missing_width > 0.0 {
                    *missing_width
                } else {
                    DEFAULT_WIDTH
                }),
            FontMetrics::Composite {
                default_width,
                widths,
            } => widths.get(&code).copied().unwrap_or(*default_width),
            FontMetrics::Standard { monospace: true } => 600.0,
            FontMetrics::Standard { monospace: false } => match code {
                32..=126 => HELVETICA_ASCII[(code - 32) as usize] as f32,
                _ => DEFAULT_WIDTH,
            },
        }
    }

    /// Split a shown string into character codes
    pub fn codes(&self, bytes: &[u8]) -> Vec<u32> {
        match self.code_len() {
            2 => bytes
                .chunks(2)
                .map(|c| match c {
                    [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
                    [single] => *single as u32,
                    _ => 0,
                })
                .collect(),
            _ => bytes.iter().map(|&b| b as u32).collect(),
        }
    }
}

/// Metrics of a Type0 font from its first descendant
fn composite_metrics(doc: &Document, font: &Dictionary) -> FontMetrics {
    let descendant = font
        .get(b"DescendantFonts")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_array().ok())
        .and_then(|a| a.first())
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok());

    let Some(descendant) = descendant else {
        return FontMetrics::Composite {
            default_width: 1000.0,
            widths: HashMap::new(),
        };
    };

    let default_width = descendant
        .get(b"DW")
        .ok()
        .and_then(number)
        .unwrap_or(1000.0);

    let mut widths = HashMap::new();
    if let Some(w) = descendant
        .get(b"W")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_array().ok())
    {
        parse_cid_widths(doc, w, &mut widths);
    }

    FontMetrics::Composite {
        default_width,
        widths,
    }
}

/// Parse a /W array: `c [w1 w2 ...]` and `c_first c_last w` entries
fn parse_cid_widths(doc: &Document, array: &[Object], out: &mut HashMap<u32, f32>) {
    let mut i = 0;
    while i < array.len() {
        let Some(first) = number(resolve(doc, &array[i])) else {
            break;
        };
        let first = first as u32;
        match array.get(i + 1).map(|o| resolve(doc, o)) {
            Some(Object::Array(list)) => {
                for (offset, w) in list.iter().enumerate() {
                    let Some(cid) = first.checked_add(offset as u32) else {
                        break;
                    };
                    if let Some(w) = number(resolve(doc, w)) {
                        out.insert(cid, w);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (Some(last), Some(w)) = (
                    number(last),
                    array.get(i + 2).and_then(|o| number(resolve(doc, o))),
                ) else {
                    break;
                };
                for cid in first..=(last as u32).min(first.saturating_add(0xFFFF)) {
                    out.insert(cid, w);
                }
                i += 3;
            }
            None => break,
        }
    }
}

/// Follow a reference one level
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// Helper to get f32 from Object
pub(crate) fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn test_standard_helvetica_widths() {
        let metrics = FontMetrics::Standard { monospace: false };
        assert_eq!(metrics.width(b' ' as u32), 278.0);
        assert_eq!(metrics.width(b'A' as u32), 667.0);
        assert_eq!(metrics.width(b'~' as u32), 584.0);
        assert_eq!(metrics.width(0x2588), DEFAULT_WIDTH);
    }

    #[test]
    fn test_simple_widths_from_dict() {
        let doc = Document::with_version("1.7");
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "TrueType",
            "FirstChar" => 65,
            "Widths" => vec![Object::Integer(700), Object::Integer(0), Object::Integer(650)],
        };
        let metrics = FontMetrics::from_font_dict(&doc, &font);
        assert_eq!(metrics.width(65), 700.0);
        // Zero and out-of-range widths fall back
        assert_eq!(metrics.width(66), DEFAULT_WIDTH);
        assert_eq!(metrics.width(67), 650.0);
        assert_eq!(metrics.width(20), DEFAULT_WIDTH);
    }

    #[test]
    fn test_composite_w_array() {
        let mut doc = Document::with_version("1.7");
        let descendant = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "DW" => 500,
            "W" => vec![
                Object::Integer(3),
                Object::Array(vec![Object::Integer(250), Object::Integer(260)]),
                Object::Integer(10),
                Object::Integer(12),
                Object::Integer(900),
            ],
        });
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "DescendantFonts" => vec![Object::Reference(descendant)],
        };
        let metrics = FontMetrics::from_font_dict(&doc, &font);
        assert_eq!(metrics.code_len(), 2);
        assert_eq!(metrics.width(3), 250.0);
        assert_eq!(metrics.width(4), 260.0);
        assert_eq!(metrics.width(11), 900.0);
        assert_eq!(metrics.width(99), 500.0);
        assert_eq!(metrics.codes(&[0x00, 0x03, 0x00, 0x0A]), vec![3, 10]);
    }

    #[test]
    fn test_w_array_near_u32_max() {
        let doc = Document::with_version("1.7");
        let mut widths = HashMap::new();
        let array = vec![
            Object::Integer(4_294_967_295),
            Object::Array(vec![Object::Integer(300), Object::Integer(400)]),
            Object::Integer(4_294_967_295),
            Object::Integer(4_294_967_295),
            Object::Integer(700),
        ];
        parse_cid_widths(&doc, &array, &mut widths);
        assert_eq!(widths.get(&u32::MAX), Some(&700.0));
        assert_eq!(widths.len(), 1);
    }
}
