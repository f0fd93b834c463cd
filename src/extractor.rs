//! Positioned glyph runs from PDF content streams using lopdf
//!
//! Walks each page's content (and the Form XObjects it paints) tracking the
//! graphics and text state, and emits one [`TextRun`] per show operator with
//! its baseline position, advance width and rendered height.

use crate::layout;
use crate::metrics::{number, resolve, FontMetrics};
use crate::tounicode::ToUnicodeCMap;
use crate::PdfError;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::rc::Rc;

/// Form XObjects nested deeper than this are not entered
const MAX_FORM_DEPTH: usize = 8;

/// TJ adjustments wider than this (thousandths of an em) read as a space
const TJ_SPACE_THRESHOLD: f32 = 200.0;

const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// A run of text with position information
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    /// The decoded text
    pub text: String,
    /// X position of the run start on the page
    pub x: f32,
    /// Baseline Y position (PDF coordinates, origin at bottom-left)
    pub y: f32,
    /// Advance width of the whole run
    pub width: f32,
    /// Rendered font size
    pub height: f32,
    /// Font resource name
    pub font: String,
    /// Font size before matrix scaling
    pub font_size: f32,
    /// Page number (1-indexed)
    pub page: u32,
}

/// Load a document, refusing encrypted files
pub fn load_document(buffer: &[u8]) -> Result<Document, PdfError> {
    let doc = Document::load_mem(buffer)?;
    ensure_unencrypted(&doc)?;
    Ok(doc)
}

fn ensure_unencrypted(doc: &Document) -> Result<(), PdfError> {
    if doc.is_encrypted() {
        return Err(PdfError::Encrypted);
    }
    Ok(())
}

/// Extract reconstructed plain text from a PDF file
pub fn extract_text<P: AsRef<Path>>(path: P) -> Result<String, PdfError> {
    let buffer = std::fs::read(path)?;
    extract_text_mem(&buffer)
}

/// Extract reconstructed plain text from a PDF memory buffer
///
/// Pages are separated by a blank line.
pub fn extract_text_mem(buffer: &[u8]) -> Result<String, PdfError> {
    let doc = load_document(buffer)?;
    let pages = extract_page_runs(&doc)?;
    Ok(layout::reconstruct_pages(&pages))
}

/// Extract runs with position information from a PDF file
pub fn extract_text_with_positions<P: AsRef<Path>>(path: P) -> Result<Vec<TextRun>, PdfError> {
    let buffer = std::fs::read(path)?;
    extract_text_with_positions_mem(&buffer)
}

/// Extract runs with positions from a memory buffer
pub fn extract_text_with_positions_mem(buffer: &[u8]) -> Result<Vec<TextRun>, PdfError> {
    let doc = load_document(buffer)?;
    Ok(extract_page_runs(&doc)?.into_iter().flatten().collect())
}

/// Runs of every page, in page order (empty pages included)
pub fn extract_page_runs(doc: &Document) -> Result<Vec<Vec<TextRun>>, PdfError> {
    let pages = doc.get_pages();
    let mut all_pages = Vec::with_capacity(pages.len());

    for (&page_num, &page_id) in pages.iter() {
        all_pages.push(extract_page_text_runs(doc, page_id, page_num));
    }

    Ok(all_pages)
}

/// Resources of a page, following /Parent inheritance
pub(crate) fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    // Bounded walk up the page tree
    for _ in 0..32 {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve(doc, resources).as_dict().ok();
        }
        let parent = node.get(b"Parent").and_then(|p| p.as_reference()).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// Extract runs from a single page
fn extract_page_text_runs(doc: &Document, page_id: ObjectId, page_num: u32) -> Vec<TextRun> {
    let content_data = match doc.get_page_content(page_id) {
        Ok(data) => data,
        Err(e) => {
            log::warn!("page {}: cannot read content stream: {}", page_num, e);
            return Vec::new();
        }
    };
    let content = match Content::decode(&content_data) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("page {}: cannot decode content stream: {}", page_num, e);
            return Vec::new();
        }
    };

    let resources = page_resources(doc, page_id);
    let scope = Scope {
        fonts: doc.get_page_fonts(page_id).unwrap_or_default(),
        xobjects: resources.and_then(|r| sub_dict(doc, r, b"XObject")),
        font_cache: HashMap::new(),
    };

    let mut walker = PageWalker {
        doc,
        page: page_num,
        runs: Vec::new(),
    };
    walker.walk(&content, scope, IDENTITY, 0);

    log::debug!("page {}: {} runs", page_num, walker.runs.len());
    walker.runs
}

/// Font resolved for the current text state
struct FontInfo<'a> {
    name: String,
    dict: Option<&'a Dictionary>,
    metrics: FontMetrics,
    cmap: Option<ToUnicodeCMap>,
}

/// Resource scope of a content stream (page or Form XObject)
struct Scope<'a> {
    fonts: BTreeMap<Vec<u8>, &'a Dictionary>,
    xobjects: Option<&'a Dictionary>,
    font_cache: HashMap<Vec<u8>, Rc<FontInfo<'a>>>,
}

impl<'a> Scope<'a> {
    fn font(&mut self, doc: &'a Document, name: &[u8]) -> Rc<FontInfo<'a>> {
        if let Some(info) = self.font_cache.get(name) {
            return Rc::clone(info);
        }
        let dict = self.fonts.get(name).copied();
        let info = Rc::new(FontInfo {
            name: String::from_utf8_lossy(name).to_string(),
            dict,
            metrics: dict
                .map(|d| FontMetrics::from_font_dict(doc, d))
                .unwrap_or_default(),
            cmap: dict.and_then(|d| ToUnicodeCMap::from_font(doc, d)),
        });
        self.font_cache.insert(name.to_vec(), Rc::clone(&info));
        info
    }
}

/// Text state parameters (saved and restored with q/Q)
#[derive(Clone)]
struct TextState<'a> {
    font: Option<Rc<FontInfo<'a>>>,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
}

impl Default for TextState<'_> {
    fn default() -> Self {
        Self {
            font: None,
            font_size: 12.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
        }
    }
}

impl TextState<'_> {
    /// Distance T* and ' move down when no leading was set
    fn line_advance(&self) -> f32 {
        if self.leading != 0.0 {
            self.leading
        } else {
            self.font_size * 1.2
        }
    }
}

struct PageWalker<'a> {
    doc: &'a Document,
    page: u32,
    runs: Vec<TextRun>,
}

impl<'a> PageWalker<'a> {
    fn walk(&mut self, content: &Content, mut scope: Scope<'a>, base_ctm: [f32; 6], depth: usize) {
        let mut ctm = base_ctm;
        let mut state = TextState::default();
        let mut stack: Vec<([f32; 6], TextState<'a>)> = Vec::new();

        let mut text_matrix = IDENTITY;
        let mut line_matrix = IDENTITY;
        let mut in_text_block = false;

        for op in &content.operations {
            let operands = &op.operands;
            match op.operator.as_str() {
                "q" => stack.push((ctm, state.clone())),
                "Q" => {
                    if let Some((saved_ctm, saved_state)) = stack.pop() {
                        ctm = saved_ctm;
                        state = saved_state;
                    }
                }
                "cm" => {
                    if let Some(m) = matrix_operands(operands) {
                        ctm = multiply_matrices(&m, &ctm);
                    }
                }
                "BT" => {
                    in_text_block = true;
                    text_matrix = IDENTITY;
                    line_matrix = IDENTITY;
                }
                "ET" => in_text_block = false,
                "Tf" => {
                    if operands.len() >= 2 {
                        if let Ok(name) = operands[0].as_name() {
                            state.font = Some(scope.font(self.doc, name));
                        }
                        if let Some(size) = number(&operands[1]) {
                            state.font_size = size;
                        }
                    }
                }
                "Tc" => set_number(operands, &mut state.char_spacing),
                "Tw" => set_number(operands, &mut state.word_spacing),
                "TL" => set_number(operands, &mut state.leading),
                "Tz" => {
                    if let Some(scale) = operands.first().and_then(number) {
                        state.horizontal_scale = scale / 100.0;
                    }
                }
                "Td" | "TD" => {
                    if operands.len() >= 2 {
                        let tx = number(&operands[0]).unwrap_or(0.0);
                        let ty = number(&operands[1]).unwrap_or(0.0);
                        if op.operator == "TD" {
                            state.leading = -ty;
                        }
                        line_matrix = multiply_matrices(&[1.0, 0.0, 0.0, 1.0, tx, ty], &line_matrix);
                        text_matrix = line_matrix;
                    }
                }
                "Tm" => {
                    if let Some(m) = matrix_operands(operands) {
                        text_matrix = m;
                        line_matrix = m;
                    }
                }
                "T*" => {
                    line_matrix = next_line(&line_matrix, state.line_advance());
                    text_matrix = line_matrix;
                }
                "Tj" => {
                    if in_text_block && !operands.is_empty() {
                        self.show(&operands[..1], &state, &mut text_matrix, &ctm);
                    }
                }
                "TJ" => {
                    if in_text_block {
                        if let Some(Ok(array)) = operands.first().map(|o| o.as_array()) {
                            self.show(array, &state, &mut text_matrix, &ctm);
                        }
                    }
                }
                "'" => {
                    line_matrix = next_line(&line_matrix, state.line_advance());
                    text_matrix = line_matrix;
                    if in_text_block && !operands.is_empty() {
                        self.show(&operands[..1], &state, &mut text_matrix, &ctm);
                    }
                }
                "\"" => {
                    if operands.len() >= 3 {
                        set_number(&operands[0..1], &mut state.word_spacing);
                        set_number(&operands[1..2], &mut state.char_spacing);
                        line_matrix = next_line(&line_matrix, state.line_advance());
                        text_matrix = line_matrix;
                        if in_text_block {
                            self.show(&operands[2..3], &state, &mut text_matrix, &ctm);
                        }
                    }
                }
                "Do" => {
                    if let Some(Ok(name)) = operands.first().map(|o| o.as_name()) {
                        self.paint_form(&scope, name, &ctm, depth);
                    }
                }
                _ => {}
            }
        }
    }

    /// Walk a Form XObject painted with Do
    fn paint_form(&mut self, scope: &Scope<'a>, name: &[u8], ctm: &[f32; 6], depth: usize) {
        if depth >= MAX_FORM_DEPTH {
            return;
        }
        let Some(stream) = scope
            .xobjects
            .and_then(|x| x.get(name).ok())
            .map(|o| resolve(self.doc, o))
            .and_then(|o| o.as_stream().ok())
        else {
            return;
        };
        let is_form = stream
            .dict
            .get(b"Subtype")
            .and_then(|s| s.as_name())
            .map(|s| s == b"Form")
            .unwrap_or(false);
        if !is_form {
            return;
        }

        let data = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        let Ok(content) = Content::decode(&data) else {
            log::debug!("page {}: skipping undecodable form XObject", self.page);
            return;
        };

        let form_matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|m| m.as_array().ok())
            .and_then(|m| matrix_operands(m))
            .unwrap_or(IDENTITY);

        let resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .map(|r| resolve(self.doc, r))
            .and_then(|r| r.as_dict().ok());
        let form_scope = match resources {
            Some(resources) => Scope {
                fonts: font_map(self.doc, resources),
                xobjects: sub_dict(self.doc, resources, b"XObject"),
                font_cache: HashMap::new(),
            },
            None => Scope {
                fonts: scope.fonts.clone(),
                xobjects: scope.xobjects,
                font_cache: HashMap::new(),
            },
        };

        self.walk(
            &content,
            form_scope,
            multiply_matrices(&form_matrix, ctm),
            depth + 1,
        );
    }

    /// Emit one run for a show operator and advance the text matrix
    fn show(
        &mut self,
        parts: &[Object],
        state: &TextState<'a>,
        text_matrix: &mut [f32; 6],
        ctm: &[f32; 6],
    ) {
        let default_metrics = FontMetrics::default();
        let metrics = state
            .font
            .as_ref()
            .map(|f| &f.metrics)
            .unwrap_or(&default_metrics);
        let size = state.font_size;
        let scale = state.horizontal_scale;

        let mut text = String::new();
        let mut advance = 0.0f32;

        for part in parts {
            match part {
                Object::String(bytes, _) => {
                    text.push_str(&self.decode(bytes, state.font.as_deref()));
                    for code in metrics.codes(bytes) {
                        let mut w = metrics.width(code) / 1000.0 * size + state.char_spacing;
                        if code == 32 && metrics.code_len() == 1 {
                            w += state.word_spacing;
                        }
                        advance += w * scale;
                    }
                }
                other => {
                    if let Some(adjust) = number(other) {
                        advance -= adjust / 1000.0 * size * scale;
                        if -adjust > TJ_SPACE_THRESHOLD && !text.is_empty() && !text.ends_with(' ')
                        {
                            text.push(' ');
                        }
                    }
                }
            }
        }

        let combined = multiply_matrices(text_matrix, ctm);
        if !text.trim().is_empty() {
            self.runs.push(TextRun {
                text,
                x: combined[4],
                y: combined[5],
                width: advance * combined[0].hypot(combined[1]),
                height: size * combined[2].hypot(combined[3]),
                font: state
                    .font
                    .as_ref()
                    .map(|f| f.name.clone())
                    .unwrap_or_default(),
                font_size: size,
                page: self.page,
            });
        }

        *text_matrix = multiply_matrices(&[1.0, 0.0, 0.0, 1.0, advance, 0.0], text_matrix);
    }

    /// Decode a string operand, handling encoding
    fn decode(&self, bytes: &[u8], font: Option<&FontInfo<'a>>) -> String {
        if let Some(font) = font {
            if let (Some(cmap), 2) = (&font.cmap, font.metrics.code_len()) {
                return cmap.decode_cids(bytes);
            }
            if let Some(dict) = font.dict {
                if let Ok(encoding) = dict.get_font_encoding(self.doc) {
                    if let Ok(text) = Document::decode_text(&encoding, bytes) {
                        return text;
                    }
                }
            }
        }

        // Fallback: try UTF-16BE then Latin-1
        if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
            let utf16: Vec<u16> = bytes[2..]
                .chunks_exact(2)
                .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                .collect();
            return String::from_utf16_lossy(&utf16);
        }

        bytes.iter().map(|&b| b as char).collect()
    }
}

/// Font dictionaries of a resource dictionary keyed by resource name
fn font_map<'a>(doc: &'a Document, resources: &'a Dictionary) -> BTreeMap<Vec<u8>, &'a Dictionary> {
    sub_dict(doc, resources, b"Font")
        .map(|fonts| {
            fonts
                .iter()
                .filter_map(|(name, font)| {
                    resolve(doc, font)
                        .as_dict()
                        .ok()
                        .map(|dict| (name.clone(), dict))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn sub_dict<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    dict.get(key)
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
}

fn set_number(operands: &[Object], target: &mut f32) {
    if let Some(value) = operands.first().and_then(number) {
        *target = value;
    }
}

fn matrix_operands(operands: &[Object]) -> Option<[f32; 6]> {
    if operands.len() < 6 {
        return None;
    }
    let mut m = IDENTITY;
    for (slot, operand) in m.iter_mut().zip(operands) {
        *slot = number(operand)?;
    }
    Some(m)
}

fn next_line(line_matrix: &[f32; 6], leading: f32) -> [f32; 6] {
    multiply_matrices(&[1.0, 0.0, 0.0, 1.0, 0.0, -leading], line_matrix)
}

/// Multiply two 2D transformation matrices
/// Matrix format: [a, b, c, d, e, f] representing:
/// | a  b  0 |
/// | c  d  0 |
/// | e  f  1 |
pub(crate) fn multiply_matrices(m1: &[f32; 6], m2: &[f32; 6]) -> [f32; 6] {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;
    use lopdf::{dictionary, Stream};

    /// One-page document whose content is `ops`, with Helvetica as /F1
    fn doc_with_content(ops: Vec<Operation>) -> Document {
        let mut doc = Document::with_version("1.7");
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let content = Content { operations: ops };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    fn text(s: &str) -> Object {
        Object::string_literal(s)
    }

    #[test]
    fn test_encrypt_entry_is_refused() {
        let mut doc = doc_with_content(vec![]);
        assert!(ensure_unencrypted(&doc).is_ok());

        let encrypt_id = doc.add_object(dictionary! {
            "Filter" => "Standard",
            "V" => 1,
            "R" => 2,
        });
        doc.trailer.set("Encrypt", encrypt_id);
        assert!(matches!(ensure_unencrypted(&doc), Err(PdfError::Encrypted)));
    }

    #[test]
    fn test_positions_and_widths() {
        let doc = doc_with_content(vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("Td", vec![100.into(), 700.into()]),
            Operation::new("Tj", vec![text("AB")]),
            Operation::new("Tj", vec![text("C")]),
            Operation::new("ET", vec![]),
        ]);
        let pages = extract_page_runs(&doc).unwrap();
        assert_eq!(pages.len(), 1);
        let runs = &pages[0];
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].text, "AB");
        assert_eq!(runs[0].x, 100.0);
        assert_eq!(runs[0].y, 700.0);
        // A = 667, B = 667 at 10pt
        assert!((runs[0].width - 13.34).abs() < 0.01);
        assert_eq!(runs[0].height, 10.0);
        // Second Tj starts where the first one ended
        assert!((runs[1].x - 113.34).abs() < 0.01);
    }

    #[test]
    fn test_ctm_and_text_matrix() {
        let doc = doc_with_content(vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![2.into(), 0.into(), 0.into(), 2.into(), 10.into(), 20.into()],
            ),
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new(
                "Tm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), 50.into(), 100.into()],
            ),
            Operation::new("Tj", vec![text("Scaled")]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ]);
        let runs = extract_page_runs(&doc).unwrap().remove(0);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].x, 110.0);
        assert_eq!(runs[0].y, 220.0);
        assert_eq!(runs[0].height, 24.0);
    }

    #[test]
    fn test_tj_kerning_inserts_space() {
        let doc = doc_with_content(vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    text("Hello"),
                    Object::Integer(-500),
                    text("World"),
                    Object::Integer(-20),
                    text("!"),
                ])],
            ),
            Operation::new("ET", vec![]),
        ]);
        let runs = extract_page_runs(&doc).unwrap().remove(0);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].text, "Hello World!");
    }

    #[test]
    fn test_next_line_operators() {
        let doc = doc_with_content(vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("TL", vec![14.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![text("First")]),
            Operation::new("T*", vec![]),
            Operation::new("Tj", vec![text("Second")]),
            Operation::new("'", vec![text("Third")]),
            Operation::new("ET", vec![]),
        ]);
        let runs = extract_page_runs(&doc).unwrap().remove(0);
        let ys: Vec<f32> = runs.iter().map(|r| r.y).collect();
        assert_eq!(ys, vec![700.0, 686.0, 672.0]);
        assert!(runs.iter().all(|r| r.x == 72.0));
    }

    #[test]
    fn test_whitespace_runs_are_dropped() {
        let doc = doc_with_content(vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("Tj", vec![text("   ")]),
            Operation::new("ET", vec![]),
        ]);
        assert!(extract_page_runs(&doc).unwrap()[0].is_empty());
    }

    #[test]
    fn test_text_outside_bt_is_ignored() {
        let doc = doc_with_content(vec![Operation::new("Tj", vec![text("stray")])]);
        assert!(extract_page_runs(&doc).unwrap()[0].is_empty());
    }

    #[test]
    fn test_multiply_identity() {
        let m = [2.0, 0.0, 0.0, 3.0, 5.0, 7.0];
        assert_eq!(multiply_matrices(&m, &IDENTITY), m);
        assert_eq!(multiply_matrices(&IDENTITY, &m), m);
    }
}
