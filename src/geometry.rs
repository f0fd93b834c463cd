//! Geometric redaction
//!
//! Finds `label:` runs on each visual row and covers the content that
//! follows them with opaque rectangles drawn into the page content. Works
//! on any text layer; no form structure is needed. The text underneath is
//! left in place.

use crate::config::RedactConfig;
use crate::extractor::{extract_page_runs, load_document, TextRun};
use crate::layout::{group_lines, TextLine};
use crate::writer::{append_page_content, save_document};
use crate::{PdfError, Redaction};
use lopdf::content::Operation;
use lopdf::{Document, Object};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

/// Area to cover on a page, in PDF units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedactionRect {
    /// Page number (1-indexed)
    pub page: u32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Cover the values of `field` in a PDF file
pub fn redact_by_geometry<P: AsRef<Path>>(
    path: P,
    field: &str,
    config: &RedactConfig,
) -> Result<Redaction, PdfError> {
    let buffer = std::fs::read(path)?;
    redact_by_geometry_mem(&buffer, field, config)
}

/// Cover the values of `field` in a PDF buffer
///
/// Without any label match the input is returned unchanged.
pub fn redact_by_geometry_mem(
    buffer: &[u8],
    field: &str,
    config: &RedactConfig,
) -> Result<Redaction, PdfError> {
    let mut doc = load_document(buffer)?;
    let rects = locate_field_rects(&doc, field, config)?;
    if rects.is_empty() {
        log::info!("no '{}' label found in the text layer", field);
        return Ok(Redaction::unchanged(buffer));
    }

    draw_rects(&mut doc, &rects, config.overlay_color)?;
    log::info!("covered {} value areas for '{}'", rects.len(), field);
    Ok(Redaction {
        bytes: save_document(&mut doc)?,
        found: true,
    })
}

/// Rectangles covering the values of `field`, in page and line order
pub fn locate_field_rects(
    doc: &Document,
    field: &str,
    config: &RedactConfig,
) -> Result<Vec<RedactionRect>, PdfError> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(Vec::new());
    }
    let label = Regex::new(&format!("(?i){}", regex::escape(field)))
        .map_err(|e| PdfError::Parse(e.to_string()))?;

    let mut rects = Vec::new();
    for runs in extract_page_runs(doc)? {
        for line in group_lines(&runs, config.row_tolerance) {
            if let Some(rect) = line_rect(&line, &label) {
                log::debug!("page {}: value area {:?}", line.page, rect);
                rects.push(pad(rect, config.overlay_padding));
            }
        }
    }
    Ok(rects)
}

/// Value area of the first label on a line
fn line_rect(line: &TextLine, label: &Regex) -> Option<RedactionRect> {
    for (i, run) in line.runs.iter().enumerate() {
        let text = run.text.trim();

        // Label run followed by separate content runs
        if text.ends_with(':') && label.is_match(text) {
            let content = &line.runs[i + 1..];
            if content.is_empty() {
                return None;
            }
            return Some(cover(run, content, None));
        }

        // "Label: value" inside one run
        if let Some((value_x, value_width)) = inline_value(run, label) {
            return Some(cover(run, &line.runs[i + 1..], Some((value_x, value_width))));
        }
    }
    None
}

/// Estimated start and width of the value part of a `label: value` run
///
/// Glyph widths inside a run are unknown, so positions are proportional to
/// character counts.
fn inline_value(run: &TextRun, label: &Regex) -> Option<(f32, f32)> {
    let text = run.text.as_str();
    let label_end = label.find(text)?.end();
    let colon = label_end + text[label_end..].find(':')?;
    // Only whitespace may separate the label from its colon
    if !text[label_end..colon].trim().is_empty() {
        return None;
    }

    let after = text.get(colon + 1..)?;
    let value = after.trim();
    if value.is_empty() {
        return None;
    }

    let total = text.chars().count().max(1) as f32;
    let lead = text[..colon + 1].chars().count()
        + (after.chars().count() - after.trim_start().chars().count());
    let value_chars = value.chars().count();

    let per_char = run.width / total;
    Some((run.x + per_char * lead as f32, per_char * value_chars as f32))
}

fn cover(label: &TextRun, content: &[TextRun], inline: Option<(f32, f32)>) -> RedactionRect {
    let (x, inline_width) = match (inline, content.first()) {
        (Some((x, w)), _) => (x, w),
        (None, Some(first)) => (first.x, 0.0),
        (None, None) => (label.x + label.width, 0.0),
    };

    let widths: f32 = inline_width + content.iter().map(|r| r.width).sum::<f32>();
    // Gaps between runs are covered too
    let span = content
        .iter()
        .map(|r| r.x + r.width)
        .fold(x + inline_width, f32::max)
        - x;
    let height = content
        .iter()
        .map(|r| r.height)
        .fold(label.height, f32::max);

    RedactionRect {
        page: label.page,
        x,
        y: label.y,
        width: widths.max(span),
        height,
    }
}

fn pad(rect: RedactionRect, padding: f32) -> RedactionRect {
    RedactionRect {
        x: rect.x - padding,
        y: rect.y - padding,
        width: rect.width + 2.0 * padding,
        height: rect.height + 2.0 * padding,
        ..rect
    }
}

/// Paint filled rectangles onto their pages
pub(crate) fn draw_rects(
    doc: &mut Document,
    rects: &[RedactionRect],
    color: (f32, f32, f32),
) -> Result<(), PdfError> {
    let pages = doc.get_pages();
    let mut by_page: BTreeMap<u32, Vec<&RedactionRect>> = BTreeMap::new();
    for rect in rects {
        by_page.entry(rect.page).or_default().push(rect);
    }

    for (page, page_rects) in by_page {
        let Some(&page_id) = pages.get(&page) else {
            log::warn!("page {} not found; skipping {} rects", page, page_rects.len());
            continue;
        };
        let mut operations = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "rg",
                vec![
                    Object::Real(color.0),
                    Object::Real(color.1),
                    Object::Real(color.2),
                ],
            ),
        ];
        for rect in page_rects {
            operations.push(Operation::new(
                "re",
                vec![
                    Object::Real(rect.x),
                    Object::Real(rect.y),
                    Object::Real(rect.width),
                    Object::Real(rect.height),
                ],
            ));
            operations.push(Operation::new("f", vec![]));
        }
        operations.push(Operation::new("Q", vec![]));
        append_page_content(doc, page_id, operations)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, x: f32, y: f32, width: f32, height: f32) -> TextRun {
        TextRun {
            text: text.to_string(),
            x,
            y,
            width,
            height,
            font: "F1".to_string(),
            font_size: height,
            page: 1,
        }
    }

    fn label(field: &str) -> Regex {
        Regex::new(&format!("(?i){}", regex::escape(field))).unwrap()
    }

    fn line(runs: Vec<TextRun>) -> TextLine {
        TextLine {
            y: runs[0].y,
            page: 1,
            runs,
        }
    }

    #[test]
    fn test_label_then_content_run() {
        let l = line(vec![
            run("Languages:", 50.0, 700.0, 60.0, 12.0),
            run("English, French", 115.0, 700.0, 90.0, 12.0),
        ]);
        let rect = line_rect(&l, &label("languages")).unwrap();
        assert_eq!(
            rect,
            RedactionRect {
                page: 1,
                x: 115.0,
                y: 700.0,
                width: 90.0,
                height: 12.0,
            }
        );
    }

    #[test]
    fn test_several_content_runs() {
        let l = line(vec![
            run("Country:", 50.0, 700.0, 40.0, 10.0),
            run("Viet", 100.0, 700.0, 20.0, 14.0),
            run("Nam", 125.0, 700.5, 20.0, 10.0),
        ]);
        let rect = line_rect(&l, &label("country")).unwrap();
        assert_eq!(rect.x, 100.0);
        // Span from 100 to 145 beats the 40 of summed widths
        assert_eq!(rect.width, 45.0);
        assert_eq!(rect.height, 14.0);
    }

    #[test]
    fn test_label_without_content() {
        let l = line(vec![run("Country:", 50.0, 700.0, 40.0, 10.0)]);
        assert!(line_rect(&l, &label("country")).is_none());
    }

    #[test]
    fn test_label_needs_colon() {
        let l = line(vec![
            run("Country", 50.0, 700.0, 40.0, 10.0),
            run("Vietnam", 100.0, 700.0, 40.0, 10.0),
        ]);
        assert!(line_rect(&l, &label("country")).is_none());
    }

    #[test]
    fn test_inline_label_and_value() {
        // 10 chars: "Country: " is 9, "X" is the value
        let l = line(vec![run("Country: X", 0.0, 500.0, 100.0, 10.0)]);
        let rect = line_rect(&l, &label("country")).unwrap();
        assert!((rect.x - 90.0).abs() < 0.001);
        assert!((rect.width - 10.0).abs() < 0.001);
    }

    #[test]
    fn test_inline_label_after_case_folding_width_change() {
        // 'ẞ' is three bytes and lowercases to the two-byte 'ß'
        let l = line(vec![run("ẞẞ Name: Bob", 0.0, 500.0, 120.0, 10.0)]);
        let rect = line_rect(&l, &label("name")).unwrap();
        // 12 chars: "ẞẞ Name: " is 9, "Bob" is 3
        assert!((rect.x - 90.0).abs() < 0.001);
        assert!((rect.width - 30.0).abs() < 0.001);
    }

    #[test]
    fn test_padding() {
        let rect = RedactionRect {
            page: 2,
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 5.0,
        };
        let padded = pad(rect, 1.5);
        assert_eq!(padded.x, 8.5);
        assert_eq!(padded.height, 8.0);
        assert_eq!(padded.page, 2);
    }
}
