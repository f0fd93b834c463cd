//! Field-value masking over reconstructed plain text
//!
//! A single pass over the text, line by line. Every whole-word occurrence of
//! the field name is classified by what follows it (a separator, a quoted
//! JSON key, a bare value, or nothing) and the value span it introduces is
//! claimed once. Claimed spans never overlap, so nothing is masked twice.

use crate::mask::MaskPolicy;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

/// List markers that may precede a value line
const BULLETS: &[char] = &['•', '◦', '▪', '‣', '-', '*', '–'];

/// A capitalised word followed by a colon opens a new section
static SECTION_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[A-Z][a-z]+\s*:").unwrap());

/// Mask the values of `field` with `#`, 8 glyphs for empty values
pub fn redact_field(text: &str, field: &str) -> String {
    redact_field_with(text, field, &MaskPolicy::default())
}

/// Mask the values of `field` using an explicit policy
///
/// Returns the text unchanged when the field never appears as a label.
pub fn redact_field_with(text: &str, field: &str, policy: &MaskPolicy) -> String {
    let spans = locate_field_values(text, field);
    if spans.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for span in spans {
        out.push_str(&text[last..span.start]);
        out.push_str(policy.token(&text[span.clone()]).as_str());
        last = span.end;
    }
    out.push_str(&text[last..]);

    log::debug!("masked values of '{}' in {} bytes of text", field, text.len());
    out
}

/// Byte ranges of the values labelled by `field`, in text order
///
/// Ranges cover the trimmed value. An empty quoted value yields an empty
/// range between its quotes.
pub fn locate_field_values(text: &str, field: &str) -> Vec<Range<usize>> {
    let field = field.trim();
    if text.is_empty() || field.is_empty() {
        return Vec::new();
    }
    let Ok(name) = Regex::new(&format!("(?i){}", regex::escape(field))) else {
        return Vec::new();
    };

    let lines = split_lines(text);
    let mut spans = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];
        let scan = scan_line(&name, line.content);
        spans.extend(scan.values.into_iter().map(|r| shift(r, line.start)));

        if scan.opens_block {
            let (block, next) = block_values(&lines, i + 1);
            spans.extend(block);
            i = next.max(i + 1);
        } else {
            i += 1;
        }
    }

    spans
}

struct Line<'a> {
    /// Byte offset of the line in the full text
    start: usize,
    /// Line without its terminator (`\n` or `\r\n`)
    content: &'a str,
}

/// What the label occurrences on one line introduce
struct LineScan {
    values: Vec<Range<usize>>,
    opens_block: bool,
}

fn split_lines(text: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for piece in text.split_inclusive('\n') {
        let content = piece.strip_suffix('\n').unwrap_or(piece);
        let content = content.strip_suffix('\r').unwrap_or(content);
        lines.push(Line { start, content });
        start += piece.len();
    }
    lines
}

fn scan_line(name: &Regex, line: &str) -> LineScan {
    let mut values = Vec::new();
    let mut pos = 0;

    while let Some(m) = name.find_at(line, pos) {
        pos = m.end();
        if !is_word_boundary(line, m.start(), m.end()) {
            continue;
        }
        let before = &line[..m.start()];
        let after = &line[m.end()..];

        // "field": value
        if before.ends_with('"') && after.starts_with('"') {
            if let Some(value) = quoted_key_value(line, m.end() + 1) {
                pos = pos.max(value.end);
                values.push(value);
            }
            continue;
        }

        let rest = after.trim_start();
        let rest_start = m.end() + (after.len() - rest.len());

        // field: value / field = value
        if let Some(sep) = rest.chars().next().filter(|c| *c == ':' || *c == '=') {
            return match trimmed(line, rest_start + sep.len_utf8(), line.len()) {
                Some(value) => {
                    values.push(value);
                    LineScan {
                        values,
                        opens_block: false,
                    }
                }
                None => LineScan {
                    values,
                    opens_block: sep == ':',
                },
            };
        }

        if !is_line_lead(before) {
            continue;
        }

        // Heading alone on its line
        if rest.is_empty() {
            return LineScan {
                values,
                opens_block: true,
            };
        }

        // field value
        if after.starts_with(char::is_whitespace) {
            values.extend(trimmed(line, m.end(), line.len()));
            return LineScan {
                values,
                opens_block: false,
            };
        }
    }

    LineScan {
        values,
        opens_block: false,
    }
}

/// Value after a quoted key; `after_key` is just past the key's closing quote
fn quoted_key_value(line: &str, after_key: usize) -> Option<Range<usize>> {
    let rest = &line[after_key..];
    let colon = rest.find(|c: char| !c.is_whitespace())?;
    if !rest[colon..].starts_with(':') {
        return None;
    }
    let value_rest = &rest[colon + 1..];
    let value_start = after_key + colon + 1 + (value_rest.len() - value_rest.trim_start().len());
    let value = &line[value_start..];

    if let Some(inner) = value.strip_prefix('"') {
        let inner_start = value_start + 1;
        let inner_end = closing_quote(inner)
            .map(|i| inner_start + i)
            .unwrap_or(line.len());
        return Some(trimmed(line, inner_start, inner_end).unwrap_or(inner_start..inner_end));
    }

    if value.starts_with(['{', '[']) {
        return None;
    }

    // Bare scalar: number, boolean, null
    let end = value
        .find([',', '}', ']'])
        .map(|i| value_start + i)
        .unwrap_or(line.len());
    trimmed(line, value_start, end)
}

/// Index of the first unescaped `"`
fn closing_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}

/// Value lines following a heading, up to a blank line or the next section
fn block_values(lines: &[Line<'_>], from: usize) -> (Vec<Range<usize>>, usize) {
    let mut spans = Vec::new();
    let mut i = from;

    while i < lines.len() {
        let content = lines[i].content;
        if content.trim().is_empty() {
            break;
        }
        if bullet_end(content).is_none() && SECTION_LABEL.is_match(content) {
            break;
        }
        let value_start = bullet_end(content).unwrap_or(0);
        if let Some(value) = trimmed(content, value_start, content.len()) {
            spans.push(shift(value, lines[i].start));
        }
        i += 1;
    }

    (spans, i)
}

/// Offset just past a leading list marker, if the line has one
fn bullet_end(line: &str) -> Option<usize> {
    let indent = line.len() - line.trim_start().len();
    let marker = line[indent..].chars().next()?;
    if !BULLETS.contains(&marker) {
        return None;
    }
    let end = indent + marker.len_utf8();
    // Hyphen-like markers need a following space ("-5" is a value)
    let typographic = matches!(marker, '•' | '◦' | '▪' | '‣');
    if typographic || line[end..].starts_with(char::is_whitespace) {
        Some(end)
    } else {
        None
    }
}

/// Only indentation or a list marker precedes the label
fn is_line_lead(before: &str) -> bool {
    let lead = before.trim();
    lead.is_empty() || (lead.chars().count() == 1 && lead.starts_with(BULLETS))
}

fn is_word_boundary(line: &str, start: usize, end: usize) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let before_ok = line[..start].chars().next_back().map_or(true, |c| !is_word(c));
    let after_ok = line[end..].chars().next().map_or(true, |c| !is_word(c));
    before_ok && after_ok
}

/// `start..end` with surrounding whitespace removed, None when blank
fn trimmed(line: &str, start: usize, end: usize) -> Option<Range<usize>> {
    let slice = &line[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let body = slice.trim();
    if body.is_empty() {
        None
    } else {
        Some(start + lead..start + lead + body.len())
    }
}

fn shift(range: Range<usize>, by: usize) -> Range<usize> {
    range.start + by..range.end + by
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colon_value() {
        assert_eq!(
            redact_field("Country: Vietnam\nAge: 30", "country"),
            "Country: #######\nAge: 30"
        );
    }

    #[test]
    fn test_json_string_value() {
        assert_eq!(
            redact_field("\"country\": \"US\"", "country"),
            "\"country\": \"##\""
        );
    }

    #[test]
    fn test_word_boundary() {
        let text = "Languages: English";
        assert_eq!(redact_field(text, "guage"), text);
        assert_eq!(
            redact_field("Name: Bob\nLanguages: English\nHobbies: chess", "Languages"),
            "Name: Bob\nLanguages: #######\nHobbies: chess"
        );
    }

    #[test]
    fn test_equals_value() {
        assert_eq!(redact_field("country = France", "country"), "country = ######");
    }

    #[test]
    fn test_bare_value() {
        assert_eq!(redact_field("Country Vietnam", "country"), "Country #######");
    }

    #[test]
    fn test_mid_sentence_mention_is_not_a_label() {
        let text = "Programming languages are fun";
        assert_eq!(redact_field(text, "languages"), text);
    }

    #[test]
    fn test_whitespace_around_value_kept() {
        assert_eq!(
            redact_field("Country:   Vietnam  ", "country"),
            "Country:   #######  "
        );
    }

    #[test]
    fn test_block_after_heading() {
        let text = "Languages:\nEnglish\nFrench\n\nSkills: Rust";
        assert_eq!(
            redact_field(text, "languages"),
            "Languages:\n#######\n######\n\nSkills: Rust"
        );
    }

    #[test]
    fn test_block_stops_at_next_label() {
        let text = "Country:\n  Viet Nam\nPhone: 123";
        assert_eq!(
            redact_field(text, "country"),
            "Country:\n  ########\nPhone: 123"
        );
    }

    #[test]
    fn test_empty_label_before_next_label() {
        let text = "Country:\nPhone: 555-0100\nAge: 30";
        assert_eq!(redact_field(text, "country"), text);
        assert!(locate_field_values("Country:\nPhone: 555-0100", "country").is_empty());
    }

    #[test]
    fn test_bullet_list() {
        let text = "Languages\n- English\n• French\nPhone: 123";
        assert_eq!(
            redact_field(text, "languages"),
            "Languages\n- #######\n• ######\nPhone: 123"
        );
    }

    #[test]
    fn test_crlf_line_endings() {
        assert_eq!(
            redact_field("Country: Vietnam\r\nAge: 30", "country"),
            "Country: #######\r\nAge: 30"
        );
    }

    #[test]
    fn test_json_variants() {
        assert_eq!(
            redact_field(r#"{"country": "US", "city": "Hanoi"}"#, "country"),
            r###"{"country": "##", "city": "Hanoi"}"###
        );
        assert_eq!(redact_field(r#""id": 12345,"#, "id"), r#""id": #####,"#);
        assert_eq!(
            redact_field("\"country\": \"\"", "country"),
            "\"country\": \"########\""
        );
    }

    #[test]
    fn test_field_name_is_literal() {
        let text = "email: a@b.c";
        assert_eq!(redact_field(text, "e.mail"), text);
        assert_eq!(redact_field("C++: expert", "c++"), "C++: ######");
    }

    #[test]
    fn test_no_match_and_empty_inputs() {
        let text = "Name: Bob\nAge: 30";
        assert_eq!(redact_field(text, "country"), text);
        assert_eq!(redact_field(text, ""), text);
        assert_eq!(redact_field("", "country"), "");
    }

    #[test]
    fn test_second_pass_is_stable() {
        let text = "Country: Vietnam\n\"country\": \"US\"\nLanguages:\n- English";
        let once = redact_field(text, "country");
        assert_eq!(redact_field(&once, "country"), once);
    }

    #[test]
    fn test_locate_spans() {
        let text = "Name: Bob\nCountry: Vietnam";
        let spans = locate_field_values(text, "country");
        assert_eq!(spans, vec![19..26]);
        assert_eq!(&text[spans[0].clone()], "Vietnam");
    }

    #[test]
    fn test_custom_policy() {
        let policy = MaskPolicy {
            glyph: '\u{2588}',
            fallback_len: 6,
        };
        assert_eq!(
            redact_field_with("Country: Vietnam", "country", &policy),
            "Country: \u{2588}\u{2588}\u{2588}\u{2588}\u{2588}\u{2588}\u{2588}"
        );
    }
}
