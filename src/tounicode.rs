//! ToUnicode CMap parsing and generation
//!
//! Parsing maps two-byte character codes of composite fonts back to Unicode.
//! Generation writes the CMap for the mask font we embed, so redacted output
//! still extracts as text.

use crate::metrics::resolve;
use lopdf::{Dictionary, Document};
use std::collections::{BTreeMap, HashMap};

/// A parsed ToUnicode CMap mapping codes to Unicode strings
#[derive(Debug, Default, Clone)]
pub struct ToUnicodeCMap {
    /// Direct character mappings (code -> Unicode string)
    pub char_map: HashMap<u16, String>,
    /// Range mappings (start_code, end_code, base_unicode)
    pub ranges: Vec<(u16, u16, u32)>,
}

/// Lexical items of a CMap body that matter for bf mappings
#[derive(Debug, PartialEq)]
enum Token {
    Hex(String),
    ArrayStart,
    ArrayEnd,
}

impl ToUnicodeCMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a ToUnicode CMap from its decompressed content
    pub fn parse(content: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(content);
        let mut cmap = ToUnicodeCMap::new();

        for section in sections(&text, "beginbfchar", "endbfchar") {
            let tokens = tokenize(section);
            for pair in tokens.chunks(2) {
                if let [Token::Hex(src), Token::Hex(dst)] = pair {
                    if let (Some(src), Some(dst)) = (parse_hex_u16(src), hex_to_unicode_string(dst))
                    {
                        cmap.char_map.insert(src, dst);
                    }
                }
            }
        }

        for section in sections(&text, "beginbfrange", "endbfrange") {
            cmap.parse_bfrange(&tokenize(section));
        }

        if cmap.char_map.is_empty() && cmap.ranges.is_empty() {
            None
        } else {
            Some(cmap)
        }
    }

    /// `<start> <end> <base>` or `<start> <end> [<dst> ...]` triplets
    fn parse_bfrange(&mut self, tokens: &[Token]) {
        let mut i = 0;
        while i + 2 < tokens.len() {
            let (Token::Hex(start), Token::Hex(end)) = (&tokens[i], &tokens[i + 1]) else {
                i += 1;
                continue;
            };
            let (Some(start), Some(end)) = (parse_hex_u16(start), parse_hex_u16(end)) else {
                i += 3;
                continue;
            };
            match &tokens[i + 2] {
                Token::Hex(base) => {
                    if let Some(base) = parse_hex_u32(base) {
                        self.ranges.push((start, end, base));
                    }
                    i += 3;
                }
                Token::ArrayStart => {
                    let mut code = start;
                    i += 3;
                    while let Some(Token::Hex(dst)) = tokens.get(i) {
                        if let Some(dst) = hex_to_unicode_string(dst) {
                            if code <= end {
                                self.char_map.insert(code, dst);
                            }
                        }
                        code = code.saturating_add(1);
                        i += 1;
                    }
                    if tokens.get(i) == Some(&Token::ArrayEnd) {
                        i += 1;
                    }
                }
                Token::ArrayEnd => i += 3,
            }
        }
    }

    /// Look up a code and return the Unicode string
    pub fn lookup(&self, code: u16) -> Option<String> {
        if let Some(s) = self.char_map.get(&code) {
            return Some(s.clone());
        }

        self.ranges
            .iter()
            .find(|&&(start, end, _)| code >= start && code <= end)
            .and_then(|&(start, _, base)| base.checked_add((code - start) as u32))
            .and_then(char::from_u32)
            .map(|c| c.to_string())
    }

    /// Decode a byte slice of two-byte codes to a Unicode string
    pub fn decode_cids(&self, bytes: &[u8]) -> String {
        bytes
            .chunks_exact(2)
            .filter_map(|chunk| {
                let code = u16::from_be_bytes([chunk[0], chunk[1]]);
                self.lookup(code)
                    .or_else(|| char::from_u32(code as u32).map(|c| c.to_string()))
            })
            .collect()
    }

    /// Load the CMap referenced by a font dictionary's /ToUnicode entry
    pub fn from_font(doc: &Document, font: &Dictionary) -> Option<Self> {
        let stream = resolve(doc, font.get(b"ToUnicode").ok()?).as_stream().ok()?;
        let content = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        Self::parse(&content)
    }
}

/// Write a ToUnicode CMap program for two-byte codes
pub fn build_cmap(mappings: &BTreeMap<u16, char>) -> Vec<u8> {
    let mut out = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );

    let entries: Vec<_> = mappings.iter().collect();
    // bfchar sections hold at most 100 entries
    for chunk in entries.chunks(100) {
        out.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (code, ch) in chunk {
            let mut units = [0u16; 2];
            let hex: String = ch
                .encode_utf16(&mut units)
                .iter()
                .map(|u| format!("{:04X}", u))
                .collect();
            out.push_str(&format!("<{:04X}> <{}>\n", code, hex));
        }
        out.push_str("endbfchar\n");
    }

    out.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    out.into_bytes()
}

/// Bodies between each `begin` and its matching `end` keyword
fn sections<'a>(text: &'a str, begin: &str, end: &str) -> Vec<&'a str> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(begin) {
        let body = &rest[start + begin.len()..];
        let Some(stop) = body.find(end) else {
            break;
        };
        found.push(&body[..stop]);
        rest = &body[stop + end.len()..];
    }
    found
}

fn tokenize(section: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = section.chars();
    while let Some(c) = chars.next() {
        match c {
            '<' => {
                let hex: String = chars.by_ref().take_while(|&c| c != '>').collect();
                tokens.push(Token::Hex(hex));
            }
            '[' => tokens.push(Token::ArrayStart),
            ']' => tokens.push(Token::ArrayEnd),
            _ => {}
        }
    }
    tokens
}

fn parse_hex_u16(hex: &str) -> Option<u16> {
    u16::from_str_radix(hex.trim(), 16).ok()
}

fn parse_hex_u32(hex: &str) -> Option<u32> {
    u32::from_str_radix(hex.trim(), 16).ok()
}

/// Convert UTF-16BE hex digits to a string (surrogate pairs included)
fn hex_to_unicode_string(hex: &str) -> Option<String> {
    let digits: Vec<char> = hex.chars().filter(|c| !c.is_whitespace()).collect();
    let units: Vec<u16> = digits
        .chunks_exact(4)
        .filter_map(|chunk| u16::from_str_radix(&chunk.iter().collect::<String>(), 16).ok())
        .collect();
    let decoded = String::from_utf16_lossy(&units);
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bfchar() {
        let cmap_content = r#"
/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
1 begincodespacerange
<0000><FFFF>
endcodespacerange
3 beginbfchar
<0003> <0020>
<0024> <0041>
<0025> <0042>
endbfchar
endcmap
"#;
        let cmap = ToUnicodeCMap::parse(cmap_content.as_bytes()).unwrap();

        assert_eq!(cmap.lookup(0x0003), Some(" ".to_string()));
        assert_eq!(cmap.lookup(0x0024), Some("A".to_string()));
        assert_eq!(cmap.lookup(0x0025), Some("B".to_string()));
    }

    #[test]
    fn test_parse_bfrange_forms() {
        let cmap_content = r#"
2 beginbfrange
<0010> <0012> <0061>
<0020> <0021> [<0058> <0059>]
endbfrange
"#;
        let cmap = ToUnicodeCMap::parse(cmap_content.as_bytes()).unwrap();
        assert_eq!(cmap.lookup(0x0011), Some("b".to_string()));
        assert_eq!(cmap.lookup(0x0021), Some("Y".to_string()));
        assert_eq!(cmap.lookup(0x0030), None);
    }

    #[test]
    fn test_bfrange_base_past_u32_is_skipped() {
        let cmap_content = b"1 beginbfrange\n<0010> <0012> <FFFFFFFF>\nendbfrange\n";
        let cmap = ToUnicodeCMap::parse(cmap_content).unwrap();
        assert_eq!(cmap.lookup(0x0010), None);
        assert_eq!(cmap.lookup(0x0012), None);
    }

    #[test]
    fn test_decode_cids() {
        let cmap_content = r#"
3 beginbfchar
<0003> <0020>
<0024> <0041>
<0025> <0042>
endbfchar
"#;
        let cmap = ToUnicodeCMap::parse(cmap_content.as_bytes()).unwrap();

        let cids = [0x00, 0x24, 0x00, 0x25, 0x00, 0x03];
        assert_eq!(cmap.decode_cids(&cids), "AB ");
    }

    #[test]
    fn test_generated_cmap_parses_back() {
        let mut mappings = BTreeMap::new();
        mappings.insert(0x0F21, '\u{2588}');
        mappings.insert(0x0006, '#');
        let program = build_cmap(&mappings);

        let cmap = ToUnicodeCMap::parse(&program).unwrap();
        assert_eq!(cmap.lookup(0x0F21), Some("\u{2588}".to_string()));
        assert_eq!(cmap.decode_cids(&[0x0F, 0x21, 0x0F, 0x21]), "\u{2588}\u{2588}");
    }

    #[test]
    fn test_empty_cmap_is_none() {
        assert!(ToUnicodeCMap::parse(b"begincmap endcmap").is_none());
    }
}
