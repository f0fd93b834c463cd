//! Mask token construction

/// Replacement string for a redacted value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskToken(String);

impl MaskToken {
    /// Mask sized to the trimmed `value`, or `fallback_len` glyphs when the
    /// value is empty or whitespace-only.
    pub fn for_value(value: &str, glyph: char, fallback_len: usize) -> Self {
        let len = value.trim().chars().count();
        let len = if len == 0 { fallback_len } else { len };
        MaskToken(std::iter::repeat(glyph).take(len).collect())
    }

    /// Same token with every non-printable or non-ASCII glyph replaced by
    /// `glyph` (`#` when `glyph` is not printable ASCII itself)
    pub fn to_ascii(&self, glyph: char) -> MaskToken {
        let glyph = if glyph.is_ascii_graphic() { glyph } else { '#' };
        MaskToken(
            self.0
                .chars()
                .map(|c| if c.is_ascii_graphic() { c } else { glyph })
                .collect(),
        )
    }

    pub fn is_ascii(&self) -> bool {
        self.0.chars().all(|c| c.is_ascii_graphic())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of glyphs in the mask
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Glyph and empty-value length used when masking plain text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskPolicy {
    pub glyph: char,
    pub fallback_len: usize,
}

impl Default for MaskPolicy {
    fn default() -> Self {
        Self {
            glyph: '#',
            fallback_len: 8,
        }
    }
}

impl MaskPolicy {
    pub fn token(&self, value: &str) -> MaskToken {
        MaskToken::for_value(value, self.glyph, self.fallback_len)
    }
}

impl std::fmt::Display for MaskToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
