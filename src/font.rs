//! Bitmap glyph store.
//!
//! Glyphs are fixed-size 6×12 monochrome bitmaps in a plain text format:
//! a `u+XXXX:` label line followed by twelve indented rows of six cells,
//! `.` for background and `@` for foreground. The bundled font is embedded
//! in the binary; `--font` (or the config file) may point at a replacement
//! in the same format.
//!
//! Characters without a glyph are drawn as nothing. The space glyph is
//! synthesized as all-background when the font file does not provide one.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::FbtermError;

pub const FONT_WIDTH: usize = 6;
pub const FONT_HEIGHT: usize = 12;

static BUNDLED_FONT: &str = include_str!("../assets/font6x12.txt");

/// One monochrome bitmap: `FONT_HEIGHT` rows, each a bitmask of
/// `FONT_WIDTH` cells with bit `x` set when column `x` is foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glyph {
    rows: [u8; FONT_HEIGHT],
}

impl Glyph {
    pub const BLANK: Glyph = Glyph { rows: [0; FONT_HEIGHT] };

    pub fn set(&self, x: usize, y: usize) -> bool {
        (self.rows[y] >> x) & 1 == 1
    }
}

/// Mapping from characters to glyphs.
pub struct GlyphTable {
    glyphs: HashMap<char, Glyph>,
}

impl GlyphTable {
    /// The font embedded in the binary.
    pub fn bundled() -> Self {
        Self::parse(BUNDLED_FONT)
    }

    /// Load a font file in the same text format as the bundled one.
    pub fn from_file(path: &Path) -> Result<Self, FbtermError> {
        let text = fs::read_to_string(path)?;
        let table = Self::parse(&text);
        if table.glyphs.len() <= 1 {
            warn!("font file {} contained no usable glyphs", path.display());
        }
        Ok(table)
    }

    /// Parse font text. Malformed records are skipped; the space glyph is
    /// synthesized when absent.
    pub fn parse(text: &str) -> Self {
        let mut glyphs = HashMap::new();
        let mut current: Option<(char, Vec<u8>)> = None;

        for line in text.lines() {
            if let Some(ch) = parse_label(line) {
                finish_record(&mut glyphs, current.take());
                current = Some((ch, Vec::with_capacity(FONT_HEIGHT)));
                continue;
            }
            let row = line.trim_start();
            if row.is_empty() || row.starts_with('#') {
                continue;
            }
            if let Some((_, rows)) = current.as_mut() {
                match parse_row(row) {
                    Some(bits) => rows.push(bits),
                    None => {
                        // Unusable bitmap row: drop the whole record.
                        current = None;
                    }
                }
            }
        }
        finish_record(&mut glyphs, current.take());

        glyphs.entry(' ').or_insert(Glyph::BLANK);
        debug!(count = glyphs.len(), "loaded glyph table");
        Self { glyphs }
    }

    pub fn get(&self, c: char) -> Option<&Glyph> {
        self.glyphs.get(&c)
    }
}

/// Parse a `u+XXXX:` label line into its character.
fn parse_label(line: &str) -> Option<char> {
    let label = line.strip_prefix("u+")?.strip_suffix(':')?;
    let code = u32::from_str_radix(label, 16).ok()?;
    char::from_u32(code)
}

/// Parse one `.`/`@` row of exactly `FONT_WIDTH` cells into a bitmask.
fn parse_row(row: &str) -> Option<u8> {
    if row.len() != FONT_WIDTH {
        return None;
    }
    let mut bits = 0u8;
    for (x, cell) in row.bytes().enumerate() {
        match cell {
            b'@' => bits |= 1 << x,
            b'.' => {}
            _ => return None,
        }
    }
    Some(bits)
}

fn finish_record(glyphs: &mut HashMap<char, Glyph>, record: Option<(char, Vec<u8>)>) {
    if let Some((ch, rows)) = record {
        if rows.len() == FONT_HEIGHT {
            let mut glyph = Glyph { rows: [0; FONT_HEIGHT] };
            glyph.rows.copy_from_slice(&rows);
            glyphs.insert(ch, glyph);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "\
# one full-column glyph and one broken record
u+0041:
    @@@@@@
    @.....
    @.....
    @.....
    @.....
    @.....
    @.....
    @.....
    @.....
    @.....
    @.....
    @@@@@@
u+0042:
    @@@@@@
    too-short-record
";

    #[test]
    fn parses_labels_and_rows() {
        let table = GlyphTable::parse(SAMPLE);
        let glyph = table.get('A').expect("glyph A");
        assert!(glyph.set(0, 0));
        assert!(glyph.set(5, 0));
        assert!(glyph.set(0, 5));
        assert!(!glyph.set(1, 5));
        assert!(glyph.set(3, 11));
    }

    #[test]
    fn malformed_records_are_skipped() {
        let table = GlyphTable::parse(SAMPLE);
        assert!(table.get('B').is_none());
    }

    #[test]
    fn space_is_synthesized_blank() {
        let table = GlyphTable::parse(SAMPLE);
        assert_eq!(table.get(' '), Some(&Glyph::BLANK));
    }

    #[test]
    fn bundled_covers_printable_ascii() {
        let table = GlyphTable::bundled();
        for c in '!'..='~' {
            assert!(table.get(c).is_some(), "missing glyph for {c:?}");
        }
        assert_eq!(table.get(' '), Some(&Glyph::BLANK));
    }

    #[test]
    fn missing_glyphs_are_none() {
        let table = GlyphTable::bundled();
        assert!(table.get('€').is_none());
        assert!(table.get('\t').is_none());
    }
}
