//! Glyph and rectangle rasterization into the shadow buffer.
//!
//! All operations address the buffer through the screen geometry: a pixel at
//! `(x, y)` lives at byte offset `(y * width_px + x) * bytes_per_pixel`.
//! Callers keep glyph origins inside the screen; a glyph row that straddles
//! the right edge bleeds into the next pixel row rather than being clipped.

use crate::font::{FONT_HEIGHT, FONT_WIDTH, Glyph};
use crate::framebuffer::PixelBuffer;
use crate::geometry::ScreenGeometry;
use crate::pixel::{Color, encode};

/// Blit one glyph at pixel origin `(x, y)`: foreground pixels for set cells,
/// background pixels for clear cells.
pub fn draw_glyph(
    buf: &mut PixelBuffer,
    geo: &ScreenGeometry,
    x: usize,
    y: usize,
    glyph: &Glyph,
    fg: Color,
    bg: Color,
) {
    let bpp = geo.bytes_per_pixel();
    let fg_px = encode(fg, geo.format);
    let bg_px = encode(bg, geo.format);
    let mut row_bytes = [0u8; 4 * FONT_WIDTH];
    for row in 0..FONT_HEIGHT {
        let mut at = 0;
        for col in 0..FONT_WIDTH {
            let px = if glyph.set(col, row) { fg_px } else { bg_px };
            row_bytes[at..at + bpp].copy_from_slice(px.as_bytes());
            at += bpp;
        }
        buf.seek(((y + row) * geo.width_px + x) * bpp);
        buf.write(&row_bytes[..at]);
    }
}

/// Fill `rows_px` pixel rows starting at `(x, y)` with `color`. Each row is
/// `length_px` pixels, or runs to the right screen edge when `None`.
pub fn fill_hline(
    buf: &mut PixelBuffer,
    geo: &ScreenGeometry,
    x: usize,
    y: usize,
    rows_px: usize,
    length_px: Option<usize>,
    color: Color,
) {
    let bpp = geo.bytes_per_pixel();
    let length = length_px.unwrap_or_else(|| geo.width_px.saturating_sub(x));
    let px = encode(color, geo.format);
    for row in 0..rows_px {
        let offset = ((y + row) * geo.width_px + x) * bpp;
        buf.fill(offset, px.as_bytes(), length);
    }
}

/// Fill everything from the top of character line `line` (0-based) to the
/// end of the buffer.
pub fn clear_below(buf: &mut PixelBuffer, geo: &ScreenGeometry, line: usize, color: Color) {
    let offset = line * FONT_HEIGHT * geo.stride();
    if offset >= buf.len() {
        return;
    }
    let px = encode(color, geo.format);
    let repeat = (buf.len() - offset) / geo.bytes_per_pixel();
    buf.fill(offset, px.as_bytes(), repeat);
}

/// Fill the whole buffer.
pub fn clear_all(buf: &mut PixelBuffer, geo: &ScreenGeometry, color: Color) {
    let px = encode(color, geo.format);
    buf.fill(0, px.as_bytes(), buf.len() / geo.bytes_per_pixel());
}
