//! Screen state machine.
//!
//! [`Screen`] owns the shadow buffer, the glyph table, and the terminal
//! state (cursor, colors, scroll region), and applies [`TerminalOp`] values
//! produced by the parser. Pixels only ever change through the rasterizer
//! and the buffer's scroll move; the device mapping is someone else's
//! problem.
//!
//! Coordinates are pixels. The cell under the cursor starts at exactly
//! `(cursor_x, cursor_y)`; character lines for the scroll region are 1-based.

use tracing::trace;

use crate::font::{FONT_HEIGHT, FONT_WIDTH, GlyphTable};
use crate::framebuffer::PixelBuffer;
use crate::geometry::ScreenGeometry;
use crate::palette::{EXTENDED_256, PALETTE_SIZE};
use crate::parser::TerminalOp;
use crate::pixel::{Color, encode};
use crate::raster;

pub struct Screen {
    geometry: ScreenGeometry,
    buffer: PixelBuffer,
    font: GlyphTable,
    palette: [Color; PALETTE_SIZE],
    cursor_x: usize,
    cursor_y: usize,
    fg: Color,
    bg: Color,
    /// `(top, bottom)` in 1-based character lines, both inclusive.
    scroll_region: (usize, usize),
    last_printed: Option<char>,
}

impl Screen {
    pub fn new(geometry: ScreenGeometry, font: GlyphTable, palette: [Color; PALETTE_SIZE]) -> Self {
        let mut screen = Self {
            geometry,
            buffer: PixelBuffer::new(geometry.total_bytes()),
            font,
            palette,
            cursor_x: 0,
            cursor_y: 0,
            fg: palette[15],
            bg: palette[0],
            scroll_region: (1, geometry.height_px / FONT_HEIGHT),
            last_printed: None,
        };
        raster::clear_all(&mut screen.buffer, &screen.geometry, screen.bg);
        screen
    }

    pub fn geometry(&self) -> &ScreenGeometry {
        &self.geometry
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Cursor position in pixels.
    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_x, self.cursor_y)
    }

    /// Total character lines on screen.
    fn total_lines(&self) -> usize {
        self.geometry.height_px / FONT_HEIGHT
    }

    /// Apply one parsed terminal command.
    pub fn apply(&mut self, op: TerminalOp) {
        match op {
            TerminalOp::Print(c) => self.print_char(c),
            TerminalOp::LineFeed => self.line_feed(),
            TerminalOp::CarriageReturn => self.cursor_x = 0,
            TerminalOp::Backspace => {
                self.cursor_x = self.cursor_x.saturating_sub(FONT_WIDTH);
            }
            TerminalOp::CursorHome => {
                self.cursor_x = 0;
                self.cursor_y = 0;
            }
            TerminalOp::CursorSet { line, col } => {
                self.cursor_y = line.saturating_sub(1) * FONT_HEIGHT;
                self.cursor_x = col.saturating_sub(1) * FONT_WIDTH;
            }
            TerminalOp::CursorSetRow { line } => {
                self.cursor_y = line.saturating_sub(1) * FONT_HEIGHT;
            }
            TerminalOp::CursorUp(n) => {
                self.cursor_y -= self.cursor_y.min(n * FONT_HEIGHT);
            }
            TerminalOp::CursorDown(n) => {
                self.cursor_y = (self.cursor_y + n * FONT_HEIGHT).min(self.geometry.height_px);
            }
            TerminalOp::CursorRight(n) => {
                self.cursor_x = (self.cursor_x + n * FONT_WIDTH).min(self.geometry.width_px);
            }
            TerminalOp::CursorLeft(n) => {
                self.cursor_x -= self.cursor_x.min(n * FONT_WIDTH);
            }
            TerminalOp::ClearLineFromCursor => {
                raster::fill_hline(
                    &mut self.buffer,
                    &self.geometry,
                    self.cursor_x,
                    self.cursor_y,
                    FONT_HEIGHT,
                    None,
                    self.bg,
                );
            }
            TerminalOp::ClearEntireLine => {
                raster::fill_hline(
                    &mut self.buffer,
                    &self.geometry,
                    0,
                    self.cursor_y,
                    FONT_HEIGHT,
                    None,
                    self.bg,
                );
            }
            TerminalOp::ClearBelowCursor => {
                raster::fill_hline(
                    &mut self.buffer,
                    &self.geometry,
                    self.cursor_x,
                    self.cursor_y,
                    FONT_HEIGHT,
                    None,
                    self.bg,
                );
                let next_line = self.cursor_y / FONT_HEIGHT + 1;
                if next_line < self.total_lines() {
                    raster::clear_below(&mut self.buffer, &self.geometry, next_line, self.bg);
                }
            }
            TerminalOp::ClearScreen => {
                raster::clear_all(&mut self.buffer, &self.geometry, self.bg);
            }
            TerminalOp::SetGraphics(params) => self.set_graphics(&params),
            TerminalOp::Repeat(n) => {
                if let Some(c) = self.last_printed {
                    for _ in 0..n {
                        self.print_char(c);
                    }
                }
            }
            TerminalOp::SetScrollRegion(region) => self.set_scroll_region(region),
            TerminalOp::Ignore => {}
        }
    }

    /// Rasterize `c` at the cursor and advance one cell. Characters without
    /// a glyph still advance, so columns stay aligned.
    fn print_char(&mut self, c: char) {
        if let Some(glyph) = self.font.get(c) {
            raster::draw_glyph(
                &mut self.buffer,
                &self.geometry,
                self.cursor_x,
                self.cursor_y,
                glyph,
                self.fg,
                self.bg,
            );
        }
        self.cursor_x += FONT_WIDTH;
        self.last_printed = Some(c);
    }

    /// Advance one line, scrolling the region up when the cursor passes its
    /// bottom. The scroll is one overlap-safe move in the shadow buffer plus
    /// a background fill of the vacated bottom line.
    fn line_feed(&mut self) {
        self.cursor_y += FONT_HEIGHT;
        let (top, bottom) = self.scroll_region;
        if self.cursor_y >= bottom * FONT_HEIGHT {
            self.cursor_y = (bottom - 1) * FONT_HEIGHT;
            let stride = self.geometry.stride();
            self.buffer.move_region(
                (top - 1) * FONT_HEIGHT * stride,
                top * FONT_HEIGHT * stride,
                (bottom - top) * FONT_HEIGHT * stride,
            );
            raster::fill_hline(
                &mut self.buffer,
                &self.geometry,
                0,
                self.cursor_y,
                FONT_HEIGHT,
                None,
                self.bg,
            );
        }
        self.cursor_x = 0;
    }

    /// SGR: parameters are consumed left-to-right as a queue, because the
    /// 38/48 extended forms swallow the following items.
    fn set_graphics(&mut self, params: &[u16]) {
        let mut it = params.iter().copied();
        while let Some(arg) = it.next() {
            match arg {
                0 => {
                    self.fg = self.palette[15];
                    self.bg = self.palette[0];
                }
                1 => {} // bold: single-weight font
                30..=37 => self.fg = self.palette[(arg - 30) as usize],
                90..=97 => self.fg = self.palette[(arg - 82) as usize],
                39 => self.fg = self.palette[15],
                40..=47 => self.bg = self.palette[(arg - 40) as usize],
                100..=107 => self.bg = self.palette[(arg - 92) as usize],
                49 => self.bg = self.palette[0],
                38 => match self.extended_color(&mut it) {
                    Some(color) => self.fg = color,
                    None => return, // malformed: abort the whole SGR
                },
                48 => match self.extended_color(&mut it) {
                    Some(color) => self.bg = color,
                    None => return,
                },
                other => trace!(sgr = other, "unhandled graphics attribute"),
            }
        }
    }

    /// The tail of a `38;…`/`48;…` extended color: `5;n` indexed or
    /// `2;r;g;b` direct. `None` when malformed.
    fn extended_color(&self, it: &mut impl Iterator<Item = u16>) -> Option<Color> {
        match it.next()? {
            5 => {
                let n = it.next()?;
                match n {
                    0..=15 => Some(self.palette[n as usize]),
                    16..=255 => Some(EXTENDED_256[n as usize - 16]),
                    _ => None,
                }
            }
            2 => {
                let r = it.next()?;
                let g = it.next()?;
                let b = it.next()?;
                if r > 255 || g > 255 || b > 255 {
                    return None;
                }
                Some(Color::rgb(r as u8, g as u8, b as u8))
            }
            _ => None,
        }
    }

    /// A degenerate region (`top` of 0, or `top >= bottom`) resets to the
    /// full screen, the same as an empty `CSI r`.
    fn set_scroll_region(&mut self, region: Option<(usize, usize)>) {
        match region {
            None => self.scroll_region = (1, self.total_lines()),
            Some((top, bottom)) => {
                let bottom = bottom.min(self.total_lines());
                if top >= 1 && top < bottom {
                    self.scroll_region = (top, bottom);
                } else {
                    trace!(top, bottom, "degenerate scroll region; resetting to full screen");
                    self.scroll_region = (1, self.total_lines());
                }
            }
        }
    }

    /// Byte offset and encoded pixels of the cursor caret: one glyph-wide
    /// foreground row on the cell's bottom pixel line. `None` when the caret
    /// would stick out of the screen.
    pub fn caret_span(&self) -> Option<(usize, [u8; 4 * FONT_WIDTH], usize)> {
        let caret_y = self.cursor_y + FONT_HEIGHT - 1;
        if caret_y >= self.geometry.height_px
            || self.cursor_x + FONT_WIDTH > self.geometry.width_px
        {
            return None;
        }
        let bpp = self.geometry.bytes_per_pixel();
        let px = encode(self.fg, self.geometry.format);
        let mut bytes = [0u8; 4 * FONT_WIDTH];
        for col in 0..FONT_WIDTH {
            bytes[col * bpp..col * bpp + bpp].copy_from_slice(px.as_bytes());
        }
        let offset = (caret_y * self.geometry.width_px + self.cursor_x) * bpp;
        Some((offset, bytes, FONT_WIDTH * bpp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::DEFAULT_PALETTE;
    use crate::parser::Parser;
    use crate::pixel::PixelFormat;
    use pretty_assertions::assert_eq;

    const BG: Color = DEFAULT_PALETTE[0];
    const FG: Color = DEFAULT_PALETTE[15];

    /// A clean 240×96 32-bpp screen: 40 columns by 8 lines.
    fn screen() -> Screen {
        let geometry =
            ScreenGeometry { width_px: 240, height_px: 96, format: PixelFormat::Bgra32 };
        Screen::new(geometry, GlyphTable::bundled(), DEFAULT_PALETTE)
    }

    fn feed(screen: &mut Screen, input: &str) {
        let mut parser = Parser::new();
        for op in parser.advance(input.as_bytes()) {
            screen.apply(op);
        }
    }

    fn pixel_at(screen: &Screen, x: usize, y: usize) -> Color {
        let at = (y * screen.geometry().width_px + x) * 4;
        let b = screen.buffer().as_bytes();
        Color::rgb(b[at + 2], b[at + 1], b[at])
    }

    /// Assert that the cell at character coordinates `(col, line)` holds the
    /// given glyph in the given colors.
    fn assert_cell(screen: &Screen, col: usize, line: usize, c: char, fg: Color, bg: Color) {
        let glyph = *screen.font.get(c).expect("glyph");
        for row in 0..FONT_HEIGHT {
            for gx in 0..FONT_WIDTH {
                let want = if glyph.set(gx, row) { fg } else { bg };
                let got = pixel_at(screen, col * FONT_WIDTH + gx, line * FONT_HEIGHT + row);
                assert_eq!(got, want, "cell ({col},{line}) {c:?} at glyph ({gx},{row})");
            }
        }
    }

    fn assert_cell_blank(screen: &Screen, col: usize, line: usize, bg: Color) {
        for row in 0..FONT_HEIGHT {
            for gx in 0..FONT_WIDTH {
                let got = pixel_at(screen, col * FONT_WIDTH + gx, line * FONT_HEIGHT + row);
                assert_eq!(got, bg, "cell ({col},{line}) not blank at ({gx},{row})");
            }
        }
    }

    #[test]
    fn prints_advance_and_line_feed_moves_down() {
        // S1: "AB\n" puts glyphs at cells (0,0) and (1,0), cursor on line 1.
        let mut screen = screen();
        feed(&mut screen, "AB\n");
        assert_cell(&screen, 0, 0, 'A', FG, BG);
        assert_cell(&screen, 1, 0, 'B', FG, BG);
        assert_eq!(screen.cursor(), (0, FONT_HEIGHT));
    }

    #[test]
    fn cursor_home_overwrites_in_place() {
        // S2: "X\x1b[H Y": home, then the space overdraws the X cell with
        // background, and Y lands in the second cell.
        let mut screen = screen();
        feed(&mut screen, "X\x1b[H Y");
        assert_cell_blank(&screen, 0, 0, BG);
        assert_cell(&screen, 1, 0, 'Y', FG, BG);
        assert_eq!(screen.cursor().0, 2 * FONT_WIDTH);
    }

    #[test]
    fn sgr_colors_apply_per_glyph() {
        // S3: red from palette[1], then reset back to palette[15].
        let mut screen = screen();
        feed(&mut screen, "\x1b[31mR\x1b[0mN");
        assert_cell(&screen, 0, 0, 'R', DEFAULT_PALETTE[1], BG);
        assert_cell(&screen, 1, 0, 'N', DEFAULT_PALETTE[15], BG);
    }

    #[test]
    fn palette_indices_map_for_all_basic_foregrounds() {
        // Property 5: SetGraphics([30+i]) selects palette[i].
        for i in 0..8u16 {
            let mut screen = screen();
            screen.apply(TerminalOp::SetGraphics(vec![30 + i]));
            screen.apply(TerminalOp::Print('x'));
            assert_cell(&screen, 0, 0, 'x', DEFAULT_PALETTE[i as usize], BG);
        }
    }

    #[test]
    fn extended_colors_and_malformed_sgr() {
        let mut screen = screen();
        feed(&mut screen, "\x1b[38;5;3mx");
        assert_cell(&screen, 0, 0, 'x', DEFAULT_PALETTE[3], BG);

        feed(&mut screen, "\x1b[38;5;196my");
        assert_cell(&screen, 1, 0, 'y', EXTENDED_256[180], BG);

        feed(&mut screen, "\x1b[38;2;1;2;3mz");
        assert_cell(&screen, 2, 0, 'z', Color::rgb(1, 2, 3), BG);

        // A truncated extended sequence aborts the SGR; the reset issued
        // just before it still holds.
        feed(&mut screen, "\x1b[0m\x1b[38;5mq");
        assert_cell(&screen, 3, 0, 'q', FG, BG);
    }

    #[test]
    fn scroll_region_drops_top_line() {
        // S4: with a two-line region, "A\nB\nC" leaves B on line 1, C on
        // line 2, and no A anywhere.
        let mut screen = screen();
        feed(&mut screen, "\x1b[1;2r");
        feed(&mut screen, "A\nB\nC");
        assert_cell(&screen, 0, 0, 'B', FG, BG);
        assert_cell(&screen, 0, 1, 'C', FG, BG);
        assert_cell_blank(&screen, 1, 0, BG);
    }

    #[test]
    fn scroll_preserves_interior_lines() {
        // Property 3: after a full-screen scroll, line K shows what K+1 held
        // and the bottom line is background.
        let mut screen = screen();
        for line in 0..8 {
            feed(&mut screen, &format!("L{line}"));
            if line < 7 {
                feed(&mut screen, "\n");
            }
        }
        feed(&mut screen, "\n"); // scrolls
        for line in 0..7 {
            assert_cell(&screen, 1, line, char::from(b'1' + line as u8), FG, BG);
        }
        assert_cell_blank(&screen, 0, 7, BG);
        assert_cell_blank(&screen, 1, 7, BG);
    }

    #[test]
    fn clear_screen_resets_every_byte() {
        // S5: with a black background, ESC[2J zeroes the whole 32-bpp shadow.
        let geometry =
            ScreenGeometry { width_px: 240, height_px: 96, format: PixelFormat::Bgra32 };
        let mut palette = DEFAULT_PALETTE;
        palette[0] = Color::rgb(0, 0, 0);
        let mut screen = Screen::new(geometry, GlyphTable::bundled(), palette);
        feed(&mut screen, "garbage all over\x1b[2J");
        assert!(screen.buffer().as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn repeat_draws_last_char() {
        // S6: "q" + ESC[4b = five q cells in a row.
        let mut screen = screen();
        feed(&mut screen, "q\x1b[4b");
        for col in 0..5 {
            assert_cell(&screen, col, 0, 'q', FG, BG);
        }
        assert_cell_blank(&screen, 5, 0, BG);
    }

    #[test]
    fn repeat_without_prior_print_is_inert() {
        let mut screen = screen();
        let before = screen.buffer().as_bytes().to_vec();
        feed(&mut screen, "\x1b[9b");
        assert_eq!(screen.buffer().as_bytes(), &before[..]);
    }

    #[test]
    fn cursor_clamps_at_edges() {
        // Property 4: up/left saturate at zero, down/right at the screen.
        let mut screen = screen();
        feed(&mut screen, "\x1b[3;5H");
        feed(&mut screen, "\x1b[99A");
        assert_eq!(screen.cursor().1, 0);
        feed(&mut screen, "\x1b[99D");
        assert_eq!(screen.cursor().0, 0);
        feed(&mut screen, "\x1b[999B\x1b[999C");
        assert_eq!(screen.cursor(), (240, 96));
    }

    #[test]
    fn backspace_saturates_at_left_edge() {
        let mut screen = screen();
        feed(&mut screen, "a\x08\x08\x08");
        assert_eq!(screen.cursor().0, 0);
    }

    #[test]
    fn clear_line_ops_fill_with_background() {
        let mut screen = screen();
        feed(&mut screen, "abcdef\r\x1b[2C");
        screen.apply(TerminalOp::ClearLineFromCursor);
        assert_cell(&screen, 0, 0, 'a', FG, BG);
        assert_cell(&screen, 1, 0, 'b', FG, BG);
        for col in 2..6 {
            assert_cell_blank(&screen, col, 0, BG);
        }

        screen.apply(TerminalOp::ClearEntireLine);
        assert_cell_blank(&screen, 0, 0, BG);
    }

    #[test]
    fn clear_below_erases_rest_of_screen() {
        let mut screen = screen();
        feed(&mut screen, "top\ntwo\nthree");
        feed(&mut screen, "\x1b[2;1H\x1b[J");
        assert_cell(&screen, 0, 0, 't', FG, BG);
        assert_cell_blank(&screen, 0, 1, BG);
        assert_cell_blank(&screen, 0, 2, BG);
    }

    #[test]
    fn osc_causes_zero_pixel_mutations() {
        // Property 7.
        let mut screen = screen();
        feed(&mut screen, "A");
        let before = screen.buffer().as_bytes().to_vec();
        feed(&mut screen, "\x1b]0;window title with Letters\x07");
        assert_eq!(screen.buffer().as_bytes(), &before[..]);
    }

    #[test]
    fn glyphless_chars_advance_without_drawing() {
        let mut screen = screen();
        feed(&mut screen, "€A");
        assert_cell_blank(&screen, 0, 0, BG);
        assert_cell(&screen, 1, 0, 'A', FG, BG);
    }

    #[test]
    fn caret_sits_on_cell_bottom_row() {
        let screen = screen();
        let (offset, _, len) = screen.caret_span().expect("caret");
        assert_eq!(offset, (FONT_HEIGHT - 1) * screen.geometry().stride());
        assert_eq!(len, FONT_WIDTH * 4);
    }

    #[test]
    fn caret_is_suppressed_off_screen() {
        let mut screen = screen();
        feed(&mut screen, "\x1b[999B");
        assert!(screen.caret_span().is_none());
    }

    #[test]
    fn degenerate_scroll_regions_reset_to_full_screen() {
        let mut screen = screen();
        screen.apply(TerminalOp::SetScrollRegion(Some((5, 3))));
        assert_eq!(screen.scroll_region, (1, 8));
        screen.apply(TerminalOp::SetScrollRegion(Some((2, 999))));
        assert_eq!(screen.scroll_region, (2, 8));
        screen.apply(TerminalOp::SetScrollRegion(None));
        assert_eq!(screen.scroll_region, (1, 8));

        // A degenerate region must reset even when a non-default one is in
        // effect, not just leave the old value in place.
        screen.apply(TerminalOp::SetScrollRegion(Some((3, 6))));
        assert_eq!(screen.scroll_region, (3, 6));
        screen.apply(TerminalOp::SetScrollRegion(Some((5, 2))));
        assert_eq!(screen.scroll_region, (1, 8));

        // A zero top is degenerate too and resets the same way.
        screen.apply(TerminalOp::SetScrollRegion(Some((3, 6))));
        assert_eq!(screen.scroll_region, (3, 6));
        screen.apply(TerminalOp::SetScrollRegion(Some((0, 5))));
        assert_eq!(screen.scroll_region, (1, 8));
    }
}
