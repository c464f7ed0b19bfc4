//! ANSI escape-sequence parser.
//!
//! A character-at-a-time state machine that turns the shell's output stream
//! into [`TerminalOp`] values. The screen applies those ops; the parser never
//! touches pixels.
//!
//! ```text
//! [pty bytes] ──utf-8──► [chars] ──state machine──► [TerminalOp stream]
//! ```
//!
//! Escape sequences accumulate into a buffer until a terminator appears:
//! for everything except OSC (`ESC ]`) that is an ASCII letter, `=`, `\`,
//! `%`, one of the fixed pairs ` 7`, ` 8`, `)0`, or the single byte after a
//! `(` charset designator; OSC ends only on BEL or `R`. A buffer that grows
//! past a sanity limit without terminating is discarded and the parser
//! returns to ground, so hostile output cannot wedge it.

use tracing::trace;

/// Maximum accumulated escape-sequence length before the parser gives up
/// and drops the buffer.
const ESCAPE_SANITY_LIMIT: usize = 64;

/// A semantic terminal command produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOp {
    Print(char),
    LineFeed,
    CarriageReturn,
    Backspace,
    CursorHome,
    CursorSet { line: usize, col: usize },
    CursorSetRow { line: usize },
    CursorUp(usize),
    CursorDown(usize),
    CursorRight(usize),
    CursorLeft(usize),
    ClearLineFromCursor,
    ClearEntireLine,
    ClearBelowCursor,
    ClearScreen,
    /// SGR parameter list, consumed left-to-right as a queue.
    SetGraphics(Vec<u16>),
    /// Repeat the last printed character n times.
    Repeat(usize),
    /// `Some((top, bottom))` in 1-based lines, `None` resets to full screen.
    SetScrollRegion(Option<(usize, usize)>),
    /// Recognized but meaningless here (NUL, BEL, OSC, charset designators…).
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Ground,
    /// ESC seen; the sequence kind is not yet known.
    Escape,
    /// First byte was `[` or `]`.
    CsiOrOsc,
}

pub struct Parser {
    state: ParserState,
    escape_buffer: String,
    /// Trailing bytes of a UTF-8 sequence split across read chunks.
    pending_utf8: Vec<u8>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            escape_buffer: String::new(),
            pending_utf8: Vec::new(),
        }
    }

    /// Feed a chunk of raw PTY output and collect the resulting ops.
    /// Undecodable bytes are dropped; a partial trailing UTF-8 sequence is
    /// held for the next chunk.
    pub fn advance(&mut self, bytes: &[u8]) -> Vec<TerminalOp> {
        let mut ops = Vec::new();

        let joined;
        let mut rest: &[u8] = if self.pending_utf8.is_empty() {
            bytes
        } else {
            let mut buf = std::mem::take(&mut self.pending_utf8);
            buf.extend_from_slice(bytes);
            joined = buf;
            &joined
        };

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    for c in text.chars() {
                        self.step(c, &mut ops);
                    }
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    // SAFETY: `valid_up_to` marks the longest valid prefix.
                    let text = unsafe { std::str::from_utf8_unchecked(valid) };
                    for c in text.chars() {
                        self.step(c, &mut ops);
                    }
                    match e.error_len() {
                        Some(n) => rest = &tail[n..],
                        None => {
                            self.pending_utf8 = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        ops
    }

    fn step(&mut self, c: char, ops: &mut Vec<TerminalOp>) {
        match self.state {
            ParserState::Ground => match c {
                '\x1b' => {
                    self.state = ParserState::Escape;
                    self.escape_buffer.clear();
                }
                '\n' => ops.push(TerminalOp::LineFeed),
                '\r' => ops.push(TerminalOp::CarriageReturn),
                '\x08' => ops.push(TerminalOp::Backspace),
                '\0' | '\x07' => ops.push(TerminalOp::Ignore),
                _ => ops.push(TerminalOp::Print(c)),
            },
            ParserState::Escape | ParserState::CsiOrOsc => self.accumulate(c, ops),
        }
    }

    fn accumulate(&mut self, c: char, ops: &mut Vec<TerminalOp>) {
        self.escape_buffer.push(c);
        if self.escape_buffer.len() == c.len_utf8() && (c == '[' || c == ']') {
            self.state = ParserState::CsiOrOsc;
        }

        if self.is_terminated(c) {
            let op = parse_sequence(&self.escape_buffer);
            trace!(sequence = %self.escape_buffer.escape_debug(), ?op, "escape");
            self.escape_buffer.clear();
            self.state = ParserState::Ground;
            ops.push(op);
        } else if self.escape_buffer.len() > ESCAPE_SANITY_LIMIT {
            trace!(
                sequence = %self.escape_buffer.escape_debug(),
                "discarding runaway escape sequence"
            );
            self.escape_buffer.clear();
            self.state = ParserState::Ground;
        }
    }

    /// Terminator predicate, applied after `c` has been appended.
    fn is_terminated(&self, c: char) -> bool {
        let buf = self.escape_buffer.as_str();
        // A `(` charset designator completes on its single payload byte.
        if buf.starts_with('(') {
            return buf.chars().count() >= 2;
        }
        let fixed = matches!(buf, " 7" | " 8" | ")0");
        let plain_end =
            c.is_ascii_alphabetic() || matches!(c, '=' | '\\' | '%') || fixed;
        (!buf.starts_with(']') && plain_end) || c == '\x07' || c == 'R'
    }
}

/// Parse a complete escape buffer (everything after ESC) into an op.
fn parse_sequence(buf: &str) -> TerminalOp {
    let Some(body) = buf.strip_prefix('[') else {
        // OSC, charset designators, keypad modes: recognized, not acted on.
        return TerminalOp::Ignore;
    };
    if body == "H" {
        return TerminalOp::CursorHome;
    }
    let Some(final_ch) = body.chars().last() else {
        return TerminalOp::Ignore;
    };
    let params = &body[..body.len() - final_ch.len_utf8()];

    match final_ch {
        'H' | 'f' => {
            let (line, col) = params.split_once(';').unwrap_or((params, ""));
            match (parse_count(line), parse_count(col)) {
                (Some(line), Some(col)) => TerminalOp::CursorSet { line, col },
                _ => TerminalOp::Ignore,
            }
        }
        'd' => match parse_count(params) {
            Some(line) => TerminalOp::CursorSetRow { line },
            None => TerminalOp::Ignore,
        },
        'A' => count_op(params, TerminalOp::CursorUp),
        'B' => count_op(params, TerminalOp::CursorDown),
        'C' => count_op(params, TerminalOp::CursorRight),
        // Z is CBT in ECMA-48, but is treated as cursor-left here.
        'D' | 'Z' => count_op(params, TerminalOp::CursorLeft),
        'K' => match params {
            "" | "0" => TerminalOp::ClearLineFromCursor,
            "2" => TerminalOp::ClearEntireLine,
            _ => TerminalOp::Ignore,
        },
        'J' => match params {
            "" | "0" => TerminalOp::ClearBelowCursor,
            "2" => TerminalOp::ClearScreen,
            _ => TerminalOp::Ignore,
        },
        'm' => {
            // `ESC [ > … m` (xterm modifyOtherKeys) is not SGR.
            if params.contains('>') {
                return TerminalOp::Ignore;
            }
            let mut list = Vec::new();
            for item in params.split(';') {
                if item.is_empty() {
                    list.push(0);
                } else {
                    match item.parse::<u16>() {
                        Ok(v) => list.push(v),
                        Err(_) => return TerminalOp::Ignore,
                    }
                }
            }
            TerminalOp::SetGraphics(list)
        }
        'b' => count_op(params, TerminalOp::Repeat),
        'r' => {
            if params.is_empty() {
                return TerminalOp::SetScrollRegion(None);
            }
            match params.split_once(';') {
                Some((top, bottom)) => {
                    match (top.parse::<usize>(), bottom.parse::<usize>()) {
                        (Ok(top), Ok(bottom)) => {
                            TerminalOp::SetScrollRegion(Some((top, bottom)))
                        }
                        _ => TerminalOp::Ignore,
                    }
                }
                None => TerminalOp::Ignore,
            }
        }
        _ => TerminalOp::Ignore,
    }
}

/// Parse a numeric parameter, defaulting to 1 when empty.
fn parse_count(s: &str) -> Option<usize> {
    if s.is_empty() { Some(1) } else { s.parse().ok() }
}

fn count_op(params: &str, make: fn(usize) -> TerminalOp) -> TerminalOp {
    match parse_count(params) {
        Some(n) => make(n),
        None => TerminalOp::Ignore,
    }
}
