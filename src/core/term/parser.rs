//! VT sequence parser
//!
//! Parses ANSI/VT escape sequences and updates terminal state. The parser is
//! a byte-at-a-time state machine, so a stream split at any point produces
//! the same result as the stream fed whole. That includes UTF-8 sequences
//! split across reads.

use super::state::{AttrFlags, Color, TerminalState};

/// Response that needs to be sent back to the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Cursor position report: ESC [ row ; col R
    CursorPosition(u16, u16),
    /// Status report: terminal OK
    StatusOk,
    /// Device attributes response
    DeviceAttributes,
    /// Secondary device attributes response
    SecondaryDeviceAttributes,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::CursorPosition(row, col) => format!("\x1b[{};{}R", row, col).into_bytes(),
            Response::StatusOk => b"\x1b[0n".to_vec(),
            Response::DeviceAttributes => {
                // VT220 response
                b"\x1b[?62;c".to_vec()
            }
            Response::SecondaryDeviceAttributes => {
                // VT220 response
                b"\x1b[>1;10;0c".to_vec()
            }
        }
    }
}

/// Parser state machine
pub struct VtParser {
    state: ParserState,
    params: Vec<u16>,
    intermediates: Vec<u8>,
    current_param: Option<u16>,
    osc_bytes: Vec<u8>,
    /// Partial UTF-8 sequence carried between feeds
    utf8: Vec<u8>,
    utf8_len: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    OscString,
    EscapeInOsc, // ESC received within OSC, waiting for backslash
}

/// OSC payloads longer than this are truncated
const MAX_OSC_LEN: usize = 4096;

impl Default for VtParser {
    fn default() -> Self {
        Self::new()
    }
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            params: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            current_param: None,
            osc_bytes: Vec::new(),
            utf8: Vec::with_capacity(4),
            utf8_len: 0,
        }
    }

    /// Feed a chunk of bytes, collecting any responses
    pub fn advance(&mut self, bytes: &[u8], state: &mut TerminalState) -> Vec<Response> {
        let mut responses = Vec::new();
        for &byte in bytes {
            if let Some(response) = self.feed(byte, state) {
                responses.push(response);
            }
        }
        responses
    }

    /// Feed a single byte to the parser
    pub fn feed(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        // Handle C0 controls anywhere (except in OSC-related states)
        if byte < 0x20 && self.state != ParserState::OscString && self.state != ParserState::EscapeInOsc {
            self.drop_partial_utf8();
            match byte {
                0x1B => self.enter_escape(),
                0x07 => {} // BEL - ignore
                0x08 => state.backspace(),
                0x09 => state.horizontal_tab(),
                0x0A..=0x0C => state.linefeed(),
                0x0D => state.carriage_return(),
                0x18 | 0x1A => self.state = ParserState::Ground, // CAN / SUB
                _ => {}
            }
            return None;
        }

        match self.state {
            ParserState::Ground => self.ground(byte, state),
            ParserState::Escape => self.escape(byte, state),
            ParserState::EscapeIntermediate => self.escape_intermediate(byte),
            ParserState::CsiEntry => self.csi_entry(byte, state),
            ParserState::CsiParam => self.csi_param(byte, state),
            ParserState::CsiIntermediate => self.csi_intermediate(byte, state),
            ParserState::OscString => self.osc_string_state(byte, state),
            ParserState::EscapeInOsc => self.escape_in_osc(byte, state),
        }
    }

    /// Handle ESC received within OSC sequence
    fn escape_in_osc(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        self.execute_osc(state);
        if byte == b'\\' {
            // ST (ESC \) - String Terminator
            self.state = ParserState::Ground;
            return None;
        }
        // Not ST, process this byte as a new escape sequence
        self.enter_escape();
        self.escape(byte, state)
    }

    fn enter_escape(&mut self) {
        self.state = ParserState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
    }

    fn ground(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            0x20..=0x7E => {
                self.drop_partial_utf8();
                state.put_char(byte as char);
            }
            0x7F => {} // DEL
            _ => self.utf8_byte(byte, state),
        }
        None
    }

    fn utf8_byte(&mut self, byte: u8, state: &mut TerminalState) {
        let is_continuation = byte & 0xC0 == 0x80;

        if !self.utf8.is_empty() {
            if is_continuation {
                self.utf8.push(byte);
                if self.utf8.len() == self.utf8_len {
                    match std::str::from_utf8(&self.utf8) {
                        Ok(s) => {
                            for ch in s.chars() {
                                state.put_char(ch);
                            }
                        }
                        Err(_) => tracing::debug!("dropping invalid UTF-8 sequence {:?}", self.utf8),
                    }
                    self.utf8.clear();
                }
                return;
            }
            // A new lead byte cuts the previous sequence short
            self.drop_partial_utf8();
        }

        let seq_len = if byte & 0xE0 == 0xC0 {
            2
        } else if byte & 0xF0 == 0xE0 {
            3
        } else if byte & 0xF8 == 0xF0 {
            4
        } else {
            // Stray continuation or invalid lead byte, skip
            return;
        };
        self.utf8.push(byte);
        self.utf8_len = seq_len;
    }

    fn drop_partial_utf8(&mut self) {
        if !self.utf8.is_empty() {
            tracing::debug!("dropping incomplete UTF-8 sequence {:?}", self.utf8);
            self.utf8.clear();
        }
    }

    fn escape(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        self.state = ParserState::Ground;
        match byte {
            b'[' => {
                self.state = ParserState::CsiEntry;
                self.params.clear();
                self.intermediates.clear();
                self.current_param = None;
            }
            b']' => {
                self.state = ParserState::OscString;
                self.osc_bytes.clear();
            }
            // DECSC - Save cursor
            b'7' => state.save_cursor(),
            // DECRC - Restore cursor
            b'8' => state.restore_cursor(),
            // IND - Index
            b'D' => state.index(),
            b'E' => {
                // NEL - Next line
                state.carriage_return();
                state.linefeed();
            }
            // RI - Reverse index
            b'M' => state.reverse_index(),
            // RIS - Full reset
            b'c' => state.reset(),
            0x20..=0x2F => {
                // Intermediate bytes
                self.intermediates.push(byte);
                self.state = ParserState::EscapeIntermediate;
            }
            _ => tracing::debug!("Unknown ESC: final={:?}", byte as char),
        }
        None
    }

    fn escape_intermediate(&mut self, byte: u8) -> Option<Response> {
        match byte {
            0x20..=0x2F => {
                self.intermediates.push(byte);
            }
            _ => {
                // Final byte: charset selections and the like, all ignored
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn csi_entry(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            b'0'..=b'9' => {
                self.current_param = Some((byte - b'0') as u16);
                self.state = ParserState::CsiParam;
            }
            b';' => {
                self.params.push(0);
                self.state = ParserState::CsiParam;
            }
            b'?' | b'>' | b'!' | b'=' => {
                self.intermediates.push(byte);
            }
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => {
                // Final byte
                return self.execute_csi(byte, state);
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn csi_param(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            b'0'..=b'9' => {
                let digit = (byte - b'0') as u16;
                self.current_param = Some(self.current_param.unwrap_or(0).saturating_mul(10).saturating_add(digit));
            }
            b';' | b':' => {
                // Subparameters (SGR) are treated as regular parameters
                self.params.push(self.current_param.unwrap_or(0));
                self.current_param = None;
            }
            0x20..=0x2F => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(byte);
                self.state = ParserState::CsiIntermediate;
            }
            0x40..=0x7E => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                return self.execute_csi(byte, state);
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn csi_intermediate(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            0x20..=0x2F => {
                self.intermediates.push(byte);
            }
            0x40..=0x7E => {
                return self.execute_csi(byte, state);
            }
            _ => {
                self.state = ParserState::Ground;
            }
        }
        None
    }

    fn osc_string_state(&mut self, byte: u8, state: &mut TerminalState) -> Option<Response> {
        match byte {
            0x07 => {
                // BEL terminates OSC
                self.execute_osc(state);
                self.state = ParserState::Ground;
            }
            0x1B => {
                // Could be ST (ESC \)
                self.state = ParserState::EscapeInOsc;
            }
            _ => {
                if self.osc_bytes.len() < MAX_OSC_LEN {
                    self.osc_bytes.push(byte);
                }
            }
        }
        None
    }

    fn execute_csi(&mut self, final_byte: u8, state: &mut TerminalState) -> Option<Response> {
        let is_private = self.intermediates.contains(&b'?');
        let is_gt = self.intermediates.contains(&b'>');
        let has_other = self.intermediates.iter().any(|b| !matches!(b, b'?' | b'>'));
        let params = &self.params;
        let first = |default: u16| params.first().copied().unwrap_or(default);
        let count = || params.first().copied().unwrap_or(1).max(1);

        self.state = ParserState::Ground;

        if has_other {
            // DECSCUSR and friends carry intermediates; none affect text
            tracing::debug!(
                "Unknown CSI: intermediates={:?}, params={:?}, final={:?}",
                self.intermediates,
                params,
                final_byte as char
            );
            return None;
        }

        match (is_private, is_gt, final_byte) {
            // Cursor movement
            (false, false, b'A') => state.cursor_up(count()),
            (false, false, b'B') => state.cursor_down(count()),
            (false, false, b'C') => state.cursor_forward(count()),
            (false, false, b'D') => state.cursor_backward(count()),
            (false, false, b'E') => {
                // CNL - Cursor Next Line
                state.cursor_down(count());
                state.carriage_return();
            }
            (false, false, b'F') => {
                // CPL - Cursor Previous Line
                state.cursor_up(count());
                state.carriage_return();
            }
            // CHA - Cursor Character Absolute
            (false, false, b'G') => state.cursor_column(first(1)),
            (false, false, b'H') | (false, false, b'f') => {
                // CUP - Cursor Position
                let row = first(1);
                let col = params.get(1).copied().unwrap_or(1);
                state.cursor_position(row, col);
            }
            // VPA - Line Position Absolute
            (false, false, b'd') => state.cursor_row(first(1)),

            // Erase
            (false, false, b'J') => state.erase_in_display(first(0)),
            (false, false, b'K') => state.erase_in_line(first(0)),
            (false, false, b'X') => state.erase_chars(count()),

            // Line operations
            (false, false, b'L') => state.insert_lines(count()),
            (false, false, b'M') => state.delete_lines(count()),

            // Character operations
            (false, false, b'@') => state.insert_chars(count()),
            (false, false, b'P') => state.delete_chars(count()),

            // Scroll
            (false, false, b'S') => state.scroll_up(count()),
            (false, false, b'T') => state.scroll_down(count()),

            // Scroll region
            (false, false, b'r') => {
                let top = first(1);
                let bottom = params.get(1).copied().unwrap_or(state.rows);
                state.set_scroll_region(top, bottom);
                state.cursor_position(1, 1);
            }

            // SGR - Select Graphic Rendition
            (false, false, b'm') => Self::execute_sgr(params, state),

            // Save/restore cursor
            (false, false, b's') => state.save_cursor(),
            (false, false, b'u') => state.restore_cursor(),

            // Device Status Report
            (false, false, b'n') => {
                return match params.first() {
                    Some(5) => Some(Response::StatusOk),
                    Some(6) => {
                        let col = state.cursor.col.min(state.cols - 1);
                        Some(Response::CursorPosition(state.cursor.row + 1, col + 1))
                    }
                    _ => None,
                };
            }

            // Device Attributes
            (false, false, b'c') => return Some(Response::DeviceAttributes),
            (false, true, b'c') => return Some(Response::SecondaryDeviceAttributes),

            // Private modes (DEC)
            (true, false, b'h') | (true, false, b'l') => {
                for &p in params {
                    state.set_private_mode(p, final_byte == b'h');
                }
            }

            // Standard modes
            (false, false, b'h') | (false, false, b'l') => {
                let enable = final_byte == b'h';
                for &p in params {
                    match p {
                        4 => state.modes.insert_mode = enable,
                        20 => state.modes.linefeed_newline = enable,
                        _ => {}
                    }
                }
            }

            _ => {
                // Unknown sequence
                tracing::debug!(
                    "Unknown CSI: intermediates={:?}, params={:?}, final={:?}",
                    self.intermediates,
                    params,
                    final_byte as char
                );
            }
        }
        None
    }

    fn execute_sgr(params: &[u16], state: &mut TerminalState) {
        if params.is_empty() {
            state.current_attrs.reset();
            return;
        }

        let mut iter = params.iter();

        while let Some(&param) = iter.next() {
            match param {
                0 => state.current_attrs.reset(),
                1 => state.current_attrs.flags |= AttrFlags::BOLD,
                2 => state.current_attrs.flags |= AttrFlags::DIM,
                3 => state.current_attrs.flags |= AttrFlags::ITALIC,
                4 => state.current_attrs.flags |= AttrFlags::UNDERLINE,
                5 => state.current_attrs.flags |= AttrFlags::BLINK,
                7 => state.current_attrs.flags |= AttrFlags::INVERSE,
                8 => state.current_attrs.flags |= AttrFlags::HIDDEN,
                9 => state.current_attrs.flags |= AttrFlags::STRIKETHROUGH,

                22 => state.current_attrs.flags &= !(AttrFlags::BOLD | AttrFlags::DIM),
                23 => state.current_attrs.flags &= !AttrFlags::ITALIC,
                24 => state.current_attrs.flags &= !AttrFlags::UNDERLINE,
                25 => state.current_attrs.flags &= !AttrFlags::BLINK,
                27 => state.current_attrs.flags &= !AttrFlags::INVERSE,
                28 => state.current_attrs.flags &= !AttrFlags::HIDDEN,
                29 => state.current_attrs.flags &= !AttrFlags::STRIKETHROUGH,

                // Foreground colors (standard)
                30..=37 => state.current_attrs.fg = Color::Indexed((param - 30) as u8),
                38 => {
                    if let Some(color) = Self::extended_color(&mut iter) {
                        state.current_attrs.fg = color;
                    }
                }
                39 => state.current_attrs.fg = Color::Default,

                // Background colors (standard)
                40..=47 => state.current_attrs.bg = Color::Indexed((param - 40) as u8),
                48 => {
                    if let Some(color) = Self::extended_color(&mut iter) {
                        state.current_attrs.bg = color;
                    }
                }
                49 => state.current_attrs.bg = Color::Default,

                // Bright foreground
                90..=97 => state.current_attrs.fg = Color::Indexed((param - 90 + 8) as u8),
                // Bright background
                100..=107 => state.current_attrs.bg = Color::Indexed((param - 100 + 8) as u8),

                _ => {}
            }
        }
    }

    /// 256-color (`5;n`) or RGB (`2;r;g;b`) tail of SGR 38/48
    fn extended_color(iter: &mut std::slice::Iter<'_, u16>) -> Option<Color> {
        match iter.next().copied()? {
            5 => iter.next().map(|&n| Color::Indexed(n as u8)),
            2 => {
                let r = iter.next().copied().unwrap_or(0) as u8;
                let g = iter.next().copied().unwrap_or(0) as u8;
                let b = iter.next().copied().unwrap_or(0) as u8;
                Some(Color::Rgb(r, g, b))
            }
            _ => None,
        }
    }

    fn execute_osc(&mut self, state: &mut TerminalState) {
        // Parse OSC: "code;text"
        let osc = String::from_utf8_lossy(&self.osc_bytes);
        if let Some((code, text)) = osc.split_once(';') {
            match code {
                "0" | "1" | "2" => state.title = text.to_string(),
                _ => tracing::debug!("ignoring OSC {}", code),
            }
        }
        self.osc_bytes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(bytes: &[u8]) -> (TerminalState, Vec<Response>) {
        let mut state = TerminalState::new(80, 24);
        let mut parser = VtParser::new();
        let responses = parser.advance(bytes, &mut state);
        (state, responses)
    }

    #[test]
    fn test_cursor_movement() {
        let (state, _) = feed_all(b"\x1b[5;10H");

        assert_eq!(state.cursor.row, 4);
        assert_eq!(state.cursor.col, 9);
    }

    #[test]
    fn test_sgr_colors() {
        let (state, _) = feed_all(b"\x1b[31m");
        assert_eq!(state.current_attrs.fg, Color::Indexed(1));

        let (state, _) = feed_all(b"\x1b[1;38;5;200;48;2;1;2;3m");
        assert_eq!(state.current_attrs.fg, Color::Indexed(200));
        assert_eq!(state.current_attrs.bg, Color::Rgb(1, 2, 3));
        assert!(state.current_attrs.flags.contains(AttrFlags::BOLD));
    }

    #[test]
    fn test_utf8_split_across_feeds() {
        let mut state = TerminalState::new(80, 24);
        let mut parser = VtParser::new();
        let bytes = "你好".as_bytes();

        parser.advance(&bytes[..2], &mut state);
        parser.advance(&bytes[2..4], &mut state);
        parser.advance(&bytes[4..], &mut state);

        assert_eq!(state.cursor_line(), "你好");
    }

    #[test]
    fn test_cursor_position_report() {
        let (_, responses) = feed_all(b"ab\x1b[6n\x1b[c\x1b[5n");

        assert_eq!(
            responses,
            vec![Response::CursorPosition(1, 3), Response::DeviceAttributes, Response::StatusOk]
        );
        assert_eq!(responses[0].to_bytes(), b"\x1b[1;3R".to_vec());
    }

    #[test]
    fn test_osc_title_recorded() {
        let (state, _) = feed_all(b"\x1b]0;sdf com\x07text");

        assert_eq!(state.title, "sdf com");
        assert_eq!(state.cursor_line(), "text");

        let (state, _) = feed_all(b"\x1b]2;other\x1b\\x");
        assert_eq!(state.title, "other");
        assert_eq!(state.cursor_line(), "x");
    }

    #[test]
    fn test_unknown_sequences_are_skipped() {
        let (state, _) = feed_all(b"\x1b[2 q\x1b(Bab\x1b[?1049h\x1b[99zc");

        assert_eq!(state.cursor_line(), "abc");
    }

    #[test]
    fn test_erase_and_insert() {
        let (state, _) = feed_all(b"abcdef\x1b[3G\x1b[2P");
        assert_eq!(state.cursor_line(), "abef");

        let (state, _) = feed_all(b"abcdef\x1b[3G\x1b[K");
        assert_eq!(state.cursor_line(), "ab");

        let (state, _) = feed_all(b"abcdef\x1b[2G\x1b[2@");
        assert_eq!(state.cursor_line(), "a  bcdef");

        let (state, _) = feed_all(b"abcdef\x1b[2G\x1b[3X");
        assert_eq!(state.cursor_line(), "a   ef");
    }

    #[test]
    fn test_next_line_settles() {
        let (state, _) = feed_all(b"first\x1bEsecond");

        assert_eq!(state.screen.settled().len(), 1);
        assert_eq!(state.cursor_line(), "second");
    }

    #[test]
    fn test_reset_keeps_settle_log() {
        let (state, _) = feed_all(b"kept\r\n\x1bcnew");

        assert_eq!(state.screen.settled().len(), 1);
        assert_eq!(state.screen.epoch(), 1);
        assert_eq!(state.render()[0], "new");
    }
}
