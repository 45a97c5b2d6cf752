//! Virtual terminal: screen state plus the escape-sequence parser feeding it.

mod parser;
mod state;

pub use parser::{Response, VtParser};
pub use state::{
    AttrFlags, Cell, CellAttrs, Color, CursorState, Row, SavedCursor, ScreenBuffer, SettledRow, TerminalModes,
    TerminalState, DEFAULT_SETTLE_LIMIT,
};

/// A fixed-size virtual screen driven by raw remote output
pub struct Screen {
    state: TerminalState,
    parser: VtParser,
}

impl Screen {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self::with_settle_limit(cols, rows, DEFAULT_SETTLE_LIMIT)
    }

    pub fn with_settle_limit(cols: u16, rows: u16, settle_limit: usize) -> Self {
        Self {
            state: TerminalState::with_settle_limit(cols, rows, settle_limit),
            parser: VtParser::new(),
        }
    }

    /// Apply a chunk of remote output; returns replies owed to the remote
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Response> {
        self.parser.advance(bytes, &mut self.state)
    }

    /// Current rows, top to bottom, trailing blanks trimmed
    pub fn render(&self) -> Vec<String> {
        self.state.render()
    }

    /// Text of the row under the cursor
    pub fn cursor_line(&self) -> String {
        self.state.cursor_line()
    }

    pub fn state(&self) -> &TerminalState {
        &self.state
    }

    pub fn title(&self) -> &str {
        &self.state.title
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "\x1b[H\x1b[2J\x1b[1;23r[you are in 'lobby' among 4]\r\n\
        [alice@sdf] 你好, everyone\r\n\x1b[31mbob@sdf DUMPs a bucket\x1b[0m\r\n\
        \x1b]0;com\x07\x1b7\x1b[24;1H\x1b[Kinput: \x1b8From carol@sdf: psst\r\n";

    fn settled(screen: &Screen) -> Vec<String> {
        screen.state().screen.settled().iter().map(|r| r.text.clone()).collect()
    }

    #[test]
    fn test_sample_session() {
        let mut screen = Screen::new(80, 24);
        screen.feed(SAMPLE.as_bytes());

        assert_eq!(
            settled(&screen),
            vec![
                "[you are in 'lobby' among 4]",
                "[alice@sdf] 你好, everyone",
                "bob@sdf DUMPs a bucket",
                "From carol@sdf: psst",
            ]
        );
        assert_eq!(screen.render()[23], "input:");
        assert_eq!(screen.title(), "com");
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_the_screen(cuts in proptest::collection::vec(0usize..200, 0..12)) {
            let bytes = SAMPLE.as_bytes();
            let mut whole = Screen::new(80, 24);
            whole.feed(bytes);

            let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c % (bytes.len() + 1)).collect();
            cuts.sort_unstable();
            let mut chunked = Screen::new(80, 24);
            let mut start = 0;
            for cut in cuts {
                chunked.feed(&bytes[start..cut]);
                start = cut;
            }
            chunked.feed(&bytes[start..]);

            prop_assert_eq!(whole.render(), chunked.render());
            prop_assert_eq!(settled(&whole), settled(&chunked));
            prop_assert_eq!(
                (whole.state().cursor.row, whole.state().cursor.col),
                (chunked.state().cursor.row, chunked.state().cursor.col)
            );
        }
    }
}
