//! Terminal state management
//!
//! This module defines the screen buffer, cursor state, and cell attributes
//! of the virtual terminal the remote chat program draws into.
//!
//! Besides the visible grid, the screen buffer keeps a bounded log of
//! *settled* rows: rows the cursor left through a line feed, or written rows
//! that scrolled off the top of the scroll region. Each record captures the
//! row text at the moment it settled, keyed by `(epoch, index)`. Clearing the
//! screen starts a new epoch.

use std::collections::VecDeque;

use bitflags::bitflags;
use unicode_width::UnicodeWidthChar;

/// Default number of settle records kept for the line tracker
pub const DEFAULT_SETTLE_LIMIT: usize = 1024;

/// Terminal state holding all screen data
pub struct TerminalState {
    pub cols: u16,
    pub rows: u16,
    pub screen: ScreenBuffer,
    pub cursor: CursorState,
    pub current_attrs: CellAttrs,
    pub modes: TerminalModes,
    pub title: String,
    /// Scroll region (top, bottom) - 0-indexed, inclusive
    pub scroll_region: (u16, u16),
}

impl TerminalState {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self::with_settle_limit(cols, rows, DEFAULT_SETTLE_LIMIT)
    }

    pub fn with_settle_limit(cols: u16, rows: u16, settle_limit: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            screen: ScreenBuffer::new(cols, rows, settle_limit),
            cursor: CursorState::default(),
            current_attrs: CellAttrs::default(),
            modes: TerminalModes::default(),
            title: String::new(),
            scroll_region: (0, rows - 1),
        }
    }

    /// Full reset (RIS). The settle log survives so nothing already settled is lost.
    pub fn reset(&mut self) {
        let cols = self.cols;
        self.screen.begin_epoch();
        for row in &mut self.screen.rows {
            *row = Row::new(cols);
        }
        self.cursor = CursorState::default();
        self.current_attrs = CellAttrs::default();
        self.modes = TerminalModes::default();
        self.title.clear();
        self.scroll_region = (0, self.rows - 1);
    }

    /// Put a character at the current cursor position
    pub fn put_char(&mut self, ch: char) {
        let width = ch.width().unwrap_or(0) as u16;

        if width == 0 {
            // Combining character - append to previous cell
            self.append_to_previous_cell(ch);
            return;
        }

        // Wide char that doesn't fit in the last column wraps early
        if width == 2 && self.cursor.col + 1 == self.cols && self.modes.auto_wrap {
            self.wrap_line();
        }

        if self.cursor.col >= self.cols {
            if self.modes.auto_wrap {
                self.wrap_line();
            } else {
                self.cursor.col = self.cols - 1;
            }
        }

        let row = self.cursor.row as usize;
        let col = self.cursor.col as usize;
        if col >= self.cols as usize {
            return;
        }

        self.handle_wide_char_overwrite(row, col);

        let attrs = self.current_attrs.clone();
        let cols = self.cols as usize;
        let line = &mut self.screen.rows[row];

        line.cells[col] = Cell {
            grapheme: ch.to_string(),
            width: width as u8,
            attrs: attrs.clone(),
        };

        // For wide characters, mark next cell as continuation (only if it fits)
        if width == 2 && col + 1 < cols {
            line.cells[col + 1] = Cell::continuation(&attrs);
        }
        line.touched = true;

        // Without auto-wrap a wide char in the last column still stops at the margin
        self.cursor.col = (self.cursor.col + width).min(self.cols);
    }

    fn append_to_previous_cell(&mut self, ch: char) {
        let row = self.cursor.row as usize;
        let col = self.cursor.col as usize;

        if col > 0 {
            let line = &mut self.screen.rows[row];
            let mut target = col - 1;
            // Skip back over a wide character's continuation half
            if target > 0 && line.cells[target].is_continuation() {
                target -= 1;
            }
            line.cells[target].grapheme.push(ch);
        }
    }

    fn handle_wide_char_overwrite(&mut self, row: usize, col: usize) {
        let attrs = self.current_attrs.clone();
        let cols = self.cols as usize;
        let line = &mut self.screen.rows[row];

        // Overwriting the right half of a wide char
        if col > 0 && line.cells[col].is_continuation() {
            line.cells[col - 1] = Cell::blank(&attrs);
        }

        // Overwriting the left half of a wide char
        if line.cells[col].width == 2 && col + 1 < cols {
            line.cells[col + 1] = Cell::blank(&attrs);
        }
    }

    /// Auto-wrap: carry the full row into the next one instead of settling it
    fn wrap_line(&mut self) {
        let row = self.cursor.row as usize;
        self.screen.carry_row(row);
        self.cursor.col = 0;
        self.advance_row();
    }

    /// Move down one row, scrolling the region when at its bottom
    fn advance_row(&mut self) {
        let scroll_bottom = self.scroll_region.1;
        if self.cursor.row == scroll_bottom {
            self.scroll_up(1);
        } else if self.cursor.row < self.rows - 1 {
            self.cursor.row += 1;
        }
    }

    /// Carriage return - move cursor to column 0
    pub fn carriage_return(&mut self) {
        self.cursor.col = 0;
    }

    /// Line feed - settle the current row, move cursor down, scroll if needed
    pub fn linefeed(&mut self) {
        let row = self.cursor.row as usize;
        self.screen.settle_row(row);
        self.advance_row();
        if self.modes.linefeed_newline {
            self.cursor.col = 0;
        }
    }

    /// Backspace - move cursor left
    pub fn backspace(&mut self) {
        if self.cursor.col >= self.cols {
            self.cursor.col = self.cols - 1;
        }
        self.cursor.col = self.cursor.col.saturating_sub(1);
    }

    /// Horizontal tab
    pub fn horizontal_tab(&mut self) {
        // Move to next tab stop (every 8 columns)
        let next = ((self.cursor.col / 8) + 1) * 8;
        self.cursor.col = next.min(self.cols - 1);
    }

    /// Scroll the region up by n lines
    pub fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;

        for _ in 0..n {
            let removed = self.screen.rows.remove(top as usize);
            self.screen.record_unsettled(&removed);
            self.screen.rows.insert(bottom as usize, Row::new(cols));
        }
    }

    /// Scroll the region down by n lines
    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;

        for _ in 0..n {
            self.screen.rows.remove(bottom as usize);
            self.screen.rows.insert(top as usize, Row::new(cols));
        }
    }

    /// Cursor up
    pub fn cursor_up(&mut self, n: u16) {
        self.cursor.row = self.cursor.row.saturating_sub(n);
    }

    /// Cursor down
    pub fn cursor_down(&mut self, n: u16) {
        self.cursor.row = self.cursor.row.saturating_add(n).min(self.rows - 1);
    }

    /// Cursor forward (right)
    pub fn cursor_forward(&mut self, n: u16) {
        self.cursor.col = self.cursor.col.saturating_add(n).min(self.cols - 1);
    }

    /// Cursor backward (left)
    pub fn cursor_backward(&mut self, n: u16) {
        self.cursor.col = self.cursor.col.min(self.cols - 1).saturating_sub(n);
    }

    /// Set cursor column (1-indexed parameter)
    pub fn cursor_column(&mut self, col: u16) {
        self.cursor.col = col.saturating_sub(1).min(self.cols - 1);
    }

    /// Set cursor row (1-indexed parameter)
    pub fn cursor_row(&mut self, row: u16) {
        self.cursor.row = row.saturating_sub(1).min(self.rows - 1);
        self.screen.drop_carry();
    }

    /// Set cursor position (1-indexed parameters)
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        self.cursor_row(row);
        self.cursor_column(col);
    }

    /// Erase in display
    pub fn erase_in_display(&mut self, mode: u16) {
        let attrs = self.current_attrs.clone();
        let cursor_row = self.cursor.row as usize;

        match mode {
            0 => {
                // From cursor to end
                self.erase_in_line(0);
                for row in self.screen.rows.iter_mut().skip(cursor_row + 1) {
                    row.clear(&attrs);
                }
            }
            1 => {
                // From start to cursor
                for row in self.screen.rows.iter_mut().take(cursor_row) {
                    row.clear(&attrs);
                }
                self.erase_in_line(1);
            }
            2 | 3 => {
                // Entire screen
                self.screen.begin_epoch();
                for row in &mut self.screen.rows {
                    row.clear(&attrs);
                }
            }
            _ => {}
        }
    }

    /// Erase in line
    pub fn erase_in_line(&mut self, mode: u16) {
        let cursor_col = self.cursor.col as usize;
        let attrs = self.current_attrs.clone();
        let row = &mut self.screen.rows[self.cursor.row as usize];

        match mode {
            0 => {
                for cell in row.cells.iter_mut().skip(cursor_col) {
                    cell.clear(&attrs);
                }
            }
            1 => {
                for cell in row.cells.iter_mut().take(cursor_col + 1) {
                    cell.clear(&attrs);
                }
            }
            2 => row.clear(&attrs),
            _ => {}
        }
        row.refresh_if_blank();
    }

    /// Erase n characters from the cursor (ECH)
    pub fn erase_chars(&mut self, n: u16) {
        let col = self.cursor.col as usize;
        let attrs = self.current_attrs.clone();
        let row = &mut self.screen.rows[self.cursor.row as usize];
        for cell in row.cells.iter_mut().skip(col).take(n as usize) {
            cell.clear(&attrs);
        }
        row.refresh_if_blank();
    }

    /// Insert n blank characters at the cursor (ICH)
    pub fn insert_chars(&mut self, n: u16) {
        let col = self.cursor.col as usize;
        let row = &mut self.screen.rows[self.cursor.row as usize];
        for _ in 0..n {
            if col < row.cells.len() {
                row.cells.pop();
                row.cells.insert(col, Cell::default());
            }
        }
    }

    /// Delete n characters at the cursor, shifting the rest left (DCH)
    pub fn delete_chars(&mut self, n: u16) {
        let col = self.cursor.col as usize;
        let row = &mut self.screen.rows[self.cursor.row as usize];
        for _ in 0..n {
            if col < row.cells.len() {
                row.cells.remove(col);
                row.cells.push(Cell::default());
            }
        }
        row.refresh_if_blank();
    }

    /// Insert lines at cursor position
    pub fn insert_lines(&mut self, n: u16) {
        let cursor_row = self.cursor.row as usize;
        let (_, bottom) = self.scroll_region;
        let cols = self.cols;

        if cursor_row > bottom as usize {
            return;
        }
        for _ in 0..n {
            self.screen.rows.remove(bottom as usize);
            self.screen.rows.insert(cursor_row, Row::new(cols));
        }
    }

    /// Delete lines at cursor position
    ///
    /// At the top of the scroll region this scrolls, so rows pushed out are
    /// recorded like [`scroll_up`](Self::scroll_up) records them.
    pub fn delete_lines(&mut self, n: u16) {
        let cursor_row = self.cursor.row as usize;
        let (top, bottom) = self.scroll_region;
        let cols = self.cols;

        if cursor_row > bottom as usize {
            return;
        }
        for _ in 0..n {
            let removed = self.screen.rows.remove(cursor_row);
            if cursor_row == top as usize {
                self.screen.record_unsettled(&removed);
            }
            self.screen.rows.insert(bottom as usize, Row::new(cols));
        }
    }

    /// Set scroll region (1-indexed parameters)
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let rows = self.rows;
        let top = top.saturating_sub(1).min(rows - 1);
        let bottom = bottom.saturating_sub(1).min(rows - 1);
        if top < bottom {
            self.scroll_region = (top, bottom);
        }
    }

    /// Save cursor position (pushes onto the saved-position stack)
    pub fn save_cursor(&mut self) {
        let saved = SavedCursor {
            col: self.cursor.col,
            row: self.cursor.row,
            attrs: self.current_attrs.clone(),
        };
        if self.cursor.saved.len() == MAX_SAVED_CURSORS {
            self.cursor.saved.remove(0);
        }
        self.cursor.saved.push(saved);
    }

    /// Restore cursor position
    ///
    /// The bottom entry of the stack is kept so that repeated restores after a
    /// single save keep returning to the same position.
    pub fn restore_cursor(&mut self) {
        let saved = if self.cursor.saved.len() > 1 {
            self.cursor.saved.pop()
        } else {
            self.cursor.saved.last().cloned()
        };
        if let Some(saved) = saved {
            self.cursor.col = saved.col.min(self.cols);
            self.cursor.row = saved.row.min(self.rows - 1);
            self.current_attrs = saved.attrs;
            self.screen.drop_carry();
        }
    }

    /// Set private mode
    pub fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            7 => self.modes.auto_wrap = enable,
            25 => self.cursor.visible = enable,
            _ => tracing::debug!("ignoring private mode {} = {}", mode, enable),
        }
    }

    /// Reverse index - cursor up, scroll if at top
    pub fn reverse_index(&mut self) {
        if self.cursor.row == self.scroll_region.0 {
            self.scroll_down(1);
        } else {
            self.cursor_up(1);
        }
    }

    /// Index - cursor down, scroll if at bottom
    pub fn index(&mut self) {
        self.linefeed();
    }

    /// Rendered rows, top to bottom, trailing blanks trimmed
    pub fn render(&self) -> Vec<String> {
        self.screen.rows.iter().map(|row| row.text().trim_end().to_string()).collect()
    }

    /// Text of the row holding the cursor (prompts and local echo live here)
    pub fn cursor_line(&self) -> String {
        self.screen.rows[self.cursor.row as usize].text().trim_end().to_string()
    }
}

/// Upper bound on nested cursor saves
const MAX_SAVED_CURSORS: usize = 16;

/// A row captured when it settled
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettledRow {
    /// Screen epoch (bumped on every full clear)
    pub epoch: u64,
    /// Position within the epoch
    pub index: u64,
    /// Row text, trailing blanks trimmed
    pub text: String,
}

impl SettledRow {
    /// Ordering key used by the line tracker watermark
    pub fn key(&self) -> (u64, u64) {
        (self.epoch, self.index)
    }
}

/// Screen buffer with the settle log
pub struct ScreenBuffer {
    /// Visible rows
    pub rows: Vec<Row>,
    /// Settled rows, oldest first
    settled: VecDeque<SettledRow>,
    settle_limit: usize,
    epoch: u64,
    next_index: u64,
    /// Text of auto-wrapped rows waiting for the row that ends the line
    carry: String,
}

impl ScreenBuffer {
    pub fn new(cols: u16, rows: u16, settle_limit: usize) -> Self {
        Self {
            rows: (0..rows).map(|_| Row::new(cols)).collect(),
            settled: VecDeque::new(),
            settle_limit: settle_limit.max(1),
            epoch: 0,
            next_index: 0,
            carry: String::new(),
        }
    }

    /// Settle a row the cursor is leaving through a line feed
    pub fn settle_row(&mut self, row: usize) {
        let line = &mut self.rows[row];
        if line.settled {
            self.carry.clear();
            return;
        }
        line.settled = true;
        let mut text = std::mem::take(&mut self.carry);
        text.push_str(&line.text());
        self.record(text);
    }

    /// Remember an auto-wrapped row so it is joined with its continuation
    pub fn carry_row(&mut self, row: usize) {
        let line = &mut self.rows[row];
        line.wrapped = true;
        if !line.settled {
            line.settled = true;
            self.carry.push_str(&line.text());
        }
    }

    pub fn drop_carry(&mut self) {
        self.carry.clear();
    }

    /// Record a row leaving the screen if it was written but never settled
    fn record_unsettled(&mut self, row: &Row) {
        if row.touched && !row.settled {
            self.record(row.text());
        }
    }

    /// Append a settle record
    pub fn record(&mut self, text: String) {
        let text = text.trim_end().to_string();
        self.settled.push_back(SettledRow {
            epoch: self.epoch,
            index: self.next_index,
            text,
        });
        self.next_index += 1;
        while self.settled.len() > self.settle_limit {
            self.settled.pop_front();
        }
    }

    /// Start a new epoch (full screen clear)
    pub fn begin_epoch(&mut self) {
        self.epoch += 1;
        self.next_index = 0;
        self.carry.clear();
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Settle records still retained, oldest first
    pub fn settled(&self) -> &VecDeque<SettledRow> {
        &self.settled
    }
}

/// A single row
pub struct Row {
    pub cells: Vec<Cell>,
    /// Row ended by auto-wrap rather than a line feed
    pub wrapped: bool,
    /// Row already captured in the settle log (or carried into the next row)
    pub settled: bool,
    /// Something has been written to the row since it was last blank
    pub touched: bool,
}

impl Row {
    pub fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            wrapped: false,
            settled: false,
            touched: false,
        }
    }

    pub fn clear(&mut self, attrs: &CellAttrs) {
        for cell in &mut self.cells {
            cell.clear(attrs);
        }
        self.wrapped = false;
        self.settled = false;
        self.touched = false;
    }

    /// A row erased back to blanks is fresh again and may settle anew
    fn refresh_if_blank(&mut self) {
        if self.is_blank() {
            self.wrapped = false;
            self.settled = false;
            self.touched = false;
        }
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.grapheme.is_empty() || c.grapheme == " ")
    }

    /// Row text without trimming (continuation cells skipped)
    pub fn text(&self) -> String {
        let mut out = String::with_capacity(self.cells.len());
        for cell in &self.cells {
            if !cell.is_continuation() {
                out.push_str(cell.display_char());
            }
        }
        out
    }
}

/// A single cell
#[derive(Clone, Debug)]
pub struct Cell {
    pub grapheme: String,
    pub width: u8,
    pub attrs: CellAttrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            attrs: CellAttrs::default(),
        }
    }
}

impl Cell {
    pub fn blank(attrs: &CellAttrs) -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            attrs: attrs.clone(),
        }
    }

    pub fn clear(&mut self, attrs: &CellAttrs) {
        self.grapheme.clear();
        self.width = 1;
        self.attrs = attrs.clone();
    }

    pub fn continuation(attrs: &CellAttrs) -> Self {
        Self {
            grapheme: String::new(),
            width: 0,
            attrs: attrs.clone(),
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }

    /// Get the display character (space if empty)
    pub fn display_char(&self) -> &str {
        if self.grapheme.is_empty() {
            " "
        } else {
            &self.grapheme
        }
    }
}

/// Cell attributes
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CellAttrs {
    pub fg: Color,
    pub bg: Color,
    pub flags: AttrFlags,
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Color definition
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Color {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct AttrFlags: u16 {
        const BOLD          = 0b0000_0000_0001;
        const DIM           = 0b0000_0000_0010;
        const ITALIC        = 0b0000_0000_0100;
        const UNDERLINE     = 0b0000_0000_1000;
        const BLINK         = 0b0000_0001_0000;
        const INVERSE       = 0b0000_0010_0000;
        const HIDDEN        = 0b0000_0100_0000;
        const STRIKETHROUGH = 0b0000_1000_0000;
    }
}

/// Cursor state
#[derive(Clone, Debug)]
pub struct CursorState {
    pub col: u16,
    pub row: u16,
    pub visible: bool,
    pub saved: Vec<SavedCursor>,
}

impl Default for CursorState {
    fn default() -> Self {
        Self {
            col: 0,
            row: 0,
            visible: true,
            saved: Vec::new(),
        }
    }
}

/// Saved cursor state
#[derive(Clone, Debug)]
pub struct SavedCursor {
    pub col: u16,
    pub row: u16,
    pub attrs: CellAttrs,
}

/// Terminal modes
#[derive(Clone, Debug)]
pub struct TerminalModes {
    pub auto_wrap: bool,
    pub insert_mode: bool,
    pub linefeed_newline: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            auto_wrap: true,
            insert_mode: false,
            linefeed_newline: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(state: &mut TerminalState, text: &str) {
        for ch in text.chars() {
            match ch {
                '\r' => state.carriage_return(),
                '\n' => state.linefeed(),
                c => state.put_char(c),
            }
        }
    }

    fn settled_texts(state: &TerminalState) -> Vec<String> {
        state.screen.settled().iter().map(|r| r.text.clone()).collect()
    }

    #[test]
    fn test_linefeed_settles_row() {
        let mut state = TerminalState::new(20, 4);
        write(&mut state, "hello\r\nworld");

        assert_eq!(settled_texts(&state), vec!["hello"]);
        assert_eq!(state.cursor_line(), "world");
    }

    #[test]
    fn test_scroll_keeps_cursor_at_bottom() {
        let mut state = TerminalState::new(10, 3);
        write(&mut state, "a\r\nb\r\nc\r\nd\r\n");

        assert_eq!(state.cursor.row, 2);
        assert_eq!(state.render(), vec!["c", "d", ""]);
        assert_eq!(settled_texts(&state), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_wide_char_at_margin_without_autowrap() {
        let mut state = TerminalState::new(4, 2);
        state.set_private_mode(7, false);
        write(&mut state, "abc你");

        assert_eq!(state.cursor.col, 4);
        assert_eq!(state.cursor.row, 0);

        write(&mut state, "x");
        assert!(state.cursor.col <= state.cols);
        assert_eq!(state.cursor.row, 0);
    }

    #[test]
    fn test_delete_lines_at_region_top_records_row() {
        let mut state = TerminalState::new(10, 3);
        write(&mut state, "msg\r");

        state.delete_lines(1);
        assert_eq!(settled_texts(&state), vec!["msg"]);
        assert_eq!(state.render()[0], "");

        // Below the top, deleted rows are just erased
        write(&mut state, "top\r\nmid\r");
        state.delete_lines(1);
        assert_eq!(settled_texts(&state), vec!["msg", "top"]);
    }

    #[test]
    fn test_autowrap_joins_rows() {
        let mut state = TerminalState::new(5, 3);
        write(&mut state, "abcdefgh\r\n");

        assert_eq!(state.render()[0], "abcde");
        assert_eq!(state.render()[1], "fgh");
        assert_eq!(settled_texts(&state), vec!["abcdefgh"]);
    }

    #[test]
    fn test_overwritten_settled_row_not_settled_again() {
        let mut state = TerminalState::new(10, 4);
        write(&mut state, "one\r\n");
        state.cursor_position(1, 1);
        write(&mut state, "ONE\r\n");

        assert_eq!(settled_texts(&state), vec!["one"]);
    }

    #[test]
    fn test_erased_row_is_fresh() {
        let mut state = TerminalState::new(10, 4);
        write(&mut state, "one\r\n");
        state.cursor_position(1, 1);
        state.erase_in_line(2);
        write(&mut state, "two\r\n");

        assert_eq!(settled_texts(&state), vec!["one", "two"]);
    }

    #[test]
    fn test_clear_starts_new_epoch() {
        let mut state = TerminalState::new(10, 4);
        write(&mut state, "one\r\n");
        state.erase_in_display(2);
        state.cursor_position(1, 1);
        write(&mut state, "two\r\n");

        let keys: Vec<_> = state.screen.settled().iter().map(SettledRow::key).collect();
        assert_eq!(keys, vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn test_wide_chars_take_two_cells() {
        let mut state = TerminalState::new(10, 2);
        write(&mut state, "你好");

        assert_eq!(state.cursor.col, 4);
        assert_eq!(state.cursor_line(), "你好");
    }

    #[test]
    fn test_saved_cursor_stack() {
        let mut state = TerminalState::new(10, 5);
        state.cursor_position(2, 3);
        state.save_cursor();
        state.cursor_position(4, 5);
        state.save_cursor();
        state.cursor_position(1, 1);

        state.restore_cursor();
        assert_eq!((state.cursor.row, state.cursor.col), (3, 4));
        state.restore_cursor();
        assert_eq!((state.cursor.row, state.cursor.col), (1, 2));
        state.cursor_position(5, 5);
        state.restore_cursor();
        assert_eq!((state.cursor.row, state.cursor.col), (1, 2));
    }

    #[test]
    fn test_cursor_column_may_reach_width() {
        let mut state = TerminalState::new(4, 2);
        write(&mut state, "abcd");

        assert_eq!(state.cursor.col, 4);
        assert_eq!(state.cursor.row, 0);
    }
}
