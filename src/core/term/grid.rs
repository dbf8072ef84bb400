//! Terminal grid
//!
//! Fixed rows x columns character grid with a cursor. There is no scrollback
//! and no attribute tracking; a line feed on the last row drops the top line.

use unicode_width::UnicodeWidthChar;

/// Stored in the right half of a double-width character
const WIDE_TAIL: char = '\0';
const BLANK: char = ' ';

/// Cursor position, 0-indexed.
///
/// `col` may equal the column count: that is the pending-wrap position right
/// after a character was written into the last column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    pub row: u16,
    pub col: u16,
}

/// Character grid plus cursor state
#[derive(Clone, Debug)]
pub struct TerminalGrid {
    rows: u16,
    cols: u16,
    lines: Vec<Line>,
    cursor: Cursor,
    saved: Option<Cursor>,
    /// DECAWM, on by default
    pub auto_wrap: bool,
}

impl TerminalGrid {
    /// Create a blank grid. Zero dimensions are bumped to one so the cursor
    /// always has a cell to sit on.
    pub fn new(rows: u16, cols: u16) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        Self {
            rows,
            cols,
            lines: (0..rows).map(|_| Line::new(cols)).collect(),
            cursor: Cursor::default(),
            saved: None,
            auto_wrap: true,
        }
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn columns(&self) -> u16 {
        self.cols
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Character at (row, col); blank outside the grid and for the right
    /// half of a wide character.
    pub fn cell_at(&self, row: u16, col: u16) -> char {
        match self
            .lines
            .get(row as usize)
            .and_then(|line| line.cells.get(col as usize))
        {
            Some(&WIDE_TAIL) | None => BLANK,
            Some(&ch) => ch,
        }
    }

    /// Text of one row with trailing blanks trimmed
    pub fn line_text(&self, row: u16) -> String {
        let Some(line) = self.lines.get(row as usize) else {
            return String::new();
        };
        let text: String = line.cells.iter().filter(|&&c| c != WIDE_TAIL).collect();
        text.trim_end().to_string()
    }

    /// Reallocate the grid. Content is discarded, the cursor goes home.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        *self = Self::new(rows, cols);
    }

    /// RIS - full reset keeping the current size
    pub fn reset(&mut self) {
        self.resize(self.rows, self.cols);
    }

    /// Put a character at the cursor and advance it
    pub fn put_char(&mut self, ch: char) {
        let width = ch.width().unwrap_or(0) as u16;
        if width == 0 {
            return;
        }

        if self.cursor.col + width > self.cols {
            if self.auto_wrap && self.cursor.col > 0 {
                self.cursor.col = 0;
                self.linefeed();
            } else {
                self.cursor.col = self.cols.saturating_sub(width);
            }
        }

        let row = self.cursor.row as usize;
        let col = self.cursor.col as usize;
        self.clear_wide_overlap(row, col);
        self.lines[row].cells[col] = ch;

        if width == 2 && col + 1 < self.cols as usize {
            self.clear_wide_overlap(row, col + 1);
            self.lines[row].cells[col + 1] = WIDE_TAIL;
        }

        self.cursor.col = (self.cursor.col + width).min(self.cols);
    }

    /// Blank the other half of a wide character about to be overwritten
    fn clear_wide_overlap(&mut self, row: usize, col: usize) {
        let cells = &mut self.lines[row].cells;
        if cells[col] == WIDE_TAIL && col > 0 {
            cells[col - 1] = BLANK;
        }
        if col + 1 < cells.len() && cells[col + 1] == WIDE_TAIL {
            cells[col + 1] = BLANK;
        }
    }

    /// Carriage return - move cursor to column 0
    pub fn carriage_return(&mut self) {
        self.cursor.col = 0;
    }

    /// Line feed - move cursor down, scroll at the bottom row
    pub fn linefeed(&mut self) {
        if self.cursor.row + 1 >= self.rows {
            self.scroll_up(1);
        } else {
            self.cursor.row += 1;
        }
    }

    /// Backspace - move cursor left, never past column 0
    pub fn backspace(&mut self) {
        if self.cursor.col >= self.cols {
            // Leaving the pending-wrap position lands on the last column
            self.cursor.col = self.cols - 1;
        } else {
            self.cursor.col = self.cursor.col.saturating_sub(1);
        }
    }

    /// Horizontal tab to the next multiple of 8
    pub fn horizontal_tab(&mut self) {
        let next = ((self.cursor.col / 8) + 1) * 8;
        self.cursor.col = next.min(self.cols - 1);
    }

    /// Scroll the whole grid up by n lines
    pub fn scroll_up(&mut self, n: u16) {
        for _ in 0..n.min(self.rows) {
            self.lines.remove(0);
            self.lines.push(Line::new(self.cols));
        }
    }

    /// Scroll the whole grid down by n lines
    pub fn scroll_down(&mut self, n: u16) {
        for _ in 0..n.min(self.rows) {
            self.lines.pop();
            self.lines.insert(0, Line::new(self.cols));
        }
    }

    pub fn cursor_up(&mut self, n: u16) {
        self.cursor.row = self.cursor.row.saturating_sub(n);
    }

    pub fn cursor_down(&mut self, n: u16) {
        self.cursor.row = self.cursor.row.saturating_add(n).min(self.rows - 1);
    }

    pub fn cursor_forward(&mut self, n: u16) {
        self.cursor.col = self.cursor.col.saturating_add(n).min(self.cols - 1);
    }

    pub fn cursor_backward(&mut self, n: u16) {
        let col = self.cursor.col.min(self.cols - 1);
        self.cursor.col = col.saturating_sub(n);
    }

    /// Set cursor position (1-indexed parameters)
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        self.cursor.row = row.saturating_sub(1).min(self.rows - 1);
        self.cursor.col = col.saturating_sub(1).min(self.cols - 1);
    }

    /// CHA - absolute column (1-indexed)
    pub fn set_column(&mut self, col: u16) {
        self.cursor.col = col.saturating_sub(1).min(self.cols - 1);
    }

    /// VPA - absolute row (1-indexed)
    pub fn set_row(&mut self, row: u16) {
        self.cursor.row = row.saturating_sub(1).min(self.rows - 1);
    }

    /// Erase in display
    pub fn erase_in_display(&mut self, mode: u16) {
        let cursor_row = self.cursor.row as usize;
        match mode {
            0 => {
                self.erase_in_line(0);
                for line in self.lines.iter_mut().skip(cursor_row + 1) {
                    line.clear();
                }
            }
            1 => {
                for line in self.lines.iter_mut().take(cursor_row) {
                    line.clear();
                }
                self.erase_in_line(1);
            }
            2 | 3 => {
                for line in &mut self.lines {
                    line.clear();
                }
            }
            _ => {}
        }
    }

    /// Erase in line
    pub fn erase_in_line(&mut self, mode: u16) {
        let cols = self.cols as usize;
        let col = (self.cursor.col as usize).min(cols - 1);
        let cells = &mut self.lines[self.cursor.row as usize].cells;

        let range = match mode {
            0 => col..cols,
            1 => 0..col + 1,
            2 => 0..cols,
            _ => return,
        };
        for cell in &mut cells[range] {
            *cell = BLANK;
        }
    }

    /// Save cursor position
    pub fn save_cursor(&mut self) {
        self.saved = Some(self.cursor);
    }

    /// Restore cursor position
    pub fn restore_cursor(&mut self) {
        if let Some(saved) = self.saved {
            self.cursor.row = saved.row.min(self.rows - 1);
            self.cursor.col = saved.col.min(self.cols);
        }
    }

    /// Index - cursor down, scroll if at bottom
    pub fn index(&mut self) {
        self.linefeed();
    }

    /// Reverse index - cursor up, scroll if at top
    pub fn reverse_index(&mut self) {
        if self.cursor.row == 0 {
            self.scroll_down(1);
        } else {
            self.cursor_up(1);
        }
    }
}

/// A single row of cells
#[derive(Clone, Debug)]
struct Line {
    cells: Vec<char>,
}

impl Line {
    fn new(cols: u16) -> Self {
        Self {
            cells: vec![BLANK; cols as usize],
        }
    }

    fn clear(&mut self) {
        self.cells.fill(BLANK);
    }
}
