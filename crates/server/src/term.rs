// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Minimal VT interpreter feeding the session grid.
//!
//! Just enough emulation to keep render-ready snapshots: cursor motion,
//! erase/insert/delete, SGR attributes (16/256/truecolor), scrolling into
//! bounded scrollback, and wide characters. Sequences outside that set are
//! parsed and dropped. Input may arrive in arbitrary chunks; a partial
//! UTF-8 sequence at a chunk boundary is buffered for the next call.

use unicode_width::UnicodeWidthChar;
use vibetunnel_protocol::grid::{Cell, Color, Grid};

#[derive(Debug, Clone, Copy, Default)]
struct Pen {
    fg: Option<Color>,
    bg: Option<Color>,
    bold: bool,
    italic: bool,
    underline: bool,
    inverse: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Ground,
    Escape,
    Csi,
    Osc,
    OscEsc,
    Charset,
}

const MAX_PARAMS: usize = 16;

pub struct Terminal {
    grid: Grid,
    pen: Pen,
    state: ParseState,
    params: Vec<u16>,
    current_param: Option<u16>,
    private: bool,
    saved_cursor: Option<(u16, u16)>,
    /// Incomplete trailing UTF-8 bytes from the previous `feed`.
    utf8_buf: [u8; 3],
    utf8_len: u8,
    seq: u64,
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("cols", &self.grid.cols())
            .field("rows", &self.grid.rows())
            .field("seq", &self.seq)
            .finish()
    }
}

impl Terminal {
    pub fn new(cols: u16, rows: u16, scrollback: usize) -> Self {
        Self {
            grid: Grid::new(cols, rows).with_scrollback(scrollback),
            pen: Pen::default(),
            state: ParseState::Ground,
            params: Vec::new(),
            current_param: None,
            private: false,
            saved_cursor: None,
            utf8_buf: [0; 3],
            utf8_len: 0,
            seq: 0,
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Monotonic change counter, bumped by `feed` and `resize`.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn text(&self) -> String {
        self.grid.text()
    }

    /// Advance the emulator with raw output bytes.
    pub fn feed(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let buffered = self.utf8_len as usize;
        let owned: Vec<u8>;
        let input = if buffered == 0 {
            data
        } else {
            owned = [&self.utf8_buf[..buffered], data].concat();
            self.utf8_len = 0;
            &owned
        };

        let tail = incomplete_utf8_tail_len(input);
        let (to_feed, to_buffer) = input.split_at(input.len() - tail);
        if !to_buffer.is_empty() {
            self.utf8_buf[..to_buffer.len()].copy_from_slice(to_buffer);
            self.utf8_len = to_buffer.len() as u8;
        }

        for ch in String::from_utf8_lossy(to_feed).chars() {
            self.process(ch);
        }
        self.seq += 1;
    }

    /// Resize the terminal (e.g. from an `"r"` recording event).
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.grid.resize(cols, rows);
        self.seq += 1;
    }

    /// Drop all state back to a blank grid (clear-offset jumps).
    pub fn reset(&mut self) {
        self.grid.clear_scrollback();
        self.grid.clear_viewport();
        self.grid.cursor_x = 0;
        self.grid.cursor_y = 0;
        self.grid.cursor_visible = true;
        self.pen = Pen::default();
        self.state = ParseState::Ground;
        self.saved_cursor = None;
        self.utf8_len = 0;
        self.seq += 1;
    }

    fn process(&mut self, ch: char) {
        match self.state {
            ParseState::Ground => self.process_ground(ch),
            ParseState::Escape => self.process_escape(ch),
            ParseState::Csi => self.process_csi_byte(ch),
            ParseState::Osc => match ch {
                '\u{7}' => self.state = ParseState::Ground,
                '\u{1b}' => self.state = ParseState::OscEsc,
                _ => {}
            },
            ParseState::OscEsc => match ch {
                '\\' => self.state = ParseState::Ground,
                '\u{1b}' => {}
                _ => self.state = ParseState::Osc,
            },
            ParseState::Charset => self.state = ParseState::Ground,
        }
    }

    fn process_ground(&mut self, ch: char) {
        match ch {
            '\u{1b}' => self.state = ParseState::Escape,
            '\r' => self.grid.cursor_x = 0,
            '\n' | '\u{b}' | '\u{c}' => self.linefeed(),
            '\u{8}' => self.grid.cursor_x = self.grid.cursor_x.saturating_sub(1),
            '\t' => {
                let next = (self.grid.cursor_x / 8 + 1) * 8;
                self.grid.cursor_x = next.min(self.grid.cols() - 1);
            }
            '\u{7}' => {}
            ch if (ch as u32) < 0x20 => {}
            ch => self.print(ch),
        }
    }

    fn process_escape(&mut self, ch: char) {
        self.state = ParseState::Ground;
        match ch {
            '[' => {
                self.params.clear();
                self.current_param = None;
                self.private = false;
                self.state = ParseState::Csi;
            }
            ']' => self.state = ParseState::Osc,
            '(' | ')' => self.state = ParseState::Charset,
            '7' => self.saved_cursor = Some((self.grid.cursor_x, self.grid.cursor_y)),
            '8' => self.restore_cursor(),
            'D' => self.linefeed(),
            'E' => {
                self.grid.cursor_x = 0;
                self.linefeed();
            }
            'M' => self.reverse_linefeed(),
            'c' => {
                self.reset();
            }
            _ => {}
        }
    }

    fn process_csi_byte(&mut self, ch: char) {
        match ch {
            '0'..='9' => {
                let digit = ch as u16 - '0' as u16;
                let value = self.current_param.unwrap_or(0);
                self.current_param = Some(value.saturating_mul(10).saturating_add(digit).min(9999));
            }
            // Colon subparameters (SGR 38:5:n style) are flattened.
            ';' | ':' => {
                if self.params.len() < MAX_PARAMS {
                    self.params.push(self.current_param.take().unwrap_or(0));
                } else {
                    self.current_param = None;
                }
            }
            '?' | '>' | '=' => self.private = true,
            ' '..='/' => {}
            '@'..='~' => {
                if let Some(param) = self.current_param.take() {
                    if self.params.len() < MAX_PARAMS {
                        self.params.push(param);
                    }
                }
                self.state = ParseState::Ground;
                self.dispatch_csi(ch);
            }
            _ => self.state = ParseState::Ground,
        }
    }

    fn param(&self, index: usize) -> u16 {
        self.params.get(index).copied().unwrap_or(0)
    }

    /// First parameter with 0 treated as 1 (the common CSI default).
    fn count(&self) -> u16 {
        self.param(0).max(1)
    }

    fn dispatch_csi(&mut self, action: char) {
        let cols = self.grid.cols();
        let rows = self.grid.rows();
        match action {
            'A' => self.grid.cursor_y = self.grid.cursor_y.saturating_sub(self.count()),
            'B' | 'e' => self.grid.cursor_y = (self.grid.cursor_y + self.count()).min(rows - 1),
            'C' | 'a' => self.grid.cursor_x = (self.grid.cursor_x + self.count()).min(cols - 1),
            'D' => self.grid.cursor_x = self.grid.cursor_x.saturating_sub(self.count()),
            'E' => {
                self.grid.cursor_x = 0;
                self.grid.cursor_y = (self.grid.cursor_y + self.count()).min(rows - 1);
            }
            'F' => {
                self.grid.cursor_x = 0;
                self.grid.cursor_y = self.grid.cursor_y.saturating_sub(self.count());
            }
            'G' | '`' => self.grid.cursor_x = (self.count() - 1).min(cols - 1),
            'H' | 'f' => {
                self.grid.cursor_y = (self.param(0).max(1) - 1).min(rows - 1);
                self.grid.cursor_x = (self.param(1).max(1) - 1).min(cols - 1);
            }
            'd' => self.grid.cursor_y = (self.count() - 1).min(rows - 1),
            'J' => self.erase_display(),
            'K' => self.erase_line(),
            'L' => self.grid.insert_rows(self.grid.cursor_y, self.count().min(rows)),
            'M' => self.grid.delete_rows(self.grid.cursor_y, self.count().min(rows)),
            '@' => self.insert_chars(),
            'P' => self.delete_chars(),
            'X' => self.erase_chars(),
            'S' => self.grid.scroll_up(self.count().min(rows)),
            'T' => self.grid.scroll_down(self.count().min(rows)),
            'm' => self.select_graphic_rendition(),
            'h' | 'l' => {
                if self.private && self.param(0) == 25 {
                    self.grid.cursor_visible = action == 'h';
                }
            }
            's' => self.saved_cursor = Some((self.grid.cursor_x, self.grid.cursor_y)),
            'u' => self.restore_cursor(),
            _ => {}
        }
    }

    fn restore_cursor(&mut self) {
        if let Some((x, y)) = self.saved_cursor {
            self.grid.cursor_x = x.min(self.grid.cols());
            self.grid.cursor_y = y.min(self.grid.rows() - 1);
        }
    }

    fn linefeed(&mut self) {
        if self.grid.cursor_y + 1 >= self.grid.rows() {
            self.grid.scroll_up(1);
        } else {
            self.grid.cursor_y += 1;
        }
    }

    fn reverse_linefeed(&mut self) {
        if self.grid.cursor_y == 0 {
            self.grid.scroll_down(1);
        } else {
            self.grid.cursor_y -= 1;
        }
    }

    fn print(&mut self, ch: char) {
        let width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width == 0 {
            // Combining marks and other zero-width input are dropped.
            return;
        }
        let cols = self.grid.cols();
        let needed = width as u16;
        if self.grid.cursor_x + needed > cols {
            self.grid.cursor_x = 0;
            self.linefeed();
        }

        let (x, y) = (self.grid.cursor_x, self.grid.cursor_y);
        *self.grid.cell_mut(x, y) = self.styled_cell(ch, width == 2);
        if width == 2 && x + 1 < cols {
            *self.grid.cell_mut(x + 1, y) = Cell { continuation: true, ..Cell::blank() };
        }
        self.grid.cursor_x = x + needed;
    }

    fn styled_cell(&self, ch: char, wide: bool) -> Cell {
        Cell {
            ch,
            fg: self.pen.fg,
            bg: self.pen.bg,
            bold: self.pen.bold,
            italic: self.pen.italic,
            underline: self.pen.underline,
            inverse: self.pen.inverse,
            wide,
            continuation: false,
        }
    }

    fn erase_display(&mut self) {
        let rows = self.grid.rows();
        match self.param(0) {
            0 => {
                self.erase_in_row(self.grid.cursor_x, self.grid.cols());
                for y in self.grid.cursor_y + 1..rows {
                    blank_row(&mut self.grid, y);
                }
            }
            1 => {
                self.erase_in_row(0, self.grid.cursor_x + 1);
                for y in 0..self.grid.cursor_y {
                    blank_row(&mut self.grid, y);
                }
            }
            2 => self.grid.clear_viewport(),
            3 => self.grid.clear_scrollback(),
            _ => {}
        }
    }

    fn erase_line(&mut self) {
        match self.param(0) {
            0 => self.erase_in_row(self.grid.cursor_x, self.grid.cols()),
            1 => self.erase_in_row(0, self.grid.cursor_x + 1),
            2 => self.erase_in_row(0, self.grid.cols()),
            _ => {}
        }
    }

    fn erase_in_row(&mut self, from: u16, to: u16) {
        let y = self.grid.cursor_y;
        let to = to.min(self.grid.cols());
        let row = self.grid.row_mut(y);
        for cell in &mut row.cells[from as usize..to as usize] {
            *cell = Cell::blank();
        }
    }

    fn insert_chars(&mut self) {
        let n = self.count().min(self.grid.cols()) as usize;
        let x = self.grid.cursor_x.min(self.grid.cols() - 1) as usize;
        let cols = self.grid.cols() as usize;
        let y = self.grid.cursor_y;
        let row = self.grid.row_mut(y);
        for _ in 0..n {
            row.cells.insert(x, Cell::blank());
        }
        row.cells.truncate(cols);
    }

    fn delete_chars(&mut self) {
        let n = self.count().min(self.grid.cols()) as usize;
        let x = self.grid.cursor_x.min(self.grid.cols() - 1) as usize;
        let cols = self.grid.cols() as usize;
        let y = self.grid.cursor_y;
        let row = self.grid.row_mut(y);
        let end = (x + n).min(row.cells.len());
        row.cells.drain(x..end);
        row.cells.resize(cols, Cell::blank());
    }

    fn erase_chars(&mut self) {
        let n = self.count();
        let from = self.grid.cursor_x;
        self.erase_in_row(from, from.saturating_add(n));
    }

    fn select_graphic_rendition(&mut self) {
        if self.params.is_empty() {
            self.pen = Pen::default();
            return;
        }
        let params = std::mem::take(&mut self.params);
        let mut i = 0;
        while i < params.len() {
            match params[i] {
                0 => self.pen = Pen::default(),
                1 => self.pen.bold = true,
                3 => self.pen.italic = true,
                4 => self.pen.underline = true,
                7 => self.pen.inverse = true,
                22 => self.pen.bold = false,
                23 => self.pen.italic = false,
                24 => self.pen.underline = false,
                27 => self.pen.inverse = false,
                30..=37 => self.pen.fg = Some(Color::Indexed((params[i] - 30) as u8)),
                39 => self.pen.fg = None,
                40..=47 => self.pen.bg = Some(Color::Indexed((params[i] - 40) as u8)),
                49 => self.pen.bg = None,
                90..=97 => self.pen.fg = Some(Color::Indexed((params[i] - 90 + 8) as u8)),
                100..=107 => self.pen.bg = Some(Color::Indexed((params[i] - 100 + 8) as u8)),
                38 => {
                    let (color, consumed) = extended_color(&params[i + 1..]);
                    self.pen.fg = color.or(self.pen.fg);
                    i += consumed;
                }
                48 => {
                    let (color, consumed) = extended_color(&params[i + 1..]);
                    self.pen.bg = color.or(self.pen.bg);
                    i += consumed;
                }
                _ => {}
            }
            i += 1;
        }
    }
}

/// Parse the tail of a `38;…`/`48;…` SGR: `5;n` or `2;r;g;b`.
/// Returns the color and how many parameters were consumed.
fn extended_color(rest: &[u16]) -> (Option<Color>, usize) {
    match rest.first() {
        Some(5) => match rest.get(1) {
            Some(&index) => (Some(Color::Indexed(index.min(255) as u8)), 2),
            None => (None, 1),
        },
        Some(2) => {
            if rest.len() >= 4 {
                let rgb = Color::Rgb(
                    rest[1].min(255) as u8,
                    rest[2].min(255) as u8,
                    rest[3].min(255) as u8,
                );
                (Some(rgb), 4)
            } else {
                (None, rest.len())
            }
        }
        _ => (None, 0),
    }
}

fn blank_row(grid: &mut Grid, y: u16) {
    let row = grid.row_mut(y);
    for cell in &mut row.cells {
        *cell = Cell::blank();
    }
}

/// Returns the number of trailing bytes that form an incomplete UTF-8
/// sequence, scanning backwards for a leading byte whose expected length
/// exceeds the bytes available.
fn incomplete_utf8_tail_len(data: &[u8]) -> usize {
    let len = data.len();
    for i in 1..=len.min(3) {
        let byte = data[len - i];
        if byte < 0x80 {
            return 0;
        }
        if byte >= 0xc0 {
            let expected = if byte < 0xe0 {
                2
            } else if byte < 0xf0 {
                3
            } else {
                4
            };
            return if i < expected { i } else { 0 };
        }
    }
    0
}

#[cfg(test)]
#[path = "term_tests.rs"]
mod tests;
