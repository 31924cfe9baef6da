// SPDX-License-Identifier: MIT
// Copyright (c) 2026 VibeTunnel Contributors

//! Binary terminal snapshot (`SNAPSHOT_VT` v1).
//!
//! A compact little-endian encoding of the visible grid: a 32-byte header
//! followed by row records. Runs of empty rows collapse into `0xFE <count>`
//! markers; populated rows are `0xFD <u16 cell count>` followed by cells.
//! Trailing default cells of a row may be omitted by encoders; decoders pad
//! rows back to the grid width.

use bytes::{BufMut, Bytes, BytesMut};

use crate::grid::{Cell, Color, Grid, Row};

pub const MAGIC: u16 = 0x5654; // 'V','T'
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 32;

const ROW_EMPTY_RUN: u8 = 0xfe;
const ROW_CELLS: u8 = 0xfd;
const MAX_EMPTY_RUN: u32 = 255;

const TYPE_UNICODE: u8 = 0x40;
const TYPE_HAS_FG: u8 = 0x20;
const TYPE_HAS_BG: u8 = 0x10;
const TYPE_FG_RGB: u8 = 0x08;
const TYPE_BG_RGB: u8 = 0x04;
const CHAR_MASK: u8 = 0x03;
const CHAR_SPACE: u8 = 0x00;
const CHAR_ASCII: u8 = 0x01;
const CHAR_UNICODE: u8 = 0x02;

/// Decoded snapshot: header fields plus the visible rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub cols: u32,
    pub rows: u32,
    pub viewport_y: u32,
    pub cursor_x: u32,
    pub cursor_y: u32,
    pub grid_rows: Vec<Row>,
}

/// Encode the grid's visible region.
pub fn encode(grid: &Grid) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 64);
    buf.put_u16_le(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(0); // flags
    buf.put_u32_le(grid.cols() as u32);
    buf.put_u32_le(grid.rows() as u32);
    buf.put_u32_le(grid.viewport_y());
    buf.put_u32_le(grid.cursor_x as u32);
    buf.put_u32_le(grid.cursor_y as u32);
    buf.put_u32_le(0); // reserved
    buf.put_u32_le(0); // reserved (header padding to 32 bytes)

    let mut empty_run: u32 = 0;
    for row in grid.visible_rows() {
        if row.is_blank() {
            empty_run += 1;
            continue;
        }
        flush_empty_run(&mut buf, &mut empty_run);
        encode_row(&mut buf, row);
    }
    flush_empty_run(&mut buf, &mut empty_run);

    buf.freeze()
}

fn flush_empty_run(buf: &mut BytesMut, run: &mut u32) {
    while *run > 0 {
        let chunk = (*run).min(MAX_EMPTY_RUN);
        buf.put_u8(ROW_EMPTY_RUN);
        buf.put_u8(chunk as u8);
        *run -= chunk;
    }
}

fn encode_row(buf: &mut BytesMut, row: &Row) {
    let trimmed = row.cells.len()
        - row.cells.iter().rev().take_while(|c| c.is_default()).count();
    buf.put_u8(ROW_CELLS);
    buf.put_u16_le(trimmed as u16);
    for cell in &row.cells[..trimmed] {
        encode_cell(buf, cell);
    }
}

fn encode_cell(buf: &mut BytesMut, cell: &Cell) {
    let mut kind = 0u8;
    // Continuation slots travel as plain spaces; decoders rebuild the flag
    // from the preceding wide cell.
    let ch = if cell.continuation { ' ' } else { cell.ch };
    let mut utf8 = [0u8; 4];
    let char_bytes: &[u8] = if ch == ' ' {
        kind |= CHAR_SPACE;
        &[]
    } else if ch.is_ascii() {
        kind |= CHAR_ASCII;
        ch.encode_utf8(&mut utf8).as_bytes()
    } else {
        kind |= CHAR_UNICODE | TYPE_UNICODE;
        ch.encode_utf8(&mut utf8).as_bytes()
    };

    if cell.fg.is_some() {
        kind |= TYPE_HAS_FG;
        if matches!(cell.fg, Some(Color::Rgb(..))) {
            kind |= TYPE_FG_RGB;
        }
    }
    if cell.bg.is_some() {
        kind |= TYPE_HAS_BG;
        if matches!(cell.bg, Some(Color::Rgb(..))) {
            kind |= TYPE_BG_RGB;
        }
    }

    buf.put_u8(kind);
    if kind & TYPE_UNICODE != 0 {
        put_varint(buf, char_bytes.len() as u32);
        buf.put_slice(char_bytes);
    } else if kind & CHAR_MASK == CHAR_ASCII {
        buf.put_u8(char_bytes[0]);
    }
    if let Some(color) = cell.fg {
        put_color(buf, color);
    }
    if let Some(color) = cell.bg {
        put_color(buf, color);
    }
}

fn put_color(buf: &mut BytesMut, color: Color) {
    match color {
        Color::Indexed(idx) => buf.put_u8(idx),
        Color::Rgb(r, g, b) => {
            buf.put_u8(r);
            buf.put_u8(g);
            buf.put_u8(b);
        }
    }
}

fn put_varint(buf: &mut BytesMut, mut value: u32) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            return;
        }
    }
}

/// Streaming byte reader over the snapshot body.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> anyhow::Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| anyhow::anyhow!("snapshot truncated at byte {}", self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16_le(&mut self) -> anyhow::Result<u16> {
        Ok(u16::from_le_bytes([self.u8()?, self.u8()?]))
    }

    fn u32_le(&mut self) -> anyhow::Result<u32> {
        Ok(u32::from_le_bytes([self.u8()?, self.u8()?, self.u8()?, self.u8()?]))
    }

    fn take(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        let end = self.pos + len;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| anyhow::anyhow!("snapshot truncated at byte {}", self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn varint(&mut self) -> anyhow::Result<u32> {
        let mut value = 0u32;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 28 {
                anyhow::bail!("varint overflow");
            }
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// Decode a snapshot frame.
pub fn decode(data: &[u8]) -> anyhow::Result<Snapshot> {
    let mut reader = Reader { data, pos: 0 };

    let magic = reader.u16_le()?;
    anyhow::ensure!(magic == MAGIC, "bad snapshot magic {magic:#06x}");
    let version = reader.u8()?;
    anyhow::ensure!(version == VERSION, "unsupported snapshot version {version}");
    let _flags = reader.u8()?;
    let cols = reader.u32_le()?;
    let rows = reader.u32_le()?;
    let viewport_y = reader.u32_le()?;
    let cursor_x = reader.u32_le()?;
    let cursor_y = reader.u32_le()?;
    let _reserved = reader.u32_le()?;
    let _reserved = reader.u32_le()?;
    anyhow::ensure!(cols > 0 && rows > 0, "degenerate snapshot {cols}x{rows}");
    anyhow::ensure!(cols <= u32::from(u16::MAX) && rows <= u32::from(u16::MAX), "oversize grid");

    let mut grid_rows: Vec<Row> = Vec::with_capacity(rows as usize);
    while !reader.at_end() && (grid_rows.len() as u32) < rows {
        match reader.u8()? {
            ROW_EMPTY_RUN => {
                let count = reader.u8()?;
                anyhow::ensure!(count >= 1, "empty-row run of zero");
                for _ in 0..count {
                    grid_rows.push(Row::blank(cols as u16));
                }
            }
            ROW_CELLS => {
                let cell_count = reader.u16_le()?;
                let mut row = Row { cells: Vec::with_capacity(cols as usize) };
                for _ in 0..cell_count {
                    row.cells.push(decode_cell(&mut reader)?);
                }
                row.cells.resize(cols as usize, Cell::blank());
                mark_continuations(&mut row);
                grid_rows.push(row);
            }
            other => anyhow::bail!("unknown row marker {other:#04x}"),
        }
    }
    anyhow::ensure!(
        grid_rows.len() as u32 == rows,
        "snapshot body has {} rows, header says {rows}",
        grid_rows.len()
    );

    Ok(Snapshot { cols, rows, viewport_y, cursor_x, cursor_y, grid_rows })
}

fn decode_cell(reader: &mut Reader<'_>) -> anyhow::Result<Cell> {
    let kind = reader.u8()?;
    let mut cell = Cell::blank();

    cell.ch = match kind & CHAR_MASK {
        CHAR_SPACE => ' ',
        CHAR_ASCII => {
            let byte = reader.u8()?;
            anyhow::ensure!(byte.is_ascii(), "non-ascii byte {byte:#04x} in ascii cell");
            byte as char
        }
        CHAR_UNICODE => {
            let len = reader.varint()? as usize;
            anyhow::ensure!((1..=4).contains(&len), "bad unicode cell length {len}");
            let raw = reader.take(len)?;
            std::str::from_utf8(raw)?
                .chars()
                .next()
                .ok_or_else(|| anyhow::anyhow!("empty unicode cell"))?
        }
        other => anyhow::bail!("reserved char mode {other}"),
    };

    if kind & TYPE_HAS_FG != 0 {
        cell.fg = Some(take_color(reader, kind & TYPE_FG_RGB != 0)?);
    }
    if kind & TYPE_HAS_BG != 0 {
        cell.bg = Some(take_color(reader, kind & TYPE_BG_RGB != 0)?);
    }
    Ok(cell)
}

fn take_color(reader: &mut Reader<'_>, rgb: bool) -> anyhow::Result<Color> {
    if rgb {
        Ok(Color::Rgb(reader.u8()?, reader.u8()?, reader.u8()?))
    } else {
        Ok(Color::Indexed(reader.u8()?))
    }
}

/// Rebuild wide/continuation flags from character widths.
fn mark_continuations(row: &mut Row) {
    let mut i = 0;
    while i < row.cells.len() {
        if Cell::char_width(row.cells[i].ch) == 2 {
            row.cells[i].wide = true;
            if i + 1 < row.cells.len() {
                row.cells[i + 1] = Cell { continuation: true, ..Cell::blank() };
                i += 1;
            }
        }
        i += 1;
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
