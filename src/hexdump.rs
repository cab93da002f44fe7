//! Bit-exact hex-dump formatting (§6).
//!
//! ```text
//! OOOOOOOO  BB BB BB BB BB BB BB BB  BB BB BB BB BB BB BB BB  |AAAAAAAAAAAAAAAA|
//! ```

use std::fmt::Write as _;
use std::io::{self, Write};

const BYTES_PER_LINE: usize = 16;

/// Formats bytes into the hex-dump layout, tracking a running offset across
/// calls so multi-chunk streams produce one continuous dump.
#[derive(Debug, Default)]
pub struct HexDumper {
    offset: u64,
}

impl HexDumper {
    pub fn new() -> Self {
        HexDumper { offset: 0 }
    }

    /// Resets the running offset counter to zero.
    pub fn reset_offset(&mut self) {
        self.offset = 0;
    }

    /// Writes `data`'s hex dump to `sink`, advancing the offset counter.
    pub fn dump(&mut self, data: &[u8], sink: &mut dyn Write) -> io::Result<()> {
        let mut line = String::with_capacity(78);
        for chunk in data.chunks(BYTES_PER_LINE) {
            line.clear();
            write_line(&mut line, self.offset, chunk);
            sink.write_all(line.as_bytes())?;
            self.offset += chunk.len() as u64;
        }
        Ok(())
    }
}

fn write_line(line: &mut String, offset: u64, chunk: &[u8]) {
    write!(line, "{:08x}  ", offset).unwrap();
    for i in 0..8 {
        match chunk.get(i) {
            Some(b) => write!(line, "{:02x} ", b).unwrap(),
            None => line.push_str("   "),
        }
    }
    line.push(' ');
    for i in 8..16 {
        match chunk.get(i) {
            Some(b) => write!(line, "{:02x} ", b).unwrap(),
            None => line.push_str("   "),
        }
    }
    line.push(' ');
    line.push('|');
    for &b in chunk {
        line.push(if (0x20..=0x7e).contains(&b) { b as char } else { '.' });
    }
    line.push_str("|\n");
}
