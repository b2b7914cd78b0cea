
use std::io::{self, Read, Write};

use anyhow::Result;

use crate::util::SvError::Dump;

/// Size of the line frame.  Header and property lines longer than this are
/// rejected; bulk payloads stream through without size limits.
pub const LINE_BUFFER_LEN: usize = 10000;

const COPY_BUFFER_LEN: usize = 4096;

/// Framed reader over a byte stream: newline-terminated line reads,
/// fixed-length binary reads, byte copies to a writer, and byte skips.
/// Bulk routines drain the internal frame first, then pull straight from
/// the underlying stream.
pub struct LineBuffer<R: Read> {
    input: R,
    buf: Box<[u8; LINE_BUFFER_LEN]>,
    /// Consumed prefix of the filled region.
    off: usize,
    /// Filled prefix of `buf`.
    len: usize,
    eof: bool,
}

impl<R: Read> LineBuffer<R> {
    pub fn new(input: R) -> Self {
        LineBuffer {
            input,
            buf: Box::new([0; LINE_BUFFER_LEN]),
            off: 0,
            len: 0,
            eof: false,
        }
    }

    fn buffered(&self) -> usize {
        self.len - self.off
    }

    fn fill(&mut self) -> io::Result<usize> {
        let n = self.input.read(&mut self.buf[self.len..])?;
        if n == 0 {
            self.eof = true;
        }
        self.len += n;
        Ok(n)
    }

    /// The next line without its terminating newline, or `None` at end of
    /// input.  A blank line reads as an empty slice, distinct from `None`.
    /// A line longer than the frame is an error.
    pub fn read_line(&mut self) -> Result<Option<&[u8]>> {
        // Slide the unconsumed tail to the front of the frame.
        if self.off > 0 {
            self.buf.copy_within(self.off..self.len, 0);
            self.len -= self.off;
            self.off = 0;
        }
        let mut searched = 0;
        loop {
            if let Some(pos) = self.buf[searched..self.len].iter().position(|&b| b == b'\n') {
                let end = searched + pos;
                self.off = end + 1;
                return Ok(Some(&self.buf[..end]));
            }
            searched = self.len;
            if self.eof {
                break;
            }
            if self.len == LINE_BUFFER_LEN {
                return Err(Dump(format!("line longer than {} bytes", LINE_BUFFER_LEN)).into());
            }
            self.fill()?;
        }
        if self.len == 0 {
            return Ok(None);
        }
        // Final line with no newline before end of input.
        self.off = self.len;
        Ok(Some(&self.buf[..self.len]))
    }

    /// Read a single byte.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.buffered() == 0 {
            self.off = 0;
            self.len = 0;
            while !self.eof && self.len == 0 {
                self.fill()?;
            }
            if self.len == 0 {
                return Ok(None);
            }
        }
        let b = self.buf[self.off];
        self.off += 1;
        Ok(Some(b))
    }

    /// Read exactly `want` bytes (they may contain NULs and newlines).
    /// Ending early is an error.
    pub fn read_string(&mut self, want: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(want.min(LINE_BUFFER_LEN));
        let got = self.read_binary(&mut out, want as u64)?;
        if got < want as u64 {
            return Err(Dump(format!("input ended early ({} of {} bytes)", got, want)).into());
        }
        Ok(out)
    }

    /// Append up to `want` bytes to `out`; returns how many arrived.
    pub fn read_binary(&mut self, out: &mut Vec<u8>, want: u64) -> Result<u64> {
        let mut remaining = want;
        let take = (self.buffered() as u64).min(remaining) as usize;
        out.extend_from_slice(&self.buf[self.off..self.off + take]);
        self.off += take;
        remaining -= take as u64;
        if remaining > 0 {
            let got = (&mut self.input).take(remaining).read_to_end(out)? as u64;
            if got < remaining {
                self.eof = true;
            }
            remaining -= got;
        }
        Ok(want - remaining)
    }

    /// Forward `want` bytes to `out`; returns how many were copied.  Stops
    /// short only when the input ends.
    pub fn copy_bytes<W: Write>(&mut self, out: &mut W, want: u64) -> Result<u64> {
        let mut copied = 0u64;
        let take = (self.buffered() as u64).min(want) as usize;
        out.write_all(&self.buf[self.off..self.off + take])?;
        self.off += take;
        copied += take as u64;
        let mut chunk = [0u8; COPY_BUFFER_LEN];
        while copied < want {
            let limit = ((want - copied) as usize).min(COPY_BUFFER_LEN);
            let got = self.input.read(&mut chunk[..limit])?;
            if got == 0 {
                self.eof = true;
                break;
            }
            out.write_all(&chunk[..got])?;
            copied += got as u64;
        }
        Ok(copied)
    }

    /// Advance `want` bytes, discarding them; returns how many were
    /// skipped.
    pub fn skip_bytes(&mut self, want: u64) -> Result<u64> {
        self.copy_bytes(&mut io::sink(), want)
    }

    pub fn at_eof(&self) -> bool {
        self.eof && self.buffered() == 0
    }
}
