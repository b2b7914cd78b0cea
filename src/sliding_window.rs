
use std::io::Read;

use anyhow::Result;

use crate::line_buffer::LineBuffer;
use crate::util::SvError::Delta;

/// Forward-only view over a source byte stream.  `buf` holds the bytes at
/// absolute offsets `[off, off + buf.len())`; the underlying stream is
/// read strictly sequentially, so the window can never slide left.
pub struct SlidingView<R: Read> {
    file: LineBuffer<R>,
    off: u64,
    pub buf: Vec<u8>,
}

impl<R: Read> SlidingView<R> {
    pub fn new(source: R) -> Self {
        SlidingView {
            file: LineBuffer::new(source),
            off: 0,
            buf: Vec::new(),
        }
    }

    pub fn offset(&self) -> u64 {
        self.off
    }

    /// Reposition the view to `[new_off, new_off + new_len)`.  The
    /// overlapping prefix is reused, any gap is skipped, and the tail is
    /// read from the stream.
    pub fn move_window(&mut self, new_off: u64, new_len: u64) -> Result<()> {
        let end = self.off + self.buf.len() as u64;
        if new_off < self.off || new_off + new_len < end {
            return Err(Delta("window slides left".to_string()).into());
        }
        if new_off < end {
            // Keep the overlapping region.
            self.buf.drain(..(new_off - self.off) as usize);
        } else {
            self.buf.clear();
            let gap = new_off - end;
            if self.file.skip_bytes(gap)? != gap {
                return Err(Delta("preimage ends early".to_string()).into());
            }
        }
        let need = new_len - self.buf.len() as u64;
        if self.file.read_binary(&mut self.buf, need)? != need {
            return Err(Delta("preimage ends early".to_string()).into());
        }
        self.off = new_off;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn view(bytes: &[u8]) -> SlidingView<Cursor<Vec<u8>>> {
        SlidingView::new(Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn advances_and_reuses_overlap() {
        let mut v = view(b"abcdefghij");
        v.move_window(0, 4).unwrap();
        assert_eq!(v.buf, b"abcd");
        // Overlap [2, 4) is kept, [4, 6) is read.
        v.move_window(2, 4).unwrap();
        assert_eq!(v.buf, b"cdef");
        assert_eq!(v.offset(), 2);
    }

    #[test]
    fn skips_gaps() {
        let mut v = view(b"abcdefghij");
        v.move_window(0, 2).unwrap();
        v.move_window(6, 3).unwrap();
        assert_eq!(v.buf, b"ghi");
    }

    #[test]
    fn rejects_leftward_moves() {
        let mut v = view(b"abcdefghij");
        v.move_window(4, 4).unwrap();
        assert!(v.move_window(2, 4).is_err());
        // Shrinking the right edge is also a leftward slide.
        let mut v = view(b"abcdefghij");
        v.move_window(0, 6).unwrap();
        assert!(v.move_window(1, 2).is_err());
    }

    #[test]
    fn fails_when_preimage_ends_early() {
        let mut v = view(b"abc");
        assert!(v.move_window(0, 8).is_err());
        let mut v = view(b"abc");
        assert!(v.move_window(5, 1).is_err());
    }

    #[test]
    fn zero_length_window_is_fine() {
        let mut v = view(b"abc");
        v.move_window(0, 0).unwrap();
        v.move_window(3, 0).unwrap();
        assert!(v.buf.is_empty());
    }
}
