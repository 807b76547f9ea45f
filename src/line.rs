//! Non-blocking assembly of newline-terminated lines from a byte stream.

use heapless::Vec;

use crate::config::LINE_BUFFER_LEN;

pub const LINE_CAPACITY: usize = LINE_BUFFER_LEN - 1;

pub struct LineReader {
    buf: Vec<u8, LINE_CAPACITY>,
}

impl LineReader {
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append `bytes`, calling `on_line` for every complete line (without
    /// its `\n`). A buffer that fills up is handed over as a line as well.
    pub fn feed(&mut self, bytes: &[u8], mut on_line: impl FnMut(&[u8])) {
        for &b in bytes {
            if b == b'\n' {
                on_line(&self.buf);
                self.buf.clear();
                continue;
            }
            if self.buf.push(b).is_err() {
                log::warn!("serial line overflow, flushing {} bytes", self.buf.len());
                on_line(&self.buf);
                self.buf.clear();
                // capacity is never zero
                self.buf.push(b).ok();
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(reader: &mut LineReader, bytes: &[u8]) -> std::vec::Vec<std::vec::Vec<u8>> {
        let mut lines = std::vec::Vec::new();
        reader.feed(bytes, |l| lines.push(l.to_vec()));
        lines
    }

    #[test]
    fn splits_on_newline_across_chunks() {
        let mut r = LineReader::new();
        assert!(collect(&mut r, b"GET_CO").is_empty());
        assert_eq!(r.pending(), 6);
        let lines = collect(&mut r, b"NFIG\r\nGET_STATS\n");
        assert_eq!(lines, vec![b"GET_CONFIG\r".to_vec(), b"GET_STATS".to_vec()]);
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn empty_lines_are_delivered() {
        let mut r = LineReader::new();
        assert_eq!(collect(&mut r, b"\n\n").len(), 2);
    }

    #[test]
    fn full_buffer_is_flushed() {
        let mut r = LineReader::new();
        let long = [b'A'; LINE_CAPACITY + 3];
        let lines = collect(&mut r, &long);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), LINE_CAPACITY);
        assert_eq!(r.pending(), 3);
    }
}
