use bytes::{Bytes, BytesMut};

pub const SSE_INITIAL_BUFFER: usize = 8 * 1024;
/// A single SSE event may be large (inline images, tool payloads).
pub const SSE_MAX_BUFFER: usize = 15 * 1024 * 1024;

/// Incremental line splitter over a byte stream. Lines keep their
/// `event:`/`data:` prefixes; empty lines are emitted so consumers can track
/// event boundaries.
#[derive(Debug)]
pub struct LineScanner {
    buffer: BytesMut,
    max: usize,
    overflowed: bool,
}

impl Default for LineScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl LineScanner {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(SSE_INITIAL_BUFFER),
            max: SSE_MAX_BUFFER,
            overflowed: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_max(max: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(SSE_INITIAL_BUFFER.min(max)),
            max,
            overflowed: false,
        }
    }

    /// Feed a chunk, returning complete lines (without the terminator).
    /// Returns `None` once a single line outgrows the buffer cap; the scan is
    /// unusable from that point on.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<Bytes>> {
        if self.overflowed {
            return None;
        }
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            lines.push(line.freeze());
        }
        if self.buffer.len() > self.max {
            self.overflowed = true;
            return None;
        }
        Some(lines)
    }

    /// Flush the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.overflowed || self.buffer.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(line.freeze())
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(lines: &[Bytes]) -> Vec<String> {
        lines
            .iter()
            .map(|line| String::from_utf8_lossy(line).to_string())
            .collect()
    }

    #[test]
    fn splits_lines_across_chunks() {
        let mut scanner = LineScanner::new();
        let first = scanner.push(b"data: {\"a\":").unwrap();
        assert!(first.is_empty());
        let second = scanner.push(b"1}\r\ndata: [DONE]\n\n").unwrap();
        assert_eq!(
            text(&second),
            vec!["data: {\"a\":1}", "data: [DONE]", ""]
        );
        assert!(scanner.finish().is_none());
    }

    #[test]
    fn finish_flushes_trailing_line() {
        let mut scanner = LineScanner::new();
        scanner.push(b"data: tail").unwrap();
        assert_eq!(scanner.finish().unwrap(), Bytes::from_static(b"data: tail"));
    }

    #[test]
    fn oversized_line_overflows() {
        let mut scanner = LineScanner::with_max(16);
        assert!(scanner.push(b"0123456789").is_some());
        assert!(scanner.push(b"0123456789").is_none());
        assert!(scanner.overflowed());
        assert!(scanner.push(b"more").is_none());
    }
}
