//! Line splitting for transcoder diagnostic output.
//!
//! ffmpeg ends progress lines with `\r` and only the final summary with
//! `\n`, so both count as a line break here. Lines longer than the limit
//! are emitted in pieces.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// Longest log record produced from one output line.
pub const MAX_OUTPUT_LINE: usize = 4096;

/// Splits a byte stream into trimmed, non-empty text lines on `\n` or `\r`.
#[derive(Debug)]
pub struct OutputLineDecoder {
    max_len: usize,
    /// Bytes of the buffer already scanned without finding a break
    scanned: usize,
}

impl OutputLineDecoder {
    pub fn new() -> Self {
        Self::with_max_len(MAX_OUTPUT_LINE)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            scanned: 0,
        }
    }

    fn take_line(&mut self, buf: &mut BytesMut, len: usize, skip: usize) -> Option<String> {
        let mut line = buf.split_to(len + skip);
        line.truncate(len);
        self.scanned = 0;

        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl Default for OutputLineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for OutputLineDecoder {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let start = self.scanned.min(buf.len());
            let found = buf
                .iter()
                .skip(start)
                .position(|b| *b == b'\n' || *b == b'\r')
                .map(|offset| start + offset);

            match found {
                Some(end) if end <= self.max_len => {
                    if let Some(line) = self.take_line(buf, end, 1) {
                        return Ok(Some(line));
                    }
                }
                _ if buf.len() >= self.max_len => {
                    let max_len = self.max_len;
                    if let Some(line) = self.take_line(buf, max_len, 0) {
                        return Ok(Some(line));
                    }
                }
                _ => {
                    self.scanned = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let len = buf.len();
        Ok(self.take_line(buf, len, 0))
    }
}
