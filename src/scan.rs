//! Restartable record scanner over raw byte streams.
//!
//! A [`Scanner`] reads bytes from any [`Read`] and cuts them into records with a split function.
//! Scanners are cheap: when a stream reports end-of-file, a new scanner may be created over the
//! same reader to resume reading (stdin of a terminal may deliver data again after `Ctrl-D`).

use std::io::{ErrorKind, Read};

const INITIAL_BUF_SIZE: usize = 4096;

/// Decision of a split function for the currently buffered bytes.
#[derive(Debug, PartialEq, Eq)]
pub enum Split {
    /// More data is needed to produce a record.
    More,
    /// Emit `len` first bytes as a record and consume `advance` bytes.
    Record { advance: usize, len: usize },
    /// No more records.
    End,
}

/// Split function: receives buffered unconsumed bytes and an end-of-file flag.
pub type SplitFn = fn(data: &[u8], at_eof: bool) -> Split;

/// Every available chunk of data is a record.
pub fn pass_through(data: &[u8], at_eof: bool) -> Split {
    if data.is_empty() {
        return if at_eof { Split::End } else { Split::More };
    }
    Split::Record {
        advance: data.len(),
        len: data.len(),
    }
}

/// Newline terminated records, a trailing `\r` is dropped. The last unterminated line is
/// emitted at end-of-file.
pub fn lines(data: &[u8], at_eof: bool) -> Split {
    if at_eof && data.is_empty() {
        return Split::End;
    }

    let drop_cr = |line: &[u8]| match line.last() {
        Some(b'\r') => line.len() - 1,
        _ => line.len(),
    };

    if let Some(pos) = data.iter().position(|&b| b == b'\n') {
        return Split::Record {
            advance: pos + 1,
            len: drop_cr(&data[..pos]),
        };
    }

    if at_eof {
        return Split::Record {
            advance: data.len(),
            len: drop_cr(data),
        };
    }

    Split::More
}

pub struct Scanner<R: Read> {
    reader: R,
    split: SplitFn,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    eof: bool,
}

impl<R: Read> Scanner<R> {
    pub fn new(reader: R, split: SplitFn) -> Self {
        Self {
            reader,
            split,
            buf: vec![0; INITIAL_BUF_SIZE],
            start: 0,
            end: 0,
            eof: false,
        }
    }

    /// Return next record or `None` if the underlying reader is exhausted.
    pub fn next_record(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            if self.end > self.start || self.eof {
                match (self.split)(&self.buf[self.start..self.end], self.eof) {
                    Split::Record { advance, len } => {
                        let record = self.buf[self.start..self.start + len].to_vec();
                        self.start += advance;
                        return Ok(Some(record));
                    }
                    Split::End => return Ok(None),
                    Split::More if self.eof => return Ok(None),
                    Split::More => {}
                }
            }

            self.make_room();
            match self.reader.read(&mut self.buf[self.end..]) {
                Ok(0) => self.eof = true,
                Ok(n) => self.end += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn make_room(&mut self) {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.end == self.buf.len() {
            self.buf.resize(self.buf.len() * 2, 0);
        }
    }
}

impl<R: Read> Iterator for Scanner<R> {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Decode a byte stream chunk by chunk. An UTF-8 sequence cut at the end of a chunk is kept
/// until the next one completes it.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let complete = self.pending.len() - incomplete_tail(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..complete]).into_owned();
        self.pending.drain(..complete);
        text
    }

    /// Flush bytes left at end-of-stream, an unfinished sequence is replaced.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of an unfinished multibyte sequence at the end of `data`.
fn incomplete_tail(data: &[u8]) -> usize {
    for back in 1..=data.len().min(3) {
        let byte = data[data.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let need = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if need > back { back } else { 0 };
    }
    0
}
