//! `Range: bytes=<start>-<end>` parsing and resolution against a file size.
//!
//! Only the first range of a multi-range header is honoured. Numbers are read
//! leniently: the leading digits count, anything unparseable falls back to the
//! defaults (start 0, open end).

use crate::stream::file::ByteRange;

/// Bytes served when the request leaves the end open.
pub const DEFAULT_RANGE_SPAN: u64 = 1_000_000;

/// A requested range before the file size is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub start: u64,
    /// `None` when the end is missing, zero or unparseable.
    pub end: Option<u64>,
}

/// The range lies entirely outside the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("requested range not satisfiable for a {size}-byte file")]
pub struct Unsatisfiable {
    pub size: u64,
}

impl Unsatisfiable {
    pub fn content_range(&self) -> String {
        format!("bytes */{}", self.size)
    }
}

impl RangeRequest {
    /// Returns `None` unless the header uses the `bytes=` unit.
    pub fn parse(header: &str) -> Option<Self> {
        let bounds_text = header.strip_prefix("bytes=")?;
        let mut bounds = bounds_text.splitn(2, '-');
        let start = bounds.next().and_then(leading_integer).unwrap_or(0);
        let end = bounds.next().and_then(leading_integer).filter(|end| *end != 0);
        Some(Self { start, end })
    }

    /// Clamp to the file. An open end spans at most [`DEFAULT_RANGE_SPAN`]
    /// bytes; an explicit end past the file stops at the last byte.
    pub fn resolve(&self, size: u64) -> Result<ByteRange, Unsatisfiable> {
        if size == 0 || self.start >= size {
            return Err(Unsatisfiable { size });
        }
        let last = size - 1;
        let end = match self.end {
            Some(end) => end.min(last),
            None => self.start.saturating_add(DEFAULT_RANGE_SPAN - 1).min(last),
        };
        if end < self.start {
            return Err(Unsatisfiable { size });
        }
        Ok(ByteRange {
            start: self.start,
            end,
        })
    }
}

/// `Content-Range` value for a satisfied range.
pub fn content_range(range: &ByteRange, size: u64) -> String {
    format!("bytes {}-{}/{}", range.start, range.end, size)
}

fn leading_integer(text: &str) -> Option<u64> {
    let text = text.trim_start();
    let text = text.strip_prefix('+').unwrap_or(text);
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    text[..digits].parse().ok()
}
