//! Byte-oriented run-length coding.
//!
//! A run is a `(value, count)` pair with `1 <= count <= 255`. Longer runs are
//! split into several pairs with the same value. On the wire each run is two
//! bytes: value, then count.

use crate::error::DecodeError;
use crate::wire::Reader;

/// Longest run a single pair can describe.
pub const MAX_RUN: u8 = u8::MAX;

/// One `(value, count)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RleRun {
    pub value: u8,
    pub count: u8,
}

/// Run-length encoder that reuses its run buffer between calls.
#[derive(Clone, Debug, Default)]
pub struct RleCoder {
    runs: Vec<RleRun>,
}

impl RleCoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `data`, replacing the runs from the previous call.
    pub fn encode(&mut self, data: &[u8]) -> &[RleRun] {
        self.runs.clear();

        let mut iter = data.iter();
        let Some(&first) = iter.next() else {
            return &self.runs;
        };

        let mut current = RleRun {
            value: first,
            count: 1,
        };
        for &byte in iter {
            if byte == current.value && current.count < MAX_RUN {
                current.count += 1;
            } else {
                self.runs.push(current);
                current = RleRun {
                    value: byte,
                    count: 1,
                };
            }
        }
        self.runs.push(current);

        &self.runs
    }

    /// Encode `data` and append its wire form to `out`.
    ///
    /// Returns the number of bytes appended.
    pub fn encode_into(&mut self, data: &[u8], out: &mut Vec<u8>) -> usize {
        let start = out.len();
        for run in self.encode(data) {
            out.push(run.value);
            out.push(run.count);
        }
        out.len() - start
    }

    /// Runs produced by the last [`encode`](Self::encode).
    pub fn runs(&self) -> &[RleRun] {
        &self.runs
    }
}

/// Expand runs back into bytes.
pub fn decode(runs: &[RleRun]) -> Vec<u8> {
    let len = runs.iter().map(|run| run.count as usize).sum();
    let mut out = Vec::with_capacity(len);
    for run in runs {
        out.extend(std::iter::repeat(run.value).take(run.count as usize));
    }
    out
}

/// Read wire pairs until exactly `expected` bytes have been produced,
/// appending them to `out`.
pub(crate) fn decode_pairs(
    reader: &mut Reader<'_>,
    expected: usize,
    out: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    let mut produced = 0;
    while produced < expected {
        let value = reader.u8()?;
        let count = reader.u8()? as usize;
        if count == 0 {
            return Err(DecodeError::Malformed("zero-length run"));
        }
        if produced + count > expected {
            return Err(DecodeError::Malformed("run overflows its section"));
        }
        out.extend(std::iter::repeat(value).take(count));
        produced += count;
    }
    Ok(())
}
