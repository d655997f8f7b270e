//! Canonical Huffman coding.
//!
//! Code lengths come from a classic Huffman tree in which equal weights are
//! ordered by symbol value (leaves) or creation order (merged nodes), so the
//! same frequencies always produce the same lengths. Codes are then assigned
//! canonically: sorted by `(length, symbol)`, each code is the previous one
//! plus one, shifted left whenever the length grows. A decoder only needs the
//! `(symbol, length)` list to rebuild the exact code.
//!
//! Bits are packed MSB-first.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::HuffmanError;
use crate::freq::FrequencyTable;

/// Longest code this implementation will emit or accept.
pub const MAX_CODE_LEN: usize = 32;

/// A canonical prefix code over bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HuffmanCode {
    /// `(symbol, length)` sorted by length, then symbol.
    entries: Vec<(u8, u8)>,
    codes: [u32; 256],
    lengths: [u8; 256],
}

impl HuffmanCode {
    /// Rebuild a code from `(symbol, length)` pairs in any order.
    pub fn from_lengths(pairs: &[(u8, u8)]) -> Result<Self, HuffmanError> {
        if pairs.is_empty() {
            return Err(HuffmanError::MalformedTable("no symbols"));
        }

        let mut lengths = [0u8; 256];
        for &(symbol, len) in pairs {
            if len == 0 {
                return Err(HuffmanError::MalformedTable("zero code length"));
            }
            if len as usize > MAX_CODE_LEN {
                return Err(HuffmanError::CodeTooLong(len as usize));
            }
            if lengths[symbol as usize] != 0 {
                return Err(HuffmanError::MalformedTable("duplicate symbol"));
            }
            lengths[symbol as usize] = len;
        }

        let mut entries = pairs.to_vec();
        entries.sort_unstable_by_key(|&(symbol, len)| (len, symbol));

        let mut codes = [0u32; 256];
        let mut code: u64 = 0;
        let mut prev_len = entries[0].1;
        for (i, &(symbol, len)) in entries.iter().enumerate() {
            if i > 0 {
                code = (code + 1) << (len - prev_len);
            }
            if code >> len != 0 {
                return Err(HuffmanError::MalformedTable("over-subscribed code lengths"));
            }
            codes[symbol as usize] = code as u32;
            prev_len = len;
        }

        Ok(Self {
            entries,
            codes,
            lengths,
        })
    }

    /// `(symbol, length)` pairs in canonical order.
    pub fn entries(&self) -> &[(u8, u8)] {
        &self.entries
    }

    /// Code and length for a symbol, or `None` if it has no code.
    pub fn code(&self, symbol: u8) -> Option<(u32, u8)> {
        let len = self.lengths[symbol as usize];
        (len > 0).then(|| (self.codes[symbol as usize], len))
    }

    /// Append the serialized table: `symbol_count - 1`, then
    /// `(symbol, length)` pairs in canonical order.
    pub fn write_table(&self, out: &mut Vec<u8>) {
        out.push((self.entries.len() - 1) as u8);
        for &(symbol, len) in &self.entries {
            out.push(symbol);
            out.push(len);
        }
    }

    /// Parse a table written by [`write_table`](Self::write_table).
    ///
    /// Returns the code and the number of bytes consumed.
    pub fn read_table(data: &[u8]) -> Result<(Self, usize), HuffmanError> {
        let (&count, rest) = data.split_first().ok_or(HuffmanError::Truncated)?;
        let count = count as usize + 1;
        if rest.len() < count * 2 {
            return Err(HuffmanError::Truncated);
        }
        let pairs: Vec<(u8, u8)> = rest[..count * 2]
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();
        Ok((Self::from_lengths(&pairs)?, 1 + count * 2))
    }

    /// Decode exactly `bit_len` bits of `packed`.
    pub fn decode(&self, bit_len: usize, packed: &[u8]) -> Result<Vec<u8>, HuffmanError> {
        if packed.len() * 8 < bit_len {
            return Err(HuffmanError::Truncated);
        }

        let table = DecodeTable::new(&self.entries);
        let mut out = Vec::new();
        let mut code: u64 = 0;
        let mut len = 0usize;

        for bit_idx in 0..bit_len {
            let bit = (packed[bit_idx / 8] >> (7 - bit_idx % 8)) & 1;
            code = (code << 1) | bit as u64;
            len += 1;
            if len > table.max_len {
                return Err(HuffmanError::InvalidCode);
            }
            if let Some(symbol) = table.lookup(code, len) {
                out.push(symbol);
                code = 0;
                len = 0;
            }
        }

        if len != 0 {
            return Err(HuffmanError::InvalidCode);
        }
        Ok(out)
    }
}

/// Per-length lookup for canonical decoding.
struct DecodeTable<'a> {
    entries: &'a [(u8, u8)],
    count: [usize; MAX_CODE_LEN + 1],
    first_code: [u64; MAX_CODE_LEN + 1],
    first_index: [usize; MAX_CODE_LEN + 1],
    max_len: usize,
}

impl<'a> DecodeTable<'a> {
    fn new(entries: &'a [(u8, u8)]) -> Self {
        let mut count = [0usize; MAX_CODE_LEN + 1];
        for &(_, len) in entries {
            count[len as usize] += 1;
        }

        let mut first_code = [0u64; MAX_CODE_LEN + 1];
        let mut first_index = [0usize; MAX_CODE_LEN + 1];
        let mut code = 0u64;
        let mut index = 0usize;
        for len in 1..=MAX_CODE_LEN {
            code = (code + count[len - 1] as u64) << 1;
            first_code[len] = code;
            first_index[len] = index;
            index += count[len];
        }

        Self {
            entries,
            count,
            first_code,
            first_index,
            max_len: entries.last().map_or(0, |&(_, len)| len as usize),
        }
    }

    fn lookup(&self, code: u64, len: usize) -> Option<u8> {
        let count = self.count[len];
        if count == 0 {
            return None;
        }
        let offset = code.checked_sub(self.first_code[len])?;
        if offset >= count as u64 {
            return None;
        }
        Some(self.entries[self.first_index[len] + offset as usize].0)
    }
}

/// Builds codes from a [`FrequencyTable`] and packs bytes with them.
///
/// The coder is kept across frames; each [`build`](Self::build) replaces the
/// previous code.
#[derive(Clone, Debug, Default)]
pub struct HuffmanCoder {
    code: Option<HuffmanCode>,
}

#[derive(Clone, Copy)]
struct Node {
    children: Option<(usize, usize)>,
    symbol: u8,
}

impl HuffmanCoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The code from the last successful build.
    pub fn code(&self) -> Option<&HuffmanCode> {
        self.code.as_ref()
    }

    /// Build a canonical code for the observed symbols.
    ///
    /// A single distinct symbol gets a 1-bit code. An empty table is an error.
    pub fn build(&mut self, freq: &FrequencyTable) -> Result<&HuffmanCode, HuffmanError> {
        self.code = None;
        let lengths = code_lengths(freq)?;
        Ok(self.code.insert(HuffmanCode::from_lengths(&lengths)?))
    }

    /// Append the packed bits of `data` to `out` and return the bit length.
    pub fn encode(&self, data: &[u8], out: &mut Vec<u8>) -> Result<usize, HuffmanError> {
        let code = self.code.as_ref().ok_or(HuffmanError::NotBuilt)?;
        if data.is_empty() {
            return Err(HuffmanError::EmptyInput);
        }

        let mut writer = BitWriter::new(out);
        for &byte in data {
            let (bits, len) = code.code(byte).ok_or(HuffmanError::MissingSymbol(byte))?;
            writer.push(bits, len);
        }
        Ok(writer.finish())
    }
}

/// Decode with an explicit code; see [`HuffmanCode::decode`].
pub fn decode(bit_len: usize, packed: &[u8], code: &HuffmanCode) -> Result<Vec<u8>, HuffmanError> {
    code.decode(bit_len, packed)
}

fn code_lengths(freq: &FrequencyTable) -> Result<Vec<(u8, u8)>, HuffmanError> {
    let symbols: Vec<(u8, u32)> = freq.symbols().collect();
    match symbols.len() {
        0 => return Err(HuffmanError::EmptyInput),
        1 => return Ok(vec![(symbols[0].0, 1)]),
        _ => {}
    }

    // Heap keys are (weight, order): leaves order by symbol, merged nodes
    // after all leaves in creation order.
    let mut nodes: Vec<Node> = Vec::with_capacity(symbols.len() * 2);
    let mut heap = BinaryHeap::with_capacity(symbols.len());
    for &(symbol, count) in &symbols {
        heap.push(Reverse((count as u64, symbol as usize, nodes.len())));
        nodes.push(Node {
            children: None,
            symbol,
        });
    }

    let mut order = 256;
    while heap.len() > 1 {
        let (Some(Reverse((w1, _, a))), Some(Reverse((w2, _, b)))) = (heap.pop(), heap.pop()) else {
            break;
        };
        heap.push(Reverse((w1 + w2, order, nodes.len())));
        nodes.push(Node {
            children: Some((a, b)),
            symbol: 0,
        });
        order += 1;
    }

    let root = nodes.len() - 1;
    let mut lengths = Vec::with_capacity(symbols.len());
    let mut stack = vec![(root, 0usize)];
    while let Some((idx, depth)) = stack.pop() {
        match nodes[idx].children {
            Some((left, right)) => {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
            None => {
                if depth > MAX_CODE_LEN {
                    return Err(HuffmanError::CodeTooLong(depth));
                }
                lengths.push((nodes[idx].symbol, depth as u8));
            }
        }
    }
    Ok(lengths)
}

/// MSB-first bit packer appending to a byte vector.
struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    acc: u64,
    pending: u32,
    written: usize,
}

impl<'a> BitWriter<'a> {
    fn new(out: &'a mut Vec<u8>) -> Self {
        Self {
            out,
            acc: 0,
            pending: 0,
            written: 0,
        }
    }

    fn push(&mut self, bits: u32, len: u8) {
        self.acc = (self.acc << len) | bits as u64;
        self.pending += len as u32;
        self.written += len as usize;
        while self.pending >= 8 {
            self.pending -= 8;
            self.out.push((self.acc >> self.pending) as u8);
        }
        self.acc &= (1u64 << self.pending) - 1;
    }

    fn finish(self) -> usize {
        if self.pending > 0 {
            self.out.push((self.acc << (8 - self.pending)) as u8);
        }
        self.written
    }
}
