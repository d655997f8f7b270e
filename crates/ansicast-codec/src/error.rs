use crate::huffman::MAX_CODE_LEN;

/// Errors from building or applying a Huffman code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HuffmanError {
    #[error("cannot build a code from empty input")]
    EmptyInput,
    #[error("no code has been built")]
    NotBuilt,
    #[error("symbol {0:#04x} has no code")]
    MissingSymbol(u8),
    #[error("code length {0} exceeds the maximum of {max}", max = MAX_CODE_LEN)]
    CodeTooLong(usize),
    #[error("malformed code table: {0}")]
    MalformedTable(&'static str),
    #[error("bit stream does not match the code")]
    InvalidCode,
    #[error("bit stream shorter than its declared length")]
    Truncated,
}

/// Errors from encoding a grid.
///
/// Apart from [`EncodeError::NoStrategySucceeded`] and
/// [`EncodeError::DimensionMismatch`], these only exclude one strategy from
/// the current round.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("strategy needs a previous grid")]
    MissingPrevious,
    #[error("no grid has been pushed")]
    MissingCurrent,
    #[error("grid is {got_rows}x{got_cols}, encoder expects {rows}x{cols}")]
    DimensionMismatch {
        rows: usize,
        cols: usize,
        got_rows: usize,
        got_cols: usize,
    },
    #[error("{0} changed regions do not fit in the region header")]
    TooManyRegions(usize),
    #[error("payload too large: {0}")]
    TooLarge(&'static str),
    #[error(transparent)]
    Huffman(#[from] HuffmanError),
    #[error("no strategy produced a frame")]
    NoStrategySucceeded,
}

/// Errors from decoding a wire frame.
///
/// A failed decode never touches the decoder's previous grid, so the next
/// frame can still be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty wire frame")]
    EmptyFrame,
    /// The encoder and decoder disagree on the protocol. Not retryable.
    #[error("unknown strategy id {0}")]
    UnknownStrategy(u8),
    #[error("frame is a delta but no previous grid has been decoded")]
    MissingPrevious,
    #[error("payload truncated at offset {offset}: {needed} more bytes needed")]
    Truncated { offset: usize, needed: usize },
    #[error("malformed payload: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Huffman(#[from] HuffmanError),
}

impl DecodeError {
    /// Whether this error means encoder and decoder speak different protocols.
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(self, DecodeError::UnknownStrategy(_))
    }
}
