//! ansicast-grid: ANSI stream capture for Ansicast.
//!
//! Turns the colored text output of a terminal program into fixed-size
//! character + color grids. Escape sequences are decoded with `vte`, colors
//! are quantized to a packed 3-3-2 byte, and every completed grid is handed
//! off through a bounded channel to whoever encodes it.

pub mod color;
pub mod grid;
pub mod parser;
pub mod sgr;

pub use color::{dequantize, quantize, Rgb};
pub use grid::Grid;
pub use parser::{
    AnsiStreamParser, FrameReceiver, ParseError, TrailingChunkPolicy, DEFAULT_CHANNEL_CAPACITY,
};
pub use sgr::{ChunkError, StyledRun};
