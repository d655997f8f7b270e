//! ansicast-codec: frame compression for captured grids.
//!
//! Every grid coming out of the parser is offered to a set of competing
//! strategies (raw copy, run-length, Huffman, and quadtree deltas against the
//! previous grid). [`FrameEncoder`] keeps the smallest result and tags it with
//! the winning [`Strategy`]; [`FrameDecoder`] reverses it on the viewer side.
//!
//! # Architecture
//!
//! - [`FrequencyTable`], [`HuffmanCoder`], [`RleCoder`] and [`Quadtree`] are
//!   the reusable primitives.
//! - [`EncodingFrame`] is the per-strategy working state, allocated once and
//!   reused for every grid.
//! - [`Strategy`] is the closed set of wire formats; decoding dispatches on it
//!   with an exhaustive `match`.

pub mod decoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod freq;
pub mod huffman;
pub mod quadtree;
pub mod rle;
pub mod strategy;
mod wire;

pub use decoder::FrameDecoder;
pub use encoder::{FrameEncoder, StrategyStats, WireFrame};
pub use error::{DecodeError, EncodeError, HuffmanError};
pub use frame::EncodingFrame;
pub use freq::FrequencyTable;
pub use huffman::{HuffmanCode, HuffmanCoder};
pub use quadtree::{Quadtree, QuadtreeParams, Region};
pub use rle::{RleCoder, RleRun};
pub use strategy::{EncodingStrategy, Strategy};
