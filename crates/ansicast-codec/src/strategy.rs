use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};
use crate::frame::{write_huffman, EncodingFrame};

/// The closed set of wire formats. The discriminant is the id byte that
/// leads every wire frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Strategy {
    /// `chars ++ colors`, uncompressed.
    Raw = 0,
    /// RLE pairs of the char half, then of the color half.
    Rle = 1,
    /// One Huffman section over `chars ++ colors`.
    Huffman = 2,
    /// Changed regions against the previous grid, bytes stored raw.
    DeltaRaw = 3,
    /// Changed regions, bytes as one RLE stream.
    DeltaRle = 4,
    /// Changed regions, bytes as one Huffman section.
    DeltaHuffman = 5,
}

impl Strategy {
    /// Every strategy, in default registration order.
    pub const ALL: [Strategy; 6] = [
        Strategy::Raw,
        Strategy::Rle,
        Strategy::Huffman,
        Strategy::DeltaRaw,
        Strategy::DeltaRle,
        Strategy::DeltaHuffman,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Raw => "raw",
            Strategy::Rle => "rle",
            Strategy::Huffman => "huffman",
            Strategy::DeltaRaw => "delta_raw",
            Strategy::DeltaRle => "delta_rle",
            Strategy::DeltaHuffman => "delta_huffman",
        }
    }

    /// Delta strategies cannot encode the first grid.
    pub fn requires_previous(self) -> bool {
        matches!(
            self,
            Strategy::DeltaRaw | Strategy::DeltaRle | Strategy::DeltaHuffman
        )
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == normalized)
            .ok_or_else(|| {
                let known: Vec<_> = Strategy::ALL.iter().map(|s| s.name()).collect();
                format!("unknown strategy '{s}', expected one of: {}", known.join(", "))
            })
    }
}

impl TryFrom<u8> for Strategy {
    type Error = DecodeError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Strategy::ALL
            .get(id as usize)
            .copied()
            .ok_or(DecodeError::UnknownStrategy(id))
    }
}

/// A compression strategy competing inside a
/// [`FrameEncoder`](crate::FrameEncoder).
///
/// `encode` is called after the frame's current grid has been installed. It
/// must start its output with [`EncodingFrame::begin`]; on error the output is
/// discarded and the strategy sits out this round.
pub trait EncodingStrategy: Send {
    /// The id byte written at the start of every frame this strategy wins.
    fn id(&self) -> Strategy;

    /// Whether the frame must keep the previous grid and its quadtrees.
    fn requires_previous(&self) -> bool {
        false
    }

    fn encode(&self, frame: &mut EncodingFrame) -> Result<(), EncodeError>;
}

impl EncodingStrategy for Strategy {
    fn id(&self) -> Strategy {
        *self
    }

    fn requires_previous(&self) -> bool {
        Strategy::requires_previous(*self)
    }

    fn encode(&self, frame: &mut EncodingFrame) -> Result<(), EncodeError> {
        let current = frame.current()?.clone();
        frame.begin(*self);

        match self {
            Strategy::Raw => frame.out.extend_from_slice(current.as_bytes()),
            Strategy::Rle => {
                frame.rle.encode_into(current.chars(), &mut frame.out);
                frame.rle.encode_into(current.colors(), &mut frame.out);
            }
            Strategy::Huffman => write_huffman(
                &mut frame.freq,
                &mut frame.huffman,
                current.as_bytes(),
                &mut frame.out,
            )?,
            Strategy::DeltaRaw => {
                frame.write_changed_regions()?;
                frame.out.extend_from_slice(&frame.scratch);
            }
            Strategy::DeltaRle => {
                frame.write_changed_regions()?;
                frame.rle.encode_into(&frame.scratch, &mut frame.out);
            }
            Strategy::DeltaHuffman => {
                frame.write_changed_regions()?;
                // Nothing changed: the zero region count is the whole payload.
                if !frame.scratch.is_empty() {
                    write_huffman(
                        &mut frame.freq,
                        &mut frame.huffman,
                        &frame.scratch,
                        &mut frame.out,
                    )?;
                }
            }
        }
        Ok(())
    }
}
