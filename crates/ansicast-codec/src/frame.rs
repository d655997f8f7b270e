use ansicast_grid::Grid;

use crate::error::{EncodeError, HuffmanError};
use crate::freq::FrequencyTable;
use crate::huffman::HuffmanCoder;
use crate::quadtree::{Quadtree, QuadtreeParams, Region};
use crate::rle::RleCoder;
use crate::strategy::Strategy;

/// Working state owned by one registered strategy.
///
/// Allocated once at registration and reused for every grid: the coders,
/// region list and byte buffers are cleared and refilled, never replaced.
/// The output buffer is overwritten by the next [`begin`](Self::begin), so a
/// caller holding on to an encoded frame must copy it first.
///
/// When `track_previous` is set the frame also keeps the prior grid and a
/// pair of quadtrees (one per grid) for delta encoding. The trees swap roles
/// on every grid and the stale one is rebound, so their node arenas survive
/// across frames.
#[derive(Debug)]
pub struct EncodingFrame {
    rows: usize,
    cols: usize,
    params: QuadtreeParams,
    track_previous: bool,
    previous: Option<Grid>,
    current: Option<Grid>,
    prev_tree: Option<Quadtree>,
    curr_tree: Option<Quadtree>,
    pub(crate) freq: FrequencyTable,
    pub(crate) huffman: HuffmanCoder,
    pub(crate) rle: RleCoder,
    pub(crate) regions: Vec<Region>,
    pub(crate) scratch: Vec<u8>,
    pub(crate) out: Vec<u8>,
}

impl EncodingFrame {
    pub fn new(rows: usize, cols: usize, params: QuadtreeParams, track_previous: bool) -> Self {
        Self {
            rows,
            cols,
            params,
            track_previous,
            previous: None,
            current: None,
            prev_tree: None,
            curr_tree: None,
            freq: FrequencyTable::new(),
            huffman: HuffmanCoder::new(),
            rle: RleCoder::new(),
            regions: Vec::new(),
            scratch: Vec::new(),
            out: Vec::with_capacity(1 + 2 * rows * cols),
        }
    }

    /// Shift the current grid into `previous` and install `grid`.
    pub fn push_grid(&mut self, grid: Grid) -> Result<(), EncodeError> {
        if grid.rows() != self.rows || grid.cols() != self.cols {
            return Err(EncodeError::DimensionMismatch {
                rows: self.rows,
                cols: self.cols,
                got_rows: grid.rows(),
                got_cols: grid.cols(),
            });
        }

        if self.track_previous {
            std::mem::swap(&mut self.prev_tree, &mut self.curr_tree);
            match self.curr_tree.as_mut() {
                Some(tree) => tree.rebind(&grid)?,
                None => self.curr_tree = Some(Quadtree::partition(&grid, self.params)),
            }
            self.previous = self.current.replace(grid);
        } else {
            self.current = Some(grid);
        }
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn current(&self) -> Result<&Grid, EncodeError> {
        self.current.as_ref().ok_or(EncodeError::MissingCurrent)
    }

    pub fn previous(&self) -> Result<&Grid, EncodeError> {
        self.previous.as_ref().ok_or(EncodeError::MissingPrevious)
    }

    /// Start a new output: clear the buffer and write the strategy id.
    pub fn begin(&mut self, strategy: Strategy) {
        self.out.clear();
        self.out.push(strategy.as_u8());
    }

    /// The bytes written since the last [`begin`](Self::begin), id included.
    pub fn output(&self) -> &[u8] {
        &self.out
    }

    pub fn output_mut(&mut self) -> &mut Vec<u8> {
        &mut self.out
    }

    /// Diff the two grids, append the region header to the output and gather
    /// the changed chars, then the changed colors, into `scratch`.
    pub(crate) fn write_changed_regions(&mut self) -> Result<(), EncodeError> {
        let current = self.current.as_ref().ok_or(EncodeError::MissingCurrent)?;
        let (Some(prev_tree), Some(curr_tree)) = (&self.prev_tree, &self.curr_tree) else {
            return Err(EncodeError::MissingPrevious);
        };
        if self.previous.is_none() {
            return Err(EncodeError::MissingPrevious);
        }

        prev_tree.changed_regions_into(curr_tree, &mut self.regions)?;
        let count = u16::try_from(self.regions.len())
            .map_err(|_| EncodeError::TooManyRegions(self.regions.len()))?;

        self.out.extend_from_slice(&count.to_be_bytes());
        for region in &self.regions {
            for field in [region.row, region.col, region.height, region.width] {
                let field = u16::try_from(field)
                    .map_err(|_| EncodeError::TooLarge("region coordinate exceeds u16"))?;
                self.out.extend_from_slice(&field.to_be_bytes());
            }
        }

        self.scratch.clear();
        for half in [current.chars(), current.colors()] {
            for region in &self.regions {
                self.scratch.extend(region.indices(self.cols).map(|i| half[i]));
            }
        }
        Ok(())
    }
}

/// Append a Huffman section for `data`: code table, `u32` bit length, packed
/// bits.
pub(crate) fn write_huffman(
    freq: &mut FrequencyTable,
    huffman: &mut HuffmanCoder,
    data: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    if data.is_empty() {
        return Err(HuffmanError::EmptyInput.into());
    }
    freq.reset();
    freq.observe_all(data);
    huffman.build(freq)?.write_table(out);

    let len_at = out.len();
    out.extend_from_slice(&[0; 4]);
    let bits = huffman.encode(data, out)?;
    let bits = u32::try_from(bits).map_err(|_| EncodeError::TooLarge("bit length exceeds u32"))?;
    out[len_at..len_at + 4].copy_from_slice(&bits.to_be_bytes());
    Ok(())
}
