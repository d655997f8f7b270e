use ansicast_grid::Grid;

use crate::error::DecodeError;
use crate::huffman::HuffmanCode;
use crate::quadtree::Region;
use crate::rle::decode_pairs;
use crate::strategy::Strategy;
use crate::wire::Reader;

/// Rebuilds grids from wire frames.
///
/// Delta frames apply to the last successfully decoded grid. A frame that
/// fails to decode leaves that grid in place, so the stream can continue
/// with the next frame.
#[derive(Clone, Debug)]
pub struct FrameDecoder {
    rows: usize,
    cols: usize,
    previous: Option<Grid>,
}

impl FrameDecoder {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            previous: None,
        }
    }

    /// The last grid decoded.
    pub fn previous(&self) -> Option<&Grid> {
        self.previous.as_ref()
    }

    /// Forget the previous grid; the next frame must not be a delta.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn decode(&mut self, frame: &[u8]) -> Result<Grid, DecodeError> {
        let (&id, payload) = frame.split_first().ok_or(DecodeError::EmptyFrame)?;
        let strategy = Strategy::try_from(id)?;
        let n = self.rows * self.cols;
        let mut reader = Reader::new(payload);

        let cells = match strategy {
            Strategy::Raw => reader.bytes(2 * n)?.to_vec(),
            Strategy::Rle => {
                let mut cells = Vec::with_capacity(2 * n);
                decode_pairs(&mut reader, n, &mut cells)?;
                decode_pairs(&mut reader, n, &mut cells)?;
                cells
            }
            Strategy::Huffman => read_huffman(&mut reader, 2 * n)?,
            Strategy::DeltaRaw | Strategy::DeltaRle | Strategy::DeltaHuffman => {
                let previous = self.previous.as_ref().ok_or(DecodeError::MissingPrevious)?;
                let regions = self.read_regions(&mut reader)?;
                let area: usize = regions.iter().map(Region::area).sum();
                let changed = match strategy {
                    Strategy::DeltaRaw => reader.bytes(2 * area)?.to_vec(),
                    Strategy::DeltaRle => {
                        let mut changed = Vec::with_capacity(2 * area);
                        decode_pairs(&mut reader, 2 * area, &mut changed)?;
                        changed
                    }
                    _ if area == 0 => Vec::new(),
                    _ => read_huffman(&mut reader, 2 * area)?,
                };
                apply_regions(previous, &regions, &changed)
            }
        };
        reader.finish()?;

        let grid = Grid::from_cells(self.rows, self.cols, cells)
            .ok_or(DecodeError::Malformed("decoded grid has the wrong size"))?;
        self.previous = Some(grid.clone());
        Ok(grid)
    }

    fn read_regions(&self, reader: &mut Reader<'_>) -> Result<Vec<Region>, DecodeError> {
        let count = reader.u16()? as usize;
        let mut regions = Vec::with_capacity(count);
        for _ in 0..count {
            let region = Region::new(
                reader.u16()? as usize,
                reader.u16()? as usize,
                reader.u16()? as usize,
                reader.u16()? as usize,
            );
            if !region.fits(self.rows, self.cols) {
                return Err(DecodeError::Malformed("region outside the grid"));
            }
            regions.push(region);
        }
        Ok(regions)
    }
}

fn read_huffman(reader: &mut Reader<'_>, expected: usize) -> Result<Vec<u8>, DecodeError> {
    let (code, used) = HuffmanCode::read_table(reader.rest())?;
    reader.advance(used)?;
    let bits = reader.u32()? as usize;
    let packed = reader.bytes(bits.div_ceil(8))?;
    let data = code.decode(bits, packed)?;
    if data.len() != expected {
        return Err(DecodeError::Malformed("huffman section has the wrong length"));
    }
    Ok(data)
}

/// Copy `previous` and overwrite the regions with `changed`, which holds
/// every region's chars followed by every region's colors.
fn apply_regions(previous: &Grid, regions: &[Region], changed: &[u8]) -> Vec<u8> {
    let n = previous.len();
    let cols = previous.cols();
    let mut cells = previous.as_bytes().to_vec();
    let mut src = changed.iter().copied();
    for half in [0, n] {
        for region in regions {
            for (idx, value) in region.indices(cols).zip(&mut src) {
                cells[half + idx] = value;
            }
        }
    }
    cells
}
