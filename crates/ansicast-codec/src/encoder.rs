use ansicast_grid::Grid;

use crate::error::EncodeError;
use crate::frame::EncodingFrame;
use crate::quadtree::QuadtreeParams;
use crate::strategy::{EncodingStrategy, Strategy};

/// The winning encoding of one grid.
///
/// Borrows the winning strategy's output buffer, which the next
/// [`FrameEncoder::push_frame`] overwrites. Use [`to_vec`](Self::to_vec) to
/// keep it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WireFrame<'a> {
    strategy: Strategy,
    bytes: &'a [u8],
}

impl<'a> WireFrame<'a> {
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The full wire frame, id byte included.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[1..]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

/// Running totals for one registered strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StrategyStats {
    /// Grids this strategy produced an encoding for.
    pub attempts: u64,
    pub failures: u64,
    pub wins: u64,
    /// Bytes emitted in winning frames.
    pub bytes_won: u64,
}

struct Slot {
    strategy: Box<dyn EncodingStrategy>,
    frame: EncodingFrame,
    stats: StrategyStats,
}

/// Runs every registered strategy on each grid and keeps the smallest output.
///
/// Strategies run in registration order and each owns its own
/// [`EncodingFrame`]. Selection happens after all of them have finished: the
/// fewest bytes win, and on a tie the earlier registration wins.
pub struct FrameEncoder {
    rows: usize,
    cols: usize,
    params: QuadtreeParams,
    slots: Vec<Slot>,
    sizes: Vec<Option<usize>>,
}

impl FrameEncoder {
    /// An encoder with no strategies.
    pub fn new(rows: usize, cols: usize, params: QuadtreeParams) -> Self {
        Self {
            rows,
            cols,
            params,
            slots: Vec::new(),
            sizes: Vec::new(),
        }
    }

    /// An encoder with the built-in `strategies` registered in order.
    pub fn with_strategies(
        rows: usize,
        cols: usize,
        params: QuadtreeParams,
        strategies: &[Strategy],
    ) -> Self {
        let mut encoder = Self::new(rows, cols, params);
        for &strategy in strategies {
            encoder.register(strategy);
        }
        encoder
    }

    /// Append a strategy and allocate its working frame.
    pub fn register<S>(&mut self, strategy: S)
    where
        S: EncodingStrategy + 'static,
    {
        let frame = EncodingFrame::new(
            self.rows,
            self.cols,
            self.params,
            strategy.requires_previous(),
        );
        log::debug!(
            "registered strategy {} for {}x{} grids",
            strategy.id(),
            self.rows,
            self.cols
        );
        self.slots.push(Slot {
            strategy: Box::new(strategy),
            frame,
            stats: StrategyStats::default(),
        });
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Registered strategy ids, in order.
    pub fn strategies(&self) -> impl Iterator<Item = Strategy> + '_ {
        self.slots.iter().map(|slot| slot.strategy.id())
    }

    /// Per-strategy totals, in registration order.
    pub fn stats(&self) -> impl Iterator<Item = (Strategy, StrategyStats)> + '_ {
        self.slots.iter().map(|slot| (slot.strategy.id(), slot.stats))
    }

    /// Encode `grid` with every strategy and return the smallest result.
    ///
    /// A strategy error only removes that strategy from this round. The
    /// call fails with [`EncodeError::NoStrategySucceeded`] when none
    /// succeeds, and with [`EncodeError::DimensionMismatch`] when `grid` has
    /// the wrong shape.
    pub fn push_frame(&mut self, grid: &Grid) -> Result<WireFrame<'_>, EncodeError> {
        if grid.rows() != self.rows || grid.cols() != self.cols {
            return Err(EncodeError::DimensionMismatch {
                rows: self.rows,
                cols: self.cols,
                got_rows: grid.rows(),
                got_cols: grid.cols(),
            });
        }

        self.sizes.clear();
        for slot in &mut self.slots {
            slot.frame.push_grid(grid.clone())?;
            slot.stats.attempts += 1;
            let size = match slot.strategy.encode(&mut slot.frame) {
                Ok(()) => Some(slot.frame.output().len()),
                Err(e) => {
                    slot.stats.failures += 1;
                    log::trace!("strategy {} skipped: {}", slot.strategy.id(), e);
                    None
                }
            };
            self.sizes.push(size);
        }

        let mut best: Option<(usize, usize)> = None;
        for (idx, size) in self.sizes.iter().enumerate() {
            let Some(size) = *size else { continue };
            if best.map_or(true, |(_, best_size)| size < best_size) {
                best = Some((idx, size));
            }
        }

        let Some((idx, size)) = best else {
            log::warn!(
                "no strategy could encode {}x{} grid",
                self.rows,
                self.cols
            );
            return Err(EncodeError::NoStrategySucceeded);
        };

        let slot = &mut self.slots[idx];
        slot.stats.wins += 1;
        slot.stats.bytes_won += size as u64;
        log::debug!(
            "strategy {} won with {} bytes",
            slot.strategy.id(),
            size
        );
        Ok(WireFrame {
            strategy: slot.strategy.id(),
            bytes: slot.frame.output(),
        })
    }
}

impl std::fmt::Debug for FrameEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEncoder")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("params", &self.params)
            .field("strategies", &self.strategies().collect::<Vec<_>>())
            .finish()
    }
}
