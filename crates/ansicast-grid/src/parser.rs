use tokio::sync::mpsc;

use crate::grid::Grid;
use crate::sgr::{self, StyledRun};

/// Default number of completed grids that may wait in the channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

const ESC: u8 = 0x1b;

/// Receiving half of the grid hand-off channel.
pub type FrameReceiver = mpsc::Receiver<Grid>;

/// Errors from [`AnsiStreamParser::write`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A chunk did not begin with ESC. The stream is out of sync and the
    /// parser refuses further input. `offset` indexes the `data` passed to
    /// the failing [`AnsiStreamParser::write`]; since chunks are delimited by
    /// ESC it is always 0.
    #[error("stream corrupted at offset {offset}: expected ESC, found {byte:#04x}")]
    Corrupt { offset: usize, byte: u8 },
    /// The frame channel is closed, either by [`AnsiStreamParser::close`] or
    /// because the receiver was dropped.
    #[error("frame channel closed")]
    Closed,
    /// Input was written after a fatal error.
    #[error("parser stopped after stream corruption")]
    Poisoned,
}

/// What to do with an incomplete chunk at the end of a write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrailingChunkPolicy {
    /// Keep the tail in scratch until the next ESC arrives (or until
    /// [`AnsiStreamParser::flush`]). Output does not depend on how the stream
    /// was split across writes.
    #[default]
    Buffer,
    /// On the last row, decode the tail immediately instead of waiting for
    /// the next ESC, so a frame can complete without further input. A split
    /// that lands inside an escape sequence on the last row corrupts the
    /// stream under this policy.
    FlushOnLastRow,
}

/// Incremental ANSI parser that reconstructs fixed-size grids.
///
/// Feed raw program output through [`write`](Self::write). Every time all
/// `rows * cols` cells have been written, the grid is copied into fresh
/// storage and sent down a bounded channel whose receiver is obtained with
/// [`take_frames`](Self::take_frames).
///
/// `write` takes `&mut self`: there is exactly one writer. When the channel is
/// full, `write` blocks until the consumer catches up. It uses
/// `blocking_send`, so call it from a plain thread, never from inside an async
/// task.
pub struct AnsiStreamParser {
    rows: usize,
    cols: usize,
    policy: TrailingChunkPolicy,
    tx: Option<mpsc::Sender<Grid>>,
    rx: Option<FrameReceiver>,
    /// Working cells, `chars ++ colors`.
    buffer: Vec<u8>,
    idx: usize,
    row: usize,
    col: usize,
    /// Incomplete chunk carried over to the next write.
    scratch: Vec<u8>,
    poisoned: bool,
}

impl AnsiStreamParser {
    /// Create a parser for a `rows x cols` screen with the default channel
    /// capacity.
    ///
    /// # Panics
    ///
    /// Panics if `rows` or `cols` is zero.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::with_capacity(rows, cols, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a parser whose channel holds up to `capacity` pending grids.
    ///
    /// # Panics
    ///
    /// Panics if `rows`, `cols` or `capacity` is zero.
    pub fn with_capacity(rows: usize, cols: usize, capacity: usize) -> Self {
        assert!(rows > 0 && cols > 0, "grid dimensions must be non-zero");
        let (tx, rx) = mpsc::channel(capacity);

        Self {
            rows,
            cols,
            policy: TrailingChunkPolicy::default(),
            tx: Some(tx),
            rx: Some(rx),
            buffer: vec![0u8; rows * cols * 2],
            idx: 0,
            row: 0,
            col: 0,
            scratch: Vec::new(),
            poisoned: false,
        }
    }

    /// Set the trailing chunk policy.
    pub fn with_policy(mut self, policy: TrailingChunkPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn policy(&self) -> TrailingChunkPolicy {
        self.policy
    }

    /// Current `(row, col)` write position within the grid being built.
    pub fn position(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    /// Number of bytes held back from earlier writes.
    pub fn pending(&self) -> usize {
        self.scratch.len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Take the receiving end of the grid channel.
    ///
    /// Returns `None` after the first call.
    pub fn take_frames(&mut self) -> Option<FrameReceiver> {
        self.rx.take()
    }

    /// Feed raw bytes into the parser.
    ///
    /// Returns the number of bytes accepted, which is always `data.len()` on
    /// success: an incomplete trailing chunk is kept internally and replayed
    /// in front of the next write.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, ParseError> {
        self.check_open()?;

        if self.scratch.is_empty() {
            self.consume(data, false)?;
        } else {
            let mut joined = std::mem::take(&mut self.scratch);
            joined.extend_from_slice(data);
            self.consume(&joined, false)?;
        }

        Ok(data.len())
    }

    /// Decode whatever is held in scratch as a final, possibly incomplete,
    /// chunk. Call at end of stream.
    pub fn flush(&mut self) -> Result<(), ParseError> {
        self.check_open()?;
        let tail = std::mem::take(&mut self.scratch);
        if tail.is_empty() {
            return Ok(());
        }
        self.consume(&tail, true)
    }

    /// Close the grid channel. The receiver drains what is queued and then
    /// sees the end of the stream. Further writes return
    /// [`ParseError::Closed`].
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            log::debug!("grid channel closed by producer");
        }
        self.scratch.clear();
    }

    fn check_open(&self) -> Result<(), ParseError> {
        if self.poisoned {
            return Err(ParseError::Poisoned);
        }
        if self.tx.is_none() {
            return Err(ParseError::Closed);
        }
        Ok(())
    }

    // Chunks end at the next ESC and scratch always begins with one, so the
    // only byte that can fail the ESC check is the first byte of a write made
    // with empty scratch.
    fn consume(&mut self, data: &[u8], force_partial: bool) -> Result<(), ParseError> {
        let mut idx = 0;

        while idx < data.len() {
            let rest = &data[idx..];
            if rest[0] != ESC {
                return Err(self.corrupt(idx, rest[0]));
            }

            let next_esc = rest[1..].iter().position(|&b| b == ESC).map(|p| p + 1);
            let chunk = match next_esc {
                Some(end) => &rest[..end],
                None if force_partial || self.decode_partial() => rest,
                None => {
                    self.scratch.extend_from_slice(rest);
                    break;
                }
            };

            idx += chunk.len();
            match sgr::parse_chunk(chunk) {
                Ok(Some(run)) => self.place_run(&run)?,
                Ok(None) => {}
                Err(err) => log::debug!("skipping chunk of {} bytes: {err}", chunk.len()),
            }
        }

        Ok(())
    }

    fn decode_partial(&self) -> bool {
        self.policy == TrailingChunkPolicy::FlushOnLastRow && self.row + 1 == self.rows
    }

    fn corrupt(&mut self, offset: usize, byte: u8) -> ParseError {
        log::error!("ANSI stream corrupted at offset {offset} (byte {byte:#04x}), stopping parser");
        self.poisoned = true;
        self.tx = None;
        self.scratch.clear();
        ParseError::Corrupt { offset, byte }
    }

    fn place_run(&mut self, run: &StyledRun) -> Result<(), ParseError> {
        let color = run.color();

        for &c in &run.label {
            match c {
                b'\r' => continue,
                b'\n' => {
                    self.fill_remaining_row();
                    self.col = 0;
                    self.row += 1;
                }
                _ if self.col >= self.cols => {}
                _ => self.place(color, c),
            }
            self.emit_if_complete()?;
        }

        Ok(())
    }

    fn place(&mut self, color: u8, c: u8) {
        let len = self.rows * self.cols;
        self.buffer[self.idx] = c;
        self.buffer[len + self.idx] = color;
        self.idx += 1;
        self.col += 1;
    }

    fn fill_remaining_row(&mut self) {
        while self.col < self.cols {
            self.place(0, b' ');
        }
    }

    fn emit_if_complete(&mut self) -> Result<(), ParseError> {
        if self.idx < self.rows * self.cols {
            return Ok(());
        }

        let grid = Grid::snapshot(self.rows, self.cols, &self.buffer);
        self.idx = 0;
        self.row = 0;
        self.col = 0;

        let tx = self.tx.as_ref().ok_or(ParseError::Closed)?;
        if tx.blocking_send(grid).is_err() {
            log::debug!("grid receiver dropped, closing parser");
            self.tx = None;
            return Err(ParseError::Closed);
        }
        log::trace!("emitted {}x{} grid", self.rows, self.cols);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::quantize;
    use proptest::prelude::*;

    const RED: u8 = quantize(205, 0, 0);
    const GREEN: u8 = quantize(0, 205, 0);

    fn drain(rx: &mut FrameReceiver) -> Vec<Grid> {
        let mut out = Vec::new();
        while let Ok(grid) = rx.try_recv() {
            out.push(grid);
        }
        out
    }

    fn parser(rows: usize, cols: usize) -> (AnsiStreamParser, FrameReceiver) {
        let mut parser = AnsiStreamParser::with_capacity(rows, cols, 64);
        let rx = parser.take_frames().unwrap();
        (parser, rx)
    }

    #[test]
    fn test_two_by_three_scenario() {
        let (mut parser, mut rx) = parser(2, 3);
        let stream = b"\x1b[31mAB\r\nCD\r\n\x1b[0m";
        assert_eq!(parser.write(stream), Ok(stream.len()));

        let grids = drain(&mut rx);
        assert_eq!(grids.len(), 1);
        let grid = &grids[0];
        assert_eq!(grid.row_text(0), "AB ");
        assert_eq!(grid.row_text(1), "CD ");
        assert_eq!(grid.colors(), &[RED, RED, 0, RED, RED, 0]);
    }

    #[test]
    fn test_newline_pads_rest_of_row() {
        let (mut parser, mut rx) = parser(2, 5);
        parser.write(b"\x1b[32mX\n\x1b[32mabcde\x1b[0m").unwrap();

        let grid = drain(&mut rx).pop().unwrap();
        assert_eq!(grid.row_text(0), "X    ");
        for col in 1..5 {
            assert_eq!(grid.char_at(0, col), Some(b' '));
            assert_eq!(grid.color_at(0, col), Some(0));
        }
        assert_eq!(grid.color_at(0, 0), Some(GREEN));
        assert_eq!(grid.row_text(1), "abcde");
    }

    #[test]
    fn test_extra_columns_discarded() {
        let (mut parser, mut rx) = parser(2, 3);
        parser.write(b"\x1b[31mABCDEFG\r\nxyz\x1b[0m").unwrap();

        let grid = drain(&mut rx).pop().unwrap();
        assert_eq!(grid.row_text(0), "ABC");
        assert_eq!(grid.row_text(1), "xyz");
    }

    #[test]
    fn test_consecutive_grids_are_independent() {
        let (mut parser, mut rx) = parser(1, 2);
        parser.write(b"\x1b[31mab\x1b[32mcd\x1b[0m").unwrap();

        let grids = drain(&mut rx);
        assert_eq!(grids.len(), 2);
        assert_eq!(grids[0].chars(), b"ab");
        assert_eq!(grids[0].colors(), &[RED, RED]);
        assert_eq!(grids[1].chars(), b"cd");
        assert_eq!(grids[1].colors(), &[GREEN, GREEN]);
        assert!(!std::ptr::eq(grids[0].as_bytes(), grids[1].as_bytes()));
    }

    #[test]
    fn test_partial_escape_buffered_across_writes() {
        let (mut parser, mut rx) = parser(2, 2);
        assert_eq!(parser.write(b"\x1b[3"), Ok(3));
        assert_eq!(parser.pending(), 3);
        assert_eq!(parser.write(b"1mAB\n\x1b[3"), Ok(8));
        assert_eq!(parser.position(), (1, 0));
        parser.write(b"2mCD\x1b[0m").unwrap();

        let grid = drain(&mut rx).pop().unwrap();
        assert_eq!(grid.chars(), b"ABCD");
        assert_eq!(grid.colors(), &[RED, RED, GREEN, GREEN]);
    }

    #[test]
    fn test_buffer_policy_waits_for_next_escape() {
        let (mut parser, mut rx) = parser(1, 3);
        parser.write(b"\x1b[31mABC").unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(parser.pending(), 8);

        parser.flush().unwrap();
        assert_eq!(parser.pending(), 0);
        let grid = drain(&mut rx).pop().unwrap();
        assert_eq!(grid.chars(), b"ABC");
    }

    #[test]
    fn test_flush_on_last_row_policy() {
        let mut parser =
            AnsiStreamParser::with_capacity(2, 3, 4).with_policy(TrailingChunkPolicy::FlushOnLastRow);
        let mut rx = parser.take_frames().unwrap();

        // Not on the last row yet: the tail is still buffered.
        parser.write(b"\x1b[31mAB\n").unwrap();
        assert_eq!(parser.pending(), 8);
        assert_eq!(parser.position(), (0, 0));

        // The next ESC completes the first chunk, which moves to the last
        // row, so the new tail is decoded right away.
        parser.write(b"\x1b[32mXYZ").unwrap();
        assert_eq!(parser.pending(), 0);
        let grid = drain(&mut rx).pop().unwrap();
        assert_eq!(grid.row_text(0), "AB ");
        assert_eq!(grid.row_text(1), "XYZ");
    }

    #[test]
    fn test_flush_on_last_row_split_escape_is_corruption() {
        let mut parser =
            AnsiStreamParser::with_capacity(1, 3, 4).with_policy(TrailingChunkPolicy::FlushOnLastRow);
        parser.write(b"\x1b[3").unwrap();
        assert_eq!(
            parser.write(b"1mA"),
            Err(ParseError::Corrupt { offset: 0, byte: b'1' })
        );
    }

    #[test]
    fn test_unsupported_sequences_skipped() {
        let (mut parser, mut rx) = parser(1, 2);
        parser.write(b"\x1b[2Jgone\x1b[31mok\x1b[0m").unwrap();

        let grid = drain(&mut rx).pop().unwrap();
        assert_eq!(grid.chars(), b"ok");
    }

    #[test]
    fn test_corrupt_stream_is_fatal() {
        let (mut parser, mut rx) = parser(1, 2);
        assert_eq!(
            parser.write(b"hello"),
            Err(ParseError::Corrupt { offset: 0, byte: b'h' })
        );
        assert!(parser.is_poisoned());
        assert_eq!(parser.write(b"\x1b[31mok"), Err(ParseError::Poisoned));
        // The channel is closed, so the consumer sees the end of the stream.
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn test_corrupt_offset_is_relative_to_write() {
        let (mut buffered, mut rx) = parser(1, 4);
        let (mut fresh, _fresh_rx) = parser(1, 1);

        // With a chunk held in scratch, bytes without ESC extend its label.
        buffered.write(b"\x1b[31mA").unwrap();
        buffered.write(b"xyz").unwrap();
        assert_eq!(buffered.pending(), 9);
        buffered.write(b"\x1b[0m").unwrap();
        assert_eq!(rx.try_recv().unwrap().chars(), b"Axyz");

        assert_eq!(
            fresh.write(b"oops\x1b[0m"),
            Err(ParseError::Corrupt { offset: 0, byte: b'o' })
        );
    }

    #[test]
    fn test_control_bytes_take_a_cell() {
        let (mut tab, mut tab_rx) = parser(1, 3);
        let (mut bell, mut bell_rx) = parser(1, 4);

        tab.write(b"\x1b[31mA\tB\x1b[0m").unwrap();
        let grid = tab_rx.try_recv().unwrap();
        assert_eq!(grid.chars(), b"A\tB");
        assert_eq!(grid.colors(), &[RED, RED, RED]);

        bell.write(b"\x1b[0m\x07\x08ab\x1b[0m").unwrap();
        assert_eq!(bell_rx.try_recv().unwrap().chars(), b"\x07\x08ab");
    }

    #[test]
    fn test_multibyte_chars_take_one_cell() {
        let (mut parser, mut rx) = parser(1, 3);
        parser.write("\x1b[32m\u{e9}\u{2588}z\x1b[0m".as_bytes()).unwrap();

        let grid = rx.try_recv().unwrap();
        assert_eq!(grid.chars(), b"??z");
        assert_eq!(grid.colors(), &[GREEN, GREEN, GREEN]);
    }

    #[test]
    fn test_close_ends_channel() {
        let (mut parser, mut rx) = parser(1, 2);
        parser.write(b"\x1b[31mab\x1b[0m").unwrap();
        parser.close();

        assert_eq!(parser.write(b"\x1b[31mab"), Err(ParseError::Closed));
        assert!(rx.blocking_recv().is_some());
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn test_dropped_receiver_reports_closed() {
        let (mut parser, rx) = parser(1, 2);
        drop(rx);
        assert_eq!(parser.write(b"\x1b[31mab\x1b[0m"), Err(ParseError::Closed));
        assert_eq!(parser.write(b"\x1b[31mab"), Err(ParseError::Closed));
    }

    #[test]
    fn test_take_frames_only_once() {
        let mut parser = AnsiStreamParser::new(1, 1);
        assert!(parser.take_frames().is_some());
        assert!(parser.take_frames().is_none());
    }

    #[test]
    fn test_full_channel_blocks_without_dropping() {
        let mut parser = AnsiStreamParser::with_capacity(1, 1, 1);
        let mut rx = parser.take_frames().unwrap();

        let producer = std::thread::spawn(move || {
            parser.write(b"\x1b[31ma\x1b[31mb\x1b[31mc\x1b[0m").unwrap();
        });

        let mut seen = Vec::new();
        while let Some(grid) = rx.blocking_recv() {
            seen.push(grid.chars()[0]);
        }
        producer.join().unwrap();
        assert_eq!(seen, b"abc");
    }

    fn grids_from_writes<'a>(
        rows: usize,
        cols: usize,
        writes: impl IntoIterator<Item = &'a [u8]>,
    ) -> Vec<Grid> {
        let (mut parser, mut rx) = parser(rows, cols);
        for data in writes {
            parser.write(data).unwrap();
        }
        parser.flush().unwrap();
        drain(&mut rx)
    }

    const GAME_STREAM: &[u8] = b"\x1b[31m#..\x1b[38;5;46m@\r\n\x1b[0m.\x1b[38;2;200;100;50m$$\x1b[1;34mXY\r\n\
\x1b[33m++++\r\n\x1b[2J\x1b[35mabcdef\r\n\x1b[0m  \x1b[31mz\r\n";

    #[test]
    fn test_single_byte_writes_match_single_write() {
        let whole = grids_from_writes(3, 4, [GAME_STREAM]);
        let bytewise = grids_from_writes(3, 4, GAME_STREAM.chunks(1));
        assert!(!whole.is_empty());
        assert_eq!(whole, bytewise);
    }

    proptest! {
        #[test]
        fn test_arbitrary_splits_match_single_write(cuts in proptest::collection::vec(0..GAME_STREAM.len(), 0..12)) {
            let mut cuts = cuts;
            cuts.push(0);
            cuts.push(GAME_STREAM.len());
            cuts.sort_unstable();
            let pieces: Vec<&[u8]> = cuts.windows(2).map(|w| &GAME_STREAM[w[0]..w[1]]).collect();

            let whole = grids_from_writes(3, 4, [GAME_STREAM]);
            let split = grids_from_writes(3, 4, pieces);
            prop_assert_eq!(whole, split);
        }
    }
}
