//! Encode pump: turns completed grids into wire frames.
//!
//! Runs as a tokio task. Each grid received from the parser goes through
//! [`FrameEncoder::push_frame`], and the winning frame is queued for a
//! dedicated writer thread that owns the sink. Sink writes block, so keeping
//! them off the runtime lets a stop signal reach the pump even while the
//! reader on the other end of the sink has stalled.
//!
//! The pump ends when the parser closes its channel (after draining what is
//! queued) or when a stop signal arrives.

use std::io::{self, Write};

use ansicast_codec::{EncodeError, FrameEncoder, Strategy};
use ansicast_grid::{FrameReceiver, Grid};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::sink::FrameSink;

/// Frames that may wait for the writer thread.
const WRITE_QUEUE: usize = 4;

/// Totals reported when the pump stops.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PumpSummary {
    pub grids: u64,
    /// Grids no strategy could encode, sent as raw frames instead.
    pub raw_fallbacks: u64,
    /// Bytes of wire frames handed to the writer.
    pub bytes_out: u64,
}

/// Start the encode pump.
///
/// Resolves to the summary, or to the sink error that stopped it. After a
/// stop signal it resolves without waiting for queued frames to be written.
pub fn start_encode_pump<W>(
    mut frames: FrameReceiver,
    mut encoder: FrameEncoder,
    sink: FrameSink<W>,
    mut stop_rx: mpsc::Receiver<()>,
) -> JoinHandle<io::Result<PumpSummary>>
where
    W: Write + Send + 'static,
{
    tokio::spawn(async move {
        let mut summary = PumpSummary::default();
        let (writer, mut written) = start_sink_writer(sink)?;
        let mut stopped = false;

        loop {
            let grid = tokio::select! {
                grid = frames.recv() => match grid {
                    Some(grid) => grid,
                    None => break,
                },
                _ = stop_rx.recv() => {
                    stopped = true;
                    break;
                }
            };

            summary.grids += 1;
            let Some(frame) = encode_one(&mut encoder, &grid, &mut summary) else {
                continue;
            };

            tokio::select! {
                sent = writer.send(frame) => {
                    // The writer only hangs up after a failed write.
                    if sent.is_err() {
                        break;
                    }
                }
                _ = stop_rx.recv() => {
                    stopped = true;
                    break;
                }
            }
        }

        drop(writer);
        report(&encoder, &summary);
        if stopped {
            log::debug!("encode pump stopped");
            return Ok(summary);
        }

        tokio::select! {
            result = &mut written => result.unwrap_or(Ok(()))?,
            _ = stop_rx.recv() => log::debug!("encode pump stopped while flushing"),
        }
        Ok(summary)
    })
}

/// Move the sink onto its own thread. Frames sent to the returned queue are
/// written in order; the receiver reports how writing ended once the queue
/// is closed or a write fails.
fn start_sink_writer<W>(
    mut sink: FrameSink<W>,
) -> io::Result<(mpsc::Sender<Vec<u8>>, oneshot::Receiver<io::Result<()>>)>
where
    W: Write + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE);
    let (done_tx, done_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("ansicast-sink".to_string())
        .spawn(move || {
            let mut result = Ok(());
            while let Some(frame) = rx.blocking_recv() {
                if let Err(e) = sink.send(&frame) {
                    log::error!("frame sink failed: {e}");
                    result = Err(e);
                    break;
                }
            }
            log::debug!("sink wrote {} records, {} bytes", sink.frames(), sink.bytes());
            let _ = done_tx.send(result);
        })?;

    Ok((tx, done_rx))
}

fn encode_one(
    encoder: &mut FrameEncoder,
    grid: &Grid,
    summary: &mut PumpSummary,
) -> Option<Vec<u8>> {
    let frame = match encoder.push_frame(grid) {
        Ok(frame) => {
            log::debug!(
                "grid {} -> {} ({} bytes)",
                summary.grids,
                frame.strategy(),
                frame.len()
            );
            frame.to_vec()
        }
        Err(EncodeError::NoStrategySucceeded) => {
            // Keep the stream complete: a raw frame always decodes.
            summary.raw_fallbacks += 1;
            log::warn!(
                "no strategy encoded grid {}, sending it raw",
                summary.grids
            );
            raw_frame(grid)
        }
        Err(e) => {
            log::error!("dropping grid {}: {e}", summary.grids);
            return None;
        }
    };
    summary.bytes_out += frame.len() as u64;
    Some(frame)
}

/// An owned raw wire frame for `grid`.
pub fn raw_frame(grid: &Grid) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + grid.as_bytes().len());
    frame.push(Strategy::Raw.as_u8());
    frame.extend_from_slice(grid.as_bytes());
    frame
}

fn report(encoder: &FrameEncoder, summary: &PumpSummary) {
    let raw_size = 1 + 2 * encoder.rows() * encoder.cols();
    let raw_total = summary.grids * raw_size as u64;
    log::info!(
        "encoded {} grids into {} bytes ({} as raw), {} raw fallbacks",
        summary.grids,
        summary.bytes_out,
        raw_total,
        summary.raw_fallbacks
    );
    for (strategy, stats) in encoder.stats() {
        log::info!(
            "  {:<14} wins {:>6}  bytes {:>10}  failed {:>6}",
            strategy.name(),
            stats.wins,
            stats.bytes_won,
            stats.failures
        );
    }
}
