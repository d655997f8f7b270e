//! Capture thread that reads game output and feeds it into the parser.
//!
//! PTY reads block, and so does the parser when its grid channel is full, so
//! both run on a dedicated OS thread rather than in the async runtime. The
//! reader is owned by the thread itself (not behind the session mutex), so a
//! blocked read never stops the main task from checking on or killing the
//! game.

use std::io::{self, Read};
use std::thread::JoinHandle;

use ansicast_grid::ParseError;
use ansicast_pty::PtyError;
use tokio::sync::mpsc;

use crate::state::SharedSession;

/// Why the capture loop ended.
#[derive(Debug)]
pub enum CaptureEnd {
    /// The game closed its terminal.
    Eof,
    /// A stop signal arrived or the stop channel was dropped.
    Stopped,
    /// The frame consumer went away.
    ConsumerGone,
    /// The game's output could not be parsed; capture cannot continue.
    Corrupt(ParseError),
    /// Reading the PTY failed.
    Io(io::Error),
}

/// Start the capture loop on a dedicated OS thread.
///
/// However the loop ends, the session is finished on the way out so the grid
/// channel closes and the encode pump can drain and stop.
pub fn start_io_thread(
    session: SharedSession,
    reader: Box<dyn Read + Send>,
    mut stop_rx: mpsc::Receiver<()>,
) -> io::Result<JoinHandle<CaptureEnd>> {
    std::thread::Builder::new()
        .name("ansicast-capture".to_string())
        .spawn(move || {
            let end = io_loop(&session, reader, &mut stop_rx);
            match session.lock() {
                Ok(mut state) => {
                    if let Err(e) = state.finish() {
                        log::warn!("failed to flush capture: {e}");
                    }
                }
                Err(_) => log::error!("capture session lock poisoned"),
            }
            log::info!("capture ended: {end:?}");
            end
        })
}

fn io_loop(
    session: &SharedSession,
    mut reader: Box<dyn Read + Send>,
    stop_rx: &mut mpsc::Receiver<()>,
) -> CaptureEnd {
    let mut buf = [0u8; 65536];

    loop {
        // Check for stop signal (non-blocking).
        match stop_rx.try_recv() {
            Ok(()) | Err(mpsc::error::TryRecvError::Disconnected) => return CaptureEnd::Stopped,
            Err(mpsc::error::TryRecvError::Empty) => {}
        }

        let n = match reader.read(&mut buf) {
            Ok(0) => return CaptureEnd::Eof,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Linux reports EIO once the game side of the PTY is gone.
            Err(e) if e.raw_os_error() == Some(5) => return CaptureEnd::Eof,
            Err(e) => return CaptureEnd::Io(e),
        };

        // Hold the lock only while parsing. This can block on a full grid
        // channel, which is the intended backpressure.
        let mut state = match session.lock() {
            Ok(s) => s,
            Err(_) => return CaptureEnd::Stopped,
        };
        match state.feed(&buf[..n]) {
            Ok(()) => {}
            Err(PtyError::Parse(ParseError::Closed)) => return CaptureEnd::ConsumerGone,
            Err(PtyError::Parse(e)) => return CaptureEnd::Corrupt(e),
            Err(e) => {
                log::warn!("capture feed failed: {e}");
                return CaptureEnd::Stopped;
            }
        }
    }
}
