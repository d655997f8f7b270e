//! ansicast-pty: runs the captured program under a pseudo-terminal.
//!
//! This crate is the byte source for the capture pipeline. It spawns the
//! game with a PTY sized to the capture grid and feeds everything the game
//! prints into an [`AnsiStreamParser`](ansicast_grid::AnsiStreamParser).
//!
//! # Architecture
//!
//! - [`PtyHandle`]: PTY process management (spawn, read, wait, kill).
//! - [`GameKiller`]: stops the game from a thread that cannot lock the session.
//! - [`CaptureSession`]: pairs a `PtyHandle` with a parser; reading is either
//!   done in place with [`CaptureSession::process_pty_output`] or on a
//!   dedicated thread after [`CaptureSession::take_pty_reader`].

pub mod pty;
pub mod session;

pub use pty::{GameCommand, GameKiller, PtyError, PtyHandle};
pub use session::CaptureSession;
