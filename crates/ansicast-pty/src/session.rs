use ansicast_grid::{AnsiStreamParser, FrameReceiver, TrailingChunkPolicy};

use crate::pty::{GameCommand, GameKiller, PtyError, PtyHandle};

/// A captured game: the PTY process plus the parser its output feeds.
///
/// Grids come out of the receiver returned by
/// [`take_frames`](Self::take_frames). Output can be pumped in place with
/// [`process_pty_output`](Self::process_pty_output), or the reader can be
/// moved to a dedicated thread with [`take_pty_reader`](Self::take_pty_reader)
/// and the bytes handed back through [`feed`](Self::feed).
pub struct CaptureSession {
    pty: PtyHandle,
    parser: AnsiStreamParser,
    bytes_in: u64,
    finished: bool,
    exit_code: Option<u32>,
}

impl CaptureSession {
    /// Spawn `command` on a `cols x rows` PTY and attach a parser of the same
    /// size.
    pub fn spawn(
        command: &GameCommand,
        rows: u16,
        cols: u16,
        channel_capacity: usize,
        policy: TrailingChunkPolicy,
    ) -> Result<Self, PtyError> {
        let pty = PtyHandle::spawn(command, cols, rows)?;
        let parser = AnsiStreamParser::with_capacity(rows as usize, cols as usize, channel_capacity)
            .with_policy(policy);

        Ok(Self {
            pty,
            parser,
            bytes_in: 0,
            finished: false,
            exit_code: None,
        })
    }

    /// The receiving end of the grid channel. Returns `None` after the first
    /// call.
    pub fn take_frames(&mut self) -> Option<FrameReceiver> {
        self.parser.take_frames()
    }

    /// Extract the PTY reader for use in a dedicated I/O thread.
    ///
    /// After this, [`process_pty_output`](Self::process_pty_output) fails with
    /// [`PtyError::ReaderTaken`].
    pub fn take_pty_reader(&mut self) -> Option<Box<dyn std::io::Read + Send>> {
        self.pty.take_reader()
    }

    /// Read one batch of game output and feed it to the parser.
    ///
    /// Blocks until output is available. Returns the number of bytes read;
    /// `0` means the game closed its terminal, at which point the session is
    /// [finished](Self::finish).
    pub fn process_pty_output(&mut self) -> Result<usize, PtyError> {
        let mut buf = [0u8; 4096];
        let n = match self.pty.read(&mut buf) {
            Ok(n) => n,
            // Linux reports EIO once the child side of the PTY is gone.
            Err(PtyError::IoError(e)) if e.raw_os_error() == Some(5) => 0,
            Err(e) => return Err(e),
        };

        if n == 0 {
            self.finish()?;
            return Ok(0);
        }
        self.feed(&buf[..n])?;
        Ok(n)
    }

    /// Parse bytes read elsewhere. May block while the grid channel is full.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), PtyError> {
        self.bytes_in += data.len() as u64;
        self.parser.write(data)?;
        Ok(())
    }

    /// End of input: parse whatever is buffered and close the grid channel.
    /// Safe to call more than once.
    pub fn finish(&mut self) -> Result<(), PtyError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let result = if self.parser.is_poisoned() {
            Ok(())
        } else {
            self.parser.flush()
        };
        self.parser.close();
        log::debug!(
            "capture finished after {} bytes, {} left unparsed",
            self.bytes_in,
            self.parser.pending()
        );
        match result {
            // The consumer going away first is a normal way to end.
            Ok(()) | Err(ansicast_grid::ParseError::Closed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Total bytes handed to the parser.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Check if the game is still running.
    pub fn is_alive(&mut self) -> bool {
        self.exit_code().is_none()
    }

    /// Exit code once the game has exited.
    pub fn exit_code(&mut self) -> Option<u32> {
        if self.exit_code.is_none() {
            self.exit_code = self.pty.try_wait();
        }
        self.exit_code
    }

    /// A handle that stops the game without locking the session.
    pub fn killer(&self) -> GameKiller {
        self.pty.killer()
    }

    /// Terminate the game.
    pub fn kill(&mut self) -> Result<(), PtyError> {
        if self.is_alive() {
            self.pty.kill()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ansicast_grid::quantize;
    use std::io::Read;
    use std::thread;
    use std::time::{Duration, Instant};

    fn printf(format: &str, rows: u16, cols: u16) -> CaptureSession {
        let cmd = GameCommand::new("/bin/sh")
            .arg("-c")
            .arg(format!("printf '{format}'"));
        CaptureSession::spawn(&cmd, rows, cols, 4, TrailingChunkPolicy::Buffer).unwrap()
    }

    fn pump_to_end(session: &mut CaptureSession) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            match session.process_pty_output() {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
        session.finish().unwrap();
    }

    #[test]
    fn test_captures_colored_grid() {
        let mut session = printf(r"\033[31mAB\nCD\n\033[0m", 2, 3);
        let mut frames = session.take_frames().unwrap();
        pump_to_end(&mut session);

        let grid = frames.blocking_recv().expect("one grid");
        assert_eq!(grid.row_text(0), "AB ");
        assert_eq!(grid.row_text(1), "CD ");

        // xterm red is (205, 0, 0).
        let red = quantize(205, 0, 0);
        assert_eq!(grid.color_at(0, 0), Some(red));
        assert_eq!(grid.color_at(1, 1), Some(red));
        assert_eq!(grid.color_at(0, 2), Some(0));

        assert!(frames.blocking_recv().is_none());
        assert!(session.is_finished());
        assert!(session.bytes_in() > 0);
    }

    #[test]
    fn test_corrupt_output_stops_capture() {
        let mut session = printf("plain text", 2, 3);
        let mut frames = session.take_frames().unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        let mut result = Ok(1);
        while Instant::now() < deadline {
            result = session.process_pty_output();
            if !matches!(result, Ok(n) if n > 0) {
                break;
            }
        }
        assert!(matches!(
            result,
            Err(PtyError::Parse(ansicast_grid::ParseError::Corrupt { .. }))
        ));
        assert!(frames.blocking_recv().is_none());
    }

    #[test]
    fn test_reader_moved_to_thread() {
        let mut session = printf(r"\033[32mXY\n", 1, 2);
        let mut frames = session.take_frames().unwrap();
        let mut reader = session.take_pty_reader().unwrap();
        assert!(matches!(
            session.process_pty_output(),
            Err(PtyError::ReaderTaken)
        ));

        let io = thread::spawn(move || {
            let mut out = Vec::new();
            let mut buf = [0u8; 1024];
            while let Ok(n) = reader.read(&mut buf) {
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            out
        });
        let bytes = io.join().unwrap();
        session.feed(&bytes).unwrap();
        session.finish().unwrap();

        let grid = frames.blocking_recv().expect("one grid");
        assert_eq!(grid.row_text(0), "XY");
    }

    #[test]
    fn test_exit_code_reported() {
        let cmd = GameCommand::new("/bin/sh").arg("-c").arg("exit 7");
        let mut session =
            CaptureSession::spawn(&cmd, 2, 2, 1, TrailingChunkPolicy::Buffer).unwrap();
        pump_to_end(&mut session);

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline && session.is_alive() {
            thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(session.exit_code(), Some(7));
        assert!(session.kill().is_ok());
    }
}
