//! State shared between the main task, the capture thread, and the encode pump.

use std::sync::{Arc, Mutex};

use ansicast_pty::{CaptureSession, GameKiller};
use tokio::sync::mpsc;

/// The capture session, shared with the I/O thread.
pub type SharedSession = Arc<Mutex<CaptureSession>>;

/// Handles the main task uses to shut the pipeline down.
///
/// None of these touch the session mutex: the I/O thread holds it while the
/// parser waits on a full grid channel, which can last as long as the sink
/// is stalled.
pub struct CaptureState {
    pub session: SharedSession,
    /// Only the main task locks this.
    pub killer: Mutex<GameKiller>,
    /// Signals the I/O thread to stop.
    pub io_stop: mpsc::Sender<()>,
    /// Signals the encode pump to stop without draining.
    pub pump_stop: mpsc::Sender<()>,
}

impl CaptureState {
    pub fn new(
        session: CaptureSession,
        io_stop: mpsc::Sender<()>,
        pump_stop: mpsc::Sender<()>,
    ) -> Self {
        let killer = Mutex::new(session.killer());
        Self {
            session: Arc::new(Mutex::new(session)),
            killer,
            io_stop,
            pump_stop,
        }
    }

    /// Stop reading and terminate the game. The parser's channel closes once
    /// the I/O thread notices, and the pump drains what is already queued.
    pub fn shutdown(&self) {
        let _ = self.io_stop.try_send(());
        match self.killer.lock() {
            // Fails harmlessly when the game already exited.
            Ok(mut killer) => {
                if let Err(e) = killer.kill() {
                    log::debug!("game not killed: {e}");
                }
            }
            Err(_) => log::error!("game killer lock poisoned"),
        }
    }

    /// Stop the pump immediately, dropping queued grids.
    pub fn abort_pump(&self) {
        let _ = self.pump_stop.try_send(());
    }

    /// The game's exit code, if it has exited and the session is not busy.
    pub fn exit_code(&self) -> Option<u32> {
        self.session
            .try_lock()
            .ok()
            .and_then(|mut session| session.exit_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use ansicast_grid::TrailingChunkPolicy;
    use ansicast_pty::GameCommand;

    fn state(script: &str) -> (CaptureState, mpsc::Receiver<()>) {
        let cmd = GameCommand::new("/bin/sh").arg("-c").arg(script);
        let session = CaptureSession::spawn(&cmd, 1, 1, 1, TrailingChunkPolicy::Buffer).unwrap();
        let (io_stop, io_stop_rx) = mpsc::channel(1);
        let (pump_stop, _pump_stop_rx) = mpsc::channel(1);
        (CaptureState::new(session, io_stop, pump_stop), io_stop_rx)
    }

    #[test]
    fn test_shutdown_does_not_wait_for_session_lock() {
        let (state, mut io_stop_rx) = state("sleep 30");

        // Stand-in for the I/O thread parked in the parser.
        let held = state.session.lock().unwrap();
        state.shutdown();
        assert!(io_stop_rx.try_recv().is_ok());
        assert_eq!(state.exit_code(), None);
        drop(held);

        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline && state.exit_code().is_none() {
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(state.exit_code().is_some());
    }

    #[test]
    fn test_shutdown_after_exit_is_harmless() {
        let (state, _io_stop_rx) = state("exit 0");
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline && state.exit_code().is_none() {
            std::thread::sleep(Duration::from_millis(50));
        }
        state.shutdown();
        state.shutdown();
        assert_eq!(state.exit_code(), Some(0));
    }
}
