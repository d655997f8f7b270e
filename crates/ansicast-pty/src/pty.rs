use std::io::Read;

use ansicast_grid::ParseError;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

/// Errors from PTY operations.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("PTY spawn failed: {0}")]
    SpawnFailed(String),
    #[error("PTY I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("PTY reader already taken")]
    ReaderTaken,
    #[error("capture stopped: {0}")]
    Parse(#[from] ParseError),
}

/// The program to capture and its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameCommand {
    program: String,
    args: Vec<String>,
}

impl GameCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }

    fn builder(&self) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// Owns a portable-pty child process, master side, and reader.
///
/// The game's input side is never opened: capture only reads.
pub struct PtyHandle {
    /// Keeps the master open for as long as the handle lives.
    _master: Box<dyn MasterPty + Send>,
    reader: Option<Box<dyn Read + Send>>,
    child: Box<dyn Child + Send + Sync>,
}

/// Terminates the game without access to its [`PtyHandle`].
///
/// Obtained from [`PtyHandle::killer`]. Lets a caller stop the game while the
/// handle itself is locked by a thread blocked in the parser.
pub struct GameKiller {
    inner: Box<dyn ChildKiller + Send + Sync>,
}

impl GameKiller {
    /// Signal the game to exit. Fails if it has already been reaped.
    pub fn kill(&mut self) -> Result<(), PtyError> {
        self.inner.kill()?;
        Ok(())
    }
}

impl std::fmt::Debug for GameKiller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameKiller").finish_non_exhaustive()
    }
}

impl PtyHandle {
    /// Spawn `command` on a new PTY of `cols x rows`.
    pub fn spawn(command: &GameCommand, cols: u16, rows: u16) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(format!("failed to open PTY: {e}")))?;

        let child = pair
            .slave
            .spawn_command(command.builder())
            .map_err(|e| {
                PtyError::SpawnFailed(format!("failed to spawn {}: {e}", command.program()))
            })?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(format!("failed to clone reader: {e}")))?;

        log::info!(
            "spawned {} {:?} on a {}x{} PTY",
            command.program(),
            command.argv(),
            cols,
            rows
        );

        Ok(Self {
            _master: pair.master,
            reader: Some(reader),
            child,
        })
    }

    /// Blocking read of game output. Call from a dedicated I/O thread.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, PtyError> {
        let reader = self.reader.as_mut().ok_or(PtyError::ReaderTaken)?;
        Ok(reader.read(buf)?)
    }

    /// Move the reader out so blocking reads can happen on another thread.
    pub fn take_reader(&mut self) -> Option<Box<dyn Read + Send>> {
        self.reader.take()
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&mut self) -> bool {
        self.try_wait().is_none()
    }

    /// Get the child process exit status if it has exited.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// Terminate the child process.
    pub fn kill(&mut self) -> Result<(), PtyError> {
        self.child.kill()?;
        Ok(())
    }

    /// A killer for this child that can be used from another thread.
    pub fn killer(&self) -> GameKiller {
        GameKiller {
            inner: self.child.clone_killer(),
        }
    }
}
