//! ansicast - capture a terminal game and stream compressed frames.
//!
//! `capture` runs the game under a PTY, rebuilds its screen into grids and
//! writes length-prefixed wire frames to stdout or a file. `replay` decodes
//! such a stream and prints each screen.

mod config;
mod encode_pump;
mod io_thread;
mod sink;
mod state;

use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;

use ansicast_codec::{FrameDecoder, FrameEncoder, Strategy};
use ansicast_pty::{CaptureSession, GameCommand};

use crate::config::{CaptureConfig, TrailingChunk};
use crate::sink::{FrameSink, FrameSource};
use crate::state::CaptureState;

#[derive(Parser)]
#[command(name = "ansicast")]
#[command(about = "Capture a terminal game and stream compressed frames")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a game under a PTY and encode its screen
    Capture {
        #[command(flatten)]
        settings: Settings,

        /// Write frames here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Game executable
        program: String,

        /// Arguments passed to the game
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Decode a frame stream and print every screen
    Replay {
        #[command(flatten)]
        settings: Settings,

        /// Frame file written by `capture --output`
        input: PathBuf,

        /// Print only the last screen
        #[arg(long)]
        last: bool,
    },
}

/// Config file plus per-field overrides.
#[derive(Args)]
struct Settings {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Screen rows
    #[arg(long)]
    rows: Option<u16>,

    /// Screen columns
    #[arg(long)]
    cols: Option<u16>,

    /// Largest quadtree leaf side
    #[arg(long)]
    leaf_size: Option<usize>,

    /// Grids queued between parser and encoder
    #[arg(long)]
    channel_capacity: Option<usize>,

    /// Emit each grid as soon as its last row is printed
    ///
    /// By default the final escape chunk of a screen is held until the next
    /// ESC arrives, so every grid goes out one game update late but the
    /// output never depends on how reads were split. With this flag the last
    /// row's trailing chunk is decoded right away, matching the timing of
    /// the classic capture loop.
    #[arg(long)]
    flush_last_row: bool,

    /// Strategy to register, in order (repeatable)
    #[arg(short, long = "strategy")]
    strategies: Vec<Strategy>,
}

impl Settings {
    fn resolve(&self) -> Result<CaptureConfig> {
        let mut config = match &self.config {
            Some(path) => CaptureConfig::load(path)?,
            None => CaptureConfig::default(),
        };
        if let Some(rows) = self.rows {
            config.rows = rows;
        }
        if let Some(cols) = self.cols {
            config.cols = cols;
        }
        if let Some(leaf_size) = self.leaf_size {
            config.leaf_size = leaf_size;
        }
        if let Some(capacity) = self.channel_capacity {
            config.channel_capacity = capacity;
        }
        if self.flush_last_row {
            config.trailing_chunk = TrailingChunk::FlushOnLastRow;
        }
        if !self.strategies.is_empty() {
            config.strategies = self.strategies.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout may carry frames.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Capture {
            settings,
            output,
            program,
            args,
        } => {
            let config = settings.resolve()?;
            let command = GameCommand::new(program).args(args);
            capture(&config, &command, output.as_deref()).await
        }
        Commands::Replay {
            settings,
            input,
            last,
        } => {
            let config = settings.resolve()?;
            replay(&config, &input, last)
        }
    }
}

async fn capture(config: &CaptureConfig, command: &GameCommand, output: Option<&Path>) -> Result<()> {
    let mut session = CaptureSession::spawn(
        command,
        config.rows,
        config.cols,
        config.channel_capacity,
        config.trailing_chunk_policy(),
    )
    .with_context(|| format!("failed to start {}", command.program()))?;

    let (Some(frames), Some(reader)) = (session.take_frames(), session.take_pty_reader()) else {
        bail!("capture session already consumed");
    };

    let encoder = FrameEncoder::with_strategies(
        config.rows as usize,
        config.cols as usize,
        config.quadtree_params(),
        &config.strategies,
    );
    let sink = FrameSink::open(output).context("failed to open frame output")?;

    let (io_stop, io_stop_rx) = mpsc::channel(1);
    let (pump_stop, pump_stop_rx) = mpsc::channel(1);
    let state = CaptureState::new(session, io_stop, pump_stop);

    let io = io_thread::start_io_thread(state.session.clone(), reader, io_stop_rx)
        .context("failed to spawn capture thread")?;
    let mut pump = encode_pump::start_encode_pump(frames, encoder, sink, pump_stop_rx);

    let joined = tokio::select! {
        result = &mut pump => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted, stopping game");
            state.shutdown();
            tokio::select! {
                result = &mut pump => result,
                _ = tokio::signal::ctrl_c() => {
                    state.abort_pump();
                    pump.await
                }
            }
        }
    };
    let summary = joined
        .context("encode pump panicked")?
        .context("failed to write frames")?;

    // The pump only ends after the channel closes or on abort; either way
    // the game is done with.
    state.shutdown();
    if io.is_finished() {
        if let Ok(end) = io.join() {
            log::debug!("capture thread returned {end:?}");
        }
    }

    let exit = state.exit_code();
    log::info!(
        "captured {} grids, {} bytes written, game exit code {:?}",
        summary.grids,
        summary.bytes_out,
        exit
    );
    Ok(())
}

fn replay(config: &CaptureConfig, input: &Path, last_only: bool) -> Result<()> {
    let source = FrameSource::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let mut decoder = FrameDecoder::new(config.rows as usize, config.cols as usize);
    let mut count = 0usize;

    for (idx, frame) in source.enumerate() {
        let frame = frame.with_context(|| format!("failed to read frame {idx}"))?;
        let strategy = frame.first().copied().and_then(|id| Strategy::try_from(id).ok());
        let grid = match decoder.decode(&frame) {
            Ok(grid) => grid,
            Err(e) if e.is_protocol_mismatch() => {
                return Err(e).with_context(|| format!("frame {idx} uses an unknown strategy"));
            }
            Err(e) => {
                log::warn!("skipping frame {idx}: {e}");
                continue;
            }
        };
        count += 1;

        if !last_only {
            print_grid(idx, strategy, frame.len(), &grid);
        }
    }

    match decoder.previous() {
        Some(grid) if last_only => print_grid(count.saturating_sub(1), None, 0, grid),
        None => log::warn!("no frames decoded from {}", input.display()),
        _ => {}
    }
    log::info!("decoded {count} frames");
    Ok(())
}

fn print_grid(idx: usize, strategy: Option<Strategy>, size: usize, grid: &ansicast_grid::Grid) {
    match strategy {
        Some(strategy) => println!("-- frame {idx} ({strategy}, {size} bytes)"),
        None => println!("-- frame {idx}"),
    }
    for row in 0..grid.rows() {
        println!("{}", grid.row_text(row));
    }
}
