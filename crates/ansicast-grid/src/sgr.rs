//! Decoding of a single escape-delimited chunk into a [`StyledRun`].
//!
//! A chunk is one escape sequence followed by the text it styles, up to (but
//! not including) the next ESC byte. Each chunk is decoded on its own with a
//! fresh `vte` parser; no style carries over from one chunk to the next.

use vte::{Params, Parser, Perform};

use crate::color::{indexed_color, Rgb};

/// Replacement for characters that do not fit in one ASCII byte.
const REPLACEMENT: u8 = b'?';

/// Text sharing one foreground color.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyledRun {
    /// Foreground color, or `None` for the terminal default.
    pub fg: Option<Rgb>,
    /// Printable bytes and C0 control bytes, in stream order.
    pub label: Vec<u8>,
}

impl StyledRun {
    /// Packed color for the cells of this run. The default foreground maps to 0.
    pub fn color(&self) -> u8 {
        self.fg.map(Rgb::quantize).unwrap_or(0)
    }
}

/// Why a chunk produced no run. Always recoverable: the chunk is skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("unsupported escape sequence (final byte {0:?})")]
    Unsupported(char),
    #[error("unsupported SGR parameter {0}")]
    UnsupportedSgr(u16),
    #[error("malformed extended color in SGR parameters")]
    MalformedColor,
}

/// Decode one chunk.
///
/// Returns `Ok(None)` when the chunk is well formed but carries no text, such
/// as a lone ESC or a color change immediately followed by another escape.
pub fn parse_chunk(chunk: &[u8]) -> Result<Option<StyledRun>, ChunkError> {
    let mut collector = RunCollector::default();
    let mut parser = Parser::new();
    parser.advance(&mut collector, chunk);

    if let Some(err) = collector.error {
        return Err(err);
    }
    if collector.label.is_empty() {
        return Ok(None);
    }
    Ok(Some(StyledRun {
        fg: collector.fg,
        label: collector.label,
    }))
}

#[derive(Default)]
struct RunCollector {
    fg: Option<Rgb>,
    label: Vec<u8>,
    error: Option<ChunkError>,
}

impl RunCollector {
    fn fail(&mut self, err: ChunkError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn apply_sgr(&mut self, params: &Params) -> Result<(), ChunkError> {
        let mut iter = params.iter();
        while let Some(param) = iter.next() {
            match param {
                [] | [0] | [39] => self.fg = None,
                [code @ 30..=37] => self.fg = Some(indexed_color((code - 30) as u8)),
                [code @ 90..=97] => self.fg = Some(indexed_color((code - 90 + 8) as u8)),
                // Semicolon form: 38;5;n or 38;2;r;g;b spread over following params.
                [38] => self.fg = Some(extended_color(&mut iter)?),
                [48] => {
                    extended_color(&mut iter)?;
                }
                // Colon form: 38:5:n or 38:2[:cs]:r:g:b within one param.
                [38, rest @ ..] => self.fg = Some(extended_subparams(rest)?),
                [48, rest @ ..] => {
                    extended_subparams(rest)?;
                }
                // Attributes, backgrounds and underline styles do not affect
                // the captured foreground.
                [1..=29, ..] | [40..=47] | [49] | [50..=75] | [100..=107] => {}
                [code, ..] => return Err(ChunkError::UnsupportedSgr(*code)),
            }
        }
        Ok(())
    }
}

impl Perform for RunCollector {
    fn print(&mut self, c: char) {
        let byte = u8::try_from(c)
            .ok()
            .filter(u8::is_ascii)
            .unwrap_or(REPLACEMENT);
        self.label.push(byte);
    }

    // Every control byte goes to the label; the grid decides what `\r` and
    // `\n` mean and stores the rest as ordinary cells.
    fn execute(&mut self, byte: u8) {
        self.label.push(byte);
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        if action != 'm' || ignore || !intermediates.is_empty() {
            self.fail(ChunkError::Unsupported(action));
            return;
        }
        if let Err(err) = self.apply_sgr(params) {
            self.fail(err);
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, byte: u8) {
        self.fail(ChunkError::Unsupported(byte as char));
    }

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {
        self.fail(ChunkError::Unsupported(']'));
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        self.fail(ChunkError::Unsupported(action));
    }
}

fn extended_color<'a, I>(iter: &mut I) -> Result<Rgb, ChunkError>
where
    I: Iterator<Item = &'a [u16]>,
{
    let mut next = || match iter.next() {
        Some([value]) => Ok(*value),
        _ => Err(ChunkError::MalformedColor),
    };
    match next()? {
        5 => Ok(indexed_color(channel(next()?)?)),
        2 => {
            let r = channel(next()?)?;
            let g = channel(next()?)?;
            let b = channel(next()?)?;
            Ok(Rgb::new(r, g, b))
        }
        _ => Err(ChunkError::MalformedColor),
    }
}

fn extended_subparams(rest: &[u16]) -> Result<Rgb, ChunkError> {
    match rest {
        [5, idx] => Ok(indexed_color(channel(*idx)?)),
        [2, r, g, b] | [2, _, r, g, b] => {
            Ok(Rgb::new(channel(*r)?, channel(*g)?, channel(*b)?))
        }
        _ => Err(ChunkError::MalformedColor),
    }
}

fn channel(value: u16) -> Result<u8, ChunkError> {
    u8::try_from(value).map_err(|_| ChunkError::MalformedColor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunk: &[u8]) -> StyledRun {
        parse_chunk(chunk)
            .expect("chunk should parse")
            .expect("chunk should carry text")
    }

    #[test]
    fn test_basic_color() {
        let styled = run(b"\x1b[31mAB");
        assert_eq!(styled.fg, Some(Rgb::new(205, 0, 0)));
        assert_eq!(styled.label, b"AB");
        assert_eq!(styled.color(), 6 << 5);
    }

    #[test]
    fn test_bright_color() {
        assert_eq!(run(b"\x1b[94mx").fg, Some(Rgb::new(92, 92, 255)));
    }

    #[test]
    fn test_indexed_and_truecolor() {
        assert_eq!(run(b"\x1b[38;5;196mX").fg, Some(Rgb::new(255, 0, 0)));
        assert_eq!(run(b"\x1b[38;2;10;20;30mX").fg, Some(Rgb::new(10, 20, 30)));
    }

    #[test]
    fn test_reset_clears_foreground() {
        let styled = run(b"\x1b[0mhi");
        assert_eq!(styled.fg, None);
        assert_eq!(styled.color(), 0);

        let styled = run(b"\x1b[31;39mhi");
        assert_eq!(styled.fg, None);
    }

    #[test]
    fn test_attributes_and_background_ignored() {
        let styled = run(b"\x1b[1;4;32;44mok");
        assert_eq!(styled.fg, Some(Rgb::new(0, 205, 0)));
        let styled = run(b"\x1b[48;2;1;2;3;33mok");
        assert_eq!(styled.fg, Some(Rgb::new(205, 205, 0)));
    }

    #[test]
    fn test_control_bytes_kept_in_label() {
        let styled = run(b"\x1b[32mA\r\nB\x07\tC\x08");
        assert_eq!(styled.label, b"A\r\nB\x07\tC\x08");
    }

    #[test]
    fn test_non_ascii_replaced() {
        let styled = run("\x1b[32m\u{e9}x".as_bytes());
        assert_eq!(styled.label, b"?x");
    }

    #[test]
    fn test_empty_chunks_yield_no_run() {
        assert_eq!(parse_chunk(b"\x1b"), Ok(None));
        assert_eq!(parse_chunk(b"\x1b[31m"), Ok(None));
        assert_eq!(parse_chunk(b"\x1b[3"), Ok(None));
    }

    #[test]
    fn test_non_sgr_sequences_rejected() {
        assert_eq!(parse_chunk(b"\x1b[2Jtext"), Err(ChunkError::Unsupported('J')));
        assert_eq!(parse_chunk(b"\x1b[?25lx"), Err(ChunkError::Unsupported('l')));
        assert_eq!(parse_chunk(b"\x1b[H"), Err(ChunkError::Unsupported('H')));
    }

    #[test]
    fn test_malformed_sgr_rejected() {
        assert_eq!(
            parse_chunk(b"\x1b[38;2;300;0;0mX"),
            Err(ChunkError::MalformedColor)
        );
        assert_eq!(parse_chunk(b"\x1b[38;7mX"), Err(ChunkError::MalformedColor));
        assert_eq!(parse_chunk(b"\x1b[38mX"), Err(ChunkError::MalformedColor));
        assert_eq!(parse_chunk(b"\x1b[200mX"), Err(ChunkError::UnsupportedSgr(200)));
    }
}
