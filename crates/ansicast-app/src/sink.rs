//! Transport boundary: length-prefixed wire frames on a byte stream.
//!
//! Each record is a `u32` big-endian length followed by one wire frame
//! (strategy id + payload). The prefix belongs to this transport, not to the
//! frame format.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Writes wire frames to any byte sink.
pub struct FrameSink<W: Write> {
    writer: W,
    frames: u64,
    bytes: u64,
}

impl FrameSink<Box<dyn Write + Send>> {
    /// Frames to stdout, or to `path` when given.
    pub fn open(path: Option<&Path>) -> io::Result<Self> {
        let writer: Box<dyn Write + Send> = match path {
            Some(path) => Box::new(BufWriter::new(File::create(path)?)),
            None => Box::new(io::stdout()),
        };
        Ok(Self::new(writer))
    }
}

impl<W: Write> FrameSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            frames: 0,
            bytes: 0,
        }
    }

    /// Write one frame and flush, so viewers see it without delay.
    pub fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let len = u32::try_from(frame.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame exceeds u32 length"))?;
        self.writer.write_all(&len.to_be_bytes())?;
        self.writer.write_all(frame)?;
        self.writer.flush()?;
        self.frames += 1;
        self.bytes += 4 + frame.len() as u64;
        Ok(())
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes written so far, prefixes included.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reads frames written by a [`FrameSink`].
pub struct FrameSource<R: Read> {
    reader: R,
}

impl FrameSource<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> FrameSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// The next frame, or `None` at a clean end of stream.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut len = [0u8; 4];
        match self.reader.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let mut frame = vec![0u8; u32::from_be_bytes(len) as usize];
        self.reader.read_exact(&mut frame)?;
        Ok(Some(frame))
    }
}

impl<R: Read> Iterator for FrameSource<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix() {
        let mut sink = FrameSink::new(Vec::new());
        sink.send(&[0, b'a', b'b']).unwrap();
        sink.send(&[3, 0, 0]).unwrap();
        assert_eq!(sink.frames(), 2);
        assert_eq!(sink.bytes(), 14);
        assert_eq!(
            sink.into_inner(),
            vec![0, 0, 0, 3, 0, b'a', b'b', 0, 0, 0, 3, 3, 0, 0]
        );
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.bin");

        let mut sink = FrameSink::open(Some(path.as_path())).unwrap();
        sink.send(b"\x00first").unwrap();
        sink.send(b"\x01second").unwrap();
        drop(sink);

        let frames: Vec<_> = FrameSource::open(&path)
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(frames, vec![b"\x00first".to_vec(), b"\x01second".to_vec()]);
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let mut source = FrameSource::new(&[0u8, 0, 0, 9, 1, 2][..]);
        assert_eq!(
            source.next_frame().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );

        let mut empty = FrameSource::new(&[0u8; 0][..]);
        assert!(empty.next_frame().unwrap().is_none());
    }
}
