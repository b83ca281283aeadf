//! Frame codec: length-prefixed JSON frames and legacy line text.
//!
//! Versioned sessions exchange frames as a 4-byte big-endian length prefix
//! followed by a JSON-encoded [`WireFrame`]. Legacy sessions write bare
//! newline-terminated text instead and never see framed objects.

use std::io::{BufRead, BufReader, Read, Write};

use crate::error::{StreamError, StreamResult};

use super::frame::{Frame, WireFrame};

/// Upper bound on a single frame payload; anything larger is corruption
const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Buffered line reader used during the handshake and by legacy sessions
///
/// Owns the underlying reader's buffer, so it can be handed on to a
/// [`FrameReader`] once the handshake switches the stream to framed
/// operation without losing buffered bytes.
pub struct LineReader {
    inner: BufReader<Box<dyn Read + Send>>,
}

impl LineReader {
    /// Wraps a transport reader half
    #[must_use]
    pub fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Reads one newline-terminated line, trimming the terminator
    ///
    /// Returns `None` on a clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        let n = self.inner.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Converts into a framed reader over the same buffered stream
    #[must_use]
    pub fn into_frame_reader(self) -> FrameReader {
        FrameReader::new(Box::new(self.inner))
    }
}

/// Reader of length-prefixed JSON frames
pub struct FrameReader {
    inner: Box<dyn Read + Send>,
}

impl FrameReader {
    /// Wraps a transport reader half
    #[must_use]
    pub fn new(reader: Box<dyn Read + Send>) -> Self {
        Self { inner: reader }
    }

    /// Reads and decodes the next frame, blocking until one arrives
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnexpectedEof`] when the stream closes (also
    /// mid-frame), [`StreamError::Corrupt`] for an undecodable payload or
    /// an implausible length prefix, and [`StreamError::UnknownFrame`] for
    /// an unrecognized type tag. Callers treat every variant as a
    /// disconnect; no partial-frame recovery is attempted.
    pub fn read_frame(&mut self) -> StreamResult<Frame> {
        let mut len_buf = [0u8; 4];
        read_exact_or_eof(&mut self.inner, &mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 || len > MAX_FRAME_LEN {
            return Err(StreamError::Corrupt(format!(
                "implausible frame length {len}"
            )));
        }

        let mut payload = vec![0u8; len];
        read_exact_or_eof(&mut self.inner, &mut payload)?;
        let wire: WireFrame = serde_json::from_slice(&payload)
            .map_err(|e| StreamError::Corrupt(e.to_string()))?;
        Frame::from_wire(wire)
    }
}

fn read_exact_or_eof(reader: &mut (dyn Read + Send), buf: &mut [u8]) -> StreamResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            StreamError::UnexpectedEof
        } else {
            StreamError::Io(e)
        }
    })
}

/// Writer of outbound frames or legacy text lines
///
/// The encoder keeps one scratch buffer that is cleared after every frame
/// write, so no state survives from one frame to the next and the buffer
/// never grows past the largest single frame.
pub struct FrameWriter {
    scratch: Vec<u8>,
}

impl FrameWriter {
    /// Creates a writer with an empty scratch buffer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            scratch: Vec::new(),
        }
    }

    /// Writes one frame in the versioned format
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O or serialization error.
    pub fn write_frame(
        &mut self,
        writer: &mut (dyn Write + Send),
        frame: &Frame,
    ) -> std::io::Result<()> {
        self.scratch.clear();
        serde_json::to_writer(&mut self.scratch, &frame.to_wire())
            .map_err(std::io::Error::other)?;
        // Cap the length before committing anything to the stream.
        let len = u32::try_from(self.scratch.len())
            .map_err(|_| std::io::Error::other("frame exceeds length prefix"))?;
        writer.write_all(&len.to_be_bytes())?;
        writer.write_all(&self.scratch)?;
        writer.flush()?;
        self.scratch.clear();
        Ok(())
    }

    /// Writes one newline-terminated text line in the legacy format
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn write_line(writer: &mut (dyn Write + Send), line: &str) -> std::io::Result<()> {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}
